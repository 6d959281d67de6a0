//! Non-recursive traversal over a snapshot's reference graph.
//!
//! Heap graphs routinely hold reference chains (linked lists, wrapper
//! nests) deep enough to overflow the call stack, so traversal runs on an
//! explicit stack with a bit set marking objects already scheduled.

use fixedbitset::FixedBitSet;

use crate::snapshot::{Obj, ObjRef, RootObj, Snapshot};

/// Callbacks invoked during traversal.
pub trait Visitor {
    /// Called once per gc root, before any objects are visited.
    fn visit_root(&mut self, _root: &RootObj) {}

    /// Called exactly once per reachable object.
    fn visit(&mut self, obj_ref: ObjRef, obj: &Obj<'_>);
}

/// Walk every object reachable from the gc roots.
///
/// Roots themselves are reported through [Visitor::visit_root] and are
/// never pushed on the traversal stack; only their referents are.
pub fn traverse_roots<V: Visitor>(snapshot: &Snapshot, visitor: &mut V) {
    for root in snapshot.gc_roots() {
        visitor.visit_root(root);
    }
    traverse(snapshot, snapshot.root_referent_refs(), visitor);
}

/// Walk every object reachable from `seeds`, depth first.
///
/// Each object is visited exactly once, even through reference cycles:
/// objects are marked when scheduled, not when popped, so they can never
/// be pushed twice.
pub fn traverse<V, I>(snapshot: &Snapshot, seeds: I, visitor: &mut V)
where
    V: Visitor,
    I: IntoIterator<Item = ObjRef>,
{
    let mut seen = FixedBitSet::with_capacity(snapshot.object_count());
    let mut stack: Vec<ObjRef> = Vec::new();

    for seed in seeds {
        if !seen.put(seed.index()) {
            stack.push(seed);
        }
    }

    while let Some(obj_ref) = stack.pop() {
        visitor.visit(obj_ref, snapshot.obj(obj_ref));
        for next in snapshot.outgoing(obj_ref) {
            if !seen.put(next.index()) {
                stack.push(next);
            }
        }
    }
}

/// Total shallow size of `obj_ref` plus everything reachable from it.
///
/// Shared objects count once no matter how many paths lead to them, so
/// this is an upper bound on the object's retained size, not the retained
/// size itself.
pub fn composite_size(snapshot: &Snapshot, obj_ref: ObjRef) -> u64 {
    struct Summer {
        total: u64,
    }

    impl Visitor for Summer {
        fn visit(&mut self, _obj_ref: ObjRef, obj: &Obj<'_>) {
            self.total += obj.shallow_size();
        }
    }

    let mut summer = Summer { total: 0 };
    traverse(snapshot, [obj_ref], &mut summer);
    summer.total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap_dump::{FieldType, FieldValue};
    use crate::test_dump::{field_bytes, DumpBuilder};
    use crate::{parse_hprof, Id, IdSize, Snapshot};

    struct Recorder {
        roots: usize,
        visited: Vec<Id>,
    }

    impl Recorder {
        fn new() -> Recorder {
            Recorder {
                roots: 0,
                visited: Vec::new(),
            }
        }
    }

    impl Visitor for Recorder {
        fn visit_root(&mut self, _root: &RootObj) {
            self.roots += 1;
        }

        fn visit(&mut self, _obj_ref: ObjRef, obj: &Obj<'_>) {
            self.visited.push(obj.id());
        }
    }

    fn snapshot_of(bytes: &[u8]) -> Snapshot<'_> {
        let hprof = parse_hprof(bytes).unwrap();
        Snapshot::parse(&hprof).unwrap()
    }

    // one class (id 0x10, instance size 16) with a single `next` field
    fn linked_dump(links: &[(u64, u64)]) -> Vec<u8> {
        let mut builder = DumpBuilder::new()
            .utf8(100, "com.example.Node")
            .utf8(103, "next")
            .load_class(1, 0x10, 100);
        builder = builder.heap_dump(|seg| {
            seg.class_dump(0x10, 0, 16, &[], &[(103, FieldType::ObjectId)]);
            for &(id, next) in links {
                let next = if next == 0 {
                    FieldValue::ObjectId(None)
                } else {
                    FieldValue::ObjectId(Some(next.into()))
                };
                seg.instance_dump(id, 0x10, &field_bytes(IdSize::U64, &[next]));
            }
        });
        builder.build()
    }

    #[test]
    fn cycle_terminates_and_visits_once() {
        let bytes = linked_dump(&[(0x20, 0x21), (0x21, 0x20)]);
        let snapshot = snapshot_of(&bytes);
        let a = snapshot.find_obj(0x20.into()).unwrap();

        let mut recorder = Recorder::new();
        traverse(&snapshot, [a], &mut recorder);

        let mut visited = recorder.visited;
        visited.sort();
        assert_eq!(vec![Id::from(0x20), Id::from(0x21)], visited);
    }

    #[test]
    fn diamond_is_visited_once_per_object() {
        let bytes = DumpBuilder::new()
            .utf8(101, "java.lang.Object")
            .load_class(1, 0x11, 101)
            .heap_dump(|seg| {
                seg.class_dump(0x11, 0, 0, &[], &[]);
                // top -> left, right; left -> bottom; right -> bottom
                seg.object_array_dump(0x30, 0x11, &[0x31, 0x32]);
                seg.object_array_dump(0x31, 0x11, &[0x33]);
                seg.object_array_dump(0x32, 0x11, &[0x33]);
                seg.object_array_dump(0x33, 0x11, &[]);
            })
            .build();
        let snapshot = snapshot_of(&bytes);
        let top = snapshot.find_obj(0x30.into()).unwrap();

        let mut recorder = Recorder::new();
        traverse(&snapshot, [top], &mut recorder);

        assert_eq!(4, recorder.visited.len());
        let mut visited = recorder.visited;
        visited.sort();
        visited.dedup();
        assert_eq!(4, visited.len());
    }

    #[test]
    fn traverse_roots_reports_roots_and_reaches_referents() {
        let bytes = DumpBuilder::new()
            .utf8(100, "com.example.Node")
            .utf8(103, "next")
            .load_class(1, 0x10, 100)
            .heap_dump(|seg| {
                seg.class_dump(0x10, 0, 16, &[], &[(103, FieldType::ObjectId)]);
                seg.instance_dump(
                    0x20,
                    0x10,
                    &field_bytes(IdSize::U64, &[FieldValue::ObjectId(Some(0x21.into()))]),
                );
                seg.instance_dump(
                    0x21,
                    0x10,
                    &field_bytes(IdSize::U64, &[FieldValue::ObjectId(None)]),
                );
                seg.root_unknown(0x20);
                // a thread root with no backing object contributes no seed
                seg.root_thread_object(0, 5, 9);
            })
            .build();
        let snapshot = snapshot_of(&bytes);

        let mut recorder = Recorder::new();
        traverse_roots(&snapshot, &mut recorder);

        assert_eq!(2, recorder.roots);
        let mut visited = recorder.visited;
        visited.sort();
        assert_eq!(vec![Id::from(0x20), Id::from(0x21)], visited);
    }

    #[test]
    fn composite_size_sums_the_reachable_subgraph() {
        let bytes = linked_dump(&[(0x20, 0x21), (0x21, 0x22), (0x22, 0)]);
        let snapshot = snapshot_of(&bytes);

        let a = snapshot.find_obj(0x20.into()).unwrap();
        let b = snapshot.find_obj(0x21.into()).unwrap();
        assert_eq!(48, composite_size(&snapshot, a));
        assert_eq!(32, composite_size(&snapshot, b));
    }

    #[test]
    fn composite_size_counts_shared_objects_once() {
        let bytes = DumpBuilder::new()
            .utf8(101, "java.lang.Object")
            .load_class(1, 0x11, 101)
            .heap_dump(|seg| {
                seg.class_dump(0x11, 0, 0, &[], &[]);
                seg.object_array_dump(0x30, 0x11, &[0x31, 0x32]);
                seg.object_array_dump(0x31, 0x11, &[0x33]);
                seg.object_array_dump(0x32, 0x11, &[0x33]);
                seg.primitive_array_dump(0x33, crate::heap_dump::PrimitiveArrayType::Byte, &[0; 10]);
            })
            .build();
        let snapshot = snapshot_of(&bytes);
        let top = snapshot.find_obj(0x30.into()).unwrap();

        // 16 + 8 + 8 element slots, plus the byte array once
        assert_eq!(42, composite_size(&snapshot, top));
    }
}
