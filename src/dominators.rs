//! Dominator tree and retained sizes.
//!
//! An object `d` dominates `v` when every path from a gc root to `v` runs
//! through `d`, so freeing `d` frees everything it dominates. Retained
//! size is exactly that: the shallow bytes of an object plus the bytes of
//! all objects it dominates, tracked per heap.
//!
//! The tree is built with the Cooper/Harvey/Kennedy iterative scheme: a
//! depth first pass numbers reachable nodes in reverse postorder, then
//! immediate dominators are refined by intersecting predecessor chains
//! until they stop changing. A synthetic super root sits above all gc
//! roots so the iteration has a single entry, and multi-rooted objects
//! end up dominated by it rather than by any one root.

use std::collections::HashMap;

use fixedbitset::FixedBitSet;
use log::debug;

use crate::snapshot::{ObjRef, Snapshot};
use crate::Id;

const UNDEFINED: u32 = u32::MAX;

/// A node in the dominator tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DomNode {
    /// The synthetic node above all gc roots.
    SuperRoot,
    Obj(ObjRef),
}

/// Dominator tree plus retained size tables for one snapshot.
///
/// Node indices are dense: 0 is the super root, object `i` is node `i + 1`.
pub struct DominatorInfo {
    n_heaps: usize,
    idom: Vec<u32>,
    /// Flattened per-object rows of per-heap retained bytes. Rows of
    /// unreachable objects keep their initial value, the object's shallow
    /// size in its own heap, which doubles as the fallback for retained
    /// reads.
    retained: Vec<u64>,
    /// The super root's row: total reachable bytes per heap.
    heap_totals: Vec<u64>,
    class_retained: HashMap<Id, u64>,
}

impl DominatorInfo {
    pub(crate) fn build(snapshot: &Snapshot) -> DominatorInfo {
        let n = snapshot.object_count();
        let n_heaps = snapshot.heaps().len();
        let total = n + 1;

        // depth first pass from the super root, recording postorder
        struct Frame {
            node: u32,
            succs: Vec<u32>,
            cursor: usize,
        }

        let mut visited = FixedBitSet::with_capacity(total);
        let mut postorder: Vec<u32> = Vec::with_capacity(total);
        visited.put(0);
        let mut stack = vec![Frame {
            node: 0,
            succs: successors(snapshot, 0),
            cursor: 0,
        }];
        while let Some(frame) = stack.last_mut() {
            if frame.cursor < frame.succs.len() {
                let next = frame.succs[frame.cursor];
                frame.cursor += 1;
                if !visited.put(next as usize) {
                    let succs = successors(snapshot, next);
                    stack.push(Frame {
                        node: next,
                        succs,
                        cursor: 0,
                    });
                }
            } else {
                postorder.push(frame.node);
                stack.pop();
            }
        }

        let mut rpo_num = vec![UNDEFINED; total];
        let order: Vec<u32> = postorder.iter().rev().copied().collect();
        for (k, &node) in order.iter().enumerate() {
            rpo_num[node as usize] = k as u32;
        }

        // predecessors of reachable nodes, restricted to reachable
        // referrers, plus super root edges to the root referents
        let mut preds: Vec<Vec<u32>> = vec![Vec::new(); total];
        for i in 0..n {
            let node = (i + 1) as u32;
            if rpo_num[node as usize] == UNDEFINED {
                continue;
            }
            preds[node as usize] = snapshot
                .inbound(ObjRef(i as u32))
                .iter()
                .map(|r| r.index() as u32 + 1)
                .filter(|&p| rpo_num[p as usize] != UNDEFINED)
                .collect();
        }
        for seed in snapshot.root_referent_refs() {
            preds[seed.index() + 1].push(0);
        }

        let mut idom = vec![UNDEFINED; total];
        idom[0] = 0;
        let mut passes = 0;
        let mut changed = true;
        while changed {
            changed = false;
            passes += 1;
            for &node in order.iter().skip(1) {
                let mut new_idom = UNDEFINED;
                for &pred in &preds[node as usize] {
                    if idom[pred as usize] == UNDEFINED {
                        continue;
                    }
                    new_idom = if new_idom == UNDEFINED {
                        pred
                    } else {
                        intersect(&idom, &rpo_num, new_idom, pred)
                    };
                }
                if new_idom != UNDEFINED && idom[node as usize] != new_idom {
                    idom[node as usize] = new_idom;
                    changed = true;
                }
            }
        }
        debug!(
            "dominators over {} reachable of {} objects converged in {} passes",
            order.len() - 1,
            n,
            passes
        );

        // every row starts as the object's shallow size in its own heap,
        // then postorder accumulation folds each node into its dominator;
        // postorder puts every node before its dominator, so a node's row
        // is complete by the time it is folded
        let mut retained = vec![0_u64; n * n_heaps];
        for (r, obj) in snapshot.objects() {
            retained[r.index() * n_heaps + obj.heap_index()] = obj.shallow_size();
        }
        let mut heap_totals = vec![0_u64; n_heaps];
        for &node in &postorder {
            if node == 0 {
                continue;
            }
            let dom = idom[node as usize];
            if dom == UNDEFINED {
                continue;
            }
            let from = (node - 1) as usize;
            if dom == 0 {
                for h in 0..n_heaps {
                    heap_totals[h] += retained[from * n_heaps + h];
                }
            } else {
                let to = (dom - 1) as usize;
                for h in 0..n_heaps {
                    let bytes = retained[from * n_heaps + h];
                    retained[to * n_heaps + h] += bytes;
                }
            }
        }

        let mut class_retained: HashMap<Id, u64> = HashMap::new();
        for (r, obj) in snapshot.objects() {
            if rpo_num[r.index() + 1] == UNDEFINED {
                continue;
            }
            if let Some(class_id) = obj.class_id() {
                let row = &retained[r.index() * n_heaps..(r.index() + 1) * n_heaps];
                *class_retained.entry(class_id).or_insert(0) += row.iter().sum::<u64>();
            }
        }

        DominatorInfo {
            n_heaps,
            idom,
            retained,
            heap_totals,
            class_retained,
        }
    }

    /// Immediate dominator, `None` for unreachable objects.
    pub fn idom(&self, obj_ref: ObjRef) -> Option<DomNode> {
        match self.idom[obj_ref.index() + 1] {
            UNDEFINED => None,
            0 => Some(DomNode::SuperRoot),
            node => Some(DomNode::Obj(ObjRef(node - 1))),
        }
    }

    pub fn is_reachable(&self, obj_ref: ObjRef) -> bool {
        self.idom[obj_ref.index() + 1] != UNDEFINED
    }

    /// Retained bytes of `obj_ref` attributable to one heap.
    pub fn retained_in_heap(&self, obj_ref: ObjRef, heap_index: usize) -> u64 {
        self.retained[obj_ref.index() * self.n_heaps + heap_index]
    }

    /// Retained bytes of `obj_ref` across all heaps. For an unreachable
    /// object this is its shallow size: nothing else can be pinned by an
    /// object the collector has already given up on.
    pub fn retained_size(&self, obj_ref: ObjRef) -> u64 {
        let start = obj_ref.index() * self.n_heaps;
        self.retained[start..start + self.n_heaps].iter().sum()
    }

    /// Total reachable bytes in one heap.
    pub fn heap_total(&self, heap_index: usize) -> u64 {
        self.heap_totals[heap_index]
    }

    pub fn heap_totals(&self) -> &[u64] {
        &self.heap_totals
    }

    /// Summed all-heap retained size of a class's reachable instances.
    pub fn class_retained(&self, class_id: Id) -> u64 {
        self.class_retained.get(&class_id).copied().unwrap_or(0)
    }
}

fn successors(snapshot: &Snapshot, node: u32) -> Vec<u32> {
    if node == 0 {
        snapshot
            .root_referent_refs()
            .iter()
            .map(|r| r.index() as u32 + 1)
            .collect()
    } else {
        snapshot
            .outgoing(ObjRef(node - 1))
            .iter()
            .map(|r| r.index() as u32 + 1)
            .collect()
    }
}

fn intersect(idom: &[u32], rpo_num: &[u32], a: u32, b: u32) -> u32 {
    let (mut a, mut b) = (a, b);
    while a != b {
        while rpo_num[a as usize] > rpo_num[b as usize] {
            a = idom[a as usize];
        }
        while rpo_num[b as usize] > rpo_num[a as usize] {
            b = idom[b as usize];
        }
    }
    a
}
