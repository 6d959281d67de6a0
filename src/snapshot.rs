//! Resolved object graph built from the raw record stream.
//!
//! [`Snapshot::parse`] makes two passes. A decode pass walks every record
//! once, collecting the string table, load-class entries, gc roots, and the
//! raw object sub-records, tracking which heap each object belongs to. A
//! resolution pass then materializes objects into an arena, wires up the
//! class hierarchy, computes shallow sizes, and validates every stored
//! reference while building the inbound edge table. A snapshot is only
//! handed back when the whole graph checked out.

use std::borrow::Cow;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use getset::CopyGetters;
use log::debug;

use crate::dominators::DominatorInfo;
use crate::heap_dump::{self, non_null, FieldValue, GcRoot, RootKind, SubRecord};
use crate::{
    Hprof, HprofError, Id, IdSize, LoadClass, Result, Serial, StackFrame, StackTrace,
};

pub mod obj;

pub use obj::{ArrayData, ArrayInstance, ClassInstance, ClassObj, Obj, ObjRef};

use obj::{object_array_shallow_size, primitive_array_shallow_size};

const DEFAULT_HEAP_NAME: &str = "default";
const JAVA_LANG_CLASS: &str = "java.lang.Class";

/// One heap within a snapshot.
///
/// Plain JVM dumps have a single heap; the Android dialect splits objects
/// into named heaps (`app`, `zygote`, `image`, ...) via heap dump info
/// markers. The default heap always exists and is always first. Gc roots
/// and threads are not heap-scoped in the dump, so they all live on the
/// default heap.
pub struct Heap {
    id: u32,
    name: String,
    roots: Vec<RootObj>,
    threads: HashMap<Serial, ThreadObj>,
    classes_by_id: HashMap<Id, ObjRef>,
    classes_by_name: HashMap<String, Vec<ObjRef>>,
    instances: Vec<ObjRef>,
}

impl Heap {
    fn new(id: u32, name: String) -> Heap {
        Heap {
            id,
            name,
            roots: Vec::new(),
            threads: HashMap::new(),
            classes_by_id: HashMap::new(),
            classes_by_name: HashMap::new(),
            instances: Vec::new(),
        }
    }

    /// Heap id from the dump. The default heap has id 0.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gc roots, in stream order. Empty for all but the default heap.
    pub fn roots(&self) -> &[RootObj] {
        &self.roots
    }

    pub fn thread(&self, serial: Serial) -> Option<&ThreadObj> {
        self.threads.get(&serial)
    }

    pub fn threads(&self) -> impl Iterator<Item = &ThreadObj> {
        self.threads.values()
    }

    /// Classes whose dump was assigned to this heap.
    pub fn classes(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.classes_by_id.values().copied()
    }

    pub fn class_by_id(&self, id: Id) -> Option<ObjRef> {
        self.classes_by_id.get(&id).copied()
    }

    /// All classes in this heap with the given name. Class names are not
    /// unique: the same class loaded by different loaders dumps once per
    /// load.
    pub fn classes_with_name(&self, name: &str) -> &[ObjRef] {
        self.classes_by_name
            .get(name)
            .map(|refs| refs.as_slice())
            .unwrap_or(&[])
    }

    /// Non-class objects assigned to this heap, in stream order.
    pub fn instances(&self) -> &[ObjRef] {
        &self.instances
    }
}

/// A gc root entry, resolved.
#[derive(CopyGetters, Copy, Clone, Debug)]
#[get_copy = "pub"]
pub struct RootObj {
    kind: RootKind,
    /// Referenced object, `None` for roots with a null id.
    referent: Option<Id>,
    thread_serial: Option<Serial>,
    frame_index: Option<u32>,
}

/// A running thread recorded by a thread-object root.
#[derive(CopyGetters, Copy, Clone, Debug)]
#[get_copy = "pub"]
pub struct ThreadObj {
    /// The `java.lang.Thread` instance, if the thread has one.
    obj_id: Option<Id>,
    thread_serial: Serial,
    stack_trace_serial: Serial,
}

/// Per-class aggregate row, one per class object.
pub struct ClassStats<'s> {
    pub class: ObjRef,
    pub name: &'s str,
    pub instance_count: usize,
    pub shallow_total: u64,
    /// `None` until dominators have been computed.
    pub retained_total: Option<u64>,
}

/// The fully resolved object graph of one dump.
pub struct Snapshot<'a> {
    id_size: IdSize,
    /// Default heap first, then named heaps in order of appearance.
    heaps: Vec<Heap>,
    /// Object arena. [ObjRef] values index into this.
    objects: Vec<Obj<'a>>,
    index: HashMap<Id, ObjRef>,
    strings: HashMap<Id, Cow<'a, str>>,
    load_classes: HashMap<Id, LoadClass>,
    stack_frames: HashMap<Id, StackFrame>,
    stack_traces: HashMap<Serial, StackTrace<'a>>,
    /// Reverse edges: `inbound[i]` lists every object with a reference to
    /// object `i`. Built during resolution, before any traversal runs.
    inbound: Vec<Vec<ObjRef>>,
    dominators: Option<DominatorInfo>,
}

struct HeapSeed {
    id: u32,
    name_id: Option<Id>,
}

struct WireObj<'a> {
    heap_index: usize,
    /// Absolute byte offset of the sub-record, for error reporting.
    offset: usize,
    kind: WireKind<'a>,
}

enum WireKind<'a> {
    Class(heap_dump::Class<'a>),
    Instance(heap_dump::Instance<'a>),
    ObjectArray(heap_dump::ObjectArray<'a>),
    PrimitiveArray(heap_dump::PrimitiveArray<'a>),
}

impl WireObj<'_> {
    fn obj_id(&self) -> Id {
        match &self.kind {
            WireKind::Class(c) => c.obj_id(),
            WireKind::Instance(i) => i.obj_id(),
            WireKind::ObjectArray(a) => a.obj_id(),
            WireKind::PrimitiveArray(p) => p.obj_id(),
        }
    }
}

struct Decoded<'a> {
    id_size: IdSize,
    strings: HashMap<Id, Cow<'a, str>>,
    load_classes: HashMap<Id, LoadClass>,
    stack_frames: HashMap<Id, StackFrame>,
    stack_traces: HashMap<Serial, StackTrace<'a>>,
    heap_seeds: Vec<HeapSeed>,
    wire: Vec<WireObj<'a>>,
    slots: HashMap<Id, usize>,
    roots: Vec<GcRoot>,
}

impl<'a> Snapshot<'a> {
    /// Decode every record of the dump and resolve the object graph.
    pub fn parse(hprof: &Hprof<'a>) -> Result<Snapshot<'a>> {
        let decoded = decode(hprof)?;
        resolve(decoded)
    }

    pub fn id_size(&self) -> IdSize {
        self.id_size
    }

    pub fn heaps(&self) -> &[Heap] {
        &self.heaps
    }

    pub fn heap_by_id(&self, id: u32) -> Option<&Heap> {
        self.heaps.iter().find(|h| h.id == id)
    }

    pub fn heap_by_name(&self, name: &str) -> Option<&Heap> {
        self.heaps.iter().find(|h| h.name == name)
    }

    pub fn default_heap(&self) -> &Heap {
        &self.heaps[0]
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Every object in the arena, in stream order.
    pub fn objects(&self) -> impl Iterator<Item = (ObjRef, &Obj<'a>)> {
        self.objects
            .iter()
            .enumerate()
            .map(|(i, obj)| (ObjRef(i as u32), obj))
    }

    /// Look up an object by arena handle.
    ///
    /// Handles are only valid for the snapshot that issued them.
    pub fn obj(&self, obj_ref: ObjRef) -> &Obj<'a> {
        &self.objects[obj_ref.index()]
    }

    pub fn find_obj(&self, id: Id) -> Option<ObjRef> {
        self.index.get(&id).copied()
    }

    pub fn find_class(&self, id: Id) -> Option<&ClassObj<'a>> {
        self.index
            .get(&id)
            .and_then(|r| self.objects[r.index()].as_class())
    }

    /// Every class object, across all heaps, in stream order.
    pub fn classes(&self) -> impl Iterator<Item = (ObjRef, &ClassObj<'a>)> {
        self.objects
            .iter()
            .enumerate()
            .filter_map(|(i, obj)| obj.as_class().map(|c| (ObjRef(i as u32), c)))
    }

    /// All classes with the given (normalized) name, across all heaps.
    pub fn classes_with_name(&self, name: &str) -> Vec<ObjRef> {
        self.heaps
            .iter()
            .flat_map(|h| h.classes_with_name(name).iter().copied())
            .collect()
    }

    /// All gc roots. Roots are not heap-scoped, so this is the default
    /// heap's root list.
    pub fn gc_roots(&self) -> &[RootObj] {
        self.heaps[0].roots()
    }

    pub fn threads(&self) -> impl Iterator<Item = &ThreadObj> {
        self.heaps[0].threads()
    }

    /// Text of a Utf8 record, decoded lossily.
    pub fn string(&self, id: Id) -> Option<&str> {
        self.strings.get(&id).map(|s| s.as_ref())
    }

    pub fn load_class(&self, class_obj_id: Id) -> Option<&LoadClass> {
        self.load_classes.get(&class_obj_id)
    }

    pub fn stack_frame(&self, id: Id) -> Option<&StackFrame> {
        self.stack_frames.get(&id)
    }

    pub fn stack_trace(&self, serial: Serial) -> Option<&StackTrace<'a>> {
        self.stack_traces.get(&serial)
    }

    /// Allocation trace of the thread owning `root`, joined through the
    /// thread table. `None` for root kinds that carry no thread serial, and
    /// for serials no thread object root ever declared.
    pub fn root_stack_trace(&self, root: &RootObj) -> Option<&StackTrace<'a>> {
        let thread = self.heaps[0].thread(root.thread_serial()?)?;
        self.stack_trace(thread.stack_trace_serial())
    }

    /// Objects directly referenced by `obj_ref`: static fields for classes,
    /// instance fields for instances, elements for object arrays. Null
    /// references are skipped. Order matches the wire order of the fields.
    pub fn outgoing(&self, obj_ref: ObjRef) -> Vec<ObjRef> {
        let obj = &self.objects[obj_ref.index()];
        // resolution validated every edge, so lookups cannot miss here
        match raw_outgoing_ids(&self.objects, &self.index, obj, self.id_size) {
            Ok(ids) => ids
                .iter()
                .filter_map(|id| self.index.get(id).copied())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Objects holding a reference to `obj_ref`. Gc roots do not appear;
    /// see [Snapshot::gc_roots].
    pub fn inbound(&self, obj_ref: ObjRef) -> &[ObjRef] {
        &self.inbound[obj_ref.index()]
    }

    /// The class of an instance or object array, `None` for class objects
    /// and primitive arrays.
    pub fn class_of(&self, obj_ref: ObjRef) -> Option<&ClassObj<'a>> {
        self.objects[obj_ref.index()]
            .class_id()
            .and_then(|id| self.find_class(id))
    }

    /// Instances of exactly the given class (no subclass widening).
    pub fn instances_of(&self, class_ref: ObjRef) -> &[ObjRef] {
        self.objects[class_ref.index()]
            .as_class()
            .map(|c| c.instances())
            .unwrap_or(&[])
    }

    /// Decoded instance fields as (name, value) pairs, the instance's own
    /// class first, then superclasses. Empty for classes and arrays.
    pub fn field_values(&self, obj_ref: ObjRef) -> Result<Vec<(Option<&str>, FieldValue)>> {
        let instance = match self.objects[obj_ref.index()].as_instance() {
            Some(i) => i,
            None => return Ok(Vec::new()),
        };

        let mut out = Vec::new();
        let mut remaining = instance.fields();
        let mut next_class = Some(instance.class_id());
        while let Some(class_id) = next_class {
            let class = match self.find_class(class_id) {
                Some(c) => c,
                None => {
                    return Err(HprofError::MissingClass {
                        class_id,
                        obj_id: instance.id(),
                    })
                }
            };
            for desc in class.instance_field_descriptors() {
                let (rest, value) = FieldValue::parse(remaining, self.id_size, desc.field_type())
                    .map_err(|_| HprofError::FieldBytesExhausted {
                        obj_id: instance.id(),
                    })?;
                remaining = rest;
                out.push((self.string(desc.name_id()), value));
            }
            next_class = class.super_class_id();
        }

        Ok(out)
    }

    /// Human readable label: `class com.foo.Bar`, `com.foo.Bar@0x12A`,
    /// `int[40]@0x200`.
    pub fn obj_label(&self, obj_ref: ObjRef) -> String {
        match &self.objects[obj_ref.index()] {
            Obj::Class(c) => format!("class {}", c.name()),
            Obj::Instance(i) => {
                let name = self
                    .find_class(i.class_id())
                    .map(|c| c.name())
                    .unwrap_or("<unknown>");
                format!("{}@0x{:X}", name, i.id())
            }
            Obj::Array(a) => match a.data() {
                ArrayData::Objects(elements) => {
                    let name = a
                        .class_id()
                        .and_then(|id| self.find_class(id))
                        .map(|c| c.name())
                        .unwrap_or("<unknown>");
                    format!("{}[{}]@0x{:X}", name, elements.len(), a.id())
                }
                ArrayData::Primitive {
                    elem_type,
                    num_elements,
                    ..
                } => format!(
                    "{}[{}]@0x{:X}",
                    elem_type.java_type_name(),
                    num_elements,
                    a.id()
                ),
            },
        }
    }

    /// One aggregate row per class object.
    pub fn class_stats(&self) -> Vec<ClassStats<'_>> {
        self.classes()
            .map(|(r, class)| {
                let shallow_total = class
                    .instances()
                    .iter()
                    .map(|inst| self.objects[inst.index()].shallow_size())
                    .sum();
                ClassStats {
                    class: r,
                    name: class.name(),
                    instance_count: class.instances().len(),
                    shallow_total,
                    retained_total: self
                        .dominators
                        .as_ref()
                        .map(|d| d.class_retained(class.id())),
                }
            })
            .collect()
    }

    /// Compute the dominator tree and retained sizes. Idempotent; later
    /// calls are free.
    pub fn compute_dominators(&mut self) {
        if self.dominators.is_none() {
            let info = DominatorInfo::build(self);
            self.dominators = Some(info);
        }
    }

    pub fn dominators(&self) -> Option<&DominatorInfo> {
        self.dominators.as_ref()
    }

    /// Arena handles of all root referents, in root order, duplicates
    /// included.
    pub(crate) fn root_referent_refs(&self) -> Vec<ObjRef> {
        self.gc_roots()
            .iter()
            .filter_map(|root| root.referent())
            .filter_map(|id| self.find_obj(id))
            .collect()
    }
}

fn decode<'a>(hprof: &Hprof<'a>) -> Result<Decoded<'a>> {
    let id_size = hprof.header().id_size();

    let mut strings = HashMap::new();
    let mut load_classes = HashMap::new();
    let mut stack_frames = HashMap::new();
    let mut stack_traces = HashMap::new();

    let mut heap_seeds = vec![HeapSeed {
        id: 0,
        name_id: None,
    }];
    let mut heap_indexes: HashMap<u32, usize> = HashMap::new();
    heap_indexes.insert(0, 0);
    let mut current_heap = 0usize;

    let mut wire: Vec<WireObj<'a>> = Vec::new();
    let mut slots: HashMap<Id, usize> = HashMap::new();
    let mut roots: Vec<GcRoot> = Vec::new();

    let mut records = hprof.records_iter();
    loop {
        let record = match records.next() {
            Some(res) => res?,
            None => break,
        };

        let body_err = |_: nom::Err<nom::error::Error<&[u8]>>| HprofError::Truncated {
            offset: record.body_offset(),
            tag: record.tag_byte(),
        };

        if let Some(res) = record.as_utf_8() {
            let utf8 = res.map_err(body_err)?;
            strings.insert(utf8.name_id(), utf8.text_lossy());
        } else if let Some(res) = record.as_load_class() {
            let load_class = res.map_err(body_err)?;
            load_classes.insert(load_class.class_obj_id(), load_class);
        } else if let Some(res) = record.as_stack_frame() {
            let frame = res.map_err(body_err)?;
            stack_frames.insert(frame.id(), frame);
        } else if let Some(res) = record.as_stack_trace() {
            let trace = res.map_err(body_err)?;
            stack_traces.insert(trace.stack_trace_serial(), trace);
        } else if let Some(segment) = record.as_heap_dump_segment() {
            let mut sub_records = segment.sub_records();
            loop {
                let sub_offset = sub_records.offset();
                let sub = match sub_records.next() {
                    Some(res) => res?,
                    None => break,
                };
                match sub {
                    SubRecord::GcRoot(root) => roots.push(root),
                    SubRecord::HeapDumpInfo(info) => {
                        current_heap = match heap_indexes.entry(info.heap_id()) {
                            Entry::Occupied(e) => {
                                let idx = *e.get();
                                // repeated info for a heap renames it
                                heap_seeds[idx].name_id = Some(info.heap_name_id());
                                idx
                            }
                            Entry::Vacant(e) => {
                                let idx = heap_seeds.len();
                                e.insert(idx);
                                heap_seeds.push(HeapSeed {
                                    id: info.heap_id(),
                                    name_id: Some(info.heap_name_id()),
                                });
                                idx
                            }
                        };
                    }
                    SubRecord::Class(c) => upsert(
                        &mut wire,
                        &mut slots,
                        WireObj {
                            heap_index: current_heap,
                            offset: sub_offset,
                            kind: WireKind::Class(c),
                        },
                    ),
                    SubRecord::Instance(i) => upsert(
                        &mut wire,
                        &mut slots,
                        WireObj {
                            heap_index: current_heap,
                            offset: sub_offset,
                            kind: WireKind::Instance(i),
                        },
                    ),
                    SubRecord::ObjectArray(a) => upsert(
                        &mut wire,
                        &mut slots,
                        WireObj {
                            heap_index: current_heap,
                            offset: sub_offset,
                            kind: WireKind::ObjectArray(a),
                        },
                    ),
                    SubRecord::PrimitiveArray(p) => upsert(
                        &mut wire,
                        &mut slots,
                        WireObj {
                            heap_index: current_heap,
                            offset: sub_offset,
                            kind: WireKind::PrimitiveArray(p),
                        },
                    ),
                }
            }
        } else {
            debug!(
                "skipping record tag {:#04x} at offset {:#x}",
                record.tag_byte(),
                record.offset()
            );
        }
    }

    Ok(Decoded {
        id_size,
        strings,
        load_classes,
        stack_frames,
        stack_traces,
        heap_seeds,
        wire,
        slots,
        roots,
    })
}

/// Objects are deduplicated by id as they stream in: a later dump of the
/// same id replaces the earlier one in place, keeping stream order.
fn upsert<'a>(wire: &mut Vec<WireObj<'a>>, slots: &mut HashMap<Id, usize>, obj: WireObj<'a>) {
    match slots.entry(obj.obj_id()) {
        Entry::Occupied(e) => wire[*e.get()] = obj,
        Entry::Vacant(e) => {
            e.insert(wire.len());
            wire.push(obj);
        }
    }
}

fn resolve(decoded: Decoded<'_>) -> Result<Snapshot<'_>> {
    let Decoded {
        id_size,
        strings,
        load_classes,
        stack_frames,
        stack_traces,
        heap_seeds,
        wire,
        slots,
        roots,
    } = decoded;

    let mut heaps: Vec<Heap> = heap_seeds
        .iter()
        .map(|seed| {
            let name = match seed.name_id {
                None => DEFAULT_HEAP_NAME.to_owned(),
                Some(name_id) => strings
                    .get(&name_id)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("heap-{}", seed.id)),
            };
            Heap::new(seed.id, name)
        })
        .collect();

    let index: HashMap<Id, ObjRef> = slots
        .iter()
        .map(|(&id, &slot)| (id, ObjRef(slot as u32)))
        .collect();

    // materialize the arena in stream order
    let mut objects: Vec<Obj<'_>> = Vec::with_capacity(wire.len());
    for w in &wire {
        let obj = match &w.kind {
            WireKind::Class(c) => {
                let name = class_name(&strings, &load_classes, c.obj_id());
                let static_fields = c
                    .static_fields()
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|_| HprofError::Truncated {
                        offset: w.offset,
                        tag: 0x20,
                    })?;
                let instance_field_descriptors = c
                    .instance_field_descriptors()
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|_| HprofError::Truncated {
                        offset: w.offset,
                        tag: 0x20,
                    })?;
                Obj::Class(ClassObj {
                    id: c.obj_id(),
                    heap_index: w.heap_index,
                    stack_trace_serial: c.stack_trace_serial(),
                    name,
                    super_class_id: c.super_class_obj_id(),
                    class_loader_id: non_null(c.class_loader_obj_id()),
                    instance_size_bytes: c.instance_size_bytes(),
                    static_fields,
                    instance_field_descriptors,
                    shallow_size: 0,
                    subclasses: Vec::new(),
                    instances: Vec::new(),
                })
            }
            WireKind::Instance(i) => Obj::Instance(ClassInstance {
                id: i.obj_id(),
                heap_index: w.heap_index,
                stack_trace_serial: i.stack_trace_serial(),
                class_id: i.class_obj_id(),
                fields: i.fields(),
                shallow_size: 0,
            }),
            WireKind::ObjectArray(a) => {
                let mut elements = Vec::with_capacity(a.num_elements() as usize);
                for element in a.elements() {
                    let element = element.map_err(|_| HprofError::Truncated {
                        offset: w.offset,
                        tag: 0x22,
                    })?;
                    elements.push(non_null(element));
                }
                Obj::Array(ArrayInstance {
                    id: a.obj_id(),
                    heap_index: w.heap_index,
                    stack_trace_serial: a.stack_trace_serial(),
                    class_id: non_null(a.array_class_obj_id()),
                    data: ArrayData::Objects(elements),
                    shallow_size: object_array_shallow_size(a.num_elements(), id_size),
                })
            }
            WireKind::PrimitiveArray(p) => Obj::Array(ArrayInstance {
                id: p.obj_id(),
                heap_index: w.heap_index,
                stack_trace_serial: p.stack_trace_serial(),
                class_id: None,
                data: ArrayData::Primitive {
                    elem_type: p.elem_type(),
                    num_elements: p.num_elements(),
                    contents: p.contents(),
                },
                shallow_size: primitive_array_shallow_size(p.num_elements(), p.elem_type()),
            }),
        };
        objects.push(obj);
    }

    // shallow sizes: instances take their class's declared size, class
    // objects take java.lang.Class's declared size (0 if it never loaded)
    let class_obj_shallow = objects
        .iter()
        .find_map(|o| o.as_class().filter(|c| c.name() == JAVA_LANG_CLASS))
        .map(|c| u64::from(c.instance_size_bytes()))
        .unwrap_or(0);

    let mut shallow_sizes = Vec::with_capacity(objects.len());
    for obj in &objects {
        let size = match obj {
            Obj::Class(_) => class_obj_shallow,
            Obj::Instance(i) => {
                match index
                    .get(&i.class_id())
                    .and_then(|r| objects[r.index()].as_class())
                {
                    Some(class) => u64::from(class.instance_size_bytes()),
                    None => {
                        return Err(HprofError::MissingClass {
                            class_id: i.class_id(),
                            obj_id: i.id(),
                        })
                    }
                }
            }
            Obj::Array(a) => a.shallow_size(),
        };
        shallow_sizes.push(size);
    }
    for (obj, size) in objects.iter_mut().zip(shallow_sizes) {
        match obj {
            Obj::Class(c) => c.shallow_size = size,
            Obj::Instance(i) => i.shallow_size = size,
            Obj::Array(a) => a.shallow_size = size,
        }
    }

    // superclass links, both directions
    let mut subclass_links: Vec<(ObjRef, ObjRef)> = Vec::new();
    for (i, obj) in objects.iter().enumerate() {
        if let Obj::Class(class) = obj {
            if let Some(super_id) = class.super_class_id() {
                let super_ref = index
                    .get(&super_id)
                    .filter(|r| objects[r.index()].as_class().is_some());
                match super_ref {
                    Some(&super_ref) => subclass_links.push((super_ref, ObjRef(i as u32))),
                    None => {
                        return Err(HprofError::DanglingReference {
                            id: super_id,
                            referrer: class.id(),
                        })
                    }
                }
            }
        }
    }
    for (super_ref, sub_ref) in subclass_links {
        if let Obj::Class(class) = &mut objects[super_ref.index()] {
            class.subclasses.push(sub_ref);
        }
    }

    // heap and class membership
    let mut class_members: Vec<(ObjRef, ObjRef)> = Vec::new();
    for (i, obj) in objects.iter().enumerate() {
        let obj_ref = ObjRef(i as u32);
        match obj {
            Obj::Class(class) => {
                let heap = &mut heaps[class.heap_index()];
                heap.classes_by_id.insert(class.id(), obj_ref);
                heap.classes_by_name
                    .entry(class.name().to_owned())
                    .or_default()
                    .push(obj_ref);
            }
            Obj::Instance(instance) => {
                heaps[instance.heap_index()].instances.push(obj_ref);
                if let Some(&class_ref) = index.get(&instance.class_id()) {
                    class_members.push((class_ref, obj_ref));
                }
            }
            Obj::Array(array) => {
                heaps[array.heap_index()].instances.push(obj_ref);
                if let Some(class_id) = array.class_id() {
                    let class_ref = index
                        .get(&class_id)
                        .filter(|r| objects[r.index()].as_class().is_some());
                    match class_ref {
                        Some(&class_ref) => class_members.push((class_ref, obj_ref)),
                        None => {
                            return Err(HprofError::MissingClass {
                                class_id,
                                obj_id: array.id(),
                            })
                        }
                    }
                }
            }
        }
    }
    for (class_ref, member) in class_members {
        if let Obj::Class(class) = &mut objects[class_ref.index()] {
            class.instances.push(member);
        }
    }

    // roots and threads, all on the default heap
    let mut root_objs = Vec::with_capacity(roots.len());
    let mut threads: HashMap<Serial, ThreadObj> = HashMap::new();
    for root in &roots {
        let referent = non_null(root.obj_id());
        if let Some(id) = referent {
            if !index.contains_key(&id) {
                return Err(HprofError::DanglingRoot { id });
            }
        }
        if root.kind() == RootKind::ThreadObject {
            if let (Some(thread_serial), Some(stack_trace_serial)) =
                (root.thread_serial(), root.stack_trace_serial())
            {
                threads.insert(
                    thread_serial,
                    ThreadObj {
                        obj_id: referent,
                        thread_serial,
                        stack_trace_serial,
                    },
                );
            }
        }
        root_objs.push(RootObj {
            kind: root.kind(),
            referent,
            thread_serial: root.thread_serial(),
            frame_index: root.frame_index(),
        });
    }
    heaps[0].roots = root_objs;
    heaps[0].threads = threads;

    // validate every stored reference while building the reverse edges
    let mut inbound: Vec<Vec<ObjRef>> = vec![Vec::new(); objects.len()];
    for (i, obj) in objects.iter().enumerate() {
        let referrer = ObjRef(i as u32);
        for target_id in raw_outgoing_ids(&objects, &index, obj, id_size)? {
            match index.get(&target_id) {
                Some(target) => inbound[target.index()].push(referrer),
                None => {
                    return Err(HprofError::DanglingReference {
                        id: target_id,
                        referrer: obj.id(),
                    })
                }
            }
        }
    }

    debug!(
        "resolved {} objects into {} heaps ({} roots, {} edges)",
        objects.len(),
        heaps.len(),
        heaps[0].roots.len(),
        inbound.iter().map(Vec::len).sum::<usize>(),
    );

    Ok(Snapshot {
        id_size,
        heaps,
        objects,
        index,
        strings,
        load_classes,
        stack_frames,
        stack_traces,
        inbound,
        dominators: None,
    })
}

fn class_name<'a>(
    strings: &HashMap<Id, Cow<'a, str>>,
    load_classes: &HashMap<Id, LoadClass>,
    class_obj_id: Id,
) -> Cow<'a, str> {
    load_classes
        .get(&class_obj_id)
        .and_then(|lc| strings.get(&lc.class_name_id()))
        .map(|name| normalize_class_name(name.clone()))
        .unwrap_or_else(|| Cow::Owned(format!("unknown class 0x{:X}", class_obj_id)))
}

/// JVM dumps record binary names (`java/lang/String`); the Android runtime
/// records dotted ones. Normalizing to dots keeps name lookups uniform.
fn normalize_class_name(name: Cow<'_, str>) -> Cow<'_, str> {
    if name.contains('/') {
        Cow::Owned(name.replace('/', "."))
    } else {
        name
    }
}

/// Raw outgoing reference ids of one object, nulls dropped, wire order
/// kept. Instance fields are decoded against the class hierarchy, so this
/// can fail on an inconsistent graph; after resolution it no longer can.
fn raw_outgoing_ids<'a>(
    objects: &[Obj<'a>],
    index: &HashMap<Id, ObjRef>,
    obj: &Obj<'a>,
    id_size: IdSize,
) -> Result<Vec<Id>> {
    match obj {
        Obj::Class(class) => Ok(class
            .static_fields()
            .iter()
            .filter_map(|entry| entry.value().as_obj_id())
            .collect()),
        Obj::Instance(instance) => instance_field_ids(objects, index, instance, id_size),
        Obj::Array(array) => match array.data() {
            ArrayData::Objects(elements) => Ok(elements.iter().copied().flatten().collect()),
            ArrayData::Primitive { .. } => Ok(Vec::new()),
        },
    }
}

fn instance_field_ids<'a>(
    objects: &[Obj<'a>],
    index: &HashMap<Id, ObjRef>,
    instance: &ClassInstance<'a>,
    id_size: IdSize,
) -> Result<Vec<Id>> {
    let mut ids = Vec::new();
    let mut remaining = instance.fields();
    let mut next_class = Some(instance.class_id());
    while let Some(class_id) = next_class {
        let class = match index
            .get(&class_id)
            .and_then(|r| objects[r.index()].as_class())
        {
            Some(c) => c,
            None => {
                return Err(HprofError::MissingClass {
                    class_id,
                    obj_id: instance.id(),
                })
            }
        };
        for desc in class.instance_field_descriptors() {
            let (rest, value) = FieldValue::parse(remaining, id_size, desc.field_type()).map_err(
                |_| HprofError::FieldBytesExhausted {
                    obj_id: instance.id(),
                },
            )?;
            remaining = rest;
            if let Some(target) = value.as_obj_id() {
                ids.push(target);
            }
        }
        next_class = class.super_class_id();
    }
    Ok(ids)
}
