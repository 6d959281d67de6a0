use std::borrow::Cow;

use getset::CopyGetters;

use crate::heap_dump::{FieldDescriptor, PrimitiveArrayType, StaticFieldEntry};
use crate::{Id, IdSize, Serial};

/// Arena handle for an object in a [`crate::Snapshot`].
///
/// Cheap to copy and valid for the lifetime of the snapshot that issued it.
/// Traversal bookkeeping (bit sets, dominator tables) indexes by
/// [`ObjRef::index`] instead of hashing 64-bit ids.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ObjRef(pub(crate) u32);

impl ObjRef {
    /// Position in the snapshot's object arena.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// A materialized heap object: a class, an instance, or an array.
///
/// Sub-record payloads (packed field bytes, array contents) stay borrowed
/// from the dump buffer; only resolved metadata (names, sizes, hierarchy
/// links) is owned.
pub enum Obj<'a> {
    Class(ClassObj<'a>),
    Instance(ClassInstance<'a>),
    Array(ArrayInstance<'a>),
}

impl<'a> Obj<'a> {
    pub fn id(&self) -> Id {
        match self {
            Obj::Class(c) => c.id,
            Obj::Instance(i) => i.id,
            Obj::Array(a) => a.id,
        }
    }

    /// Index of the owning heap in [`crate::Snapshot::heaps`].
    pub fn heap_index(&self) -> usize {
        match self {
            Obj::Class(c) => c.heap_index,
            Obj::Instance(i) => i.heap_index,
            Obj::Array(a) => a.heap_index,
        }
    }

    /// Defining class id. `None` for class objects (their type is the VM's
    /// meta class, which is not modeled as an edge) and for primitive arrays
    /// in dumps that never loaded a class for them.
    pub fn class_id(&self) -> Option<Id> {
        match self {
            Obj::Class(_) => None,
            Obj::Instance(i) => Some(i.class_id),
            Obj::Array(a) => a.class_id,
        }
    }

    pub fn stack_trace_serial(&self) -> Serial {
        match self {
            Obj::Class(c) => c.stack_trace_serial,
            Obj::Instance(i) => i.stack_trace_serial,
            Obj::Array(a) => a.stack_trace_serial,
        }
    }

    /// Bytes directly attributable to this object, excluding anything it
    /// references.
    pub fn shallow_size(&self) -> u64 {
        match self {
            Obj::Class(c) => c.shallow_size,
            Obj::Instance(i) => i.shallow_size,
            Obj::Array(a) => a.shallow_size,
        }
    }

    pub fn as_class(&self) -> Option<&ClassObj<'a>> {
        match self {
            Obj::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&ClassInstance<'a>> {
        match self {
            Obj::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayInstance<'a>> {
        match self {
            Obj::Array(a) => Some(a),
            _ => None,
        }
    }
}

/// A loaded class, including its static fields and the field layout its
/// instances follow.
#[derive(CopyGetters, Clone)]
pub struct ClassObj<'a> {
    #[get_copy = "pub"]
    pub(crate) id: Id,
    #[get_copy = "pub"]
    pub(crate) heap_index: usize,
    #[get_copy = "pub"]
    pub(crate) stack_trace_serial: Serial,
    pub(crate) name: Cow<'a, str>,
    #[get_copy = "pub"]
    pub(crate) super_class_id: Option<Id>,
    #[get_copy = "pub"]
    pub(crate) class_loader_id: Option<Id>,
    /// Declared size of one instance's packed field data, in bytes.
    #[get_copy = "pub"]
    pub(crate) instance_size_bytes: u32,
    pub(crate) static_fields: Vec<StaticFieldEntry>,
    pub(crate) instance_field_descriptors: Vec<FieldDescriptor>,
    /// Size of the class object itself (per the `java.lang.Class` layout),
    /// not of its instances.
    #[get_copy = "pub"]
    pub(crate) shallow_size: u64,
    pub(crate) subclasses: Vec<ObjRef>,
    pub(crate) instances: Vec<ObjRef>,
}

impl<'a> ClassObj<'a> {
    /// Binary name with `/` separators normalized to `.`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn static_fields(&self) -> &[StaticFieldEntry] {
        &self.static_fields
    }

    /// Fields declared by this class only. An instance's full layout is
    /// these descriptors followed by each superclass's, walking up.
    pub fn instance_field_descriptors(&self) -> &[FieldDescriptor] {
        &self.instance_field_descriptors
    }

    /// Direct subclasses present in the dump.
    pub fn subclasses(&self) -> &[ObjRef] {
        &self.subclasses
    }

    /// Every instance of exactly this class, across all heaps.
    pub fn instances(&self) -> &[ObjRef] {
        &self.instances
    }
}

/// A plain (non-array) object. Field values stay packed in the dump's wire
/// encoding; [`crate::Snapshot::field_values`] decodes them against the
/// class hierarchy's descriptors.
#[derive(CopyGetters, Copy, Clone)]
pub struct ClassInstance<'a> {
    #[get_copy = "pub"]
    pub(crate) id: Id,
    #[get_copy = "pub"]
    pub(crate) heap_index: usize,
    #[get_copy = "pub"]
    pub(crate) stack_trace_serial: Serial,
    #[get_copy = "pub"]
    pub(crate) class_id: Id,
    pub(crate) fields: &'a [u8],
    #[get_copy = "pub"]
    pub(crate) shallow_size: u64,
}

impl<'a> ClassInstance<'a> {
    /// Packed field data, declaring class first, then superclasses.
    pub fn fields(&self) -> &'a [u8] {
        self.fields
    }
}

/// An object or primitive array.
#[derive(CopyGetters, Clone)]
pub struct ArrayInstance<'a> {
    #[get_copy = "pub"]
    pub(crate) id: Id,
    #[get_copy = "pub"]
    pub(crate) heap_index: usize,
    #[get_copy = "pub"]
    pub(crate) stack_trace_serial: Serial,
    /// Array class for object arrays. Primitive arrays carry no class id on
    /// the wire, so this is `None` for them.
    #[get_copy = "pub"]
    pub(crate) class_id: Option<Id>,
    pub(crate) data: ArrayData<'a>,
    #[get_copy = "pub"]
    pub(crate) shallow_size: u64,
}

impl<'a> ArrayInstance<'a> {
    pub fn data(&self) -> &ArrayData<'a> {
        &self.data
    }

    pub fn element_count(&self) -> u32 {
        match &self.data {
            ArrayData::Objects(ids) => ids.len() as u32,
            ArrayData::Primitive { num_elements, .. } => *num_elements,
        }
    }
}

/// Array payload. Object element ids are materialized (null entries kept,
/// so indices line up with the wire order); primitive contents stay as raw
/// big-endian bytes.
#[derive(Clone)]
pub enum ArrayData<'a> {
    Objects(Vec<Option<Id>>),
    Primitive {
        elem_type: PrimitiveArrayType,
        num_elements: u32,
        contents: &'a [u8],
    },
}

pub(crate) fn object_array_shallow_size(num_elements: u32, id_size: IdSize) -> u64 {
    u64::from(num_elements) * id_size.size_in_bytes() as u64
}

pub(crate) fn primitive_array_shallow_size(
    num_elements: u32,
    elem_type: PrimitiveArrayType,
) -> u64 {
    u64::from(num_elements) * elem_type.size_in_bytes() as u64
}
