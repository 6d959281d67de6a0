//! Sub-records found inside heap dump segments.
//!
//! Unlike top level records, sub-records carry no length prefix, so each one
//! must be decoded far enough to find where the next begins. Field data is
//! still kept as raw slices and only decoded on demand.

use crate::*;

pub mod primitive_array;

pub use primitive_array::{PrimitiveArray, PrimitiveArrayType};

/// A single sub-record inside a heap dump segment.
pub enum SubRecord<'a> {
    GcRoot(GcRoot),
    /// Android dialect: switches the heap that subsequent objects belong to.
    HeapDumpInfo(HeapDumpInfo),
    Class(Class<'a>),
    Instance(Instance<'a>),
    ObjectArray(ObjectArray<'a>),
    PrimitiveArray(PrimitiveArray<'a>),
}

impl<'a> SubRecord<'a> {
    /// Parse one sub-record. `offset` is the absolute byte offset of the tag byte
    /// and is used for error context only.
    pub(crate) fn parse(
        input: &'a [u8],
        id_size: IdSize,
        offset: usize,
    ) -> Result<(&'a [u8], SubRecord<'a>)> {
        let (tag, rest) = match input.split_first() {
            Some((tag, rest)) => (*tag, rest),
            None => return Err(HprofError::Truncated { offset, tag: 0 }),
        };

        let trunc = |_: nom::Err<nom::error::Error<&[u8]>>| HprofError::Truncated { offset, tag };

        let (rest, sub_record) = match tag {
            0x20 => {
                let (rest, class) = Class::parse(rest, id_size, offset)?;
                (rest, SubRecord::Class(class))
            }
            0x21 => {
                let (rest, instance) = Instance::parse(rest, id_size).map_err(trunc)?;
                (rest, SubRecord::Instance(instance))
            }
            0x22 => {
                let (rest, array) = ObjectArray::parse(rest, id_size).map_err(trunc)?;
                (rest, SubRecord::ObjectArray(array))
            }
            0x23 => {
                let (rest, array) = PrimitiveArray::parse(rest, id_size, offset)?;
                (rest, SubRecord::PrimitiveArray(array))
            }
            0xFE => {
                let (rest, info) = HeapDumpInfo::parse(rest, id_size).map_err(trunc)?;
                (rest, SubRecord::HeapDumpInfo(info))
            }
            // primitive array with its contents elided; the elements are gone, so
            // nothing downstream could be trusted
            0xC3 => return Err(HprofError::UnsupportedSubRecord { offset, tag }),
            _ => match RootKind::from_tag_byte(tag) {
                Some(kind) => {
                    let (rest, root) = GcRoot::parse(rest, id_size, kind).map_err(trunc)?;
                    (rest, SubRecord::GcRoot(root))
                }
                None => return Err(HprofError::UnknownSubRecord { offset, tag }),
            },
        };

        Ok((rest, sub_record))
    }
}

/// The flavor of gc root, as tagged in the dump.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, strum_macros::EnumIter)]
pub enum RootKind {
    Unknown,
    JniGlobal,
    JniLocal,
    JavaFrame,
    NativeStack,
    StickyClass,
    ThreadBlock,
    BusyMonitor,
    ThreadObject,
    InternedString,
    Finalizing,
    Debugger,
    ReferenceCleanup,
    VmInternal,
    JniMonitor,
    Unreachable,
}

impl RootKind {
    pub fn from_tag_byte(tag: u8) -> Option<RootKind> {
        match tag {
            0xFF => Some(RootKind::Unknown),
            0x01 => Some(RootKind::JniGlobal),
            0x02 => Some(RootKind::JniLocal),
            0x03 => Some(RootKind::JavaFrame),
            0x04 => Some(RootKind::NativeStack),
            0x05 => Some(RootKind::StickyClass),
            0x06 => Some(RootKind::ThreadBlock),
            0x07 => Some(RootKind::BusyMonitor),
            0x08 => Some(RootKind::ThreadObject),
            0x89 => Some(RootKind::InternedString),
            0x8A => Some(RootKind::Finalizing),
            0x8B => Some(RootKind::Debugger),
            0x8C => Some(RootKind::ReferenceCleanup),
            0x8D => Some(RootKind::VmInternal),
            0x8E => Some(RootKind::JniMonitor),
            0x90 => Some(RootKind::Unreachable),
            _ => None,
        }
    }

    pub fn tag_byte(&self) -> u8 {
        match self {
            RootKind::Unknown => 0xFF,
            RootKind::JniGlobal => 0x01,
            RootKind::JniLocal => 0x02,
            RootKind::JavaFrame => 0x03,
            RootKind::NativeStack => 0x04,
            RootKind::StickyClass => 0x05,
            RootKind::ThreadBlock => 0x06,
            RootKind::BusyMonitor => 0x07,
            RootKind::ThreadObject => 0x08,
            RootKind::InternedString => 0x89,
            RootKind::Finalizing => 0x8A,
            RootKind::Debugger => 0x8B,
            RootKind::ReferenceCleanup => 0x8C,
            RootKind::VmInternal => 0x8D,
            RootKind::JniMonitor => 0x8E,
            RootKind::Unreachable => 0x90,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RootKind::Unknown => "unknown",
            RootKind::JniGlobal => "jni global",
            RootKind::JniLocal => "jni local",
            RootKind::JavaFrame => "java frame",
            RootKind::NativeStack => "native stack",
            RootKind::StickyClass => "sticky class",
            RootKind::ThreadBlock => "thread block",
            RootKind::BusyMonitor => "busy monitor",
            RootKind::ThreadObject => "thread object",
            RootKind::InternedString => "interned string",
            RootKind::Finalizing => "finalizing",
            RootKind::Debugger => "debugger",
            RootKind::ReferenceCleanup => "reference cleanup",
            RootKind::VmInternal => "vm internal",
            RootKind::JniMonitor => "jni monitor",
            RootKind::Unreachable => "unreachable",
        }
    }
}

/// A gc root entry.
///
/// The per-kind payloads share one shape here: thread context fields are `None`
/// for kinds whose payload does not carry them.
#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct GcRoot {
    #[get_copy = "pub"]
    kind: RootKind,
    /// May be the null id, e.g. for a thread that has no java object.
    #[get_copy = "pub"]
    obj_id: Id,
    #[get_copy = "pub"]
    thread_serial: Option<Serial>,
    /// Frame number in the owning thread's stack trace. The dump writes -1 when
    /// there is none, which maps to `None`. For [RootKind::JniMonitor] this is
    /// the stack depth.
    #[get_copy = "pub"]
    frame_index: Option<u32>,
    #[get_copy = "pub"]
    stack_trace_serial: Option<Serial>,
}

impl GcRoot {
    fn parse(input: &[u8], id_size: IdSize, kind: RootKind) -> nom::IResult<&[u8], GcRoot> {
        let (input, obj_id) = Id::parse_element(input, id_size)?;

        let mut root = GcRoot {
            kind,
            obj_id,
            thread_serial: None,
            frame_index: None,
            stack_trace_serial: None,
        };

        let input = match kind {
            RootKind::JniGlobal => {
                // trailing jni global ref id; nothing downstream uses it
                let (input, _jni_global_ref_id) = Id::parse_element(input, id_size)?;
                input
            }
            RootKind::JniLocal | RootKind::JavaFrame | RootKind::JniMonitor => {
                let (input, thread_serial) = number::be_u32(input)?;
                let (input, frame) = number::be_u32(input)?;
                root.thread_serial = Some(thread_serial);
                root.frame_index = if frame == u32::MAX { None } else { Some(frame) };
                input
            }
            RootKind::NativeStack | RootKind::ThreadBlock => {
                let (input, thread_serial) = number::be_u32(input)?;
                root.thread_serial = Some(thread_serial);
                input
            }
            RootKind::ThreadObject => {
                let (input, thread_serial) = number::be_u32(input)?;
                let (input, stack_trace_serial) = number::be_u32(input)?;
                root.thread_serial = Some(thread_serial);
                root.stack_trace_serial = Some(stack_trace_serial);
                input
            }
            _ => input,
        };

        Ok((input, root))
    }
}

/// Android dialect marker that assigns subsequent objects to a named heap.
#[derive(CopyGetters, Copy, Clone, Debug)]
#[get_copy = "pub"]
pub struct HeapDumpInfo {
    heap_id: u32,
    /// Id of a Utf8 record with the heap name, e.g. `app` or `zygote`
    heap_name_id: Id,
}

impl HeapDumpInfo {
    fn parse(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], HeapDumpInfo> {
        let (input, heap_id) = number::be_u32(input)?;
        let (input, heap_name_id) = Id::parse_element(input, id_size)?;

        Ok((
            input,
            HeapDumpInfo {
                heap_id,
                heap_name_id,
            },
        ))
    }
}

/// A class structure dump.
///
/// Static field values and instance field descriptors are kept as raw slices;
/// [Class::static_fields] and [Class::instance_field_descriptors] decode them.
#[derive(CopyGetters, Copy, Clone)]
pub struct Class<'a> {
    #[get_copy = "pub"]
    obj_id: Id,
    #[get_copy = "pub"]
    stack_trace_serial: Serial,
    /// `None` for java.lang.Object and primitive classes
    #[get_copy = "pub"]
    super_class_obj_id: Option<Id>,
    #[get_copy = "pub"]
    class_loader_obj_id: Id,
    #[get_copy = "pub"]
    signers_obj_id: Id,
    #[get_copy = "pub"]
    protection_domain_obj_id: Id,
    /// Declared size of one instance, not counting object headers
    #[get_copy = "pub"]
    instance_size_bytes: u32,
    id_size: IdSize,
    num_static_fields: u16,
    static_fields: &'a [u8],
    num_instance_fields: u16,
    instance_fields: &'a [u8],
}

impl<'a> Class<'a> {
    pub fn static_fields(&self) -> StaticFieldEntries<'a> {
        StaticFieldEntries {
            iter: CountedIter::new(self.id_size, self.static_fields, self.num_static_fields as u32),
        }
    }

    /// Descriptors for the fields declared directly by this class, in the order
    /// their values appear in instance field data. Superclass fields follow in
    /// the superclass's own dump.
    pub fn instance_field_descriptors(&self) -> FieldDescriptors<'a> {
        FieldDescriptors {
            iter: CountedIter::new(
                self.id_size,
                self.instance_fields,
                self.num_instance_fields as u32,
            ),
        }
    }

    pub(crate) fn parse(
        input: &'a [u8],
        id_size: IdSize,
        offset: usize,
    ) -> Result<(&'a [u8], Class<'a>)> {
        let trunc =
            |_: nom::Err<nom::error::Error<&[u8]>>| HprofError::Truncated { offset, tag: 0x20 };

        let (input, obj_id) = Id::parse_element(input, id_size).map_err(trunc)?;
        let (input, stack_trace_serial) = number::be_u32(input).map_err(trunc)?;
        let (input, super_class_obj_id) = Id::parse_element(input, id_size).map_err(trunc)?;
        let (input, class_loader_obj_id) = Id::parse_element(input, id_size).map_err(trunc)?;
        let (input, signers_obj_id) = Id::parse_element(input, id_size).map_err(trunc)?;
        let (input, protection_domain_obj_id) = Id::parse_element(input, id_size).map_err(trunc)?;
        let (input, _reserved_1) = Id::parse_element(input, id_size).map_err(trunc)?;
        let (input, _reserved_2) = Id::parse_element(input, id_size).map_err(trunc)?;
        let (input, instance_size_bytes) = number::be_u32(input).map_err(trunc)?;

        // constant pool entries are skipped; nothing emits useful ones
        let (input, num_constant_pool) = number::be_u16(input).map_err(trunc)?;
        let mut rest = input;
        for _ in 0..num_constant_pool {
            let (r, _pool_index) = number::be_u16(rest).map_err(trunc)?;
            let (r, field_type) = parse_field_type(r, offset, 0x20)?;
            let (r, _value) = bytes::take(field_type.size_in_bytes(id_size))(r).map_err(trunc)?;
            rest = r;
        }

        // static fields are walked to find their extent; the type byte of each
        // entry determines its value width
        let (input, num_static_fields) = number::be_u16(rest).map_err(trunc)?;
        let static_start = input;
        let mut rest = input;
        for _ in 0..num_static_fields {
            let (r, _name_id) = Id::parse_element(rest, id_size).map_err(trunc)?;
            let (r, field_type) = parse_field_type(r, offset, 0x20)?;
            let (r, _value) = bytes::take(field_type.size_in_bytes(id_size))(r).map_err(trunc)?;
            rest = r;
        }
        let static_fields = &static_start[..static_start.len() - rest.len()];

        let (input, num_instance_fields) = number::be_u16(rest).map_err(trunc)?;
        let descriptor_start = input;
        let mut rest = input;
        for _ in 0..num_instance_fields {
            let (r, _name_id) = Id::parse_element(rest, id_size).map_err(trunc)?;
            let (r, _field_type) = parse_field_type(r, offset, 0x20)?;
            rest = r;
        }
        let instance_fields = &descriptor_start[..descriptor_start.len() - rest.len()];

        Ok((
            rest,
            Class {
                obj_id,
                stack_trace_serial,
                super_class_obj_id: non_null(super_class_obj_id),
                class_loader_obj_id,
                signers_obj_id,
                protection_domain_obj_id,
                instance_size_bytes,
                id_size,
                num_static_fields,
                static_fields,
                num_instance_fields,
                instance_fields,
            },
        ))
    }
}

/// An instance dump.
///
/// Field values are kept raw; decoding them needs the field descriptors of the
/// instance's class and all its superclasses, which only the resolved snapshot
/// has at hand.
#[derive(CopyGetters, Copy, Clone)]
pub struct Instance<'a> {
    #[get_copy = "pub"]
    obj_id: Id,
    #[get_copy = "pub"]
    stack_trace_serial: Serial,
    #[get_copy = "pub"]
    class_obj_id: Id,
    /// Packed field values: this class's fields first, then each superclass's
    #[get_copy = "pub"]
    fields: &'a [u8],
}

impl<'a> Instance<'a> {
    fn parse(input: &'a [u8], id_size: IdSize) -> nom::IResult<&'a [u8], Instance<'a>> {
        let (input, obj_id) = Id::parse_element(input, id_size)?;
        let (input, stack_trace_serial) = number::be_u32(input)?;
        let (input, class_obj_id) = Id::parse_element(input, id_size)?;
        let (input, num_bytes) = number::be_u32(input)?;
        let (input, fields) = bytes::take(num_bytes)(input)?;

        Ok((
            input,
            Instance {
                obj_id,
                stack_trace_serial,
                class_obj_id,
                fields,
            },
        ))
    }
}

/// An object array dump.
#[derive(CopyGetters, Copy, Clone)]
pub struct ObjectArray<'a> {
    #[get_copy = "pub"]
    obj_id: Id,
    #[get_copy = "pub"]
    stack_trace_serial: Serial,
    #[get_copy = "pub"]
    array_class_obj_id: Id,
    id_size: IdSize,
    #[get_copy = "pub"]
    num_elements: u32,
    elements: &'a [u8],
}

impl<'a> ObjectArray<'a> {
    /// Element ids in order. Null elements appear as the null id.
    pub fn elements(&self) -> Ids<'a> {
        Ids {
            iter: CountedIter::new(self.id_size, self.elements, self.num_elements),
        }
    }

    fn parse(input: &'a [u8], id_size: IdSize) -> nom::IResult<&'a [u8], ObjectArray<'a>> {
        let (input, obj_id) = Id::parse_element(input, id_size)?;
        let (input, stack_trace_serial) = number::be_u32(input)?;
        let (input, num_elements) = number::be_u32(input)?;
        let (input, array_class_obj_id) = Id::parse_element(input, id_size)?;
        let (input, elements) =
            bytes::take((num_elements as usize) * id_size.size_in_bytes())(input)?;

        Ok((
            input,
            ObjectArray {
                obj_id,
                stack_trace_serial,
                array_class_obj_id,
                id_size,
                num_elements,
                elements,
            },
        ))
    }
}

/// The type of a field, as tagged in class dumps.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, strum_macros::EnumIter)]
pub enum FieldType {
    ObjectId,
    Boolean,
    Char,
    Float,
    Double,
    Byte,
    Short,
    Int,
    Long,
}

impl FieldType {
    pub fn from_type_byte(b: u8) -> Option<FieldType> {
        match b {
            0x02 => Some(FieldType::ObjectId),
            0x04 => Some(FieldType::Boolean),
            0x05 => Some(FieldType::Char),
            0x06 => Some(FieldType::Float),
            0x07 => Some(FieldType::Double),
            0x08 => Some(FieldType::Byte),
            0x09 => Some(FieldType::Short),
            0x0A => Some(FieldType::Int),
            0x0B => Some(FieldType::Long),
            _ => None,
        }
    }

    pub fn type_byte(&self) -> u8 {
        match self {
            FieldType::ObjectId => 0x02,
            FieldType::Boolean => 0x04,
            FieldType::Char => 0x05,
            FieldType::Float => 0x06,
            FieldType::Double => 0x07,
            FieldType::Byte => 0x08,
            FieldType::Short => 0x09,
            FieldType::Int => 0x0A,
            FieldType::Long => 0x0B,
        }
    }

    /// The width of a value of this type. Object fields are id-sized.
    pub fn size_in_bytes(&self, id_size: IdSize) -> usize {
        match self {
            FieldType::ObjectId => id_size.size_in_bytes(),
            FieldType::Boolean | FieldType::Byte => 1,
            FieldType::Char | FieldType::Short => 2,
            FieldType::Float | FieldType::Int => 4,
            FieldType::Double | FieldType::Long => 8,
        }
    }
}

// Distinguishes an invalid type byte from plain truncation, since the former
// must surface the offending byte.
fn parse_field_type(input: &[u8], offset: usize, sub_tag: u8) -> Result<(&[u8], FieldType)> {
    let (rest, type_byte) = number::be_u8::<_, nom::error::Error<&[u8]>>(input)
        .map_err(|_| HprofError::Truncated {
            offset,
            tag: sub_tag,
        })?;

    let field_type = FieldType::from_type_byte(type_byte).ok_or(HprofError::InvalidTypeTag {
        offset,
        tag: type_byte,
    })?;

    Ok((rest, field_type))
}

/// A decoded field value.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// `None` when the dump recorded a null reference
    ObjectId(Option<Id>),
    Boolean(bool),
    Char(u16),
    Float(f32),
    Double(f64),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
}

impl FieldValue {
    pub(crate) fn parse(
        input: &[u8],
        id_size: IdSize,
        field_type: FieldType,
    ) -> nom::IResult<&[u8], FieldValue> {
        match field_type {
            FieldType::ObjectId => {
                let (input, id) = Id::parse_element(input, id_size)?;
                Ok((input, FieldValue::ObjectId(non_null(id))))
            }
            FieldType::Boolean => {
                let (input, b) = number::be_u8(input)?;
                Ok((input, FieldValue::Boolean(b != 0)))
            }
            FieldType::Char => {
                let (input, c) = number::be_u16(input)?;
                Ok((input, FieldValue::Char(c)))
            }
            FieldType::Float => {
                let (input, f) = number::be_f32(input)?;
                Ok((input, FieldValue::Float(f)))
            }
            FieldType::Double => {
                let (input, d) = number::be_f64(input)?;
                Ok((input, FieldValue::Double(d)))
            }
            FieldType::Byte => {
                let (input, b) = number::be_i8(input)?;
                Ok((input, FieldValue::Byte(b)))
            }
            FieldType::Short => {
                let (input, s) = number::be_i16(input)?;
                Ok((input, FieldValue::Short(s)))
            }
            FieldType::Int => {
                let (input, i) = number::be_i32(input)?;
                Ok((input, FieldValue::Int(i)))
            }
            FieldType::Long => {
                let (input, l) = number::be_i64(input)?;
                Ok((input, FieldValue::Long(l)))
            }
        }
    }

    /// The referent for object-typed values, `None` otherwise.
    pub fn as_obj_id(&self) -> Option<Id> {
        match self {
            FieldValue::ObjectId(id) => *id,
            _ => None,
        }
    }
}

/// A static field with its value.
#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct StaticFieldEntry {
    #[get_copy = "pub"]
    name_id: Id,
    #[get_copy = "pub"]
    field_type: FieldType,
    #[get_copy = "pub"]
    value: FieldValue,
}

impl ParseElement for StaticFieldEntry {
    type Ctx = IdSize;

    fn parse_element(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], Self> {
        let (input, name_id) = Id::parse_element(input, id_size)?;
        let (input, field_type) = field_type_or_verify_err(input)?;
        let (input, value) = FieldValue::parse(input, id_size, field_type)?;

        Ok((
            input,
            StaticFieldEntry {
                name_id,
                field_type,
                value,
            },
        ))
    }
}

/// Name and type of one declared instance field.
#[derive(CopyGetters, Copy, Clone, Debug)]
pub struct FieldDescriptor {
    #[get_copy = "pub"]
    name_id: Id,
    #[get_copy = "pub"]
    field_type: FieldType,
}

impl ParseElement for FieldDescriptor {
    type Ctx = IdSize;

    fn parse_element(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], Self> {
        let (input, name_id) = Id::parse_element(input, id_size)?;
        let (input, field_type) = field_type_or_verify_err(input)?;

        Ok((
            input,
            FieldDescriptor {
                name_id,
                field_type,
            },
        ))
    }
}

// Type bytes re-read through iterators were already validated by Class::parse,
// so an invalid one only needs a generic nom error here.
fn field_type_or_verify_err(input: &[u8]) -> nom::IResult<&[u8], FieldType> {
    let (rest, type_byte) = number::be_u8(input)?;

    match FieldType::from_type_byte(type_byte) {
        Some(field_type) => Ok((rest, field_type)),
        None => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        ))),
    }
}

pub(crate) fn non_null(id: Id) -> Option<Id> {
    if id.id() == 0 {
        None
    } else {
        Some(id)
    }
}

/// Iterator over the static fields of a [Class].
pub struct StaticFieldEntries<'a> {
    iter: CountedIter<'a, StaticFieldEntry>,
}

impl<'a> Iterator for StaticFieldEntries<'a> {
    type Item = ParseResult<'a, StaticFieldEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

/// Iterator over the instance field descriptors of a [Class].
pub struct FieldDescriptors<'a> {
    iter: CountedIter<'a, FieldDescriptor>,
}

impl<'a> Iterator for FieldDescriptors<'a> {
    type Item = ParseResult<'a, FieldDescriptor>;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn push_id(buf: &mut Vec<u8>, id: u64) {
        buf.extend_from_slice(&id.to_be_bytes());
    }

    fn parse_one(bytes: &[u8]) -> SubRecord {
        let (rest, sub_record) = SubRecord::parse(bytes, IdSize::U64, 0).unwrap();
        assert!(rest.is_empty());
        sub_record
    }

    #[test]
    fn root_kind_tag_bytes_round_trip() {
        for kind in RootKind::iter() {
            assert_eq!(Some(kind), RootKind::from_tag_byte(kind.tag_byte()));
        }
    }

    #[test]
    fn parse_plain_root() {
        let mut bytes = vec![0xFF];
        push_id(&mut bytes, 0x123);

        match parse_one(&bytes) {
            SubRecord::GcRoot(root) => {
                assert_eq!(RootKind::Unknown, root.kind());
                assert_eq!(Id::from(0x123), root.obj_id());
                assert_eq!(None, root.thread_serial());
                assert_eq!(None, root.frame_index());
                assert_eq!(None, root.stack_trace_serial());
            }
            _ => panic!("wrong sub-record"),
        }
    }

    #[test]
    fn parse_jni_global_root_drops_ref_id() {
        let mut bytes = vec![0x01];
        push_id(&mut bytes, 0x123);
        push_id(&mut bytes, 0xDEAD);

        match parse_one(&bytes) {
            SubRecord::GcRoot(root) => {
                assert_eq!(RootKind::JniGlobal, root.kind());
                assert_eq!(Id::from(0x123), root.obj_id());
            }
            _ => panic!("wrong sub-record"),
        }
    }

    #[test]
    fn parse_jni_local_root_with_frame() {
        let mut bytes = vec![0x02];
        push_id(&mut bytes, 0x123);
        bytes.extend_from_slice(&7_u32.to_be_bytes());
        bytes.extend_from_slice(&2_u32.to_be_bytes());

        match parse_one(&bytes) {
            SubRecord::GcRoot(root) => {
                assert_eq!(RootKind::JniLocal, root.kind());
                assert_eq!(Some(7), root.thread_serial());
                assert_eq!(Some(2), root.frame_index());
            }
            _ => panic!("wrong sub-record"),
        }
    }

    #[test]
    fn parse_java_frame_root_missing_frame() {
        let mut bytes = vec![0x03];
        push_id(&mut bytes, 0x123);
        bytes.extend_from_slice(&7_u32.to_be_bytes());
        bytes.extend_from_slice(&u32::MAX.to_be_bytes());

        match parse_one(&bytes) {
            SubRecord::GcRoot(root) => {
                assert_eq!(RootKind::JavaFrame, root.kind());
                assert_eq!(Some(7), root.thread_serial());
                assert_eq!(None, root.frame_index());
            }
            _ => panic!("wrong sub-record"),
        }
    }

    #[test]
    fn parse_thread_object_root() {
        let mut bytes = vec![0x08];
        push_id(&mut bytes, 0x123);
        bytes.extend_from_slice(&5_u32.to_be_bytes());
        bytes.extend_from_slice(&9_u32.to_be_bytes());

        match parse_one(&bytes) {
            SubRecord::GcRoot(root) => {
                assert_eq!(RootKind::ThreadObject, root.kind());
                assert_eq!(Id::from(0x123), root.obj_id());
                assert_eq!(Some(5), root.thread_serial());
                assert_eq!(Some(9), root.stack_trace_serial());
                assert_eq!(None, root.frame_index());
            }
            _ => panic!("wrong sub-record"),
        }
    }

    #[test]
    fn parse_heap_dump_info() {
        let mut bytes = vec![0xFE];
        bytes.extend_from_slice(&1_u32.to_be_bytes());
        push_id(&mut bytes, 0x777);

        match parse_one(&bytes) {
            SubRecord::HeapDumpInfo(info) => {
                assert_eq!(1, info.heap_id());
                assert_eq!(Id::from(0x777), info.heap_name_id());
            }
            _ => panic!("wrong sub-record"),
        }
    }

    fn class_dump_bytes() -> Vec<u8> {
        let mut bytes = vec![0x20];
        push_id(&mut bytes, 0x100); // class obj id
        bytes.extend_from_slice(&3_u32.to_be_bytes()); // stack trace serial
        push_id(&mut bytes, 0x200); // super class
        push_id(&mut bytes, 0x300); // loader
        push_id(&mut bytes, 0); // signers
        push_id(&mut bytes, 0); // protection domain
        push_id(&mut bytes, 0); // reserved
        push_id(&mut bytes, 0); // reserved
        bytes.extend_from_slice(&24_u32.to_be_bytes()); // instance size

        // one constant pool entry to be skipped
        bytes.extend_from_slice(&1_u16.to_be_bytes());
        bytes.extend_from_slice(&0_u16.to_be_bytes());
        bytes.push(0x0A); // int
        bytes.extend_from_slice(&99_i32.to_be_bytes());

        // static fields: an object ref, a null object ref, an int
        bytes.extend_from_slice(&3_u16.to_be_bytes());
        push_id(&mut bytes, 0x111);
        bytes.push(0x02);
        push_id(&mut bytes, 0xAAA);
        push_id(&mut bytes, 0x112);
        bytes.push(0x02);
        push_id(&mut bytes, 0);
        push_id(&mut bytes, 0x113);
        bytes.push(0x0A);
        bytes.extend_from_slice(&7_i32.to_be_bytes());

        // instance fields: an object ref and a byte
        bytes.extend_from_slice(&2_u16.to_be_bytes());
        push_id(&mut bytes, 0x221);
        bytes.push(0x02);
        push_id(&mut bytes, 0x222);
        bytes.push(0x08);

        bytes
    }

    #[test]
    fn parse_class_dump() {
        let bytes = class_dump_bytes();

        let class = match parse_one(&bytes) {
            SubRecord::Class(class) => class,
            _ => panic!("wrong sub-record"),
        };

        assert_eq!(Id::from(0x100), class.obj_id());
        assert_eq!(3, class.stack_trace_serial());
        assert_eq!(Some(Id::from(0x200)), class.super_class_obj_id());
        assert_eq!(Id::from(0x300), class.class_loader_obj_id());
        assert_eq!(24, class.instance_size_bytes());

        let statics = class
            .static_fields()
            .collect::<ParseResult<Vec<StaticFieldEntry>>>()
            .unwrap();
        assert_eq!(3, statics.len());
        assert_eq!(Id::from(0x111), statics[0].name_id());
        assert_eq!(FieldValue::ObjectId(Some(Id::from(0xAAA))), statics[0].value());
        assert_eq!(FieldValue::ObjectId(None), statics[1].value());
        assert_eq!(FieldValue::Int(7), statics[2].value());

        let descriptors = class
            .instance_field_descriptors()
            .collect::<ParseResult<Vec<FieldDescriptor>>>()
            .unwrap();
        assert_eq!(2, descriptors.len());
        assert_eq!(Id::from(0x221), descriptors[0].name_id());
        assert_eq!(FieldType::ObjectId, descriptors[0].field_type());
        assert_eq!(FieldType::Byte, descriptors[1].field_type());
    }

    #[test]
    fn class_dump_null_super_class() {
        let mut bytes = vec![0x20];
        push_id(&mut bytes, 0x100);
        bytes.extend_from_slice(&0_u32.to_be_bytes());
        push_id(&mut bytes, 0); // no super class
        push_id(&mut bytes, 0);
        push_id(&mut bytes, 0);
        push_id(&mut bytes, 0);
        push_id(&mut bytes, 0);
        push_id(&mut bytes, 0);
        bytes.extend_from_slice(&0_u32.to_be_bytes());
        bytes.extend_from_slice(&0_u16.to_be_bytes());
        bytes.extend_from_slice(&0_u16.to_be_bytes());
        bytes.extend_from_slice(&0_u16.to_be_bytes());

        let class = match parse_one(&bytes) {
            SubRecord::Class(class) => class,
            _ => panic!("wrong sub-record"),
        };

        assert_eq!(None, class.super_class_obj_id());
        assert_eq!(0, class.static_fields().count());
        assert_eq!(0, class.instance_field_descriptors().count());
    }

    #[test]
    fn class_dump_invalid_field_type_is_fatal() {
        let mut bytes = vec![0x20];
        push_id(&mut bytes, 0x100);
        bytes.extend_from_slice(&0_u32.to_be_bytes());
        push_id(&mut bytes, 0);
        push_id(&mut bytes, 0);
        push_id(&mut bytes, 0);
        push_id(&mut bytes, 0);
        push_id(&mut bytes, 0);
        push_id(&mut bytes, 0);
        bytes.extend_from_slice(&0_u32.to_be_bytes());
        bytes.extend_from_slice(&0_u16.to_be_bytes());
        // one static field with a bogus type byte
        bytes.extend_from_slice(&1_u16.to_be_bytes());
        push_id(&mut bytes, 0x111);
        bytes.push(0x63);

        let err = SubRecord::parse(&bytes, IdSize::U64, 40).err().unwrap();

        assert_eq!(HprofError::InvalidTypeTag { offset: 40, tag: 0x63 }, err);
    }

    #[test]
    fn parse_instance_dump() {
        let mut bytes = vec![0x21];
        push_id(&mut bytes, 0x500);
        bytes.extend_from_slice(&2_u32.to_be_bytes());
        push_id(&mut bytes, 0x100);
        bytes.extend_from_slice(&4_u32.to_be_bytes());
        bytes.extend_from_slice(&[1, 2, 3, 4]);

        match parse_one(&bytes) {
            SubRecord::Instance(instance) => {
                assert_eq!(Id::from(0x500), instance.obj_id());
                assert_eq!(2, instance.stack_trace_serial());
                assert_eq!(Id::from(0x100), instance.class_obj_id());
                assert_eq!(&[1, 2, 3, 4], instance.fields());
            }
            _ => panic!("wrong sub-record"),
        }
    }

    #[test]
    fn parse_object_array_dump() {
        let mut bytes = vec![0x22];
        push_id(&mut bytes, 0x600);
        bytes.extend_from_slice(&2_u32.to_be_bytes());
        bytes.extend_from_slice(&3_u32.to_be_bytes());
        push_id(&mut bytes, 0x100);
        push_id(&mut bytes, 0xA);
        push_id(&mut bytes, 0); // null element
        push_id(&mut bytes, 0xB);

        match parse_one(&bytes) {
            SubRecord::ObjectArray(array) => {
                assert_eq!(Id::from(0x600), array.obj_id());
                assert_eq!(Id::from(0x100), array.array_class_obj_id());
                let elements = array
                    .elements()
                    .collect::<ParseResult<Vec<Id>>>()
                    .unwrap();
                assert_eq!(vec![Id::from(0xA), Id::from(0), Id::from(0xB)], elements);
            }
            _ => panic!("wrong sub-record"),
        }
    }

    #[test]
    fn unknown_sub_record_tag_is_fatal() {
        let err = SubRecord::parse(&[0x77, 0, 0], IdSize::U64, 123).err().unwrap();

        assert_eq!(HprofError::UnknownSubRecord { offset: 123, tag: 0x77 }, err);
    }

    #[test]
    fn primitive_array_nodata_is_unsupported() {
        let err = SubRecord::parse(&[0xC3, 0, 0], IdSize::U64, 50).err().unwrap();

        assert_eq!(HprofError::UnsupportedSubRecord { offset: 50, tag: 0xC3 }, err);
    }

    #[test]
    fn truncated_sub_record_reports_offset_and_tag() {
        // instance dump cut off mid-header
        let mut bytes = vec![0x21];
        push_id(&mut bytes, 0x500);

        let err = SubRecord::parse(&bytes, IdSize::U64, 99).err().unwrap();

        assert_eq!(HprofError::Truncated { offset: 99, tag: 0x21 }, err);
    }

    #[test]
    fn sub_records_chain() {
        let mut bytes = vec![0xFF];
        push_id(&mut bytes, 0x1);
        bytes.push(0x05);
        push_id(&mut bytes, 0x2);

        let (rest, first) = SubRecord::parse(&bytes, IdSize::U64, 0).unwrap();
        let (rest, second) = SubRecord::parse(rest, IdSize::U64, 9).unwrap();

        assert!(rest.is_empty());
        match (first, second) {
            (SubRecord::GcRoot(a), SubRecord::GcRoot(b)) => {
                assert_eq!(RootKind::Unknown, a.kind());
                assert_eq!(RootKind::StickyClass, b.kind());
            }
            _ => panic!("wrong sub-records"),
        }
    }

    #[test]
    fn field_type_widths() {
        for field_type in FieldType::iter() {
            assert_eq!(
                Some(field_type),
                FieldType::from_type_byte(field_type.type_byte())
            );
        }
        assert_eq!(8, FieldType::ObjectId.size_in_bytes(IdSize::U64));
        assert_eq!(4, FieldType::ObjectId.size_in_bytes(IdSize::U32));
        assert_eq!(1, FieldType::Boolean.size_in_bytes(IdSize::U64));
        assert_eq!(2, FieldType::Char.size_in_bytes(IdSize::U64));
        assert_eq!(8, FieldType::Double.size_in_bytes(IdSize::U64));
    }

    #[test]
    fn narrow_id_instance_dump() {
        // id size 4: the same layout shrinks
        let mut bytes = vec![0x21];
        bytes.extend_from_slice(&0x500_u32.to_be_bytes());
        bytes.extend_from_slice(&0_u32.to_be_bytes());
        bytes.extend_from_slice(&0x100_u32.to_be_bytes());
        bytes.extend_from_slice(&0_u32.to_be_bytes());

        let (rest, sub_record) = SubRecord::parse(&bytes, IdSize::U32, 0).unwrap();

        assert!(rest.is_empty());
        match sub_record {
            SubRecord::Instance(instance) => {
                assert_eq!(Id::from(0x500), instance.obj_id());
                assert_eq!(Id::from(0x100), instance.class_obj_id());
            }
            _ => panic!("wrong sub-record"),
        }
    }
}
