//! Builders that assemble wire-format dumps for tests.

use crate::heap_dump::{FieldType, FieldValue, PrimitiveArrayType};
use crate::{IdSize, Serial};

/// Accumulates top level records behind a standard header.
pub(crate) struct DumpBuilder {
    id_size: IdSize,
    bytes: Vec<u8>,
}

impl DumpBuilder {
    pub(crate) fn new() -> DumpBuilder {
        DumpBuilder::with_id_size(IdSize::U64)
    }

    pub(crate) fn with_id_size(id_size: IdSize) -> DumpBuilder {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"JAVA PROFILE 1.0.3");
        bytes.push(0);
        bytes.extend_from_slice(&(id_size.size_in_bytes() as u32).to_be_bytes());
        bytes.extend_from_slice(&1_000_u64.to_be_bytes());
        DumpBuilder { id_size, bytes }
    }

    pub(crate) fn utf8(self, name_id: u64, text: &str) -> DumpBuilder {
        self.utf8_raw(name_id, text.as_bytes())
    }

    pub(crate) fn utf8_raw(self, name_id: u64, text: &[u8]) -> DumpBuilder {
        let mut body = Vec::new();
        push_id(&mut body, name_id, self.id_size);
        body.extend_from_slice(text);
        self.record(0x01, &body)
    }

    pub(crate) fn load_class(self, serial: Serial, class_obj_id: u64, name_id: u64) -> DumpBuilder {
        let mut body = Vec::new();
        body.extend_from_slice(&serial.to_be_bytes());
        push_id(&mut body, class_obj_id, self.id_size);
        body.extend_from_slice(&0_u32.to_be_bytes());
        push_id(&mut body, name_id, self.id_size);
        self.record(0x02, &body)
    }

    pub(crate) fn stack_frame(
        self,
        id: u64,
        method_name_id: u64,
        signature_id: u64,
        source_file_id: u64,
        class_serial: Serial,
        line: i32,
    ) -> DumpBuilder {
        let mut body = Vec::new();
        push_id(&mut body, id, self.id_size);
        push_id(&mut body, method_name_id, self.id_size);
        push_id(&mut body, signature_id, self.id_size);
        push_id(&mut body, source_file_id, self.id_size);
        body.extend_from_slice(&class_serial.to_be_bytes());
        body.extend_from_slice(&line.to_be_bytes());
        self.record(0x04, &body)
    }

    pub(crate) fn stack_trace(
        self,
        serial: Serial,
        thread_serial: Serial,
        frame_ids: &[u64],
    ) -> DumpBuilder {
        let mut body = Vec::new();
        body.extend_from_slice(&serial.to_be_bytes());
        body.extend_from_slice(&thread_serial.to_be_bytes());
        body.extend_from_slice(&(frame_ids.len() as u32).to_be_bytes());
        for &frame_id in frame_ids {
            push_id(&mut body, frame_id, self.id_size);
        }
        self.record(0x05, &body)
    }

    pub(crate) fn heap_dump<F: FnOnce(&mut SegmentBuilder)>(self, build: F) -> DumpBuilder {
        self.segment(0x1C, build)
    }

    /// The pre-segment tag from 1.0.1 dumps.
    pub(crate) fn legacy_heap_dump<F: FnOnce(&mut SegmentBuilder)>(self, build: F) -> DumpBuilder {
        self.segment(0x0C, build)
    }

    pub(crate) fn heap_dump_end(self) -> DumpBuilder {
        self.record(0x2C, &[])
    }

    fn segment<F: FnOnce(&mut SegmentBuilder)>(self, tag: u8, build: F) -> DumpBuilder {
        let mut seg = SegmentBuilder {
            id_size: self.id_size,
            bytes: Vec::new(),
        };
        build(&mut seg);
        let body = seg.bytes;
        self.record(tag, &body)
    }

    /// Append a record with an arbitrary tag and body.
    pub(crate) fn record(mut self, tag: u8, body: &[u8]) -> DumpBuilder {
        self.bytes.push(tag);
        self.bytes.extend_from_slice(&0_u32.to_be_bytes());
        self.bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
        self.bytes.extend_from_slice(body);
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// Accumulates sub-records for one heap dump segment.
pub(crate) struct SegmentBuilder {
    id_size: IdSize,
    bytes: Vec<u8>,
}

impl SegmentBuilder {
    pub(crate) fn root_unknown(&mut self, obj_id: u64) {
        self.bytes.push(0xFF);
        self.push_id(obj_id);
    }

    pub(crate) fn root_sticky_class(&mut self, obj_id: u64) {
        self.bytes.push(0x05);
        self.push_id(obj_id);
    }

    pub(crate) fn root_jni_local(&mut self, obj_id: u64, thread_serial: Serial, frame: u32) {
        self.bytes.push(0x02);
        self.push_id(obj_id);
        self.push_u32(thread_serial);
        self.push_u32(frame);
    }

    pub(crate) fn root_thread_object(
        &mut self,
        obj_id: u64,
        thread_serial: Serial,
        stack_trace_serial: Serial,
    ) {
        self.bytes.push(0x08);
        self.push_id(obj_id);
        self.push_u32(thread_serial);
        self.push_u32(stack_trace_serial);
    }

    pub(crate) fn heap_dump_info(&mut self, heap_id: u32, name_id: u64) {
        self.bytes.push(0xFE);
        self.push_u32(heap_id);
        self.push_id(name_id);
    }

    pub(crate) fn class_dump(
        &mut self,
        id: u64,
        super_id: u64,
        instance_size: u32,
        statics: &[(u64, FieldValue)],
        fields: &[(u64, FieldType)],
    ) {
        self.bytes.push(0x20);
        self.push_id(id);
        self.push_u32(0); // stack trace serial
        self.push_id(super_id);
        self.push_id(0); // class loader
        self.push_id(0); // signers
        self.push_id(0); // protection domain
        self.push_id(0); // reserved
        self.push_id(0); // reserved
        self.push_u32(instance_size);
        self.bytes.extend_from_slice(&0_u16.to_be_bytes()); // constant pool
        self.bytes
            .extend_from_slice(&(statics.len() as u16).to_be_bytes());
        for (name_id, value) in statics {
            self.push_id(*name_id);
            self.bytes.push(field_type_of(value).type_byte());
            push_value(&mut self.bytes, self.id_size, value);
        }
        self.bytes
            .extend_from_slice(&(fields.len() as u16).to_be_bytes());
        for (name_id, field_type) in fields {
            self.push_id(*name_id);
            self.bytes.push(field_type.type_byte());
        }
    }

    pub(crate) fn instance_dump(&mut self, id: u64, class_id: u64, field_data: &[u8]) {
        self.bytes.push(0x21);
        self.push_id(id);
        self.push_u32(0); // stack trace serial
        self.push_id(class_id);
        self.push_u32(field_data.len() as u32);
        self.bytes.extend_from_slice(field_data);
    }

    pub(crate) fn object_array_dump(&mut self, id: u64, class_id: u64, elements: &[u64]) {
        self.bytes.push(0x22);
        self.push_id(id);
        self.push_u32(0); // stack trace serial
        self.push_u32(elements.len() as u32);
        self.push_id(class_id);
        for &element in elements {
            self.push_id(element);
        }
    }

    pub(crate) fn primitive_array_dump(
        &mut self,
        id: u64,
        elem_type: PrimitiveArrayType,
        contents: &[u8],
    ) {
        self.bytes.push(0x23);
        self.push_id(id);
        self.push_u32(0); // stack trace serial
        self.push_u32((contents.len() / elem_type.size_in_bytes()) as u32);
        self.bytes.push(elem_type.type_byte());
        self.bytes.extend_from_slice(contents);
    }

    /// Append raw bytes, for deliberately malformed segments.
    pub(crate) fn raw(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    fn push_id(&mut self, id: u64) {
        push_id(&mut self.bytes, id, self.id_size);
    }

    fn push_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }
}

/// Packed field data in wire order, as an instance dump stores it.
pub(crate) fn field_bytes(id_size: IdSize, values: &[FieldValue]) -> Vec<u8> {
    let mut buf = Vec::new();
    for value in values {
        push_value(&mut buf, id_size, value);
    }
    buf
}

fn push_id(buf: &mut Vec<u8>, id: u64, id_size: IdSize) {
    match id_size {
        IdSize::U8 => buf.push(id as u8),
        IdSize::U16 => buf.extend_from_slice(&(id as u16).to_be_bytes()),
        IdSize::U32 => buf.extend_from_slice(&(id as u32).to_be_bytes()),
        IdSize::U64 => buf.extend_from_slice(&id.to_be_bytes()),
    }
}

fn push_value(buf: &mut Vec<u8>, id_size: IdSize, value: &FieldValue) {
    match value {
        FieldValue::ObjectId(id) => push_id(buf, id.map(|i| i.id()).unwrap_or(0), id_size),
        FieldValue::Boolean(b) => buf.push(*b as u8),
        FieldValue::Char(c) => buf.extend_from_slice(&c.to_be_bytes()),
        FieldValue::Float(f) => buf.extend_from_slice(&f.to_be_bytes()),
        FieldValue::Double(d) => buf.extend_from_slice(&d.to_be_bytes()),
        FieldValue::Byte(b) => buf.extend_from_slice(&b.to_be_bytes()),
        FieldValue::Short(s) => buf.extend_from_slice(&s.to_be_bytes()),
        FieldValue::Int(i) => buf.extend_from_slice(&i.to_be_bytes()),
        FieldValue::Long(l) => buf.extend_from_slice(&l.to_be_bytes()),
    }
}

fn field_type_of(value: &FieldValue) -> FieldType {
    match value {
        FieldValue::ObjectId(_) => FieldType::ObjectId,
        FieldValue::Boolean(_) => FieldType::Boolean,
        FieldValue::Char(_) => FieldType::Char,
        FieldValue::Float(_) => FieldType::Float,
        FieldValue::Double(_) => FieldType::Double,
        FieldValue::Byte(_) => FieldType::Byte,
        FieldValue::Short(_) => FieldType::Short,
        FieldValue::Int(_) => FieldType::Int,
        FieldValue::Long(_) => FieldType::Long,
    }
}
