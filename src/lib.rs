//! Parse hprof heap dumps and materialize them into a queryable object graph.
//!
//! The crate is layered: [`parse_hprof`] and [`Records`] expose a lazy,
//! zero-copy view of the raw record stream, [`heap_dump`] decodes the
//! sub-records inside heap dump segments, and [`Snapshot`] ties everything
//! together into resolved heaps, classes, instances, and gc roots, with
//! dominator-based retained sizes on top.

use getset::CopyGetters;
use nom::bytes::complete as bytes;
use nom::number::complete as number;
use std::cmp::Ordering;
use std::fmt::{Error, Formatter};
use std::{cmp, fmt};

pub mod dominators;
mod error;
pub mod heap_dump;
mod parsing_iterator;
pub mod snapshot;
#[cfg(test)]
pub(crate) mod test_dump;
pub mod visitor;

pub use error::{HprofError, Result};
pub use snapshot::{Heap, Obj, ObjRef, RootObj, Snapshot, ThreadObj};

use parsing_iterator::*;

#[derive(CopyGetters, Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Id {
    // ids narrower than 8 bytes are widened on parse; a heap small enough to use
    // them fits comfortably either way
    #[get_copy = "pub"]
    id: u64,
}

impl From<u64> for Id {
    fn from(id: u64) -> Self {
        Id { id }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::result::Result<(), Error> {
        write!(f, "{}", self.id)
    }
}

impl fmt::UpperHex for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::result::Result<(), Error> {
        fmt::UpperHex::fmt(&self.id, f)
    }
}

pub type Serial = u32;

impl ParseElement for Id {
    type Ctx = IdSize;

    fn parse_element(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], Self> {
        let (input, id) = match id_size {
            IdSize::U8 => number::be_u8(input).map(|(i, id)| (i, id as u64))?,
            IdSize::U16 => number::be_u16(input).map(|(i, id)| (i, id as u64))?,
            IdSize::U32 => number::be_u32(input).map(|(i, id)| (i, id as u64))?,
            IdSize::U64 => number::be_u64(input)?,
        };

        Ok((input, Id { id }))
    }
}

/// The byte width of [Id]s in a particular hprof file, declared by its header.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum IdSize {
    U8,
    U16,
    U32,
    U64,
}

impl IdSize {
    pub fn size_in_bytes(&self) -> usize {
        match self {
            IdSize::U8 => 1,
            IdSize::U16 => 2,
            IdSize::U32 => 4,
            IdSize::U64 => 8,
        }
    }

    fn from_header_num(id_size: u32) -> Result<IdSize> {
        match id_size {
            1 => Ok(IdSize::U8),
            2 => Ok(IdSize::U16),
            4 => Ok(IdSize::U32),
            8 => Ok(IdSize::U64),
            _ => Err(HprofError::UnsupportedIdSize(id_size)),
        }
    }
}

// Record layout: https://github.com/openjdk/jdk/blob/master/src/hotspot/share/services/heapDumper.cpp
// Android extensions: https://android.googlesource.com/platform/art/+/refs/heads/main/runtime/hprof/hprof.cc

/// A parsed wrapper around a byte slice containing an hprof file.
#[derive(CopyGetters)]
pub struct Hprof<'a> {
    #[get_copy = "pub"]
    header: Header<'a>,
    records: &'a [u8],
    // byte offset of `records` in the original input
    records_offset: usize,
}

impl<'a> Hprof<'a> {
    pub fn records_iter(&self) -> Records<'a> {
        Records {
            remaining: self.records,
            id_size: self.header.id_size,
            offset: self.records_offset,
        }
    }
}

/// Parse the header of an hprof byte sequence and prepare a lazy iterator over the rest.
pub fn parse_hprof(input: &[u8]) -> Result<Hprof> {
    let (rest, header) = Header::parse(input)?;

    Ok(Hprof {
        header,
        records: rest,
        records_offset: input.len() - rest.len(),
    })
}

#[derive(CopyGetters, Copy, Clone)]
pub struct Header<'a> {
    label: &'a [u8],
    #[get_copy = "pub"]
    id_size: IdSize,
    /// The timestamp for the hprof as the number of millis since epoch
    #[get_copy = "pub"]
    timestamp_millis: u64,
}

impl<'a> Header<'a> {
    /// The format label, e.g. `JAVA PROFILE 1.0.3`.
    pub fn label(&self) -> std::result::Result<&'a str, std::str::Utf8Error> {
        std::str::from_utf8(self.label)
    }

    fn parse(input: &'a [u8]) -> Result<(&'a [u8], Header<'a>)> {
        let bad_header = |_: nom::Err<nom::error::Error<&[u8]>>| {
            HprofError::InvalidHeader("truncated or unterminated header".to_owned())
        };

        // null-terminated label
        let (input, label) = bytes::take_until::<_, _, nom::error::Error<&[u8]>>(&b"\0"[..])(
            input,
        )
        .map_err(bad_header)?;
        let (input, _) =
            bytes::take_while_m_n::<_, _, nom::error::Error<&[u8]>>(1, 1, |b| b == 0)(input)
                .map_err(bad_header)?;

        let (input, id_size_num) =
            number::be_u32::<_, nom::error::Error<&[u8]>>(input).map_err(bad_header)?;
        let id_size = IdSize::from_header_num(id_size_num)?;

        let (input, timestamp_millis) =
            number::be_u64::<_, nom::error::Error<&[u8]>>(input).map_err(bad_header)?;

        Ok((
            input,
            Header {
                label,
                id_size,
                timestamp_millis,
            },
        ))
    }
}

impl<'a> fmt::Debug for Header<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::result::Result<(), Error> {
        f.debug_struct("Header")
            .field("label", &self.label())
            .field("timestamp_millis", &self.timestamp_millis())
            .field("id_size", &self.id_size())
            .finish()
    }
}

/// Iterator over the top level records in an hprof.
pub struct Records<'a> {
    remaining: &'a [u8],
    id_size: IdSize,
    // absolute byte offset of the next record's tag byte
    offset: usize,
}

impl<'a> Records<'a> {
    /// The absolute byte offset of the next record to be yielded, or of the
    /// failing record once iteration has stopped on an error.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<Record<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }

        let res = Record::parse(self.remaining, self.id_size, self.offset);
        match res {
            Ok((input, record)) => {
                self.offset += self.remaining.len() - input.len();
                self.remaining = input;
                Some(Ok(record))
            }
            Err(_) => {
                // the tag byte is always present on a non-empty remainder; the
                // failure is past it, in the envelope or a short body
                let err = HprofError::Truncated {
                    offset: self.offset,
                    tag: self.remaining[0],
                };
                // without a trustworthy length there is no way to resync
                self.remaining = &[];
                Some(Err(err))
            }
        }
    }
}

/// A top level hprof record.
///
/// The body is kept as a raw slice, bounded by the length declared in the record
/// envelope, and only decoded when one of the `as_*` accessors is invoked.
#[derive(CopyGetters, Copy, Clone)]
pub struct Record<'a> {
    /// The raw tag byte. See [Record::tag] for the decoded form.
    #[get_copy = "pub"]
    tag_byte: u8,
    #[get_copy = "pub"]
    micros_since_header_ts: u32,
    /// Absolute byte offset of this record's tag byte in the input
    #[get_copy = "pub"]
    offset: usize,
    id_size: IdSize,
    body: &'a [u8],
}

impl<'a> Record<'a> {
    /// The decoded tag, or `None` for tags this crate does not know about.
    ///
    /// An unknown tag is not an error: the envelope declares the body length, so
    /// iteration steps over the record either way.
    pub fn tag(&self) -> Option<RecordTag> {
        RecordTag::from_tag_byte(self.tag_byte)
    }

    /// Absolute byte offset of this record's body in the input.
    pub fn body_offset(&self) -> usize {
        // tag byte + u32 timestamp + u32 length
        self.offset + 9
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Returns `Some` if this record is a [RecordTag::Utf8], `None` otherwise.
    pub fn as_utf_8(&self) -> Option<ParseResult<'a, Utf8<'a>>> {
        match self.tag() {
            Some(RecordTag::Utf8) => Some(Utf8::parse(self.body, self.id_size)),
            _ => None,
        }
    }

    /// Returns `Some` if this record is a [RecordTag::LoadClass], `None` otherwise.
    pub fn as_load_class(&self) -> Option<ParseResult<'a, LoadClass>> {
        match self.tag() {
            Some(RecordTag::LoadClass) => Some(LoadClass::parse(self.body, self.id_size)),
            _ => None,
        }
    }

    /// Returns `Some` if this record is a [RecordTag::StackFrame], `None` otherwise.
    pub fn as_stack_frame(&self) -> Option<ParseResult<'a, StackFrame>> {
        match self.tag() {
            Some(RecordTag::StackFrame) => Some(StackFrame::parse(self.body, self.id_size)),
            _ => None,
        }
    }

    /// Returns `Some` if this record is a [RecordTag::StackTrace], `None` otherwise.
    pub fn as_stack_trace(&self) -> Option<ParseResult<'a, StackTrace<'a>>> {
        match self.tag() {
            Some(RecordTag::StackTrace) => Some(StackTrace::parse(self.body, self.id_size)),
            _ => None,
        }
    }

    /// Returns `Some` if this record is a [RecordTag::HeapDump] or
    /// [RecordTag::HeapDumpSegment], `None` otherwise.
    pub fn as_heap_dump_segment(&self) -> Option<HeapDumpSegment<'a>> {
        match self.tag() {
            Some(RecordTag::HeapDump) | Some(RecordTag::HeapDumpSegment) => {
                Some(HeapDumpSegment {
                    id_size: self.id_size,
                    records: self.body,
                    offset: self.body_offset(),
                })
            }
            _ => None,
        }
    }

    fn parse(
        input: &'a [u8],
        id_size: IdSize,
        offset: usize,
    ) -> nom::IResult<&'a [u8], Record<'a>> {
        let (input, tag_byte) = number::be_u8(input)?;
        let (input, micros) = number::be_u32(input)?;
        let (input, len) = number::be_u32(input)?;
        // the declared length is trusted even for unknown tags
        let (input, body) = bytes::take(len)(input)?;

        Ok((
            input,
            Record {
                tag_byte,
                micros_since_header_ts: micros,
                offset,
                id_size,
                body,
            },
        ))
    }
}

/// Tags of the top level record types.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum_macros::EnumIter)]
pub enum RecordTag {
    Utf8,
    LoadClass,
    UnloadClass,
    StackFrame,
    StackTrace,
    AllocSites,
    StartThread,
    EndThread,
    HeapSummary,
    /// Used in java 1.0.1 files
    HeapDump,
    CpuSamples,
    ControlSettings,
    /// Used instead of HeapDump in java 1.0.2+
    HeapDumpSegment,
    HeapDumpEnd,
}

impl RecordTag {
    fn from_tag_byte(tag: u8) -> Option<RecordTag> {
        match tag {
            0x01 => Some(RecordTag::Utf8),
            0x02 => Some(RecordTag::LoadClass),
            0x03 => Some(RecordTag::UnloadClass),
            0x04 => Some(RecordTag::StackFrame),
            0x05 => Some(RecordTag::StackTrace),
            0x06 => Some(RecordTag::AllocSites),
            0x07 => Some(RecordTag::HeapSummary),
            0x0A => Some(RecordTag::StartThread),
            0x0B => Some(RecordTag::EndThread),
            0x0C => Some(RecordTag::HeapDump),
            0x0D => Some(RecordTag::CpuSamples),
            0x0E => Some(RecordTag::ControlSettings),
            0x1C => Some(RecordTag::HeapDumpSegment),
            0x2C => Some(RecordTag::HeapDumpEnd),
            _ => None,
        }
    }

    pub fn tag_byte(&self) -> u8 {
        match self {
            RecordTag::Utf8 => 0x01,
            RecordTag::LoadClass => 0x02,
            RecordTag::UnloadClass => 0x03,
            RecordTag::StackFrame => 0x04,
            RecordTag::StackTrace => 0x05,
            RecordTag::AllocSites => 0x06,
            RecordTag::HeapSummary => 0x07,
            RecordTag::StartThread => 0x0A,
            RecordTag::EndThread => 0x0B,
            RecordTag::HeapDump => 0x0C,
            RecordTag::CpuSamples => 0x0D,
            RecordTag::ControlSettings => 0x0E,
            RecordTag::HeapDumpSegment => 0x1C,
            RecordTag::HeapDumpEnd => 0x2C,
        }
    }
}

impl cmp::Ord for RecordTag {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tag_byte().cmp(&other.tag_byte())
    }
}

impl cmp::PartialOrd for RecordTag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(CopyGetters, Copy, Clone)]
pub struct Utf8<'a> {
    /// Id referenced by other records, e.g. [LoadClass::class_name_id]
    #[get_copy = "pub"]
    name_id: Id,
    text: &'a [u8],
}

impl<'a> Utf8<'a> {
    fn parse(input: &'a [u8], id_size: IdSize) -> ParseResult<'a, Utf8<'a>> {
        let (input, id) = Id::parse_element(input, id_size)?;

        Ok(Utf8 {
            name_id: id,
            text: input,
        })
    }

    /// Note that in practice, there are nonzero Utf8 records with invalid UTF-8 bytes.
    pub fn text_as_str(&self) -> std::result::Result<&'a str, std::str::Utf8Error> {
        std::str::from_utf8(self.text)
    }

    /// Decoded text with invalid byte sequences replaced by U+FFFD.
    pub fn text_lossy(&self) -> std::borrow::Cow<'a, str> {
        String::from_utf8_lossy(self.text)
    }
}

#[derive(CopyGetters, Copy, Clone)]
pub struct LoadClass {
    #[get_copy = "pub"]
    class_serial: Serial,
    /// Matches the class object id in [crate::heap_dump::SubRecord::Class]
    #[get_copy = "pub"]
    class_obj_id: Id,
    #[get_copy = "pub"]
    stack_trace_serial: Serial,
    /// Id of a [Utf8] record holding the class name
    #[get_copy = "pub"]
    class_name_id: Id,
}

impl LoadClass {
    fn parse(input: &[u8], id_size: IdSize) -> ParseResult<LoadClass> {
        let (input, class_serial) = number::be_u32(input)?;
        let (input, class_obj_id) = Id::parse_element(input, id_size)?;
        let (input, stack_trace_serial) = number::be_u32(input)?;
        let (_input, class_name_id) = Id::parse_element(input, id_size)?;

        Ok(LoadClass {
            class_serial,
            class_obj_id,
            stack_trace_serial,
            class_name_id,
        })
    }
}

#[derive(CopyGetters, Copy, Clone)]
pub struct StackFrame {
    #[get_copy = "pub"]
    id: Id,
    /// May point to an empty string
    #[get_copy = "pub"]
    method_name_id: Id,
    #[get_copy = "pub"]
    method_signature_id: Id,
    /// May be a null id
    #[get_copy = "pub"]
    source_file_name_id: Id,
    #[get_copy = "pub"]
    class_serial: Serial,
    #[get_copy = "pub"]
    line_num: LineNum,
}

impl StackFrame {
    fn parse(input: &[u8], id_size: IdSize) -> ParseResult<StackFrame> {
        let (input, id) = Id::parse_element(input, id_size)?;
        let (input, method_name_id) = Id::parse_element(input, id_size)?;
        let (input, method_signature_id) = Id::parse_element(input, id_size)?;
        let (input, source_file_name_id) = Id::parse_element(input, id_size)?;
        let (input, class_serial) = number::be_u32(input)?;
        let (_input, line_num) = LineNum::parse(input)?;

        Ok(StackFrame {
            id,
            method_name_id,
            method_signature_id,
            source_file_name_id,
            class_serial,
            line_num,
        })
    }
}

#[derive(CopyGetters, Clone)]
pub struct StackTrace<'a> {
    id_size: IdSize,
    #[get_copy = "pub"]
    stack_trace_serial: Serial,
    #[get_copy = "pub"]
    thread_serial: Serial,
    num_frame_ids: u32,
    frame_ids: &'a [u8],
}

impl<'a> StackTrace<'a> {
    fn parse(input: &'a [u8], id_size: IdSize) -> ParseResult<'a, StackTrace<'a>> {
        let (input, stack_trace_serial) = number::be_u32(input)?;
        let (input, thread_serial) = number::be_u32(input)?;
        let (input, num_frame_ids) = number::be_u32(input)?;
        let (_input, frame_ids) =
            bytes::take((num_frame_ids as usize) * id_size.size_in_bytes())(input)?;

        Ok(StackTrace {
            id_size,
            stack_trace_serial,
            thread_serial,
            num_frame_ids,
            frame_ids,
        })
    }

    pub fn frame_ids(&self) -> Ids<'a> {
        Ids {
            iter: CountedIter::new(self.id_size, self.frame_ids, self.num_frame_ids),
        }
    }
}

/// Represents either a HPROF_HEAP_DUMP or HPROF_HEAP_DUMP_SEGMENT
pub struct HeapDumpSegment<'a> {
    id_size: IdSize,
    records: &'a [u8],
    // absolute byte offset of the segment body
    offset: usize,
}

impl<'a> HeapDumpSegment<'a> {
    pub fn sub_records(&self) -> SubRecords<'a> {
        SubRecords {
            id_size: self.id_size,
            remaining: self.records,
            offset: self.offset,
        }
    }
}

/// Iterator over the sub-records in a heap dump segment.
pub struct SubRecords<'a> {
    id_size: IdSize,
    remaining: &'a [u8],
    // absolute byte offset of the next sub-record's tag byte
    offset: usize,
}

impl<'a> SubRecords<'a> {
    /// The absolute byte offset of the next sub-record to be yielded.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for SubRecords<'a> {
    type Item = Result<heap_dump::SubRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }

        let res = heap_dump::SubRecord::parse(self.remaining, self.id_size, self.offset);
        match res {
            Ok((input, record)) => {
                self.offset += self.remaining.len() - input.len();
                self.remaining = input;
                Some(Ok(record))
            }
            Err(e) => {
                // sub-records carry no length prefix, so a bad one ends the segment
                self.remaining = &[];
                Some(Err(e))
            }
        }
    }
}

/// Line number for a [StackFrame].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LineNum {
    Normal(u32),
    Unknown,
    CompiledMethod,
    NativeMethod,
}

impl LineNum {
    fn parse(input: &[u8]) -> nom::IResult<&[u8], Self> {
        let (input, num) = number::be_i32(input)?;

        let line_num = match num {
            num if num > 0 => LineNum::Normal(num as u32),
            -1 => LineNum::Unknown,
            -2 => LineNum::CompiledMethod,
            -3 => LineNum::NativeMethod,
            _ => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Verify,
                )))
            }
        };

        Ok((input, line_num))
    }
}

/// Iterator over a sequence of [Id]s.
pub struct Ids<'a> {
    iter: CountedIter<'a, Id>,
}

impl<'a> Iterator for Ids<'a> {
    type Item = ParseResult<'a, Id>;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

pub type ParseResult<'e, T> = std::result::Result<T, nom::Err<nom::error::Error<&'e [u8]>>>;
