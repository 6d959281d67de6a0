use crate::Id;
use thiserror::Error;

/// Errors produced while decoding a dump or resolving the object graph.
///
/// Decode errors carry the absolute byte offset of the record (or sub-record)
/// that failed so corrupt dumps can be reported precisely. There is no
/// partial-success mode: any error from [`crate::Snapshot::parse`] means the
/// snapshot was discarded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HprofError {
    /// The header label/id-width/timestamp preamble could not be read.
    #[error("invalid hprof header: {0}")]
    InvalidHeader(String),

    /// End of input hit in the middle of a record. Running out of input
    /// *between* top-level records is a normal end of stream, not this.
    #[error("truncated input at offset {offset:#x} while reading record tag {tag:#04x}")]
    Truncated { offset: usize, tag: u8 },

    /// A heap dump sub-record tag with no registered reader. Fatal: without
    /// type-specific knowledge the sub-record's size is unknowable, so the
    /// segment's remaining-length bookkeeping cannot continue.
    #[error("unknown heap dump sub-record tag {tag:#04x} at offset {offset:#x}")]
    UnknownSubRecord { offset: usize, tag: u8 },

    /// A recognized but unsupported sub-record (primitive-array-nodata).
    #[error("unsupported heap dump sub-record tag {tag:#04x} at offset {offset:#x}")]
    UnsupportedSubRecord { offset: usize, tag: u8 },

    /// A field/static/constant-pool type tag outside the fixed width table.
    #[error("invalid field type tag {tag:#04x} at offset {offset:#x}")]
    InvalidTypeTag { offset: usize, tag: u8 },

    /// The header declared an identifier width other than 1, 2, 4 or 8.
    #[error("unsupported identifier size {0}")]
    UnsupportedIdSize(u32),

    /// A stored reference id had no defining record anywhere in the dump.
    /// Null ids (zero) are legal and resolve to nothing; a nonzero id with
    /// no target is a model violation, not a silently-dropped edge.
    #[error("dangling reference: object {referrer} refers to undefined id {id}")]
    DanglingReference { id: Id, referrer: Id },

    /// A GC root named a nonzero object id with no defining record.
    #[error("gc root refers to undefined id {id}")]
    DanglingRoot { id: Id },

    /// An instance dump named a class id with no class dump.
    #[error("object {obj_id} is an instance of undefined class {class_id}")]
    MissingClass { class_id: Id, obj_id: Id },

    /// An instance dump's packed field bytes ran out before the field
    /// descriptors declared by its class hierarchy were satisfied.
    #[error("object {obj_id}: packed field data shorter than declared fields")]
    FieldBytesExhausted { obj_id: Id },
}

pub type Result<T> = std::result::Result<T, HprofError>;
