//! Error types for the save-data codec.

/// Errors produced while decoding a save fragment or building a payload.
///
/// A `CodecError` surfaces to the content endpoint as an upload rejection;
/// it never partially commits a player transition.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The record buffer has the wrong total size.
    #[error("record is {actual} bytes, expected {expected}")]
    WrongLength { expected: usize, actual: usize },

    /// A decrypt call named a range outside the buffer.
    #[error("decrypt range {offset}+{length} out of bounds for {buffer}-byte buffer")]
    RangeOutOfBounds {
        offset: usize,
        length: usize,
        buffer: usize,
    },

    /// The keystream works on 16-bit words; odd lengths are unrepresentable.
    #[error("decrypt length {0} is odd")]
    OddLength(usize),

    /// The decrypted block data does not sum to the stored checksum.
    #[error("block checksum mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { stored: u16, computed: u16 },

    /// A decoded field lies outside the range the client firmware accepts.
    #[error("{field} {value} is outside the legal range {min}..={max}")]
    FieldOutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    /// A decoded string field was not valid UTF-16.
    #[error("{field} is not valid UTF-16 text")]
    InvalidString { field: &'static str },

    /// A dream-content collection would exceed its fixed slot count.
    #[error("too many {what}: the payload has room for {max}")]
    LimitExceeded { what: &'static str, max: usize },

    /// A dream-content scalar lies outside its encodable range.
    #[error("{what} {value} is above the maximum of {max}")]
    ValueTooLarge {
        what: &'static str,
        value: u32,
        max: u32,
    },
}
