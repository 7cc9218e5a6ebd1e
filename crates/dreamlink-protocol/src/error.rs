//! Error types for the wire dialects.
//!
//! Everything here is a `FormatError`: the bytes on the wire are malformed
//! or a decoded message is missing a required piece. A `FormatError` is
//! always fatal to the current message, never (by itself) to a connection.

/// Errors produced while decoding one of the legacy wire dialects.
///
/// Variants that point at raw bytes carry the byte offset of the offending
/// segment so malformed traffic can be diagnosed from logs alone.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The message does not start with the escape byte.
    #[error("message does not start with the escape byte (offset {offset})")]
    MissingLeadingEscape { offset: usize },

    /// The message is not terminated by the end marker.
    #[error("message is missing the `\\final\\` terminator")]
    MissingTerminator,

    /// A field name segment was empty.
    #[error("empty field name at byte offset {offset}")]
    EmptyName { offset: usize },

    /// A field name was not followed by a value segment.
    #[error("field name at byte offset {offset} has no value")]
    DanglingName { offset: usize },

    /// A segment was not valid text.
    #[error("invalid text at byte offset {offset}")]
    InvalidText { offset: usize },

    /// A `%XX` escape did not contain two hex digits.
    #[error("invalid percent escape at byte offset {offset}")]
    BadPercentEscape { offset: usize },

    /// A value failed the reversible obfuscation transform.
    #[error("value at byte offset {offset} is not valid obfuscated base64")]
    BadValueTransform { offset: usize },

    /// The message's discriminator field names no known message kind.
    #[error("unknown message kind `{0}`")]
    UnknownKind(String),

    /// A decoded message was missing a required field.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// A field was present but its value could not be interpreted.
    #[error("field `{0}` has an invalid value")]
    InvalidField(&'static str),
}
