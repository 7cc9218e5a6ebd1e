//! The escaped key/value dialect spoken by the binary-TCP match service.
//!
//! A message is a flat, ordered list of fields. Each field is written as
//! `\name\value` and the whole message ends with the `\final\` marker:
//!
//! ```text
//! \login\\challenge\OFBYXWJG\authtoken\5b1c…\final\
//! ```
//!
//! The format has no internal escaping and no nesting. The message kind is
//! carried by the NAME of the first field, whose value is usually empty.
//! Values may be empty; names may not.

use crate::FormatError;

/// The field delimiter.
pub const ESCAPE: u8 = b'\\';

/// The message terminator.
pub const TERMINATOR: &[u8] = b"\\final\\";

/// Encoder/decoder for the escaped key/value dialect.
///
/// Both directions are stateless; the type exists only as a namespace,
/// mirroring how the rest of the protocol layer is organized.
#[derive(Debug, Clone, Copy, Default)]
pub struct EscapedForm;

impl EscapedForm {
    /// Encodes an ordered field list into a terminated message.
    ///
    /// # Panics
    ///
    /// The dialect cannot represent the escape byte inside a name or value,
    /// nor an empty name. Passing either is a programmer error and panics
    /// rather than producing a frame the fixed client would misparse.
    pub fn encode(fields: &[(String, String)]) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            fields
                .iter()
                .map(|(n, v)| n.len() + v.len() + 2)
                .sum::<usize>()
                + TERMINATOR.len(),
        );

        for (name, value) in fields {
            assert!(!name.is_empty(), "escaped-form field name must not be empty");
            assert!(
                !name.as_bytes().contains(&ESCAPE),
                "escaped-form field name `{name}` contains the escape byte"
            );
            assert!(
                !value.as_bytes().contains(&ESCAPE),
                "escaped-form value for `{name}` contains the escape byte"
            );
            out.push(ESCAPE);
            out.extend_from_slice(name.as_bytes());
            out.push(ESCAPE);
            out.extend_from_slice(value.as_bytes());
        }

        out.extend_from_slice(TERMINATOR);
        out
    }

    /// Decodes a terminated message into its ordered field list.
    ///
    /// Errors carry the byte offset of the offending segment.
    pub fn decode(bytes: &[u8]) -> Result<Vec<(String, String)>, FormatError> {
        let body = bytes
            .strip_suffix(TERMINATOR)
            .ok_or(FormatError::MissingTerminator)?;

        if body.is_empty() {
            return Ok(Vec::new());
        }
        if body[0] != ESCAPE {
            return Err(FormatError::MissingLeadingEscape { offset: 0 });
        }

        // Walk segment by segment rather than splitting, so every error can
        // report where in the raw bytes it happened.
        let mut fields = Vec::new();
        let mut pos = 1; // past the leading escape
        loop {
            let (name, name_off) = next_segment(body, pos);
            if name.is_empty() {
                return Err(FormatError::EmptyName { offset: name_off });
            }
            pos = name_off + name.len();
            if pos >= body.len() {
                // Name ran to the end of the body: no value segment follows.
                return Err(FormatError::DanglingName { offset: name_off });
            }
            pos += 1; // the escape between name and value

            let (value, value_off) = next_segment(body, pos);
            pos = value_off + value.len();

            fields.push((
                text(name, name_off)?.to_owned(),
                text(value, value_off)?.to_owned(),
            ));

            if pos >= body.len() {
                return Ok(fields);
            }
            pos += 1; // the escape opening the next field
        }
    }
}

/// Returns the segment starting at `pos` (up to the next escape or the end
/// of `body`) together with its offset.
fn next_segment(body: &[u8], pos: usize) -> (&[u8], usize) {
    let end = body[pos..]
        .iter()
        .position(|&b| b == ESCAPE)
        .map_or(body.len(), |i| pos + i);
    (&body[pos..end], pos)
}

fn text(segment: &[u8], offset: usize) -> Result<&str, FormatError> {
    std::str::from_utf8(segment).map_err(|_| FormatError::InvalidText { offset })
}

// =========================================================================
// Tests
// =========================================================================
