//! The URL-encoded form dialect spoken by the HTTP endpoints.
//!
//! A flat `key=value&key=value` form with ordinary percent-encoding. The
//! login endpoint additionally wraps every VALUE in a reversible, URL-safe
//! base64 variant, because the legacy client cannot reliably transmit
//! arbitrary byte values unescaped. The variant substitutes the three
//! characters the client mangles: `=`→`*`, `+`→`.`, `/`→`-`.
//!
//! Whether the transform is applied is fixed per endpoint. Both peers must
//! agree on it out of band; feeding plain values to an obfuscated decoder
//! is a caller error, not a wire-format error.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};

use crate::FormatError;

/// Encoder/decoder for the URL-encoded form dialect.
#[derive(Debug, Clone, Copy)]
pub struct UrlForm {
    obfuscate: bool,
}

impl UrlForm {
    /// A codec that writes values verbatim (modulo percent-encoding).
    pub const fn plain() -> Self {
        Self { obfuscate: false }
    }

    /// A codec that additionally wraps values in substituted base64.
    pub const fn obfuscated() -> Self {
        Self { obfuscate: true }
    }

    /// Encodes an ordered field list into a form string.
    pub fn encode(&self, fields: &[(String, String)]) -> String {
        let mut out = String::new();
        for (i, (name, value)) in fields.iter().enumerate() {
            if i > 0 {
                out.push('&');
            }
            percent_encode(name.as_bytes(), &mut out);
            out.push('=');
            if self.obfuscate {
                percent_encode(obfuscate(value.as_bytes()).as_bytes(), &mut out);
            } else {
                percent_encode(value.as_bytes(), &mut out);
            }
        }
        out
    }

    /// Decodes a form string into its ordered field list.
    pub fn decode(&self, input: &str) -> Result<Vec<(String, String)>, FormatError> {
        if input.is_empty() {
            return Ok(Vec::new());
        }

        let mut fields = Vec::new();
        let mut offset = 0;
        for segment in input.split('&') {
            let Some((raw_name, raw_value)) = segment.split_once('=') else {
                return Err(FormatError::DanglingName { offset });
            };
            if raw_name.is_empty() {
                return Err(FormatError::EmptyName { offset });
            }

            let name = percent_decode(raw_name, offset)?;
            let name = String::from_utf8(name)
                .map_err(|_| FormatError::InvalidText { offset })?;

            let value_off = offset + raw_name.len() + 1;
            let value = percent_decode(raw_value, value_off)?;
            let value = if self.obfuscate {
                deobfuscate(&value, value_off)?
            } else {
                value
            };
            let value = String::from_utf8(value)
                .map_err(|_| FormatError::InvalidText { offset: value_off })?;

            fields.push((name, value));
            offset += segment.len() + 1;
        }
        Ok(fields)
    }
}

/// Base64 with the client-safe substitutions applied.
fn obfuscate(raw: &[u8]) -> String {
    BASE64_STANDARD
        .encode(raw)
        .chars()
        .map(|c| match c {
            '=' => '*',
            '+' => '.',
            '/' => '-',
            other => other,
        })
        .collect()
}

fn deobfuscate(wrapped: &[u8], offset: usize) -> Result<Vec<u8>, FormatError> {
    let unwrapped: String = wrapped
        .iter()
        .map(|&b| match b {
            b'*' => '=',
            b'.' => '+',
            b'-' => '/',
            other => other as char,
        })
        .collect();
    BASE64_STANDARD
        .decode(unwrapped)
        .map_err(|_| FormatError::BadValueTransform { offset })
}

/// The characters written verbatim. Everything else becomes `%XX`, except
/// space, which uses the traditional `+` form encoding.
fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'*')
}

fn percent_encode(raw: &[u8], out: &mut String) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    for &b in raw {
        if is_unreserved(b) {
            out.push(b as char);
        } else if b == b' ' {
            out.push('+');
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0xF) as usize] as char);
        }
    }
}

fn percent_decode(raw: &str, offset: usize) -> Result<Vec<u8>, FormatError> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or(FormatError::BadPercentEscape { offset: offset + i })?;
                out.push(hex);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    Ok(out)
}

// =========================================================================
// Tests
// =========================================================================
