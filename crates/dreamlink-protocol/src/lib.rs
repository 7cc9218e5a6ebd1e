//! Wire protocol for Dreamlink.
//!
//! The legacy ecosystem speaks three serialization dialects, one per
//! endpoint, and this crate owns the two text-based ones plus the typed
//! messages of the binary-TCP match service:
//!
//! - **[`EscapedForm`]**: the `\name\value…\final\` dialect of the match
//!   service. Flat, ordered, no internal escaping.
//! - **[`UrlForm`]**: the percent-encoded form dialect of the HTTP
//!   endpoints, with an optional reversible value obfuscation used by the
//!   login endpoint.
//! - **[`MatchRequest`] / [`MatchReply`]**: the closed message set of the
//!   match service, decoded by exhaustive match on the wire discriminator.
//!
//! The binary save-data codec lives in its own crate (`dreamlink-dream`);
//! it is a byte-blob transform, not a field dialect.
//!
//! ```text
//! Transport (frames) → Protocol (fields, messages) → Handlers (state)
//! ```

mod error;
mod escaped;
mod message;
mod urlform;

pub use error::FormatError;
pub use escaped::{EscapedForm, ESCAPE, TERMINATOR};
pub use message::{MatchReply, MatchRequest};
pub use urlform::UrlForm;
