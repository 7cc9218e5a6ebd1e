//! Unified error type for the Dreamlink server.

use dreamlink_dream::CodecError;
use dreamlink_protocol::FormatError;
use dreamlink_session::{SessionError, StoreError};
use dreamlink_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `dreamlink` meta-crate, you deal with this single
/// error type instead of importing errors from each sub-crate.
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum DreamlinkError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A wire-format error (malformed fields, bad message).
    #[error(transparent)]
    Format(#[from] FormatError),

    /// A session/identity/player registry error.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// An external persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A save-data codec failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The HTTP listener could not be started.
    #[error("http bind failed: {0}")]
    HttpBind(String),
}
