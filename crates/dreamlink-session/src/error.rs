//! Error types for the session layer.

/// A failure at the external persistence boundary.
///
/// The store contract is exception-free: every outcome crosses the
/// boundary as a value. When a put fails the in-memory state keeps its
/// prior value and the whole operation is reported failed, so the client
/// retries against a consistent world.
#[derive(Debug, Clone, thiserror::Error)]
#[error("store failure for {kind} record `{id}`: {reason}")]
pub struct StoreError {
    pub kind: &'static str,
    pub id: String,
    pub reason: String,
}

/// Errors produced by the identity, player and session registries.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The id does not have the shape this record kind requires.
    #[error("`{0}` is not a well-formed id")]
    BadId(String),

    /// A record with this id already exists.
    #[error("id `{0}` is already registered")]
    DuplicateId(String),

    /// No user with this id exists.
    #[error("unknown user `{0}`")]
    UnknownUser(String),

    /// No player with this game-sync id exists.
    #[error("unknown player `{0}`")]
    UnknownPlayer(String),

    /// The user exists but the presented secret does not match.
    #[error("bad credentials for user `{0}`")]
    BadCredentials(String),

    /// The player is not in a lifecycle state that permits the operation.
    #[error("player `{id}` is {actual}, operation requires {required}")]
    WrongStatus {
        id: String,
        actual: &'static str,
        required: &'static str,
    },

    /// The external store reported a failure; nothing was committed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
