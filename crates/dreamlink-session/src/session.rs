//! Service session types.
//!
//! A service session is the hand-off credential between protocol
//! endpoints: the login service issues it over HTTP, and a completely
//! different transport later redeems it. It binds an identity to exactly
//! one target service for a fixed window.

use std::time::{Duration, Instant};

/// Target service name for the binary-TCP match service.
pub const SERVICE_MATCH: &str = "match";

/// Target service name for the content (Dream World) endpoint.
pub const SERVICE_CONTENT: &str = "content";

/// Configuration for session issuance.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long an issued token stays redeemable.
    ///
    /// Default: 30 minutes, matching the original service's observed TTL.
    pub ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
        }
    }
}

/// A live hand-off credential.
///
/// Immutable after creation; expiry is implicit in `expires_at` and
/// enforced lazily at lookup time.
#[derive(Debug, Clone)]
pub struct ServiceSession {
    /// The opaque token the client presents at the second hop.
    pub token: String,

    /// The identity this session authenticates.
    pub user_id: String,

    /// The only service allowed to redeem this token.
    pub service: String,

    /// The game-variant namespace the login named.
    pub branch: String,

    /// Digest of the plaintext challenge handed to the client. The
    /// plaintext itself is never stored.
    pub challenge_hash: String,

    /// When the session was issued.
    pub issued_at: Instant,

    /// When the session stops being redeemable.
    pub expires_at: Instant,
}

impl ServiceSession {
    /// Whether the session has outlived its TTL.
    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}
