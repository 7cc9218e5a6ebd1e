//! The session registry: issues and redeems hand-off tokens.
//!
//! # Concurrency note
//!
//! `SessionRegistry` is NOT thread-safe by itself; it is owned by the
//! server state and guarded by a single async mutex there. That one lock
//! already gives every token lookup per-key linearizability, so the maps
//! inside stay plain.

use std::collections::HashMap;
use std::time::Instant;

use rand::Rng;

use crate::{challenge_hash, ServiceSession, SessionConfig};

/// Alphabet for plaintext challenges: the fixed client only handles
/// uppercase ASCII here.
const CHALLENGE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const CHALLENGE_LEN: usize = 10;

/// Issues, redeems and expires service sessions.
pub struct SessionRegistry {
    sessions: HashMap<String, ServiceSession>,
    config: SessionConfig,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            config,
        }
    }

    /// Issues a fresh session and returns `(token, plaintext challenge)`.
    ///
    /// The token has 128 bits of entropy, so collisions are practically
    /// impossible; the contract nevertheless requires detection, so the
    /// generator retries while the token is taken.
    pub fn issue(
        &mut self,
        user_id: &str,
        service: &str,
        branch: &str,
    ) -> (String, String) {
        let mut token = generate_token();
        while self.sessions.contains_key(&token) {
            token = generate_token();
        }

        let challenge = generate_challenge();
        let now = Instant::now();
        let session = ServiceSession {
            token: token.clone(),
            user_id: user_id.to_owned(),
            service: service.to_owned(),
            branch: branch.to_owned(),
            challenge_hash: challenge_hash(&challenge),
            issued_at: now,
            expires_at: now + self.config.ttl,
        };
        self.sessions.insert(token.clone(), session);

        tracing::debug!(%user_id, service, branch, "session issued");
        (token, challenge)
    }

    /// Looks up a live session for the given target service.
    ///
    /// Returns `None` for an unknown token, a token scoped to a different
    /// service, or an expired token (which is evicted on the spot). The
    /// session stays registered: the content endpoint presents the same
    /// token on every operation within the TTL.
    pub fn get_valid(&mut self, token: &str, service: &str) -> Option<ServiceSession> {
        let session = self.sessions.get(token)?;

        if session.is_expired(Instant::now()) {
            tracing::debug!(user_id = %session.user_id, "evicting expired session");
            self.sessions.remove(token);
            return None;
        }
        if session.service != service {
            return None;
        }

        self.sessions.get(token).cloned()
    }

    /// Removes a session outright.
    ///
    /// The match service calls this after a successful challenge-response
    /// login; from then on the token is spent and a replayed login fails.
    pub fn consume(&mut self, token: &str) -> Option<ServiceSession> {
        self.sessions.remove(token)
    }

    /// Evicts every expired session. Lazy lookup expiry already keeps the
    /// registry correct; this only reclaims memory.
    pub fn sweep(&mut self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired(now));
        before - self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// A fresh 10-character uppercase challenge, as used both for session
/// issuance and for the match service's per-connection greeting.
pub fn generate_challenge() -> String {
    let mut rng = rand::rng();
    (0..CHALLENGE_LEN)
        .map(|_| CHALLENGE_ALPHABET[rng.random_range(0..CHALLENGE_ALPHABET.len())] as char)
        .collect()
}

/// A 32-character hex token: 128 bits of entropy.
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// =========================================================================
// Tests
// =========================================================================
