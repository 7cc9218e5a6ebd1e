//! The challenge-response proof construction.
//!
//! The login service hands the client a plaintext challenge over HTTP and
//! stores only its digest. When the client later logs into the match
//! service it proves knowledge of that challenge without a shared database
//! row: both sides compute
//!
//! ```text
//! md5( md5(challenge) || 48 spaces || user id || first || second )
//! ```
//!
//! where `first`/`second` are the two per-connection challenges. The
//! client proof puts its own challenge first; the server's answering proof
//! swaps the order. The construction is fixed by the client firmware.

use md5::{Digest, Md5};

/// The 48-space padding block between the digest and the user id.
const PROOF_PADDING: &str = "                                                ";

/// Lowercase hex MD5 of arbitrary text.
pub fn md5_hex(data: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(data.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// The digest of a plaintext challenge, as stored in a service session.
pub fn challenge_hash(challenge: &str) -> String {
    md5_hex(challenge)
}

/// Computes a login proof.
///
/// For verifying a CLIENT's submission, `first` is the client challenge
/// and `second` the server challenge; for the server's answering proof the
/// two are swapped.
pub fn login_proof(
    challenge_hash: &str,
    user_id: &str,
    first: &str,
    second: &str,
) -> String {
    md5_hex(&format!(
        "{challenge_hash}{PROOF_PADDING}{user_id}{first}{second}"
    ))
}

// =========================================================================
// Tests
// =========================================================================
