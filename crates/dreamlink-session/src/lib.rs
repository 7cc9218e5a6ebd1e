//! Session and identity management for Dreamlink.
//!
//! This crate owns the single shared mutable resource of the system:
//!
//! 1. **Service sessions**: short-lived opaque tokens that hand a login
//!    off between independent protocol endpoints ([`SessionRegistry`])
//! 2. **Identities**: users and their per-branch game profiles
//!    ([`UserRegistry`])
//! 3. **Players**: Game Sync accounts and their dream lifecycle
//!    ([`PlayerRegistry`])
//! 4. **The proof construction**: the challenge-response digest both the
//!    login and match services compute ([`login_proof`])
//!
//! Long-lived records persist through the [`RecordStore`] boundary; the
//! registries themselves are plain maps that the server guards with one
//! async mutex each. No process-wide statics: every registry is an
//! explicitly constructed, explicitly owned value so tests run with
//! isolated stores.

mod error;
mod identity;
mod player;
mod proof;
mod registry;
mod session;
mod store;

pub use error::{SessionError, StoreError};
pub use identity::{
    is_valid_user_id, GameProfile, ProfileChanges, User, UserRegistry,
};
pub use player::{
    is_valid_sync_id, Player, PlayerRegistry, PlayerStatus, SYNC_ID_LEN,
};
pub use proof::{challenge_hash, login_proof, md5_hex};
pub use registry::{generate_challenge, SessionRegistry};
pub use session::{
    ServiceSession, SessionConfig, SERVICE_CONTENT, SERVICE_MATCH,
};
pub use store::{MemoryStore, RecordStore};
