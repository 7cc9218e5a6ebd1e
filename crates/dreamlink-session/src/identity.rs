//! Identities and game profiles.
//!
//! A user is the long-lived account: a 13-digit id, a shared secret, and
//! one profile per branch (game variant). Profiles carry the
//! client-visible 31-bit profile id plus optional contact fields.
//!
//! Every mutation persists through the external store BEFORE the
//! in-memory commit; a failed persist leaves the prior state observable.

use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{RecordStore, SessionError, StoreError};

/// Store namespace for user records.
const USER_KIND: &str = "user";

/// A per-branch game profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameProfile {
    /// Client-visible 31-bit profile id.
    pub id: u32,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    pub postal_code: Option<String>,
}

impl GameProfile {
    fn with_id(id: u32) -> Self {
        Self {
            id,
            first_name: None,
            last_name: None,
            display_name: None,
            postal_code: None,
        }
    }
}

/// The optional field set a profile update may carry. Only present fields
/// are applied, and only when they differ from the current value.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    pub postal_code: Option<String>,
}

/// A long-lived identity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub secret: String,
    /// One profile per branch name.
    pub profiles: HashMap<String, GameProfile>,
}

/// Whether an id is a well-formed user id: exactly 13 ASCII digits.
pub fn is_valid_user_id(id: &str) -> bool {
    id.len() == 13 && id.bytes().all(|b| b.is_ascii_digit())
}

/// Registry of identities, backed by the external store.
///
/// Like the session registry this is a plain map owned by the server
/// state and guarded by one async mutex there.
pub struct UserRegistry<S: RecordStore> {
    users: HashMap<String, User>,
    /// Pending administrative profile-id overrides, keyed by
    /// (user id, branch). Applied and cleared at the next profile
    /// resolution; this is the out-of-band recovery mechanism.
    overrides: HashMap<(String, String), u32>,
    store: S,
}

impl<S: RecordStore> UserRegistry<S> {
    pub fn new(store: S) -> Self {
        Self {
            users: HashMap::new(),
            overrides: HashMap::new(),
            store,
        }
    }

    /// Registers a new identity.
    pub async fn register(&mut self, id: &str, secret: &str) -> Result<(), SessionError> {
        if !is_valid_user_id(id) {
            return Err(SessionError::BadId(id.to_owned()));
        }
        if self.lookup(id).await.is_some() {
            return Err(SessionError::DuplicateId(id.to_owned()));
        }

        let user = User {
            id: id.to_owned(),
            secret: secret.to_owned(),
            profiles: HashMap::new(),
        };
        self.persist(&user).await?;
        self.users.insert(id.to_owned(), user);

        tracing::info!(user_id = %id, "user registered");
        Ok(())
    }

    /// Checks credentials; returns a snapshot of the identity on success.
    pub async fn authenticate(&mut self, id: &str, secret: &str) -> Option<User> {
        let user = self.lookup(id).await?;
        if user.secret == secret {
            Some(user.clone())
        } else {
            None
        }
    }

    /// Returns whether an identity exists (store-backed).
    pub async fn exists(&mut self, id: &str) -> bool {
        self.lookup(id).await.is_some()
    }

    /// Resolves the profile for `(user, branch)`, creating it lazily.
    ///
    /// A pending administrative override is applied and cleared here, on
    /// both the lazy-create and the already-exists paths.
    pub async fn ensure_profile(
        &mut self,
        id: &str,
        branch: &str,
    ) -> Result<GameProfile, SessionError> {
        if self.lookup(id).await.is_none() {
            return Err(SessionError::UnknownUser(id.to_owned()));
        }

        let override_key = (id.to_owned(), branch.to_owned());
        let override_id = self.overrides.get(&override_key).copied();
        let user = self.users.get(id).expect("looked up above");

        let mut updated = user.clone();
        let profile = match updated.profiles.get_mut(branch) {
            Some(profile) => {
                if let Some(new_id) = override_id {
                    tracing::info!(
                        user_id = %id,
                        branch,
                        profile_id = new_id,
                        "applying administrative profile-id override"
                    );
                    profile.id = new_id;
                }
                profile.clone()
            }
            None => {
                let profile =
                    GameProfile::with_id(override_id.unwrap_or_else(generate_profile_id));
                updated
                    .profiles
                    .insert(branch.to_owned(), profile.clone());
                tracing::info!(user_id = %id, branch, profile_id = profile.id, "profile created");
                profile
            }
        };

        if updated != *self.users.get(id).expect("looked up above") {
            self.persist(&updated).await?;
            self.users.insert(id.to_owned(), updated);
        }
        // The override is pending until a resolution actually commits (or
        // finds nothing to change); a failed persist keeps it queued.
        self.overrides.remove(&override_key);
        Ok(profile)
    }

    /// Queues an administrative profile-id override for the next login.
    pub fn set_profile_override(&mut self, id: &str, branch: &str, profile_id: u32) {
        self.overrides
            .insert((id.to_owned(), branch.to_owned()), profile_id);
    }

    /// Applies a profile update; persists once iff anything changed.
    ///
    /// Returns whether a change was committed.
    pub async fn update_profile(
        &mut self,
        id: &str,
        branch: &str,
        changes: &ProfileChanges,
    ) -> Result<bool, SessionError> {
        if self.lookup(id).await.is_none() {
            return Err(SessionError::UnknownUser(id.to_owned()));
        }
        let user = self.users.get(id).expect("looked up above");

        let mut updated = user.clone();
        let Some(profile) = updated.profiles.get_mut(branch) else {
            return Err(SessionError::UnknownUser(id.to_owned()));
        };

        let mut changed = false;
        changed |= apply_field(&mut profile.first_name, &changes.first_name);
        changed |= apply_field(&mut profile.last_name, &changes.last_name);
        changed |= apply_field(&mut profile.display_name, &changes.display_name);
        changed |= apply_field(&mut profile.postal_code, &changes.postal_code);

        if changed {
            self.persist(&updated).await?;
            self.users.insert(id.to_owned(), updated);
            tracing::debug!(user_id = %id, branch, "profile updated");
        }
        Ok(changed)
    }

    /// Fetches a snapshot of a user, hydrating from the store on a miss.
    pub async fn get(&mut self, id: &str) -> Option<User> {
        self.lookup(id).await.cloned()
    }

    async fn lookup(&mut self, id: &str) -> Option<&User> {
        if !self.users.contains_key(id) {
            let bytes = self.store.get(USER_KIND, id).await?;
            match serde_json::from_slice::<User>(&bytes) {
                Ok(user) => {
                    self.users.insert(id.to_owned(), user);
                }
                Err(e) => {
                    tracing::warn!(user_id = %id, error = %e, "unreadable user record");
                    return None;
                }
            }
        }
        self.users.get(id)
    }

    async fn persist(&self, user: &User) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(user).map_err(|e| StoreError {
            kind: USER_KIND,
            id: user.id.clone(),
            reason: e.to_string(),
        })?;
        self.store.put(USER_KIND, &user.id, bytes).await
    }
}

/// Applies one optional field; returns whether the value changed.
fn apply_field(current: &mut Option<String>, incoming: &Option<String>) -> bool {
    match incoming {
        Some(value) if current.as_deref() != Some(value) => {
            *current = Some(value.clone());
            true
        }
        _ => false,
    }
}

/// Fresh 31-bit profile id: the client treats the id as a signed 32-bit
/// value, so the top bit stays clear.
fn generate_profile_id() -> u32 {
    rand::rng().random_range(1..0x8000_0000u32)
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    const UID: &str = "4225551234567";

    fn registry() -> UserRegistry<MemoryStore> {
        UserRegistry::new(MemoryStore::new())
    }

    /// A store whose puts always fail, for persist-before-commit tests.
    struct BrokenStore;

    impl RecordStore for BrokenStore {
        async fn get(&self, _kind: &str, _id: &str) -> Option<Vec<u8>> {
            None
        }

        async fn put(
            &self,
            kind: &str,
            id: &str,
            _bytes: Vec<u8>,
        ) -> Result<(), StoreError> {
            Err(StoreError {
                kind: "user",
                id: id.to_owned(),
                reason: format!("disk on fire while writing {kind}"),
            })
        }

        async fn exists(&self, _kind: &str, _id: &str) -> bool {
            false
        }
    }

    #[test]
    fn test_is_valid_user_id_requires_13_digits() {
        assert!(is_valid_user_id("4225551234567"));
        assert!(!is_valid_user_id("422555123456"));
        assert!(!is_valid_user_id("42255512345678"));
        assert!(!is_valid_user_id("422555123456a"));
        assert!(!is_valid_user_id(""));
    }

    #[tokio::test]
    async fn test_register_then_authenticate_succeeds() {
        let mut reg = registry();
        reg.register(UID, "000").await.unwrap();
        let user = reg.authenticate(UID, "000").await.expect("valid login");
        assert_eq!(user.id, UID);
    }

    #[tokio::test]
    async fn test_register_duplicate_rejected() {
        let mut reg = registry();
        reg.register(UID, "000").await.unwrap();
        let result = reg.register(UID, "111").await;
        assert!(matches!(result, Err(SessionError::DuplicateId(_))));
    }

    #[tokio::test]
    async fn test_register_malformed_id_rejected() {
        let mut reg = registry();
        let result = reg.register("short", "000").await;
        assert!(matches!(result, Err(SessionError::BadId(_))));
    }

    #[tokio::test]
    async fn test_authenticate_wrong_secret_fails() {
        let mut reg = registry();
        reg.register(UID, "000").await.unwrap();
        assert!(reg.authenticate(UID, "001").await.is_none());
    }

    #[tokio::test]
    async fn test_authenticate_unknown_user_fails() {
        let mut reg = registry();
        assert!(reg.authenticate(UID, "000").await.is_none());
    }

    #[tokio::test]
    async fn test_ensure_profile_creates_lazily_and_is_stable() {
        let mut reg = registry();
        reg.register(UID, "000").await.unwrap();

        let first = reg.ensure_profile(UID, "branchA").await.unwrap();
        assert!(first.id > 0 && first.id < 0x8000_0000);

        let second = reg.ensure_profile(UID, "branchA").await.unwrap();
        assert_eq!(first.id, second.id, "profile id must be stable per branch");
    }

    #[tokio::test]
    async fn test_ensure_profile_separate_per_branch() {
        let mut reg = registry();
        reg.register(UID, "000").await.unwrap();
        let a = reg.ensure_profile(UID, "branchA").await.unwrap();
        let b = reg.ensure_profile(UID, "branchB").await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_ensure_profile_applies_and_clears_override() {
        let mut reg = registry();
        reg.register(UID, "000").await.unwrap();
        reg.ensure_profile(UID, "branchA").await.unwrap();

        reg.set_profile_override(UID, "branchA", 777);
        let overridden = reg.ensure_profile(UID, "branchA").await.unwrap();
        assert_eq!(overridden.id, 777);

        // Cleared: the next resolution keeps the overridden id but no
        // longer rewrites it.
        let after = reg.ensure_profile(UID, "branchA").await.unwrap();
        assert_eq!(after.id, 777);
    }

    #[tokio::test]
    async fn test_update_profile_applies_only_differing_fields() {
        let mut reg = registry();
        reg.register(UID, "000").await.unwrap();
        reg.ensure_profile(UID, "branchA").await.unwrap();

        let changed = reg
            .update_profile(
                UID,
                "branchA",
                &ProfileChanges {
                    first_name: Some("Ash".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(changed);

        // Same value again: nothing to commit.
        let changed = reg
            .update_profile(
                UID,
                "branchA",
                &ProfileChanges {
                    first_name: Some("Ash".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!changed);
    }

    #[tokio::test]
    async fn test_update_profile_without_profile_fails() {
        let mut reg = registry();
        reg.register(UID, "000").await.unwrap();
        let result = reg
            .update_profile(UID, "branchA", &ProfileChanges::default())
            .await;
        assert!(matches!(result, Err(SessionError::UnknownUser(_))));
    }

    #[tokio::test]
    async fn test_register_failed_persist_leaves_no_user() {
        let mut reg = UserRegistry::new(BrokenStore);
        let result = reg.register(UID, "000").await;
        assert!(matches!(result, Err(SessionError::Store(_))));
        // The failed write must not be observable.
        assert!(reg.authenticate(UID, "000").await.is_none());
    }

    #[tokio::test]
    async fn test_records_survive_registry_restart() {
        // Two registries sharing one store: what the first persists, the
        // second can hydrate.
        let store = std::sync::Arc::new(MemoryStore::new());
        let mut first = UserRegistry::new(std::sync::Arc::clone(&store));
        first.register(UID, "000").await.unwrap();

        let mut second = UserRegistry::new(store);
        assert!(second.authenticate(UID, "000").await.is_some());
    }
}
