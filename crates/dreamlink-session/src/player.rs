//! Players: the Game Sync accounts that own dream content.
//!
//! A player is keyed by its game-sync id, a 10-character identifier from
//! a restricted alphabet (digits and uppercase letters minus the easily
//! confused `I` and `O`). Its lifecycle cycles through
//!
//! ```text
//! Awake ──upload──→ Sleeping ──dashboard──→ Dreaming ──download──→ WakeReady
//!   ↑                                                                  │
//!   └────────────────────────── finish/reset ──────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use dreamlink_dream::{DreamContent, GameVariant, PkmnRecord};

use crate::{RecordStore, SessionError, StoreError};

const PLAYER_KIND: &str = "player";
const DREAM_DATA_KIND: &str = "dream-data";

/// Length of a game-sync id.
pub const SYNC_ID_LEN: usize = 10;

/// The lifecycle state of a player's dream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerStatus {
    /// Nothing tucked in; uploads are accepted.
    Awake,
    /// A save fragment was uploaded and decoded.
    Sleeping,
    /// The external dashboard is arranging dream content.
    Dreaming,
    /// Content is staged; the next download delivers it.
    WakeReady,
}

impl PlayerStatus {
    /// Returns `true` if an upload may start a new dream.
    pub fn accepts_upload(self) -> bool {
        matches!(self, Self::Awake)
    }

    /// Returns `true` if a download has content to deliver.
    pub fn has_dream(self) -> bool {
        !matches!(self, Self::Awake)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Awake => "Awake",
            Self::Sleeping => "Sleeping",
            Self::Dreaming => "Dreaming",
            Self::WakeReady => "WakeReady",
        }
    }
}

impl std::fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A Game Sync account and its dream state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub game_version: GameVariant,
    pub status: PlayerStatus,
    /// The creature recovered from the last upload, if any.
    pub pkmn: Option<PkmnRecord>,
    pub content: DreamContent,
}

/// Whether an id is a well-formed game-sync id.
pub fn is_valid_sync_id(id: &str) -> bool {
    id.len() == SYNC_ID_LEN
        && id.bytes().all(|b| {
            (b.is_ascii_digit() || b.is_ascii_uppercase()) && b != b'I' && b != b'O'
        })
}

/// Registry of players, backed by the external store.
pub struct PlayerRegistry<S: RecordStore> {
    players: std::collections::HashMap<String, Player>,
    store: S,
}

impl<S: RecordStore> PlayerRegistry<S> {
    pub fn new(store: S) -> Self {
        Self {
            players: std::collections::HashMap::new(),
            store,
        }
    }

    /// Registers a new player in the `Awake` state.
    pub async fn create(
        &mut self,
        id: &str,
        game_version: GameVariant,
    ) -> Result<(), SessionError> {
        if !is_valid_sync_id(id) {
            return Err(SessionError::BadId(id.to_owned()));
        }
        if self.lookup(id).await.is_some() {
            return Err(SessionError::DuplicateId(id.to_owned()));
        }

        let player = Player {
            id: id.to_owned(),
            game_version,
            status: PlayerStatus::Awake,
            pkmn: None,
            content: DreamContent::default(),
        };
        self.persist(&player).await?;
        self.players.insert(id.to_owned(), player);

        tracing::info!(sync_id = %id, "player created");
        Ok(())
    }

    /// Fetches a snapshot of a player, hydrating from the store on a miss.
    pub async fn get(&mut self, id: &str) -> Option<Player> {
        self.lookup(id).await.cloned()
    }

    /// Commits an upload: stores the raw fragment, attaches the decoded
    /// creature, and moves the player to `Sleeping`.
    ///
    /// `allow_overwrite` is the policy switch that lets a player who never
    /// woke up re-upload; without it a non-`Awake` player is rejected.
    pub async fn begin_sleep(
        &mut self,
        id: &str,
        pkmn: PkmnRecord,
        raw_fragment: &[u8],
        allow_overwrite: bool,
    ) -> Result<(), SessionError> {
        let player = self
            .lookup(id)
            .await
            .ok_or_else(|| SessionError::UnknownPlayer(id.to_owned()))?;

        if !player.status.accepts_upload() && !allow_overwrite {
            return Err(SessionError::WrongStatus {
                id: id.to_owned(),
                actual: player.status.name(),
                required: PlayerStatus::Awake.name(),
            });
        }

        let mut updated = player.clone();
        updated.pkmn = Some(pkmn);
        updated.status = PlayerStatus::Sleeping;
        updated.content = DreamContent::default();

        // Both writes go to the store before the in-memory commit; a
        // failure leaves the player exactly as it was.
        self.store
            .put(DREAM_DATA_KIND, id, raw_fragment.to_vec())
            .await?;
        self.persist(&updated).await?;
        self.players.insert(id.to_owned(), updated);

        tracing::info!(sync_id = %id, "player tucked in");
        Ok(())
    }

    /// Dashboard hand-off: the player's dream is being arranged.
    pub async fn begin_dream(&mut self, id: &str) -> Result<(), SessionError> {
        self.transition(id, PlayerStatus::Sleeping, PlayerStatus::Dreaming)
            .await
    }

    /// Replaces the player's staged dream content.
    ///
    /// This is the seam the external dashboard drives; the content
    /// collections enforce their own slot bounds.
    pub async fn set_content(
        &mut self,
        id: &str,
        content: DreamContent,
    ) -> Result<(), SessionError> {
        let player = self
            .lookup(id)
            .await
            .ok_or_else(|| SessionError::UnknownPlayer(id.to_owned()))?;

        let mut updated = player.clone();
        updated.content = content;
        self.persist(&updated).await?;
        self.players.insert(id.to_owned(), updated);
        Ok(())
    }

    /// Marks staged content as delivered-on-next-download.
    pub async fn mark_wake_ready(&mut self, id: &str) -> Result<(), SessionError> {
        let player = self
            .lookup(id)
            .await
            .ok_or_else(|| SessionError::UnknownPlayer(id.to_owned()))?;

        if !player.status.has_dream() {
            return Err(SessionError::WrongStatus {
                id: id.to_owned(),
                actual: player.status.name(),
                required: "Sleeping or Dreaming",
            });
        }

        let mut updated = player.clone();
        updated.status = PlayerStatus::WakeReady;
        self.persist(&updated).await?;
        self.players.insert(id.to_owned(), updated);
        Ok(())
    }

    /// Clears all dream content and returns the player to `Awake`.
    pub async fn reset(&mut self, id: &str) -> Result<(), SessionError> {
        let player = self
            .lookup(id)
            .await
            .ok_or_else(|| SessionError::UnknownPlayer(id.to_owned()))?;

        let mut updated = player.clone();
        updated.status = PlayerStatus::Awake;
        updated.pkmn = None;
        updated.content.clear();
        self.persist(&updated).await?;
        self.players.insert(id.to_owned(), updated);

        tracing::info!(sync_id = %id, "player reset to awake");
        Ok(())
    }

    async fn transition(
        &mut self,
        id: &str,
        from: PlayerStatus,
        to: PlayerStatus,
    ) -> Result<(), SessionError> {
        let player = self
            .lookup(id)
            .await
            .ok_or_else(|| SessionError::UnknownPlayer(id.to_owned()))?;

        if player.status != from {
            return Err(SessionError::WrongStatus {
                id: id.to_owned(),
                actual: player.status.name(),
                required: from.name(),
            });
        }

        let mut updated = player.clone();
        updated.status = to;
        self.persist(&updated).await?;
        self.players.insert(id.to_owned(), updated);
        Ok(())
    }

    async fn lookup(&mut self, id: &str) -> Option<&Player> {
        if !self.players.contains_key(id) {
            let bytes = self.store.get(PLAYER_KIND, id).await?;
            match serde_json::from_slice::<Player>(&bytes) {
                Ok(player) => {
                    self.players.insert(id.to_owned(), player);
                }
                Err(e) => {
                    tracing::warn!(sync_id = %id, error = %e, "unreadable player record");
                    return None;
                }
            }
        }
        self.players.get(id)
    }

    async fn persist(&self, player: &Player) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(player).map_err(|e| StoreError {
            kind: PLAYER_KIND,
            id: player.id.clone(),
            reason: e.to_string(),
        })?;
        self.store.put(PLAYER_KIND, &player.id, bytes).await
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    const SYNC_ID: &str = "ABCD123456";

    fn registry() -> PlayerRegistry<MemoryStore> {
        PlayerRegistry::new(MemoryStore::new())
    }

    fn sample_pkmn() -> PkmnRecord {
        PkmnRecord {
            personality: 1,
            species: 25,
            held_item: 0,
            trainer_id: 7,
            trainer_secret_id: 8,
            level: 50,
            form: 0,
            ability: 9,
            nature: 0,
            gender: dreamlink_dream::Gender::Male,
            nickname: "PIKA".into(),
            trainer_name: "Red".into(),
        }
    }

    #[test]
    fn test_is_valid_sync_id_enforces_alphabet() {
        assert!(is_valid_sync_id("ABCD123456"));
        assert!(is_valid_sync_id("0123456789"));
        assert!(!is_valid_sync_id("ABCDI12345"), "I is excluded");
        assert!(!is_valid_sync_id("ABCDO12345"), "O is excluded");
        assert!(!is_valid_sync_id("abcd123456"), "lowercase is excluded");
        assert!(!is_valid_sync_id("ABC123"), "too short");
        assert!(!is_valid_sync_id("ABCD1234567"), "too long");
    }

    #[tokio::test]
    async fn test_create_new_player_is_awake_and_empty() {
        let mut reg = registry();
        reg.create(SYNC_ID, GameVariant::Version2).await.unwrap();
        let player = reg.get(SYNC_ID).await.unwrap();
        assert_eq!(player.status, PlayerStatus::Awake);
        assert!(player.pkmn.is_none());
        assert!(player.content.encounters().is_empty());
    }

    #[tokio::test]
    async fn test_create_duplicate_rejected() {
        let mut reg = registry();
        reg.create(SYNC_ID, GameVariant::Version1).await.unwrap();
        let result = reg.create(SYNC_ID, GameVariant::Version2).await;
        assert!(matches!(result, Err(SessionError::DuplicateId(_))));
    }

    #[tokio::test]
    async fn test_create_bad_id_rejected() {
        let mut reg = registry();
        let result = reg.create("oops", GameVariant::Version1).await;
        assert!(matches!(result, Err(SessionError::BadId(_))));
    }

    #[tokio::test]
    async fn test_begin_sleep_attaches_record_and_transitions() {
        let mut reg = registry();
        reg.create(SYNC_ID, GameVariant::Version2).await.unwrap();

        reg.begin_sleep(SYNC_ID, sample_pkmn(), &[1, 2, 3], false)
            .await
            .unwrap();

        let player = reg.get(SYNC_ID).await.unwrap();
        assert_eq!(player.status, PlayerStatus::Sleeping);
        assert_eq!(player.pkmn.as_ref().unwrap().species, 25);
    }

    #[tokio::test]
    async fn test_begin_sleep_rejected_while_not_awake() {
        let mut reg = registry();
        reg.create(SYNC_ID, GameVariant::Version2).await.unwrap();
        reg.begin_sleep(SYNC_ID, sample_pkmn(), &[], false)
            .await
            .unwrap();

        let result = reg.begin_sleep(SYNC_ID, sample_pkmn(), &[], false).await;
        assert!(matches!(result, Err(SessionError::WrongStatus { .. })));
    }

    #[tokio::test]
    async fn test_begin_sleep_overwrite_policy_allows_reupload() {
        let mut reg = registry();
        reg.create(SYNC_ID, GameVariant::Version2).await.unwrap();
        reg.begin_sleep(SYNC_ID, sample_pkmn(), &[], false)
            .await
            .unwrap();

        reg.begin_sleep(SYNC_ID, sample_pkmn(), &[], true)
            .await
            .expect("overwrite policy permits re-upload");
    }

    #[tokio::test]
    async fn test_begin_sleep_unknown_player_rejected() {
        let mut reg = registry();
        let result = reg.begin_sleep(SYNC_ID, sample_pkmn(), &[], false).await;
        assert!(matches!(result, Err(SessionError::UnknownPlayer(_))));
    }

    #[tokio::test]
    async fn test_lifecycle_full_cycle() {
        let mut reg = registry();
        reg.create(SYNC_ID, GameVariant::Version2).await.unwrap();

        reg.begin_sleep(SYNC_ID, sample_pkmn(), &[0xEC], false)
            .await
            .unwrap();
        reg.begin_dream(SYNC_ID).await.unwrap();
        reg.mark_wake_ready(SYNC_ID).await.unwrap();
        assert_eq!(
            reg.get(SYNC_ID).await.unwrap().status,
            PlayerStatus::WakeReady
        );

        reg.reset(SYNC_ID).await.unwrap();
        let player = reg.get(SYNC_ID).await.unwrap();
        assert_eq!(player.status, PlayerStatus::Awake);
        assert!(player.pkmn.is_none());
    }

    #[tokio::test]
    async fn test_begin_dream_requires_sleeping() {
        let mut reg = registry();
        reg.create(SYNC_ID, GameVariant::Version2).await.unwrap();
        let result = reg.begin_dream(SYNC_ID).await;
        assert!(matches!(result, Err(SessionError::WrongStatus { .. })));
    }

    #[tokio::test]
    async fn test_mark_wake_ready_requires_a_dream() {
        let mut reg = registry();
        reg.create(SYNC_ID, GameVariant::Version2).await.unwrap();
        let result = reg.mark_wake_ready(SYNC_ID).await;
        assert!(matches!(result, Err(SessionError::WrongStatus { .. })));
    }

    #[tokio::test]
    async fn test_set_content_persists_selections() {
        let mut reg = registry();
        reg.create(SYNC_ID, GameVariant::Version2).await.unwrap();

        let mut content = DreamContent::default();
        content.set_gained_levels(12).unwrap();
        reg.set_content(SYNC_ID, content).await.unwrap();

        assert_eq!(reg.get(SYNC_ID).await.unwrap().content.gained_levels(), 12);
    }
}
