//! The external persistence boundary.
//!
//! The core never owns durable storage. It requires only a key-addressed
//! store with get/put/exists semantics; the desktop dashboard that shares
//! the data files is a collaborator outside this repository. Records cross
//! the boundary as opaque JSON bytes so the store needs no knowledge of
//! their shape.
//!
//! The trait is implemented by whatever the deployment provides; tests and
//! the demo binary use [`MemoryStore`].

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::StoreError;

/// A key-addressed record store.
///
/// `kind` namespaces record families ("user", "player", "dream-data") so
/// one backing store can hold all of them. Implementations must be safe to
/// call from arbitrarily many tasks; per-key reads must observe completed
/// writes (linearizable per key). Independent keys need no mutual ordering.
pub trait RecordStore: Send + Sync + 'static {
    /// Fetches a record, or `None` if it does not exist.
    fn get(
        &self,
        kind: &str,
        id: &str,
    ) -> impl std::future::Future<Output = Option<Vec<u8>>> + Send;

    /// Durably writes a record. An `Err` means nothing was persisted.
    fn put(
        &self,
        kind: &str,
        id: &str,
        bytes: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Returns whether a record exists without fetching it.
    fn exists(
        &self,
        kind: &str,
        id: &str,
    ) -> impl std::future::Future<Output = bool> + Send;
}

impl<S: RecordStore> RecordStore for std::sync::Arc<S> {
    async fn get(&self, kind: &str, id: &str) -> Option<Vec<u8>> {
        (**self).get(kind, id).await
    }

    async fn put(&self, kind: &str, id: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        (**self).put(kind, id, bytes).await
    }

    async fn exists(&self, kind: &str, id: &str) -> bool {
        (**self).exists(kind, id).await
    }
}

/// An in-memory [`RecordStore`] for tests and the demo server.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    async fn get(&self, kind: &str, id: &str) -> Option<Vec<u8>> {
        self.records
            .lock()
            .await
            .get(&(kind.to_owned(), id.to_owned()))
            .cloned()
    }

    async fn put(&self, kind: &str, id: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.records
            .lock()
            .await
            .insert((kind.to_owned(), id.to_owned()), bytes);
        Ok(())
    }

    async fn exists(&self, kind: &str, id: &str) -> bool {
        self.records
            .lock()
            .await
            .contains_key(&(kind.to_owned(), id.to_owned()))
    }
}

// =========================================================================
// Tests
// =========================================================================
