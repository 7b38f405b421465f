//! Shared store of the currently published verification keys.
//!
//! [`KeyStore`] holds one immutable [`KeySet`] behind an `Arc`. Lookups take
//! the read lock only long enough to reach the current set; a refresh builds
//! the replacement set entirely outside the lock and then swaps the `Arc`
//! under the write lock. A reader therefore sees one generation or the next,
//! never a mix of both.
//!
//! ```text
//! refresher:  fetch → parse → KeySet ──┐
//!                                      ▼ write lock (swap only)
//! requests:   lookup(kid) ──read lock──► Arc<KeySet> ──► Arc<VerificationKey>
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::RwLock;

use crate::keys::{KeySet, VerificationKey};

/// Concurrent, atomically replaceable map of key identifier to [`VerificationKey`].
///
/// One store is shared (via `Arc`) between the [`KeyRefresher`](crate::KeyRefresher)
/// and every [`CallbackVerifier`](crate::CallbackVerifier) for the lifetime of
/// the process.
#[derive(Debug, Default)]
pub struct KeyStore {
    current: RwLock<Arc<KeySet>>,
    /// Incremented on every replace; 0 means the store was never loaded.
    generation: AtomicU64,
}

impl KeyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-loaded with `keys`.
    #[must_use]
    pub fn with_keys(keys: KeySet) -> Self {
        let store = Self::new();
        store.replace(keys);
        store
    }

    /// Returns the key with the given identifier, if the current set has one.
    #[must_use]
    pub fn lookup(&self, key_id: &str) -> Option<Arc<VerificationKey>> {
        self.current.read().get(key_id).cloned()
    }

    /// Installs `keys` as the current set, discarding every previous key.
    ///
    /// Returns the set that was replaced.
    pub fn replace(&self, keys: KeySet) -> Arc<KeySet> {
        let next = Arc::new(keys);
        let count = next.len();
        let previous = {
            let mut current = self.current.write();
            std::mem::replace(&mut *current, next)
        };
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        tracing::info!(
            audit.action = "replace_key_set",
            audit.result = "success",
            keys = count,
            previous_keys = previous.len(),
            generation,
            "audit_event"
        );
        previous
    }

    /// Returns the current key set as one consistent snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<KeySet> {
        Arc::clone(&*self.current.read())
    }

    /// Returns how many times the store has been replaced.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Returns the number of keys in the current set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    /// Returns `true` if no keys are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.read().is_empty()
    }

    /// Drops every key. Used on shutdown.
    pub fn clear(&self) {
        let evicted = {
            let mut current = self.current.write();
            std::mem::take(&mut *current)
        };
        tracing::info!(
            audit.action = "clear_key_set",
            audit.result = "success",
            evicted = evicted.len(),
            "audit_event"
        );
    }
}
