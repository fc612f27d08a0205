//! Per-request write-back cache for sticky claims and load/state updates.
//!
//! # Responsibilities
//! - Buffer sticky values claimed during a request and flush them once at
//!   request end
//! - Buffer the node's load / recovery-state updates alongside
//! - Delete released sticky values immediately (release is an explicit,
//!   latency-insensitive action)
//!
//! # Design Decisions
//! - One instance per (store, endpoint) pair, constructed fresh per request;
//!   a cross-request singleton would leak claim lists between sessions
//! - Explicit mutation API sets the dirty flag internally; flush snapshots
//!   and clears under the same lock so no mutation is lost between the
//!   dirty check and the reset
//! - Flush is best effort per value: one rejected insert is logged and
//!   skipped, the rest of the batch still lands

use std::sync::{Arc, Mutex, MutexGuard};

use crate::store::{MappingStore, StoreError};

#[derive(Debug, Default)]
struct CacheState {
    /// Values already known-owned by this node (read from the store).
    read: Vec<String>,
    /// Values claimed this request, pending flush.
    write: Vec<String>,
    load: Option<f64>,
    server_state: Option<String>,
    dirty: bool,
}

/// Request-scoped buffer of pending mapping-store mutations.
pub struct StickyCache {
    store: Arc<dyn MappingStore>,
    server_address: String,
    server_id: i64,
    endpoint_key: String,
    endpoint_name: String,
    state: Mutex<CacheState>,
}

impl StickyCache {
    pub fn new(
        store: Arc<dyn MappingStore>,
        server_address: impl Into<String>,
        server_id: i64,
        endpoint_key: impl Into<String>,
        endpoint_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            server_address: server_address.into(),
            server_id,
            endpoint_key: endpoint_key.into(),
            endpoint_name: endpoint_name.into(),
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // A poisoned cache only affects this request; recover the guard.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record values the store already attributes to this node. They are
    /// deduplicated against future `add_sticky` calls but never re-written.
    pub fn note_owned(&self, values: &[String]) {
        let mut state = self.lock();
        for value in values {
            if !state.read.contains(value) {
                state.read.push(value.clone());
            }
        }
    }

    /// Buffer newly-claimed sticky values for flush. Values already present
    /// in either list are skipped, so repeated adds stay idempotent.
    pub fn add_sticky(&self, values: &[String]) {
        let mut state = self.lock();
        for value in values {
            if !state.read.contains(value) && !state.write.contains(value) {
                state.write.push(value.clone());
                state.dirty = true;
            }
        }
    }

    /// Re-key a sticky value now: the store swaps the row (old deleted,
    /// new claimed, conflict absorbed) and both local lists follow. The
    /// new key counts as owned, so it is never re-written at flush.
    pub fn update_sticky(&self, old: &str, new: &str) -> Result<(), StoreError> {
        self.store.update_sticky_value(
            self.server_id,
            &self.endpoint_key,
            &self.endpoint_name,
            old,
            new,
        )?;
        let mut state = self.lock();
        state.read.retain(|v| v != old);
        state.write.retain(|v| v != old);
        if !state.read.iter().any(|v| v == new) {
            state.read.push(new.to_string());
        }
        Ok(())
    }

    /// Release sticky values now: delete from the store and prune both
    /// local lists. Not deferred to flush.
    pub fn remove_sticky(&self, values: &[String]) -> Result<usize, StoreError> {
        let removed = self.store.delete_sticky_values(values)?;
        let mut state = self.lock();
        state.read.retain(|v| !values.contains(v));
        state.write.retain(|v| !values.contains(v));
        Ok(removed)
    }

    /// Buffer a load update for this node's own row.
    pub fn set_load(&self, load: f64) {
        let mut state = self.lock();
        state.load = Some(load);
        state.dirty = true;
    }

    /// Buffer a recovery-state update for this node's own row.
    pub fn set_server_state(&self, blob: impl Into<String>) {
        let mut state = self.lock();
        state.server_state = Some(blob.into());
        state.dirty = true;
    }

    /// True when there are buffered mutations awaiting flush.
    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Values currently buffered for write (test and status introspection).
    pub fn pending_writes(&self) -> Vec<String> {
        self.lock().write.clone()
    }

    /// Persist buffered mutations: best-effort per-value claim inserts,
    /// then the load/state update. No-op when clean. Flushed values move to
    /// the read list so a later flush will not re-write them.
    pub fn flush(&self) -> Result<(), StoreError> {
        let (values, load, server_state) = {
            let mut state = self.lock();
            if !state.dirty {
                return Ok(());
            }
            let values = std::mem::take(&mut state.write);
            let pending = (values.clone(), state.load.take(), state.server_state.take());
            for value in values {
                state.read.push(value);
            }
            state.dirty = false;
            pending
        };

        for value in &values {
            if let Err(err) = self.store.insert_sticky_value(
                self.server_id,
                &self.endpoint_key,
                &self.endpoint_name,
                value,
            ) {
                // One bad value must not drop the rest of the batch.
                tracing::warn!(
                    value = %value,
                    endpoint = %self.endpoint_name,
                    error = %err,
                    "sticky flush skipped value"
                );
            }
        }

        if load.is_some() || server_state.is_some() {
            if let Err(err) = self.store.save_load_and_state(
                &self.server_address,
                load,
                server_state.as_deref(),
            ) {
                tracing::warn!(
                    address = %self.server_address,
                    error = %err,
                    "load/state flush failed"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn cache_with_store() -> (Arc<SqliteStore>, StickyCache) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let id = store.create_or_reset_server("a:1", "worker").unwrap();
        let cache = StickyCache::new(store.clone(), "a:1", id, "ep-key", "publish");
        (store, cache)
    }

    #[test]
    fn add_is_idempotent() {
        let (_, cache) = cache_with_store();
        cache.add_sticky(&["chan:42".into()]);
        cache.add_sticky(&["chan:42".into()]);
        assert_eq!(cache.pending_writes(), vec!["chan:42".to_string()]);
    }

    #[test]
    fn values_noted_as_owned_are_not_rewritten() {
        let (_, cache) = cache_with_store();
        cache.note_owned(&["chan:42".into()]);
        cache.add_sticky(&["chan:42".into()]);
        assert!(cache.pending_writes().is_empty());
        assert!(!cache.is_dirty());
    }

    #[test]
    fn flush_persists_then_clears() {
        let (store, cache) = cache_with_store();
        cache.add_sticky(&["chan:42".into()]);
        cache.set_load(12.5);
        cache.flush().unwrap();

        assert!(!cache.is_dirty());
        assert!(cache.pending_writes().is_empty());
        let owner = store
            .find_owner_by_sticky_values(&["chan:42".into()], "worker")
            .unwrap()
            .unwrap();
        assert_eq!(owner.server.unique_key, "a:1");
        assert_eq!(store.current_load("a:1").unwrap(), 12.5);

        // Clean flush performs no store writes and stays clean.
        cache.flush().unwrap();
        assert!(!cache.is_dirty());
    }

    #[test]
    fn flushed_values_do_not_requeue() {
        let (_, cache) = cache_with_store();
        cache.add_sticky(&["chan:42".into()]);
        cache.flush().unwrap();
        cache.add_sticky(&["chan:42".into()]);
        assert!(cache.pending_writes().is_empty());
    }

    #[test]
    fn update_rekeys_and_tracks_the_new_value_as_owned() {
        let (store, cache) = cache_with_store();
        cache.add_sticky(&["chan:42".into()]);
        cache.flush().unwrap();

        cache.update_sticky("chan:42", "chan:43").unwrap();
        assert!(store
            .find_owner_by_sticky_values(&["chan:42".into()], "worker")
            .unwrap()
            .is_none());
        let owner = store
            .find_owner_by_sticky_values(&["chan:43".into()], "worker")
            .unwrap()
            .unwrap();
        assert_eq!(owner.server.unique_key, "a:1");

        // The new key sits in the read list, not the write queue.
        cache.add_sticky(&["chan:43".into()]);
        assert!(cache.pending_writes().is_empty());
    }

    #[test]
    fn remove_deletes_immediately() {
        let (store, cache) = cache_with_store();
        cache.add_sticky(&["chan:42".into()]);
        cache.flush().unwrap();

        let removed = cache.remove_sticky(&["chan:42".into()]).unwrap();
        assert_eq!(removed, 1);
        assert!(store
            .find_owner_by_sticky_values(&["chan:42".into()], "worker")
            .unwrap()
            .is_none());
        // Removed value can be claimed afresh.
        cache.add_sticky(&["chan:42".into()]);
        assert_eq!(cache.pending_writes(), vec!["chan:42".to_string()]);
    }
}
