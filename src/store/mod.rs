//! Durable mapping store subsystem.
//!
//! # Data Flow
//! ```text
//! Node startup:
//!     config.database → StoreKind → open_store() → Arc<dyn MappingStore>
//!
//! Per request:
//!     ClusterRouter → find_owner_by_sticky_values / least_loaded / insert_sticky_value
//!     StickyCache.flush() → insert_sticky_value (best effort) + save_load_and_state
//! ```
//!
//! # Design Decisions
//! - The relational uniqueness constraints, not application locking, are the
//!   source of truth for ownership races
//! - Every operation opens and closes its own store transaction; no session
//!   is held across requests
//! - Backends are selected through an enumerated kind resolved at startup,
//!   not a string-keyed callback registry

pub mod error;
pub mod sqlite;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

pub use error::StoreError;
pub use sqlite::SqliteStore;
pub use types::{Claim, Ownership, ServerRecord, StickyMappingRecord};

/// Operations every mapping-store backend must provide.
///
/// Implementations are synchronous: store operations are short relational
/// calls, and callers that live on an async runtime dispatch them through
/// `spawn_blocking`.
pub trait MappingStore: Send + Sync {
    /// Register a server row, or reset the existing row's load and state.
    /// Idempotent across restarts; returns the surrogate server id.
    fn create_or_reset_server(&self, address: &str, server_type: &str)
        -> Result<i64, StoreError>;

    /// Surrogate id for a registered server.
    fn server_id(&self, address: &str) -> Result<i64, StoreError>;

    /// The persisted recovery blob for a server; `"{}"` when absent.
    fn server_state(&self, address: &str) -> Result<String, StoreError>;

    /// Overwrite the recovery blob for a server.
    fn set_server_state(&self, address: &str, state: &str) -> Result<(), StoreError>;

    /// The load a server last reported; 0 when the server is unknown.
    fn current_load(&self, address: &str) -> Result<f64, StoreError>;

    /// Persist load and/or recovery state for a server's own row.
    fn save_load_and_state(
        &self,
        address: &str,
        load: Option<f64>,
        state: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Minimum-load server of the given type with `load < 100`.
    ///
    /// When `prefer` is within the minimum-load set it wins the tie, which
    /// keeps a node's newly-arrived sessions local; otherwise the lowest
    /// `server_id` is chosen so the order stays deterministic.
    fn least_loaded(
        &self,
        server_type: &str,
        prefer: Option<&str>,
    ) -> Result<Option<ServerRecord>, StoreError>;

    /// Find the server owning any of the given sticky values, restricted to
    /// the given pool type, along with the matching mapping rows.
    fn find_owner_by_sticky_values(
        &self,
        values: &[String],
        server_type: &str,
    ) -> Result<Option<Ownership>, StoreError>;

    /// Claim one sticky value for a server. Duplicate-key rejection is
    /// expected under concurrency and reported as [`Claim::AlreadyOwned`],
    /// never as an error.
    fn insert_sticky_value(
        &self,
        server_id: i64,
        endpoint_key: &str,
        endpoint_name: &str,
        value: &str,
    ) -> Result<Claim, StoreError>;

    /// Re-key a sticky value: delete `old` and claim `new` for the same
    /// server and endpoint. A duplicate-key rejection on the insert is
    /// absorbed like [`insert_sticky_value`](Self::insert_sticky_value);
    /// the old row is gone either way.
    fn update_sticky_value(
        &self,
        server_id: i64,
        endpoint_key: &str,
        endpoint_name: &str,
        old: &str,
        new: &str,
    ) -> Result<Claim, StoreError>;

    /// Release the given sticky values. Each value is deleted in isolation;
    /// returns how many rows went away.
    fn delete_sticky_values(&self, values: &[String]) -> Result<usize, StoreError>;

    /// Release every sticky value held by a server.
    fn delete_all_for_server(&self, address: &str) -> Result<usize, StoreError>;

    /// Remove a server row entirely; its mappings cascade away.
    fn remove_server(&self, address: &str) -> Result<(), StoreError>;

    /// Administrative wipe of both tables.
    fn truncate(&self) -> Result<(), StoreError>;
}

/// Enumerated store backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    Sqlite,
}

/// Database section of the node configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Which backend to open.
    pub backend: StoreKind,
    /// Path to the database file shared by the pool.
    pub path: PathBuf,
    /// Busy timeout handed to the engine, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StoreKind::Sqlite,
            path: PathBuf::from("cluster.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

/// Resolve the configured backend kind into a live store handle.
pub fn open_store(config: &DatabaseConfig) -> Result<Arc<dyn MappingStore>, StoreError> {
    match config.backend {
        StoreKind::Sqlite => {
            let store = SqliteStore::open(&config.path, config.busy_timeout_ms)?;
            Ok(Arc::new(store))
        }
    }
}
