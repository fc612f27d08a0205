//! Row types for the mapping store.

use serde::Serialize;

/// One row per running node of a pool.
///
/// `unique_key` is the node's network address (host:port) and is unique
/// across the table. `load` is the utilization percentage the node last
/// reported; values below 100 mean "has capacity".
#[derive(Debug, Clone, Serialize)]
pub struct ServerRecord {
    pub server_id: i64,
    pub server_type: String,
    pub unique_key: String,
    pub load: f64,
    /// Opaque serialized blob used to recover in-memory state after a
    /// crash/restart.
    pub server_state: String,
}

/// One row per (sticky value, owning server) assignment.
///
/// The pairs (`server_id`, `sticky_value`) and (`endpoint_name`,
/// `sticky_value`) are each unique, which together guarantee at most one
/// owning server per sticky value per endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StickyMappingRecord {
    pub mapping_id: i64,
    pub server_id: i64,
    pub endpoint_key: String,
    pub endpoint_name: String,
    pub sticky_value: String,
}

/// Outcome of a claim insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The row was inserted; this server now owns the value.
    Inserted,
    /// A uniqueness constraint absorbed the insert; the value was already
    /// claimed (by this server or a concurrent winner).
    AlreadyOwned,
}

/// Result of an ownership lookup: the owning server plus the mapping rows
/// that matched the queried sticky values.
#[derive(Debug, Clone)]
pub struct Ownership {
    pub server: ServerRecord,
    pub mappings: Vec<StickyMappingRecord>,
}
