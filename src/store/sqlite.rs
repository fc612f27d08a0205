//! SQLite mapping-store backend.
//!
//! # Responsibilities
//! - Create the `server` / `stickymapping` schema with its uniqueness
//!   constraints and cascade delete
//! - Implement every [`MappingStore`] operation as a short, self-contained
//!   transaction
//! - Map engine errors onto the conflict/busy/terminal taxonomy
//!
//! # Design Decisions
//! - One connection behind a mutex; WAL mode plus a busy timeout lets
//!   several node processes share the same database file
//! - Claim inserts lean on the unique constraints: a constraint rejection
//!   means another request already owns the value, and the row it raced
//!   against is left untouched

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

use crate::store::error::StoreError;
use crate::store::types::{Claim, Ownership, ServerRecord, StickyMappingRecord};
use crate::store::MappingStore;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS server (
    server_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    server_type  TEXT NOT NULL,
    unique_key   TEXT NOT NULL UNIQUE,
    load         REAL NOT NULL DEFAULT 0,
    server_state TEXT NOT NULL DEFAULT '{}'
);
CREATE TABLE IF NOT EXISTS stickymapping (
    mapping_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    server_id     INTEGER NOT NULL
                  REFERENCES server(server_id) ON DELETE CASCADE,
    endpoint_key  TEXT NOT NULL,
    endpoint_name TEXT NOT NULL,
    sticky_value  TEXT NOT NULL,
    UNIQUE(server_id, sticky_value),
    UNIQUE(endpoint_name, sticky_value)
);
CREATE INDEX IF NOT EXISTS idx_stickymapping_value
    ON stickymapping(sticky_value);
";

const SERVER_COLUMNS: &str = "server_id, server_type, unique_key, load, server_state";

/// SQLite-backed [`MappingStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database file shared by the pool.
    pub fn open(path: &Path, busy_timeout_ms: u64) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        // WAL so concurrent node processes on the same file do not starve
        // each other's readers.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        Self::init(conn, busy_timeout_ms)
    }

    /// In-memory store, private to this handle. Used by tests and
    /// single-node deployments that do not need durability.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, 5_000)
    }

    fn init(conn: Connection, busy_timeout_ms: u64) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
        // Cascade delete from server to stickymapping needs this pragma.
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("store connection poisoned".into()))
    }
}

fn row_to_server(row: &rusqlite::Row<'_>) -> rusqlite::Result<ServerRecord> {
    Ok(ServerRecord {
        server_id: row.get(0)?,
        server_type: row.get(1)?,
        unique_key: row.get(2)?,
        load: row.get(3)?,
        server_state: row.get(4)?,
    })
}

/// `?1, ?2, ...` placeholder list for an IN clause.
fn placeholders(from: usize, count: usize) -> String {
    (from..from + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl MappingStore for SqliteStore {
    fn create_or_reset_server(
        &self,
        address: &str,
        server_type: &str,
    ) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO server (server_type, unique_key, load, server_state)
             VALUES (?1, ?2, 0, '{}')",
            params![server_type, address],
        );
        match inserted.map_err(StoreError::from) {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(StoreError::Conflict(_)) => {
                // Node restarted in start mode: keep the row, reset its
                // load and recovery blob.
                conn.execute(
                    "UPDATE server
                     SET load = 0, server_type = ?1, server_state = '{}'
                     WHERE unique_key = ?2",
                    params![server_type, address],
                )?;
                conn.query_row(
                    "SELECT server_id FROM server WHERE unique_key = ?1",
                    params![address],
                    |row| row.get(0),
                )
                .map_err(StoreError::from)
            }
            Err(err) => Err(err),
        }
    }

    fn server_id(&self, address: &str) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT server_id FROM server WHERE unique_key = ?1",
            params![address],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StoreError::NoSuchServer(address.to_string()))
    }

    fn server_state(&self, address: &str) -> Result<String, StoreError> {
        let conn = self.lock()?;
        let state: Option<String> = conn
            .query_row(
                "SELECT server_state FROM server WHERE unique_key = ?1",
                params![address],
                |row| row.get(0),
            )
            .optional()?;
        Ok(state.filter(|s| !s.is_empty()).unwrap_or_else(|| "{}".into()))
    }

    fn set_server_state(&self, address: &str, state: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE server SET server_state = ?1 WHERE unique_key = ?2",
            params![state, address],
        )?;
        Ok(())
    }

    fn current_load(&self, address: &str) -> Result<f64, StoreError> {
        let conn = self.lock()?;
        let load: Option<f64> = conn
            .query_row(
                "SELECT load FROM server WHERE unique_key = ?1",
                params![address],
                |row| row.get(0),
            )
            .optional()?;
        Ok(load.unwrap_or(0.0))
    }

    fn save_load_and_state(
        &self,
        address: &str,
        load: Option<f64>,
        state: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        match (load, state) {
            (Some(load), Some(state)) => {
                conn.execute(
                    "UPDATE server SET load = ?1, server_state = ?2 WHERE unique_key = ?3",
                    params![load, state, address],
                )?;
            }
            (Some(load), None) => {
                conn.execute(
                    "UPDATE server SET load = ?1 WHERE unique_key = ?2",
                    params![load, address],
                )?;
            }
            (None, Some(state)) => {
                conn.execute(
                    "UPDATE server SET server_state = ?1 WHERE unique_key = ?2",
                    params![state, address],
                )?;
            }
            (None, None) => {}
        }
        Ok(())
    }

    fn least_loaded(
        &self,
        server_type: &str,
        prefer: Option<&str>,
    ) -> Result<Option<ServerRecord>, StoreError> {
        let conn = self.lock()?;
        let server = conn
            .query_row(
                &format!(
                    "SELECT {SERVER_COLUMNS} FROM server
                     WHERE server_type = ?1 AND load < 100
                       AND load = (SELECT MIN(load) FROM server
                                   WHERE server_type = ?1 AND load < 100)
                     ORDER BY CASE WHEN unique_key = ?2 THEN 0 ELSE 1 END, server_id
                     LIMIT 1"
                ),
                params![server_type, prefer.unwrap_or("")],
                row_to_server,
            )
            .optional()?;
        Ok(server)
    }

    fn find_owner_by_sticky_values(
        &self,
        values: &[String],
        server_type: &str,
    ) -> Result<Option<Ownership>, StoreError> {
        if values.is_empty() {
            return Ok(None);
        }
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT mapping_id, server_id, endpoint_key, endpoint_name, sticky_value
             FROM stickymapping WHERE sticky_value IN ({})",
            placeholders(1, values.len())
        ))?;
        let mappings = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), |row| {
                Ok(StickyMappingRecord {
                    mapping_id: row.get(0)?,
                    server_id: row.get(1)?,
                    endpoint_key: row.get(2)?,
                    endpoint_name: row.get(3)?,
                    sticky_value: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        if mappings.is_empty() {
            return Ok(None);
        }

        // Values for several pool types can coincide; only a server of the
        // requested type counts as the owner here.
        let mut ids: Vec<i64> = mappings.iter().map(|m| m.server_id).collect();
        ids.sort_unstable();
        ids.dedup();
        let server = conn
            .query_row(
                &format!(
                    "SELECT {SERVER_COLUMNS} FROM server
                     WHERE server_type = ?1 AND server_id IN ({})",
                    placeholders(2, ids.len())
                ),
                rusqlite::params_from_iter(
                    std::iter::once(rusqlite::types::Value::from(server_type.to_string()))
                        .chain(ids.iter().map(|id| rusqlite::types::Value::from(*id))),
                ),
                row_to_server,
            )
            .optional()?;
        Ok(server.map(|server| Ownership { server, mappings }))
    }

    fn insert_sticky_value(
        &self,
        server_id: i64,
        endpoint_key: &str,
        endpoint_name: &str,
        value: &str,
    ) -> Result<Claim, StoreError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO stickymapping (server_id, endpoint_key, endpoint_name, sticky_value)
             VALUES (?1, ?2, ?3, ?4)",
            params![server_id, endpoint_key, endpoint_name, value],
        );
        match inserted.map_err(StoreError::from) {
            Ok(_) => Ok(Claim::Inserted),
            Err(StoreError::Conflict(_)) => Ok(Claim::AlreadyOwned),
            Err(err) => Err(err),
        }
    }

    fn update_sticky_value(
        &self,
        server_id: i64,
        endpoint_key: &str,
        endpoint_name: &str,
        old: &str,
        new: &str,
    ) -> Result<Claim, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM stickymapping WHERE sticky_value = ?1 AND server_id = ?2",
            params![old, server_id],
        )?;
        let inserted = conn.execute(
            "INSERT INTO stickymapping (server_id, endpoint_key, endpoint_name, sticky_value)
             VALUES (?1, ?2, ?3, ?4)",
            params![server_id, endpoint_key, endpoint_name, new],
        );
        match inserted.map_err(StoreError::from) {
            Ok(_) => Ok(Claim::Inserted),
            Err(StoreError::Conflict(_)) => Ok(Claim::AlreadyOwned),
            Err(err) => Err(err),
        }
    }

    fn delete_sticky_values(&self, values: &[String]) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let mut removed = 0;
        for value in values {
            // Each delete is isolated so one bad value cannot take the
            // rest of the batch down with it.
            match conn.execute(
                "DELETE FROM stickymapping WHERE sticky_value = ?1",
                params![value],
            ) {
                Ok(n) => removed += n,
                Err(err) => {
                    tracing::debug!(value = %value, error = %err, "sticky delete failed");
                }
            }
        }
        Ok(removed)
    }

    fn delete_all_for_server(&self, address: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM stickymapping WHERE server_id IN
             (SELECT server_id FROM server WHERE unique_key = ?1)",
            params![address],
        )?;
        Ok(removed)
    }

    fn remove_server(&self, address: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM server WHERE unique_key = ?1",
            params![address],
        )?;
        Ok(())
    }

    fn truncate(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch("DELETE FROM stickymapping; DELETE FROM server;")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn register_is_idempotent_and_resets_row() {
        let s = store();
        let id = s.create_or_reset_server("10.0.0.1:4000", "worker").unwrap();
        s.save_load_and_state("10.0.0.1:4000", Some(55.0), Some(r#"{"jobs":3}"#))
            .unwrap();

        // Same address again: same row, load and state wiped.
        let id2 = s.create_or_reset_server("10.0.0.1:4000", "worker").unwrap();
        assert_eq!(id, id2);
        assert_eq!(s.current_load("10.0.0.1:4000").unwrap(), 0.0);
        assert_eq!(s.server_state("10.0.0.1:4000").unwrap(), "{}");
    }

    #[test]
    fn duplicate_claim_is_absorbed_not_an_error() {
        let s = store();
        let id = s.create_or_reset_server("a:1", "worker").unwrap();
        let other = s.create_or_reset_server("b:1", "worker").unwrap();

        assert_eq!(
            s.insert_sticky_value(id, "ep-key", "publish", "chan:42").unwrap(),
            Claim::Inserted
        );
        // Same server, same value.
        assert_eq!(
            s.insert_sticky_value(id, "ep-key", "publish", "chan:42").unwrap(),
            Claim::AlreadyOwned
        );
        // Competing server, same endpoint: (endpoint_name, value) unique.
        assert_eq!(
            s.insert_sticky_value(other, "ep-key", "publish", "chan:42").unwrap(),
            Claim::AlreadyOwned
        );

        let owner = s
            .find_owner_by_sticky_values(&["chan:42".into()], "worker")
            .unwrap()
            .unwrap();
        assert_eq!(owner.server.server_id, id);
        assert_eq!(owner.mappings.len(), 1);
    }

    #[test]
    fn least_loaded_prefers_self_on_tie() {
        let s = store();
        s.create_or_reset_server("a:1", "worker").unwrap();
        s.create_or_reset_server("b:1", "worker").unwrap();
        s.create_or_reset_server("c:1", "worker").unwrap();
        s.save_load_and_state("a:1", Some(10.0), None).unwrap();
        s.save_load_and_state("b:1", Some(10.0), None).unwrap();
        s.save_load_and_state("c:1", Some(50.0), None).unwrap();

        let picked = s.least_loaded("worker", Some("b:1")).unwrap().unwrap();
        assert_eq!(picked.unique_key, "b:1");

        // Preference outside the minimum-load set falls back to row order.
        let picked = s.least_loaded("worker", Some("c:1")).unwrap().unwrap();
        assert_eq!(picked.unique_key, "a:1");
    }

    #[test]
    fn least_loaded_ignores_full_servers() {
        let s = store();
        s.create_or_reset_server("a:1", "worker").unwrap();
        s.save_load_and_state("a:1", Some(100.0), None).unwrap();
        assert!(s.least_loaded("worker", None).unwrap().is_none());
    }

    #[test]
    fn removing_server_cascades_to_mappings() {
        let s = store();
        let id = s.create_or_reset_server("a:1", "worker").unwrap();
        s.insert_sticky_value(id, "k", "publish", "chan:7").unwrap();
        s.remove_server("a:1").unwrap();
        assert!(s
            .find_owner_by_sticky_values(&["chan:7".into()], "worker")
            .unwrap()
            .is_none());
    }

    #[test]
    fn owner_lookup_respects_server_type() {
        let s = store();
        let id = s.create_or_reset_server("a:1", "encoder").unwrap();
        s.insert_sticky_value(id, "k", "encode", "chan:9").unwrap();
        assert!(s
            .find_owner_by_sticky_values(&["chan:9".into()], "worker")
            .unwrap()
            .is_none());
        assert!(s
            .find_owner_by_sticky_values(&["chan:9".into()], "encoder")
            .unwrap()
            .is_some());
    }

    #[test]
    fn update_rekeys_a_sticky_value() {
        let s = store();
        let id = s.create_or_reset_server("a:1", "worker").unwrap();
        s.insert_sticky_value(id, "k", "publish", "chan:1").unwrap();

        assert_eq!(
            s.update_sticky_value(id, "k", "publish", "chan:1", "chan:2").unwrap(),
            Claim::Inserted
        );
        assert!(s
            .find_owner_by_sticky_values(&["chan:1".into()], "worker")
            .unwrap()
            .is_none());
        let owner = s
            .find_owner_by_sticky_values(&["chan:2".into()], "worker")
            .unwrap()
            .unwrap();
        assert_eq!(owner.server.server_id, id);
    }

    #[test]
    fn update_conflict_is_absorbed_and_old_row_still_goes() {
        let s = store();
        let id = s.create_or_reset_server("a:1", "worker").unwrap();
        let other = s.create_or_reset_server("b:1", "worker").unwrap();
        s.insert_sticky_value(id, "k", "publish", "chan:1").unwrap();
        s.insert_sticky_value(other, "k", "publish", "chan:2").unwrap();

        // The target key already belongs to the other server.
        assert_eq!(
            s.update_sticky_value(id, "k", "publish", "chan:1", "chan:2").unwrap(),
            Claim::AlreadyOwned
        );
        assert!(s
            .find_owner_by_sticky_values(&["chan:1".into()], "worker")
            .unwrap()
            .is_none());
        let owner = s
            .find_owner_by_sticky_values(&["chan:2".into()], "worker")
            .unwrap()
            .unwrap();
        assert_eq!(owner.server.server_id, other);
    }

    #[test]
    fn delete_values_releases_ownership() {
        let s = store();
        let id = s.create_or_reset_server("a:1", "worker").unwrap();
        s.insert_sticky_value(id, "k", "publish", "chan:1").unwrap();
        s.insert_sticky_value(id, "k", "publish", "chan:2").unwrap();
        let removed = s
            .delete_sticky_values(&["chan:1".into(), "chan:2".into(), "chan:3".into()])
            .unwrap();
        assert_eq!(removed, 2);
        assert!(s
            .find_owner_by_sticky_values(&["chan:1".into()], "worker")
            .unwrap()
            .is_none());
    }
}
