use std::path::{Component, Path};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::model::{FileLocation, ScanMode};
use crate::store::{column_optional_time, column_time, encode_time, from_sql_u64, to_sql_u64, Store};

const LOCATION_COLUMNS: &str = "id, content_hash, device_id, file_path, file_name, file_size, \
                                modified_at, last_verified, scan_mode";

/// Input to [`LocationIndex::upsert`]; the row id is assigned by the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationRecord {
    pub content_hash: String,
    pub device_id: String,
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub last_verified: DateTime<Utc>,
    pub scan_mode: ScanMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Inserted(i64),
    Updated(i64),
}

#[derive(Debug, Clone)]
pub enum IndexWrite {
    Upsert(LocationRecord),
    /// Re-observed unchanged; only `last_verified` moves.
    Verify { id: i64, at: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: u64,
    pub updated: u64,
    pub verified: u64,
}

/// Content fingerprint -> locations, keyed uniquely on `(device_id, file_path)`.
pub struct LocationIndex {
    store: Arc<Store>,
}

impl LocationIndex {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn upsert(&self, record: &LocationRecord) -> Result<Upserted> {
        self.store.write(|conn| {
            let tx = conn.transaction()?;
            let outcome = upsert_in(&tx, record)?;
            tx.commit()?;
            Ok(outcome)
        })
    }

    /// Applies every write in one transaction.
    pub fn apply(&self, writes: &[IndexWrite]) -> Result<BatchOutcome> {
        if writes.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let outcome = self.store.write(|conn| {
            let tx = conn.transaction()?;
            let mut outcome = BatchOutcome::default();
            for write in writes {
                match write {
                    IndexWrite::Upsert(record) => match upsert_in(&tx, record)? {
                        Upserted::Inserted(_) => outcome.inserted += 1,
                        Upserted::Updated(_) => outcome.updated += 1,
                    },
                    IndexWrite::Verify { id, at } => {
                        outcome.verified += tx.execute(
                            "UPDATE file_locations \
                             SET last_verified = MAX(last_verified, ?1) WHERE id = ?2",
                            params![encode_time(at), id],
                        )? as u64;
                    }
                }
            }
            tx.commit()?;
            Ok(outcome)
        })?;
        debug!(
            "index batch committed: {} inserted, {} updated, {} verified",
            outcome.inserted, outcome.updated, outcome.verified
        );
        Ok(outcome)
    }

    pub fn by_hash(&self, content_hash: &str) -> Result<Vec<FileLocation>> {
        self.store
            .read(|conn| locations_by_hash(conn, content_hash))
    }

    pub fn by_device(&self, device_id: &str) -> Result<Vec<FileLocation>> {
        self.store.read(|conn| {
            query_locations(conn, "WHERE device_id = ?1 ORDER BY file_path ASC", device_id)
        })
    }

    pub fn get(&self, device_id: &str, file_path: &str) -> Result<Option<FileLocation>> {
        self.store.read(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {LOCATION_COLUMNS} FROM file_locations \
                     WHERE device_id = ?1 AND file_path = ?2"
                ),
                params![device_id, file_path],
                location_from_row,
            )
            .optional()
        })
    }

    pub fn remove(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.store.write(|conn| {
            let tx = conn.transaction()?;
            let mut removed = 0_u64;
            {
                let mut stmt = tx.prepare("DELETE FROM file_locations WHERE id = ?1")?;
                for id in ids {
                    removed += stmt.execute(params![id])? as u64;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
    }

    pub fn count(&self) -> Result<u64> {
        self.store.read(|conn| {
            conn.query_row("SELECT COUNT(*) FROM file_locations", [], |row| {
                row.get::<_, i64>(0)
            })
        })
        .map(from_sql_u64)
    }
}

fn upsert_in(tx: &Transaction<'_>, record: &LocationRecord) -> rusqlite::Result<Upserted> {
    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM file_locations WHERE device_id = ?1 AND file_path = ?2",
            params![record.device_id, record.file_path],
            |row| row.get(0),
        )
        .optional()?;

    tx.execute(
        "INSERT INTO file_locations (content_hash, device_id, file_path, file_name, file_size, \
                                     modified_at, last_verified, scan_mode) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
         ON CONFLICT(device_id, file_path) DO UPDATE SET \
           content_hash = excluded.content_hash, \
           file_name = excluded.file_name, \
           file_size = excluded.file_size, \
           modified_at = excluded.modified_at, \
           scan_mode = excluded.scan_mode, \
           last_verified = MAX(file_locations.last_verified, excluded.last_verified)",
        params![
            record.content_hash,
            record.device_id,
            record.file_path,
            record.file_name,
            to_sql_u64(record.file_size),
            record.modified_at.as_ref().map(encode_time),
            encode_time(&record.last_verified),
            record.scan_mode,
        ],
    )?;

    Ok(match existing {
        Some(id) => Upserted::Updated(id),
        None => Upserted::Inserted(tx.last_insert_rowid()),
    })
}

pub(crate) fn locations_by_hash(
    conn: &Connection,
    content_hash: &str,
) -> rusqlite::Result<Vec<FileLocation>> {
    query_locations(
        conn,
        "WHERE content_hash = ?1 ORDER BY file_path ASC, device_id ASC",
        content_hash,
    )
}

fn query_locations(conn: &Connection, clause: &str, key: &str) -> rusqlite::Result<Vec<FileLocation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LOCATION_COLUMNS} FROM file_locations {clause}"
    ))?;
    let locations = stmt
        .query_map(params![key], location_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>();
    locations
}

pub(crate) fn location_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileLocation> {
    Ok(FileLocation {
        id: row.get(0)?,
        content_hash: row.get(1)?,
        device_id: row.get(2)?,
        file_path: row.get(3)?,
        file_name: row.get(4)?,
        file_size: from_sql_u64(row.get(5)?),
        modified_at: column_optional_time(row, 6)?,
        last_verified: column_time(row, 7)?,
        scan_mode: row.get(8)?,
    })
}

/// `path` relative to `mount`, `/`-separated. `None` when outside the mount.
pub fn relative_path(mount: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(mount).ok()?;
    let parts = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>();
    Some(parts.join("/"))
}

/// Whether an indexed relative path sits at or below `scope` (empty = whole device).
pub fn in_scope(file_path: &str, scope: &str) -> bool {
    scope.is_empty() || Path::new(file_path).starts_with(Path::new(scope))
}
