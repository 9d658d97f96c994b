use std::sync::Arc;

use rusqlite::{params, Connection};

use crate::config::SafetyPolicy;
use crate::error::Result;
use crate::index::locations_by_hash;
use crate::model::{DashboardStats, FileSafety, WasteCandidate};
use crate::store::{from_sql_u64, Store};

/// Per-fingerprint copy counts. `unknown` devices count toward neither
/// hot nor cold.
const GROUP_SUMMARY_SQL: &str = "\
    SELECT l.content_hash, \
           COUNT(*), \
           COALESCE(SUM(d.device_type = 'hot'), 0), \
           COALESCE(SUM(d.device_type = 'cold'), 0), \
           COALESCE(SUM(l.scan_mode = 'full'), 0), \
           MAX(l.file_size), \
           MIN(l.file_path) \
    FROM file_locations l \
    LEFT JOIN devices d ON d.id = l.device_id";

#[derive(Debug, Clone, PartialEq, Eq)]
struct GroupSummary {
    content_hash: String,
    total_copies: u64,
    hot_copies: u64,
    cold_copies: u64,
    full_copies: u64,
    file_size: u64,
    first_path: String,
}

impl GroupSummary {
    fn fully_verified(&self) -> bool {
        self.full_copies == self.total_copies
    }

    fn wasted_bytes(&self) -> u64 {
        self.file_size
            .saturating_mul(self.total_copies.saturating_sub(1))
    }

    /// The name at the lexicographically smallest path.
    fn representative_name(&self) -> String {
        self.first_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.first_path)
            .to_string()
    }
}

/// Each query result is read from a single catalog snapshot.
pub struct RedundancyAnalyzer {
    store: Arc<Store>,
    policy: SafetyPolicy,
}

impl RedundancyAnalyzer {
    pub fn new(store: Arc<Store>, policy: SafetyPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &SafetyPolicy {
        &self.policy
    }

    /// A fingerprint is safe with at least one cold copy among two or more.
    /// Under `require_full_verification`, every copy must also be full-mode.
    pub fn is_safe(&self, total_copies: u64, cold_copies: u64, fully_verified: bool) -> bool {
        let redundant = cold_copies >= 1 && total_copies >= 2;
        redundant && (fully_verified || !self.policy.require_full_verification)
    }

    pub fn safety_of(&self, content_hash: &str) -> Result<Option<FileSafety>> {
        self.store.snapshot(|conn| {
            let summary = query_groups(
                conn,
                "WHERE l.content_hash = ?1 GROUP BY l.content_hash",
                Some(content_hash),
            )?
            .pop();
            summary
                .map(|summary| self.build_safety(conn, summary))
                .transpose()
        })
    }

    /// Every fingerprint that fails the safety rule, largest files first.
    pub fn unsafe_files(&self) -> Result<Vec<FileSafety>> {
        self.store.snapshot(|conn| {
            let mut groups = query_groups(conn, "GROUP BY l.content_hash", None)?;
            groups.retain(|group| {
                !self.is_safe(group.total_copies, group.cold_copies, group.fully_verified())
            });
            groups.sort_by(|a, b| {
                b.file_size
                    .cmp(&a.file_size)
                    .then_with(|| a.content_hash.cmp(&b.content_hash))
            });

            groups
                .into_iter()
                .map(|group| self.build_safety(conn, group))
                .collect()
        })
    }

    /// Groups with two or more copies, most wasted bytes first, ties by hash.
    pub fn waste_candidates(&self, threshold_bytes: Option<u64>) -> Result<Vec<WasteCandidate>> {
        let threshold = threshold_bytes.unwrap_or(0);
        let groups = self.store.read(|conn| {
            query_groups(
                conn,
                "GROUP BY l.content_hash HAVING COUNT(*) >= 2",
                None,
            )
        })?;

        let mut candidates = groups
            .into_iter()
            .filter(|group| group.wasted_bytes() >= threshold)
            .map(|group| WasteCandidate {
                wasted_bytes: group.wasted_bytes(),
                representative_name: group.representative_name(),
                content_hash: group.content_hash,
                file_size: group.file_size,
                total_copies: group.total_copies,
            })
            .collect::<Vec<_>>();
        candidates.sort_by(|a, b| {
            b.wasted_bytes
                .cmp(&a.wasted_bytes)
                .then_with(|| a.content_hash.cmp(&b.content_hash))
        });
        Ok(candidates)
    }

    pub fn dashboard_stats(&self) -> Result<DashboardStats> {
        let (groups, total_locations, total_devices) = self.store.snapshot(|conn| {
            let groups = query_groups(conn, "GROUP BY l.content_hash", None)?;
            let locations: i64 =
                conn.query_row("SELECT COUNT(*) FROM file_locations", [], |row| row.get(0))?;
            let devices: i64 =
                conn.query_row("SELECT COUNT(*) FROM devices", [], |row| row.get(0))?;
            Ok((groups, locations, devices))
        })?;

        let unsafe_files = groups
            .iter()
            .filter(|group| {
                !self.is_safe(group.total_copies, group.cold_copies, group.fully_verified())
            })
            .count() as u64;

        Ok(DashboardStats {
            total_files: groups.len() as u64,
            total_locations: from_sql_u64(total_locations),
            unsafe_files,
            total_devices: from_sql_u64(total_devices),
            total_size_bytes: groups
                .iter()
                .fold(0_u64, |sum, group| sum.saturating_add(group.file_size)),
        })
    }

    fn build_safety(
        &self,
        conn: &Connection,
        summary: GroupSummary,
    ) -> rusqlite::Result<FileSafety> {
        let locations = locations_by_hash(conn, &summary.content_hash)?;
        let fully_verified = summary.fully_verified();
        Ok(FileSafety {
            is_safe: self.is_safe(summary.total_copies, summary.cold_copies, fully_verified),
            representative_name: locations
                .first()
                .map(|location| location.file_name.clone())
                .unwrap_or_else(|| summary.representative_name()),
            content_hash: summary.content_hash,
            file_size: summary.file_size,
            total_copies: summary.total_copies,
            hot_copies: summary.hot_copies,
            cold_copies: summary.cold_copies,
            fully_verified,
            locations,
        })
    }
}

fn query_groups(
    conn: &Connection,
    clause: &str,
    key: Option<&str>,
) -> rusqlite::Result<Vec<GroupSummary>> {
    let mut stmt = conn.prepare(&format!("{GROUP_SUMMARY_SQL} {clause}"))?;
    let map_row = |row: &rusqlite::Row<'_>| {
        Ok(GroupSummary {
            content_hash: row.get(0)?,
            total_copies: from_sql_u64(row.get(1)?),
            hot_copies: from_sql_u64(row.get(2)?),
            cold_copies: from_sql_u64(row.get(3)?),
            full_copies: from_sql_u64(row.get(4)?),
            file_size: from_sql_u64(row.get(5)?),
            first_path: row.get(6)?,
        })
    };
    let groups = match key {
        Some(key) => stmt
            .query_map(params![key], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>(),
        None => stmt
            .query_map([], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>(),
    };
    groups
}
