//! Grouping coverage-history rows into per-timestamp snapshots.

use std::collections::HashMap;

use buildledger_shared::{Coverage, CoverageSnapshot, CoverageSnapshots};
use tracing::warn;

/// One row of a service's coverage history.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageRow {
    pub service: String,
    pub version: String,
    pub branch: String,
    pub package: String,
    pub percentage: f64,
    pub timestamp: i64,
}

/// Group rows by exact timestamp into snapshots, oldest first.
///
/// Rows are expected to be ordered by `(timestamp, package)`. Within a
/// group, coverages keep input order and the snapshot's branch and version
/// come from the group's first row; later rows that disagree are logged and
/// otherwise ignored.
pub fn group_coverage_rows<I>(rows: I) -> CoverageSnapshots
where
    I: IntoIterator<Item = CoverageRow>,
{
    let mut index: HashMap<i64, usize> = HashMap::new();
    let mut snapshots: CoverageSnapshots = Vec::new();

    for row in rows {
        let slot = *index.entry(row.timestamp).or_insert_with(|| {
            snapshots.push(CoverageSnapshot {
                coverages: Vec::new(),
                branch: row.branch.clone(),
                version: row.version.clone(),
                timestamp: row.timestamp,
            });
            snapshots.len() - 1
        });
        let snapshot = &mut snapshots[slot];

        if snapshot.version != row.version || snapshot.branch != row.branch {
            warn!(
                timestamp = row.timestamp,
                kept_version = %snapshot.version,
                kept_branch = %snapshot.branch,
                version = %row.version,
                branch = %row.branch,
                "coverage rows with different builds share a timestamp"
            );
        }

        snapshot.coverages.push(Coverage {
            package_name: row.package,
            percentage: row.percentage,
        });
    }

    // Timestamps are unique after grouping.
    snapshots.sort_by_key(|s| s.timestamp);
    snapshots
}
