//! In-memory [`BuildRepository`] for tests and embedders.
//!
//! Fetches flatten the stored builds into the same join rows the SQL store
//! produces and run them through the aggregator and trend grouper, so both
//! stores shape their answers identically.
//!
//! ## Limitations
//!
//! - **Single-process only**: nothing is shared across process boundaries
//! - **No persistence**: all state is lost when the value is dropped

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use buildledger_shared::{Build, BuildLedgerError, CoverageSnapshots, Result};
use chrono::{DateTime, Utc};

use crate::aggregate::{BuildRow, aggregate_rows};
use crate::repository::{BuildRepository, round_percentage};
use crate::trend::{CoverageRow, group_coverage_rows};

/// Thread-safe in-memory build store.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    builds: RwLock<Vec<Build>>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> BuildLedgerError {
    BuildLedgerError::Storage("lock poisoned".into())
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored builds.
    pub fn len(&self) -> Result<usize> {
        Ok(self.builds.read().map_err(poison_err)?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Most recent matching builds, flattened and re-aggregated.
    fn newest<F>(&self, limit: u32, keep: F) -> Result<Vec<Build>>
    where
        F: Fn(&Build) -> bool,
    {
        let builds = self.builds.read().map_err(poison_err)?;
        // Newest insert first among equal timestamps, like `ORDER BY timestamp DESC, id DESC`.
        let mut matching: Vec<&Build> = builds.iter().rev().filter(|b| keep(b)).collect();
        matching.sort_by_key(|b| std::cmp::Reverse(b.timestamp));
        matching.truncate(limit as usize);

        aggregate_rows(
            matching
                .into_iter()
                .flat_map(BuildRow::cross_join)
                .map(Ok),
        )
    }
}

#[async_trait]
impl BuildRepository for MemoryRepository {
    async fn create(&self, build: &Build) -> Result<()> {
        let mut builds = self.builds.write().map_err(poison_err)?;
        if builds.iter().any(|b| b.key() == build.key()) {
            return Err(BuildLedgerError::Storage(format!(
                "build {}/{} already exists",
                build.name, build.version
            )));
        }
        let mut stored = build.clone();
        // Merge-base dates only ever arrive through `set_merge_base_date`.
        stored.merge_base_dates.clear();
        builds.push(stored);
        Ok(())
    }

    async fn get_all(&self, limit: u32) -> Result<Vec<Build>> {
        self.newest(limit, |_| true)
    }

    async fn get_all_with_name(&self, name: &str, limit: u32) -> Result<Vec<Build>> {
        self.newest(limit, |b| b.name == name)
    }

    async fn get_version(&self, name: &str, version: &str) -> Result<Option<Build>> {
        let found = self.newest(u32::MAX, |b| b.key() == (name, version))?;
        Ok(found.into_iter().next())
    }

    async fn delete(&self, name: &str, version: &str) -> Result<()> {
        let mut builds = self.builds.write().map_err(poison_err)?;
        builds.retain(|b| b.key() != (name, version));
        Ok(())
    }

    async fn get_names(&self, filter: &str) -> Result<Vec<String>> {
        let builds = self.builds.read().map_err(poison_err)?;
        let mut names: Vec<String> = builds
            .iter()
            .filter(|b| b.name.contains(filter))
            .map(|b| b.name.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn get_coverage(&self, name: &str, version: &str) -> Result<BTreeMap<String, f64>> {
        let builds = self.builds.read().map_err(poison_err)?;
        Ok(builds
            .iter()
            .filter(|b| b.key() == (name, version))
            .flat_map(|b| b.coverage.iter())
            .map(|(pkg, pct)| (pkg.clone(), round_percentage(*pct)))
            .collect())
    }

    async fn get_coverage_trend(
        &self,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<CoverageSnapshots> {
        let builds = self.builds.read().map_err(poison_err)?;
        let cutoff = since.timestamp();

        let mut rows: Vec<CoverageRow> = builds
            .iter()
            .filter(|b| b.name == name && b.timestamp > cutoff)
            .flat_map(|b| {
                b.coverage.iter().map(move |(pkg, pct)| CoverageRow {
                    service: b.name.clone(),
                    version: b.version.clone(),
                    branch: b.branch.clone(),
                    package: pkg.clone(),
                    percentage: round_percentage(*pct),
                    timestamp: b.timestamp,
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.package.cmp(&b.package))
        });

        Ok(group_coverage_rows(rows))
    }

    async fn set_merge_base_date(
        &self,
        name: &str,
        version: &str,
        import_path: &str,
        commit: &str,
        date: DateTime<Utc>,
    ) -> Result<bool> {
        let mut builds = self.builds.write().map_err(poison_err)?;
        let target = builds.iter_mut().find(|b| {
            b.key() == (name, version)
                && b.dependencies.get(import_path).map(String::as_str) == Some(commit)
        });
        let Some(build) = target else {
            return Ok(false);
        };
        let stored = *build
            .merge_base_dates
            .entry(import_path.to_string())
            .or_insert(date);
        Ok(stored == date)
    }
}
