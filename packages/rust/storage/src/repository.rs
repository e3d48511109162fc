//! The repository contract build queries and enrichment go through.

use std::collections::BTreeMap;

use async_trait::async_trait;
use buildledger_shared::{Build, CoverageSnapshots, Result};
use chrono::{DateTime, Utc};

/// A store of build records, keyed by service name and version.
///
/// Every fetch returning builds is assembled by the row aggregator, and the
/// coverage trend by the trend grouper. Only `create`, `delete` and
/// `set_merge_base_date` write.
#[async_trait]
pub trait BuildRepository: Send + Sync {
    /// Persist a new build with its coverage and dependencies.
    async fn create(&self, build: &Build) -> Result<()>;

    /// The `limit` most recent builds across all services.
    async fn get_all(&self, limit: u32) -> Result<Vec<Build>>;

    /// The `limit` most recent builds of one service.
    async fn get_all_with_name(&self, name: &str, limit: u32) -> Result<Vec<Build>>;

    /// A single build, or `None` if no such `(name, version)` exists.
    async fn get_version(&self, name: &str, version: &str) -> Result<Option<Build>>;

    /// Remove a build and its child rows. Deleting a missing build is not an error.
    async fn delete(&self, name: &str, version: &str) -> Result<()>;

    /// Distinct service names containing `filter`, ascending.
    async fn get_names(&self, filter: &str) -> Result<Vec<String>>;

    /// Per-package coverage of one build, rounded to two decimals.
    async fn get_coverage(&self, name: &str, version: &str) -> Result<BTreeMap<String, f64>>;

    /// Coverage snapshots of a service for builds strictly after `since`.
    async fn get_coverage_trend(
        &self,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<CoverageSnapshots>;

    /// Record the merge-base date of the dependency `(import_path, commit)`.
    ///
    /// A date, once set, is never replaced; setting the same date again is
    /// allowed. Returns whether the dependency now holds `date`. `false`
    /// means no such dependency exists (build deleted, commit differs) or it
    /// already holds another date.
    async fn set_merge_base_date(
        &self,
        name: &str,
        version: &str,
        import_path: &str,
        commit: &str,
        date: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Round a percentage to two decimal places.
pub(crate) fn round_percentage(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
