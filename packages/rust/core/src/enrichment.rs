//! Best-effort dependency enrichment.
//!
//! After a build is stored, each of its dependency commits is dated by the
//! merge base it shares with `HEAD` of its repository. Lookups and writes
//! that fail are logged and skipped; nothing is reported back to whoever
//! registered the build.

use std::sync::Arc;

use buildledger_commits::{CommitHistory, DEFAULT_REFERENCE};
use buildledger_shared::Build;
use buildledger_storage::BuildRepository;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

/// Outcome of one enrichment pass, by import path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentReport {
    /// Dependencies whose merge-base date was stored.
    pub resolved: Vec<String>,
    /// Dependencies left without a date.
    pub unresolved: Vec<String>,
}

/// Date every dependency of `build` and persist what could be resolved.
///
/// Dependencies are processed one at a time, in import-path order. No
/// retries.
#[instrument(skip_all, fields(name = %build.name, version = %build.version))]
pub async fn enrich_dependencies(
    repo: &dyn BuildRepository,
    commits: &dyn CommitHistory,
    build: &Build,
) -> EnrichmentReport {
    let mut report = EnrichmentReport::default();

    for (import_path, commit) in &build.dependencies {
        let date = match commits
            .merge_base_date(import_path, commit, DEFAULT_REFERENCE)
            .await
        {
            Ok(Some(date)) => date,
            Ok(None) => {
                warn!(%import_path, %commit, "no merge base found");
                report.unresolved.push(import_path.clone());
                continue;
            }
            Err(e) => {
                warn!(%import_path, %commit, error = %e, "merge base lookup failed");
                report.unresolved.push(import_path.clone());
                continue;
            }
        };

        match repo
            .set_merge_base_date(&build.name, &build.version, import_path, commit, date)
            .await
        {
            Ok(true) => {
                debug!(%import_path, %date, "merge base date stored");
                report.resolved.push(import_path.clone());
            }
            Ok(false) => {
                warn!(%import_path, %commit, "dependency gone or already dated, nothing stored");
                report.unresolved.push(import_path.clone());
            }
            Err(e) => {
                warn!(%import_path, error = %e, "failed to store merge base date");
                report.unresolved.push(import_path.clone());
            }
        }
    }

    info!(
        resolved = report.resolved.len(),
        unresolved = report.unresolved.len(),
        "dependency enrichment finished"
    );
    report
}

/// Run [`enrich_dependencies`] on its own task.
///
/// Dropping the handle detaches the task; awaiting it yields the report.
pub fn spawn_enrichment(
    repo: Arc<dyn BuildRepository>,
    commits: Arc<dyn CommitHistory>,
    build: Build,
) -> JoinHandle<EnrichmentReport> {
    let span = info_span!("enrichment_task");
    tokio::spawn(
        async move { enrich_dependencies(repo.as_ref(), commits.as_ref(), &build).await }
            .instrument(span),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use buildledger_shared::{BuildLedgerError, Result};
    use buildledger_storage::MemoryRepository;
    use chrono::{DateTime, Utc};

    use super::*;

    /// Answers from a fixed table; unknown import paths fail.
    struct TableHistory(BTreeMap<&'static str, Option<DateTime<Utc>>>);

    #[async_trait]
    impl CommitHistory for TableHistory {
        async fn merge_base_date(
            &self,
            import_path: &str,
            _sha: &str,
            reference: &str,
        ) -> Result<Option<DateTime<Utc>>> {
            assert_eq!(reference, "HEAD");
            self.0
                .get(import_path)
                .copied()
                .ok_or_else(|| BuildLedgerError::Lookup(format!("unreachable: {import_path}")))
        }
    }

    fn date(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn build_with_deps(deps: &[(&str, &str)]) -> Build {
        Build {
            hostname: "ci-1".into(),
            architecture: "amd64".into(),
            toolchain_version: Some("go1.1".into()),
            source_url: "https://github.com/example/svc/commit/abc".into(),
            binary_url: "s3://artifacts/svc".into(),
            version: "20130627".into(),
            language: "Go".into(),
            name: "com.example.svc".into(),
            branch: "master".into(),
            timestamp: 1_372_346_773,
            coverage: BTreeMap::new(),
            dependencies: deps
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
            merge_base_dates: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_failed_lookup_is_skipped() {
        let repo = MemoryRepository::new();
        let build = build_with_deps(&[
            ("github.com/example/layer", "e6dc54ee"),
            ("github.com/example/gone", "0badc0de"),
        ]);
        repo.create(&build).await.unwrap();

        let history = TableHistory(BTreeMap::from([(
            "github.com/example/layer",
            Some(date(1_370_087_071)),
        )]));

        let report = enrich_dependencies(&repo, &history, &build).await;
        assert_eq!(report.resolved, vec!["github.com/example/layer"]);
        assert_eq!(report.unresolved, vec!["github.com/example/gone"]);

        let stored = repo
            .get_version(&build.name, &build.version)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.dependencies.len(), 2);
        assert_eq!(stored.merge_base_dates.len(), 1);
        assert_eq!(
            stored.merge_base_dates["github.com/example/layer"],
            date(1_370_087_071)
        );
    }

    #[tokio::test]
    async fn test_missing_merge_base_is_unresolved() {
        let repo = MemoryRepository::new();
        let build = build_with_deps(&[("github.com/example/layer", "e6dc54ee")]);
        repo.create(&build).await.unwrap();

        let history = TableHistory(BTreeMap::from([("github.com/example/layer", None)]));
        let report = enrich_dependencies(&repo, &history, &build).await;

        assert!(report.resolved.is_empty());
        assert_eq!(report.unresolved.len(), 1);
    }

    /// Store whose merge-base writes always fail.
    struct ReadOnlyRepo(MemoryRepository);

    #[async_trait]
    impl BuildRepository for ReadOnlyRepo {
        async fn create(&self, build: &Build) -> Result<()> {
            self.0.create(build).await
        }
        async fn get_all(&self, limit: u32) -> Result<Vec<Build>> {
            self.0.get_all(limit).await
        }
        async fn get_all_with_name(&self, name: &str, limit: u32) -> Result<Vec<Build>> {
            self.0.get_all_with_name(name, limit).await
        }
        async fn get_version(&self, name: &str, version: &str) -> Result<Option<Build>> {
            self.0.get_version(name, version).await
        }
        async fn delete(&self, name: &str, version: &str) -> Result<()> {
            self.0.delete(name, version).await
        }
        async fn get_names(&self, filter: &str) -> Result<Vec<String>> {
            self.0.get_names(filter).await
        }
        async fn get_coverage(&self, name: &str, version: &str) -> Result<BTreeMap<String, f64>> {
            self.0.get_coverage(name, version).await
        }
        async fn get_coverage_trend(
            &self,
            name: &str,
            since: DateTime<Utc>,
        ) -> Result<buildledger_shared::CoverageSnapshots> {
            self.0.get_coverage_trend(name, since).await
        }
        async fn set_merge_base_date(
            &self,
            _name: &str,
            _version: &str,
            _import_path: &str,
            _commit: &str,
            _date: DateTime<Utc>,
        ) -> Result<bool> {
            Err(BuildLedgerError::Storage("database is read-only".into()))
        }
    }

    #[tokio::test]
    async fn test_persist_failure_is_absorbed() {
        let repo = ReadOnlyRepo(MemoryRepository::new());
        let build = build_with_deps(&[("github.com/example/layer", "e6dc54ee")]);
        repo.create(&build).await.unwrap();

        let history = TableHistory(BTreeMap::from([(
            "github.com/example/layer",
            Some(date(1_370_087_071)),
        )]));
        let report = enrich_dependencies(&repo, &history, &build).await;

        assert!(report.resolved.is_empty());
        assert_eq!(report.unresolved, vec!["github.com/example/layer"]);
        let stored = repo.get_version(&build.name, &build.version).await.unwrap().unwrap();
        assert!(stored.merge_base_dates.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_build_is_unresolved() {
        let repo = MemoryRepository::new();
        let build = build_with_deps(&[("github.com/example/layer", "e6dc54ee")]);
        repo.create(&build).await.unwrap();
        repo.delete(&build.name, &build.version).await.unwrap();

        let history = TableHistory(BTreeMap::from([(
            "github.com/example/layer",
            Some(date(1_370_087_071)),
        )]));
        let report = enrich_dependencies(&repo, &history, &build).await;

        assert!(report.resolved.is_empty());
        assert_eq!(report.unresolved, vec!["github.com/example/layer"]);
        assert!(repo.get_version(&build.name, &build.version).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_spawned_task_reports() {
        let repo = Arc::new(MemoryRepository::new());
        let build = build_with_deps(&[("github.com/example/layer", "e6dc54ee")]);
        repo.create(&build).await.unwrap();

        let history = Arc::new(TableHistory(BTreeMap::from([(
            "github.com/example/layer",
            Some(date(1_370_087_071)),
        )])));

        let report = spawn_enrichment(repo.clone(), history, build.clone())
            .await
            .unwrap();
        assert_eq!(report.resolved.len(), 1);

        let stored = repo.get_version(&build.name, &build.version).await.unwrap().unwrap();
        assert_eq!(stored.merge_base_dates.len(), 1);
    }

    #[tokio::test]
    async fn test_no_dependencies() {
        let repo = MemoryRepository::new();
        let build = build_with_deps(&[]);
        repo.create(&build).await.unwrap();

        let history = TableHistory(BTreeMap::new());
        let report = enrich_dependencies(&repo, &history, &build).await;
        assert_eq!(report, EnrichmentReport::default());
    }
}
