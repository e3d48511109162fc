//! Build registration and queries over a [`BuildRepository`].

use std::collections::BTreeMap;
use std::sync::Arc;

use buildledger_commits::CommitHistory;
use buildledger_shared::{
    Build, BuildLedgerError, CoverageSnapshots, DefaultsConfig, Result, validate,
};
use buildledger_storage::BuildRepository;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::enrichment::{EnrichmentReport, spawn_enrichment};

/// Format of the `since` argument of trend queries (UTC).
pub const SINCE_FORMAT: &str = "%Y%m%d%H%M%S";

/// Entry point for everything callers do with builds.
#[derive(Clone)]
pub struct BuildService {
    repo: Arc<dyn BuildRepository>,
    commits: Arc<dyn CommitHistory>,
    defaults: DefaultsConfig,
}

impl BuildService {
    pub fn new(repo: Arc<dyn BuildRepository>, commits: Arc<dyn CommitHistory>) -> Self {
        Self {
            repo,
            commits,
            defaults: DefaultsConfig::default(),
        }
    }

    /// Override the default list limit and trend window.
    pub fn with_defaults(mut self, defaults: DefaultsConfig) -> Self {
        self.defaults = defaults;
        self
    }

    /// Validate and store a build, then date its dependencies in the background.
    ///
    /// Returns once the build is stored. The handle resolves when enrichment
    /// finishes; dropping it leaves enrichment running.
    #[instrument(skip_all, fields(name = %build.name, version = %build.version))]
    pub async fn register(&self, build: Build) -> Result<JoinHandle<EnrichmentReport>> {
        validate(&build)?;
        self.repo.create(&build).await?;
        info!(dependencies = build.dependencies.len(), "build registered");

        Ok(spawn_enrichment(
            Arc::clone(&self.repo),
            Arc::clone(&self.commits),
            build,
        ))
    }

    /// Most recent builds, optionally of a single service.
    #[instrument(skip(self))]
    pub async fn builds(&self, name: Option<&str>, limit: Option<u32>) -> Result<Vec<Build>> {
        let limit = limit.unwrap_or(self.defaults.limit);
        match name.filter(|n| !n.is_empty()) {
            Some(name) => self.repo.get_all_with_name(name, limit).await,
            None => self.repo.get_all(limit).await,
        }
    }

    /// One build by service name and version.
    #[instrument(skip(self))]
    pub async fn build(&self, name: &str, version: &str) -> Result<Option<Build>> {
        require("name", name)?;
        self.repo.get_version(name, version).await
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str, version: &str) -> Result<()> {
        require("name", name)?;
        require("version", version)?;
        self.repo.delete(name, version).await?;
        info!("build deleted");
        Ok(())
    }

    /// Service names containing `filter`.
    pub async fn names(&self, filter: &str) -> Result<Vec<String>> {
        self.repo.get_names(filter).await
    }

    pub async fn coverage(&self, name: &str, version: &str) -> Result<BTreeMap<String, f64>> {
        self.repo.get_coverage(name, version).await
    }

    /// Coverage history of a service; `since` defaults to the trend window.
    #[instrument(skip(self))]
    pub async fn coverage_trend(
        &self,
        name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<CoverageSnapshots> {
        require("name", name)?;
        let since = since.unwrap_or_else(|| window_start(self.defaults.trend_window_days));
        debug!(%since, "fetching coverage trend");
        self.repo.get_coverage_trend(name, since).await
    }

    /// Default trend window of this service, in days.
    pub fn trend_window_days(&self) -> i64 {
        self.defaults.trend_window_days
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(BuildLedgerError::validation(format!(
            "{field} cannot be blank"
        )));
    }
    Ok(())
}

/// Now minus `days`.
fn window_start(days: i64) -> DateTime<Utc> {
    let window = TimeDelta::try_days(days).unwrap_or_else(TimeDelta::zero);
    Utc::now()
        .checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Parse a `YYYYMMDDHHMMSS` timestamp, falling back to now minus `window_days`.
pub fn parse_since(text: Option<&str>, window_days: i64) -> DateTime<Utc> {
    text.and_then(|s| NaiveDateTime::parse_from_str(s, SINCE_FORMAT).ok())
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|| window_start(window_days))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use buildledger_storage::MemoryRepository;
    use tokio::sync::Notify;

    use super::*;

    fn build(name: &str, version: &str, timestamp: i64) -> Build {
        Build {
            hostname: "ci-1".into(),
            architecture: "amd64".into(),
            toolchain_version: Some("go1.1".into()),
            source_url: "https://github.com/example/svc/commit/abc".into(),
            binary_url: "s3://artifacts/svc".into(),
            version: version.into(),
            language: "Go".into(),
            name: name.into(),
            branch: "master".into(),
            timestamp,
            coverage: BTreeMap::from([("api".into(), 50.0)]),
            dependencies: BTreeMap::from([(
                "github.com/example/layer".into(),
                "e6dc54ee".into(),
            )]),
            merge_base_dates: BTreeMap::new(),
        }
    }

    /// Blocks every lookup until released.
    struct GatedHistory {
        gate: Notify,
        date: DateTime<Utc>,
    }

    #[async_trait]
    impl CommitHistory for GatedHistory {
        async fn merge_base_date(
            &self,
            _import_path: &str,
            _sha: &str,
            _reference: &str,
        ) -> Result<Option<DateTime<Utc>>> {
            self.gate.notified().await;
            Ok(Some(self.date))
        }
    }

    /// Never finds anything.
    struct NoHistory;

    #[async_trait]
    impl CommitHistory for NoHistory {
        async fn merge_base_date(
            &self,
            _import_path: &str,
            _sha: &str,
            _reference: &str,
        ) -> Result<Option<DateTime<Utc>>> {
            Ok(None)
        }
    }

    /// Dates only the layer repository; everything else is unreachable.
    struct LayerOnlyHistory(DateTime<Utc>);

    #[async_trait]
    impl CommitHistory for LayerOnlyHistory {
        async fn merge_base_date(
            &self,
            import_path: &str,
            _sha: &str,
            _reference: &str,
        ) -> Result<Option<DateTime<Utc>>> {
            if import_path == "github.com/example/layer" {
                Ok(Some(self.0))
            } else {
                Err(BuildLedgerError::Network(format!("{import_path}: HTTP 502")))
            }
        }
    }

    fn service(repo: Arc<MemoryRepository>) -> BuildService {
        BuildService::new(repo, Arc::new(NoHistory))
    }

    #[tokio::test]
    async fn test_register_returns_before_lookup_finishes() {
        let repo = Arc::new(MemoryRepository::new());
        let history = Arc::new(GatedHistory {
            gate: Notify::new(),
            date: DateTime::from_timestamp(1_370_087_071, 0).unwrap(),
        });
        let svc = BuildService::new(repo.clone(), history.clone());

        let handle = svc.register(build("svc", "1", 100)).await.unwrap();

        // Stored and queryable while the lookup is still parked.
        let stored = repo.get_version("svc", "1").await.unwrap().unwrap();
        assert!(stored.merge_base_dates.is_empty());
        assert!(!handle.is_finished());

        history.gate.notify_one();
        let report = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.resolved, vec!["github.com/example/layer"]);

        let stored = repo.get_version("svc", "1").await.unwrap().unwrap();
        assert_eq!(stored.merge_base_dates.len(), 1);
    }

    #[tokio::test]
    async fn test_register_keeps_only_successful_dates() {
        let repo = Arc::new(MemoryRepository::new());
        let dated = DateTime::from_timestamp(1_370_087_071, 0).unwrap();
        let svc = BuildService::new(repo.clone(), Arc::new(LayerOnlyHistory(dated)));

        let mut registered = build("svc", "1", 100);
        registered
            .dependencies
            .insert("github.com/example/protobuf".into(), "a1b2c3d4".into());

        let handle = svc.register(registered.clone()).await.unwrap();
        let report = handle.await.unwrap();
        assert_eq!(report.resolved, vec!["github.com/example/layer"]);
        assert_eq!(report.unresolved, vec!["github.com/example/protobuf"]);

        let stored = repo.get_version("svc", "1").await.unwrap().unwrap();
        assert_eq!(stored.dependencies, registered.dependencies);
        assert_eq!(stored.coverage, registered.coverage);
        assert_eq!(
            stored.merge_base_dates,
            BTreeMap::from([("github.com/example/layer".to_string(), dated)])
        );
    }

    #[tokio::test]
    async fn test_invalid_build_is_not_stored() {
        let repo = Arc::new(MemoryRepository::new());
        let svc = service(repo.clone());

        let mut invalid = build("svc", "1", 100);
        invalid.hostname.clear();
        invalid.branch.clear();

        let err = svc.register(invalid).await.unwrap_err();
        assert!(matches!(err, BuildLedgerError::Validation { .. }));
        assert!(err.to_string().contains("Hostname"));
        assert!(repo.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails() {
        let repo = Arc::new(MemoryRepository::new());
        let svc = service(repo.clone());

        svc.register(build("svc", "1", 100)).await.unwrap().await.unwrap();
        assert!(svc.register(build("svc", "1", 200)).await.is_err());
        assert_eq!(repo.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_builds_uses_default_limit() {
        let repo = Arc::new(MemoryRepository::new());
        let svc = service(repo.clone()).with_defaults(DefaultsConfig {
            limit: 2,
            trend_window_days: 90,
        });
        for v in 0..4 {
            repo.create(&build("svc", &v.to_string(), v)).await.unwrap();
        }
        repo.create(&build("other", "1", 10)).await.unwrap();

        assert_eq!(svc.builds(None, None).await.unwrap().len(), 2);
        assert_eq!(svc.builds(None, Some(10)).await.unwrap().len(), 5);

        let named = svc.builds(Some("svc"), Some(10)).await.unwrap();
        assert_eq!(named.len(), 4);
        assert_eq!(named[0].version, "3");

        // An empty name means all services.
        assert_eq!(svc.builds(Some(""), Some(10)).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_blank_arguments_rejected() {
        let svc = service(Arc::new(MemoryRepository::new()));
        assert!(svc.build("", "1").await.is_err());
        assert!(svc.delete("svc", "").await.is_err());
        assert!(svc.delete("", "1").await.is_err());
        assert!(svc.coverage_trend("", None).await.is_err());
        assert!(svc.build("svc", "1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trend_defaults_to_window() {
        let repo = Arc::new(MemoryRepository::new());
        let svc = service(repo.clone());

        let now = Utc::now().timestamp();
        repo.create(&build("svc", "old", now - 200 * 86_400)).await.unwrap();
        repo.create(&build("svc", "new", now - 86_400)).await.unwrap();

        let trend = svc.coverage_trend("svc", None).await.unwrap();
        assert_eq!(trend.len(), 1);
        assert_eq!(trend[0].version, "new");

        let all = svc
            .coverage_trend("svc", DateTime::from_timestamp(0, 0))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_parse_since() {
        let parsed = parse_since(Some("20130627150613"), 90);
        assert_eq!(parsed.timestamp(), 1_372_345_573);

        let fallback = parse_since(Some("last tuesday"), 90);
        let expected = Utc::now() - TimeDelta::days(90);
        assert!((fallback - expected).num_seconds().abs() < 5);

        let missing = parse_since(None, 1);
        let expected = Utc::now() - TimeDelta::days(1);
        assert!((missing - expected).num_seconds().abs() < 5);
    }
}
