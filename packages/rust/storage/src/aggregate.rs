//! Folding flat build/coverage/dependency join rows back into [`Build`]s.
//!
//! The build queries join `builds` against both `coverage` and
//! `dependencies`, so a build with `m` coverage rows and `n` dependency rows
//! arrives as `m × n` rows carrying identical scalars. Child entries are
//! written into maps, which makes the repeats harmless.

use std::collections::{BTreeMap, HashMap};

use buildledger_shared::{Build, Result};
use chrono::{DateTime, Utc};

/// One denormalized row: build scalars plus at most one coverage entry and
/// at most one dependency entry.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRow {
    pub hostname: String,
    pub architecture: String,
    pub toolchain_version: Option<String>,
    pub source_url: String,
    pub binary_url: String,
    pub version: String,
    pub language: String,
    pub name: String,
    pub branch: String,
    pub timestamp: i64,
    pub package: Option<String>,
    pub percentage: Option<f64>,
    pub import_path: Option<String>,
    pub commit: Option<String>,
    pub merge_base_date: Option<DateTime<Utc>>,
}

impl BuildRow {
    /// A row carrying only the scalars of `build`, with no child entry.
    pub fn scalars(build: &Build) -> Self {
        Self {
            hostname: build.hostname.clone(),
            architecture: build.architecture.clone(),
            toolchain_version: build.toolchain_version.clone(),
            source_url: build.source_url.clone(),
            binary_url: build.binary_url.clone(),
            version: build.version.clone(),
            language: build.language.clone(),
            name: build.name.clone(),
            branch: build.branch.clone(),
            timestamp: build.timestamp,
            package: None,
            percentage: None,
            import_path: None,
            commit: None,
            merge_base_date: None,
        }
    }

    /// The rows a LEFT JOIN of `build` against its coverage and dependency
    /// tables would produce: one per (coverage, dependency) pair, with a
    /// null side when that table has no entries.
    pub fn cross_join(build: &Build) -> Vec<Self> {
        let coverage: Vec<Option<(&String, f64)>> = if build.coverage.is_empty() {
            vec![None]
        } else {
            build.coverage.iter().map(|(p, pct)| Some((p, *pct))).collect()
        };
        let dependencies: Vec<Option<(&String, &String)>> = if build.dependencies.is_empty() {
            vec![None]
        } else {
            build.dependencies.iter().map(Some).collect()
        };

        let base = Self::scalars(build);
        let mut rows = Vec::with_capacity(coverage.len() * dependencies.len());
        for cov in &coverage {
            for dep in &dependencies {
                let mut row = base.clone();
                if let Some((package, percentage)) = cov {
                    row.package = Some((*package).clone());
                    row.percentage = Some(*percentage);
                }
                if let Some((import_path, commit)) = dep {
                    row.import_path = Some((*import_path).clone());
                    row.commit = Some((*commit).clone());
                    row.merge_base_date = build.merge_base_dates.get(*import_path).copied();
                }
                rows.push(row);
            }
        }
        rows
    }

    fn new_build(&self) -> Build {
        Build {
            hostname: self.hostname.clone(),
            architecture: self.architecture.clone(),
            toolchain_version: self.toolchain_version.clone(),
            source_url: self.source_url.clone(),
            binary_url: self.binary_url.clone(),
            version: self.version.clone(),
            language: self.language.clone(),
            name: self.name.clone(),
            branch: self.branch.clone(),
            timestamp: self.timestamp,
            coverage: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            merge_base_dates: BTreeMap::new(),
        }
    }
}

/// Incremental builder that reconstructs builds in first-seen order.
#[derive(Debug, Default)]
pub struct BuildAggregator {
    index: HashMap<(String, String), usize>,
    builds: Vec<Build>,
}

impl BuildAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one row into the build it belongs to.
    pub fn push(&mut self, row: BuildRow) {
        let key = (row.name.clone(), row.version.clone());
        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => {
                self.builds.push(row.new_build());
                self.index.insert(key, self.builds.len() - 1);
                self.builds.len() - 1
            }
        };
        let build = &mut self.builds[slot];

        if let Some(package) = row.package {
            build
                .coverage
                .insert(package, row.percentage.unwrap_or_default());
        }

        if let Some(import_path) = row.import_path {
            if let Some(date) = row.merge_base_date {
                build.merge_base_dates.insert(import_path.clone(), date);
            }
            build
                .dependencies
                .insert(import_path, row.commit.unwrap_or_default());
        }
    }

    /// Number of distinct builds seen so far.
    pub fn len(&self) -> usize {
        self.builds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builds.is_empty()
    }

    /// Builds in the order their keys were first seen.
    pub fn finish(self) -> Vec<Build> {
        self.builds
    }
}

/// Aggregate a whole row stream. The first failed row aborts the
/// aggregation and nothing assembled so far is returned.
pub fn aggregate_rows<I>(rows: I) -> Result<Vec<Build>>
where
    I: IntoIterator<Item = Result<BuildRow>>,
{
    let mut aggregator = BuildAggregator::new();
    for row in rows {
        aggregator.push(row?);
    }
    Ok(aggregator.finish())
}
