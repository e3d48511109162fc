//! Core domain types for build records and coverage history.
//!
//! JSON field names follow the PascalCase shape build agents already post
//! (`Hostname`, `SourceURL`, `TimeStamp`, ...).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

/// One registered build of one service, keyed by `(name, version)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Build {
    /// The hostname that did the build.
    pub hostname: String,
    /// Target architecture (386, amd64, ...).
    pub architecture: String,
    /// Toolchain version used to build the binary, if reported.
    #[serde(rename = "GoVersion", default)]
    pub toolchain_version: Option<String>,
    /// VCS url, down to the commit level.
    #[serde(rename = "SourceURL")]
    pub source_url: String,
    /// Location of the built artifact.
    #[serde(rename = "BinaryURL")]
    pub binary_url: String,
    /// Build version, usually a sortable date such as `20130601114431`.
    pub version: String,
    /// Programming language.
    pub language: String,
    /// Service name.
    pub name: String,
    /// Git branch.
    pub branch: String,
    /// UTC unix timestamp of the build.
    #[serde(rename = "TimeStamp")]
    pub timestamp: i64,
    /// Code coverage as package => percentage.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub coverage: BTreeMap<String, f64>,
    /// Dependencies as import path => commit.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    /// Merge-base dates of dependency commits, filled in after registration.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub merge_base_dates: BTreeMap<String, DateTime<Utc>>,
}

impl Build {
    /// The `(name, version)` identity of this build.
    pub fn key(&self) -> (&str, &str) {
        (&self.name, &self.version)
    }
}

// ---------------------------------------------------------------------------
// Coverage history
// ---------------------------------------------------------------------------

/// Coverage percentage of a single package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Coverage {
    pub package_name: String,
    pub percentage: f64,
}

/// Per-package coverage observed at one point in time for one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CoverageSnapshot {
    /// Packages in the order they were read for this timestamp.
    pub coverages: Vec<Coverage>,
    pub branch: String,
    pub version: String,
    /// Unix seconds.
    pub timestamp: i64,
}

/// Snapshots ordered by timestamp, oldest first.
pub type CoverageSnapshots = Vec<CoverageSnapshot>;
