//! Commit-history lookups used to date dependency commits.
//!
//! A build's dependencies are pinned to commits. How stale a pin is can be
//! read from the date of its merge base with a reference such as `HEAD`.
//! [`CommitHistory`] is that lookup; [`GithubCommits`] answers it from the
//! GitHub compare API.

mod github;

use async_trait::async_trait;
use buildledger_shared::Result;
use chrono::{DateTime, Utc};

pub use github::{GithubCommits, GithubOptions};

/// Reference dependency commits are compared against.
pub const DEFAULT_REFERENCE: &str = "HEAD";

/// Source of merge-base dates for dependency commits.
#[async_trait]
pub trait CommitHistory: Send + Sync {
    /// Commit date of the merge base between `sha` and `reference` in the
    /// repository behind `import_path`.
    ///
    /// `Ok(None)` means the lookup worked but there is no merge base (or no
    /// date for it).
    async fn merge_base_date(
        &self,
        import_path: &str,
        sha: &str,
        reference: &str,
    ) -> Result<Option<DateTime<Utc>>>;
}
