//! GitHub compare-API client.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use buildledger_shared::{BuildLedgerError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use crate::CommitHistory;

/// Default timeout in seconds for compare requests.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Public GitHub REST endpoint.
const DEFAULT_API_URL: &str = "https://api.github.com";

/// User-Agent string for API requests (GitHub rejects requests without one).
const USER_AGENT: &str = concat!("BuildLedger/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for [`GithubCommits`].
#[derive(Debug, Clone)]
pub struct GithubOptions {
    /// Base URL of the REST API.
    pub api_url: String,
    /// Access token sent as a bearer token, if any.
    pub token: Option<String>,
    /// Timeout for HTTP requests in seconds.
    pub timeout_secs: u64,
}

impl Default for GithubOptions {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

// ---------------------------------------------------------------------------
// Response shape (only the fields we read)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CompareResponse {
    merge_base_commit: Option<CommitEnvelope>,
}

#[derive(Debug, Deserialize)]
struct CommitEnvelope {
    commit: Option<CommitDetail>,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    committer: Option<Signature>,
}

#[derive(Debug, Deserialize)]
struct Signature {
    date: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// [`CommitHistory`] backed by `GET /repos/{owner}/{repo}/compare/{base}...{head}`.
pub struct GithubCommits {
    client: Client,
    api_url: Url,
    token: Option<String>,
}

impl GithubCommits {
    /// Build a client for the configured API endpoint.
    pub fn new(opts: GithubOptions) -> Result<Self> {
        let api_url = Url::parse(&opts.api_url).map_err(|e| {
            BuildLedgerError::config(format!("invalid GitHub API URL '{}': {e}", opts.api_url))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(opts.timeout_secs))
            .build()
            .map_err(|e| BuildLedgerError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url,
            token: opts.token,
        })
    }

    /// Compare endpoint for one repository and commit range.
    fn compare_url(&self, owner: &str, repo: &str, base: &str, head: &str) -> Result<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                BuildLedgerError::config(format!("GitHub API URL cannot be a base: {}", self.api_url))
            })?
            .pop_if_empty()
            .extend(["repos", owner, repo, "compare", &format!("{base}...{head}")]);
        Ok(url)
    }
}

#[async_trait]
impl CommitHistory for GithubCommits {
    #[instrument(skip(self))]
    async fn merge_base_date(
        &self,
        import_path: &str,
        sha: &str,
        reference: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let (owner, repo) = parse_import_path(import_path)?;
        let url = self.compare_url(owner, repo, sha, reference)?;

        let mut request = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BuildLedgerError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(%url, "commit or repository not found");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(BuildLedgerError::Network(format!("{url}: HTTP {status}")));
        }

        let compare: CompareResponse = response
            .json()
            .await
            .map_err(|e| BuildLedgerError::Lookup(format!("{url}: invalid compare response: {e}")))?;

        Ok(compare
            .merge_base_commit
            .and_then(|c| c.commit)
            .and_then(|c| c.committer)
            .and_then(|s| s.date))
    }
}

/// Split a `github.com/<owner>/<repo>` import path.
fn parse_import_path(import_path: &str) -> Result<(&str, &str)> {
    static GITHUB_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^github\.com/([a-zA-Z0-9_-]+)/([a-zA-Z0-9_-]+)$").expect("valid regex")
    });

    let caps = GITHUB_IMPORT_RE.captures(import_path).ok_or_else(|| {
        BuildLedgerError::Lookup(format!("import path is not a github repo: {import_path}"))
    })?;
    match (caps.get(1), caps.get(2)) {
        (Some(owner), Some(repo)) => Ok((owner.as_str(), repo.as_str())),
        _ => Err(BuildLedgerError::Lookup(format!(
            "import path is not a github repo: {import_path}"
        ))),
    }
}
