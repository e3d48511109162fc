//! Parser for `go test -cover` output.
//!
//! CI jobs pipe test output through this to produce the `Coverage` map a
//! build is registered with.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::sync::LazyLock;

use buildledger_shared::{BuildLedgerError, Coverage, Result};
use regex::Regex;
use tracing::debug;

/// Path component after which package names start.
pub const DEFAULT_ROOT: &str = "workspace";

/// Name given to the package at the root of a service.
const ROOT_PACKAGE: &str = "main";

static PERCENTAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]{1,3}\.[0-9]{1,2}%").expect("valid regex"));

static PACKAGE_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_.*?\s").expect("valid regex"));

static COVERAGE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ok.*?coverage").expect("valid regex"));

/// Whether a line is a package summary carrying a coverage figure.
pub fn is_coverage_line(line: &str) -> bool {
    COVERAGE_LINE_RE.is_match(line)
}

/// Parse one `ok <path> <time> coverage: N% of statements` line.
pub fn parse_line(line: &str, root: &str) -> Result<Coverage> {
    let percentage = PERCENTAGE_RE
        .find(line)
        .map(|m| m.as_str().trim_end_matches('%'))
        .ok_or_else(|| BuildLedgerError::parse(format!("no coverage percentage in: {line}")))?
        .parse::<f64>()
        .map_err(|e| BuildLedgerError::parse(format!("couldn't parse percentage: {e}")))?;

    let path = PACKAGE_PATH_RE
        .find(line)
        .map(|m| m.as_str().trim())
        .unwrap_or_default();
    let start = path
        .find(root)
        .map(|i| i + root.len())
        .ok_or_else(|| BuildLedgerError::parse(format!("couldn't parse package name: {line}")))?;

    let package_name = match path[start..].trim_start_matches('/') {
        "" => ROOT_PACKAGE.to_string(),
        name => name.to_string(),
    };

    Ok(Coverage {
        package_name,
        percentage,
    })
}

/// Collect coverage from every summary line of a test run.
///
/// Other lines are skipped. The first summary line that cannot be parsed
/// fails the whole run.
pub fn parse_coverage<R: BufRead>(reader: R, root: &str) -> Result<Vec<Coverage>> {
    let mut coverages = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| BuildLedgerError::parse(format!("reading test output: {e}")))?;
        if !is_coverage_line(&line) {
            continue;
        }
        let coverage = parse_line(&line, root)?;
        debug!(package = %coverage.package_name, percentage = coverage.percentage, "parsed coverage");
        coverages.push(coverage);
    }
    Ok(coverages)
}

/// Collapse parsed lines into the package → percentage map builds carry.
pub fn coverage_map(coverages: &[Coverage]) -> BTreeMap<String, f64> {
    coverages
        .iter()
        .map(|c| (c.package_name.clone(), c.percentage))
        .collect()
}
