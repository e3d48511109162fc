//! Build record storage.
//!
//! [`Storage`] wraps a local libSQL database holding builds, their per-package
//! coverage, and their dependency commits. Queries come back as flat join
//! rows and are reshaped by [`aggregate`] (builds) and [`trend`] (coverage
//! history). [`MemoryRepository`] offers the same [`BuildRepository`]
//! contract without a database.
//!
//! **Access rules:**
//! - Registration and enrichment: read-write via [`Storage::open`]
//! - Query-only tooling: read-only via [`Storage::open_readonly`]

pub mod aggregate;
pub mod memory;
mod migrations;
pub mod repository;
pub mod trend;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use buildledger_shared::{Build, BuildLedgerError, CoverageSnapshots, Result};
use chrono::{DateTime, Utc};
use libsql::params::IntoParams;
use libsql::{Connection, Database, Row, Value, params};
use tracing::{debug, instrument};

pub use aggregate::{BuildAggregator, BuildRow, aggregate_rows};
pub use memory::MemoryRepository;
pub use repository::BuildRepository;
pub use trend::{CoverageRow, group_coverage_rows};

/// Columns of the build join, in the order [`build_row`] reads them.
const BUILD_COLUMNS: &str = "b.hostname, b.architecture, b.goversion, b.sourceurl, b.binaryurl, \
     b.version, b.language, b.name, b.branch, b.timestamp, \
     c.package, c.percentage, d.importpath, d.commit_sha, d.mergebasedate";

/// Widen builds against both child tables.
const BUILD_JOINS: &str = "LEFT JOIN coverage c ON b.name = c.service AND b.version = c.version \
     LEFT JOIN dependencies d ON b.name = d.service AND b.version = d.version";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BuildLedgerError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        BuildLedgerError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    pub async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(BuildLedgerError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    /// Run a build join query and fold its rows into builds.
    async fn query_builds(&self, sql: &str, params: impl IntoParams) -> Result<Vec<Build>> {
        let mut rows = self.conn.query(sql, params).await.map_err(storage_err)?;

        let mut aggregator = BuildAggregator::new();
        let mut row_count = 0usize;
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            aggregator.push(build_row(&row)?);
            row_count += 1;
        }
        debug!(rows = row_count, builds = aggregator.len(), "aggregated build rows");
        Ok(aggregator.finish())
    }
}

#[async_trait]
impl BuildRepository for Storage {
    #[instrument(skip_all, fields(name = %build.name, version = %build.version))]
    async fn create(&self, build: &Build) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO builds (hostname, architecture, goversion, sourceurl, binaryurl, version, language, name, branch, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    build.hostname.as_str(),
                    build.architecture.as_str(),
                    build.toolchain_version.as_deref(),
                    build.source_url.as_str(),
                    build.binary_url.as_str(),
                    build.version.as_str(),
                    build.language.as_str(),
                    build.name.as_str(),
                    build.branch.as_str(),
                    build.timestamp,
                ],
            )
            .await
            .map_err(storage_err)?;

        for (package, percentage) in &build.coverage {
            self.conn
                .execute(
                    "INSERT INTO coverage (service, version, package, percentage) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        build.name.as_str(),
                        build.version.as_str(),
                        package.as_str(),
                        *percentage,
                    ],
                )
                .await
                .map_err(storage_err)?;
        }

        for (import_path, commit) in &build.dependencies {
            self.conn
                .execute(
                    "INSERT INTO dependencies (service, version, importpath, commit_sha) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        build.name.as_str(),
                        build.version.as_str(),
                        import_path.as_str(),
                        commit.as_str(),
                    ],
                )
                .await
                .map_err(storage_err)?;
        }

        debug!(
            packages = build.coverage.len(),
            dependencies = build.dependencies.len(),
            "build stored"
        );
        Ok(())
    }

    async fn get_all(&self, limit: u32) -> Result<Vec<Build>> {
        let sql = format!(
            "SELECT {BUILD_COLUMNS}
             FROM (SELECT * FROM builds ORDER BY timestamp DESC, id DESC LIMIT ?1) b
             {BUILD_JOINS}
             ORDER BY b.timestamp DESC, b.id DESC"
        );
        self.query_builds(&sql, params![i64::from(limit)]).await
    }

    async fn get_all_with_name(&self, name: &str, limit: u32) -> Result<Vec<Build>> {
        let sql = format!(
            "SELECT {BUILD_COLUMNS}
             FROM (SELECT * FROM builds WHERE name = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2) b
             {BUILD_JOINS}
             ORDER BY b.timestamp DESC, b.id DESC"
        );
        self.query_builds(&sql, params![name, i64::from(limit)]).await
    }

    async fn get_version(&self, name: &str, version: &str) -> Result<Option<Build>> {
        let sql = format!(
            "SELECT {BUILD_COLUMNS}
             FROM builds b
             {BUILD_JOINS}
             WHERE b.name = ?1 AND b.version = ?2"
        );
        let builds = self.query_builds(&sql, params![name, version]).await?;
        Ok(builds.into_iter().next())
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str, version: &str) -> Result<()> {
        self.check_writable()?;
        for sql in [
            "DELETE FROM coverage WHERE service = ?1 AND version = ?2",
            "DELETE FROM dependencies WHERE service = ?1 AND version = ?2",
            "DELETE FROM builds WHERE name = ?1 AND version = ?2",
        ] {
            self.conn
                .execute(sql, params![name, version])
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }

    async fn get_names(&self, filter: &str) -> Result<Vec<String>> {
        let pattern = format!("%{}%", escape_like(filter));
        let mut rows = self
            .conn
            .query(
                "SELECT DISTINCT name FROM builds WHERE name LIKE ?1 ESCAPE '\\' ORDER BY name ASC",
                params![pattern],
            )
            .await
            .map_err(storage_err)?;

        let mut names = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            names.push(text(&row, 0)?);
        }
        Ok(names)
    }

    async fn get_coverage(&self, name: &str, version: &str) -> Result<BTreeMap<String, f64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT package, ROUND(percentage, 2) FROM coverage
                 WHERE service = ?1 AND version = ?2 ORDER BY package ASC",
                params![name, version],
            )
            .await
            .map_err(storage_err)?;

        let mut coverage = BTreeMap::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            coverage.insert(text(&row, 0)?, real(&row, 1)?);
        }
        Ok(coverage)
    }

    #[instrument(skip(self), fields(since = %since))]
    async fn get_coverage_trend(
        &self,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<CoverageSnapshots> {
        let mut rows = self
            .conn
            .query(
                "SELECT c.service, c.version, b.branch, c.package, ROUND(c.percentage, 2), b.timestamp
                 FROM coverage c
                 JOIN builds b ON b.name = c.service AND b.version = c.version
                 WHERE c.service = ?1 AND b.timestamp > ?2
                 ORDER BY b.timestamp ASC, c.package ASC",
                params![name, since.timestamp()],
            )
            .await
            .map_err(storage_err)?;

        let mut coverage_rows = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            coverage_rows.push(CoverageRow {
                service: text(&row, 0)?,
                version: text(&row, 1)?,
                branch: text(&row, 2)?,
                package: text(&row, 3)?,
                percentage: real(&row, 4)?,
                timestamp: integer(&row, 5)?,
            });
        }

        let snapshots = group_coverage_rows(coverage_rows);
        debug!(snapshots = snapshots.len(), "coverage trend grouped");
        Ok(snapshots)
    }

    async fn set_merge_base_date(
        &self,
        name: &str,
        version: &str,
        import_path: &str,
        commit: &str,
        date: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_writable()?;
        let updated = self
            .conn
            .execute(
                "UPDATE dependencies SET mergebasedate = ?1
                 WHERE service = ?2 AND version = ?3 AND importpath = ?4 AND commit_sha = ?5
                   AND (mergebasedate IS NULL OR mergebasedate = ?1)",
                params![date.timestamp(), name, version, import_path, commit],
            )
            .await
            .map_err(storage_err)?;
        debug!(name, version, import_path, commit, updated, "merge base date set");
        Ok(updated > 0)
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn storage_err(e: libsql::Error) -> BuildLedgerError {
    BuildLedgerError::Storage(e.to_string())
}

fn unexpected(idx: i32, expected: &str, found: &Value) -> BuildLedgerError {
    BuildLedgerError::Storage(format!("column {idx}: expected {expected}, found {found:?}"))
}

fn opt_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx).map_err(storage_err)? {
        Value::Null => Ok(None),
        Value::Text(s) => Ok(Some(s)),
        other => Err(unexpected(idx, "text", &other)),
    }
}

fn text(row: &Row, idx: i32) -> Result<String> {
    opt_text(row, idx)?.ok_or_else(|| unexpected(idx, "text", &Value::Null))
}

fn opt_integer(row: &Row, idx: i32) -> Result<Option<i64>> {
    match row.get_value(idx).map_err(storage_err)? {
        Value::Null => Ok(None),
        Value::Integer(i) => Ok(Some(i)),
        other => Err(unexpected(idx, "integer", &other)),
    }
}

fn integer(row: &Row, idx: i32) -> Result<i64> {
    opt_integer(row, idx)?.ok_or_else(|| unexpected(idx, "integer", &Value::Null))
}

fn opt_real(row: &Row, idx: i32) -> Result<Option<f64>> {
    match row.get_value(idx).map_err(storage_err)? {
        Value::Null => Ok(None),
        Value::Real(f) => Ok(Some(f)),
        Value::Integer(i) => Ok(Some(i as f64)),
        other => Err(unexpected(idx, "real", &other)),
    }
}

fn real(row: &Row, idx: i32) -> Result<f64> {
    opt_real(row, idx)?.ok_or_else(|| unexpected(idx, "real", &Value::Null))
}

/// Decode one row of the build join (see [`BUILD_COLUMNS`]).
fn build_row(row: &Row) -> Result<BuildRow> {
    let merge_base_date = match opt_integer(row, 14)? {
        Some(secs) => Some(DateTime::from_timestamp(secs, 0).ok_or_else(|| {
            BuildLedgerError::Storage(format!("column 14: timestamp {secs} out of range"))
        })?),
        None => None,
    };

    Ok(BuildRow {
        hostname: text(row, 0)?,
        architecture: text(row, 1)?,
        toolchain_version: opt_text(row, 2)?,
        source_url: text(row, 3)?,
        binary_url: text(row, 4)?,
        version: text(row, 5)?,
        language: text(row, 6)?,
        name: text(row, 7)?,
        branch: text(row, 8)?,
        timestamp: integer(row, 9)?,
        package: opt_text(row, 10)?,
        percentage: opt_real(row, 11)?,
        import_path: opt_text(row, 12)?,
        commit: opt_text(row, 13)?,
        merge_base_date,
    })
}

/// Escape `LIKE` wildcards so a name filter matches literally.
fn escape_like(filter: &str) -> String {
    let mut escaped = String::with_capacity(filter.len());
    for ch in filter.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
