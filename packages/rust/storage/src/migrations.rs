//! SQL migration definitions for the BuildLedger database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: builds, coverage, dependencies",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per registered build
CREATE TABLE IF NOT EXISTS builds (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    hostname     TEXT NOT NULL DEFAULT '',
    architecture TEXT NOT NULL DEFAULT '',
    goversion    TEXT,
    sourceurl    TEXT NOT NULL DEFAULT '',
    binaryurl    TEXT NOT NULL DEFAULT '',
    version      TEXT NOT NULL DEFAULT '',
    language     TEXT NOT NULL DEFAULT '',
    name         TEXT NOT NULL DEFAULT '',
    branch       TEXT NOT NULL DEFAULT '',
    timestamp    INTEGER NOT NULL,
    UNIQUE(name, version)
);

CREATE INDEX IF NOT EXISTS idx_builds_timestamp ON builds(timestamp);

-- Per-package coverage of a build
CREATE TABLE IF NOT EXISTS coverage (
    service    TEXT NOT NULL DEFAULT '',
    version    TEXT NOT NULL DEFAULT '',
    package    TEXT NOT NULL DEFAULT '',
    percentage REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (service, version, package)
);

-- Dependency commits of a build, with merge-base dates filled in later
CREATE TABLE IF NOT EXISTS dependencies (
    service       TEXT NOT NULL DEFAULT '',
    version       TEXT NOT NULL DEFAULT '',
    importpath    TEXT NOT NULL DEFAULT '',
    commit_sha    TEXT NOT NULL DEFAULT '',
    mergebasedate INTEGER,
    PRIMARY KEY (service, version, importpath)
);

CREATE INDEX IF NOT EXISTS idx_dependencies_importpath_commit_sha ON dependencies(importpath, commit_sha);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
    ]
}
