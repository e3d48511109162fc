//! Shared types, error model, and configuration for BuildLedger.
//!
//! This crate is the foundation depended on by all other BuildLedger crates.
//! It provides:
//! - [`BuildLedgerError`]: the unified error type
//! - Domain types ([`Build`], [`Coverage`], [`CoverageSnapshot`])
//! - Configuration ([`AppConfig`], config loading)
//! - Required-field validation ([`Validate`], [`validate`])

pub mod config;
pub mod error;
pub mod types;
pub mod validate;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DatabaseConfig, DefaultsConfig, GithubConfig, config_dir, config_file_path,
    expand_home, init_config, load_config, load_config_from,
};
pub use error::{BuildLedgerError, Result};
pub use types::{Build, Coverage, CoverageSnapshot, CoverageSnapshots};
pub use validate::{Validate, blank_fields, validate};
