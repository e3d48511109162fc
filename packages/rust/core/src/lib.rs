//! Build registration workflows for BuildLedger.
//!
//! [`BuildService`] validates and stores builds through a
//! [`BuildRepository`](buildledger_storage::BuildRepository), then hands each
//! stored build to the [`enrichment`] task that dates its dependencies.
//! [`coverage`] turns `go test -cover` output into the coverage map a build
//! is registered with.

pub mod coverage;
pub mod enrichment;
pub mod service;

pub use enrichment::{EnrichmentReport, enrich_dependencies, spawn_enrichment};
pub use service::{BuildService, SINCE_FORMAT, parse_since};
