//! CLI command definitions, routing, and tracing setup.

use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use buildledger_commits::{GithubCommits, GithubOptions};
use buildledger_core::BuildService;
use buildledger_core::coverage::{self, DEFAULT_ROOT};
use buildledger_core::parse_since;
use buildledger_shared::{AppConfig, Build, expand_home, init_config, load_config};
use buildledger_storage::Storage;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use serde::Serialize;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// BuildLedger: build records, coverage history, and dependency staleness.
#[derive(Parser)]
#[command(
    name = "buildledger",
    version,
    about = "Record build metadata, per-package coverage, and dependency merge-base dates.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Database path (overrides `[database] path`).
    #[arg(long, global = true, env = "BUILD_LEDGER_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Create the database or bring its schema up to date.
    Migrate,

    /// Register a build from a JSON document.
    Register {
        /// Path to the build JSON, or `-` for stdin.
        #[arg(default_value = "-")]
        file: String,

        /// Return without waiting for dependency enrichment.
        #[arg(long)]
        detach: bool,
    },

    /// List the most recent builds.
    List {
        /// Only builds of this service.
        #[arg(short, long)]
        name: Option<String>,

        /// Maximum number of builds (defaults to `[defaults] limit`).
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Show a single build.
    Show { name: String, version: String },

    /// Delete a build with its coverage and dependencies.
    Delete { name: String, version: String },

    /// List service names.
    Names {
        /// Only names containing this text.
        #[arg(short, long, default_value = "")]
        filter: String,
    },

    /// Per-package coverage of one build.
    Coverage { name: String, version: String },

    /// Coverage history of a service.
    Trend {
        name: String,

        /// Start of the window as YYYYMMDDHHMMSS (UTC); defaults to the trend window.
        #[arg(long)]
        since: Option<String>,
    },

    /// Turn `go test -cover` output into a coverage map.
    ParseCoverage {
        /// File holding the test output; stdin when omitted.
        file: Option<PathBuf>,

        /// Path component package names are taken relative to.
        #[arg(long, default_value = DEFAULT_ROOT)]
        root: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "buildledger=info",
        1 => "buildledger=debug",
        _ => "buildledger=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so JSON output on stdout stays pipeable.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let db = cli.db;
    match cli.command {
        Command::Migrate => cmd_migrate(db).await,
        Command::Register { file, detach } => cmd_register(db, &file, detach).await,
        Command::List { name, limit } => cmd_list(db, name.as_deref(), limit).await,
        Command::Show { name, version } => cmd_show(db, &name, &version).await,
        Command::Delete { name, version } => cmd_delete(db, &name, &version).await,
        Command::Names { filter } => cmd_names(db, &filter).await,
        Command::Coverage { name, version } => cmd_coverage(db, &name, &version).await,
        Command::Trend { name, since } => cmd_trend(db, &name, since.as_deref()).await,
        Command::ParseCoverage { file, root } => cmd_parse_coverage(file.as_deref(), &root),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Resolve the database path: `--db` wins over the config file.
fn database_path(config: &AppConfig, db: Option<PathBuf>) -> Result<PathBuf> {
    match db {
        Some(path) => Ok(path),
        None => Ok(expand_home(&config.database.path)?),
    }
}

/// Open the store and wrap it in a service.
///
/// Query-only commands open the database read-only and require it to exist.
async fn open_service(db: Option<PathBuf>, writable: bool) -> Result<BuildService> {
    let config = load_config()?;
    let path = database_path(&config, db)?;
    debug!(path = %path.display(), writable, "opening database");

    let storage = if writable {
        Storage::open(&path).await?
    } else {
        if !path.exists() {
            return Err(eyre!(
                "no database at {}; run `buildledger migrate` first",
                path.display()
            ));
        }
        Storage::open_readonly(&path).await?
    };

    let commits = GithubCommits::new(GithubOptions {
        api_url: config.github.api_url.clone(),
        token: config.github.token(),
        timeout_secs: config.github.timeout_secs,
    })?;

    Ok(BuildService::new(Arc::new(storage), Arc::new(commits)).with_defaults(config.defaults))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Read a whole file, or stdin for `-`.
fn read_input(file: &str) -> Result<String> {
    let mut raw = String::new();
    if file == "-" {
        std::io::stdin()
            .read_to_string(&mut raw)
            .wrap_err("failed to read stdin")?;
    } else {
        raw = std::fs::read_to_string(file).wrap_err_with(|| format!("failed to read {file}"))?;
    }
    Ok(raw)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_migrate(db: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let path = database_path(&config, db)?;
    let storage = Storage::open(&path).await?;
    println!(
        "Database at {} is at schema version {}",
        path.display(),
        storage.schema_version().await
    );
    Ok(())
}

async fn cmd_register(db: Option<PathBuf>, file: &str, detach: bool) -> Result<()> {
    let raw = read_input(file)?;
    let build: Build = serde_json::from_str(&raw).wrap_err("build JSON is malformed")?;

    let service = open_service(db, true).await?;
    let key = format!("{}/{}", build.name, build.version);
    let enrichment = service.register(build).await?;
    println!("Registered {key}");

    if detach {
        // Enrichment is best effort; exiting now abandons it.
        return Ok(());
    }

    let report = enrichment
        .await
        .map_err(|e| eyre!("enrichment task failed: {e}"))?;
    info!(
        resolved = report.resolved.len(),
        unresolved = report.unresolved.len(),
        "dependencies dated"
    );
    for import_path in &report.unresolved {
        eprintln!("  no merge-base date for {import_path}");
    }
    Ok(())
}

async fn cmd_list(db: Option<PathBuf>, name: Option<&str>, limit: Option<u32>) -> Result<()> {
    let service = open_service(db, false).await?;
    print_json(&service.builds(name, limit).await?)
}

async fn cmd_show(db: Option<PathBuf>, name: &str, version: &str) -> Result<()> {
    let service = open_service(db, false).await?;
    match service.build(name, version).await? {
        Some(build) => print_json(&build),
        None => Err(eyre!("build {name}/{version} not found")),
    }
}

async fn cmd_delete(db: Option<PathBuf>, name: &str, version: &str) -> Result<()> {
    let service = open_service(db, true).await?;
    service.delete(name, version).await?;
    println!("Deleted {name}/{version}");
    Ok(())
}

async fn cmd_names(db: Option<PathBuf>, filter: &str) -> Result<()> {
    let service = open_service(db, false).await?;
    print_json(&service.names(filter).await?)
}

async fn cmd_coverage(db: Option<PathBuf>, name: &str, version: &str) -> Result<()> {
    let service = open_service(db, false).await?;
    print_json(&service.coverage(name, version).await?)
}

async fn cmd_trend(db: Option<PathBuf>, name: &str, since: Option<&str>) -> Result<()> {
    let service = open_service(db, false).await?;
    let since = parse_since(since, service.trend_window_days());
    print_json(&service.coverage_trend(name, Some(since)).await?)
}

fn cmd_parse_coverage(file: Option<&Path>, root: &str) -> Result<()> {
    let coverages = match file {
        Some(path) => {
            let f = std::fs::File::open(path)
                .wrap_err_with(|| format!("failed to open {}", path.display()))?;
            coverage::parse_coverage(BufReader::new(f), root)?
        }
        None => coverage::parse_coverage(std::io::stdin().lock(), root)?,
    };
    print_json(&coverage::coverage_map(&coverages))
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
