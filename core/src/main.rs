//! Canopy CLI - validate and run a widget pipeline
//!
//! # Commands
//!
//! ```bash
//! canopy validate                  # Check configuration against the plugin registry
//! canopy run [--group taxon]       # Compute and persist widget results
//! canopy hierarchy taxon           # Rebuild the entity table of a group
//! canopy export [--target site]    # Publish persisted results
//! canopy plugins [--kind widget]   # List registered plugins (--json for a listing)
//! ```
//!
//! # Environment
//!
//! ```bash
//! CANOPY_DATABASE=sqlite://canopy.db     # when --database is absent
//! CANOPY_PLUGIN_DIRS=plugins:shared      # when --plugins is absent
//! RUST_LOG=canopy=debug                  # log filter (default canopy=info)
//! ```

use clap::{Parser, Subcommand};
use canopy::plugins::{global, PluginInfo, PluginKind, PluginLoader, PluginRegistry, PluginSource};
use canopy::Pipeline;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_DATABASE: &str = "sqlite://canopy.db";

#[derive(Parser)]
#[command(name = "canopy")]
#[command(about = "Configuration-driven widget pipeline for hierarchical reference data", long_about = None)]
struct Cli {
    /// Directory holding import.yml, transform.yml and export.yml
    #[arg(short, long, global = true, default_value = "config")]
    config_dir: PathBuf,

    /// SQLite database URL
    #[arg(short, long, global = true)]
    database: Option<String>,

    /// Project plugin directory (repeatable)
    #[arg(short, long = "plugins", global = true)]
    plugins: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration documents
    Validate,

    /// Run the transform engine
    Run {
        /// Only this group
        #[arg(short, long)]
        group: Option<String>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rebuild and store the hierarchy of a group
    Hierarchy {
        /// Group name
        group: String,
    },

    /// Export persisted results
    Export {
        /// Only this export target
        #[arg(short, long)]
        target: Option<String>,
    },

    /// List registered plugins
    Plugins {
        /// Only this kind (loader, transformer, exporter, widget)
        #[arg(short, long)]
        kind: Option<PluginKind>,

        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },
}

type CliResult = Result<i32, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("canopy=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let registry = load_plugins(plugin_dirs(&cli.plugins));

    let result = match &cli.command {
        Commands::Plugins { kind, json } => cmd_plugins(&registry, *kind, *json),
        Commands::Validate => cmd_validate(&cli, registry).await,
        Commands::Run { group, json } => cmd_run(&cli, registry, group.as_deref(), *json).await,
        Commands::Hierarchy { group } => cmd_hierarchy(&cli, registry, group).await,
        Commands::Export { target } => cmd_export(&cli, registry, target.as_deref()).await,
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// `--plugins` flags, else `CANOPY_PLUGIN_DIRS` split on `:`.
fn plugin_dirs(flags: &[PathBuf]) -> Vec<PathBuf> {
    if !flags.is_empty() {
        return flags.to_vec();
    }
    std::env::var("CANOPY_PLUGIN_DIRS")
        .map(|dirs| {
            dirs.split(':')
                .filter(|d| !d.trim().is_empty())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default()
}

fn load_plugins(dirs: Vec<PathBuf>) -> Arc<PluginRegistry> {
    let report = global::load(PluginLoader::new(dirs));
    for failure in &report.failures {
        eprintln!("⚠️  Skipped plugin module {}: {}", failure.module, failure.error);
    }
    global::snapshot()
}

async fn open(cli: &Cli, registry: Arc<PluginRegistry>) -> Result<Pipeline, Box<dyn std::error::Error>> {
    let url = cli
        .database
        .clone()
        .or_else(|| std::env::var("CANOPY_DATABASE").ok())
        .unwrap_or_else(|| DEFAULT_DATABASE.to_string());

    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(Pipeline::open(&cli.config_dir, pool, registry).await?)
}

fn cmd_plugins(registry: &PluginRegistry, kind: Option<PluginKind>, json: bool) -> CliResult {
    if json {
        let listing: Vec<PluginInfo> = registry
            .all()
            .filter(|d| kind.map_or(true, |k| d.kind() == k))
            .map(|d| PluginInfo::from(&**d))
            .collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(0);
    }

    let kinds: Vec<PluginKind> = match kind {
        Some(kind) => vec![kind],
        None => PluginKind::ALL.to_vec(),
    };

    for kind in kinds {
        let plugins = registry.list(kind);
        println!("{} ({})", kind, plugins.len());
        for plugin in plugins {
            let source = match &plugin.source {
                PluginSource::Bundled => "bundled".to_string(),
                PluginSource::Path(path) => path.display().to_string(),
            };
            println!("  {:<24} {:<40} {}", plugin.name, plugin.description, source);
        }
    }
    Ok(0)
}

async fn cmd_validate(cli: &Cli, registry: Arc<PluginRegistry>) -> CliResult {
    eprintln!("✔️  Validating: {}", cli.config_dir.display());
    let pipeline = open(cli, registry).await?;
    let report = pipeline.validate();

    if report.is_ok() {
        eprintln!("✅ Configuration is valid");
        return Ok(0);
    }
    eprintln!("\n❌ {} issue(s):", report.len());
    eprint!("{}", report);
    Ok(1)
}

async fn cmd_run(cli: &Cli, registry: Arc<PluginRegistry>, group: Option<&str>, json: bool) -> CliResult {
    let pipeline = open(cli, registry).await?;
    let summary = pipeline.run(group).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", summary);
    }
    Ok(summary.exit_code())
}

async fn cmd_hierarchy(cli: &Cli, registry: Arc<PluginRegistry>, group: &str) -> CliResult {
    let pipeline = open(cli, registry).await?;
    let hierarchy = pipeline.rebuild_hierarchy(group).await?;
    eprintln!("🌳 {}: {} entities, {} roots", group, hierarchy.len(), hierarchy.roots().count());
    Ok(0)
}

async fn cmd_export(cli: &Cli, registry: Arc<PluginRegistry>, target: Option<&str>) -> CliResult {
    let pipeline = open(cli, registry).await?;
    let outcomes = pipeline.export(target).await?;

    for (name, outcome) in &outcomes {
        eprintln!("📦 {}: {} file(s)", name, outcome.files.len());
        if let Some(dir) = outcome.files.first().and_then(|f| f.parent()).and_then(Path::parent) {
            eprintln!("   💾 Saved under: {}", dir.display());
        }
        for warning in outcome.warnings.iter().take(10) {
            eprintln!("   ⚠️  {}", warning);
        }
    }
    Ok(0)
}
