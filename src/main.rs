//! # Radio Cortex CLI (`cortex`)
//!
//! The `cortex` binary drives the catalog pipeline: collecting candidates
//! from configured sources, running the collect / enrich / validate agents,
//! operator repair, and the read-only query surfaces.
//!
//! ## Usage
//!
//! ```bash
//! cortex --config ./config/cortex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cortex init` | Create the SQLite database and run schema migrations |
//! | `cortex collect <source>` | Insert new candidates from a configured source |
//! | `cortex run <capability>` | Run one agent (bounded, dry run, or daemon) |
//! | `cortex sweep` | Clear expired leases |
//! | `cortex list` | List items, optionally by status |
//! | `cortex get <id>` | Show one item |
//! | `cortex search "<text>"` | Similarity search over approved items |
//! | `cortex requeue <id>` | Send a `*_failed` item back to its stage |
//! | `cortex stats` | Counts per status, vectors, active leases |
//! | `cortex serve` | Start the read-only HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! cortex init
//! cortex collect archive --limit 200
//! cortex run collect --max 50
//! cortex run enrich --daemon
//! cortex run validate --dry-run
//! cortex search "late night bossa nova" --limit 5
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use radio_cortex::config;
use radio_cortex::runner::RunOptions;
use radio_cortex::server::AppState;
use radio_cortex::{
    collect, db, embedding, get, lease, migrate, requeue, runner, search, server, stats,
};
use radio_cortex_core::clock::{Clock, SystemClock};
use radio_cortex_core::models::{Capability, Status};
use radio_cortex_core::store::CatalogStore;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Radio Cortex: a leased multi-agent pipeline that collects, enriches
/// and vets openly licensed music for similarity search.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cortex.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cortex",
    about = "Radio Cortex: collect, enrich and vet openly licensed music",
    version,
    long_about = "Radio Cortex keeps a catalog of openly licensed music in SQLite. \
    Independent agent processes claim items with time-bounded leases, move them through \
    collect, enrich and validate, and approved items become searchable by similarity."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cortex.toml")]
    config: PathBuf,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it on an existing catalog changes nothing.
    Init,

    /// Insert new candidates from a configured source.
    ///
    /// Candidates are normalized, de-duplicated by fingerprint, and
    /// inserted as `discovered`.
    Collect {
        /// Name of a `[sources.<name>]` entry.
        source: String,

        /// Maximum number of candidates to read.
        #[arg(long)]
        limit: Option<usize>,

        /// Report counts without inserting anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Run one agent against the catalog.
    ///
    /// Bounded by default: stops after `--max` items or when nothing is
    /// claimable. `--daemon` polls until Ctrl-C.
    Run {
        /// `collect`, `enrich` or `validate`.
        capability: Capability,

        /// Maximum number of items to process in a bounded run.
        #[arg(long, default_value_t = 100)]
        max: usize,

        /// Process one batch and release every lease without committing.
        #[arg(long, conflicts_with = "daemon")]
        dry_run: bool,

        /// Keep polling until interrupted.
        #[arg(long)]
        daemon: bool,

        /// Override `pipeline.batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override `pipeline.lease_secs`.
        #[arg(long)]
        lease_secs: Option<u64>,

        /// Override `pipeline.poll_interval_secs`.
        #[arg(long)]
        poll_secs: Option<u64>,

        /// Lease owner name. Defaults to `<capability>-<pid>-<random>`.
        #[arg(long)]
        owner: Option<String>,
    },

    /// Clear every expired lease.
    Sweep,

    /// List items, oldest first within a status or most recent overall.
    List {
        /// Only items in this status.
        #[arg(long)]
        status: Option<Status>,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Show one item by id.
    Get {
        id: String,
    },

    /// Similarity search over approved items.
    Search {
        query: String,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Send a `*_failed` item back to the stage that failed it.
    Requeue {
        id: String,
    },

    /// Show catalog statistics.
    Stats,

    /// Start the read-only HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let store = Arc::new(db::open_store(&cfg).await?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command {
        Commands::Init => {}
        Commands::Collect {
            source,
            limit,
            dry_run,
        } => {
            collect::run_collect(&cfg, store.as_ref(), clock, &source, limit, dry_run).await?;
        }
        Commands::Run {
            capability,
            max,
            dry_run,
            daemon,
            batch_size,
            lease_secs,
            poll_secs,
            owner,
        } => {
            let opts = RunOptions {
                max_items: max,
                dry_run,
                daemon,
                batch_size,
                lease_secs,
                poll_secs,
                owner,
            };
            runner::run_agent(&cfg, store, clock, capability, opts).await?;
        }
        Commands::Sweep => {
            lease::run_sweep(store, clock).await?;
        }
        Commands::List { status, limit } => {
            get::run_list(store.as_ref(), status, limit).await?;
        }
        Commands::Get { id } => {
            get::run_get(store.as_ref(), &id).await?;
        }
        Commands::Search { query, limit } => {
            let embedder = embedding::create_embedder(&cfg.embedding)?;
            search::run_search(store.as_ref(), embedder.as_ref(), &query, limit).await?;
        }
        Commands::Requeue { id } => {
            requeue::run_requeue(store.as_ref(), clock, &id).await?;
        }
        Commands::Stats => {
            stats::run_stats(store.as_ref(), &cfg.db.path, clock.now_millis()).await?;
        }
        Commands::Serve => {
            let embedder = embedding::create_embedder(&cfg.embedding)?;
            let store: Arc<dyn CatalogStore> = store;
            let state = AppState {
                store,
                embedder: Arc::from(embedder),
                clock,
            };
            server::run_server(&cfg.server.bind, state).await?;
        }
    }

    Ok(())
}
