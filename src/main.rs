//! # delta-harvest CLI (`dh`)
//!
//! Thin command surface over the harvesting library.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dh init` | Create the SQLite database and schema |
//! | `dh harvest [COMMUNITIES]...` | Harvest communities (delta by default) |
//! | `dh stats` | Show store statistics |
//! | `dh reset-checkpoint <COMMUNITY>` | Clear a community's resume point |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! dh init --config ./config/dh.toml
//!
//! # First harvest: bounded scan of the newest posts
//! dh harvest rust
//!
//! # Later runs only fetch what's new
//! dh harvest rust
//!
//! # Comprehensive history walk (slow, explicit opt-in)
//! dh harvest rust --mode full
//!
//! # Show what the next run would do without fetching
//! dh harvest rust --dry-run
//! ```
//!
//! Credentials are read from `REDDIT_CLIENT_ID` / `REDDIT_CLIENT_SECRET`.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use delta_harvest::config::{self, Credentials};
use delta_harvest::models::HarvestMode;
use delta_harvest::reddit::RedditSource;
use delta_harvest::{db, harvest, migrate, stats, telemetry};

/// delta-harvest — an incremental community discussion harvester.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "dh",
    about = "delta-harvest — incremental community discussion harvester",
    version,
    long_about = "delta-harvest walks a community's newest posts, stores posts and comments \
    in SQLite, and keeps a per-community checkpoint so repeated runs only fetch new content. \
    Interrupted runs are safe to re-run; already-stored content is updated in place, never \
    duplicated."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (communities, items, replies, checkpoints). Idempotent.
    Init,

    /// Harvest one or more communities.
    ///
    /// With no mode flag the engine resumes from each community's
    /// checkpoint; a community without one gets a bounded first harvest.
    /// Defaults to the communities listed in the config file when none are
    /// named here.
    Harvest {
        /// Community names to harvest.
        communities: Vec<String>,

        /// Force a mode instead of letting the planner decide.
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Maximum items to fetch per community this run.
        #[arg(long)]
        limit: Option<u32>,

        /// Print each community's plan without fetching anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show store statistics: totals and a per-community breakdown.
    Stats,

    /// Clear a community's checkpoint.
    ///
    /// The next harvest of that community behaves exactly like a first
    /// harvest. Stored items and replies are kept.
    ResetCheckpoint {
        /// Community name.
        community: String,
    },
}

/// Caller-forced harvest mode.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Fetch only content newer than the checkpoint.
    Delta,
    /// Walk history as far as the page budget allows, ignoring the
    /// checkpoint.
    Full,
}

fn resolve_mode(arg: Option<ModeArg>) -> HarvestMode {
    match arg {
        None => HarvestMode::Auto,
        Some(ModeArg::Delta) => HarvestMode::Delta,
        Some(ModeArg::Full) => HarvestMode::Full,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Harvest {
            communities,
            mode,
            limit,
            dry_run,
        } => {
            let communities = if communities.is_empty() {
                if cfg.communities.defaults.is_empty() {
                    anyhow::bail!(
                        "no communities given and none configured under [communities].defaults"
                    );
                }
                println!(
                    "using default communities: {}",
                    cfg.communities.defaults.join(", ")
                );
                cfg.communities.defaults.clone()
            } else {
                communities
            };

            // Credentials are a configuration-class concern: missing ones
            // abort before any community is touched.
            let creds = Credentials::from_env()?;
            let source = RedditSource::new(creds, &cfg.upstream)?;

            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;

            let mode = resolve_mode(mode);
            let summary =
                harvest::run_harvest(&pool, &source, &cfg, &communities, mode, limit, dry_run)
                    .await?;
            pool.close().await;

            if summary.communities_failed > 0 && summary.communities_done == 0 {
                std::process::exit(1);
            }
        }
        Commands::Stats => {
            let pool = db::connect(&cfg).await?;
            stats::run_stats(&cfg, &pool).await?;
            pool.close().await;
        }
        Commands::ResetCheckpoint { community } => {
            let pool = db::connect(&cfg).await?;
            harvest::reset_checkpoint(&pool, &community).await?;
            pool.close().await;
            println!("Checkpoint reset for '{}'.", community);
        }
    }

    Ok(())
}
