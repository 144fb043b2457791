use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use quaver_pipeline::config::Config;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "quaver", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data root holding the database, media store, journal, and seeds
    /// (default: ~/.local/share/quaver)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Drive the work queue to quiescence
    ///
    /// Sweeps every pass repeatedly until a full sweep finds no ready
    /// entries. Each sweep is a "trip"; passes enqueue work for each
    /// other, so a run normally takes several trips. A run that is still
    /// producing work after the trip limit aborts — pass --forever to
    /// waive the limit for large backfills.
    ///
    /// Ctrl-C ends the run between passes and checkpoints the database.
    Run {
        /// Waive the trip limit
        #[arg(long)]
        forever: bool,
    },
    /// Queue seed files from a directory
    ///
    /// Files are named after the pass they feed (track.new.spotify_track,
    /// artist.new.youtube_channel, ...), one seed per line. Re-applying a
    /// directory only queues lines not already present.
    Seed {
        /// Seed directory (default: <root>/seeds)
        dir: Option<PathBuf>,
    },
    /// Queue a single entry by pass name
    Dispatch {
        /// Pass name, e.g. track.new.spotify_track
        pass: String,
        /// Bare id for catalog passes, JSON payload otherwise
        payload: String,
    },
    /// Show ready/total queue counts per pass
    Inflight {
        /// Limit to one pass
        pass: Option<String>,
    },
    /// Force every entry of a pass ready now
    Expire {
        /// Pass name
        pass: String,
    },
    /// Find and merge duplicate tracks
    Merge,
    /// Scan for broken references and missing media
    Check {
        /// Delete the offending rows instead of just reporting them
        #[arg(long)]
        purge: bool,
    },
    /// Probe the database and report entity counts
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match cli.root {
        Some(root) => Config::load_with_root(root)?,
        None => Config::load()?,
    };
    std::fs::create_dir_all(&config.data_dir)?;

    match cli.command {
        Commands::Run { forever } => commands::run_pipeline(&config, forever).await?,
        Commands::Seed { dir } => commands::run_seed(&config, dir)?,
        Commands::Dispatch { pass, payload } => commands::run_dispatch(&config, &pass, &payload)?,
        Commands::Inflight { pass } => commands::show_inflight(&config, pass.as_deref())?,
        Commands::Expire { pass } => commands::run_expire(&config, &pass)?,
        Commands::Merge => commands::run_merge(&config)?,
        Commands::Check { purge } => commands::run_check(&config, purge)?,
        Commands::Health => commands::show_health(&config)?,
    }

    Ok(())
}
