use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use playlog::cli::{artists, daily, ingest, recent, recompute, summary, top};
use playlog::config::Config;
use playlog::pipeline::IngestOptions;
use playlog::source::SourceRegistry;
use playlog::store::HistoryStore;

/// Log level when `RUST_LOG` is unset
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Parser)]
#[command(name = "playlog")]
#[command(about = "Listening history ingestion and leaderboard tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "playlog.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Read all available sources and merge into history
    Ingest {
        /// Ignore the incremental watermark
        #[arg(long)]
        full: bool,

        /// Re-read stored raw payloads instead of the sources
        #[arg(long)]
        replay: bool,
    },

    /// Rebuild and publish all views
    Recompute,

    /// Ingest, then recompute
    Run {
        /// Ignore the incremental watermark
        #[arg(long)]
        full: bool,
    },

    /// Show recent plays
    Recent {
        /// Number of plays (1-50)
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show a leaderboard
    Top {
        /// tracks, artists or genres
        kind: String,

        /// Rolling window (7d, 30d, 90d, 180d, 365d, all_time)
        #[arg(short, long)]
        window: Option<String>,

        /// Calendar month (YYYY-MM)
        #[arg(short, long)]
        month: Option<String>,

        /// Calendar year (YYYY)
        #[arg(short, long)]
        year: Option<String>,
    },

    /// Show totals per window
    Summary,

    /// Show daily totals
    Daily {
        /// Number of days
        #[arg(short, long, default_value_t = 14)]
        days: usize,
    },

    /// Artist metadata management
    Artists {
        #[command(subcommand)]
        command: ArtistCommands,
    },
}

#[derive(Subcommand)]
enum ArtistCommands {
    /// Import artist rows from a JSON file
    Import {
        /// JSON array of artist rows
        file: PathBuf,
    },
    /// List artists without complete metadata
    Missing {
        /// Maximum rows to show
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load config
    let config = Config::load(&cli.config).unwrap_or_default();

    // Initialize store
    let mut store = HistoryStore::open(&config.database_path())?;

    // Initialize source registry
    let registry = SourceRegistry::new(&config);

    match cli.command {
        Commands::Ingest { full, replay } => {
            ingest::run(&mut store, &registry, &config, IngestOptions { full, replay })?;
        }
        Commands::Recompute => {
            recompute::run(&mut store, &config)?;
        }
        Commands::Run { full } => {
            let options = IngestOptions {
                full,
                replay: false,
            };
            recompute::run_all(&mut store, &registry, &config, options)?;
        }
        Commands::Recent { limit } => {
            recent::run(&store, limit)?;
        }
        Commands::Top {
            kind,
            window,
            month,
            year,
        } => {
            let selector =
                top::Selector::from_args(window.as_deref(), month.as_deref(), year.as_deref())?;
            top::run(&store, &kind, selector)?;
        }
        Commands::Summary => {
            summary::run(&store)?;
        }
        Commands::Daily { days } => {
            daily::run(&store, days)?;
        }
        Commands::Artists { command } => match command {
            ArtistCommands::Import { file } => {
                artists::import(&mut store, &file)?;
            }
            ArtistCommands::Missing { limit } => {
                artists::missing(&store, limit)?;
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn test_default_filter_shows_progress() {
        let filter = EnvFilter::new(DEFAULT_LOG_LEVEL);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::INFO));
    }
}
