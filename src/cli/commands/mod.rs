//! CLI parser and dispatch to command-specific modules.

mod cache;
mod config_cmd;
mod keys;
mod lastfm;
mod spotify;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::integrations::Period;

#[derive(Parser)]
#[command(name = "biolink")]
#[command(about = "Profile enrichment from Last.fm and Spotify with rate-limit aware fetching")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Show the configured credential pools (masked)
    Keys,

    /// Query Last.fm
    Lastfm {
        #[command(subcommand)]
        command: LastfmCommands,
    },

    /// Query Spotify
    Spotify {
        #[command(subcommand)]
        command: SpotifyCommands,
    },

    /// Manage cached responses
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum LastfmCommands {
    /// Most recent (or now playing) track
    Recent {
        /// Last.fm username
        user: String,
    },
    /// Top artists over a period
    TopArtists {
        /// Last.fm username
        user: String,
        /// overall, 7day, 1month, 3month, 6month or 12month
        #[arg(short, long, default_value = "overall")]
        period: Period,
        /// Number of artists to show
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum SpotifyCommands {
    /// Album artwork URL for a track
    Artwork {
        /// Track title
        track: String,
        /// Artist name
        artist: String,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Remove every cached entry for a resource
    Clear {
        /// Cache kind (lastfm_recent, lastfm_top_artists, spotify_artwork)
        kind: String,
        /// Resource id (username or artist)
        id: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Config::load_from_path(path).await?
        }
        None => Config::load().await?,
    };

    match cli.command {
        Commands::Keys => keys::cmd_keys(&config),
        Commands::Lastfm { command } => match command {
            LastfmCommands::Recent { user } => lastfm::cmd_recent(&config, &user, cli.json).await,
            LastfmCommands::TopArtists {
                user,
                period,
                limit,
            } => lastfm::cmd_top_artists(&config, &user, period, limit, cli.json).await,
        },
        Commands::Spotify { command } => match command {
            SpotifyCommands::Artwork { track, artist } => {
                spotify::cmd_artwork(&config, &track, &artist, cli.json).await
            }
        },
        Commands::Cache { command } => match command {
            CacheCommands::Clear { kind, id } => cache::cmd_clear(&config, &kind, &id).await,
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => config_cmd::cmd_config_show(&config),
        },
    }
}
