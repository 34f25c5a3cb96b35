//! # Command-Line Interface Module
//!
//! Clap derive definitions for the `encore` binary.
//!
//! ## Commands
//!
//! - `import`: Load a JSON library export into the database
//! - `played` / `skipped`: Record playback events against a track
//! - `shuffle`: Print a staleness-weighted play order
//! - `refresh` / `snapshot`: Capture play-count snapshots
//! - `history` / `reset`: Inspect snapshots, reset the custom window
//! - `stats`: Listening activity for a window
//! - `ppm`: Plays-per-month per track and the library median
//!
//! ## Examples
//!
//! ```bash
//! encore import library.json
//! encore refresh
//! encore stats --days 7 --playlist 3
//! encore shuffle --playlist 3 --limit 20
//! ```

use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Main application arguments structure.
#[derive(Parser, Debug)]
#[command(name = "encore")]
#[command(about = "Encore: fair shuffles and listening stats from play counters")]
#[command(version)]
pub struct Args {
    /// Database file (defaults to the platform data directory)
    #[arg(long, global = true, env = "ENCORE_DB", value_hint = clap::ValueHint::FilePath)]
    pub db: Option<PathBuf>,

    /// Number of daily snapshots to retain
    #[arg(long, global = true, env = "ENCORE_RETENTION_DAYS")]
    pub retention_days: Option<usize>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Enumeration of all available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import tracks and playlists from a JSON library export
    ///
    /// Existing tracks are updated in place; playlist membership is replaced.
    Import {
        /// Path to the export file
        #[arg(value_hint = clap::ValueHint::FilePath)]
        file: PathBuf,
    },

    /// Record a completed play of a track
    ///
    /// Increments the play count and stamps the last-played date with now.
    Played {
        /// Track id
        id: u64,
    },

    /// Record a skip of a track
    Skipped {
        /// Track id
        id: u64,
    },

    /// Print the library (or a playlist) in staleness-weighted random order
    ///
    /// Tracks that haven't been played for a long time tend to come first.
    /// Never-played tracks are treated as the stalest known track.
    Shuffle {
        /// Shuffle only this playlist
        #[arg(short, long)]
        playlist: Option<u64>,

        /// Print at most this many tracks
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Capture a snapshot unless today already has one
    ///
    /// This is the "app became active" hook; run it from a login script or
    /// a timer.
    Refresh,

    /// Capture a snapshot now, replacing today's if present
    Snapshot,

    /// List retained snapshots, oldest first
    History,

    /// Reset the custom stats window to start now
    Reset,

    /// Show listening activity for a window
    ///
    /// Plays are counter deltas against a baseline snapshot. Durations
    /// assume every counted play was a full listen.
    #[command(group(ArgGroup::new("window").args(["days", "since_reset"])))]
    Stats {
        /// Window of the last N days
        #[arg(short, long, default_value_t = 7)]
        days: u32,

        /// Window since the last `reset`
        #[arg(long)]
        since_reset: bool,

        /// Playlist eligible for "most played" (repeatable)
        #[arg(short, long = "playlist")]
        playlists: Vec<u64>,
    },

    /// Show plays-per-month for tracks and their median
    Ppm {
        /// Only tracks of this playlist
        #[arg(short, long)]
        playlist: Option<u64>,

        /// Print the N highest-PPM tracks
        #[arg(short, long, default_value_t = 10)]
        top: usize,
    },

    /// List playlists with their ids
    Playlists,

    /// Generate shell completions
    ///
    /// Usage: encore completion bash > ~/.local/share/bash-completion/completions/encore
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// List playlist ids for completion (hidden command)
    #[command(hide = true)]
    CompletePlaylists,
}
