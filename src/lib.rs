//! Fair shuffles and listening statistics built from play counters.
//!
//! Core modules:
//! - [`algorithm`] - Staleness-weighted shuffle (Gumbel-max sampling)
//! - [`snapshot`] - Daily play-count snapshots and their retention
//! - [`stats`] - Window statistics from snapshot deltas
//! - [`ppm`] - Plays-per-month metric and its cache
//! - [`scheduler`] - "Became active" snapshot policy
//! - [`engine`] - Façade tying the above to a library and a store
//!
//! ### Supporting Modules
//!
//! - [`track`] - Track and playlist facts
//! - [`library`] - Host media library abstraction
//! - [`storage`] - Key-value persistence for snapshot state
//! - [`db`] - SQLite tables backing the CLI host
//! - [`clock`] - Injectable wall clock
//! - [`config`] - Data directory and runtime configuration
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use encore::config::RuntimeConfig;
//! use encore::engine::Engine;
//! use encore::stats::StatsWindow;
//! use std::collections::HashSet;
//!
//! let engine = Engine::open(&RuntimeConfig::load()?)?;
//!
//! // Call whenever the app comes to the foreground.
//! engine.ensure_freshness()?;
//!
//! let order = engine.shuffle_library()?;
//! println!("Up first: track {:?}", order.first().map(|t| t.id));
//!
//! let week = engine.stats_for(StatsWindow::Days(7), &HashSet::new())?;
//! println!("{} plays this week", week.total_plays);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Shuffle
//!
//! Every track gets a weight of `days since last played + 1`.
//! Never-played tracks borrow the largest known staleness. The order is
//! drawn by sorting `ln(weight) + Gumbel noise`, which is equivalent to
//! repeatedly sampling without replacement in proportion to weight.
//!
//! ## Snapshots and Stats
//!
//! The host only keeps lifetime counters, so activity in a window is the
//! difference between today's counters and a baseline snapshot. One
//! snapshot is kept per calendar day, 90 days by default. The baseline for
//! a window is a custom reset point if it falls inside the window,
//! otherwise the last snapshot at or before the window start, otherwise the
//! earliest snapshot retained.
//!
//! ## Error Handling
//!
//! All fallible public functions return `anyhow::Result`. A library that
//! can't be read is reported as an error; counts are never synthesized.

pub mod algorithm;
pub mod cli;
pub mod clock;
pub mod completion;
pub mod config;
pub mod db;
pub mod engine;
pub mod library;
pub mod ppm;
pub mod scheduler;
pub mod snapshot;
pub mod stats;
pub mod storage;
pub mod track;
