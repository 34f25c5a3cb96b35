use anyhow::Result;
use chrono::Local;
use clap::{CommandFactory, Parser};
use encore::cli::{self, Command};
use encore::config::RuntimeConfig;
use encore::engine::Engine;
use encore::library::{MediaLibrary, SqliteLibrary};
use encore::stats::{StatsSnapshot, StatsWindow};
use encore::track::{TrackFact, TrackId};
use encore::{completion, db};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};

/// Main entry point for the Encore application.
///
/// Initializes logging, resolves configuration, and routes commands.
///
/// # Logging
///
/// Controlled via `RUST_LOG`:
/// - `RUST_LOG=debug encore refresh` - Enable debug logging
/// - `RUST_LOG=encore::snapshot=trace encore snapshot` - Module-specific logging
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();

    let mut config = RuntimeConfig::load()?;
    if let Some(db) = args.db {
        config.db_path = db;
    }
    if let Some(days) = args.retention_days {
        config.retention_days = days.max(1);
    }
    debug!("Runtime config: {config:?}");

    match args.command {
        Command::Import { file } => {
            info!("Importing library export from: {}", file.display());
            let export = db::read_export(&file)?;
            let mut conn = db::connect(&config.db_path)?;
            let summary = db::import_library(&mut conn, &export)?;
            println!("Imported {} tracks and {} playlists", summary.tracks, summary.playlists);
        }
        Command::Played { id } => {
            let conn = db::connect(&config.db_path)?;
            db::record_play(&conn, id, Local::now())?;
            println!("Recorded play of track {id}");
        }
        Command::Skipped { id } => {
            let conn = db::connect(&config.db_path)?;
            db::record_skip(&conn, id)?;
            println!("Recorded skip of track {id}");
        }
        Command::Shuffle { playlist, limit } => {
            let engine = Engine::open(&config)?;
            let order = match playlist {
                Some(id) => engine.shuffle_playlist(id)?,
                None => engine.shuffle_library()?,
            };
            let titles = track_titles(&config)?;
            let now = engine.now();

            for (position, track) in order.iter().take(limit.unwrap_or(usize::MAX)).enumerate() {
                let last = track
                    .days_since_played(now)
                    .map_or_else(|| "never".to_string(), |days| format!("{days}d ago"));
                println!("{:>4}. {} [{last}]", position + 1, title_of(&titles, track.id));
            }
        }
        Command::Refresh => {
            let engine = Engine::open(&config)?;
            match engine.ensure_freshness()? {
                Some(snapshot) => println!(
                    "Captured snapshot for {} ({} tracks)",
                    snapshot.day(),
                    snapshot.counts.len()
                ),
                None => println!("Snapshot already up to date"),
            }
        }
        Command::Snapshot => {
            let engine = Engine::open(&config)?;
            match engine.capture_now()? {
                Some(snapshot) => println!(
                    "Captured snapshot for {} ({} tracks, {} plays)",
                    snapshot.day(),
                    snapshot.counts.len(),
                    snapshot.total_plays()
                ),
                None => println!("Library is empty, nothing captured"),
            }
        }
        Command::History => {
            let engine = Engine::open(&config)?;
            let snapshots = engine.snapshots();
            if snapshots.is_empty() {
                println!("No snapshots yet. Run `encore refresh` first.");
            }
            for snapshot in &snapshots {
                println!(
                    "{}  {:>6} tracks  {:>8} plays",
                    snapshot.day(),
                    snapshot.counts.len(),
                    snapshot.total_plays()
                );
            }
            if let Some(baseline) = engine.custom_baseline() {
                println!("Custom window started {}", baseline.date.format("%Y-%m-%d %H:%M"));
            }
        }
        Command::Reset => {
            let engine = Engine::open(&config)?;
            match engine.set_custom_baseline_now()? {
                Some(baseline) => println!("Custom window reset at {}", baseline.date.format("%Y-%m-%d %H:%M")),
                None => println!("Library is empty, custom window unchanged"),
            }
        }
        Command::Stats { days, since_reset, playlists } => {
            let engine = Engine::open(&config)?;
            if let Err(err) = engine.ensure_freshness() {
                warn!("Could not refresh today's snapshot: {err:#}");
            }
            let window = if since_reset {
                StatsWindow::SinceReset
            } else {
                StatsWindow::Days(days)
            };
            let eligible: HashSet<u64> = playlists.into_iter().collect();
            let stats = engine.stats_for(window, &eligible)?;
            print_stats(&stats, &track_titles(&config)?);
        }
        Command::Ppm { playlist, top } => {
            let engine = Engine::open(&config)?;
            let tracks = match playlist {
                Some(id) => engine.library().playlist_tracks(id)?,
                None => engine.reload_tracks()?,
            };
            print_ppm(&engine, &tracks, top, &track_titles(&config)?);
        }
        Command::Playlists => {
            let conn = db::connect(&config.db_path)?;
            for playlist in db::load_playlists(&conn)? {
                println!("{:>6}  {} ({} tracks)", playlist.id, playlist.name, playlist.track_ids.len());
            }
        }
        Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            completion::generate_completions(completion::shell_to_completion_shell(shell), &mut cmd);
        }
        Command::CompletePlaylists => {
            completion::print_playlist_completions(&config.db_path)?;
        }
    }

    Ok(())
}

fn track_titles(config: &RuntimeConfig) -> Result<HashMap<TrackId, String>> {
    let library = SqliteLibrary::open(&config.db_path)?;
    Ok(library
        .track_records()?
        .into_iter()
        .map(|r| {
            let label = match (r.artist.is_empty(), r.title.is_empty()) {
                (_, true) => format!("#{}", r.fact.id),
                (true, false) => r.title,
                (false, false) => format!("{} - {}", r.artist, r.title),
            };
            (r.fact.id, label)
        })
        .collect())
}

fn title_of(titles: &HashMap<TrackId, String>, id: TrackId) -> String {
    titles.get(&id).cloned().unwrap_or_else(|| format!("#{id}"))
}

fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    let (hours, minutes) = (total / 3600, (total % 3600) / 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else {
        format!("{minutes}m {:02}s", total % 60)
    }
}

fn print_stats(stats: &StatsSnapshot, titles: &HashMap<TrackId, String>) {
    let Some(since) = stats.baseline_date else {
        println!("No snapshots yet. Run `encore refresh` to start tracking.");
        return;
    };

    println!("Since {}", since.format("%Y-%m-%d"));
    println!("  Plays:          {}", stats.total_plays);
    println!("  Unique tracks:  {}", stats.unique_tracks);
    println!("  Listening time: {}", format_duration(stats.total_play_duration));

    match &stats.top_track {
        Some(top) => println!(
            "  Most played:    {} ({} plays, {})",
            title_of(titles, top.id),
            top.plays,
            format_duration(top.duration)
        ),
        None => println!("  Most played:    -"),
    }
    match &stats.top_playlist {
        Some(top) => println!("  Top playlist:   {} ({} tracks played)", top.name, top.overlap),
        None => println!("  Top playlist:   -"),
    }
}

fn print_ppm(engine: &Engine, tracks: &[TrackFact], top: usize, titles: &HashMap<TrackId, String>) {
    let mut rated: Vec<(f64, TrackId)> = tracks
        .iter()
        .map(|t| (engine.ppm(t), t.id))
        .filter(|(ppm, _)| ppm.is_finite())
        .collect();
    rated.sort_by(|a, b| b.0.total_cmp(&a.0));

    for (ppm, id) in rated.iter().take(top) {
        println!("{ppm:>8.2}  {}", title_of(titles, *id));
    }

    match engine.median_ppm(tracks) {
        Some(median) => println!("Median: {median:.2} plays/month over {} tracks", rated.len()),
        None => println!("Median: undefined (no track is older than a month)"),
    }
}
