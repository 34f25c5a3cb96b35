//! # Engine
//!
//! One handle over the library, the snapshot store, the PPM cache and the
//! clock. Hosts and the CLI talk to this instead of wiring the pieces by
//! hand.

use crate::algorithm;
use crate::clock::{Clock, SystemClock};
use crate::config::RuntimeConfig;
use crate::library::{current_counts, MediaLibrary, SqliteLibrary};
use crate::ppm::PpmCache;
use crate::scheduler::SnapshotScheduler;
use crate::snapshot::{CountSnapshot, SnapshotStore};
use crate::stats::{self, StatsInputs, StatsSnapshot, StatsWindow};
use crate::storage::{KeyValueStore, SqliteStore};
use crate::track::{PlaylistId, Timestamp, TrackFact, TrackId};
use anyhow::{Context, Result};
use log::{debug, info};
use rand::{thread_rng, Rng};
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// Snapshot policy knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub retention_days: usize,
    pub max_age_days: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            retention_days: crate::snapshot::DEFAULT_RETENTION_DAYS,
            max_age_days: crate::scheduler::DEFAULT_MAX_AGE_DAYS,
        }
    }
}

impl From<&RuntimeConfig> for EngineOptions {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            retention_days: config.retention_days,
            max_age_days: config.max_age_days,
        }
    }
}

#[derive(Debug)]
pub struct Engine {
    library: Arc<dyn MediaLibrary>,
    store: Arc<SnapshotStore>,
    scheduler: SnapshotScheduler,
    ppm: PpmCache,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(
        library: Arc<dyn MediaLibrary>,
        storage: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        options: EngineOptions,
    ) -> Result<Self> {
        let store = Arc::new(SnapshotStore::open(storage, Arc::clone(&clock), options.retention_days)?);
        let scheduler = SnapshotScheduler::new(Arc::clone(&store), Arc::clone(&library), options.max_age_days);

        Ok(Self {
            library,
            store,
            scheduler,
            ppm: PpmCache::new(),
            clock,
        })
    }

    /// Engine over the SQLite database named by `config`, on the system clock.
    pub fn open(config: &RuntimeConfig) -> Result<Self> {
        let library = SqliteLibrary::open(&config.db_path)?;
        let storage = SqliteStore::open(&config.db_path)
            .with_context(|| format!("Failed to open snapshot storage at {}", config.db_path.display()))?;
        info!("Using database {}", config.db_path.display());

        Self::new(
            Arc::new(library),
            Arc::new(storage),
            Arc::new(SystemClock),
            EngineOptions::from(config),
        )
    }

    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// `tracks` in staleness-weighted random order.
    #[must_use]
    pub fn shuffle(&self, tracks: Vec<TrackFact>) -> Vec<TrackFact> {
        self.shuffle_with_rng(tracks, &mut thread_rng())
    }

    pub fn shuffle_with_rng<R: Rng + ?Sized>(&self, tracks: Vec<TrackFact>, rng: &mut R) -> Vec<TrackFact> {
        algorithm::shuffle_tracks(tracks, self.now(), rng)
    }

    pub fn shuffle_library(&self) -> Result<Vec<TrackFact>> {
        let tracks = self.library.list_tracks().context("Failed to list library for shuffle")?;
        debug!("Shuffling {} library tracks", tracks.len());
        Ok(self.shuffle(tracks))
    }

    pub fn shuffle_playlist(&self, id: PlaylistId) -> Result<Vec<TrackFact>> {
        let tracks = self
            .library
            .playlist_tracks(id)
            .with_context(|| format!("Failed to list playlist {id} for shuffle"))?;
        debug!("Shuffling {} tracks of playlist {id}", tracks.len());
        Ok(self.shuffle(tracks))
    }

    /// The "became active" event: capture unless today already has a snapshot.
    pub fn ensure_freshness(&self) -> Result<Option<CountSnapshot>> {
        self.scheduler.on_became_active()
    }

    /// [`Self::ensure_freshness`] off the calling thread.
    pub fn ensure_freshness_in_background(&self) -> Result<Receiver<Result<Option<CountSnapshot>>>> {
        self.scheduler.on_became_active_in_background()
    }

    pub fn capture_now(&self) -> Result<Option<CountSnapshot>> {
        self.store.capture_now(self.library.as_ref())
    }

    #[must_use]
    pub fn most_recent_on_or_before(&self, date: Timestamp) -> Option<CountSnapshot> {
        self.store.most_recent_on_or_before(date)
    }

    #[must_use]
    pub fn snapshots(&self) -> Vec<CountSnapshot> {
        self.store.snapshots()
    }

    pub fn set_custom_baseline_now(&self) -> Result<Option<CountSnapshot>> {
        self.store.set_custom_baseline_now(self.library.as_ref())
    }

    #[must_use]
    pub fn custom_baseline(&self) -> Option<CountSnapshot> {
        self.store.custom_baseline()
    }

    /// Activity since `window_start`, with only `eligible_playlist_ids`
    /// considered for most-played playlist.
    pub fn compute_stats(
        &self,
        window_start: Timestamp,
        eligible_playlist_ids: &HashSet<PlaylistId>,
    ) -> Result<StatsSnapshot> {
        let tracks = self.library.list_tracks().context("Failed to list library for stats")?;
        let playlists = self.library.list_playlists().context("Failed to list playlists for stats")?;

        let current = current_counts(&tracks);
        let by_id: HashMap<TrackId, TrackFact> = tracks.into_iter().map(|t| (t.id, t)).collect();
        let custom = self.store.custom_baseline();

        let inputs = StatsInputs {
            current_counts: &current,
            tracks: &by_id,
            playlists: &playlists,
            eligible_playlist_ids,
        };
        Ok(self
            .store
            .with_history(|history| stats::compute(window_start, custom.as_ref(), history, inputs)))
    }

    /// Stats for a named window.
    pub fn stats_for(
        &self,
        window: StatsWindow,
        eligible_playlist_ids: &HashSet<PlaylistId>,
    ) -> Result<StatsSnapshot> {
        let custom = self.store.custom_baseline();
        let start = self
            .store
            .with_history(|history| window.start(self.now(), custom.as_ref(), history));
        self.compute_stats(start, eligible_playlist_ids)
    }

    /// Fresh track list from the host. Drops every cached PPM value.
    pub fn reload_tracks(&self) -> Result<Vec<TrackFact>> {
        self.ppm.invalidate();
        self.library.list_tracks()
    }

    #[must_use]
    pub fn ppm(&self, track: &TrackFact) -> f64 {
        self.ppm.get(track, self.now())
    }

    #[must_use]
    pub fn median_ppm(&self, tracks: &[TrackFact]) -> Option<f64> {
        self.ppm.median(tracks, self.now())
    }

    #[must_use]
    pub fn library(&self) -> &Arc<dyn MediaLibrary> {
        &self.library
    }

    #[must_use]
    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::library::InMemoryLibrary;
    use crate::storage::MemoryStore;
    use crate::track::Playlist;
    use chrono::{Duration, Local, TimeZone};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn start() -> Timestamp {
        Local.with_ymd_and_hms(2024, 9, 2, 12, 0, 0).unwrap()
    }

    fn track(id: TrackId, plays: u64, duration: f64) -> TrackFact {
        TrackFact {
            play_count: plays,
            playback_duration: duration,
            added_at: Some(start() - Duration::days(365)),
            last_played_at: Some(start() - Duration::days(id as i64)),
            ..TrackFact::new(id)
        }
    }

    fn engine() -> (Arc<FixedClock>, Arc<InMemoryLibrary>, Engine) {
        let clock = Arc::new(FixedClock::new(start()));
        let library = Arc::new(InMemoryLibrary::new(
            vec![track(1, 5, 200.0), track(2, 2, 100.0)],
            vec![Playlist {
                id: 10,
                name: "Favourites".to_string(),
                track_ids: vec![2, 3],
            }],
        ));
        let engine = Engine::new(
            library.clone(),
            Arc::new(MemoryStore::new()),
            clock.clone(),
            EngineOptions::default(),
        )
        .unwrap();
        (clock, library, engine)
    }

    #[test]
    fn test_stats_over_a_week() -> Result<()> {
        let (clock, library, engine) = engine();
        engine.ensure_freshness()?;

        clock.advance(Duration::days(3));
        library.set_tracks(vec![track(1, 8, 200.0), track(2, 2, 100.0), track(3, 1, 60.0)]);

        let eligible: HashSet<PlaylistId> = [10].into_iter().collect();
        let stats = engine.stats_for(StatsWindow::Days(7), &eligible)?;

        assert_eq!(stats.unique_tracks, 2);
        assert_eq!(stats.total_play_duration, 660.0);
        assert_eq!(stats.top_track.map(|t| t.id), Some(1));
        assert_eq!(stats.top_playlist.map(|p| p.name), Some("Favourites".to_string()));
        assert_eq!(stats.baseline_date, Some(start()), "earliest snapshot stands in");
        Ok(())
    }

    #[test]
    fn test_since_reset_window() -> Result<()> {
        let (clock, library, engine) = engine();
        engine.ensure_freshness()?;

        clock.advance(Duration::days(1));
        library.set_tracks(vec![track(1, 6, 200.0), track(2, 2, 100.0)]);
        engine.set_custom_baseline_now()?;

        library.set_tracks(vec![track(1, 6, 200.0), track(2, 4, 100.0)]);
        let stats = engine.stats_for(StatsWindow::SinceReset, &HashSet::new())?;

        assert_eq!(stats.total_plays, 2);
        assert_eq!(stats.top_track.map(|t| t.id), Some(2));
        assert!(stats.top_playlist.is_none(), "no playlists opted in");
        Ok(())
    }

    #[test]
    fn test_stats_without_snapshots_are_zero() -> Result<()> {
        let (_clock, _library, engine) = engine();
        let stats = engine.compute_stats(start(), &HashSet::new())?;
        assert_eq!(stats, StatsSnapshot::default());
        Ok(())
    }

    #[test]
    fn test_shuffle_playlist_only_members() -> Result<()> {
        let (_clock, _library, engine) = engine();
        let ids: Vec<TrackId> = engine.shuffle_playlist(10)?.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2], "missing member 3 is skipped");

        let mut rng = StdRng::seed_from_u64(7);
        let shuffled = engine.shuffle_with_rng(engine.library().list_tracks()?, &mut rng);
        assert_eq!(shuffled.len(), 2);
        Ok(())
    }

    #[test]
    fn test_reload_tracks_invalidates_ppm() -> Result<()> {
        let (_clock, library, engine) = engine();
        let tracks = engine.reload_tracks()?;
        let before = engine.median_ppm(&tracks);
        assert!(before.is_some());

        library.set_tracks(vec![track(1, 500, 200.0), track(2, 500, 100.0)]);
        let stale = engine.median_ppm(&library.list_tracks()?);
        assert_eq!(stale, before, "cached until reload");

        let reloaded = engine.reload_tracks()?;
        assert!(engine.median_ppm(&reloaded) > before);
        Ok(())
    }

    #[test]
    fn test_background_freshness() -> Result<()> {
        let (_clock, _library, engine) = engine();
        let captured = engine
            .ensure_freshness_in_background()?
            .recv()
            .expect("worker reports back")?;

        assert_eq!(captured.map(|s| s.total_plays()), Some(7));
        assert_eq!(engine.store().len(), 1);
        Ok(())
    }

    #[test]
    fn test_most_recent_on_or_before() -> Result<()> {
        let (clock, _library, engine) = engine();
        engine.capture_now()?;
        clock.advance(Duration::days(2));
        engine.capture_now()?;

        let found = engine.most_recent_on_or_before(start() + Duration::days(1));
        assert_eq!(found.map(|s| s.date), Some(start()));
        assert_eq!(engine.snapshots().len(), 2);
        Ok(())
    }
}
