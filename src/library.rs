//! The host media library, as seen by the core.
//!
//! Everything the engines know about tracks and playlists comes through
//! [`MediaLibrary`]. Failures are propagated untouched: the core never guesses
//! or synthesizes counts when the host can't answer.

use crate::db::{self, TrackRecord};
use crate::track::{Playlist, PlaylistId, TrackFact, TrackId};
use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

pub trait MediaLibrary: Send + Sync {
    /// The full library. Potentially slow.
    fn list_tracks(&self) -> Result<Vec<TrackFact>>;

    fn list_playlists(&self) -> Result<Vec<Playlist>>;

    /// Members of one playlist, in playlist order.
    fn playlist_tracks(&self, id: PlaylistId) -> Result<Vec<TrackFact>> {
        let playlist = self
            .list_playlists()?
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| anyhow!("Playlist {id} is not in the library"))?;

        let mut by_id: HashMap<TrackId, TrackFact> =
            self.list_tracks()?.into_iter().map(|t| (t.id, t)).collect();

        Ok(playlist
            .track_ids
            .iter()
            .filter_map(|track_id| by_id.remove(track_id))
            .collect())
    }
}

impl std::fmt::Debug for dyn MediaLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MediaLibrary")
    }
}

/// Current play count of every track.
pub fn current_counts(tracks: &[TrackFact]) -> BTreeMap<TrackId, u64> {
    tracks.iter().map(|t| (t.id, t.play_count)).collect()
}

/// Library held in memory; the host pushes fresh facts into it.
///
/// Can be switched offline to behave like an unreachable host, and slowed
/// down to behave like a large library scan.
#[derive(Debug, Default)]
pub struct InMemoryLibrary {
    tracks: RwLock<Vec<TrackFact>>,
    playlists: RwLock<Vec<Playlist>>,
    offline: AtomicBool,
    scan_delay: Mutex<Duration>,
    scans: AtomicUsize,
}

impl InMemoryLibrary {
    #[must_use]
    pub fn new(tracks: Vec<TrackFact>, playlists: Vec<Playlist>) -> Self {
        Self {
            tracks: RwLock::new(tracks),
            playlists: RwLock::new(playlists),
            ..Self::default()
        }
    }

    pub fn set_tracks(&self, tracks: Vec<TrackFact>) {
        *self.tracks.write().unwrap_or_else(PoisonError::into_inner) = tracks;
    }

    pub fn set_playlists(&self, playlists: Vec<Playlist>) {
        *self.playlists.write().unwrap_or_else(PoisonError::into_inner) = playlists;
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_scan_delay(&self, delay: Duration) {
        *self.scan_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// How many full-library scans have been served.
    #[must_use]
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            bail!("Media library is unavailable");
        }
        Ok(())
    }
}

impl MediaLibrary for InMemoryLibrary {
    fn list_tracks(&self) -> Result<Vec<TrackFact>> {
        self.ensure_online()?;
        self.scans.fetch_add(1, Ordering::SeqCst);

        let delay = *self.scan_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        Ok(self.tracks.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn list_playlists(&self) -> Result<Vec<Playlist>> {
        self.ensure_online()?;
        Ok(self.playlists.read().unwrap_or_else(PoisonError::into_inner).clone())
    }
}

/// Library read from the `tracks` / `playlists` tables of an encore database.
#[derive(Debug)]
pub struct SqliteLibrary {
    conn: Mutex<Connection>,
}

impl SqliteLibrary {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = db::connect(path).context("Failed to open the media library")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Tracks with their titles, for display.
    pub fn track_records(&self) -> Result<Vec<TrackRecord>> {
        db::load_tracks(&self.conn())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MediaLibrary for SqliteLibrary {
    fn list_tracks(&self) -> Result<Vec<TrackFact>> {
        let tracks: Vec<TrackFact> = self.track_records()?.into_iter().map(|r| r.fact).collect();
        debug!("Library scan returned {} tracks", tracks.len());
        Ok(tracks)
    }

    fn list_playlists(&self) -> Result<Vec<Playlist>> {
        db::load_playlists(&self.conn())
    }

    fn playlist_tracks(&self, id: PlaylistId) -> Result<Vec<TrackFact>> {
        db::load_playlist_tracks(&self.conn(), id)?
            .map(|records| records.into_iter().map(|r| r.fact).collect())
            .ok_or_else(|| anyhow!("Playlist {id} is not in the library"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> InMemoryLibrary {
        let tracks = (1..=4)
            .map(|id| TrackFact {
                play_count: id * 10,
                ..TrackFact::new(id)
            })
            .collect();
        let playlists = vec![Playlist {
            id: 7,
            name: "Evens".to_string(),
            track_ids: vec![4, 99, 2],
        }];
        InMemoryLibrary::new(tracks, playlists)
    }

    #[test]
    fn test_current_counts() -> Result<()> {
        let counts = current_counts(&library().list_tracks()?);
        assert_eq!(counts.get(&3), Some(&30));
        assert_eq!(counts.len(), 4);
        Ok(())
    }

    #[test]
    fn test_default_playlist_tracks_keeps_order_and_skips_missing() -> Result<()> {
        let ids: Vec<TrackId> = library().playlist_tracks(7)?.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![4, 2]);
        assert!(library().playlist_tracks(8).is_err());
        Ok(())
    }

    #[test]
    fn test_offline_library_reports_error() {
        let library = library();
        library.set_offline(true);
        assert!(library.list_tracks().is_err());
        assert!(library.list_playlists().is_err());
        assert_eq!(library.scan_count(), 0);

        library.set_offline(false);
        assert!(library.list_tracks().is_ok());
        assert_eq!(library.scan_count(), 1);
    }
}
