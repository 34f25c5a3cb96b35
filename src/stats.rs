//! Listening statistics derived from play-count deltas.
//!
//! There is no event log to read from, so "plays in a window" means the
//! difference between the current counters and a baseline snapshot taken
//! at (or as close as possible to) the start of the window. Durations are
//! approximated as `delta * playback_duration`, i.e. every counted play is
//! taken to be a full listen.

use crate::snapshot::{CountSnapshot, SnapshotHistory};
use crate::track::{Playlist, PlaylistId, Timestamp, TrackFact, TrackId};
use chrono::Duration;
use log::debug;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Track with the most plays in the window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackDelta {
    pub id: TrackId,
    pub plays: u64,
    /// `plays * playback_duration`, in seconds.
    pub duration: f64,
}

/// Eligible playlist sharing the most tracks with the window's activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistOverlap {
    pub id: PlaylistId,
    pub name: String,
    /// Member tracks that were played in the window.
    pub overlap: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub unique_tracks: usize,
    /// Seconds.
    pub total_play_duration: f64,
    pub total_plays: u64,
    pub top_track: Option<TrackDelta>,
    pub top_playlist: Option<PlaylistOverlap>,
    /// Date of the baseline the deltas were taken against.
    pub baseline_date: Option<Timestamp>,
}

/// User-facing stats windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsWindow {
    /// The last `n` days.
    Days(u32),
    /// Since the custom baseline was last reset, or since tracking began.
    SinceReset,
}

impl StatsWindow {
    /// Start of the window as seen at `now`.
    ///
    /// `SinceReset` resolves to the custom baseline date, falling back to
    /// the earliest retained snapshot, then to `now`. A `Days` span too large
    /// to subtract from `now` reaches back to the earliest retained snapshot.
    #[must_use]
    pub fn start(
        &self,
        now: Timestamp,
        custom: Option<&CountSnapshot>,
        history: &SnapshotHistory,
    ) -> Timestamp {
        match self {
            StatsWindow::Days(n) => Duration::try_days(i64::from(*n))
                .and_then(|span| now.checked_sub_signed(span))
                .unwrap_or_else(|| history.earliest().map_or(now, |earliest| earliest.date)),
            StatsWindow::SinceReset => custom
                .or_else(|| history.earliest())
                .map_or(now, |baseline| baseline.date),
        }
    }
}

/// Library state the deltas are measured against.
#[derive(Debug, Clone, Copy)]
pub struct StatsInputs<'a> {
    pub current_counts: &'a BTreeMap<TrackId, u64>,
    pub tracks: &'a HashMap<TrackId, TrackFact>,
    pub playlists: &'a [Playlist],
    /// Playlists allowed to be reported as most played.
    pub eligible_playlist_ids: &'a HashSet<PlaylistId>,
}

/// Pick the baseline for a window starting at `window_start`.
///
/// In order: the custom baseline if it was set at or after the window
/// start, the latest snapshot on or before the window start, the earliest
/// snapshot retained. `None` only when there is nothing to compare against.
#[must_use]
pub fn resolve_baseline<'a>(
    window_start: Timestamp,
    custom: Option<&'a CountSnapshot>,
    history: &'a SnapshotHistory,
) -> Option<&'a CountSnapshot> {
    if let Some(custom) = custom.filter(|c| c.date >= window_start) {
        return Some(custom);
    }
    history
        .most_recent_on_or_before(window_start)
        .or_else(|| history.earliest())
}

/// Stats for the window starting at `window_start`.
///
/// Zeroed when no baseline can be resolved.
#[must_use]
pub fn compute(
    window_start: Timestamp,
    custom: Option<&CountSnapshot>,
    history: &SnapshotHistory,
    inputs: StatsInputs<'_>,
) -> StatsSnapshot {
    match resolve_baseline(window_start, custom, history) {
        Some(baseline) => compute_against(baseline, inputs),
        None => {
            debug!("No baseline for window starting {window_start}, reporting zero activity");
            StatsSnapshot::default()
        }
    }
}

/// Stats for everything played since `baseline`.
#[must_use]
pub fn compute_against(baseline: &CountSnapshot, inputs: StatsInputs<'_>) -> StatsSnapshot {
    let deltas = play_deltas(baseline, inputs.current_counts);

    let mut stats = StatsSnapshot {
        unique_tracks: deltas.len(),
        baseline_date: Some(baseline.date),
        ..StatsSnapshot::default()
    };

    for (&id, &plays) in &deltas {
        let duration = plays as f64 * inputs.tracks.get(&id).map_or(0.0, |t| t.playback_duration);
        stats.total_plays += plays;
        stats.total_play_duration += duration;

        // Strictly greater: a full tie keeps the lower id.
        let beats = stats.top_track.as_ref().map_or(true, |top| {
            plays > top.plays || (plays == top.plays && duration > top.duration)
        });
        if beats {
            stats.top_track = Some(TrackDelta { id, plays, duration });
        }
    }

    stats.top_playlist = top_playlist(&deltas, inputs.playlists, inputs.eligible_playlist_ids);

    debug!(
        "Stats since {}: {} tracks, {} plays, {:.0}s",
        baseline.date, stats.unique_tracks, stats.total_plays, stats.total_play_duration
    );
    stats
}

/// Positive per-track deltas of `current` over `baseline`.
///
/// Tracks unknown to the baseline count from zero; counters that went
/// backwards contribute nothing.
#[must_use]
pub fn play_deltas(baseline: &CountSnapshot, current: &BTreeMap<TrackId, u64>) -> BTreeMap<TrackId, u64> {
    current
        .iter()
        .filter_map(|(&id, &count)| {
            let delta = count.saturating_sub(baseline.count(id));
            (delta > 0).then_some((id, delta))
        })
        .collect()
}

fn top_playlist(
    deltas: &BTreeMap<TrackId, u64>,
    playlists: &[Playlist],
    eligible: &HashSet<PlaylistId>,
) -> Option<PlaylistOverlap> {
    let mut best: Option<PlaylistOverlap> = None;

    for playlist in playlists.iter().filter(|p| eligible.contains(&p.id)) {
        let members: HashSet<TrackId> = playlist.track_ids.iter().copied().collect();
        let overlap = members.iter().filter(|id| deltas.contains_key(id)).count();

        if overlap > 0 && best.as_ref().map_or(true, |b| overlap > b.overlap) {
            best = Some(PlaylistOverlap {
                id: playlist.id,
                name: playlist.name.clone(),
                overlap,
            });
        }
    }

    best
}
