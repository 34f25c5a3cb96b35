//! Plays-per-month affinity metric.
//!
//! ```text
//! ppm(track) = (play_count - skip_count) / months_since_added
//! ```
//!
//! Undefined (NaN) when the add date is unknown or the track is less than a
//! month old. Values are cached per track id until the track list is reloaded.

use crate::track::{Timestamp, TrackFact, TrackId};
use log::trace;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Per-track memoization of PPM values.
type PpmValues = Arc<Mutex<HashMap<TrackId, f64>>>;

/// Plays per month for one track; `f64::NAN` when undefined.
#[must_use]
pub fn plays_per_month(track: &TrackFact, now: Timestamp) -> f64 {
    match track.months_since_added(now) {
        None | Some(0) => f64::NAN,
        Some(months) => {
            let net = track.play_count as f64 - track.skip_count as f64;
            net / f64::from(months)
        }
    }
}

/// Median of the finite values; `None` when there are none.
///
/// A computed median of `0.0` is distinct from `None`.
///
/// # Examples
///
/// ```
/// use encore::ppm::median;
///
/// assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
/// assert_eq!(median(&[1.0, 3.0]), Some(2.0));
/// assert_eq!(median(&[f64::NAN]), None);
/// ```
#[must_use]
pub fn median(values: &[f64]) -> Option<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }

    finite.sort_by(f64::total_cmp);
    let mid = finite.len() / 2;
    if finite.len() % 2 == 0 {
        Some((finite[mid - 1] + finite[mid]) / 2.0)
    } else {
        Some(finite[mid])
    }
}

/// Lazily populated PPM values, shared by clones.
///
/// Call [`PpmCache::invalidate`] whenever the track list is reloaded from the
/// host; values are otherwise never refreshed.
#[derive(Debug, Clone, Default)]
pub struct PpmCache {
    values: PpmValues,
}

impl PpmCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached PPM for `track`, computed on first request.
    pub fn get(&self, track: &TrackFact, now: Timestamp) -> f64 {
        let mut values = self.lock();
        *values.entry(track.id).or_insert_with(|| {
            let ppm = plays_per_month(track, now);
            trace!("Computed ppm {ppm:.3} for track {}", track.id);
            ppm
        })
    }

    /// Median PPM across `tracks`, ignoring undefined values.
    pub fn median(&self, tracks: &[TrackFact], now: Timestamp) -> Option<f64> {
        let values: Vec<f64> = tracks.iter().map(|track| self.get(track, now)).collect();
        median(&values)
    }

    /// Drop every cached value.
    pub fn invalidate(&self) {
        self.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TrackId, f64>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn now() -> Timestamp {
        Local.with_ymd_and_hms(2024, 7, 15, 12, 0, 0).unwrap()
    }

    fn added(id: TrackId, y: i32, m: u32, d: u32, plays: u64, skips: u64) -> TrackFact {
        TrackFact {
            added_at: Some(Local.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()),
            play_count: plays,
            skip_count: skips,
            ..TrackFact::new(id)
        }
    }

    #[test]
    fn test_plays_per_month() {
        let track = added(1, 2024, 1, 15, 30, 6);
        assert_eq!(plays_per_month(&track, now()), 4.0);
    }

    #[test]
    fn test_plays_per_month_undefined() {
        assert!(plays_per_month(&TrackFact::new(1), now()).is_nan(), "unknown add date");
        let fresh = added(2, 2024, 7, 1, 10, 0);
        assert!(plays_per_month(&fresh, now()).is_nan(), "less than a month old");
    }

    #[test]
    fn test_plays_per_month_more_skips_than_plays() {
        let track = added(1, 2024, 5, 15, 1, 5);
        assert_eq!(plays_per_month(&track, now()), -2.0);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[1.0, 2.0, 3.0]), Some(2.0));
        assert_eq!(median(&[1.0, 3.0]), Some(2.0));
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[0.0]), Some(0.0), "zero is a value, not undefined");
        assert_eq!(median(&[f64::NAN, 5.0, f64::INFINITY, 1.0]), Some(3.0));
    }

    #[test]
    fn test_cache_is_lazy_and_sticky() {
        let cache = PpmCache::new();
        assert!(cache.is_empty());

        let track = added(1, 2024, 1, 15, 30, 6);
        assert_eq!(cache.get(&track, now()), 4.0);
        assert_eq!(cache.len(), 1);

        // Counters moved on, but the cached value holds until invalidation.
        let replayed = TrackFact { play_count: 60, ..track.clone() };
        assert_eq!(cache.get(&replayed, now()), 4.0);

        cache.invalidate();
        assert!(cache.is_empty());
        assert_eq!(cache.get(&replayed, now()), 9.0);
    }

    #[test]
    fn test_cache_median() {
        let cache = PpmCache::new();
        let tracks = vec![
            added(1, 2024, 6, 15, 1, 0),
            added(2, 2024, 6, 15, 3, 0),
            TrackFact::new(3),
        ];
        assert_eq!(cache.median(&tracks, now()), Some(2.0));
        assert_eq!(cache.median(&[TrackFact::new(4)], now()), None);
    }
}
