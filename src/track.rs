//! Per-track facts as read from the host library.
//!
//! A [`TrackFact`] is built fresh from the library on every query and never
//! mutated afterwards. Both the shuffler and the stats engine consume it.

use chrono::{DateTime, Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};

/// Stable opaque identifier the host library assigns to a track.
pub type TrackId = u64;

/// Stable opaque identifier the host library assigns to a playlist.
pub type PlaylistId = u64;

/// Wall-clock moment. Calendar-day policy is evaluated in local time.
pub type Timestamp = DateTime<Local>;

/// How a track looks to the core at query time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackFact {
    pub id: TrackId,
    /// `None` means the track has never been played.
    #[serde(default)]
    pub last_played_at: Option<Timestamp>,
    #[serde(default)]
    pub play_count: u64,
    #[serde(default)]
    pub skip_count: u64,
    /// When the track entered the library, if the host knows.
    #[serde(default)]
    pub added_at: Option<Timestamp>,
    /// Seconds.
    #[serde(default)]
    pub playback_duration: f64,
}

impl TrackFact {
    /// A never-played track with no counters.
    #[must_use]
    pub fn new(id: TrackId) -> Self {
        Self {
            id,
            last_played_at: None,
            play_count: 0,
            skip_count: 0,
            added_at: None,
            playback_duration: 0.0,
        }
    }

    /// Whole days since the last play, or `None` if never played.
    ///
    /// Plays stamped in the future (clock skew on the host) count as today.
    #[must_use]
    pub fn days_since_played(&self, now: Timestamp) -> Option<u64> {
        self.last_played_at
            .map(|played| u64::try_from((now - played).num_days()).unwrap_or(0))
    }

    /// Whole calendar months since the track was added, or `None` if unknown.
    #[must_use]
    pub fn months_since_added(&self, now: Timestamp) -> Option<u32> {
        self.added_at
            .map(|added| whole_months_between(added.date_naive(), now.date_naive()))
    }
}

/// A named, ordered set of tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: PlaylistId,
    pub name: String,
    pub track_ids: Vec<TrackId>,
}

/// Calendar date a timestamp falls on, in local time.
#[must_use]
pub fn calendar_day(ts: Timestamp) -> NaiveDate {
    ts.date_naive()
}

/// Number of complete months from `from` to `to`; zero if `to` precedes `from`.
#[must_use]
pub fn whole_months_between(from: NaiveDate, to: NaiveDate) -> u32 {
    if to <= from {
        return 0;
    }

    let mut months = (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32;
    // The last month isn't complete until the day-of-month comes around again.
    if to.day() < from.day() {
        months -= 1;
    }

    u32::try_from(months).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(y: i32, m: u32, d: u32) -> Timestamp {
        Local.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_days_since_played() {
        let now = at(2024, 3, 10);
        let mut track = TrackFact::new(1);
        assert_eq!(track.days_since_played(now), None, "never played is unknown");

        track.last_played_at = Some(now);
        assert_eq!(track.days_since_played(now), Some(0));

        track.last_played_at = Some(now - Duration::days(30));
        assert_eq!(track.days_since_played(now), Some(30));

        track.last_played_at = Some(now + Duration::days(2));
        assert_eq!(track.days_since_played(now), Some(0), "future plays clamp to today");
    }

    #[test]
    fn test_whole_months_between() {
        let d = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();

        assert_eq!(whole_months_between(d(2024, 1, 15), d(2024, 1, 31)), 0);
        assert_eq!(whole_months_between(d(2024, 1, 15), d(2024, 2, 14)), 0);
        assert_eq!(whole_months_between(d(2024, 1, 15), d(2024, 2, 15)), 1);
        assert_eq!(whole_months_between(d(2023, 11, 1), d(2024, 2, 1)), 3);
        assert_eq!(whole_months_between(d(2024, 5, 1), d(2024, 2, 1)), 0);
    }

    #[test]
    fn test_months_since_added_unknown() {
        let track = TrackFact::new(7);
        assert_eq!(track.months_since_added(at(2024, 6, 1)), None);
    }

    #[test]
    fn test_track_fact_json_defaults() {
        let track: TrackFact = serde_json::from_str(r#"{"id": 42}"#).unwrap();
        assert_eq!(track, TrackFact::new(42));
    }
}
