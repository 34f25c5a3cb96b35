//! Staleness-weighted shuffle.
//!
//! Turns a list of tracks into a full play order that favours tracks which
//! have gone unheard the longest. The same routine orders a single playlist or
//! the whole library.
//!
//! # Algorithm
//!
//! ```text
//! days_i   = days since last play (unknown -> max known days)
//! w_i      = days_i + 1
//! p_i      = w_i / sum(w)
//! score_i  = ln(p_i) - ln(-ln(u_i)),   u_i ~ U(0, 1)
//! order    = indices sorted by descending score
//! ```
//!
//! Sorting by Gumbel-perturbed log-probabilities draws a weighted permutation
//! in one pass, with the same distribution as repeatedly sampling without
//! replacement and renormalizing.

use crate::track::{Timestamp, TrackFact};
use log::{debug, trace};
use rand::distributions::Open01;
use rand::Rng;

/// Staleness in days for every track, `None` where the track was never played.
#[must_use]
pub fn staleness_days(tracks: &[TrackFact], now: Timestamp) -> Vec<Option<u64>> {
    tracks
        .iter()
        .map(|track| track.days_since_played(now))
        .collect()
}

/// Selection weight for every track, or `None` when no track has ever been
/// played and nothing distinguishes one from another.
///
/// Never-played tracks are treated as at least as stale as the stalest known
/// track. The `+ 1` keeps tracks played today selectable.
#[must_use]
pub fn staleness_weights(tracks: &[TrackFact], now: Timestamp) -> Option<Vec<f64>> {
    let days = staleness_days(tracks, now);
    let max_known = days.iter().flatten().copied().max()?;

    Some(
        days.into_iter()
            .map(|d| d.unwrap_or(max_known))
            .map(|d| d as f64 + 1.0)
            .collect(),
    )
}

/// Shuffle with the thread-local RNG.
///
/// # Examples
///
/// ```
/// use encore::algorithm::shuffle;
/// use encore::track::TrackFact;
///
/// let tracks: Vec<TrackFact> = (1..=4).map(TrackFact::new).collect();
/// // Nothing has been played yet, so the library order is kept.
/// assert_eq!(shuffle(&tracks, chrono::Local::now()), vec![0, 1, 2, 3]);
/// ```
#[must_use]
pub fn shuffle(tracks: &[TrackFact], now: Timestamp) -> Vec<usize> {
    shuffle_with_rng(tracks, now, &mut rand::thread_rng())
}

/// Shuffle drawing noise from `rng`. Returns a permutation of `0..tracks.len()`.
///
/// Total over any input: empty in, empty out; when no track has a known
/// last-played date the identity order is returned unchanged.
pub fn shuffle_with_rng<R: Rng + ?Sized>(
    tracks: &[TrackFact],
    now: Timestamp,
    rng: &mut R,
) -> Vec<usize> {
    let identity: Vec<usize> = (0..tracks.len()).collect();
    if tracks.len() < 2 {
        return identity;
    }

    let Some(weights) = staleness_weights(tracks, now) else {
        debug!("No track has a last-played date, keeping library order");
        return identity;
    };

    let total: f64 = weights.iter().sum();
    let mut keyed: Vec<(usize, f64)> = weights
        .iter()
        .enumerate()
        .map(|(index, w)| (index, gumbel_key(w / total, rng)))
        .collect();

    keyed.sort_by(|(_, a), (_, b)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    trace!("Shuffled {} tracks by staleness", keyed.len());

    keyed.into_iter().map(|(index, _)| index).collect()
}

/// Consume `tracks` and return them in staleness-weighted order.
pub fn shuffle_tracks<R: Rng + ?Sized>(tracks: Vec<TrackFact>, now: Timestamp, rng: &mut R) -> Vec<TrackFact> {
    let order = shuffle_with_rng(&tracks, now, rng);
    let mut slots: Vec<Option<TrackFact>> = tracks.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect()
}

/// `ln(p) + Gumbel(0, 1)` noise.
#[inline]
fn gumbel_key<R: Rng + ?Sized>(probability: f64, rng: &mut R) -> f64 {
    let u: f64 = rng.sample(Open01);
    probability.ln() - (-u.ln()).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn now() -> Timestamp {
        chrono::Local.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn played(id: u64, days_ago: i64) -> TrackFact {
        TrackFact {
            last_played_at: Some(now() - Duration::days(days_ago)),
            ..TrackFact::new(id)
        }
    }

    fn assert_permutation(order: &[usize], n: usize) {
        let mut sorted = order.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..n).collect::<Vec<_>>(), "order must be a permutation of 0..{n}");
    }

    #[test]
    fn test_empty_and_single() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(shuffle_with_rng(&[], now(), &mut rng).is_empty());
        assert_eq!(shuffle_with_rng(&[played(9, 3)], now(), &mut rng), vec![0]);
    }

    #[test]
    fn test_permutation_totality() {
        let mut rng = StdRng::seed_from_u64(42);
        for n in [2_usize, 3, 17, 250] {
            let tracks: Vec<TrackFact> = (0..n)
                .map(|i| match i % 3 {
                    0 => TrackFact::new(i as u64),
                    _ => played(i as u64, (i * 7 % 90) as i64),
                })
                .collect();
            let order = shuffle_with_rng(&tracks, now(), &mut rng);
            assert_permutation(&order, n);
        }
    }

    #[test]
    fn test_no_information_keeps_identity() {
        let tracks: Vec<TrackFact> = (10..20).map(TrackFact::new).collect();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(shuffle_with_rng(&tracks, now(), &mut rng), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_unknown_days_take_max_known() {
        let tracks = vec![played(1, 0), TrackFact::new(2), played(3, 12)];
        let weights = staleness_weights(&tracks, now()).unwrap();
        assert_eq!(weights, vec![1.0, 13.0, 13.0]);
    }

    #[test]
    fn test_played_today_still_selectable() {
        let weights = staleness_weights(&[played(1, 0), played(2, 0)], now()).unwrap();
        assert!(weights.iter().all(|w| *w >= 1.0), "minimum weight is one");
    }

    #[test]
    fn test_stale_track_first_more_often() {
        let tracks = vec![played(1, 0), played(2, 30)];
        let mut rng = StdRng::seed_from_u64(2024);

        let stale_first = (0..2000)
            .filter(|_| shuffle_with_rng(&tracks, now(), &mut rng)[0] == 1)
            .count();

        assert!(stale_first > 1000, "stale track led only {stale_first} of 2000 orders");
    }

    #[test]
    fn test_shuffle_tracks_keeps_every_track() {
        let tracks: Vec<TrackFact> = (0..30).map(|i| played(i, i as i64)).collect();
        let mut rng = StdRng::seed_from_u64(3);
        let shuffled = shuffle_tracks(tracks.clone(), now(), &mut rng);

        let mut ids: Vec<u64> = shuffled.iter().map(|t| t.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..30).collect::<Vec<_>>());
    }
}
