//! Play-count snapshots and their bounded history.
//!
//! The host exposes lifetime play counters but no log of individual plays,
//! so listening activity is reconstructed by diffing snapshots of those
//! counters. [`SnapshotHistory`] is the pure retention policy: at most one
//! snapshot per calendar day, ascending, at most `retention_days` entries.
//! [`SnapshotStore`] wraps it with persistence, a custom baseline slot and a
//! single-flight guard around the expensive library scan.

use crate::clock::Clock;
use crate::library::{current_counts, MediaLibrary};
use crate::storage::{self, KeyValueStore, CUSTOM_BASELINE_KEY, SNAPSHOTS_KEY};
use crate::track::{calendar_day, Timestamp, TrackId};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Snapshots kept when nothing else is configured.
pub const DEFAULT_RETENTION_DAYS: usize = 90;

/// Every track's play count at one moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSnapshot {
    pub date: Timestamp,
    pub counts: BTreeMap<TrackId, u64>,
}

impl CountSnapshot {
    #[must_use]
    pub fn new(date: Timestamp, counts: BTreeMap<TrackId, u64>) -> Self {
        Self { date, counts }
    }

    #[must_use]
    pub fn day(&self) -> NaiveDate {
        calendar_day(self.date)
    }

    /// Count for `id`, zero for tracks the snapshot never saw.
    #[must_use]
    pub fn count(&self, id: TrackId) -> u64 {
        self.counts.get(&id).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total_plays(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// Rolling, day-deduplicated list of snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotHistory {
    snapshots: Vec<CountSnapshot>,
    retention_days: usize,
}

impl Default for SnapshotHistory {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_DAYS)
    }
}

impl SnapshotHistory {
    #[must_use]
    pub fn new(retention_days: usize) -> Self {
        Self {
            snapshots: Vec::new(),
            retention_days: retention_days.max(1),
        }
    }

    /// Rebuild a history from persisted entries in any order.
    ///
    /// Same-day duplicates collapse to the latest one and the result is
    /// trimmed to `retention_days`.
    #[must_use]
    pub fn from_snapshots(mut snapshots: Vec<CountSnapshot>, retention_days: usize) -> Self {
        snapshots.sort_by_key(|s| s.date);
        let mut history = Self::new(retention_days);
        for snapshot in snapshots {
            history.insert(snapshot);
        }
        history
    }

    /// Insert `snapshot`, replacing any snapshot from the same calendar day.
    ///
    /// Returns `true` when an existing entry was replaced.
    pub fn insert(&mut self, snapshot: CountSnapshot) -> bool {
        let day = snapshot.day();
        let replaced = match self.snapshots.iter_mut().find(|s| s.day() == day) {
            Some(existing) => {
                *existing = snapshot;
                true
            }
            None => {
                self.snapshots.push(snapshot);
                false
            }
        };

        self.snapshots.sort_by_key(|s| s.date);
        self.trim();
        replaced
    }

    fn trim(&mut self) {
        if self.snapshots.len() > self.retention_days {
            let excess = self.snapshots.len() - self.retention_days;
            self.snapshots.drain(..excess);
            debug!("Trimmed {excess} snapshots beyond {} day retention", self.retention_days);
        }
    }

    /// Latest snapshot taken at or before `date`.
    #[must_use]
    pub fn most_recent_on_or_before(&self, date: Timestamp) -> Option<&CountSnapshot> {
        self.snapshots.iter().rev().find(|s| s.date <= date)
    }

    #[must_use]
    pub fn earliest(&self) -> Option<&CountSnapshot> {
        self.snapshots.first()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&CountSnapshot> {
        self.snapshots.last()
    }

    #[must_use]
    pub fn snapshots(&self) -> &[CountSnapshot] {
        &self.snapshots
    }

    #[must_use]
    pub fn retention_days(&self) -> usize {
        self.retention_days
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// Outcome shared with callers that joined an in-flight capture.
type FlightOutcome = std::result::Result<Option<CountSnapshot>, String>;

/// One library scan in progress.
#[derive(Debug, Default)]
struct Flight {
    outcome: Mutex<Option<FlightOutcome>>,
    landed: Condvar,
}

impl Flight {
    fn land(&self, outcome: FlightOutcome) {
        *lock(&self.outcome) = Some(outcome);
        self.landed.notify_all();
    }

    fn wait(&self) -> FlightOutcome {
        let mut outcome = lock(&self.outcome);
        loop {
            if let Some(landed) = outcome.as_ref() {
                return landed.clone();
            }
            outcome = self
                .landed
                .wait(outcome)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Clears the in-flight slot when the leader finishes, even by unwinding.
struct FlightGuard<'a> {
    slot: &'a Mutex<Option<Arc<Flight>>>,
    flight: Arc<Flight>,
    landed: bool,
}

impl FlightGuard<'_> {
    fn land(mut self, outcome: &Result<Option<CountSnapshot>>) {
        lock(self.slot).take();
        self.flight.land(match outcome {
            Ok(snapshot) => Ok(snapshot.clone()),
            Err(err) => Err(format!("{err:#}")),
        });
        self.landed = true;
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.landed {
            lock(self.slot).take();
            self.flight.land(Err("Snapshot capture was abandoned".to_string()));
        }
    }
}

/// Owner of the snapshot history and the custom baseline.
///
/// Captures are serialized, and at most one library scan runs at a time:
/// callers arriving during a scan wait for it and share its result.
pub struct SnapshotStore {
    history: Mutex<SnapshotHistory>,
    custom_baseline: Mutex<Option<CountSnapshot>>,
    in_flight: Mutex<Option<Arc<Flight>>>,
    storage: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("snapshots", &lock(&self.history).len())
            .field("has_custom_baseline", &lock(&self.custom_baseline).is_some())
            .finish_non_exhaustive()
    }
}

impl SnapshotStore {
    /// Load persisted state from `storage`.
    pub fn open(storage: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, retention_days: usize) -> Result<Self> {
        let persisted: Vec<CountSnapshot> = storage::load_json(storage.as_ref(), SNAPSHOTS_KEY)
            .context("Failed to load snapshot history")?
            .unwrap_or_default();
        let history = SnapshotHistory::from_snapshots(persisted, retention_days);

        let custom_baseline: Option<CountSnapshot> = storage::load_json(storage.as_ref(), CUSTOM_BASELINE_KEY)
            .context("Failed to load custom baseline")?;

        debug!(
            "Opened snapshot store with {} snapshots, custom baseline: {}",
            history.len(),
            custom_baseline.is_some()
        );

        Ok(Self {
            history: Mutex::new(history),
            custom_baseline: Mutex::new(custom_baseline),
            in_flight: Mutex::new(None),
            storage,
            clock,
        })
    }

    /// Record `counts` as the snapshot for the calendar day of `at`.
    ///
    /// Empty counts are ignored: a zero baseline would turn every existing
    /// play into window activity.
    pub fn capture(&self, counts: BTreeMap<TrackId, u64>, at: Timestamp) -> Result<Option<CountSnapshot>> {
        if counts.is_empty() {
            debug!("Ignoring capture with no track counts");
            return Ok(None);
        }

        let snapshot = CountSnapshot::new(at, counts);
        let mut history = lock(&self.history);

        let mut next = history.clone();
        let replaced = next.insert(snapshot.clone());
        storage::save_json(self.storage.as_ref(), SNAPSHOTS_KEY, next.snapshots())
            .context("Failed to persist snapshot history")?;
        *history = next;

        info!(
            "{} snapshot for {} ({} tracks, {} retained)",
            if replaced { "Replaced" } else { "Captured" },
            snapshot.day(),
            snapshot.counts.len(),
            history.len()
        );
        Ok(Some(snapshot))
    }

    /// Scan `library` and capture its counts now, regardless of freshness.
    pub fn capture_now(&self, library: &dyn MediaLibrary) -> Result<Option<CountSnapshot>> {
        self.single_flight(library, None)
    }

    /// Capture now unless the latest snapshot is younger than `max_age_days`
    /// calendar days. Returns the new snapshot, or `None` when already fresh.
    pub fn ensure_freshness(&self, library: &dyn MediaLibrary, max_age_days: u32) -> Result<Option<CountSnapshot>> {
        self.single_flight(library, Some(max_age_days))
    }

    /// Whether the latest snapshot falls within `max_age_days` calendar days of today.
    #[must_use]
    pub fn is_fresh(&self, max_age_days: u32) -> bool {
        let today = calendar_day(self.clock.now());
        lock(&self.history)
            .latest()
            .is_some_and(|latest| (today - latest.day()).num_days() < i64::from(max_age_days))
    }

    fn single_flight(&self, library: &dyn MediaLibrary, max_age_days: Option<u32>) -> Result<Option<CountSnapshot>> {
        let guard = {
            let mut slot = lock(&self.in_flight);
            if let Some(flight) = slot.as_ref() {
                let flight = Arc::clone(flight);
                drop(slot);
                debug!("Capture already in flight, waiting for its result");
                return flight.wait().map_err(|msg| anyhow!(msg));
            }

            if max_age_days.is_some_and(|days| self.is_fresh(days)) {
                debug!("Latest snapshot is fresh, nothing to capture");
                return Ok(None);
            }

            let flight = Arc::new(Flight::default());
            *slot = Some(Arc::clone(&flight));
            FlightGuard {
                slot: &self.in_flight,
                flight,
                landed: false,
            }
        };

        let outcome = self.scan_and_capture(library);
        if let Err(err) = &outcome {
            warn!("Snapshot capture failed: {err:#}");
        }
        guard.land(&outcome);
        outcome
    }

    fn scan_and_capture(&self, library: &dyn MediaLibrary) -> Result<Option<CountSnapshot>> {
        let tracks = library
            .list_tracks()
            .context("Media library unavailable for snapshot")?;
        self.capture(current_counts(&tracks), self.clock.now())
    }

    /// Latest retained snapshot at or before `date`.
    #[must_use]
    pub fn most_recent_on_or_before(&self, date: Timestamp) -> Option<CountSnapshot> {
        lock(&self.history).most_recent_on_or_before(date).cloned()
    }

    #[must_use]
    pub fn latest(&self) -> Option<CountSnapshot> {
        lock(&self.history).latest().cloned()
    }

    #[must_use]
    pub fn earliest(&self) -> Option<CountSnapshot> {
        lock(&self.history).earliest().cloned()
    }

    /// Copy of every retained snapshot, oldest first.
    #[must_use]
    pub fn snapshots(&self) -> Vec<CountSnapshot> {
        lock(&self.history).snapshots().to_vec()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.history).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` against the history without copying it.
    pub fn with_history<T>(&self, f: impl FnOnce(&SnapshotHistory) -> T) -> T {
        f(&lock(&self.history))
    }

    /// Replace the custom baseline with `counts` at `at`. Empty counts are ignored.
    pub fn set_custom_baseline(&self, counts: BTreeMap<TrackId, u64>, at: Timestamp) -> Result<Option<CountSnapshot>> {
        if counts.is_empty() {
            debug!("Ignoring custom baseline with no track counts");
            return Ok(None);
        }

        let baseline = CountSnapshot::new(at, counts);
        let mut slot = lock(&self.custom_baseline);
        storage::save_json(self.storage.as_ref(), CUSTOM_BASELINE_KEY, &baseline)
            .context("Failed to persist custom baseline")?;
        *slot = Some(baseline.clone());

        info!("Custom baseline reset at {}", baseline.date);
        Ok(Some(baseline))
    }

    /// Scan `library` and make its current counts the custom baseline.
    pub fn set_custom_baseline_now(&self, library: &dyn MediaLibrary) -> Result<Option<CountSnapshot>> {
        let tracks = library
            .list_tracks()
            .context("Media library unavailable for baseline reset")?;
        self.set_custom_baseline(current_counts(&tracks), self.clock.now())
    }

    #[must_use]
    pub fn custom_baseline(&self) -> Option<CountSnapshot> {
        lock(&self.custom_baseline).clone()
    }

    pub fn clear_custom_baseline(&self) -> Result<()> {
        let mut slot = lock(&self.custom_baseline);
        self.storage
            .remove(CUSTOM_BASELINE_KEY)
            .context("Failed to delete custom baseline")?;
        *slot = None;
        Ok(())
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
