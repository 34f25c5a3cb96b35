//! # Snapshot Scheduler
//!
//! Turns "the app became active" into at most one snapshot per day.
//!
//! ## Behavior
//!
//! Each activation asks the [`SnapshotStore`] to make sure a snapshot
//! exists for today. The store's single-flight guard keeps overlapping
//! activations from scanning the library twice. A failed capture (library
//! unreachable, storage error) is logged and left alone until the next
//! activation; there is no retry loop.
//!
//! The scan can be slow on large libraries, so hosts with a latency
//! sensitive thread should use [`SnapshotScheduler::on_became_active_in_background`].
//! Dropping the returned receiver abandons the wait, not the capture: the
//! scan still finishes and commits.

use crate::library::MediaLibrary;
use crate::snapshot::{CountSnapshot, SnapshotStore};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;

/// Default freshness threshold, in calendar days.
pub const DEFAULT_MAX_AGE_DAYS: u32 = 1;

#[derive(Debug, Clone)]
pub struct SnapshotScheduler {
    store: Arc<SnapshotStore>,
    library: Arc<dyn MediaLibrary>,
    max_age_days: u32,
}

impl SnapshotScheduler {
    #[must_use]
    pub fn new(store: Arc<SnapshotStore>, library: Arc<dyn MediaLibrary>, max_age_days: u32) -> Self {
        Self {
            store,
            library,
            max_age_days: max_age_days.max(1),
        }
    }

    /// Capture a snapshot if the latest one is stale. Blocks for the scan.
    pub fn on_became_active(&self) -> Result<Option<CountSnapshot>> {
        debug!("Became active, checking snapshot freshness");
        let captured = self
            .store
            .ensure_freshness(self.library.as_ref(), self.max_age_days)?;

        match &captured {
            Some(snapshot) => info!("Captured activation snapshot for {}", snapshot.day()),
            None => debug!("Snapshot already fresh"),
        }
        Ok(captured)
    }

    /// Run [`Self::on_became_active`] on a worker thread.
    ///
    /// The receiver yields exactly one result. It may be dropped at any time.
    pub fn on_became_active_in_background(&self) -> Result<Receiver<Result<Option<CountSnapshot>>>> {
        let (tx, rx) = mpsc::channel();
        let scheduler = self.clone();

        thread::Builder::new()
            .name("encore-snapshot".to_string())
            .spawn(move || {
                let outcome = scheduler.on_became_active();
                if let Err(err) = &outcome {
                    warn!("Background snapshot failed: {err:#}");
                }
                if tx.send(outcome).is_err() {
                    debug!("Activation result dropped, caller stopped waiting");
                }
            })
            .context("Failed to spawn snapshot thread")?;

        Ok(rx)
    }

    #[must_use]
    pub fn max_age_days(&self) -> u32 {
        self.max_age_days
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::library::InMemoryLibrary;
    use crate::storage::MemoryStore;
    use crate::track::{Timestamp, TrackFact};
    use chrono::{Duration, Local, TimeZone};
    use std::time::{Duration as StdDuration, Instant};

    fn now() -> Timestamp {
        Local.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap()
    }

    fn setup() -> (Arc<FixedClock>, Arc<InMemoryLibrary>, Arc<SnapshotStore>, SnapshotScheduler) {
        let clock = Arc::new(FixedClock::new(now()));
        let library = Arc::new(InMemoryLibrary::new(
            vec![TrackFact { play_count: 3, ..TrackFact::new(1) }],
            Vec::new(),
        ));
        let store = Arc::new(SnapshotStore::open(Arc::new(MemoryStore::new()), clock.clone(), 90).unwrap());
        let scheduler = SnapshotScheduler::new(store.clone(), library.clone(), DEFAULT_MAX_AGE_DAYS);
        (clock, library, store, scheduler)
    }

    #[test]
    fn test_activation_captures_once_per_day() -> Result<()> {
        let (clock, library, store, scheduler) = setup();

        assert!(scheduler.on_became_active()?.is_some());
        assert!(scheduler.on_became_active()?.is_none());
        clock.advance(Duration::hours(30));
        assert!(scheduler.on_became_active()?.is_some());

        assert_eq!(store.len(), 2);
        assert_eq!(library.scan_count(), 2);
        Ok(())
    }

    #[test]
    fn test_failed_activation_is_not_retried() {
        let (_clock, library, store, scheduler) = setup();
        library.set_offline(true);

        assert!(scheduler.on_became_active().is_err());
        assert!(store.is_empty());
        assert_eq!(library.scan_count(), 0);
    }

    #[test]
    fn test_background_activation_reports_result() -> Result<()> {
        let (_clock, _library, store, scheduler) = setup();

        let rx = scheduler.on_became_active_in_background()?;
        let captured = rx.recv().expect("worker sends a result")?;
        assert_eq!(captured.map(|s| s.count(1)), Some(3));
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn test_abandoned_wait_still_commits() -> Result<()> {
        let (_clock, library, store, scheduler) = setup();
        library.set_scan_delay(StdDuration::from_millis(100));

        drop(scheduler.on_became_active_in_background()?);

        // Nothing else activates; only the worker can commit.
        let deadline = Instant::now() + StdDuration::from_secs(5);
        while store.is_empty() && Instant::now() < deadline {
            thread::sleep(StdDuration::from_millis(20));
        }
        assert_eq!(store.len(), 1);
        assert_eq!(library.scan_count(), 1);
        Ok(())
    }

    #[test]
    fn test_activation_during_background_scan_shares_it() -> Result<()> {
        let (_clock, library, store, scheduler) = setup();
        library.set_scan_delay(StdDuration::from_millis(100));

        let rx = scheduler.on_became_active_in_background()?;

        // Joins the in-flight scan or finds today fresh.
        assert!(scheduler.on_became_active().is_ok());
        assert!(rx.recv().expect("worker sends a result").is_ok());
        assert_eq!(store.len(), 1);
        assert_eq!(library.scan_count(), 1);
        Ok(())
    }
}
