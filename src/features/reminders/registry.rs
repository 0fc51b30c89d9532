//! # Reminder Registry
//!
//! Keyed store of armed reminder jobs. Owns every job's lifecycle: arming,
//! re-arming on a changed fire time, cancellation, and delivery on fire.
//!
//! All transitions for a key happen under that key's `DashMap` entry lock,
//! including the sink call on fire. A `remove` therefore either runs before
//! the fire callback takes the lock (and the fire becomes a no-op) or after
//! delivery has finished; it never returns while a delivery for the key could
//! still start.
//!
//! - **Version**: 1.2.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.2.0: Generation numbers so replaced timers can never fire the new job
//! - 1.1.0: Title-only changes update in place without re-arming
//! - 1.0.0: Initial release

use crate::core::clock::{Clock, Timer};
use crate::features::reminders::job::{JobKey, JobSpec, JobState, ReminderJob, ReminderKind};
use crate::features::reminders::notification::{DeliverySink, Notification};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Operations the scheduler needs from a job store
pub trait JobRegistry: Send + Sync {
    /// Arm, re-arm, or drop the job described by `spec`
    fn upsert(&self, spec: JobSpec);

    /// Cancel and forget a job; unknown ids are ignored
    fn remove(&self, kind: ReminderKind, id: &str);

    /// Cancel every job
    fn remove_all(&self);
}

struct ArmedJob {
    job: ReminderJob,
    timer: Timer,
}

struct RegistryInner {
    jobs: DashMap<JobKey, ArmedJob>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn DeliverySink>,
    next_generation: AtomicU64,
}

/// Registry of scheduled reminders
#[derive(Clone)]
pub struct ReminderRegistry {
    inner: Arc<RegistryInner>,
}

impl ReminderRegistry {
    pub fn new(clock: Arc<dyn Clock>, sink: Arc<dyn DeliverySink>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                jobs: DashMap::new(),
                clock,
                sink,
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Snapshot of a scheduled job
    pub fn get(&self, kind: ReminderKind, id: &str) -> Option<ReminderJob> {
        self.inner
            .jobs
            .get(&(kind, id.to_string()))
            .map(|armed| armed.job.clone())
    }

    /// Snapshots of every scheduled job, soonest first
    pub fn jobs(&self) -> Vec<ReminderJob> {
        let mut jobs: Vec<_> = self
            .inner
            .jobs
            .iter()
            .map(|armed| armed.job.clone())
            .collect();
        jobs.sort_by(|a, b| a.fire_at.cmp(&b.fire_at));
        jobs
    }

    pub fn len(&self) -> usize {
        self.inner.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.jobs.is_empty()
    }

    /// Number of scheduled jobs of one kind
    pub fn count(&self, kind: ReminderKind) -> usize {
        self.inner.jobs.iter().filter(|armed| armed.key().0 == kind).count()
    }

    /// Cancel a job and return its final snapshot
    pub fn take(&self, kind: ReminderKind, id: &str) -> Option<ReminderJob> {
        let (_, armed) = self.inner.jobs.remove(&(kind, id.to_string()))?;
        armed.timer.cancel();

        let mut job = armed.job;
        job.state = JobState::Canceled;
        debug!("Canceled {} reminder {}", kind, id);
        Some(job)
    }

    fn arm(&self, key: JobKey, fire_at: DateTime<Utc>, now: DateTime<Utc>) -> (u64, Timer) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        // fire_at > now is checked by callers, so the conversion cannot fail
        let delay = (fire_at - now).to_std().unwrap_or_default();

        let weak = Arc::downgrade(&self.inner);
        let timer = self
            .inner
            .clock
            .after(delay, Box::new(move || fire(&weak, key, generation)));
        (generation, timer)
    }
}

impl JobRegistry for ReminderRegistry {
    fn upsert(&self, spec: JobSpec) {
        let now = self.inner.clock.now();
        let fire_at = spec.fire_at();
        let key = spec.key();

        match self.inner.jobs.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                debug_assert!(
                    !entry.get().job.state.is_terminal(),
                    "terminal job left in registry for {:?}",
                    entry.key()
                );

                let stale = entry.get().job.state.is_terminal();
                if !stale && entry.get().job.fire_at == fire_at {
                    // Same fire time: refresh descriptive fields, keep the timer
                    let job = &mut entry.get_mut().job;
                    job.title = spec.title;
                    job.due_at = spec.due_at;
                    job.lead_time = spec.lead_time;
                    return;
                }

                if fire_at <= now {
                    let (_, previous) = entry.remove_entry();
                    previous.timer.cancel();
                    debug!(
                        "Dropped {} reminder {}: new fire time {} is not in the future",
                        key.0, key.1, fire_at
                    );
                    return;
                }

                // New timer is armed before the old one is canceled; both happen
                // under the entry lock so the old timer's callback sees a stale
                // generation if it is already waiting on the lock.
                let (generation, timer) = self.arm(key.clone(), fire_at, now);
                let previous = entry.insert(ArmedJob {
                    job: ReminderJob::scheduled(spec, generation),
                    timer,
                });
                previous.timer.cancel();
                info!(
                    "Rescheduled {} reminder {}: {} -> {}",
                    key.0, key.1, previous.job.fire_at, fire_at
                );
            }
            Entry::Vacant(entry) => {
                if fire_at <= now {
                    debug!(
                        "Skipped {} reminder {}: fire time {} already passed",
                        key.0, key.1, fire_at
                    );
                    return;
                }

                let (generation, timer) = self.arm(key.clone(), fire_at, now);
                entry.insert(ArmedJob {
                    job: ReminderJob::scheduled(spec, generation),
                    timer,
                });
                info!("Scheduled {} reminder {} for {}", key.0, key.1, fire_at);
            }
        }
    }

    fn remove(&self, kind: ReminderKind, id: &str) {
        self.take(kind, id);
    }

    fn remove_all(&self) {
        let mut canceled = 0;
        self.inner.jobs.retain(|_, armed| {
            armed.timer.cancel();
            canceled += 1;
            false
        });

        if canceled > 0 {
            info!("Canceled {} scheduled reminders", canceled);
        }
    }
}

/// Timer callback: deliver the job if it is still the one this timer was armed for
fn fire(inner: &Weak<RegistryInner>, key: JobKey, generation: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };

    let Entry::Occupied(entry) = inner.jobs.entry(key) else {
        return;
    };
    if entry.get().job.generation != generation {
        debug!(
            "Ignoring stale timer for {} reminder {}",
            entry.key().0,
            entry.key().1
        );
        return;
    }

    let mut job = entry.get().job.clone();
    job.state = JobState::Fired;
    let notification = Notification::for_job(&job);

    // At-most-once: a failed delivery is logged and never re-armed
    match inner.sink.deliver(&notification) {
        Ok(()) => info!("Delivered {} reminder {}", job.kind, job.id),
        Err(e) => warn!("Failed to deliver {} reminder {}: {}", job.kind, job.id, e),
    }

    entry.remove();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use anyhow::{anyhow, Result};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<Notification>>,
        fail: bool,
    }

    impl RecordingSink {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn delivered(&self) -> Vec<Notification> {
            self.delivered.lock().unwrap().clone()
        }
    }

    impl DeliverySink for RecordingSink {
        fn deliver(&self, notification: &Notification) -> Result<()> {
            self.delivered.lock().unwrap().push(notification.clone());
            if self.fail {
                Err(anyhow!("notifications blocked"))
            } else {
                Ok(())
            }
        }
    }

    fn setup() -> (Arc<ManualClock>, Arc<RecordingSink>, ReminderRegistry) {
        setup_with_sink(RecordingSink::default())
    }

    fn setup_with_sink(sink: RecordingSink) -> (Arc<ManualClock>, Arc<RecordingSink>, ReminderRegistry) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sink = Arc::new(sink);
        let registry = ReminderRegistry::new(clock.clone(), sink.clone());
        (clock, sink, registry)
    }

    fn task(clock: &ManualClock, id: &str, due_in: chrono::Duration) -> JobSpec {
        JobSpec::new(
            ReminderKind::Task,
            id,
            format!("Task {id}"),
            clock.now() + due_in,
            chrono::Duration::minutes(15),
        )
    }

    #[test]
    fn test_fires_once_at_fire_time() {
        let (clock, sink, registry) = setup();
        registry.upsert(task(&clock, "T1", chrono::Duration::hours(2)));

        let job = registry.get(ReminderKind::Task, "T1").unwrap();
        assert_eq!(job.fire_at, clock.now() + chrono::Duration::minutes(105));
        assert_eq!(job.state, JobState::Scheduled);

        clock.advance(Duration::from_secs(105 * 60 - 1));
        assert!(sink.delivered().is_empty());

        clock.advance(Duration::from_secs(1));
        let delivered = sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].kind, ReminderKind::Task);
        assert_eq!(delivered[0].id, "T1");
        assert!(registry.is_empty());

        clock.advance(Duration::from_secs(24 * 3600));
        assert_eq!(sink.delivered().len(), 1);
    }

    #[test]
    fn test_identical_upsert_keeps_timer() {
        let (clock, _sink, registry) = setup();
        let spec = task(&clock, "T1", chrono::Duration::hours(1));

        registry.upsert(spec.clone());
        let first = registry.get(ReminderKind::Task, "T1").unwrap();
        registry.upsert(spec);
        let second = registry.get(ReminderKind::Task, "T1").unwrap();

        assert_eq!(first.generation, second.generation);
        assert_eq!(clock.pending_timers(), 1);
    }

    #[test]
    fn test_title_change_updates_in_place() {
        let (clock, sink, registry) = setup();
        let mut spec = task(&clock, "T1", chrono::Duration::hours(1));
        registry.upsert(spec.clone());
        let generation = registry.get(ReminderKind::Task, "T1").unwrap().generation;

        spec.title = "Renamed".to_string();
        registry.upsert(spec);

        let job = registry.get(ReminderKind::Task, "T1").unwrap();
        assert_eq!(job.generation, generation);
        assert_eq!(job.title, "Renamed");

        clock.advance(Duration::from_secs(3600));
        assert_eq!(sink.delivered()[0].body, "Renamed is due soon!");
    }

    #[test]
    fn test_reschedule_replaces_timer() {
        let (clock, sink, registry) = setup();
        registry.upsert(task(&clock, "T1", chrono::Duration::hours(1)));
        registry.upsert(task(&clock, "T1", chrono::Duration::hours(3)));

        assert_eq!(registry.len(), 1);
        assert_eq!(clock.pending_timers(), 1);
        let job = registry.get(ReminderKind::Task, "T1").unwrap();
        assert_eq!(job.fire_at, clock.now() + chrono::Duration::minutes(165));

        // Old fire time passes silently
        clock.advance(Duration::from_secs(2 * 3600));
        assert!(sink.delivered().is_empty());

        clock.advance(Duration::from_secs(3600));
        assert_eq!(sink.delivered().len(), 1);
    }

    #[test]
    fn test_past_due_is_dropped_not_fired() {
        let (clock, sink, registry) = setup();

        registry.upsert(task(&clock, "late", -chrono::Duration::minutes(5)));
        // Due in 10 minutes but lead time is 15: fire time already passed
        registry.upsert(task(&clock, "soon", chrono::Duration::minutes(10)));
        // Fire time exactly now is not in the future
        registry.upsert(task(&clock, "edge", chrono::Duration::minutes(15)));

        assert!(registry.is_empty());
        clock.advance(Duration::from_secs(3600));
        assert!(sink.delivered().is_empty());
    }

    #[test]
    fn test_reschedule_into_past_removes_job() {
        let (clock, sink, registry) = setup();
        registry.upsert(task(&clock, "T1", chrono::Duration::hours(1)));
        registry.upsert(task(&clock, "T1", chrono::Duration::minutes(1)));

        assert!(registry.is_empty());
        assert_eq!(clock.pending_timers(), 0);
        clock.advance(Duration::from_secs(7200));
        assert!(sink.delivered().is_empty());
    }

    #[test]
    fn test_remove_is_terminal() {
        let (clock, sink, registry) = setup();
        registry.upsert(task(&clock, "T1", chrono::Duration::hours(1)));

        let removed = registry.take(ReminderKind::Task, "T1").unwrap();
        assert_eq!(removed.state, JobState::Canceled);
        registry.remove(ReminderKind::Task, "T1");
        registry.remove(ReminderKind::Meeting, "unknown");

        clock.advance(Duration::from_secs(7200));
        assert!(sink.delivered().is_empty());
    }

    #[test]
    fn test_in_flight_fire_after_remove_is_noop() {
        // Simulates a timer that claimed its fire before the job was removed
        // but reached the registry afterwards.
        let (clock, sink, registry) = setup();
        registry.upsert(task(&clock, "T1", chrono::Duration::hours(1)));
        let generation = registry.get(ReminderKind::Task, "T1").unwrap().generation;

        registry.remove(ReminderKind::Task, "T1");
        fire(
            &Arc::downgrade(&registry.inner),
            (ReminderKind::Task, "T1".to_string()),
            generation,
        );

        assert!(sink.delivered().is_empty());
    }

    #[test]
    fn test_stale_generation_does_not_fire_replacement() {
        let (clock, sink, registry) = setup();
        registry.upsert(task(&clock, "T1", chrono::Duration::hours(1)));
        let old = registry.get(ReminderKind::Task, "T1").unwrap().generation;
        registry.upsert(task(&clock, "T1", chrono::Duration::hours(2)));

        fire(
            &Arc::downgrade(&registry.inner),
            (ReminderKind::Task, "T1".to_string()),
            old,
        );

        assert!(sink.delivered().is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failed_delivery_is_not_retried() {
        let (clock, sink, registry) = setup_with_sink(RecordingSink::failing());
        registry.upsert(task(&clock, "T1", chrono::Duration::hours(1)));

        clock.advance(Duration::from_secs(3600));
        assert_eq!(sink.delivered().len(), 1);
        assert!(registry.is_empty());
        assert_eq!(clock.pending_timers(), 0);
    }

    #[test]
    fn test_remove_all_cancels_everything() {
        let (clock, sink, registry) = setup();
        registry.upsert(task(&clock, "T1", chrono::Duration::hours(1)));
        registry.upsert(task(&clock, "T2", chrono::Duration::hours(2)));
        registry.upsert(JobSpec::new(
            ReminderKind::Meeting,
            "M1",
            "Standup",
            clock.now() + chrono::Duration::hours(1),
            chrono::Duration::minutes(10),
        ));
        assert_eq!(registry.count(ReminderKind::Task), 2);
        assert_eq!(registry.count(ReminderKind::Meeting), 1);

        registry.remove_all();

        assert!(registry.is_empty());
        assert_eq!(clock.pending_timers(), 0);
        clock.advance(Duration::from_secs(3 * 3600));
        assert!(sink.delivered().is_empty());
    }

    #[test]
    fn test_same_id_different_kinds_are_independent() {
        let (clock, sink, registry) = setup();
        registry.upsert(task(&clock, "42", chrono::Duration::hours(1)));
        registry.upsert(JobSpec::new(
            ReminderKind::Meeting,
            "42",
            "Review",
            clock.now() + chrono::Duration::hours(1),
            chrono::Duration::minutes(10),
        ));

        registry.remove(ReminderKind::Task, "42");
        clock.advance(Duration::from_secs(3600));

        let delivered = sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].kind, ReminderKind::Meeting);
        assert_eq!(delivered[0].body, "Review starts in 10 minutes");
    }

    #[test]
    fn test_jobs_sorted_by_fire_time() {
        let (clock, _sink, registry) = setup();
        registry.upsert(task(&clock, "later", chrono::Duration::hours(3)));
        registry.upsert(task(&clock, "sooner", chrono::Duration::hours(1)));

        let ids: Vec<_> = registry.jobs().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["sooner", "later"]);
    }
}
