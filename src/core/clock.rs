//! # Clock
//!
//! Wall-clock time source and cancellable one-shot timers.
//!
//! A [`Timer`] is shared between its owner and the firing side through a
//! single atomic latch. Whichever side claims the latch first wins: a fire
//! that claimed it runs to completion, a cancel that claimed it guarantees the
//! callback never runs.
//!
//! - **Version**: 1.2.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.2.0: ManualClock drops canceled timers from its queue when arming
//! - 1.1.0: ManualClock fires timers in deadline order with `now()` pinned to each deadline
//! - 1.0.0: Initial release with TokioClock

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Callback run exactly once when a timer fires
pub type FireFn = Box<dyn FnOnce() + Send + 'static>;

/// Time source plus a cancellable fire-after primitive
pub trait Clock: Send + Sync + 'static {
    /// Current time
    fn now(&self) -> DateTime<Utc>;

    /// Arm a timer that runs `on_fire` once `delay` has elapsed
    fn after(&self, delay: Duration, on_fire: FireFn) -> Timer;
}

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CANCELED: u8 = 2;

/// Observable phase of a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    Armed,
    Fired,
    Canceled,
}

impl std::fmt::Display for TimerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerPhase::Armed => write!(f, "armed"),
            TimerPhase::Fired => write!(f, "fired"),
            TimerPhase::Canceled => write!(f, "canceled"),
        }
    }
}

#[derive(Debug, Default)]
struct TimerLatch {
    phase: AtomicU8,
}

impl TimerLatch {
    fn claim(&self, to: u8) -> bool {
        self.phase
            .compare_exchange(ARMED, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn claim_fire(&self) -> bool {
        self.claim(FIRED)
    }

    fn claim_cancel(&self) -> bool {
        self.claim(CANCELED)
    }

    fn phase(&self) -> TimerPhase {
        match self.phase.load(Ordering::Acquire) {
            ARMED => TimerPhase::Armed,
            FIRED => TimerPhase::Fired,
            _ => TimerPhase::Canceled,
        }
    }
}

/// Handle to an armed one-shot wait. Dropping the handle cancels it.
pub struct Timer {
    latch: Arc<TimerLatch>,
    task: Option<JoinHandle<()>>,
}

impl Timer {
    /// Cancel the timer.
    ///
    /// Returns `true` if this call prevented the fire. Once it returns the
    /// callback will not start; a fire that already claimed the timer is not
    /// interrupted. Safe to call any number of times.
    pub fn cancel(&self) -> bool {
        let won = self.latch.claim_cancel();
        if won {
            if let Some(task) = &self.task {
                task.abort();
            }
        }
        won
    }

    pub fn phase(&self) -> TimerPhase {
        self.latch.phase()
    }

    pub fn is_armed(&self) -> bool {
        self.phase() == TimerPhase::Armed
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer").field("phase", &self.phase()).finish()
    }
}

/// Real wall clock backed by tokio timers
#[derive(Clone)]
pub struct TokioClock {
    handle: Handle,
}

impl TokioClock {
    /// Create a clock bound to the current tokio runtime
    pub fn new() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| anyhow!("TokioClock requires a running tokio runtime: {}", e))?;
        Ok(Self { handle })
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn after(&self, delay: Duration, on_fire: FireFn) -> Timer {
        let latch = Arc::new(TimerLatch::default());
        let task_latch = latch.clone();
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if task_latch.claim_fire() {
                on_fire();
            }
        });

        Timer {
            latch,
            task: Some(task),
        }
    }
}

struct PendingFire {
    latch: Arc<TimerLatch>,
    on_fire: FireFn,
}

struct ManualState {
    now: DateTime<Utc>,
    next_seq: u64,
    pending: BTreeMap<(DateTime<Utc>, u64), PendingFire>,
}

/// Virtual clock for deterministic tests.
///
/// Time only moves through [`ManualClock::advance`] / [`ManualClock::advance_to`],
/// which run due callbacks synchronously on the calling thread in deadline
/// order. While a callback runs, `now()` equals its deadline.
pub struct ManualClock {
    state: Mutex<ManualState>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: start,
                next_seq: 0,
                pending: BTreeMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move time forward by `by`, firing every timer that comes due
    pub fn advance(&self, by: Duration) -> usize {
        let target = deadline_after(self.now(), by);
        self.advance_to(target)
    }

    /// Move time forward to `target`, firing every timer due at or before it.
    /// Returns the number of callbacks that ran.
    pub fn advance_to(&self, target: DateTime<Utc>) -> usize {
        let mut fired = 0;
        loop {
            // Clock lock is released before the callback so it may arm new timers
            let next = {
                let mut state = self.lock();
                let due = match state.pending.keys().next() {
                    Some(key) if key.0 <= target => *key,
                    _ => {
                        if state.now < target {
                            state.now = target;
                        }
                        break;
                    }
                };
                if state.now < due.0 {
                    state.now = due.0;
                }
                state.pending.remove(&due)
            };

            if let Some(entry) = next {
                if entry.latch.claim_fire() {
                    (entry.on_fire)();
                    fired += 1;
                }
            }
        }
        fired
    }

    /// Number of timers still armed
    pub fn pending_timers(&self) -> usize {
        self.lock()
            .pending
            .values()
            .filter(|p| p.latch.phase() == TimerPhase::Armed)
            .count()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }

    fn after(&self, delay: Duration, on_fire: FireFn) -> Timer {
        let latch = Arc::new(TimerLatch::default());
        let mut state = self.lock();

        // Canceled timers leave the queue here so rescheduling does not grow it.
        // Their callbacks are dropped after the lock is released.
        let canceled: Vec<_> = state
            .pending
            .iter()
            .filter(|(_, pending)| pending.latch.phase() != TimerPhase::Armed)
            .map(|(key, _)| *key)
            .collect();
        let pruned: Vec<PendingFire> = canceled
            .iter()
            .filter_map(|key| state.pending.remove(key))
            .collect();

        let deadline = deadline_after(state.now, delay);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.insert(
            (deadline, seq),
            PendingFire {
                latch: latch.clone(),
                on_fire,
            },
        );
        drop(state);
        drop(pruned);

        Timer { latch, task: None }
    }
}

fn deadline_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
