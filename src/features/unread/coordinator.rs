//! # Reconciliation Coordinator
//!
//! Drives a [`CounterAggregator`] through snapshot seeding and live event
//! consumption:
//!
//! ```text
//! Idle -> Subscribing -> Seeding -> Live -> Closed
//!              ^                      |
//!              +---- disconnect ------+
//! ```
//!
//! The event subscription is opened before the snapshot is read, so nothing
//! published between the two is lost; events received while seeding are
//! buffered by the aggregator and replayed once the baseline lands.
//!
//! - **Version**: 1.2.0
//! - **Since**: 1.0.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.2.0: Periodic and explicit resync, status watch
//! - 1.1.0: Subscribe and snapshot retries with backoff
//! - 1.0.0: Initial release

use crate::core::config::Config;
use crate::core::retry::RetryPolicy;
use crate::features::unread::aggregator::CounterAggregator;
use crate::features::unread::events::{ChangeEvent, EventFilter, EventSource, SnapshotStore, Subscription};
use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinatorState {
    Idle,
    Subscribing,
    Seeding,
    Live,
    Closed,
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorState::Idle => write!(f, "idle"),
            CoordinatorState::Subscribing => write!(f, "subscribing"),
            CoordinatorState::Seeding => write!(f, "seeding"),
            CoordinatorState::Live => write!(f, "live"),
            CoordinatorState::Closed => write!(f, "closed"),
        }
    }
}

/// Observable coordinator health
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorStatus {
    pub state: CoordinatorState,
    /// Baselines loaded so far (1 after the first successful seed)
    pub resyncs: u64,
    /// Failed collaborator calls since the last success
    pub consecutive_failures: u32,
    /// Retry policy ran out; still retrying at the maximum delay
    pub exhausted: bool,
    pub last_error: Option<String>,
}

impl Default for CoordinatorStatus {
    fn default() -> Self {
        Self {
            state: CoordinatorState::Idle,
            resyncs: 0,
            consecutive_failures: 0,
            exhausted: false,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Subscription filter; its scope is also the snapshot scope
    pub filter: EventFilter,
    pub retry: RetryPolicy,
    /// Full resync on a fixed period while live
    pub resync_interval: Option<Duration>,
}

impl CoordinatorSettings {
    pub fn new(filter: EventFilter) -> Self {
        Self {
            filter,
            retry: RetryPolicy::default(),
            resync_interval: None,
        }
    }

    pub fn from_config(filter: EventFilter, config: &Config) -> Self {
        Self {
            filter,
            retry: config.snapshot_retry.clone(),
            resync_interval: config.resync_interval,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = Some(interval);
        self
    }
}

struct CoordinatorInner {
    aggregator: Arc<CounterAggregator>,
    source: Arc<dyn EventSource>,
    store: Arc<dyn SnapshotStore>,
    settings: CoordinatorSettings,
    status_tx: watch::Sender<CoordinatorStatus>,
}

struct RunHandle {
    stop_tx: watch::Sender<bool>,
    resync: Arc<Notify>,
    task: JoinHandle<()>,
}

pub struct ReconciliationCoordinator {
    inner: Arc<CoordinatorInner>,
    control: Mutex<Option<RunHandle>>,
}

impl ReconciliationCoordinator {
    pub fn new(
        aggregator: Arc<CounterAggregator>,
        source: Arc<dyn EventSource>,
        store: Arc<dyn SnapshotStore>,
        settings: CoordinatorSettings,
    ) -> Self {
        let (status_tx, _) = watch::channel(CoordinatorStatus::default());
        Self {
            inner: Arc::new(CoordinatorInner {
                aggregator,
                source,
                store,
                settings,
                status_tx,
            }),
            control: Mutex::new(None),
        }
    }

    fn control(&self) -> MutexGuard<'_, Option<RunHandle>> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn aggregator(&self) -> &Arc<CounterAggregator> {
        &self.inner.aggregator
    }

    /// Begin subscribing and seeding in a background task.
    ///
    /// Must be called inside a tokio runtime. A coordinator starts once;
    /// starting it again (or after `stop`) is an error.
    pub fn start(&self) -> Result<()> {
        let mut control = self.control();
        let state = self.inner.status_tx.borrow().state;
        if state != CoordinatorState::Idle || control.is_some() {
            return Err(anyhow!("Coordinator cannot start from state {}", state));
        }

        let handle = Handle::try_current()
            .map_err(|e| anyhow!("Coordinator requires a running tokio runtime: {}", e))?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let resync = Arc::new(Notify::new());
        self.inner.set_state(CoordinatorState::Subscribing);

        let task = handle.spawn(run(self.inner.clone(), stop_rx, resync.clone()));
        *control = Some(RunHandle {
            stop_tx,
            resync,
            task,
        });

        info!("📬 Unread counters starting for '{}'", self.inner.settings.filter.scope);
        Ok(())
    }

    /// Unsubscribe and stop. Idempotent. Once this returns the aggregator
    /// receives no further mutation from this coordinator.
    pub async fn stop(&self) {
        let run = self.control().take();

        if let Some(run) = run {
            let _ = run.stop_tx.send(true);
            if let Err(e) = run.task.await {
                if e.is_panic() {
                    error!("Unread counter task panicked: {}", e);
                }
            }
            info!("Unread counters stopped for '{}'", self.inner.settings.filter.scope);
        }

        self.inner.set_state(CoordinatorState::Closed);
    }

    /// Request a full resync (new subscription and snapshot).
    ///
    /// Returns `false` if the coordinator is not running.
    pub fn resync(&self) -> bool {
        match self.control().as_ref() {
            Some(run) => {
                run.resync.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> CoordinatorStatus {
        self.inner.status_tx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<CoordinatorStatus> {
        self.inner.status_tx.subscribe()
    }
}

impl Drop for ReconciliationCoordinator {
    fn drop(&mut self) {
        // Without an awaited stop the task is aborted instead
        if let Some(run) = self.control().take() {
            let _ = run.stop_tx.send(true);
            run.task.abort();
        }
    }
}

impl CoordinatorInner {
    fn set_state(&self, state: CoordinatorState) {
        self.status_tx.send_if_modified(|status| {
            if status.state == state {
                false
            } else {
                debug!("Coordinator state {} -> {}", status.state, state);
                status.state = state;
                true
            }
        });
    }

    fn apply(&self, event: &ChangeEvent) {
        if self.settings.filter.matches(event) {
            self.aggregator.increment(&event.key);
        } else {
            debug!("Skipping {} event for {}", event.event_type, event.key);
        }
    }

    fn mark_live(&self) {
        self.status_tx.send_modify(|status| {
            status.state = CoordinatorState::Live;
            status.resyncs += 1;
            status.consecutive_failures = 0;
            status.exhausted = false;
            status.last_error = None;
        });
    }

    async fn subscribe(&self) -> Subscription {
        let filter = &self.settings.filter;
        self.with_retry("subscribe", || self.source.subscribe(filter))
            .await
    }

    async fn read_snapshot(&self) -> HashMap<String, u64> {
        let scope = self.settings.filter.scope.as_str();
        self.with_retry("snapshot read", || self.store.read_counts(scope))
            .await
    }

    /// Retry `op` until it succeeds. Past the policy's attempt limit the
    /// failure is reported through the status and retries continue at the
    /// maximum delay.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = &self.settings.retry;
        let mut failures: u32 = 0;

        loop {
            match op().await {
                Ok(value) => return value,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let exhausted = policy.is_exhausted(failures);
                    let delay = if exhausted {
                        policy.max_delay
                    } else {
                        policy.delay_for_attempt(failures - 1)
                    };

                    if exhausted && failures == policy.max_attempts {
                        error!(
                            "❌ {} failed {} times, retrying every {:?}: {}",
                            what, failures, delay, e
                        );
                    } else {
                        warn!(
                            "{} failed (attempt {}), retrying in {:?}: {}",
                            what, failures, delay, e
                        );
                    }

                    self.status_tx.send_modify(|status| {
                        status.consecutive_failures = failures;
                        status.exhausted = exhausted;
                        status.last_error = Some(format!("{}: {}", what, e));
                    });

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Resolves once stop is requested or the controlling handle is gone
async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn run(inner: Arc<CoordinatorInner>, mut stop: watch::Receiver<bool>, resync: Arc<Notify>) {
    'session: loop {
        let epoch = inner.aggregator.begin_resync();
        inner.set_state(CoordinatorState::Subscribing);

        let mut subscription = tokio::select! {
            biased;
            _ = stopped(&mut stop) => break 'session,
            subscription = inner.subscribe() => subscription,
        };

        inner.set_state(CoordinatorState::Seeding);
        let snapshot = inner.read_snapshot();
        tokio::pin!(snapshot);

        let baseline = loop {
            tokio::select! {
                biased;
                _ = stopped(&mut stop) => break 'session,
                baseline = &mut snapshot => break baseline,
                event = subscription.recv() => match event {
                    Some(event) => inner.apply(&event),
                    None => {
                        warn!("Event source disconnected while seeding epoch {}, resubscribing", epoch);
                        continue 'session;
                    }
                },
            }
        };

        inner.aggregator.load_baseline(baseline);
        inner.mark_live();
        info!(
            "✅ Unread counters live (epoch {}, total {})",
            epoch,
            inner.aggregator.total()
        );

        let mut ticker = inner.settings.resync_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                biased;
                _ = stopped(&mut stop) => break 'session,
                _ = resync.notified() => {
                    info!("Resync requested");
                    continue 'session;
                }
                _ = tick(&mut ticker) => {
                    debug!("Periodic resync");
                    continue 'session;
                }
                event = subscription.recv() => match event {
                    Some(event) => inner.apply(&event),
                    None => {
                        warn!("Event source disconnected, resyncing");
                        continue 'session;
                    }
                },
            }
        }
    }
}
