//! # Reminder Scheduler
//!
//! Public entry point for reminders. Callers hand over the current entity list
//! for a kind whenever it changes; the scheduler diffs it against the last
//! synced values and applies the minimal set of registry operations.
//!
//! Calling `sync` repeatedly with the same list is free: unchanged entities
//! never reach the registry, so timers are not re-armed.
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//! - **Toggleable**: true
//!
//! ## Changelog
//! - 1.1.0: Enable switch and immediate notifications
//! - 1.0.0: Initial release

use crate::features::reminders::job::{JobSpec, ReminderKind};
use crate::features::reminders::notification::{DeliverySink, Notification, NotificationPayload};
use crate::features::reminders::registry::{JobRegistry, ReminderRegistry};
use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Current state of one task or meeting as seen by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderEntity {
    pub id: String,
    pub title: String,
    /// Due date for tasks, start time for meetings. `None` means no reminder.
    pub due_at: Option<DateTime<Utc>>,
}

impl ReminderEntity {
    pub fn new(id: impl Into<String>, title: impl Into<String>, due_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            due_at,
        }
    }
}

/// What a single `sync` call changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "+{} ~{} -{} ={}",
            self.added, self.updated, self.removed, self.unchanged
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SyncedEntry {
    due_at: DateTime<Utc>,
    lead_time: chrono::Duration,
    title: String,
}

pub struct ReminderScheduler<R: JobRegistry = ReminderRegistry> {
    registry: Arc<R>,
    sink: Arc<dyn DeliverySink>,
    /// Last synced values per kind; the per-kind entry lock serializes syncs of a kind
    shadow: DashMap<ReminderKind, HashMap<String, SyncedEntry>>,
    enabled: AtomicBool,
}

impl<R: JobRegistry> ReminderScheduler<R> {
    pub fn new(registry: Arc<R>, sink: Arc<dyn DeliverySink>) -> Self {
        Self {
            registry,
            sink,
            shadow: DashMap::new(),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn registry(&self) -> &Arc<R> {
        &self.registry
    }

    /// Reconcile the reminders of `kind` against the current entity list
    pub fn sync(
        &self,
        kind: ReminderKind,
        entities: &[ReminderEntity],
        lead_time: chrono::Duration,
    ) -> SyncReport {
        let mut report = SyncReport::default();
        let mut tracked = self.shadow.entry(kind).or_default();

        if !self.is_enabled() {
            debug!("Reminders disabled, ignoring {} sync", kind);
            return report;
        }

        let mut seen = HashSet::with_capacity(entities.len());
        for entity in entities {
            let Some(due_at) = entity.due_at else {
                continue;
            };
            // First occurrence of an id wins
            if !seen.insert(entity.id.as_str()) {
                debug!("Duplicate {} id {} in sync input", kind, entity.id);
                continue;
            }

            let desired = SyncedEntry {
                due_at,
                lead_time,
                title: entity.title.clone(),
            };
            match tracked.get(&entity.id) {
                Some(previous) if *previous == desired => {
                    report.unchanged += 1;
                    continue;
                }
                Some(_) => report.updated += 1,
                None => report.added += 1,
            }

            self.registry.upsert(JobSpec::new(
                kind,
                entity.id.clone(),
                entity.title.clone(),
                due_at,
                lead_time,
            ));
            tracked.insert(entity.id.clone(), desired);
        }

        let stale: Vec<String> = tracked
            .keys()
            .filter(|id| !seen.contains(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            self.registry.remove(kind, &id);
            tracked.remove(&id);
            report.removed += 1;
        }

        if !report.is_noop() {
            info!("Synced {} reminders: {}", kind, report);
        }
        report
    }

    /// Cancel every reminder of `kind`. On return no reminder of that kind
    /// will be delivered until the next `sync`.
    pub fn cancel_all(&self, kind: ReminderKind) {
        let Some(mut tracked) = self.shadow.get_mut(&kind) else {
            return;
        };

        let count = tracked.len();
        for (id, _) in tracked.drain() {
            self.registry.remove(kind, &id);
        }

        if count > 0 {
            info!("Canceled {} {} reminders", count, kind);
        }
    }

    pub fn cancel_all_kinds(&self) {
        for kind in ReminderKind::ALL {
            self.cancel_all(kind);
        }
    }

    /// Deliver a notification immediately, bypassing scheduling.
    ///
    /// Returns `Ok(false)` when reminders are disabled.
    pub fn fire_now(
        &self,
        kind: ReminderKind,
        id: &str,
        payload: NotificationPayload,
    ) -> Result<bool> {
        if !self.is_enabled() {
            debug!("Reminders disabled, dropping immediate {} notification {}", kind, id);
            return Ok(false);
        }

        self.sink.deliver(&Notification::new(kind, id, payload))?;
        Ok(true)
    }

    /// Turn reminders on or off. Turning them off cancels everything; the
    /// next `sync` after re-enabling schedules from scratch.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if was == enabled {
            return;
        }

        if enabled {
            info!("🔔 Reminders enabled");
        } else {
            info!("🔕 Reminders disabled");
            self.cancel_all_kinds();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Number of entities of `kind` the scheduler is tracking
    pub fn tracked_count(&self, kind: ReminderKind) -> usize {
        self.shadow.get(&kind).map(|tracked| tracked.len()).unwrap_or(0)
    }
}
