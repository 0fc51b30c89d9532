//! # Reminder Jobs
//!
//! Job identity, desired-state specs, and registry snapshots.
//!
//! - **Version**: 1.0.0
//! - **Since**: 1.0.0

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of time-bound entity a reminder belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderKind {
    /// Task with a due date
    Task,
    /// Meeting with a start time
    Meeting,
}

impl ReminderKind {
    pub const ALL: [ReminderKind; 2] = [ReminderKind::Task, ReminderKind::Meeting];
}

impl std::fmt::Display for ReminderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReminderKind::Task => write!(f, "task"),
            ReminderKind::Meeting => write!(f, "meeting"),
        }
    }
}

impl std::str::FromStr for ReminderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "task" => Ok(ReminderKind::Task),
            "meeting" => Ok(ReminderKind::Meeting),
            _ => Err(anyhow::anyhow!("Invalid reminder kind: {}", s)),
        }
    }
}

/// Lifecycle state of a reminder job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Timer armed, waiting for fire time
    Scheduled,
    /// Reminder delivered (terminal)
    Fired,
    /// Reminder withdrawn before firing (terminal)
    Canceled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Scheduled)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Scheduled => write!(f, "scheduled"),
            JobState::Fired => write!(f, "fired"),
            JobState::Canceled => write!(f, "canceled"),
        }
    }
}

/// Registry key: at most one live job per (kind, id)
pub type JobKey = (ReminderKind, String);

/// Desired state for one entity, supplied by callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub kind: ReminderKind,
    pub id: String,
    pub title: String,
    pub due_at: DateTime<Utc>,
    pub lead_time: chrono::Duration,
}

impl JobSpec {
    pub fn new(
        kind: ReminderKind,
        id: impl Into<String>,
        title: impl Into<String>,
        due_at: DateTime<Utc>,
        lead_time: chrono::Duration,
    ) -> Self {
        Self {
            kind,
            id: id.into(),
            title: title.into(),
            due_at,
            lead_time,
        }
    }

    /// When the reminder should fire (`due_at - lead_time`)
    pub fn fire_at(&self) -> DateTime<Utc> {
        self.due_at
            .checked_sub_signed(self.lead_time)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn key(&self) -> JobKey {
        (self.kind, self.id.clone())
    }
}

/// Point-in-time copy of a job owned by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderJob {
    pub kind: ReminderKind,
    pub id: String,
    pub title: String,
    pub due_at: DateTime<Utc>,
    pub lead_time: chrono::Duration,
    pub fire_at: DateTime<Utc>,
    pub state: JobState,
    /// Arming sequence number; a timer only fires the job it was armed for
    pub generation: u64,
}

impl ReminderJob {
    pub(crate) fn scheduled(spec: JobSpec, generation: u64) -> Self {
        let fire_at = spec.fire_at();
        Self {
            kind: spec.kind,
            id: spec.id,
            title: spec.title,
            due_at: spec.due_at,
            lead_time: spec.lead_time,
            fire_at,
            state: JobState::Scheduled,
            generation,
        }
    }
}
