//! # Agenda File
//!
//! YAML description of the tasks and meetings the daemon schedules reminders for.
//!
//! ```yaml
//! tasks:
//!   - id: T1
//!     title: Quarterly report
//!     due_date: 2026-03-02T17:00:00Z
//! meetings:
//!   - id: M1
//!     title: Standup
//!     start_time: 2026-03-02T09:30:00Z
//! ```
//!
//! - **Version**: 1.0.0
//! - **Since**: 1.0.0

use crate::features::reminders::job::ReminderKind;
use crate::features::reminders::scheduler::ReminderEntity;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Agenda {
    #[serde(default)]
    pub tasks: Vec<AgendaTask>,
    #[serde(default)]
    pub meetings: Vec<AgendaMeeting>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AgendaTask {
    pub id: String,
    pub title: String,
    /// Tasks without a due date get no reminder
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AgendaMeeting {
    pub id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
}

impl Agenda {
    /// Load and validate an agenda from a YAML file
    pub fn load(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        // An empty file is an empty agenda
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        let agenda: Agenda = serde_yaml::from_str(contents)?;
        agenda.validate()?;
        Ok(agenda)
    }

    /// Reject empty or duplicate ids within a kind
    pub fn validate(&self) -> Result<()> {
        check_ids(ReminderKind::Task, self.tasks.iter().map(|t| t.id.as_str()))?;
        check_ids(ReminderKind::Meeting, self.meetings.iter().map(|m| m.id.as_str()))?;
        Ok(())
    }

    /// Entities of one kind, ready for `ReminderScheduler::sync`
    pub fn entities(&self, kind: ReminderKind) -> Vec<ReminderEntity> {
        match kind {
            ReminderKind::Task => self
                .tasks
                .iter()
                .map(|t| ReminderEntity::new(t.id.clone(), t.title.clone(), t.due_date))
                .collect(),
            ReminderKind::Meeting => self
                .meetings
                .iter()
                .map(|m| ReminderEntity::new(m.id.clone(), m.title.clone(), Some(m.start_time)))
                .collect(),
        }
    }
}

fn check_ids<'a>(kind: ReminderKind, ids: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(anyhow::anyhow!("Agenda contains a {} with an empty id", kind));
        }
        if !seen.insert(id) {
            return Err(anyhow::anyhow!("Duplicate {} id in agenda: {}", kind, id));
        }
    }
    Ok(())
}
