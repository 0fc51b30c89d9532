//! # Reminder Notifications
//!
//! Notification content and the delivery sink seam.
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.1.0: Added ChannelSink for handing notifications to an async consumer
//! - 1.0.0: Initial release with task/meeting templates and LogSink

use crate::features::reminders::job::{ReminderJob, ReminderKind};
use anyhow::{anyhow, Result};
use log::info;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// How insistently the notification should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Normal,
    Critical,
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Urgency::Low => write!(f, "low"),
            Urgency::Normal => write!(f, "normal"),
            Urgency::Critical => write!(f, "critical"),
        }
    }
}

/// Content of a notification, independent of the entity it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub urgency: Urgency,
    /// Route to open when the notification is clicked
    #[serde(default)]
    pub url: Option<String>,
}

impl NotificationPayload {
    pub fn new(title: impl Into<String>, body: impl Into<String>, urgency: Urgency) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            urgency,
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// "Task Reminder: <title> is due soon!"
    pub fn task_reminder(task_title: &str) -> Self {
        Self::new(
            "Task Reminder",
            format!("{} is due soon!", task_title),
            Urgency::Critical,
        )
        .with_url("/my-tasks")
    }

    /// "Meeting Starting Soon: <title> starts in N minutes"
    pub fn meeting_reminder(meeting_title: &str, minutes_until: i64) -> Self {
        Self::new(
            "Meeting Starting Soon",
            format!("{} starts in {} minutes", meeting_title, minutes_until),
            Urgency::Critical,
        )
        .with_url("/calendar")
    }

    /// Template for a scheduled job firing at its lead time
    pub fn for_job(job: &ReminderJob) -> Self {
        match job.kind {
            ReminderKind::Task => Self::task_reminder(&job.title),
            ReminderKind::Meeting => Self::meeting_reminder(&job.title, job.lead_time.num_minutes()),
        }
    }
}

/// A notification addressed to one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: ReminderKind,
    pub id: String,
    pub title: String,
    pub body: String,
    pub urgency: Urgency,
    #[serde(default)]
    pub url: Option<String>,
}

impl Notification {
    pub fn new(kind: ReminderKind, id: impl Into<String>, payload: NotificationPayload) -> Self {
        Self {
            kind,
            id: id.into(),
            title: payload.title,
            body: payload.body,
            urgency: payload.urgency,
            url: payload.url,
        }
    }

    pub fn for_job(job: &ReminderJob) -> Self {
        Self::new(job.kind, job.id.clone(), NotificationPayload::for_job(job))
    }
}

/// Fire-and-forget notification emitter.
///
/// Implementations must return promptly and must not call back into the
/// reminder registry: the registry holds the job's entry lock while delivering.
pub trait DeliverySink: Send + Sync {
    fn deliver(&self, notification: &Notification) -> Result<()>;
}

/// Sink that writes notifications to the log
#[derive(Debug, Default, Clone)]
pub struct LogSink;

impl DeliverySink for LogSink {
    fn deliver(&self, notification: &Notification) -> Result<()> {
        info!(
            "🔔 [{}] {} - {} ({} {})",
            notification.urgency,
            notification.title,
            notification.body,
            notification.kind,
            notification.id
        );
        Ok(())
    }
}

/// Sink that queues notifications for an async consumer (desktop bridge, IPC, ...)
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl DeliverySink for ChannelSink {
    fn deliver(&self, notification: &Notification) -> Result<()> {
        self.sender
            .send(notification.clone())
            .map_err(|_| anyhow!("Notification consumer is gone"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::reminders::job::JobSpec;
    use chrono::Utc;

    fn job(kind: ReminderKind, title: &str, lead_minutes: i64) -> ReminderJob {
        let spec = JobSpec::new(
            kind,
            "X1",
            title,
            Utc::now(),
            chrono::Duration::minutes(lead_minutes),
        );
        ReminderJob::scheduled(spec, 1)
    }

    #[test]
    fn test_task_template() {
        let n = Notification::for_job(&job(ReminderKind::Task, "Quarterly report", 15));

        assert_eq!(n.kind, ReminderKind::Task);
        assert_eq!(n.id, "X1");
        assert_eq!(n.title, "Task Reminder");
        assert_eq!(n.body, "Quarterly report is due soon!");
        assert_eq!(n.urgency, Urgency::Critical);
        assert_eq!(n.url.as_deref(), Some("/my-tasks"));
    }

    #[test]
    fn test_meeting_template_uses_lead_time() {
        let n = Notification::for_job(&job(ReminderKind::Meeting, "Standup", 10));

        assert_eq!(n.title, "Meeting Starting Soon");
        assert_eq!(n.body, "Standup starts in 10 minutes");
        assert_eq!(n.url.as_deref(), Some("/calendar"));
    }

    #[test]
    fn test_channel_sink_reports_closed_consumer() {
        let (sink, receiver) = ChannelSink::new();
        let n = Notification::new(
            ReminderKind::Task,
            "T1",
            NotificationPayload::new("Hi", "there", Urgency::Low),
        );

        assert!(sink.deliver(&n).is_ok());
        drop(receiver);
        assert!(sink.deliver(&n).is_err());
    }

    #[test]
    fn test_log_sink_accepts_every_notification() {
        let sink: Box<dyn DeliverySink> = Box::new(LogSink);

        assert!(sink
            .deliver(&Notification::for_job(&job(ReminderKind::Task, "Report", 15)))
            .is_ok());
        assert!(sink
            .deliver(&Notification::new(
                ReminderKind::Meeting,
                "M1",
                NotificationPayload::new("Ping", "no url", Urgency::Low),
            ))
            .is_ok());
    }

    #[test]
    fn test_urgency_serializes_lowercase() {
        let json = serde_json::to_string(&Urgency::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }
}
