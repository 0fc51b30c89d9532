//! # Reminders Feature
//!
//! One-shot notifications ahead of task due dates and meeting start times.
//! Callers describe the current entity set; the scheduler keeps exactly one
//! armed reminder per entity and the registry delivers it once.
//!
//! - **Version**: 2.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: true
//!
//! ## Changelog
//! - 2.0.0: Reconciling scheduler over a keyed timer registry, agenda files
//! - 1.0.0: Initial release

pub mod agenda;
pub mod job;
pub mod notification;
pub mod registry;
pub mod scheduler;

pub use agenda::{Agenda, AgendaMeeting, AgendaTask};
pub use job::{JobKey, JobSpec, JobState, ReminderJob, ReminderKind};
pub use notification::{
    ChannelSink, DeliverySink, LogSink, Notification, NotificationPayload, Urgency,
};
pub use registry::{JobRegistry, ReminderRegistry};
pub use scheduler::{ReminderEntity, ReminderScheduler, SyncReport};
