//! # Features Layer
//!
//! Feature modules and the feature registry logged at startup.
//!
//! - **Version**: 1.0.0
//! - **Since**: 1.0.0

pub mod reminders;
pub mod unread;

pub use reminders::{
    Agenda, ChannelSink, DeliverySink, LogSink, Notification, NotificationPayload, ReminderEntity,
    ReminderKind, ReminderRegistry, ReminderScheduler, Urgency,
};
pub use unread::{
    CounterAggregator, CoordinatorSettings, CoordinatorStatus, EventFilter, EventSource,
    ReconciliationCoordinator, SnapshotStore,
};

/// Registry entry describing one feature module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub version: &'static str,
    pub toggleable: bool,
}

/// All feature modules with their versions
pub fn get_features() -> Vec<FeatureInfo> {
    vec![
        FeatureInfo {
            id: "reminders",
            name: "Reminders",
            version: "2.0.0",
            toggleable: true,
        },
        FeatureInfo {
            id: "unread",
            name: "Unread Counters",
            version: "1.0.0",
            toggleable: false,
        },
    ]
}

/// Crate version from Cargo.toml
pub fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
