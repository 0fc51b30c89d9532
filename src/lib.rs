// Core layer - clock, configuration, retry policy
pub mod core;

// Features layer - reminders and unread counters
pub mod features;

// Re-export core config for convenience
pub use crate::core::Config;

pub use features::{
    // Reminders
    Agenda, DeliverySink, Notification, ReminderKind, ReminderRegistry, ReminderScheduler,
    // Unread counters
    CounterAggregator, ReconciliationCoordinator,
};
