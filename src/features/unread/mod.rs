//! # Unread Counters Feature
//!
//! Live per-recipient unread counts, seeded from a snapshot and kept current
//! from a stream of change events. Mark-read resets never race with events.
//!
//! - **Version**: 1.0.0
//! - **Since**: 1.0.0
//! - **Toggleable**: false

pub mod aggregator;
pub mod coordinator;
pub mod events;
pub mod memory;

pub use aggregator::CounterAggregator;
pub use coordinator::{
    CoordinatorSettings, CoordinatorState, CoordinatorStatus, ReconciliationCoordinator,
};
pub use events::{ChangeEvent, EventFilter, EventSource, EventType, SnapshotStore, Subscription};
pub use memory::{MemoryEventSource, MemorySnapshotStore};
