//! # Change Events
//!
//! Domain change events and the collaborator traits the unread counters
//! consume: a streaming event source and a point-read snapshot store.
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.1.0: Author exclusion so a user's own messages never count as unread
//! - 1.0.0: Initial release

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Insert,
    Update,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Insert => write!(f, "insert"),
            EventType::Update => write!(f, "update"),
        }
    }
}

/// A change to a row that may affect an unread count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Recipient key (user id or conversation id) the event counts against
    pub key: String,
    pub event_type: EventType,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ChangeEvent {
    pub fn insert(key: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            event_type: EventType::Insert,
            payload,
        }
    }

    pub fn update(key: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            event_type: EventType::Update,
            payload,
        }
    }

    /// Author of the underlying row (`sender_id` in the payload), if any
    pub fn author(&self) -> Option<String> {
        match self.payload.get("sender_id")? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Which events a subscription delivers and which of them count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    /// Table or channel the subscription is bound to
    pub scope: String,
    pub event_types: Vec<EventType>,
    /// Events authored by this id are not counted
    pub exclude_author: Option<String>,
}

impl EventFilter {
    /// Count inserts only, which is what "new message" counters want
    pub fn inserts(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            event_types: vec![EventType::Insert],
            exclude_author: None,
        }
    }

    pub fn with_event_types(mut self, event_types: Vec<EventType>) -> Self {
        self.event_types = event_types;
        self
    }

    pub fn excluding_author(mut self, author: impl Into<String>) -> Self {
        self.exclude_author = Some(author.into());
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if !self.event_types.contains(&event.event_type) {
            return false;
        }

        match (&self.exclude_author, event.author()) {
            (Some(excluded), Some(author)) => *excluded != author,
            _ => true,
        }
    }
}

/// Live stream of change events. Dropping it closes the stream.
pub struct Subscription {
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(events: mpsc::UnboundedReceiver<ChangeEvent>) -> Self {
        Self {
            events,
            on_close: None,
        }
    }

    /// Run `on_close` once when the subscription is closed or dropped
    pub fn with_close_hook(mut self, on_close: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(on_close));
        self
    }

    /// Next event; `None` means the source disconnected
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Unsubscribe. Idempotent; no event is yielded afterwards.
    pub fn close(&mut self) {
        self.events.close();
        while self.events.try_recv().is_ok() {}
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("open", &self.on_close.is_some())
            .finish()
    }
}

/// Push source of change events (realtime channel, database replication, ...)
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn subscribe(&self, filter: &EventFilter) -> Result<Subscription>;
}

/// Point-in-time read of current unread totals
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn read_counts(&self, scope: &str) -> Result<HashMap<String, u64>>;
}
