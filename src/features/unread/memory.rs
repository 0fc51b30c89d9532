//! # In-Process Collaborators
//!
//! Event source and snapshot store living entirely in memory. Used to embed
//! the unread counters in a single process and to drive them in tests,
//! including injected failures and a gate that holds snapshot reads open.
//!
//! - **Version**: 1.0.0
//! - **Since**: 1.0.0

use crate::features::unread::events::{ChangeEvent, EventFilter, EventSource, SnapshotStore, Subscription};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

struct Subscriber {
    filter: EventFilter,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Fan-out event source
#[derive(Default)]
pub struct MemoryEventSource {
    subscribers: Arc<DashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    fail_subscribes: AtomicU32,
}

impl MemoryEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every subscriber of `scope` whose filter accepts its
    /// type. Returns the number of subscribers reached.
    pub fn publish(&self, scope: &str, event: ChangeEvent) -> usize {
        self.subscribers
            .iter()
            .filter(|sub| {
                sub.filter.scope == scope && sub.filter.event_types.contains(&event.event_type)
            })
            .filter(|sub| sub.sender.send(event.clone()).is_ok())
            .count()
    }

    /// Drop every subscription from the source side, as a lost connection would
    pub fn disconnect_all(&self) {
        let count = self.subscribers.len();
        self.subscribers.clear();
        debug!("Disconnected {} subscribers", count);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Make the next `n` subscribe calls fail
    pub fn fail_next_subscribes(&self, n: u32) {
        self.fail_subscribes.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    async fn subscribe(&self, filter: &EventFilter) -> Result<Subscription> {
        if take_failure(&self.fail_subscribes) {
            return Err(anyhow!("Event source unavailable"));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.insert(
            id,
            Subscriber {
                filter: filter.clone(),
                sender,
            },
        );
        debug!("Subscriber {} joined '{}'", id, filter.scope);

        let subscribers = self.subscribers.clone();
        Ok(Subscription::new(receiver).with_close_hook(move || {
            subscribers.remove(&id);
        }))
    }
}

/// Snapshot store over per-scope count maps
pub struct MemorySnapshotStore {
    counts: DashMap<String, HashMap<String, u64>>,
    fail_reads: AtomicU32,
    reads: AtomicUsize,
    gate: Option<Semaphore>,
}

impl Default for MemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self {
            counts: DashMap::new(),
            fail_reads: AtomicU32::new(0),
            reads: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// Store whose reads block until [`MemorySnapshotStore::release`]
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    /// Let blocked and future reads through
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.close();
        }
    }

    pub fn set_counts(&self, scope: &str, counts: HashMap<String, u64>) {
        self.counts.insert(scope.to_string(), counts);
    }

    /// Make the next `n` reads fail
    pub fn fail_next_reads(&self, n: u32) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }

    /// Reads attempted so far, failed ones included
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn read_counts(&self, scope: &str) -> Result<HashMap<String, u64>> {
        if let Some(gate) = &self.gate {
            // A closed gate is an open door
            let _ = gate.acquire().await;
        }

        self.reads.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.fail_reads) {
            return Err(anyhow!("Snapshot store unavailable"));
        }

        Ok(self
            .counts
            .get(scope)
            .map(|counts| counts.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::unread::events::EventType;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_matching_subscribers() {
        let source = MemoryEventSource::new();
        let mut messages = source.subscribe(&EventFilter::inserts("messages")).await.unwrap();
        let mut other = source.subscribe(&EventFilter::inserts("notifications")).await.unwrap();

        assert_eq!(source.publish("messages", ChangeEvent::insert("c1", json!({}))), 1);
        assert_eq!(source.publish("messages", ChangeEvent::update("c1", json!({}))), 0);

        let event = messages.recv().await.unwrap();
        assert_eq!(event.key, "c1");
        assert_eq!(event.event_type, EventType::Insert);

        other.close();
        assert!(other.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_and_disconnect() {
        let source = MemoryEventSource::new();
        let first = source.subscribe(&EventFilter::inserts("messages")).await.unwrap();
        let mut second = source.subscribe(&EventFilter::inserts("messages")).await.unwrap();
        assert_eq!(source.subscriber_count(), 2);

        drop(first);
        assert_eq!(source.subscriber_count(), 1);

        source.disconnect_all();
        assert_eq!(source.subscriber_count(), 0);
        assert!(second.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let source = MemoryEventSource::new();
        source.fail_next_subscribes(1);
        assert!(source.subscribe(&EventFilter::inserts("m")).await.is_err());
        assert!(source.subscribe(&EventFilter::inserts("m")).await.is_ok());

        let store = MemorySnapshotStore::new();
        store.set_counts("m", HashMap::from([("a".to_string(), 2)]));
        store.fail_next_reads(1);
        assert!(store.read_counts("m").await.is_err());
        assert_eq!(store.read_counts("m").await.unwrap()["a"], 2);
        assert!(store.read_counts("unknown").await.unwrap().is_empty());
        assert_eq!(store.read_count(), 3);
    }

    #[tokio::test]
    async fn test_gate_holds_reads() {
        let store = Arc::new(MemorySnapshotStore::gated());
        let reader = {
            let store = store.clone();
            tokio::spawn(async move { store.read_counts("m").await })
        };

        tokio::task::yield_now().await;
        assert!(!reader.is_finished());
        assert_eq!(store.read_count(), 0);

        store.release();
        assert!(reader.await.unwrap().unwrap().is_empty());
    }
}
