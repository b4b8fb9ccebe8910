//! Boundary to the durable denylist.
//!
//! The limiter never performs persistence itself. The denylist tracker emits
//! [`DenylistEvent`]s through a synchronous, non-blocking [`DenylistSink`];
//! whoever owns the durable store drains them asynchronously into a
//! [`DenylistStore`].

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ratelimit::ActorId;

pub use memory::MemoryDenylistStore;

/// A change in denylist membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DenylistEvent {
    /// An actor reached the violation threshold
    Denied {
        /// The denied actor
        id: ActorId,
        /// Violations recorded at promotion time
        violations: u32,
        /// When the promotion happened
        at: DateTime<Utc>,
    },
    /// A standing denial was lifted
    Lifted {
        /// The actor whose denial was lifted
        id: ActorId,
        /// When the lift happened
        at: DateTime<Utc>,
    },
}

/// Receives denylist events on the admission path.
///
/// Implementations must return promptly and never block. The tracker holds
/// the actor's entry while notifying, so a sink must not call back into it.
pub trait DenylistSink: Send + Sync {
    /// Deliver one event.
    fn notify(&self, event: DenylistEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DenylistSink for NullSink {
    fn notify(&self, _event: DenylistEvent) {}
}

/// Forwards events over an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<DenylistEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DenylistEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DenylistSink for ChannelSink {
    fn notify(&self, event: DenylistEvent) {
        if let Err(e) = self.tx.send(event) {
            warn!(event = ?e.0, "Denylist event dropped, receiver is gone");
        }
    }
}

/// A persisted denylist entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenylistRecord {
    /// The denied actor
    pub id: ActorId,
    /// Violations recorded when the actor was denied
    pub violations: u32,
    /// When the actor was denied
    pub denied_at: DateTime<Utc>,
}

/// Errors raised by a denylist store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached
    #[error("Denylist store unavailable: {0}")]
    Unavailable(String),
}

/// Durable create / lookup / delete of denylist records.
#[async_trait]
pub trait DenylistStore: Send + Sync {
    /// Persist a record, replacing any existing one for the same id.
    async fn create(&self, record: DenylistRecord) -> Result<(), StoreError>;

    /// Look up the record for `id`.
    async fn lookup(&self, id: ActorId) -> Result<Option<DenylistRecord>, StoreError>;

    /// Delete the record for `id`, returning whether one existed.
    async fn delete(&self, id: ActorId) -> Result<bool, StoreError>;

    /// Load every record.
    async fn list(&self) -> Result<Vec<DenylistRecord>, StoreError>;
}

/// Apply one event to `store`.
pub async fn apply_event<S>(store: &S, event: DenylistEvent) -> Result<(), StoreError>
where
    S: DenylistStore + ?Sized,
{
    match event {
        DenylistEvent::Denied { id, violations, at } => {
            store
                .create(DenylistRecord {
                    id,
                    violations,
                    denied_at: at,
                })
                .await
        }
        DenylistEvent::Lifted { id, .. } => store.delete(id).await.map(|_| ()),
    }
}

/// Drain `rx` into `store` until every sender is dropped.
///
/// Store failures are logged and the event is skipped; they never reach the
/// admission path. Returns the number of events applied.
pub async fn forward_events<S>(mut rx: mpsc::UnboundedReceiver<DenylistEvent>, store: &S) -> usize
where
    S: DenylistStore + ?Sized,
{
    let mut applied = 0;
    while let Some(event) = rx.recv().await {
        debug!(event = ?event, "Persisting denylist event");
        match apply_event(store, event).await {
            Ok(()) => applied += 1,
            Err(e) => warn!(error = %e, "Failed to persist denylist event"),
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denied(id: u64) -> DenylistEvent {
        DenylistEvent::Denied {
            id: ActorId(id),
            violations: 10,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_forward_events_applies_until_closed() {
        let (sink, rx) = ChannelSink::channel();
        let store = MemoryDenylistStore::new();

        sink.notify(denied(1));
        sink.notify(denied(2));
        sink.notify(DenylistEvent::Lifted {
            id: ActorId(1),
            at: Utc::now(),
        });
        drop(sink);

        let applied = forward_events(rx, &store).await;
        assert_eq!(applied, 3);
        assert!(store.lookup(ActorId(1)).await.unwrap().is_none());
        assert_eq!(store.lookup(ActorId(2)).await.unwrap().unwrap().violations, 10);
    }

    #[tokio::test]
    async fn test_channel_sink_without_receiver_does_not_panic() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        sink.notify(denied(3));
    }

    /// Fails every write for one actor.
    struct FailingStore {
        inner: MemoryDenylistStore,
        broken: ActorId,
    }

    #[async_trait]
    impl DenylistStore for FailingStore {
        async fn create(&self, record: DenylistRecord) -> Result<(), StoreError> {
            if record.id == self.broken {
                return Err(StoreError::Unavailable("connection refused".to_string()));
            }
            self.inner.create(record).await
        }

        async fn lookup(&self, id: ActorId) -> Result<Option<DenylistRecord>, StoreError> {
            self.inner.lookup(id).await
        }

        async fn delete(&self, id: ActorId) -> Result<bool, StoreError> {
            self.inner.delete(id).await
        }

        async fn list(&self) -> Result<Vec<DenylistRecord>, StoreError> {
            self.inner.list().await
        }
    }

    #[tokio::test]
    async fn test_forward_events_skips_failed_writes() {
        let (sink, rx) = ChannelSink::channel();
        let store = FailingStore {
            inner: MemoryDenylistStore::new(),
            broken: ActorId(13),
        };

        sink.notify(denied(12));
        sink.notify(denied(13));
        sink.notify(denied(14));
        drop(sink);

        let applied = forward_events(rx, &store).await;
        assert_eq!(applied, 2);
        let ids: Vec<_> = store.list().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![ActorId(12), ActorId(14)]);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = DenylistEvent::Lifted {
            id: ActorId(4),
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "lifted");
        assert_eq!(json["id"], 4);
    }
}
