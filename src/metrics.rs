//! Deny counters.
//!
//! The limiter reports every deny decision, labelled by the request kind,
//! to a [`DenyRecorder`]. Exporting those counts is left to the embedding
//! application.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::ratelimit::RequestKind;

/// Receives one call per deny decision.
pub trait DenyRecorder: Send + Sync {
    /// Count a denied request of `kind`.
    fn record_deny(&self, kind: &RequestKind);
}

/// Discards every deny.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl DenyRecorder for NoopRecorder {
    fn record_deny(&self, _kind: &RequestKind) {}
}

/// In-memory deny counters keyed by request kind.
///
/// Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct DenyCounters {
    inner: Arc<DashMap<String, AtomicU64>>,
}

impl DenyCounters {
    /// Create an empty set of counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Denies recorded for `kind`.
    pub fn get(&self, kind: &str) -> u64 {
        self.inner
            .get(kind)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Denies recorded across all kinds.
    pub fn total(&self) -> u64 {
        self.inner.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    /// Point-in-time copy of every counter, sorted by kind.
    pub fn snapshot(&self) -> DenySnapshot {
        DenySnapshot {
            by_kind: self
                .inner
                .iter()
                .map(|c| (c.key().clone(), c.load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

impl DenyRecorder for DenyCounters {
    fn record_deny(&self, kind: &RequestKind) {
        if let Some(counter) = self.inner.get(kind.as_str()) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.inner
            .entry(kind.as_str().to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// Serializable copy of [`DenyCounters`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DenySnapshot {
    /// Deny count per request kind
    pub by_kind: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_by_kind() {
        let counters = DenyCounters::new();
        let skip = RequestKind::new("command.music.skip");

        counters.record_deny(&skip);
        counters.record_deny(&skip);
        counters.record_deny(&"playlist".into());

        assert_eq!(counters.get("command.music.skip"), 2);
        assert_eq!(counters.get("playlist"), 1);
        assert_eq!(counters.get("command"), 0);
        assert_eq!(counters.total(), 3);
    }

    #[test]
    fn test_clones_share_counters() {
        let counters = DenyCounters::new();
        let clone = counters.clone();

        clone.record_deny(&"command".into());
        assert_eq!(counters.get("command"), 1);
    }

    #[test]
    fn test_snapshot_sorted() {
        let counters = DenyCounters::new();
        counters.record_deny(&"playlist".into());
        counters.record_deny(&"command".into());

        let keys: Vec<_> = counters.snapshot().by_kind.into_keys().collect();
        assert_eq!(keys, vec!["command".to_string(), "playlist".to_string()]);
    }
}
