//! Automatic escalation of repeat offenders into a denylist.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tracing::{info, warn};

use super::actor::ActorId;
use crate::store::{DenylistEvent, DenylistSink, NullSink};

/// Number of violations after which an actor is denied.
pub const DEFAULT_THRESHOLD: u32 = 10;

/// Tracks rate-limit violations per actor and denies those who reach the
/// threshold.
///
/// Denials are session-local and never decay; only [`lift_denial`] clears
/// them. Promotions and lifts are reported to a [`DenylistSink`] so that an
/// external store can persist them.
///
/// [`lift_denial`]: DenylistTracker::lift_denial
pub struct DenylistTracker {
    threshold: u32,
    violations: DashMap<ActorId, u32>,
    denied: DashSet<ActorId>,
    sink: Arc<dyn DenylistSink>,
}

impl DenylistTracker {
    /// Create a tracker that does not report to any store.
    pub fn new(threshold: u32) -> Self {
        Self::with_sink(threshold, Arc::new(NullSink))
    }

    /// Create a tracker that reports promotions and lifts to `sink`.
    pub fn with_sink(threshold: u32, sink: Arc<dyn DenylistSink>) -> Self {
        Self {
            threshold: threshold.max(1),
            violations: DashMap::new(),
            denied: DashSet::new(),
            sink,
        }
    }

    /// Record one violation for `id`.
    ///
    /// Returns `true` if this call promoted `id` into the denylist. Calls
    /// after promotion change nothing.
    pub fn record_violation(&self, id: ActorId) -> bool {
        let mut entry = self.violations.entry(id).or_insert(0);
        if *entry >= self.threshold {
            return false;
        }
        *entry += 1;
        if *entry < self.threshold {
            return false;
        }

        // The entry stays locked until the sink has the event, so a lift of
        // the same id is always delivered after the promotion it undoes.
        let violations = *entry;
        self.denied.insert(id);
        warn!(
            id = %id,
            violations = violations,
            "Actor reached violation threshold, denying"
        );
        self.sink.notify(DenylistEvent::Denied {
            id,
            violations,
            at: Utc::now(),
        });
        drop(entry);
        true
    }

    /// Whether `id` is currently denied.
    pub fn is_denied(&self, id: ActorId) -> bool {
        self.denied.contains(&id)
    }

    /// Violations recorded for `id` since the last lift.
    pub fn violations(&self, id: ActorId) -> u32 {
        self.violations.get(&id).map(|v| *v).unwrap_or(0)
    }

    /// Clear both the violation count and any denial for `id`.
    ///
    /// Returns whether `id` was denied.
    pub fn lift_denial(&self, id: ActorId) -> bool {
        // A denied actor always has a violations entry; holding it orders
        // this lift after any promotion still being reported.
        let Entry::Occupied(entry) = self.violations.entry(id) else {
            return false;
        };
        let was_denied = self.denied.remove(&id).is_some();

        if was_denied {
            info!(id = %id, "Lifted denial");
            self.sink.notify(DenylistEvent::Lifted { id, at: Utc::now() });
        }
        entry.remove();
        was_denied
    }

    /// Number of currently denied actors.
    pub fn denied_count(&self) -> usize {
        self.denied.len()
    }

    /// Get the promotion threshold.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

impl std::fmt::Debug for DenylistTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenylistTracker")
            .field("threshold", &self.threshold)
            .field("tracked", &self.violations.len())
            .field("denied", &self.denied.len())
            .finish()
    }
}
