//! Admission orchestration.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use super::actor::{ActorContext, ActorId, Scope};
use super::clock::{Clock, SystemClock};
use super::denylist::DenylistTracker;
use super::kind::RequestKind;
use super::rules::Rule;
use crate::config::WardenConfig;
use crate::error::{Result, WardenError};
use crate::metrics::{DenyRecorder, NoopRecorder};
use crate::store::{DenylistSink, NullSink};

/// Why a request was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// The actor is on the denylist; no rule was evaluated
    Denylisted,
    /// A rule had no capacity left for the request
    RateLimited {
        /// Name of the rule that denied the request
        rule: String,
        /// Scope of that rule
        scope: Scope,
    },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Denylisted => f.write_str("denylisted"),
            DenyReason::RateLimited { rule, scope } => {
                write!(f, "rate limited by {} rule '{}'", scope, rule)
            }
        }
    }
}

/// The outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed
    Allowed,
    /// The request must be dropped
    Denied(DenyReason),
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    /// Name of the rule that denied the request, if a rule did.
    pub fn violated_rule(&self) -> Option<&str> {
        match self {
            Decision::Denied(DenyReason::RateLimited { rule, .. }) => Some(rule),
            _ => None,
        }
    }
}

/// Decides whether requests may proceed.
///
/// Holds the rules in priority order, the exempt actors, and the optional
/// denylist tracker. It is `Send + Sync` and is meant to be built once and
/// shared behind an `Arc`. Different actors never contend on a common lock.
pub struct Limiter {
    rules: Vec<Rule>,
    exempt: HashSet<ActorId>,
    denylist: Option<DenylistTracker>,
    clock: Arc<dyn Clock>,
    recorder: Arc<dyn DenyRecorder>,
}

impl Limiter {
    /// Start building a limiter.
    pub fn builder() -> LimiterBuilder {
        LimiterBuilder::new()
    }

    /// Check a request of weight 1.
    pub fn check_one(&self, ctx: &ActorContext, kind: &RequestKind) -> Decision {
        self.check(ctx, kind, 1)
    }

    /// Check a request of the given weight.
    ///
    /// Exempt users are always allowed. Denylisted users are denied without
    /// evaluating any rule. Otherwise each matching rule is charged in order;
    /// the first one without capacity denies the request and later rules are
    /// left untouched. A denial by a user-scoped rule counts as a violation
    /// towards the denylist.
    pub fn check(&self, ctx: &ActorContext, kind: &RequestKind, weight: u64) -> Decision {
        if self.exempt.contains(&ctx.user) {
            trace!(user = %ctx.user, kind = %kind, "Exempt actor, skipping checks");
            return Decision::Allowed;
        }

        if let Some(denylist) = &self.denylist {
            if denylist.is_denied(ctx.user) {
                trace!(user = %ctx.user, kind = %kind, "Denylisted actor");
                self.recorder.record_deny(kind);
                return Decision::Denied(DenyReason::Denylisted);
            }
        }

        let now = self.clock.now();
        for rule in &self.rules {
            if !rule.matches(kind) {
                continue;
            }
            let Some(key) = rule.scope().key_for(ctx) else {
                continue;
            };
            if rule.evaluate(key, weight, now) {
                continue;
            }

            if rule.scope() == Scope::User {
                if let Some(denylist) = &self.denylist {
                    denylist.record_violation(ctx.user);
                }
            }

            debug!(
                rule = rule.name(),
                key = %key,
                kind = %kind,
                weight = weight,
                "Rate limit exceeded"
            );
            self.recorder.record_deny(kind);
            return Decision::Denied(DenyReason::RateLimited {
                rule: rule.name().to_string(),
                scope: rule.scope(),
            });
        }

        Decision::Allowed
    }

    /// Reset every rule's counter for `id` and lift any denial.
    ///
    /// Safe to call while checks are in flight; a concurrent check may see
    /// the state from before or after the lift. Returns whether `id` was
    /// denylisted.
    pub fn lift_limit_and_denial(&self, id: ActorId) -> bool {
        let reset = self.rules.iter().filter(|r| r.lift_limit(id)).count();
        let was_denied = self
            .denylist
            .as_ref()
            .map(|d| d.lift_denial(id))
            .unwrap_or(false);

        info!(
            id = %id,
            counters_reset = reset,
            was_denied = was_denied,
            "Lifted limits"
        );
        was_denied
    }

    /// Drop counters whose window has elapsed across all rules.
    pub fn purge_idle(&self) -> usize {
        let now = self.clock.now();
        let purged: usize = self.rules.iter().map(|r| r.purge_expired(now)).sum();
        if purged > 0 {
            debug!(purged = purged, "Purged idle counters");
        }
        purged
    }

    /// Whether `id` bypasses all checks.
    pub fn is_exempt(&self, id: ActorId) -> bool {
        self.exempt.contains(&id)
    }

    /// Whether `id` is denylisted. Always `false` when denylisting is off.
    pub fn is_denied(&self, id: ActorId) -> bool {
        self.denylist
            .as_ref()
            .map(|d| d.is_denied(id))
            .unwrap_or(false)
    }

    /// The denylist tracker, or `None` if automatic denylisting is disabled.
    pub fn denylist(&self) -> Option<&DenylistTracker> {
        self.denylist.as_ref()
    }

    /// The rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Look up a rule by name.
    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name() == name)
    }
}

/// Purge idle counters every `every` until the task is aborted.
///
/// Must be called from within a tokio runtime.
pub fn spawn_purger(limiter: Arc<Limiter>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            limiter.purge_idle();
        }
    })
}

impl fmt::Debug for Limiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("rules", &self.rules)
            .field("exempt", &self.exempt)
            .field("denylist", &self.denylist)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Limiter`].
///
/// Rules are evaluated in the order they are added, so add the strictest
/// and narrowest first.
pub struct LimiterBuilder {
    rules: Vec<Rule>,
    exempt: HashSet<ActorId>,
    denylist_threshold: Option<u32>,
    sink: Arc<dyn DenylistSink>,
    clock: Arc<dyn Clock>,
    recorder: Arc<dyn DenyRecorder>,
}

impl LimiterBuilder {
    /// A builder with no rules, no exemptions and denylisting disabled.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            exempt: HashSet::new(),
            denylist_threshold: None,
            sink: Arc::new(NullSink),
            clock: Arc::new(SystemClock),
            recorder: Arc::new(NoopRecorder),
        }
    }

    /// A builder populated from configuration.
    pub fn from_config(config: &WardenConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = Self::new().exempt(config.exempt_ids.iter().copied().map(ActorId));
        for rule in &config.rules {
            builder = builder.rule(rule.build()?);
        }
        if config.auto_denylist {
            builder = builder.denylist(config.denylist_threshold);
        }
        Ok(builder)
    }

    /// Append a rule; it is evaluated after every rule added before it.
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Add actors that bypass every check.
    pub fn exempt<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = ActorId>,
    {
        self.exempt.extend(ids);
        self
    }

    /// Enable automatic denylisting after `threshold` user-scoped violations.
    pub fn denylist(mut self, threshold: u32) -> Self {
        self.denylist_threshold = Some(threshold);
        self
    }

    /// Report denylist promotions and lifts to `sink`.
    pub fn denylist_sink(mut self, sink: Arc<dyn DenylistSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Read time from `clock` instead of the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Report deny decisions to `recorder`.
    pub fn recorder(mut self, recorder: Arc<dyn DenyRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Build the limiter.
    pub fn build(self) -> Result<Limiter> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.name()) {
                return Err(WardenError::invalid_rule(rule.name(), "duplicate rule name"));
            }
        }
        if self.denylist_threshold == Some(0) {
            return Err(WardenError::Config(
                "denylist threshold must be positive".to_string(),
            ));
        }

        let denylist = self
            .denylist_threshold
            .map(|threshold| DenylistTracker::with_sink(threshold, self.sink));

        info!(
            rules = self.rules.len(),
            exempt = self.exempt.len(),
            denylist = denylist.is_some(),
            "Limiter initialized"
        );

        Ok(Limiter {
            rules: self.rules,
            exempt: self.exempt,
            denylist,
            clock: self.clock,
            recorder: self.recorder,
        })
    }
}

impl Default for LimiterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
