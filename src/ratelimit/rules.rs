//! Admission rules and their per-key counters.
//!
//! A rule is a fixed policy (scope, capacity, window, kind matcher) plus the
//! set of counters it has handed out, one per actor key it has seen. Rules
//! are built once at startup from [`RuleConfig`] and live for the whole
//! process.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::actor::{ActorId, Scope};
use super::counter::WindowCounter;
use super::kind::{KindMatcher, RequestKind};
use crate::error::{Result, WardenError};

/// An admission policy and its counters.
#[derive(Debug)]
pub struct Rule {
    name: String,
    scope: Scope,
    capacity: u64,
    window: Duration,
    matcher: KindMatcher,
    /// Counters indexed by actor key, created on first sight
    counters: DashMap<ActorId, Arc<WindowCounter>>,
}

impl Rule {
    /// Create a rule, rejecting policies that could never be enforced.
    pub fn new(
        name: impl Into<String>,
        scope: Scope,
        capacity: u64,
        window: Duration,
        matcher: KindMatcher,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(WardenError::invalid_rule(&name, "name must not be empty"));
        }
        if capacity == 0 {
            return Err(WardenError::invalid_rule(&name, "capacity must be positive"));
        }
        if window.is_zero() {
            return Err(WardenError::invalid_rule(&name, "window must be positive"));
        }
        if let KindMatcher::Kinds(kinds) = &matcher {
            if kinds.is_empty() {
                return Err(WardenError::invalid_rule(&name, "no request kinds declared"));
            }
            if let Some(bad) = kinds.iter().find(|k| !k.is_well_formed()) {
                return Err(WardenError::invalid_rule(
                    &name,
                    format!("malformed request kind '{}'", bad),
                ));
            }
        }

        Ok(Self {
            name,
            scope,
            capacity,
            window,
            matcher,
            counters: DashMap::new(),
        })
    }

    /// Whether this rule applies to `kind`.
    pub fn matches(&self, kind: &RequestKind) -> bool {
        self.matcher.matches(kind)
    }

    /// Charge `weight` against the counter for `key`.
    ///
    /// Returns `false` if the weight does not fit in the current window, in
    /// which case nothing is charged.
    pub fn evaluate(&self, key: ActorId, weight: u64, now: Instant) -> bool {
        let counter = self.counter_for(key, now);
        let allowed = counter.try_consume(now, weight);

        trace!(
            rule = %self.name,
            key = %key,
            weight = weight,
            allowed = allowed,
            "Evaluated rule"
        );

        allowed
    }

    /// Drop the counter for `key`, giving it a fresh window on next use.
    ///
    /// Returns whether a counter existed.
    pub fn lift_limit(&self, key: ActorId) -> bool {
        self.counters.remove(&key).is_some()
    }

    /// Drop counters whose window has fully elapsed.
    ///
    /// Counters currently held by an in-flight evaluation are kept.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.counters.len();
        self.counters
            .retain(|_, counter| Arc::strong_count(counter) > 1 || !counter.is_expired(now));
        before.saturating_sub(self.counters.len())
    }

    /// Weight charged to `key` in its current window, if it has a counter.
    pub fn current_count(&self, key: ActorId, now: Instant) -> Option<u64> {
        self.counters.get(&key).map(|c| c.current_count(now))
    }

    /// Number of keys with a live counter.
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    /// Get the rule name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the rule scope.
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Get the maximum weight per window.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Get the window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Get the kind matcher.
    pub fn matcher(&self) -> &KindMatcher {
        &self.matcher
    }

    fn counter_for(&self, key: ActorId, now: Instant) -> Arc<WindowCounter> {
        if let Some(counter) = self.counters.get(&key) {
            return Arc::clone(counter.value());
        }

        // The entry API holds the shard lock across lookup and insert, so two
        // first-time callers for the same key end up sharing one counter.
        let entry = self.counters.entry(key).or_insert_with(|| {
            debug!(
                rule = %self.name,
                key = %key,
                capacity = self.capacity,
                window_ms = self.window.as_millis() as u64,
                "Creating new window counter"
            );
            Arc::new(WindowCounter::new(self.capacity, self.window, now))
        });
        Arc::clone(entry.value())
    }
}

/// A rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Rule name, used in decisions and logs
    pub name: String,
    /// Which actor field the rule counts against
    pub scope: Scope,
    /// Maximum weight allowed per window
    pub capacity: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Request kinds the rule applies to, including their specialisations
    pub kinds: Vec<RequestKind>,
}

impl RuleConfig {
    /// Create a rule configuration.
    pub fn new<I, K>(name: &str, scope: Scope, capacity: u64, window_ms: u64, kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<RequestKind>,
    {
        Self {
            name: name.to_string(),
            scope,
            capacity,
            window_ms,
            kinds: kinds.into_iter().map(Into::into).collect(),
        }
    }

    /// Build the runtime rule.
    pub fn build(&self) -> Result<Rule> {
        Rule::new(
            self.name.clone(),
            self.scope,
            self.capacity,
            Duration::from_millis(self.window_ms),
            KindMatcher::Kinds(self.kinds.clone()),
        )
    }
}

/// The built-in rule table, harsher limits first.
pub fn default_rules() -> Vec<RuleConfig> {
    vec![
        RuleConfig::new("user_shards_comm", Scope::User, 2, 30_000, ["command.info.shards"]),
        RuleConfig::new("user_skip_comm", Scope::User, 5, 20_000, ["command.music.skip"]),
        RuleConfig::new("user_all_comms", Scope::User, 5, 10_000, ["command"]),
        RuleConfig::new("group_weather_comm", Scope::Group, 30, 180_000, ["command.util.weather"]),
        RuleConfig::new("group_songs_added", Scope::Group, 1000, 120_000, ["playlist"]),
        RuleConfig::new("group_all_comms", Scope::Group, 10, 10_000, ["command"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn user_rule(capacity: u64, window_ms: u64) -> Rule {
        Rule::new(
            "test_rule",
            Scope::User,
            capacity,
            ms(window_ms),
            KindMatcher::kinds(["command"]),
        )
        .unwrap()
    }

    #[test]
    fn test_rule_rejects_zero_capacity() {
        let err = Rule::new("r", Scope::User, 0, ms(1000), KindMatcher::kinds(["command"]));
        assert!(matches!(err, Err(WardenError::InvalidRule { .. })));
    }

    #[test]
    fn test_rule_rejects_zero_window() {
        let err = Rule::new("r", Scope::User, 1, Duration::ZERO, KindMatcher::kinds(["command"]));
        assert!(matches!(err, Err(WardenError::InvalidRule { .. })));
    }

    #[test]
    fn test_rule_rejects_empty_or_malformed_kinds() {
        let empty = Rule::new("r", Scope::User, 1, ms(1000), KindMatcher::Kinds(vec![]));
        assert!(empty.is_err());

        let malformed = Rule::new("r", Scope::User, 1, ms(1000), KindMatcher::kinds(["a..b"]));
        assert!(malformed.is_err());
    }

    #[test]
    fn test_rule_rejects_blank_name() {
        let err = Rule::new("  ", Scope::User, 1, ms(1000), KindMatcher::kinds(["command"]));
        assert!(err.is_err());
    }

    #[test]
    fn test_evaluate_creates_counter_lazily() {
        let rule = user_rule(5, 10_000);
        let t0 = Instant::now();
        assert_eq!(rule.counter_count(), 0);

        assert!(rule.evaluate(ActorId(1), 1, t0));
        assert_eq!(rule.counter_count(), 1);
        assert_eq!(rule.current_count(ActorId(1), t0), Some(1));
        assert_eq!(rule.current_count(ActorId(2), t0), None);
    }

    #[test]
    fn test_keys_have_independent_counters() {
        let rule = user_rule(1, 10_000);
        let t0 = Instant::now();

        assert!(rule.evaluate(ActorId(1), 1, t0));
        assert!(!rule.evaluate(ActorId(1), 1, t0));
        assert!(rule.evaluate(ActorId(2), 1, t0));
    }

    #[test]
    fn test_lift_limit_gives_fresh_window() {
        let rule = user_rule(1, 10_000);
        let t0 = Instant::now();

        assert!(rule.evaluate(ActorId(1), 1, t0));
        assert!(!rule.evaluate(ActorId(1), 1, t0));

        assert!(rule.lift_limit(ActorId(1)));
        assert!(!rule.lift_limit(ActorId(1)));
        assert!(rule.evaluate(ActorId(1), 1, t0));
    }

    #[test]
    fn test_purge_expired_only_drops_elapsed_windows() {
        let rule = user_rule(5, 1_000);
        let t0 = Instant::now();

        rule.evaluate(ActorId(1), 1, t0);
        rule.evaluate(ActorId(2), 1, t0 + ms(600));

        assert_eq!(rule.purge_expired(t0 + ms(1_000)), 1);
        assert_eq!(rule.counter_count(), 1);
        assert_eq!(rule.current_count(ActorId(2), t0 + ms(1_000)), Some(1));
    }

    #[test]
    fn test_concurrent_first_use_shares_one_counter() {
        let rule = user_rule(10, 60_000);
        let t0 = Instant::now();

        let allowed: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| s.spawn(|| usize::from(rule.evaluate(ActorId(9), 1, t0))))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(allowed, 10);
        assert_eq!(rule.counter_count(), 1);
    }

    #[test]
    fn test_rule_config_build() {
        let config = RuleConfig::new("user_skip_comm", Scope::User, 5, 20_000, ["command.music.skip"]);
        let rule = config.build().unwrap();

        assert_eq!(rule.name(), "user_skip_comm");
        assert_eq!(rule.window(), ms(20_000));
        assert!(rule.matches(&"command.music.skip".into()));
        assert!(!rule.matches(&"command.music.play".into()));
    }

    #[test]
    fn test_parse_rule_config_yaml() {
        let yaml = r#"
name: group_weather_comm
scope: group
capacity: 30
window_ms: 180000
kinds:
  - command.util.weather
"#;
        let config: RuleConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.scope, Scope::Group);
        assert_eq!(config.kinds, vec![RequestKind::new("command.util.weather")]);
    }

    #[test]
    fn test_default_rules_are_valid() {
        let rules = default_rules();
        assert_eq!(rules.len(), 6);
        for config in &rules {
            assert!(config.build().is_ok(), "{} should build", config.name);
        }
    }
}
