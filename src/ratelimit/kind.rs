//! Hierarchical request kinds and rule matching.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The kind of request being admitted, as a dotted path.
///
/// Kinds form a hierarchy by segment prefix: `command.music.skip` is a
/// `command.music`, which is a `command`. A rule declared against a broad
/// kind therefore applies to every more specific kind below it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestKind(String);

impl RequestKind {
    /// Create a kind from its dotted path.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The full dotted path.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments, outermost first.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Whether every segment is non-empty.
    pub fn is_well_formed(&self) -> bool {
        self.segments().all(|s| !s.is_empty())
    }

    /// Whether `self` is `ancestor` or a specialisation of it.
    pub fn is_a(&self, ancestor: &RequestKind) -> bool {
        let mut mine = self.segments();
        ancestor
            .segments()
            .all(|segment| mine.next() == Some(segment))
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestKind {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Decides which request kinds a rule applies to.
#[derive(Clone)]
pub enum KindMatcher {
    /// Matches any kind that is one of the declared kinds or specialises one
    Kinds(Vec<RequestKind>),
    /// Matches whatever the predicate accepts
    Predicate(Arc<dyn Fn(&RequestKind) -> bool + Send + Sync>),
}

impl KindMatcher {
    /// Matcher over a declared set of kinds.
    pub fn kinds<I, K>(kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<RequestKind>,
    {
        KindMatcher::Kinds(kinds.into_iter().map(Into::into).collect())
    }

    /// Matcher backed by a predicate.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&RequestKind) -> bool + Send + Sync + 'static,
    {
        KindMatcher::Predicate(Arc::new(f))
    }

    /// Whether `kind` falls under this matcher.
    pub fn matches(&self, kind: &RequestKind) -> bool {
        match self {
            KindMatcher::Kinds(kinds) => kinds.iter().any(|k| kind.is_a(k)),
            KindMatcher::Predicate(f) => f(kind),
        }
    }
}

impl fmt::Debug for KindMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KindMatcher::Kinds(kinds) => f.debug_tuple("Kinds").field(kinds).finish(),
            KindMatcher::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}
