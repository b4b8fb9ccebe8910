//! Actor identity and the keys rules count against.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a user or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub u64);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ActorId {
    fn from(id: u64) -> Self {
        ActorId(id)
    }
}

/// Who is making a request.
///
/// `group` is absent for requests that happen outside any group, such as
/// direct messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActorContext {
    /// The requesting user
    pub user: ActorId,
    /// The group the request was made in, if any
    pub group: Option<ActorId>,
}

impl ActorContext {
    /// Context for a request made inside a group.
    pub fn new(user: impl Into<ActorId>, group: impl Into<ActorId>) -> Self {
        Self {
            user: user.into(),
            group: Some(group.into()),
        }
    }

    /// Context for a request made outside any group.
    pub fn direct(user: impl Into<ActorId>) -> Self {
        Self {
            user: user.into(),
            group: None,
        }
    }
}

/// Which field of the actor context a rule counts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// One counter per user
    User,
    /// One counter per group
    Group,
}

impl Scope {
    /// The counting key for `ctx`, or `None` if the context has no such field.
    pub fn key_for(&self, ctx: &ActorContext) -> Option<ActorId> {
        match self {
            Scope::User => Some(ctx.user),
            Scope::Group => ctx.group,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::User => f.write_str("user"),
            Scope::Group => f.write_str("group"),
        }
    }
}
