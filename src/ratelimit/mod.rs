//! Rate limiting rules, counters and the admission decision.

mod actor;
mod clock;
mod counter;
mod denylist;
mod kind;
mod limiter;
mod rules;

pub use actor::{ActorContext, ActorId, Scope};
pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::WindowCounter;
pub use denylist::{DenylistTracker, DEFAULT_THRESHOLD};
pub use kind::{KindMatcher, RequestKind};
pub use limiter::{spawn_purger, Decision, DenyReason, Limiter, LimiterBuilder};
pub use rules::{default_rules, Rule, RuleConfig};
