//! Warden - In-process admission control
//!
//! This crate decides, per incoming request, whether it may proceed based on
//! per-user and per-group request rates, and escalates repeat offenders into
//! a session-local denylist. It is a single-process, in-memory limiter meant
//! to be shared by every request handler of one serving instance.

pub mod config;
pub mod error;
pub mod metrics;
pub mod ratelimit;
pub mod store;

pub use ratelimit::{ActorContext, ActorId, Decision, DenyReason, Limiter, RequestKind};
