use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use warden::config::WardenConfig;
use warden::metrics::DenyCounters;
use warden::ratelimit::{Clock, LimiterBuilder, ManualClock};
use warden::store::{forward_events, ChannelSink, DenylistStore, MemoryDenylistStore};
use warden::{ActorContext, ActorId, Decision, RequestKind};

#[derive(Debug, Parser)]
#[command(name = "warden", version, about = "Admission control rule checker")]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load and validate a configuration, then print its rule table
    Validate {
        /// Configuration file (YAML)
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Replay a JSON-lines request trace and print one decision per line
    Replay {
        /// Configuration file (YAML); built-in defaults when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Trace file, one JSON object per line
        trace: PathBuf,
    },
}

/// One line of a replay trace.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TraceLine {
    Request {
        at_ms: u64,
        user: u64,
        #[serde(default)]
        group: Option<u64>,
        kind: RequestKind,
        #[serde(default = "default_weight")]
        weight: u64,
    },
    Lift {
        at_ms: u64,
        lift: u64,
    },
}

fn default_weight() -> u64 {
    1
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so that stdout carries only results.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let logs = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        logs.json().init();
    } else {
        logs.init();
    }

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Validate { config } => validate(&config),
        Command::Replay { config, trace } => replay(config.as_deref(), &trace).await,
    }
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let config = WardenConfig::load(path)
        .with_context(|| format!("invalid configuration {}", path.display()))?;

    println!(
        "auto_denylist={} threshold={} exempt={}",
        config.auto_denylist,
        config.denylist_threshold,
        config.exempt_ids.len()
    );
    for (priority, rule) in config.rules.iter().enumerate() {
        let kinds: Vec<_> = rule.kinds.iter().map(|k| k.as_str()).collect();
        println!(
            "{:>2}. {:<24} {:<5} {:>6} / {:>7}ms  [{}]",
            priority + 1,
            rule.name,
            rule.scope.to_string(),
            rule.capacity,
            rule.window_ms,
            kinds.join(", ")
        );
    }
    Ok(())
}

async fn replay(config_path: Option<&Path>, trace_path: &Path) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => WardenConfig::load(path)
            .with_context(|| format!("invalid configuration {}", path.display()))?,
        None => WardenConfig::default(),
    };
    let trace = std::fs::read_to_string(trace_path)
        .with_context(|| format!("cannot read trace {}", trace_path.display()))?;

    let clock = ManualClock::default();
    let start = clock.now();
    let counters = DenyCounters::new();
    let store = Arc::new(MemoryDenylistStore::new());
    let (sink, rx) = ChannelSink::channel();

    let forwarder = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { forward_events(rx, store.as_ref()).await })
    };

    let limiter = LimiterBuilder::from_config(&config)?
        .clock(Arc::new(clock.clone()))
        .recorder(Arc::new(counters.clone()))
        .denylist_sink(Arc::new(sink))
        .build()?;

    let purge_every = config.purge_interval_secs.saturating_mul(1000);
    let mut last_purge_ms = 0u64;

    for (index, raw) in trace.lines().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }
        let line: TraceLine = serde_json::from_str(raw)
            .with_context(|| format!("malformed trace line {}", index + 1))?;

        match line {
            TraceLine::Request {
                at_ms,
                user,
                group,
                kind,
                weight,
            } => {
                clock.set(start + Duration::from_millis(at_ms));
                if purge_every > 0 && at_ms.saturating_sub(last_purge_ms) >= purge_every {
                    limiter.purge_idle();
                    last_purge_ms = at_ms;
                }

                let ctx = ActorContext {
                    user: ActorId(user),
                    group: group.map(ActorId),
                };
                let decision = limiter.check(&ctx, &kind, weight);
                let reason = match &decision {
                    Decision::Allowed => None,
                    Decision::Denied(reason) => Some(reason.to_string()),
                };
                println!(
                    "{}",
                    json!({
                        "line": index + 1,
                        "at_ms": at_ms,
                        "user": user,
                        "kind": kind,
                        "allowed": decision.is_allowed(),
                        "rule": decision.violated_rule(),
                        "reason": reason,
                    })
                );
            }
            TraceLine::Lift { at_ms, lift } => {
                clock.set(start + Duration::from_millis(at_ms));
                let was_denied = limiter.lift_limit_and_denial(ActorId(lift));
                println!(
                    "{}",
                    json!({ "line": index + 1, "at_ms": at_ms, "lift": lift, "was_denied": was_denied })
                );
            }
        }
    }

    // Dropping the limiter closes the event channel and lets the forwarder finish.
    drop(limiter);
    let persisted = forwarder.await.context("denylist forwarder panicked")?;
    let records = store.list().await?;

    println!(
        "{}",
        json!({
            "denies": counters.snapshot(),
            "events_persisted": persisted,
            "denylist": records,
        })
    );
    Ok(())
}
