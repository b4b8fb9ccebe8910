//! Configuration management for Warden.
//!
//! Configuration is read once at startup. A YAML file provides the base and
//! `WARDEN_*` environment variables override individual keys, e.g.
//! `WARDEN_AUTO_DENYLIST=false`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use crate::error::{Result, WardenError};
use crate::ratelimit::{default_rules, RuleConfig, DEFAULT_THRESHOLD};

/// Main configuration for Warden.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Administrators that bypass every check
    #[serde(default)]
    pub exempt_ids: Vec<u64>,

    /// Whether repeat offenders are denylisted automatically
    #[serde(default = "default_auto_denylist")]
    pub auto_denylist: bool,

    /// User-scoped violations before an actor is denylisted
    #[serde(default = "default_denylist_threshold")]
    pub denylist_threshold: u32,

    /// Interval between idle counter purges in seconds, 0 disables purging
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,

    /// Rules in evaluation order, strictest first
    #[serde(default = "default_rules")]
    pub rules: Vec<RuleConfig>,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            exempt_ids: Vec::new(),
            auto_denylist: default_auto_denylist(),
            denylist_threshold: default_denylist_threshold(),
            purge_interval_secs: default_purge_interval(),
            rules: default_rules(),
        }
    }
}

fn default_auto_denylist() -> bool {
    true
}

fn default_denylist_threshold() -> u32 {
    DEFAULT_THRESHOLD
}

fn default_purge_interval() -> u64 {
    60
}

impl WardenConfig {
    /// Load configuration from a YAML file with `WARDEN_*` overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        if !path.exists() {
            return Err(WardenError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let config: WardenConfig = ::config::Config::builder()
            .add_source(::config::File::from(path).format(::config::FileFormat::Yaml))
            .add_source(
                ::config::Environment::with_prefix("WARDEN")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("exempt_ids"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WardenConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot be enforced.
    pub fn validate(&self) -> Result<()> {
        if self.auto_denylist && self.denylist_threshold == 0 {
            return Err(WardenError::Config(
                "denylist_threshold must be positive".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for rule in &self.rules {
            if !names.insert(rule.name.as_str()) {
                return Err(WardenError::invalid_rule(&rule.name, "duplicate rule name"));
            }
            rule.build()?;
        }
        Ok(())
    }
}
