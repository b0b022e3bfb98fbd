// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::*;
use crate::errors::ConfigError;
use crate::stats::monitoring_capacity;
use crate::util::{parse_metric_prefix, slug};
use regex::Regex;
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// A downstream backend, identified by its `host:port` address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
pub struct Backend(String);

impl Backend {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.0
    }

    /// Path and metric safe form of the address.
    #[must_use]
    pub fn slug(&self) -> String {
        slug(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
pub enum AggregationKind {
    #[display("sum")]
    Sum,
    #[display("avg")]
    Avg,
    #[display("min")]
    Min,
    #[display("max")]
    Max,
}

impl AggregationKind {
    pub const ALL: [AggregationKind; 4] = [Self::Sum, Self::Avg, Self::Min, Self::Max];
}

/// Lines whose name starts with `prefix` are aggregated with `kind`.
///
/// Groups are keyed by kind and stripped name, so `SUM.a` and `AVG.a` in one window produce
/// two lines named `a` with the same timestamp. Use distinct names per kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationRule {
    pub prefix: String,
    pub kind: AggregationKind,
}

impl AggregationRule {
    pub fn new(prefix: impl Into<String>, kind: AggregationKind) -> Self {
        Self {
            prefix: prefix.into(),
            kind,
        }
    }
}

/// Renames lines matching `pattern`. `replacement` may reference capture groups.
#[derive(Debug, Clone)]
pub struct RewriteRule {
    pub pattern: Regex,
    pub replacement: String,
}

/// Parses `;` separated `regex => replacement` rules.
pub fn parse_rewrite_rules(rules: &str) -> Result<Vec<RewriteRule>, ConfigError> {
    rules
        .split(';')
        .map(str::trim)
        .filter(|rule| !rule.is_empty())
        .map(|rule| {
            let (pattern, replacement) = rule.split_once("=>").ok_or_else(|| {
                ConfigError::InvalidConfig(format!(
                    "Rewrite rule '{rule}' must have the form 'regex => replacement'"
                ))
            })?;
            let pattern = Regex::new(pattern.trim()).map_err(|e| {
                ConfigError::InvalidConfig(format!("Invalid rewrite regex '{}': {e}", pattern.trim()))
            })?;
            Ok(RewriteRule {
                pattern,
                replacement: replacement.trim().to_string(),
            })
        })
        .collect()
}

/// Immutable relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// TCP ingestion bind address
    pub bind: String,
    pub backends: Vec<Backend>,
    /// Spool directory polled for metric files. `None` disables spool ingestion.
    pub metric_dir: Option<PathBuf>,
    /// Directory holding one retry file per backend
    pub retry_dir: PathBuf,
    /// Checked in order, first matching prefix wins
    pub aggregation: Vec<AggregationRule>,
    /// Aggregation window
    pub sum_interval: Duration,
    /// Backend sender cycle and spool poll period
    pub send_interval: Duration,
    /// Per connection line cap, also scales the queue capacities
    pub max_metrics: usize,
    pub monitoring_prefix: String,
    pub monitoring_interval: Duration,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub rewrites: Vec<RewriteRule>,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            backends: vec![Backend::new(DEFAULT_BACKEND)],
            metric_dir: None,
            retry_dir: PathBuf::from(DEFAULT_RETRY_DIR),
            aggregation: vec![
                AggregationRule::new(DEFAULT_SUM_PREFIX, AggregationKind::Sum),
                AggregationRule::new(DEFAULT_AVG_PREFIX, AggregationKind::Avg),
                AggregationRule::new(DEFAULT_MIN_PREFIX, AggregationKind::Min),
                AggregationRule::new(DEFAULT_MAX_PREFIX, AggregationKind::Max),
            ],
            sum_interval: Duration::from_secs(DEFAULT_SUM_INTERVAL_SECS),
            send_interval: Duration::from_secs(DEFAULT_SEND_INTERVAL_SECS),
            max_metrics: DEFAULT_MAX_METRICS,
            monitoring_prefix: DEFAULT_MONITORING_PREFIX.to_string(),
            monitoring_interval: Duration::from_secs(DEFAULT_MONITORING_INTERVAL_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            write_timeout: Duration::from_secs(DEFAULT_WRITE_TIMEOUT_SECS),
            rewrites: Vec::new(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(
        env::var(name)
            .ok()
            .and_then(|val| val.trim().parse::<u64>().ok())
            .unwrap_or(default),
    )
}

fn env_prefix(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl RelayConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind = env::var("RELAY_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
        let backends = env::var("RELAY_BACKENDS")
            .unwrap_or_else(|_| DEFAULT_BACKEND.to_string())
            .split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(Backend::new)
            .collect();
        let metric_dir = env::var("RELAY_METRIC_DIR")
            .ok()
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);
        let retry_dir = PathBuf::from(
            env::var("RELAY_RETRY_DIR").unwrap_or_else(|_| DEFAULT_RETRY_DIR.to_string()),
        );

        let aggregation = [
            (
                env_prefix("RELAY_SUM_PREFIX", DEFAULT_SUM_PREFIX),
                AggregationKind::Sum,
            ),
            (
                env_prefix("RELAY_AVG_PREFIX", DEFAULT_AVG_PREFIX),
                AggregationKind::Avg,
            ),
            (
                env_prefix("RELAY_MIN_PREFIX", DEFAULT_MIN_PREFIX),
                AggregationKind::Min,
            ),
            (
                env_prefix("RELAY_MAX_PREFIX", DEFAULT_MAX_PREFIX),
                AggregationKind::Max,
            ),
        ]
        .into_iter()
        // an empty prefix disables that kind of aggregation
        .filter(|(prefix, _)| !prefix.is_empty())
        .map(|(prefix, kind)| AggregationRule::new(prefix, kind))
        .collect();

        let max_metrics = env::var("RELAY_MAX_METRICS")
            .ok()
            .and_then(|val| val.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_METRICS);
        let monitoring_prefix = env::var("RELAY_MONITORING_PREFIX")
            .ok()
            .and_then(|val| parse_metric_prefix(&val))
            .unwrap_or_else(|| DEFAULT_MONITORING_PREFIX.to_string());
        let rewrites = match env::var("RELAY_OVERWRITE") {
            Ok(rules) => parse_rewrite_rules(&rules)?,
            Err(_) => Vec::new(),
        };
        let log_level = env::var("RELAY_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());

        let config = Self {
            bind,
            backends,
            metric_dir,
            retry_dir,
            aggregation,
            sum_interval: env_secs("RELAY_SUM_INTERVAL", DEFAULT_SUM_INTERVAL_SECS),
            send_interval: env_secs("RELAY_SEND_INTERVAL", DEFAULT_SEND_INTERVAL_SECS),
            max_metrics,
            monitoring_prefix,
            monitoring_interval: env_secs(
                "RELAY_MONITORING_INTERVAL",
                DEFAULT_MONITORING_INTERVAL_SECS,
            ),
            connect_timeout: env_secs("RELAY_CONNECT_TIMEOUT", DEFAULT_CONNECT_TIMEOUT_SECS),
            write_timeout: env_secs("RELAY_WRITE_TIMEOUT", DEFAULT_WRITE_TIMEOUT_SECS),
            rewrites,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Bind address cannot be empty".to_string(),
            ));
        }

        if self.backends.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "At least one backend is required".to_string(),
            ));
        }
        let mut addresses = HashSet::new();
        let mut slugs = HashSet::new();
        for backend in &self.backends {
            let address = backend.address();
            if address.is_empty() || address.chars().any(char::is_whitespace) {
                return Err(ConfigError::InvalidConfig(format!(
                    "Invalid backend address '{address}'"
                )));
            }
            if !addresses.insert(address) {
                return Err(ConfigError::InvalidConfig(format!(
                    "Backend '{address}' is configured more than once"
                )));
            }
            // retry files are named after the slug
            if !slugs.insert(backend.slug()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "Backend '{address}' collides with another backend's retry file"
                )));
            }
        }

        let mut prefixes = HashSet::new();
        for rule in &self.aggregation {
            if rule.prefix.is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "Empty prefix for {} aggregation",
                    rule.kind
                )));
            }
            if !prefixes.insert(rule.prefix.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "Aggregation prefix '{}' is used more than once",
                    rule.prefix
                )));
            }
        }

        for (name, interval) in [
            ("Aggregation interval", self.sum_interval),
            ("Send interval", self.send_interval),
            ("Monitoring interval", self.monitoring_interval),
            ("Connect timeout", self.connect_timeout),
            ("Write timeout", self.write_timeout),
        ] {
            if interval.is_zero() {
                return Err(ConfigError::InvalidConfig(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.max_metrics == 0 {
            return Err(ConfigError::InvalidConfig(
                "Max metrics must be greater than 0".to_string(),
            ));
        }

        if parse_metric_prefix(&self.monitoring_prefix).as_deref()
            != Some(self.monitoring_prefix.as_str())
        {
            return Err(ConfigError::InvalidConfig(format!(
                "Invalid monitoring prefix '{}'",
                self.monitoring_prefix
            )));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Capacity of the aggregation queue: one window's worth of lines.
    #[must_use]
    pub fn aggregation_queue_capacity(&self) -> usize {
        self.max_metrics
            .saturating_mul(whole_secs(self.sum_interval))
    }

    /// Capacity of each backend's live queue: one send cycle's worth of lines.
    #[must_use]
    pub fn backend_queue_capacity(&self) -> usize {
        self.max_metrics
            .saturating_mul(whole_secs(self.send_interval))
    }

    #[must_use]
    pub fn monitoring_queue_capacity(&self) -> usize {
        monitoring_capacity(self.backends.len())
    }
}

// sub second intervals only show up in tests; never size a queue to zero
fn whole_secs(interval: Duration) -> usize {
    usize::try_from(interval.as_secs()).unwrap_or(usize::MAX).max(1)
}
