//! Environment-driven runtime configuration.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const MAX_RETRIES_VAR: &str = "MAILFOLD_DISPATCH_MAX_RETRIES";
pub const WORKER_TICK_VAR: &str = "MAILFOLD_WORKER_TICK_MS";

/// Tunables of the command pipeline and background workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfraConfig {
    /// Re-executions of a command after an optimistic concurrency failure.
    /// `0` leaves retrying to the caller.
    pub dispatch_max_retries: u32,
    /// How long a reaction worker waits for a batch before re-checking shutdown.
    pub worker_tick: Duration,
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            dispatch_max_retries: 0,
            worker_tick: Duration::from_millis(250),
        }
    }
}

impl InfraConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or invalid values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let dispatch_max_retries =
            parse_or(&lookup, MAX_RETRIES_VAR, defaults.dispatch_max_retries);
        let tick_ms = parse_or(
            &lookup,
            WORKER_TICK_VAR,
            defaults.worker_tick.as_millis() as u64,
        );
        Self {
            dispatch_max_retries,
            worker_tick: Duration::from_millis(tick_ms),
        }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.dispatch_max_retries = retries;
        self
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + core::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    raw.trim().parse().unwrap_or_else(|_| {
        warn!(key, value = %raw, %default, "invalid configuration value; using default");
        default
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn unset_variables_use_defaults() {
        assert_eq!(InfraConfig::from_lookup(lookup(&[])), InfraConfig::default());
    }

    #[test]
    fn values_are_read_from_the_environment() {
        let config = InfraConfig::from_lookup(lookup(&[
            (MAX_RETRIES_VAR, "3"),
            (WORKER_TICK_VAR, " 40 "),
        ]));
        assert_eq!(config.dispatch_max_retries, 3);
        assert_eq!(config.worker_tick, Duration::from_millis(40));
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = InfraConfig::from_lookup(lookup(&[
            (MAX_RETRIES_VAR, "-1"),
            (WORKER_TICK_VAR, "soon"),
        ]));
        assert_eq!(config, InfraConfig::default());
    }
}
