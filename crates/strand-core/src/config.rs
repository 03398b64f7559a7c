//! Engine configuration, loaded from code or environment variables.

use std::env;
use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::Priority;

/// Configuration for one `Engine`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker count. `None` means the host's available parallelism.
    pub max_workers: Option<usize>,

    /// Delay used by the fallback idle scheduler ("run after N ms").
    pub idle_fallback_delay_ms: u64,

    /// Buffer of the `TaskEvent` broadcast channel.
    pub event_capacity: usize,

    /// Priority for submissions that do not name one.
    pub default_priority: Priority,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            idle_fallback_delay_ms: 1,
            event_capacity: 256,
            default_priority: Priority::Medium,
        }
    }
}

impl EngineConfig {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    pub fn with_idle_fallback_delay_ms(mut self, delay_ms: u64) -> Self {
        self.idle_fallback_delay_ms = delay_ms;
        self
    }

    pub fn with_default_priority(mut self, priority: Priority) -> Self {
        self.default_priority = priority;
        self
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `STRAND_MAX_WORKERS`: worker count (default: available parallelism)
    /// - `STRAND_IDLE_FALLBACK_DELAY_MS`: fallback idle delay (default: 1)
    /// - `STRAND_EVENT_CAPACITY`: event channel buffer (default: 256)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            max_workers: parse("STRAND_MAX_WORKERS")
                .map(|v| v as usize)
                .or(defaults.max_workers),
            idle_fallback_delay_ms: parse("STRAND_IDLE_FALLBACK_DELAY_MS")
                .unwrap_or(defaults.idle_fallback_delay_ms),
            event_capacity: parse("STRAND_EVENT_CAPACITY")
                .map(|v| v as usize)
                .unwrap_or(defaults.event_capacity),
            default_priority: defaults.default_priority,
        }
    }

    /// Effective pool size: `max_workers` or available parallelism, at least 1.
    pub fn pool_size(&self) -> usize {
        self.max_workers
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(NonZeroUsize::get)
                    .unwrap_or(1)
            })
            .max(1)
    }

    pub fn idle_fallback_delay(&self) -> Duration {
        Duration::from_millis(self.idle_fallback_delay_ms)
    }

    /// broadcast::channel panics on zero capacity.
    pub(crate) fn event_capacity(&self) -> usize {
        self.event_capacity.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_env_is_empty() {
        let config = EngineConfig::from_lookup(lookup(&[]));
        assert_eq!(config, EngineConfig::default());
        assert!(config.pool_size() >= 1);
    }

    #[test]
    fn reads_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("STRAND_MAX_WORKERS", "3"),
            ("STRAND_IDLE_FALLBACK_DELAY_MS", "25"),
            ("STRAND_EVENT_CAPACITY", "8"),
        ]));
        assert_eq!(config.pool_size(), 3);
        assert_eq!(config.idle_fallback_delay(), Duration::from_millis(25));
        assert_eq!(config.event_capacity, 8);
    }

    #[test]
    fn garbage_values_fall_back() {
        let config = EngineConfig::from_lookup(lookup(&[("STRAND_MAX_WORKERS", "many")]));
        assert_eq!(config.max_workers, None);
    }

    #[test]
    fn zero_workers_still_means_one() {
        assert_eq!(EngineConfig::default().with_max_workers(0).pool_size(), 1);
    }

    #[test]
    fn deserializes_partial_json() {
        let config: EngineConfig =
            serde_json::from_value(serde_json::json!({ "max_workers": 2 })).unwrap();
        assert_eq!(config.max_workers, Some(2));
        assert_eq!(config.idle_fallback_delay_ms, 1);
    }
}
