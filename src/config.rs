use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 16;
pub const DEFAULT_SIGNAL_CAPACITY: usize = 64;

const DEBOUNCE_ENV: &str = "CELLGRAPH_DEBOUNCE_MS";
const SUBSCRIBER_CAPACITY_ENV: &str = "CELLGRAPH_SUBSCRIBER_CAPACITY";

/// Tuning for the resync coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResyncConfig {
    /// Quiet period after the last change signal before a rebuild starts.
    pub debounce_ms: u64,
    /// Queue length per subscriber; updates beyond it are dropped.
    pub subscriber_capacity: usize,
    /// Buffered change signals between the file watcher and the debouncer.
    pub signal_capacity: usize,
}

impl Default for ResyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            signal_capacity: DEFAULT_SIGNAL_CAPACITY,
        }
    }
}

impl ResyncConfig {
    /// Defaults overridden by `CELLGRAPH_DEBOUNCE_MS` and
    /// `CELLGRAPH_SUBSCRIBER_CAPACITY` when set. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = env_number(DEBOUNCE_ENV) {
            config.debounce_ms = value;
        }
        if let Some(value) = env_number(SUBSCRIBER_CAPACITY_ENV) {
            config.subscriber_capacity = value as usize;
        }
        config
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = debounce.as_millis() as u64;
        self
    }

    pub fn with_subscriber_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_capacity = capacity;
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn env_number(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("ignoring {key}={raw:?}: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_partial_deserialization() {
        let config: ResyncConfig = serde_json::from_str(r#"{"debounce_ms": 50}"#).unwrap();
        assert_eq!(config.debounce(), Duration::from_millis(50));
        assert_eq!(config.subscriber_capacity, DEFAULT_SUBSCRIBER_CAPACITY);
        assert_eq!(ResyncConfig::default().debounce(), Duration::from_millis(500));
    }
}
