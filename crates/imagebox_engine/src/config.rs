//! Configuration for the transfer engines.

use std::time::Duration;

/// Tuning knobs for the per-box worker loops.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often an idle worker re-checks its outbox or polls its peer.
    pub poll_interval: Duration,
    /// How long a dispatched delivery attempt may run before the worker
    /// writes it off and frees the slot.
    pub receive_timeout: Duration,
}

impl EngineConfig {
    /// Creates the default configuration: a 5 second tick and a one
    /// minute receive timeout.
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            receive_timeout: Duration::from_secs(60),
        }
    }

    /// Sets the tick interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the receive timeout.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_intervals() {
        let config = EngineConfig::new();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.receive_timeout, Duration::from_secs(60));
    }

    #[test]
    fn engine_config_builder() {
        let config = EngineConfig::new()
            .with_poll_interval(Duration::from_millis(50))
            .with_receive_timeout(Duration::from_secs(2));

        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.receive_timeout, Duration::from_secs(2));
    }
}
