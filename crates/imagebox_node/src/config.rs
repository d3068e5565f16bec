//! Configuration for a transfer node.

use std::time::Duration;

use imagebox_engine::EngineConfig;

/// Tuning knobs for the peer liveness sweep.
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Delay before the first sweep after startup.
    pub initial_delay: Duration,
    /// Interval between sweeps.
    pub sweep_interval: Duration,
    /// A poll peer silent for longer than this is considered offline.
    pub offline_threshold: Duration,
}

impl LivenessConfig {
    /// Creates the default configuration: first sweep after 100ms, then
    /// every 5 seconds, with a 15 second offline threshold.
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            sweep_interval: Duration::from_secs(5),
            offline_threshold: Duration::from_millis(15_000),
        }
    }

    /// Sets the delay before the first sweep.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the offline threshold.
    pub fn with_offline_threshold(mut self, threshold: Duration) -> Self {
        self.offline_threshold = threshold;
        self
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for a [`Coordinator`](crate::Coordinator).
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Public base URL of this node, used when minting box URLs.
    pub base_url: String,
    /// Engine tuning shared by all per-box workers.
    pub engine: EngineConfig,
    /// Liveness sweep tuning.
    pub liveness: LivenessConfig,
}

impl NodeConfig {
    /// Creates a configuration for a node reachable at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            engine: EngineConfig::default(),
            liveness: LivenessConfig::default(),
        }
    }

    /// Sets the engine tuning.
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Sets the liveness tuning.
    pub fn with_liveness(mut self, liveness: LivenessConfig) -> Self {
        self.liveness = liveness;
        self
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new("http://127.0.0.1:8080")
    }
}
