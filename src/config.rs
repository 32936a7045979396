//! Pipeline configuration with tunable flush cadence and transport knobs.

use std::time::Duration;

/// Configuration for the update pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Period of the coalescing flush cycle (default: 1000 ms)
    pub flush_period: Duration,
    /// First reconnect delay after a failed or dropped connection (default: 1 s)
    pub reconnect_initial_delay: Duration,
    /// Ceiling for the reconnect backoff (default: 5 s)
    pub reconnect_max_delay: Duration,
    /// Capacity of the transport event channel (default: 256)
    pub event_channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            flush_period: Duration::from_millis(1000),
            reconnect_initial_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(5),
            event_channel_capacity: 256,
        }
    }
}

impl PipelineConfig {
    /// Create a new config builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }
}

/// Builder pattern for PipelineConfig.
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Set the flush period in milliseconds.
    pub fn flush_period_ms(mut self, period: u64) -> Self {
        self.config.flush_period = Duration::from_millis(period);
        self
    }

    /// Set the initial reconnect delay in milliseconds.
    pub fn reconnect_initial_delay_ms(mut self, delay: u64) -> Self {
        self.config.reconnect_initial_delay = Duration::from_millis(delay);
        self
    }

    /// Set the reconnect delay ceiling in milliseconds.
    pub fn reconnect_max_delay_ms(mut self, delay: u64) -> Self {
        self.config.reconnect_max_delay = Duration::from_millis(delay);
        self
    }

    /// Set the transport event channel capacity.
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.event_channel_capacity = capacity;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> PipelineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.flush_period, Duration::from_millis(1000));
        assert_eq!(config.reconnect_initial_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect_max_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_builder() {
        let config = PipelineConfig::builder()
            .flush_period_ms(250)
            .reconnect_max_delay_ms(2000)
            .event_channel_capacity(64)
            .build();

        assert_eq!(config.flush_period, Duration::from_millis(250));
        assert_eq!(config.reconnect_max_delay, Duration::from_millis(2000));
        assert_eq!(config.event_channel_capacity, 64);
    }
}
