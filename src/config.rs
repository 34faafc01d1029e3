//! Configuration for the ingestion core

use crate::errors::CoreError;
use crate::types::ContradictionStrategy;
use serde::{Deserialize, Serialize};

/// Configuration for channels, queue, extraction and the graph store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Minimum spacing between calls on a channel, in seconds
    pub interval_seconds: f64,
    /// Token bucket capacity for short bursts above the steady rate
    pub burst_tokens: u32,
    /// Seconds to recover one burst token
    pub burst_recovery_seconds: f64,
    /// Maximum number of episodes waiting for extraction
    pub queue_max_size: usize,
    /// Extraction results below this confidence are discarded (0.0 to 1.0)
    pub min_confidence: f32,
    /// Episodes with shorter content are rejected at the queue
    pub min_content_length: usize,
    /// Episode content is truncated to this many characters at creation
    pub max_content_length: usize,
    /// Entity types recognized in addition to the built-in vocabulary
    pub custom_entity_types: Vec<String>,
    /// How the store resolves contradicting facts
    pub contradiction_strategy: ContradictionStrategy,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 12.0,
            burst_tokens: 3,
            burst_recovery_seconds: 600.0,
            queue_max_size: 100,
            min_confidence: 0.7,
            min_content_length: 20,
            max_content_length: 10_000,
            custom_entity_types: Vec::new(),
            contradiction_strategy: ContradictionStrategy::default(),
        }
    }
}

impl CoreConfig {
    /// Set the minimum inter-call spacing
    pub fn with_interval_seconds(mut self, interval_seconds: f64) -> Self {
        self.interval_seconds = interval_seconds;
        self
    }

    /// Set the burst bucket capacity
    pub fn with_burst_tokens(mut self, burst_tokens: u32) -> Self {
        self.burst_tokens = burst_tokens;
        self
    }

    /// Set the burst token recovery period
    pub fn with_burst_recovery_seconds(mut self, burst_recovery_seconds: f64) -> Self {
        self.burst_recovery_seconds = burst_recovery_seconds;
        self
    }

    /// Set the queue capacity
    pub fn with_queue_max_size(mut self, queue_max_size: usize) -> Self {
        self.queue_max_size = queue_max_size;
        self
    }

    /// Set the extraction confidence floor
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence.clamp(0.0, 1.0);
        self
    }

    /// Set the minimum episode content length
    pub fn with_min_content_length(mut self, min_content_length: usize) -> Self {
        self.min_content_length = min_content_length;
        self
    }

    /// Add additional entity types to the extraction vocabulary
    pub fn with_custom_entity_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.custom_entity_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Set the contradiction resolution strategy
    pub fn with_contradiction_strategy(mut self, strategy: ContradictionStrategy) -> Self {
        self.contradiction_strategy = strategy;
        self
    }

    /// Reject configurations the runtime cannot honor
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.interval_seconds.is_finite() || self.interval_seconds <= 0.0 {
            return Err(CoreError::Configuration(format!(
                "interval_seconds must be positive, got {}",
                self.interval_seconds
            )));
        }
        if !self.burst_recovery_seconds.is_finite() || self.burst_recovery_seconds <= 0.0 {
            return Err(CoreError::Configuration(format!(
                "burst_recovery_seconds must be positive, got {}",
                self.burst_recovery_seconds
            )));
        }
        if self.queue_max_size == 0 {
            return Err(CoreError::Configuration(
                "queue_max_size must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(CoreError::Configuration(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        if self.max_content_length < self.min_content_length {
            return Err(CoreError::Configuration(
                "max_content_length must not be below min_content_length".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(CoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_interval() {
        let config = CoreConfig::default().with_interval_seconds(0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_confidence() {
        let mut config = CoreConfig::default();
        config.min_confidence = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_min_confidence_builder_clamps() {
        let config = CoreConfig::default().with_min_confidence(2.0);
        assert_eq!(config.min_confidence, 1.0);
    }

    #[test]
    fn test_rejects_zero_queue() {
        let config = CoreConfig::default().with_queue_max_size(0);
        assert!(config.validate().is_err());
    }
}
