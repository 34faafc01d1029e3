//! Named, rate-governed channels to the shared text-generation resource

use crate::config::CoreConfig;
use crate::errors::{GenerationError, GenerationResult};
use crate::rate::{RateGate, TokenBucket};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// The channel used by interactive, high-priority callers
pub const PRIMARY_CHANNEL: &str = "primary";
/// The channel used by background knowledge-extraction callers
pub const ENRICHMENT_CHANNEL: &str = "enrichment";

/// Static routing table from logical component names to channels.
/// Components not listed here fall back to the primary channel.
const COMPONENT_ROUTES: &[(&str, &str)] = &[
    ("extractor", ENRICHMENT_CHANNEL),
    ("relationship-extractor", ENRICHMENT_CHANNEL),
    ("enrichment", ENRICHMENT_CHANNEL),
    ("primary-reasoner", PRIMARY_CHANNEL),
];

/// A single text-generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Prompt text
    pub prompt: String,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Temperature for generation (0.0 to 1.0)
    pub temperature: Option<f32>,
    /// Caller-supplied deadline for the whole call
    pub timeout: Duration,
}

impl GenerationRequest {
    /// Create a request with default limits
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: 1024,
            temperature: Some(0.1),
            timeout: Duration::from_secs(60),
        }
    }

    /// Set the maximum tokens to generate
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Host-supplied text-generation backend for one channel.
///
/// The core only depends on this call being present; retry policy and
/// provider details belong to the implementation.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate text for the given request
    async fn generate(&self, request: GenerationRequest) -> GenerationResult<String>;
}

/// Point-in-time metrics snapshot for one channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMetrics {
    /// Calls attempted on this channel
    pub total_calls: u64,
    /// Calls that returned a result
    pub successful_calls: u64,
    /// Calls that timed out or failed at the provider
    pub failed_calls: u64,
    /// Mean rate-gate wait per call, in seconds
    pub avg_wait_seconds: f64,
    /// Fraction of the channel's sustained call budget consumed, in [0, 1]
    pub utilization: f64,
    /// Wall-clock time of the most recent call
    pub last_call_time: Option<DateTime<Utc>>,
}

/// Mutable per-channel runtime state, guarded by the channel lock
struct ChannelState {
    gate: RateGate,
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    total_wait: Duration,
    last_call_time: Option<DateTime<Utc>>,
}

struct Channel {
    generator: Arc<dyn TextGenerator>,
    /// Held across the rate-gate wait and the generation call, so concurrent
    /// callers can never bypass the channel's pacing.
    state: Mutex<ChannelState>,
}

/// Routes logical callers to named channels and serializes every call
/// through the channel's rate gate.
///
/// Explicitly constructed and dependency-injected; there is no global
/// instance.
pub struct ChannelManager {
    channels: HashMap<&'static str, Channel>,
    session_start: Instant,
}

impl ChannelManager {
    /// Create a manager with the two standard channels, each backed by its
    /// own generator and its own rate gate built from `config`
    pub fn new(
        config: &CoreConfig,
        primary: Arc<dyn TextGenerator>,
        enrichment: Arc<dyn TextGenerator>,
    ) -> Self {
        let mut channels = HashMap::new();
        channels.insert(PRIMARY_CHANNEL, Self::build_channel(config, primary));
        channels.insert(ENRICHMENT_CHANNEL, Self::build_channel(config, enrichment));
        Self {
            channels,
            session_start: Instant::now(),
        }
    }

    fn build_channel(config: &CoreConfig, generator: Arc<dyn TextGenerator>) -> Channel {
        let bucket = TokenBucket::new(
            config.burst_tokens,
            Duration::from_secs_f64(config.burst_recovery_seconds),
        );
        let gate = RateGate::new(Duration::from_secs_f64(config.interval_seconds), bucket);
        Channel {
            generator,
            state: Mutex::new(ChannelState {
                gate,
                total_calls: 0,
                successful_calls: 0,
                failed_calls: 0,
                total_wait: Duration::ZERO,
                last_call_time: None,
            }),
        }
    }

    /// Call the named channel, honoring its pacing and recording metrics.
    ///
    /// Errors from the underlying generator propagate unchanged after being
    /// recorded; the manager never retries.
    pub async fn call(&self, channel: &str, request: GenerationRequest) -> GenerationResult<String> {
        let chan = self
            .channels
            .get(channel)
            .ok_or_else(|| GenerationError::UnknownChannel(channel.to_string()))?;

        let mut state = chan.state.lock().await;

        let waited = state.gate.wait_for_slot().await;
        state.total_calls += 1;
        state.total_wait += waited;
        state.last_call_time = Some(Utc::now());

        debug!(
            "Channel {} call after {:?} wait (call #{})",
            channel, waited, state.total_calls
        );

        let timeout = request.timeout;
        match tokio::time::timeout(timeout, chan.generator.generate(request)).await {
            Ok(Ok(text)) => {
                state.successful_calls += 1;
                Ok(text)
            }
            Ok(Err(e)) => {
                state.failed_calls += 1;
                warn!("Channel {} call failed: {}", channel, e);
                Err(e)
            }
            Err(_) => {
                state.failed_calls += 1;
                warn!("Channel {} call timed out after {:?}", channel, timeout);
                Err(GenerationError::Timeout)
            }
        }
    }

    /// Resolve a logical component name through the routing table and call
    /// the resulting channel
    pub async fn call_by_component(
        &self,
        component: &str,
        request: GenerationRequest,
    ) -> GenerationResult<String> {
        let channel = COMPONENT_ROUTES
            .iter()
            .find(|(name, _)| *name == component)
            .map(|(_, channel)| *channel)
            .unwrap_or(PRIMARY_CHANNEL);
        self.call(channel, request).await
    }

    /// Snapshot metrics for every channel
    pub async fn metrics(&self) -> HashMap<String, ChannelMetrics> {
        let elapsed = self.session_start.elapsed();
        let mut out = HashMap::new();
        for (name, chan) in &self.channels {
            let state = chan.state.lock().await;
            out.insert(name.to_string(), Self::snapshot(&state, elapsed));
        }
        out
    }

    fn snapshot(state: &ChannelState, session_elapsed: Duration) -> ChannelMetrics {
        let avg_wait_seconds = if state.total_calls > 0 {
            state.total_wait.as_secs_f64() / state.total_calls as f64
        } else {
            0.0
        };

        // Utilization is meaningless in the first moments of a session and
        // would spike from the near-zero denominator.
        let utilization = if session_elapsed < Duration::from_secs(5) {
            0.0
        } else {
            let calls_per_hour_cap = 3600.0 / state.gate.interval().as_secs_f64();
            let elapsed_hours = session_elapsed.as_secs_f64() / 3600.0;
            let actual_rate = state.total_calls as f64 / elapsed_hours;
            (actual_rate / calls_per_hour_cap).clamp(0.0, 1.0)
        };

        ChannelMetrics {
            total_calls: state.total_calls,
            successful_calls: state.successful_calls,
            failed_calls: state.failed_calls,
            avg_wait_seconds,
            utilization,
            last_call_time: state.last_call_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoGenerator {
        calls: AtomicUsize,
    }

    impl EchoGenerator {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        async fn generate(&self, request: GenerationRequest) -> GenerationResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("echo: {}", request.prompt))
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        async fn generate(&self, _request: GenerationRequest) -> GenerationResult<String> {
            Err(GenerationError::Provider("upstream 500".to_string()))
        }
    }

    struct HangingGenerator;

    #[async_trait]
    impl TextGenerator for HangingGenerator {
        async fn generate(&self, _request: GenerationRequest) -> GenerationResult<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    fn test_config() -> CoreConfig {
        CoreConfig::default()
            .with_interval_seconds(1.0)
            .with_burst_tokens(10)
            .with_burst_recovery_seconds(60.0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_routing_to_enrichment_and_default() {
        let primary = EchoGenerator::new();
        let enrichment = EchoGenerator::new();
        let manager = ChannelManager::new(&test_config(), primary.clone(), enrichment.clone());

        manager
            .call_by_component("extractor", GenerationRequest::new("hi"))
            .await
            .unwrap();
        assert_eq!(enrichment.calls.load(Ordering::SeqCst), 1);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 0);

        manager
            .call_by_component("unmapped-component", GenerationRequest::new("hi"))
            .await
            .unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_channel_is_an_error() {
        let manager =
            ChannelManager::new(&test_config(), EchoGenerator::new(), EchoGenerator::new());
        let result = manager.call("backchannel", GenerationRequest::new("hi")).await;
        assert!(matches!(result, Err(GenerationError::UnknownChannel(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_record_success_and_failure() {
        let config = test_config();
        let manager = ChannelManager::new(&config, EchoGenerator::new(), Arc::new(FailingGenerator));

        manager
            .call(PRIMARY_CHANNEL, GenerationRequest::new("ok"))
            .await
            .unwrap();
        let err = manager
            .call(ENRICHMENT_CHANNEL, GenerationRequest::new("boom"))
            .await;
        assert!(err.is_err());

        let metrics = manager.metrics().await;
        let primary = &metrics[PRIMARY_CHANNEL];
        assert_eq!(primary.total_calls, 1);
        assert_eq!(primary.successful_calls, 1);
        assert_eq!(primary.failed_calls, 0);

        let enrichment = &metrics[ENRICHMENT_CHANNEL];
        assert_eq!(enrichment.total_calls, 1);
        assert_eq!(enrichment.failed_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_typed_and_counted() {
        let manager =
            ChannelManager::new(&test_config(), Arc::new(HangingGenerator), EchoGenerator::new());

        let request = GenerationRequest::new("never").with_timeout(Duration::from_secs(2));
        let result = manager.call(PRIMARY_CHANNEL, request).await;
        assert!(matches!(result, Err(GenerationError::Timeout)));

        let metrics = manager.metrics().await;
        assert_eq!(metrics[PRIMARY_CHANNEL].failed_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_cannot_bypass_pacing() {
        let config = CoreConfig::default()
            .with_interval_seconds(5.0)
            .with_burst_tokens(0);
        let manager = Arc::new(ChannelManager::new(
            &config,
            EchoGenerator::new(),
            EchoGenerator::new(),
        ));

        let started = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..3 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .call(PRIMARY_CHANNEL, GenerationRequest::new("go"))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // First paced call is free; the other two each wait a full interval.
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_utilization_zero_in_young_session() {
        let manager =
            ChannelManager::new(&test_config(), EchoGenerator::new(), EchoGenerator::new());
        manager
            .call(PRIMARY_CHANNEL, GenerationRequest::new("hi"))
            .await
            .unwrap();
        let metrics = manager.metrics().await;
        assert_eq!(metrics[PRIMARY_CHANNEL].utilization, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_utilization_clamped_after_session_matures() {
        let config = CoreConfig::default()
            .with_interval_seconds(60.0)
            .with_burst_tokens(100);
        let manager =
            ChannelManager::new(&config, EchoGenerator::new(), EchoGenerator::new());

        for _ in 0..50 {
            manager
                .call(PRIMARY_CHANNEL, GenerationRequest::new("hi"))
                .await
                .unwrap();
        }
        tokio::time::advance(Duration::from_secs(60)).await;

        let metrics = manager.metrics().await;
        let utilization = metrics[PRIMARY_CHANNEL].utilization;
        assert!(utilization > 0.0);
        assert!(utilization <= 1.0);
    }
}
