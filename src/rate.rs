//! Rate-governance primitives: token bucket and per-channel rate gate

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Burst-allowance primitive.
///
/// Starts full. Each acquisition attempt first refills
/// `floor(elapsed / refill_period)` tokens capped at capacity, then debits
/// one token if available. Never blocks.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill_period: Duration,
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(capacity: u32, refill_period: Duration) -> Self {
        Self {
            capacity,
            refill_period,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Try to take one token. Returns true and debits iff one is available.
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Refill and report how many tokens are currently available
    pub fn available_tokens(&mut self) -> u32 {
        self.refill();
        self.tokens
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed();
        if !self.refill_period.is_zero() {
            let earned = (elapsed.as_secs_f64() / self.refill_period.as_secs_f64()).floor();
            if earned >= 1.0 {
                let earned = earned.min(self.capacity as f64) as u32;
                self.tokens = (self.tokens + earned).min(self.capacity);
            }
        }
        self.last_refill = Instant::now();
    }
}

/// Steady-state throttle with burst tolerance.
///
/// The bucket absorbs short spikes at zero wait; once it is empty, calls are
/// spaced at least `interval` apart. Sustained throughput is therefore
/// `3600 / interval_seconds` calls per hour.
#[derive(Debug)]
pub struct RateGate {
    bucket: TokenBucket,
    interval: Duration,
    last_call: Option<Instant>,
}

impl RateGate {
    /// Create a gate with the given minimum interval and burst bucket
    pub fn new(interval: Duration, bucket: TokenBucket) -> Self {
        Self {
            bucket,
            interval,
            last_call: None,
        }
    }

    /// The configured minimum inter-call interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the next call is allowed and return the time spent waiting.
    ///
    /// A burst token grants immediate passage with zero wait. Otherwise the
    /// call sleeps out the remainder of `interval` since the previous paced
    /// call and stamps the pacing clock.
    pub async fn wait_for_slot(&mut self) -> Duration {
        if self.bucket.try_acquire() {
            debug!("rate gate: burst token granted, no wait");
            return Duration::ZERO;
        }

        let wait = match self.last_call {
            Some(last) => self.interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        };

        let started = Instant::now();
        if !wait.is_zero() {
            debug!("rate gate: waiting {:?} for next slot", wait);
            tokio::time::sleep(wait).await;
        }
        self.last_call = Some(Instant::now());
        started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_bucket_starts_full_and_drains() {
        let mut bucket = TokenBucket::new(3, Duration::from_secs(60));
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_refill_monotonicity() {
        let period = Duration::from_secs(10);
        let mut bucket = TokenBucket::new(5, period);
        for _ in 0..5 {
            assert!(bucket.try_acquire());
        }
        assert_eq!(bucket.available_tokens(), 0);

        // k periods with no acquisitions earn min(capacity, k) tokens
        tokio::time::advance(period * 3).await;
        assert_eq!(bucket.available_tokens(), 3);

        tokio::time::advance(period * 100).await;
        assert_eq!(bucket.available_tokens(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_partial_period_earns_nothing() {
        let mut bucket = TokenBucket::new(2, Duration::from_secs(10));
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_burst_path_returns_zero_wait() {
        let bucket = TokenBucket::new(2, Duration::from_secs(600));
        let mut gate = RateGate::new(Duration::from_secs(5), bucket);

        assert_eq!(gate.wait_for_slot().await, Duration::ZERO);
        assert_eq!(gate.wait_for_slot().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_lower_bound_without_burst() {
        // Empty bucket forces every call through the interval path
        let bucket = TokenBucket::new(0, Duration::from_secs(600));
        let mut gate = RateGate::new(Duration::from_secs(3), bucket);

        let n = 4u32;
        let started = Instant::now();
        for _ in 0..n {
            gate.wait_for_slot().await;
        }
        // N consecutive paced calls span at least (N-1) * interval
        assert!(started.elapsed() >= Duration::from_secs(3) * (n - 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_does_not_oversleep_after_idle_gap() {
        let bucket = TokenBucket::new(0, Duration::from_secs(600));
        let mut gate = RateGate::new(Duration::from_secs(5), bucket);

        gate.wait_for_slot().await;
        tokio::time::advance(Duration::from_secs(10)).await;

        // Interval already elapsed while idle, so no additional wait is due
        let waited = gate.wait_for_slot().await;
        assert_eq!(waited, Duration::ZERO);
    }
}
