//! Per-service token bucket rate limiting.
//!
//! Each bucket refills lazily from elapsed time whenever a caller asks for
//! admission; there is no background refill task. Callers that find the
//! bucket empty sleep for the longer of the time to the next token and an
//! exponential backoff step, then try again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{SchedulerConfig, ServiceRateLimit};
use crate::error::QueueResult;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket for one named external service.
#[derive(Debug)]
pub struct RateLimiter {
    service: String,
    requests_per_minute: u32,
    burst: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter with a full bucket and the reference backoff
    /// (0.5s doubling up to 5s).
    pub fn new(service: impl Into<String>, requests_per_minute: u32, burst: u32) -> Self {
        Self::with_backoff(
            service,
            requests_per_minute,
            burst,
            Duration::from_millis(500),
            Duration::from_secs(5),
        )
    }

    /// A positive rate always gets a bucket of at least one token.
    pub fn with_backoff(
        service: impl Into<String>,
        requests_per_minute: u32,
        burst: u32,
        backoff_base: Duration,
        backoff_max: Duration,
    ) -> Self {
        let burst = if requests_per_minute > 0 {
            burst.max(1)
        } else {
            burst
        };
        Self {
            service: service.into(),
            requests_per_minute,
            burst,
            backoff_base,
            backoff_max,
            bucket: Mutex::new(Bucket {
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Build from a service entry, applying the rate and burst defaults.
    pub fn from_service_config(
        service: impl Into<String>,
        limit: &ServiceRateLimit,
        backoff_base: Duration,
        backoff_max: Duration,
    ) -> Self {
        Self::with_backoff(
            service,
            limit.effective_requests_per_minute(),
            limit.effective_burst(),
            backoff_base,
            backoff_max,
        )
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// A zero rate disables throttling for the service.
    pub fn is_disabled(&self) -> bool {
        self.requests_per_minute == 0
    }

    fn refill_rate(&self) -> f64 {
        self.requests_per_minute as f64 / 60.0
    }

    fn lock_bucket(&self) -> std::sync::MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        if elapsed.is_zero() || self.is_disabled() {
            return;
        }
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * self.refill_rate()).min(self.burst as f64);
        bucket.last_refill = now;
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.backoff_max)
    }

    /// Wait until a token is available and consume it.
    ///
    /// Never fails. Returns immediately when the limiter is disabled.
    pub async fn acquire(&self) {
        if self.is_disabled() {
            return;
        }

        let mut attempt: u32 = 0;
        loop {
            let wait = {
                let mut bucket = self.lock_bucket();
                self.refill(&mut bucket, Instant::now());
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                let until_next =
                    Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_rate());
                until_next.max(self.backoff_for(attempt))
            };

            debug!(
                service = %self.service,
                attempt,
                wait_ms = wait.as_millis() as u64,
                "Rate limited, waiting for token"
            );
            tokio::time::sleep(wait).await;
            attempt = attempt.saturating_add(1);
        }
    }

    /// Consume a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        if self.is_disabled() {
            return true;
        }
        let mut bucket = self.lock_bucket();
        self.refill(&mut bucket, Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Current token level after refilling.
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.lock_bucket();
        self.refill(&mut bucket, Instant::now());
        bucket.tokens
    }
}

/// Limiters for every configured service. Unknown services are unthrottled.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    limiters: HashMap<String, Arc<RateLimiter>>,
}

impl RateLimiterRegistry {
    /// Validate the configured limits and build one limiter per service.
    pub fn from_config(config: &SchedulerConfig) -> QueueResult<Self> {
        config.rate_limits.validate()?;

        let mut limiters = HashMap::new();
        for (name, limit) in &config.rate_limits.services {
            let limiter = RateLimiter::from_service_config(
                name.clone(),
                limit,
                config.backoff_base,
                config.backoff_max,
            );
            if limiter.is_disabled() {
                warn!(service = %name, "Rate limit disabled (zero requests per minute configured)");
            } else {
                debug!(
                    service = %name,
                    requests_per_minute = limiter.requests_per_minute(),
                    burst = limiter.burst(),
                    "Configured rate limiter"
                );
            }
            limiters.insert(name.clone(), Arc::new(limiter));
        }
        Ok(Self { limiters })
    }

    pub fn get(&self, service: &str) -> Option<Arc<RateLimiter>> {
        self.limiters.get(service).cloned()
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.limiters.keys().map(String::as_str)
    }

    /// Wait for admission to `service`; a no-op for unconfigured services.
    pub async fn acquire(&self, service: &str) {
        if let Some(limiter) = self.limiters.get(service) {
            limiter.acquire().await;
        }
    }
}
