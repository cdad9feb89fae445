use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QueueError, QueueResult};

/// Requests per minute assumed when a service entry omits the rate.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;

/// Rate limit settings for one external service.
///
/// Only `requests_per_minute` and `burst` drive the token bucket. The
/// remaining keys are accepted so a shared rate-limit file validates, but
/// the scheduler does not enforce them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceRateLimit {
    pub requests_per_minute: Option<u32>,
    pub burst: Option<u32>,
    pub requests_per_hour: Option<u32>,
    pub requests_per_day: Option<u32>,
    pub tokens_per_minute: Option<u32>,
}

impl ServiceRateLimit {
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute: Some(requests_per_minute),
            ..Default::default()
        }
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = Some(burst);
        self
    }

    /// Effective refill rate: the configured value, or 60/minute when unset.
    pub fn effective_requests_per_minute(&self) -> u32 {
        self.requests_per_minute.unwrap_or(DEFAULT_REQUESTS_PER_MINUTE)
    }

    /// Effective bucket capacity: the configured burst, or the rate when unset.
    pub fn effective_burst(&self) -> u32 {
        self.burst.unwrap_or_else(|| self.effective_requests_per_minute())
    }

    fn validate(&self, service: &str) -> QueueResult<()> {
        if self.burst == Some(0) && self.effective_requests_per_minute() > 0 {
            return Err(QueueError::invalid_config(format!(
                "{}: burst must be at least 1 when rate limiting is enabled",
                service
            )));
        }
        for (key, value) in [
            ("requests_per_hour", self.requests_per_hour),
            ("requests_per_day", self.requests_per_day),
            ("tokens_per_minute", self.tokens_per_minute),
        ] {
            if value == Some(0) {
                return Err(QueueError::invalid_config(format!(
                    "{}: {} must be positive",
                    service, key
                )));
            }
        }
        Ok(())
    }
}

/// Rate limits for every throttled service, keyed by service name.
///
/// A service missing from the map is unthrottled.
///
/// ```yaml
/// services:
///   youtube_api:
///     requests_per_minute: 30
///     burst: 5
///   openai_api:
///     requests_per_minute: 20
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub services: BTreeMap<String, ServiceRateLimit>,
}

impl RateLimitConfig {
    /// Parse a YAML document. An empty document yields an empty config.
    pub fn from_yaml_str(contents: &str) -> QueueResult<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file. A missing file means no service is throttled.
    pub fn load(path: &Path) -> QueueResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No rate limit file, services unthrottled");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Add or replace one service (builder style).
    pub fn with_service(mut self, name: impl Into<String>, limit: ServiceRateLimit) -> Self {
        self.services.insert(name.into(), limit);
        self
    }

    pub fn validate(&self) -> QueueResult<()> {
        for (name, limit) in &self.services {
            if name.trim().is_empty() {
                return Err(QueueError::invalid_config("service name must not be empty"));
            }
            limit.validate(name)?;
        }
        Ok(())
    }
}

/// Configuration for the scheduler.
///
/// Use [`SchedulerConfig::builder()`] for ergonomic construction, or
/// [`SchedulerConfig::default()`] for the reference defaults (no throttled
/// services, no handler deadline).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Per-service token bucket settings.
    pub rate_limits: RateLimitConfig,

    /// How long a drain pass waits on an empty queue before returning.
    pub idle_wait: Duration,

    /// First backoff step while waiting for a token.
    pub backoff_base: Duration,

    /// Cap on the backoff step.
    pub backoff_max: Duration,

    /// Deadline for a single handler call (`None` = unbounded).
    pub handler_timeout: Option<Duration>,

    /// Service every item is throttled against.
    pub base_service: String,

    /// Additional service throttled for items that request a summary.
    pub summarization_service: String,

    /// `max_retries` recorded on new items.
    pub max_retries: u32,

    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            rate_limits: RateLimitConfig::default(),
            idle_wait: Duration::from_millis(50),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(5),
            handler_timeout: None,
            base_service: "youtube_api".to_string(),
            summarization_service: "openai_api".to_string(),
            max_retries: 3,
            event_capacity: 256,
        }
    }
}

impl SchedulerConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }

    pub fn validate(&self) -> QueueResult<()> {
        self.rate_limits.validate()?;
        if self.backoff_base > self.backoff_max {
            return Err(QueueError::invalid_config(format!(
                "backoff_base ({:?}) exceeds backoff_max ({:?})",
                self.backoff_base, self.backoff_max
            )));
        }
        if self.handler_timeout == Some(Duration::ZERO) {
            return Err(QueueError::invalid_config("handler_timeout must be non-zero"));
        }
        if self.event_capacity == 0 {
            return Err(QueueError::invalid_config("event_capacity must be at least 1"));
        }
        Ok(())
    }

    /// Services an item must be admitted through, in acquisition order.
    pub fn services_for(&self, summarize: bool) -> Vec<&str> {
        let mut services = vec![self.base_service.as_str()];
        if summarize {
            services.push(self.summarization_service.as_str());
        }
        services
    }
}

/// Builder for [`SchedulerConfig`].
#[derive(Default)]
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    pub fn with_rate_limits(mut self, rate_limits: RateLimitConfig) -> Self {
        self.config.rate_limits = rate_limits;
        self
    }

    /// Throttle one service (adds to any limits already set).
    pub fn with_service_limit(mut self, name: impl Into<String>, limit: ServiceRateLimit) -> Self {
        self.config.rate_limits.services.insert(name.into(), limit);
        self
    }

    pub fn with_idle_wait(mut self, wait: Duration) -> Self {
        self.config.idle_wait = wait;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.config.backoff_base = base;
        self.config.backoff_max = max;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.config.handler_timeout = Some(timeout);
        self
    }

    pub fn with_base_service(mut self, name: impl Into<String>) -> Self {
        self.config.base_service = name.into();
        self
    }

    pub fn with_summarization_service(mut self, name: impl Into<String>) -> Self {
        self.config.summarization_service = name.into();
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.config.max_retries = max;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Build the final [`SchedulerConfig`]. Validation happens when the
    /// scheduler is constructed.
    pub fn build(self) -> SchedulerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
services:
  youtube_api:
    requests_per_minute: 30
    burst: 5
  openai_api:
    requests_per_minute: 20
    tokens_per_minute: 90000
"#;
        let config = RateLimitConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.services.len(), 2);
        let yt = &config.services["youtube_api"];
        assert_eq!(yt.effective_requests_per_minute(), 30);
        assert_eq!(yt.effective_burst(), 5);
        let openai = &config.services["openai_api"];
        assert_eq!(openai.effective_burst(), 20);
    }

    #[test]
    fn test_defaults_when_unset() {
        let limit = ServiceRateLimit::default();
        assert_eq!(limit.effective_requests_per_minute(), 60);
        assert_eq!(limit.effective_burst(), 60);
    }

    #[test]
    fn test_empty_yaml_is_empty_config() {
        assert!(RateLimitConfig::from_yaml_str("").unwrap().services.is_empty());
        assert!(RateLimitConfig::from_yaml_str("services: {}\n")
            .unwrap()
            .services
            .is_empty());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let yaml = "services:\n  youtube_api:\n    requests_per_second: 3\n";
        let err = RateLimitConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, QueueError::Yaml(_)));
    }

    #[test]
    fn test_zero_burst_rejected() {
        let yaml = "services:\n  youtube_api:\n    requests_per_minute: 10\n    burst: 0\n";
        let err = RateLimitConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, QueueError::InvalidConfig(_)));
    }

    #[test]
    fn test_zero_rate_allowed() {
        let yaml = "services:\n  youtube_api:\n    requests_per_minute: 0\n";
        let config = RateLimitConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(
            config.services["youtube_api"].effective_requests_per_minute(),
            0
        );
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = RateLimitConfig::load(&dir.path().join("absent.yaml")).unwrap();
        assert!(config.services.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "services:\n  youtube_api:\n    requests_per_minute: 12").unwrap();
        let config = RateLimitConfig::load(file.path()).unwrap();
        assert_eq!(
            config.services["youtube_api"].requests_per_minute,
            Some(12)
        );
    }

    #[test]
    fn test_builder() {
        let config = SchedulerConfig::builder()
            .with_service_limit("youtube_api", ServiceRateLimit::per_minute(60).with_burst(1))
            .with_handler_timeout(Duration::from_secs(30))
            .with_max_retries(5)
            .build();
        assert_eq!(config.rate_limits.services.len(), 1);
        assert_eq!(config.handler_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.backoff_base, Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_services_for() {
        let config = SchedulerConfig::default();
        assert_eq!(config.services_for(false), vec!["youtube_api"]);
        assert_eq!(config.services_for(true), vec!["youtube_api", "openai_api"]);
    }

    #[test]
    fn test_invalid_backoff_rejected() {
        let config = SchedulerConfig::builder()
            .with_backoff(Duration::from_secs(10), Duration::from_secs(1))
            .build();
        assert!(matches!(
            config.validate(),
            Err(QueueError::InvalidConfig(_))
        ));
    }
}
