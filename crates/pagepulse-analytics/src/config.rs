//! Analytics configuration, retry policy, and clock injection.
//!
//! Configuration is an explicit object validated once at construction
//! and passed into the ingestor; nothing reads process-global state at
//! call sites.

use crate::ReportError;
use chrono::{DateTime, NaiveDate, Utc};
use std::time::Duration;

/// Connection settings for the reporting service.
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// Identifies the analytics source (property) to query.
    pub property_id: String,
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl AnalyticsConfig {
    pub fn new(property_id: &str, base_url: &str, api_key: &str) -> Result<Self, ReportError> {
        let config = Self {
            property_id: property_id.trim().to_string(),
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            timeout: Duration::from_secs(30),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables:
    /// `PAGEPULSE_PROPERTY_ID`, `PAGEPULSE_ANALYTICS_KEY`, and optional
    /// `PAGEPULSE_ANALYTICS_URL`.
    pub fn from_env() -> Result<Self, ReportError> {
        let property_id = std::env::var("PAGEPULSE_PROPERTY_ID")
            .map_err(|_| ReportError::Config("PAGEPULSE_PROPERTY_ID is not set".to_string()))?;
        let api_key = std::env::var("PAGEPULSE_ANALYTICS_KEY")
            .map_err(|_| ReportError::Config("PAGEPULSE_ANALYTICS_KEY is not set".to_string()))?;
        let base_url = std::env::var("PAGEPULSE_ANALYTICS_URL")
            .unwrap_or_else(|_| "https://analyticsreporting.example.com".to_string());
        Self::new(&property_id, &base_url, &api_key)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn validate(&self) -> Result<(), ReportError> {
        if self.property_id.is_empty() {
            return Err(ReportError::Config("property id must not be empty".to_string()));
        }
        if self.api_key.is_empty() {
            return Err(ReportError::Config("api key must not be empty".to_string()));
        }
        if self.base_url.is_empty() {
            return Err(ReportError::Config("base url must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Bounded retry with capped exponential backoff.
///
/// Injected into the ingestor so transient-failure behavior is testable
/// without a live service.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No retries; the first error is final.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before re-attempting after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exp as i32);
        Duration::from_millis(millis as u64).min(self.max_backoff)
    }
}

/// Time source for date-window computation and snapshot stamping.
///
/// Injected so tests pin "today" and `computed_at` exactly.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed-instant clock for tests.
#[derive(Debug, Clone)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
