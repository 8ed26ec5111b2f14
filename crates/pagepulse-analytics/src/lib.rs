//! PagePulse analytics ingestion.
//!
//! Pulls per-page view and engagement metrics from the external
//! reporting service over a rolling day window, filters the sample
//! client-side, and hands clean `ViewSample`s to the goal pipeline.
//!
//! The reporting service is treated purely as "date range + dimension +
//! metrics in, rows out" (`ReportClient`); nothing here depends on a
//! vendor query language beyond that shape.

pub mod client;
pub mod config;
pub mod ingest;
pub mod testing;

pub use client::{HttpReportClient, ReportClient, ReportQuery, ReportRow};
pub use config::{AnalyticsConfig, Clock, FixedClock, RetryPolicy, SystemClock};
pub use ingest::ReportIngestor;

use serde::{Deserialize, Serialize};

/// One cleaned per-page sample, produced per ingestion call.
///
/// Ephemeral: derived from a response row, never persisted individually.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSample {
    pub path: String,
    pub views: u64,
    pub avg_engagement_secs: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Missing/invalid identifiers or parameters. Fatal, never retried.
    #[error("configuration error: {0}")]
    Config(String),
    /// Service signalled rate limiting. Retried with backoff.
    #[error("rate limited by reporting service (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },
    /// Service temporarily unavailable (5xx). Retried with backoff.
    #[error("reporting service unavailable: {0}")]
    Unavailable(String),
    /// Any other service failure. Propagated without retry.
    #[error("reporting service error: {0}")]
    Api(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ReportError {
    /// Transient errors are the only ones worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Unavailable(_))
    }
}
