//! Report ingestion: window computation, filtering, retry, pagination.

use crate::client::{ReportClient, ReportQuery, ReportRow};
use crate::config::{Clock, RetryPolicy};
use crate::{ReportError, ViewSample};
use chrono::Duration as ChronoDuration;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Device categories kept when bot traffic is excluded.
///
/// Coarse heuristic, not actual bot detection: real browsers report
/// one of these, most crawlers report none.
const HUMAN_DEVICE_CATEGORIES: [&str; 3] = ["desktop", "mobile", "tablet"];

/// Pulls path-level view metrics and turns them into clean samples.
pub struct ReportIngestor {
    client: Arc<dyn ReportClient>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl ReportIngestor {
    pub fn new(client: Arc<dyn ReportClient>, retry: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            retry,
            clock,
        }
    }

    /// Fetch view samples for the window `[today - days, yesterday]`.
    ///
    /// `filter` is applied client-side against each returned path (the
    /// service has no server-side regex filtering); non-matching and
    /// zero-view rows are dropped. Transient service errors are retried
    /// per the injected `RetryPolicy`.
    pub async fn fetch_views(
        &self,
        days: u32,
        filter: &str,
        exclude_bot_traffic: bool,
    ) -> Result<Vec<ViewSample>, ReportError> {
        let pattern = self.validate(days, filter)?;
        let query = self.build_query(days, exclude_bot_traffic, None, None);

        let rows = self.run_report_with_retry(&query).await?;
        debug!(rows = rows.len(), days, "report fetched");
        Ok(Self::clean(rows, &pattern))
    }

    /// Paginated variant for large result sets.
    ///
    /// Fetches fixed-size pages by offset, accumulating matches, and
    /// stops when a page comes back short or empty.
    pub async fn fetch_views_paged(
        &self,
        days: u32,
        filter: &str,
        exclude_bot_traffic: bool,
        page_size: u32,
    ) -> Result<Vec<ViewSample>, ReportError> {
        let pattern = self.validate(days, filter)?;
        if page_size == 0 {
            return Err(ReportError::Config("page size must be > 0".to_string()));
        }

        let mut samples = Vec::new();
        let mut offset = 0u32;
        loop {
            let query = self.build_query(days, exclude_bot_traffic, Some(page_size), Some(offset));
            let rows = self.run_report_with_retry(&query).await?;
            let fetched = rows.len();
            samples.extend(Self::clean(rows, &pattern));

            if fetched < page_size as usize {
                break;
            }
            offset += page_size;
        }

        debug!(samples = samples.len(), days, "paged report fetched");
        Ok(samples)
    }

    fn validate(&self, days: u32, filter: &str) -> Result<Regex, ReportError> {
        if days == 0 {
            return Err(ReportError::Config("days must be > 0".to_string()));
        }
        Regex::new(filter)
            .map_err(|e| ReportError::Config(format!("invalid path filter `{filter}`: {e}")))
    }

    fn build_query(
        &self,
        days: u32,
        exclude_bot_traffic: bool,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> ReportQuery {
        let today = self.clock.today();
        ReportQuery {
            start_date: today - ChronoDuration::days(days as i64),
            end_date: today - ChronoDuration::days(1),
            device_categories: exclude_bot_traffic.then(|| {
                HUMAN_DEVICE_CATEGORIES
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            }),
            limit,
            offset,
        }
    }

    /// Run one report query, retrying transient failures with backoff.
    async fn run_report_with_retry(
        &self,
        query: &ReportQuery,
    ) -> Result<Vec<ReportRow>, ReportError> {
        let mut attempt = 1u32;
        loop {
            match self.client.run_report(query).await {
                Ok(rows) => return Ok(rows),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let mut delay = self.retry.delay_for(attempt);
                    if let ReportError::RateLimited { retry_after_secs } = &e {
                        delay = delay.max(Duration::from_secs(*retry_after_secs));
                    }
                    warn!(attempt, ?delay, error = %e, "transient report failure, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Apply the path filter, drop zero-view rows, and average engagement.
    fn clean(rows: Vec<ReportRow>, pattern: &Regex) -> Vec<ViewSample> {
        rows.into_iter()
            .filter(|r| r.views > 0 && pattern.is_match(&r.path))
            .map(|r| {
                // views > 0 by the filter above.
                let avg = (r.engagement_secs / r.views as f64).round() as u64;
                ViewSample {
                    path: r.path,
                    views: r.views,
                    avg_engagement_secs: avg,
                }
            })
            .collect()
    }
}
