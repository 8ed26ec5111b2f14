//! Reporting-service client.
//!
//! `ReportClient` is the seam the rest of the workspace depends on; the
//! HTTP implementation maps service failures onto the `ReportError`
//! taxonomy so the ingestor can decide what is worth retrying.

use crate::config::AnalyticsConfig;
use crate::ReportError;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A time-ranged, dimensioned metric query.
///
/// Dimension is always the page path; metrics are view count and total
/// engagement seconds, ordered by views descending.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Device-category allow-list; `None` means no device filtering.
    pub device_categories: Option<Vec<String>>,
    /// Page size for offset pagination; `None` fetches in one shot.
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// One raw response row: dimension value plus metric values.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReportRow {
    pub path: String,
    pub views: u64,
    /// Total engagement seconds across all views of the row.
    pub engagement_secs: f64,
}

#[derive(Debug, Deserialize)]
struct ReportResponse {
    rows: Vec<ReportRow>,
}

/// The only contract the core has with the reporting service.
#[async_trait]
pub trait ReportClient: Send + Sync {
    async fn run_report(&self, query: &ReportQuery) -> Result<Vec<ReportRow>, ReportError>;
}

/// HTTP implementation against the hosted reporting API.
pub struct HttpReportClient {
    client: reqwest::Client,
    config: AnalyticsConfig,
}

impl HttpReportClient {
    pub fn new(config: AnalyticsConfig) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ReportError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn report_url(&self) -> String {
        format!(
            "{}/v1/properties/{}/reports",
            self.config.base_url, self.config.property_id
        )
    }

    fn request_body(&self, query: &ReportQuery) -> serde_json::Value {
        let mut body = serde_json::json!({
            "date_range": {
                "start": query.start_date.format("%Y-%m-%d").to_string(),
                "end": query.end_date.format("%Y-%m-%d").to_string(),
            },
            "dimension": "page_path",
            "metrics": ["views", "engagement_secs"],
            "order_by": { "metric": "views", "desc": true },
        });
        if let Some(categories) = &query.device_categories {
            body["dimension_filter"] = serde_json::json!({
                "dimension": "device_category",
                "in": categories,
            });
        }
        if let Some(limit) = query.limit {
            body["limit"] = serde_json::json!(limit);
        }
        if let Some(offset) = query.offset {
            body["offset"] = serde_json::json!(offset);
        }
        body
    }
}

#[async_trait]
impl ReportClient for HttpReportClient {
    async fn run_report(&self, query: &ReportQuery) -> Result<Vec<ReportRow>, ReportError> {
        let response = self
            .client
            .post(self.report_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&self.request_body(query))
            .send()
            .await
            .map_err(|e| ReportError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Err(ReportError::RateLimited { retry_after_secs });
        }
        if status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(ReportError::Unavailable(format!("{status}: {text}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ReportError::Api(format!("{status}: {text}")));
        }

        let parsed: ReportResponse = response
            .json()
            .await
            .map_err(|e| ReportError::InvalidResponse(e.to_string()))?;
        Ok(parsed.rows)
    }
}
