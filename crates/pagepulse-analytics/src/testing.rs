//! Scripted report client for tests.
//!
//! Lets callers queue per-call outcomes (rows or errors) and inspect
//! the queries the ingestor actually issued.

use crate::client::{ReportClient, ReportQuery, ReportRow};
use crate::ReportError;
use async_trait::async_trait;
use std::sync::Mutex;

type ScriptedResult = Result<Vec<ReportRow>, ReportError>;

/// Replays a fixed script of results, one per `run_report` call.
///
/// Once the script is down to its last entry that result, success or
/// error, is repeated for every further call (an empty script always
/// answers with no rows), so pagination and retry loops terminate
/// naturally.
pub struct ScriptedReportClient {
    script: Mutex<Vec<ScriptedResult>>,
    queries: Mutex<Vec<ReportQuery>>,
}

impl ScriptedReportClient {
    pub fn new(script: Vec<ScriptedResult>) -> Self {
        Self {
            script: Mutex::new(script),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with the same rows.
    pub fn always(rows: Vec<ReportRow>) -> Self {
        Self::new(vec![Ok(rows)])
    }

    /// Queries issued so far, in order.
    pub fn queries(&self) -> Vec<ReportQuery> {
        self.queries.lock().expect("queries lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.queries.lock().expect("queries lock").len()
    }
}

#[async_trait]
impl ReportClient for ScriptedReportClient {
    async fn run_report(&self, query: &ReportQuery) -> Result<Vec<ReportRow>, ReportError> {
        self.queries.lock().expect("queries lock").push(query.clone());

        let mut script = self.script.lock().expect("script lock");
        if script.len() > 1 {
            return script.remove(0);
        }
        match script.first() {
            Some(Ok(rows)) => Ok(rows.clone()),
            Some(Err(e)) => Err(clone_error(e)),
            None => Ok(Vec::new()),
        }
    }
}

fn clone_error(e: &ReportError) -> ReportError {
    match e {
        ReportError::Config(s) => ReportError::Config(s.clone()),
        ReportError::RateLimited { retry_after_secs } => ReportError::RateLimited {
            retry_after_secs: *retry_after_secs,
        },
        ReportError::Unavailable(s) => ReportError::Unavailable(s.clone()),
        ReportError::Api(s) => ReportError::Api(s.clone()),
        ReportError::Network(s) => ReportError::Network(s.clone()),
        ReportError::InvalidResponse(s) => ReportError::InvalidResponse(s.clone()),
    }
}

/// Convenience constructor for a raw response row.
pub fn row(path: &str, views: u64, engagement_secs: f64) -> ReportRow {
    ReportRow {
        path: path.to_string(),
        views,
        engagement_secs,
    }
}
