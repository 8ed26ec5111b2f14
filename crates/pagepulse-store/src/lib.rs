//! Goal snapshot model and persistence.
//!
//! Snapshots are immutable and append-only: a recompute never updates
//! or deletes an existing row, and the "current" snapshot for a scope
//! is simply the row with the greatest `computed_at`. Duplicate or
//! concurrent recomputes are therefore harmless: each appends its own
//! row and read time resolves the winner.

pub mod goals;
pub mod jsonl;

pub use goals::{GoalParams, GoalStore, FALLBACK_SNAPSHOT_STATS};
pub use jsonl::{JsonlSnapshotStore, SnapshotStore};

use chrono::{DateTime, Utc};
use pagepulse_analytics::ReportError;
use serde::{Deserialize, Serialize};

/// One fully-parameterized, timestamped result of a goal computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalSnapshot {
    /// Opaque partition key; compared only for equality.
    pub scope: String,
    pub base_goal: u64,
    pub stretch_goal: u64,
    pub mean: f64,
    pub median: f64,
    pub p90: f64,
    pub max: u64,
    /// Post-outlier-filter size when filtering was on, raw matching
    /// count otherwise. Zero marks a fallback snapshot.
    pub sample_count: usize,
    pub range_days: u32,
    pub filter_regex: String,
    pub exclude_bot_traffic: bool,
    pub outlier_filter: bool,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("snapshot store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure of one `compute_and_persist` call.
///
/// Either the upstream report failed (after bounded retries for
/// transient cases) or the append itself failed; an empty dataset is
/// deliberately not represented here.
#[derive(Debug, thiserror::Error)]
pub enum GoalError {
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn snapshot_round_trips_through_json() {
        let snapshot = GoalSnapshot {
            scope: "columns".into(),
            base_goal: 210,
            stretch_goal: 480,
            mean: 251.3,
            median: 210.0,
            p90: 480.0,
            max: 1200,
            sample_count: 37,
            range_days: 28,
            filter_regex: r"^/column/[^/]+/?$".into(),
            exclude_bot_traffic: true,
            outlier_filter: true,
            computed_at: Utc.with_ymd_and_hms(2025, 6, 15, 9, 30, 0).unwrap(),
        };

        let line = serde_json::to_string(&snapshot).unwrap();
        let parsed: GoalSnapshot = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
