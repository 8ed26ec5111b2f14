//! Goal computation orchestration.
//!
//! `GoalStore` wires the ingestor and the statistics engine into one
//! recompute operation and owns the append-only persistence of the
//! result. A recompute either fully succeeds (one snapshot appended)
//! or fully fails (nothing appended, error surfaced); there is no
//! partial state.

use crate::jsonl::SnapshotStore;
use crate::{GoalError, GoalSnapshot};
use pagepulse_analytics::{Clock, ReportIngestor};
use pagepulse_stats::GoalStats;
use std::sync::Arc;
use tracing::info;

/// Parameters of one recompute, stamped onto the resulting snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct GoalParams {
    pub days: u32,
    pub filter_regex: String,
    pub exclude_bot_traffic: bool,
    pub outlier_filter: bool,
}

/// Statistics persisted when a recompute matches zero pages.
///
/// Deliberate business rule, not an error path: downstream display
/// always has something to render. `sample_count: 0` marks these rows.
pub const FALLBACK_SNAPSHOT_STATS: GoalStats = GoalStats {
    mean: 150.0,
    median: 100.0,
    p90: 200.0,
    max: 300,
    base_goal: 100,
    stretch_goal: 200,
    sample_count: 0,
};

pub struct GoalStore {
    ingestor: Arc<ReportIngestor>,
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    scope: String,
}

impl GoalStore {
    pub fn new(
        ingestor: Arc<ReportIngestor>,
        store: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        scope: &str,
    ) -> Self {
        Self {
            ingestor,
            store,
            clock,
            scope: scope.to_string(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Ingest, compute, and append one snapshot.
    ///
    /// Zero matching samples persists the fallback snapshot instead of
    /// failing. Append failure is fatal for this call and carries the
    /// underlying cause; nothing is retried here. Two calls with the
    /// same parameters append two distinct rows.
    pub async fn compute_and_persist(&self, params: &GoalParams) -> Result<GoalSnapshot, GoalError> {
        let samples = self
            .ingestor
            .fetch_views(params.days, &params.filter_regex, params.exclude_bot_traffic)
            .await?;
        self.persist_from_samples(params, samples).await
    }

    /// Like `compute_and_persist` but ingesting in fixed-size pages,
    /// for properties with very large matching path sets.
    pub async fn compute_and_persist_paged(
        &self,
        params: &GoalParams,
        page_size: u32,
    ) -> Result<GoalSnapshot, GoalError> {
        let samples = self
            .ingestor
            .fetch_views_paged(
                params.days,
                &params.filter_regex,
                params.exclude_bot_traffic,
                page_size,
            )
            .await?;
        self.persist_from_samples(params, samples).await
    }

    async fn persist_from_samples(
        &self,
        params: &GoalParams,
        samples: Vec<pagepulse_analytics::ViewSample>,
    ) -> Result<GoalSnapshot, GoalError> {
        let stats = if samples.is_empty() {
            info!(scope = %self.scope, "no matching samples, using fallback goals");
            FALLBACK_SNAPSHOT_STATS
        } else {
            let counts: Vec<u64> = samples.iter().map(|s| s.views).collect();
            pagepulse_stats::compute_goals(&counts, params.outlier_filter)
        };

        let snapshot = GoalSnapshot {
            scope: self.scope.clone(),
            base_goal: stats.base_goal,
            stretch_goal: stats.stretch_goal,
            mean: stats.mean,
            median: stats.median,
            p90: stats.p90,
            max: stats.max,
            sample_count: stats.sample_count,
            range_days: params.days,
            filter_regex: params.filter_regex.clone(),
            exclude_bot_traffic: params.exclude_bot_traffic,
            outlier_filter: params.outlier_filter,
            computed_at: self.clock.now(),
        };

        self.store.append(&snapshot).await?;
        info!(
            scope = %self.scope,
            base = snapshot.base_goal,
            stretch = snapshot.stretch_goal,
            samples = snapshot.sample_count,
            "goal snapshot persisted"
        );
        Ok(snapshot)
    }

    /// Latest snapshot for the configured scope; `None` if none exists.
    pub async fn latest(&self) -> Result<Option<GoalSnapshot>, GoalError> {
        self.latest_for(&self.scope).await
    }

    pub async fn latest_for(&self, scope: &str) -> Result<Option<GoalSnapshot>, GoalError> {
        Ok(self.store.latest(scope).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use pagepulse_analytics::testing::{row, ScriptedReportClient};
    use pagepulse_analytics::{FixedClock, RetryPolicy};
    use parking_lot::Mutex;

    /// In-memory store recording appended rows.
    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<GoalSnapshot>>,
        fail_appends: bool,
    }

    #[async_trait]
    impl SnapshotStore for MemoryStore {
        async fn append(&self, snapshot: &GoalSnapshot) -> Result<(), StoreError> {
            if self.fail_appends {
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            self.rows.lock().push(snapshot.clone());
            Ok(())
        }

        async fn latest(&self, scope: &str) -> Result<Option<GoalSnapshot>, StoreError> {
            Ok(self
                .rows
                .lock()
                .iter()
                .filter(|s| s.scope == scope)
                .max_by_key(|s| s.computed_at)
                .cloned())
        }
    }

    fn goal_store(client: ScriptedReportClient, store: Arc<MemoryStore>) -> GoalStore {
        let clock = Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2025, 6, 15, 9, 0, 0).unwrap(),
        ));
        let ingestor = Arc::new(ReportIngestor::new(
            Arc::new(client),
            RetryPolicy::none(),
            clock.clone(),
        ));
        GoalStore::new(ingestor, store, clock, "columns")
    }

    fn params() -> GoalParams {
        GoalParams {
            days: 28,
            filter_regex: "^/column/".into(),
            exclude_bot_traffic: false,
            outlier_filter: false,
        }
    }

    #[tokio::test]
    async fn recompute_persists_computed_snapshot() {
        let client = ScriptedReportClient::always(vec![
            row("/column/a", 100, 100.0),
            row("/column/b", 200, 100.0),
            row("/column/c", 300, 100.0),
        ]);
        let store = Arc::new(MemoryStore::default());
        let goals = goal_store(client, store.clone());

        let snapshot = goals.compute_and_persist(&params()).await.unwrap();

        assert_eq!(snapshot.sample_count, 3);
        assert_eq!(snapshot.max, 300);
        assert_eq!(snapshot.base_goal, 200);
        assert_eq!(snapshot.range_days, 28);
        assert_eq!(snapshot.filter_regex, "^/column/");
        assert_eq!(
            snapshot.computed_at,
            Utc.with_ymd_and_hms(2025, 6, 15, 9, 0, 0).unwrap()
        );
        assert_eq!(store.rows.lock().len(), 1);
    }

    #[tokio::test]
    async fn zero_matches_persists_fallback_snapshot() {
        let client = ScriptedReportClient::always(vec![row("/about", 900, 100.0)]);
        let store = Arc::new(MemoryStore::default());
        let goals = goal_store(client, store.clone());

        let snapshot = goals.compute_and_persist(&params()).await.unwrap();

        assert_eq!(snapshot.base_goal, 100);
        assert_eq!(snapshot.stretch_goal, 200);
        assert_eq!(snapshot.mean, 150.0);
        assert_eq!(snapshot.median, 100.0);
        assert_eq!(snapshot.p90, 200.0);
        assert_eq!(snapshot.max, 300);
        assert_eq!(snapshot.sample_count, 0);
        // Persisted like any other row.
        assert_eq!(store.rows.lock().len(), 1);
        assert_eq!(goals.latest().await.unwrap().unwrap(), snapshot);
    }

    #[tokio::test]
    async fn paged_recompute_spans_pages() {
        let page1 = vec![row("/column/a", 100, 100.0), row("/column/b", 200, 100.0)];
        let page2 = vec![row("/column/c", 300, 100.0)];
        let client = ScriptedReportClient::new(vec![Ok(page1), Ok(page2)]);
        let store = Arc::new(MemoryStore::default());
        let goals = goal_store(client, store.clone());

        let snapshot = goals
            .compute_and_persist_paged(&params(), 2)
            .await
            .unwrap();

        assert_eq!(snapshot.sample_count, 3);
        assert_eq!(snapshot.max, 300);
        assert_eq!(store.rows.lock().len(), 1);
    }

    #[tokio::test]
    async fn repeat_recomputes_append_distinct_rows() {
        let client = ScriptedReportClient::always(vec![row("/column/a", 100, 100.0)]);
        let store = Arc::new(MemoryStore::default());
        let goals = goal_store(client, store.clone());

        goals.compute_and_persist(&params()).await.unwrap();
        goals.compute_and_persist(&params()).await.unwrap();

        assert_eq!(store.rows.lock().len(), 2);
    }

    #[tokio::test]
    async fn append_failure_is_fatal_and_surfaced() {
        let client = ScriptedReportClient::always(vec![row("/column/a", 100, 100.0)]);
        let store = Arc::new(MemoryStore {
            fail_appends: true,
            ..Default::default()
        });
        let goals = goal_store(client, store.clone());

        let err = goals.compute_and_persist(&params()).await.unwrap_err();
        assert!(matches!(err, GoalError::Store(StoreError::Io(_))));
        assert!(store.rows.lock().is_empty());
    }

    #[tokio::test]
    async fn ingest_failure_leaves_store_untouched() {
        let client = ScriptedReportClient::new(vec![Err(
            pagepulse_analytics::ReportError::Api("boom".into()),
        )]);
        let store = Arc::new(MemoryStore::default());
        let goals = goal_store(client, store.clone());

        let err = goals.compute_and_persist(&params()).await.unwrap_err();
        assert!(matches!(err, GoalError::Report(_)));
        assert!(store.rows.lock().is_empty());
    }

    #[tokio::test]
    async fn latest_is_none_for_empty_scope() {
        let client = ScriptedReportClient::always(vec![]);
        let goals = goal_store(client, Arc::new(MemoryStore::default()));
        assert!(goals.latest().await.unwrap().is_none());
        assert!(goals.latest_for("other").await.unwrap().is_none());
    }
}
