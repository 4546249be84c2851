//! Status/Query Service.
//!
//! Read-only views over persisted run records. Liveness (`task_active`) is
//! not trusted from disk: it is overlaid from the run table, so a record
//! left behind by a crashed process never claims a live task.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::battle::RunTable;
use crate::error::{ArenaError, Result};
use crate::evolution::Evaluation;
use crate::model::{BattleRun, RoundError, RunMeta, RunStatus, RunSummary};
use crate::store::RunStore;

/// Run projection for `GET /battle/status/{run_id}`: everything but the
/// rounds themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatusView {
    pub run_id: String,
    pub status: RunStatus,
    pub task_active: bool,
    pub attacker_id: Option<String>,
    pub defender_id: Option<String>,
    pub total_rounds: u32,
    pub breaches: u32,
    pub breach_rate: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stop_requested: bool,
    pub errors: Vec<RoundError>,
    pub failure: Option<String>,
    pub meta: RunMeta,
}

impl RunStatusView {
    fn from_run(run: BattleRun) -> Self {
        Self {
            run_id: run.run_id,
            status: run.status,
            task_active: run.task_active,
            attacker_id: run.attacker_id,
            defender_id: run.defender_id,
            total_rounds: run.total_rounds,
            breaches: run.breaches,
            breach_rate: run.breach_rate,
            created_at: run.created_at,
            started_at: run.started_at,
            finished_at: run.finished_at,
            stop_requested: run.stop_requested,
            errors: run.errors,
            failure: run.failure,
            meta: run.meta,
        }
    }
}

/// Read side of the engine.
pub struct StatusService {
    store: Arc<dyn RunStore>,
    table: Arc<RunTable>,
}

impl StatusService {
    #[must_use]
    pub fn new(store: Arc<dyn RunStore>, table: Arc<RunTable>) -> Self {
        Self { store, table }
    }

    /// Full record with rounds.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id; `Persistence` if the record is unreadable.
    pub async fn get(&self, run_id: &str) -> Result<BattleRun> {
        let mut run = self
            .store
            .load(run_id)
            .await?
            .ok_or_else(|| ArenaError::run_not_found(run_id))?;
        run.task_active = !run.status.is_terminal() && self.table.is_active(run_id);
        Ok(run)
    }

    /// Projection without rounds.
    ///
    /// # Errors
    ///
    /// Same as [`StatusService::get`].
    pub async fn status(&self, run_id: &str) -> Result<RunStatusView> {
        self.get(run_id).await.map(RunStatusView::from_run)
    }

    /// Summaries of every stored run, oldest first.
    ///
    /// # Errors
    ///
    /// `Persistence` if the store cannot be listed.
    pub async fn list(&self) -> Result<Vec<RunSummary>> {
        Ok(self.store.list().await?.iter().map(RunSummary::from).collect())
    }

    /// Evaluation summary from the best-known persisted state.
    ///
    /// # Errors
    ///
    /// Same as [`StatusService::get`].
    pub async fn evaluate(&self, run_id: &str) -> Result<Evaluation> {
        self.get(run_id).await.map(|run| Evaluation::of(&run))
    }

    /// Runs whose engine is executing right now.
    #[must_use]
    pub fn active_runs(&self) -> usize {
        self.table.active_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRunStore;

    #[tokio::test]
    async fn stale_task_active_is_not_trusted() {
        let store = Arc::new(MemoryRunStore::new());
        let table = Arc::new(RunTable::new());
        let mut run = BattleRun::queued("r1".into(), RunMeta::default());
        run.transition(RunStatus::Running).unwrap();
        assert!(run.task_active);
        store.save(&run).await.unwrap();

        let svc = StatusService::new(store, Arc::clone(&table));
        let view = svc.status("r1").await.unwrap();
        assert_eq!(view.status, RunStatus::Running);
        assert!(!view.task_active);

        let handle = table.register("r1").unwrap();
        handle.activate();
        assert!(svc.status("r1").await.unwrap().task_active);
        assert_eq!(svc.active_runs(), 1);
    }

    #[tokio::test]
    async fn terminal_record_never_reports_active_task() {
        let store = Arc::new(MemoryRunStore::new());
        let table = Arc::new(RunTable::new());
        let handle = table.register("r1").unwrap();
        handle.activate();

        let mut run = BattleRun::queued("r1".into(), RunMeta::default());
        run.transition(RunStatus::Running).unwrap();
        run.transition(RunStatus::Stopped).unwrap();
        store.save(&run).await.unwrap();

        // The engine has persisted the stop but not yet released its slot.
        let svc = StatusService::new(store, Arc::clone(&table));
        assert!(table.is_active("r1"));
        let view = svc.status("r1").await.unwrap();
        assert_eq!(view.status, RunStatus::Stopped);
        assert!(!view.task_active);
        assert!(!svc.get("r1").await.unwrap().task_active);
        drop(handle);
    }

    #[tokio::test]
    async fn unknown_run_is_not_found() {
        let svc = StatusService::new(Arc::new(MemoryRunStore::new()), Arc::new(RunTable::new()));
        let err = svc.status("ghost").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert_eq!(svc.evaluate("ghost").await.unwrap_err().kind(), "not_found");
    }

    #[tokio::test]
    async fn list_summarises_runs() {
        let store = Arc::new(MemoryRunStore::new());
        store
            .save(&BattleRun::queued("a".into(), RunMeta::default()))
            .await
            .unwrap();
        let svc = StatusService::new(store, Arc::new(RunTable::new()));
        let runs = svc.list().await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Queued);
    }
}
