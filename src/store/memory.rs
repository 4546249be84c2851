use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::StoreError;
use crate::model::BattleRun;

use super::RunStore;

/// Volatile store, used by `--memory-store` and tests.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: DashMap<String, BattleRun>,
}

impl MemoryRunStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn save(&self, run: &BattleRun) -> Result<(), StoreError> {
        self.runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<BattleRun>, StoreError> {
        Ok(self.runs.get(run_id).map(|r| r.value().clone()))
    }

    async fn list(&self) -> Result<Vec<BattleRun>, StoreError> {
        let mut runs: Vec<BattleRun> = self.runs.iter().map(|r| r.value().clone()).collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.run_id.cmp(&b.run_id)));
        Ok(runs)
    }
}
