use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::BattleRun;

use super::RunStore;

const BATTLES_DIR: &str = "battles";

/// One pretty-printed JSON file per run under `<data_dir>/battles/`.
///
/// Writes go to a unique temp file that is synced and then renamed over
/// the record, so readers never observe a torn write.
#[derive(Debug, Clone)]
pub struct FileRunStore {
    dir: PathBuf,
}

impl FileRunStore {
    /// Opens (and creates if needed) the battles directory under `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the directory cannot be created.
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let dir = data_dir.join(BATTLES_DIR);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Io {
                run_id: String::new(),
                source,
            })?;
        Ok(Self { dir })
    }

    /// Directory holding the run records.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> Option<PathBuf> {
        is_safe_id(run_id).then(|| self.dir.join(format!("{run_id}.json")))
    }
}

/// Run ids become file names; anything that could escape the directory is
/// refused.
fn is_safe_id(run_id: &str) -> bool {
    !run_id.is_empty()
        && run_id.len() <= 128
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn save(&self, run: &BattleRun) -> Result<(), StoreError> {
        let Some(path) = self.path_for(&run.run_id) else {
            return Err(StoreError::Rejected {
                run_id: run.run_id.clone(),
                message: "run id is not a valid file name".into(),
            });
        };
        let io_err = |source| StoreError::Io {
            run_id: run.run_id.clone(),
            source,
        };

        let bytes = serde_json::to_vec_pretty(run).map_err(|source| StoreError::Codec {
            run_id: run.run_id.clone(),
            source,
        })?;

        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", run.run_id, Uuid::new_v4().simple()));
        let mut file = tokio::fs::File::create(&tmp).await.map_err(io_err)?;
        file.write_all(&bytes).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);

        if let Err(source) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(source));
        }
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<BattleRun>, StoreError> {
        let Some(path) = self.path_for(run_id) else {
            return Ok(None);
        };
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    run_id: run_id.to_owned(),
                    source,
                });
            }
        };
        let mut run: BattleRun =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Codec {
                run_id: run_id.to_owned(),
                source,
            })?;
        run.recompute();
        Ok(Some(run))
    }

    async fn list(&self) -> Result<Vec<BattleRun>, StoreError> {
        let io_err = |source| StoreError::Io {
            run_id: String::new(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(io_err)?;
        let mut runs = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let name = entry.file_name();
            let Some(run_id) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            match self.load(run_id).await {
                Ok(Some(run)) => runs.push(run),
                Ok(None) => {}
                Err(e) => tracing::warn!(run_id, error = %e, "skipping unreadable run record"),
            }
        }
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.run_id.cmp(&b.run_id)));
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RunMeta, RunStatus};

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).await.unwrap();

        let mut run = BattleRun::queued("abc123".into(), RunMeta::default());
        store.save(&run).await.unwrap();
        run.transition(RunStatus::Running).unwrap();
        store.save(&run).await.unwrap();

        let loaded = store.load("abc123").await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
        assert!(dir.path().join("battles/abc123.json").exists());
    }

    #[tokio::test]
    async fn missing_and_unsafe_ids_load_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).await.unwrap();
        assert!(store.load("nope").await.unwrap().is_none());
        assert!(store.load("../etc/passwd").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_rejects_unsafe_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).await.unwrap();
        let run = BattleRun::queued("../x".into(), RunMeta::default());
        assert!(matches!(
            store.save(&run).await,
            Err(StoreError::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn list_skips_corrupt_records_and_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).await.unwrap();
        store
            .save(&BattleRun::queued("good".into(), RunMeta::default()))
            .await
            .unwrap();
        std::fs::write(store.dir().join("bad.json"), b"{not json").unwrap();
        std::fs::write(store.dir().join(".good.x.tmp"), b"partial").unwrap();

        let runs = store.list().await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, "good");
    }

    #[tokio::test]
    async fn load_restores_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).await.unwrap();
        let mut run = BattleRun::queued("r9".into(), RunMeta::default());
        run.push_round(crate::model::RoundEntry {
            round: 1,
            timestamp: chrono::Utc::now(),
            attacker_output: Some("a".into()),
            defender_output: Some("safe=false".into()),
            attacker_prompt: None,
            defender_prompt: None,
            breach: true,
            attacker_model: None,
            defender_model: None,
            attacker_id: None,
            defender_id: None,
            degraded: false,
        })
        .unwrap();
        run.breaches = 99;
        store.save(&run).await.unwrap();

        let loaded = store.load("r9").await.unwrap().unwrap();
        assert_eq!(loaded.breaches, 1);
        assert_eq!(loaded.total_rounds, 1);
    }
}
