use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{ArenaError, Result};
use crate::model::{Capsule, CapsuleRole, NewCapsule};

use super::mutation::{MutationRequest, derive_mutant};
use super::CapsuleRegistry;

/// In-process capsule registry.
///
/// Each record carries a registration sequence number so listings are
/// stable and "oldest" is well defined even when timestamps tie.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    capsules: DashMap<String, (u64, Capsule)>,
    seq: AtomicU64,
}

impl MemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, capsule: Capsule) -> Capsule {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.capsules
            .insert(capsule.id.clone(), (seq, capsule.clone()));
        capsule
    }

    fn oldest_enabled(&self, role: CapsuleRole) -> Option<Capsule> {
        self.capsules
            .iter()
            .filter(|entry| entry.value().1.enabled && entry.value().1.role == role)
            .min_by_key(|entry| entry.value().0)
            .map(|entry| entry.value().1.clone())
    }
}

#[async_trait]
impl CapsuleRegistry for MemoryRegistry {
    async fn list(&self) -> Result<Vec<Capsule>> {
        let mut all: Vec<(u64, Capsule)> = self
            .capsules
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(|(seq, _)| *seq);
        Ok(all.into_iter().map(|(_, c)| c).collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Capsule>> {
        Ok(self.capsules.get(id).map(|entry| entry.value().1.clone()))
    }

    async fn create(&self, new: NewCapsule) -> Result<Capsule> {
        if new.name.trim().is_empty() {
            return Err(ArenaError::Validation("capsule name must not be empty".into()));
        }
        let capsule = Capsule::from_new(Uuid::new_v4().to_string(), new, Utc::now());
        Ok(self.insert(capsule))
    }

    async fn select_target(&self, role: CapsuleRole) -> Result<Option<Capsule>> {
        Ok(self.oldest_enabled(role))
    }

    async fn mutate(&self, request: &MutationRequest) -> Result<Option<Capsule>> {
        let source = match &request.target_capsule_id {
            Some(id) => match self.capsules.get(id) {
                Some(entry) => entry.value().1.clone(),
                None => return Err(ArenaError::capsule_not_found(id.clone())),
            },
            None => match self.oldest_enabled(request.target_role) {
                Some(capsule) => capsule,
                None => return Ok(None),
            },
        };

        let mutant = derive_mutant(
            &source,
            &request.strategy,
            &request.reason,
            Uuid::new_v4().to_string(),
            Utc::now(),
        );
        tracing::info!(
            capsule_id = %source.id,
            mutant_id = %mutant.id,
            strategy = %request.strategy,
            "capsule mutated"
        );
        Ok(Some(self.insert(mutant)))
    }
}
