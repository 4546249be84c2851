//! Capsule registry seam.
//!
//! The engine only needs to list, fetch, register and mutate capsules; where
//! the records live is somebody else's problem. [`MemoryRegistry`] is the
//! in-process implementation the server ships with.

pub mod memory;
pub mod mutation;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Capsule, CapsuleRole, NewCapsule};

pub use memory::MemoryRegistry;
pub use mutation::{ATTACK_EXPLORE, DEFENSE_HARDEN, MutationRequest};

/// Read/write access to capsule records.
#[async_trait]
pub trait CapsuleRegistry: Send + Sync {
    /// All capsules in registration order.
    async fn list(&self) -> Result<Vec<Capsule>>;

    /// One capsule, or `None` if the id is unknown.
    async fn get(&self, id: &str) -> Result<Option<Capsule>>;

    /// Registers a capsule and assigns its id.
    async fn create(&self, new: NewCapsule) -> Result<Capsule>;

    /// The capsule a mutation without an explicit target applies to: the
    /// oldest enabled capsule of `role`.
    async fn select_target(&self, role: CapsuleRole) -> Result<Option<Capsule>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|c| c.enabled && c.role == role))
    }

    /// Derives and registers a mutated capsule.
    ///
    /// Returns `Ok(None)` when no target id was given and no enabled
    /// capsule of the target role exists.
    ///
    /// # Errors
    ///
    /// `NotFound` if an explicit target id is unknown.
    async fn mutate(&self, request: &MutationRequest) -> Result<Option<Capsule>>;
}
