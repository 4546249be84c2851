//! Process-wide table of live runs.
//!
//! A run has a slot from the moment it is queued until its task exits. The
//! slot carries the run's cancellation token and whether its engine is
//! currently executing. Slots are owned by a [`RunHandle`]; dropping the
//! handle removes the slot, so the table never outlives a dead task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;

use crate::error::ArenaError;

#[derive(Debug)]
struct RunSlot {
    cancel: CancellationToken,
    active: AtomicBool,
}

/// Live-run registry shared by the scheduler, the status service and the
/// stop endpoint.
#[derive(Debug, Default)]
pub struct RunTable {
    slots: DashMap<String, RunSlot>,
}

impl RunTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims a slot for `run_id`.
    ///
    /// # Errors
    ///
    /// `Validation` if a live run already uses this id.
    pub fn register(self: &Arc<Self>, run_id: &str) -> Result<RunHandle, ArenaError> {
        let cancel = CancellationToken::new();
        match self.slots.entry(run_id.to_owned()) {
            Entry::Occupied(_) => {
                return Err(ArenaError::Validation(format!(
                    "run_id {run_id} already exists"
                )));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(RunSlot {
                    cancel: cancel.clone(),
                    active: AtomicBool::new(false),
                });
            }
        }
        Ok(RunHandle {
            table: Arc::clone(self),
            run_id: run_id.to_owned(),
            cancel,
        })
    }

    /// Requests cancellation. Returns `false` if the run has no live slot.
    pub fn cancel(&self, run_id: &str) -> bool {
        self.slots.get(run_id).is_some_and(|slot| {
            slot.cancel.cancel();
            true
        })
    }

    /// Whether the run's engine task is executing right now.
    #[must_use]
    pub fn is_active(&self, run_id: &str) -> bool {
        self.slots
            .get(run_id)
            .is_some_and(|slot| slot.active.load(Ordering::SeqCst))
    }

    /// Whether the run has a slot (queued or executing).
    #[must_use]
    pub fn is_live(&self, run_id: &str) -> bool {
        self.slots.contains_key(run_id)
    }

    /// Number of runs currently executing.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.active.load(Ordering::SeqCst))
            .count()
    }

    /// Number of registered runs, queued or executing.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots.len()
    }

    /// Cancels every live run, e.g. on shutdown.
    pub fn cancel_all(&self) {
        for slot in &self.slots {
            slot.cancel.cancel();
        }
    }
}

/// Ownership of one slot in the [`RunTable`].
#[derive(Debug)]
pub struct RunHandle {
    table: Arc<RunTable>,
    run_id: String,
    cancel: CancellationToken,
}

impl RunHandle {
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The run's cancellation token.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Marks the run's engine as executing.
    pub fn activate(&self) {
        if let Some(slot) = self.table.slots.get(&self.run_id) {
            slot.active.store(true, Ordering::SeqCst);
        }
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.table.slots.remove(&self.run_id);
    }
}
