//! Domain records shared by the engine, the store and the HTTP layer.

pub mod capsule;
pub mod run;

pub use capsule::{Capsule, CapsuleRole, NewCapsule};
pub use run::{
    BattleRun, EvolutionAudit, RoundEntry, RoundError, RunMeta, RunStatus, RunSummary,
};
