//! Post-run evolution: pick a capsule from a finished run and mutate it.

pub mod controller;
pub mod resolve;

pub use controller::{Decision, Evaluation, EvolutionController, EvolutionResult, EvolveRequest, decide};
pub use resolve::resolve_target;
