//! `capsule-arena` - battle orchestration and evolution for inference capsules
//!
//! Runs attacker capsules against defender capsules round by round, persists
//! every exchange, and mutates capsules based on how a finished run went.

pub mod api;
pub mod battle;
pub mod cli;
pub mod config;
pub mod error;
pub mod evolution;
pub mod model;
pub mod observability;
pub mod registry;
pub mod status;
pub mod store;
