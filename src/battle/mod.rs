//! Battle execution: upstream clients, the round executor, the run engine
//! and the multi-match scheduler.

pub mod client;
pub mod engine;
pub mod executor;
pub mod judge;
pub mod scheduler;
pub mod table;

pub use client::{AgentClient, HttpAgentClient, create_http_client, extract_text};
pub use engine::{RunEngine, RunPlan};
pub use executor::{Contestant, Matchup, RetryPolicy, RoundExecutor, RoundOutcome};
pub use judge::{Exchange, HttpJudge, Judge, KeywordJudge};
pub use scheduler::{
    ManualPair, MultiMode, MultiStarted, Scheduler, StartBattle, StartMulti, plan_pairs,
};
pub use table::{RunHandle, RunTable};
