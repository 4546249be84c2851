//! Configuration schema.
//!
//! Every section is optional in the YAML file; missing sections and fields
//! take the defaults below. Unknown keys are rejected so typos surface at
//! load time instead of silently falling back to a default.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the arena service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArenaConfig {
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Run-record persistence.
    pub storage: StorageSettings,
    /// Round Executor retry and call settings.
    pub executor: ExecutorSettings,
    /// Breach judge settings.
    pub judge: JudgeSettings,
    /// Run engine and scheduler limits.
    pub battle: BattleSettings,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    /// Address to bind, `host:port`.
    pub bind: String,
    /// Maximum accepted request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Which run-record store backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// One JSON document per run under `data_dir/battles/`.
    #[default]
    File,
    /// Process memory only; records vanish on restart.
    Memory,
}

/// Run-record persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSettings {
    /// Store backend.
    pub backend: StorageBackend,
    /// Root data directory for the file backend.
    pub data_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Round Executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorSettings {
    /// Attempts per upstream call before the round is recorded as degraded.
    pub max_attempts: u32,
    /// Timeout applied to each individual attempt.
    pub attempt_timeout_ms: u64,
    /// First retry delay; doubles on every further attempt.
    pub backoff_base_ms: u64,
    /// Upper bound for a single retry delay.
    pub backoff_max_ms: u64,
    /// Tool invoked on the attacking capsule.
    pub attacker_tool: String,
    /// Tool invoked on the defending capsule.
    pub defender_tool: String,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout_ms: 15_000,
            backoff_base_ms: 250,
            backoff_max_ms: 4_000,
            attacker_tool: "generate_attack".to_string(),
            defender_tool: "evaluate_defense".to_string(),
        }
    }
}

impl ExecutorSettings {
    /// Per-attempt timeout as a `Duration`.
    #[must_use]
    pub const fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// What a judge failure (after retries) means for the round's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeFailurePolicy {
    /// Record `breach = false`.
    #[default]
    FailOpen,
    /// Record `breach = true`.
    FailClosed,
}

impl JudgeFailurePolicy {
    /// Verdict recorded when the judge could not be reached.
    #[must_use]
    pub const fn verdict(self) -> bool {
        matches!(self, Self::FailClosed)
    }
}

/// Breach judge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JudgeSettings {
    /// Remote judge endpoint. When unset the keyword judge is used.
    pub url: Option<String>,
    /// Verdict applied when the judge fails after all attempts.
    pub failure_policy: JudgeFailurePolicy,
    /// Case-insensitive markers the keyword judge treats as a breach.
    pub breach_tokens: Vec<String>,
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            url: None,
            failure_policy: JudgeFailurePolicy::FailOpen,
            breach_tokens: ["safe=false", "safe: false", "allowed=false", "breach=true"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// How the scheduler pairs registry capsules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingPolicy {
    /// Deterministic interleaving of attackers and defenders.
    #[default]
    RoundRobin,
    /// Uniformly shuffled eligible pairs.
    Random,
}

/// Run engine and scheduler limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BattleSettings {
    /// Consecutive degraded rounds tolerated before the run fails.
    pub max_consecutive_failures: u32,
    /// Upper bound on `rounds` accepted from a request.
    pub max_rounds: u32,
    /// Concurrency used when a multi-match request omits it.
    pub default_concurrency: usize,
    /// Upper bound on the concurrency a request may ask for.
    pub max_concurrency: usize,
    /// Pairing policy for `from_registry` scheduling.
    pub pairing: PairingPolicy,
}

impl Default for BattleSettings {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            max_rounds: 10_000,
            default_concurrency: 4,
            max_concurrency: 64,
            pairing: PairingPolicy::RoundRobin,
        }
    }
}
