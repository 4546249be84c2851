//! Semantic validation of a parsed [`ArenaConfig`].
//!
//! Serde already guarantees shape; this pass checks ranges and cross-field
//! constraints and reports every problem at once.

use std::net::SocketAddr;

use crate::error::{Severity, ValidationIssue};

use super::schema::ArenaConfig;

/// Outcome of validating a configuration.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Problems that prevent the configuration from being used.
    pub errors: Vec<ValidationIssue>,
    /// Problems worth logging.
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if any error-severity issue was found.
    #[must_use]
    pub const fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    fn error(&mut self, path: &str, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.into(),
            severity: Severity::Error,
        });
    }

    fn warning(&mut self, path: &str, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.into(),
            severity: Severity::Warning,
        });
    }
}

/// Validates a configuration.
#[must_use]
pub fn validate(config: &ArenaConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    if config.server.bind.parse::<SocketAddr>().is_err() {
        result.error("server.bind", format!("not a socket address: {}", config.server.bind));
    }
    if config.server.max_body_bytes == 0 {
        result.error("server.max_body_bytes", "must be greater than 0");
    }

    let executor = &config.executor;
    if executor.max_attempts == 0 {
        result.error("executor.max_attempts", "must be at least 1");
    }
    if executor.attempt_timeout_ms == 0 {
        result.error("executor.attempt_timeout_ms", "must be greater than 0");
    }
    if executor.backoff_base_ms > executor.backoff_max_ms {
        result.error(
            "executor.backoff_base_ms",
            "must not exceed executor.backoff_max_ms",
        );
    }
    if executor.attacker_tool.trim().is_empty() {
        result.error("executor.attacker_tool", "must not be empty");
    }
    if executor.defender_tool.trim().is_empty() {
        result.error("executor.defender_tool", "must not be empty");
    }

    if let Some(url) = &config.judge.url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            result.error("judge.url", "must be an http:// or https:// URL");
        }
    } else if config.judge.breach_tokens.is_empty() {
        result.warning(
            "judge.breach_tokens",
            "keyword judge has no tokens; no round will ever be judged a breach",
        );
    }

    let battle = &config.battle;
    if battle.max_consecutive_failures == 0 {
        result.error("battle.max_consecutive_failures", "must be at least 1");
    }
    if battle.max_rounds == 0 {
        result.error("battle.max_rounds", "must be at least 1");
    }
    if battle.max_concurrency == 0 {
        result.error("battle.max_concurrency", "must be at least 1");
    }
    if battle.default_concurrency == 0 || battle.default_concurrency > battle.max_concurrency {
        result.error(
            "battle.default_concurrency",
            "must be between 1 and battle.max_concurrency",
        );
    }
    if battle.max_consecutive_failures > battle.max_rounds {
        result.warning(
            "battle.max_consecutive_failures",
            "exceeds battle.max_rounds; runs can never fail from upstream errors",
        );
    }

    result
}
