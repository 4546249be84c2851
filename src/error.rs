//! Error types for `capsule-arena`
//!
//! One hierarchy covers the whole engine: upstream (attacker, defender,
//! judge) failures, persistence failures, mutation conflicts, lookups and
//! request validation. The HTTP layer and the CLI both map from here.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `capsule-arena` CLI operations.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (bind failure, unreadable file)
    pub const IO_ERROR: i32 = 3;

    /// Upstream error (attacker, defender or judge unreachable)
    pub const UPSTREAM_ERROR: i32 = 4;

    /// Persistence error (run record could not be written)
    pub const PERSISTENCE_ERROR: i32 = 5;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `capsule-arena` operations.
#[derive(Debug, Error)]
pub enum ArenaError {
    /// An attacker, defender or judge call failed.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// A run record could not be durably written or read.
    #[error(transparent)]
    Persistence(#[from] StoreError),

    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Another mutation of the same capsule is still in flight.
    #[error("mutation already in progress for {capsule_id}")]
    MutationInProgress {
        /// Capsule id (or role guard key) holding the mutation slot
        capsule_id: String,
    },

    /// Unknown run or capsule id.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up (`run`, `capsule`)
        kind: &'static str,
        /// The id that did not resolve
        id: String,
    },

    /// Request shape or value rejected.
    #[error("{0}")]
    Validation(String),

    /// The run has not reached a terminal state yet.
    #[error("run {run_id} is not terminal (status: {status})")]
    RunNotTerminal {
        /// Run id
        run_id: String,
        /// Current status
        status: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ArenaError {
    /// Shorthand for an unknown run id.
    #[must_use]
    pub fn run_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "run",
            id: id.into(),
        }
    }

    /// Shorthand for an unknown capsule id.
    #[must_use]
    pub fn capsule_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "capsule",
            id: id.into(),
        }
    }

    /// Returns the taxonomy name of this error.
    ///
    /// The set of names is closed, so it is safe to use as a metrics label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Upstream(UpstreamError::Unavailable { .. }) => "upstream_unavailable",
            Self::Upstream(UpstreamError::Malformed { .. }) => "malformed_response",
            Self::Persistence(_) => "persistence_failure",
            Self::MutationInProgress { .. } => "mutation_in_progress",
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) | Self::Json(_) => "validation_error",
            Self::RunNotTerminal { .. } => "run_not_terminal",
            Self::Config(_) | Self::Yaml(_) => "config_error",
            Self::Io(_) => "io_error",
        }
    }

    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Upstream(_) => ExitCode::UPSTREAM_ERROR,
            Self::Persistence(_) => ExitCode::PERSISTENCE_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
            Self::Validation(_) | Self::Json(_) => ExitCode::USAGE_ERROR,
            Self::MutationInProgress { .. } | Self::NotFound { .. } | Self::RunNotTerminal { .. } => {
                ExitCode::ERROR
            }
        }
    }
}

// ============================================================================
// Upstream Errors
// ============================================================================

/// Which external collaborator a call was addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamTarget {
    /// The attacking capsule
    Attacker,
    /// The defending capsule
    Defender,
    /// The breach judge
    Judge,
}

impl UpstreamTarget {
    /// Stable lowercase name, also used as a metrics label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Attacker => "attacker",
            Self::Defender => "defender",
            Self::Judge => "judge",
        }
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure talking to an attacker, defender or judge endpoint.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// Endpoint unreachable, timed out, or answered with a non-2xx status.
    #[error("{target} unavailable: {message}")]
    Unavailable {
        /// Which collaborator failed
        target: UpstreamTarget,
        /// What went wrong
        message: String,
    },

    /// Endpoint answered with a payload we cannot interpret.
    #[error("malformed response from {target}: {message}")]
    Malformed {
        /// Which collaborator failed
        target: UpstreamTarget,
        /// What was wrong with the payload
        message: String,
    },
}

impl UpstreamError {
    /// Which collaborator this failure belongs to.
    #[must_use]
    pub const fn target(&self) -> UpstreamTarget {
        match self {
            Self::Unavailable { target, .. } | Self::Malformed { target, .. } => *target,
        }
    }
}

// ============================================================================
// Persistence Errors
// ============================================================================

/// Durable run-record storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("persistence failure for {run_id}: {source}")]
    Io {
        /// Run whose record was being accessed
        run_id: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Record could not be encoded or decoded
    #[error("persistence failure for {run_id}: corrupt record: {source}")]
    Codec {
        /// Run whose record was being accessed
        run_id: String,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },

    /// Backend refused the write
    #[error("persistence failure for {run_id}: {message}")]
    Rejected {
        /// Run whose record was being written
        run_id: String,
        /// Backend message
        message: String,
    },
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}: {}", summarize(.errors))]
    ValidationError {
        /// Path to the configuration file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Environment variable referenced in configuration is not set
    #[error("environment variable '{var}' not set ({message})")]
    EnvVarNotSet {
        /// Name of the environment variable
        var: String,
        /// Message attached to the `${VAR:?message}` reference
        message: String,
    },
}

fn summarize(errors: &[ValidationIssue]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Dotted path to the problematic field (e.g., "executor.max_attempts")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Prevents the configuration from being used
    Error,
    /// Logged, does not prevent loading
    Warning,
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `capsule-arena` operations.
pub type Result<T> = std::result::Result<T, ArenaError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::SUCCESS, 0);
        assert_eq!(ExitCode::ERROR, 1);
        assert_eq!(ExitCode::CONFIG_ERROR, 2);
        assert_eq!(ExitCode::IO_ERROR, 3);
        assert_eq!(ExitCode::UPSTREAM_ERROR, 4);
        assert_eq!(ExitCode::PERSISTENCE_ERROR, 5);
        assert_eq!(ExitCode::USAGE_ERROR, 64);
        assert_eq!(ExitCode::INTERRUPTED, 130);
        assert_eq!(ExitCode::TERMINATED, 143);
    }

    #[test]
    fn upstream_kinds_follow_taxonomy() {
        let unavailable: ArenaError = UpstreamError::Unavailable {
            target: UpstreamTarget::Defender,
            message: "connection refused".into(),
        }
        .into();
        assert_eq!(unavailable.kind(), "upstream_unavailable");
        assert_eq!(unavailable.exit_code(), ExitCode::UPSTREAM_ERROR);

        let malformed: ArenaError = UpstreamError::Malformed {
            target: UpstreamTarget::Judge,
            message: "missing breach".into(),
        }
        .into();
        assert_eq!(malformed.kind(), "malformed_response");
        assert!(malformed.to_string().contains("judge"));
    }

    #[test]
    fn persistence_error_exit_code() {
        let err: ArenaError = StoreError::Rejected {
            run_id: "r1".into(),
            message: "disk full".into(),
        }
        .into();
        assert_eq!(err.kind(), "persistence_failure");
        assert_eq!(err.exit_code(), ExitCode::PERSISTENCE_ERROR);
        assert!(err.to_string().contains("r1"));
    }

    #[test]
    fn not_found_display() {
        let err = ArenaError::run_not_found("abc");
        assert_eq!(err.to_string(), "run not found: abc");
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn mutation_in_progress_display() {
        let err = ArenaError::MutationInProgress {
            capsule_id: "cap-7".into(),
        };
        assert!(err.to_string().contains("cap-7"));
        assert_eq!(err.kind(), "mutation_in_progress");
    }

    #[test]
    fn test_config_error_exit_code() {
        let err: ArenaError = ConfigError::MissingFile {
            path: PathBuf::from("/test"),
        }
        .into();
        assert_eq!(err.exit_code(), ExitCode::CONFIG_ERROR);
    }

    #[test]
    fn test_validation_issue_display() {
        let issue = ValidationIssue {
            path: "executor.max_attempts".to_string(),
            message: "must be at least 1".to_string(),
            severity: Severity::Error,
        };
        assert_eq!(
            issue.to_string(),
            "error: must be at least 1 at executor.max_attempts"
        );
    }

    #[test]
    fn validation_error_lists_issues() {
        let err = ConfigError::ValidationError {
            path: "arena.yaml".into(),
            errors: vec![ValidationIssue {
                path: "battle.max_concurrency".into(),
                message: "must be at least 1".into(),
                severity: Severity::Error,
            }],
        };
        let text = err.to_string();
        assert!(text.contains("arena.yaml"));
        assert!(text.contains("battle.max_concurrency"));
    }
}
