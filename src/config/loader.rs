//! Configuration loader
//!
//! Loading pipeline:
//! 1. Environment variable expansion (pre-parse, on raw text)
//! 2. YAML parsing and typed deserialization
//! 3. `ARENA_*` environment overrides
//! 4. Command-line overrides
//! 5. Validation

use std::path::{Path, PathBuf};

use crate::config::schema::{ArenaConfig, StorageBackend};
use crate::config::validation::validate;
use crate::error::ConfigError;

/// Maximum configuration file size in bytes.
const MAX_CONFIG_SIZE: u64 = 1024 * 1024;

/// Overrides supplied on the command line. They win over file and env.
#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    /// Replaces `server.bind`.
    pub bind: Option<String>,
    /// Replaces `storage.data_dir`.
    pub data_dir: Option<PathBuf>,
    /// Replaces `storage.backend`.
    pub backend: Option<StorageBackend>,
}

/// Result of loading a configuration.
#[derive(Debug)]
pub struct LoadResult {
    /// The loaded and validated configuration.
    pub config: ArenaConfig,

    /// Warnings encountered during loading.
    pub warnings: Vec<LoadWarning>,
}

/// Warning during configuration loading.
#[derive(Debug, Clone)]
pub struct LoadWarning {
    /// Warning message.
    pub message: String,

    /// Location where the warning occurred.
    pub location: Option<String>,
}

/// Configuration loader.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: LoaderOptions,
}

impl ConfigLoader {
    /// Creates a loader applying the given command-line overrides.
    #[must_use]
    pub const fn new(options: LoaderOptions) -> Self {
        Self { options }
    }

    /// Loads configuration from `path`, or from defaults when `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, YAML parsing fails,
    /// a required environment variable is missing, or validation fails.
    pub fn load(&self, path: Option<&Path>) -> Result<LoadResult, ConfigError> {
        let mut warnings = Vec::new();

        let mut config = match path {
            Some(path) => {
                let (config, substitution_warnings) = parse_file(path)?;
                warnings.extend(substitution_warnings);
                config
            }
            None => ArenaConfig::default(),
        };

        apply_env_overrides(&mut config, |name| std::env::var(name).ok());
        self.apply_cli_overrides(&mut config);

        let result = validate(&config);
        if result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: path.map_or_else(|| "<defaults>".to_string(), |p| p.display().to_string()),
                errors: result.errors,
            });
        }
        warnings.extend(result.warnings.into_iter().map(|issue| LoadWarning {
            message: issue.message,
            location: Some(issue.path),
        }));

        Ok(LoadResult { config, warnings })
    }

    fn apply_cli_overrides(&self, config: &mut ArenaConfig) {
        if let Some(bind) = &self.options.bind {
            config.server.bind.clone_from(bind);
        }
        if let Some(dir) = &self.options.data_dir {
            config.storage.data_dir.clone_from(dir);
        }
        if let Some(backend) = self.options.backend {
            config.storage.backend = backend;
        }
    }
}

fn parse_file(path: &Path) -> Result<(ArenaConfig, Vec<LoadWarning>), ConfigError> {
    let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
        path: path.to_path_buf(),
    })?;
    if metadata.len() > MAX_CONFIG_SIZE {
        return Err(ConfigError::ParseError {
            path: path.to_path_buf(),
            line: None,
            message: format!(
                "file is {} bytes, limit is {MAX_CONFIG_SIZE}",
                metadata.len()
            ),
        });
    }

    let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
        path: path.to_path_buf(),
    })?;
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(&raw);

    let mut env_sub = EnvSubstitution::new();
    let substituted = env_sub.substitute(raw, path)?;

    // An empty file means "all defaults".
    if substituted.trim().is_empty() {
        return Ok((ArenaConfig::default(), env_sub.warnings));
    }

    let config: ArenaConfig =
        serde_yaml::from_str(&substituted).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            line: e.location().map(|l| l.line()),
            message: e.to_string(),
        })?;

    Ok((config, env_sub.warnings))
}

/// Applies `ARENA_*` overrides read through `lookup`.
///
/// Unparsable numeric values are ignored and the configured value kept.
pub fn apply_env_overrides<F>(config: &mut ArenaConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(bind) = lookup("ARENA_BIND") {
        config.server.bind = bind;
    }
    if let Some(dir) = lookup("ARENA_DATA_DIR") {
        config.storage.data_dir = PathBuf::from(dir);
    }
    if let Some(url) = lookup("ARENA_JUDGE_URL") {
        config.judge.url = if url.is_empty() { None } else { Some(url) };
    }
    config.executor.max_attempts = env_or(&lookup, "ARENA_MAX_ATTEMPTS", config.executor.max_attempts);
    config.battle.default_concurrency =
        env_or(&lookup, "ARENA_CONCURRENCY", config.battle.default_concurrency);
}

fn env_or<T, F>(lookup: &F, name: &str, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ============================================================================
// Environment Variable Substitution
// ============================================================================

/// Pre-parse environment variable substitution.
///
/// Runs on raw YAML text BEFORE parsing to preserve type inference.
struct EnvSubstitution {
    warnings: Vec<LoadWarning>,
}

impl EnvSubstitution {
    const fn new() -> Self {
        Self {
            warnings: Vec::new(),
        }
    }

    /// Substitutes environment variables in raw YAML text.
    ///
    /// Supports:
    /// - `${VAR}` - expand to value (empty string if unset with warning)
    /// - `${VAR:-default}` - expand to default if unset
    /// - `${VAR:?message}` - fail if unset
    /// - `$$` - literal `$`
    fn substitute(&mut self, raw_yaml: &str, source_path: &Path) -> Result<String, ConfigError> {
        let mut result = String::with_capacity(raw_yaml.len());
        let mut chars = raw_yaml.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' {
                result.push(c);
                continue;
            }
            match chars.peek() {
                Some('$') => {
                    chars.next();
                    result.push('$');
                }
                Some('{') => {
                    chars.next();
                    let spec = parse_var_spec(&mut chars, source_path)?;
                    match std::env::var(&spec.name) {
                        Ok(value) => result.push_str(&value),
                        Err(_) => match spec.fallback {
                            Fallback::Default(default) => result.push_str(&default),
                            Fallback::Required(message) => {
                                return Err(ConfigError::EnvVarNotSet {
                                    var: spec.name,
                                    message,
                                });
                            }
                            Fallback::None => {
                                self.warnings.push(LoadWarning {
                                    message: format!(
                                        "Environment variable '{}' is not set, using empty string",
                                        spec.name
                                    ),
                                    location: Some(source_path.display().to_string()),
                                });
                            }
                        },
                    }
                }
                _ => result.push(c),
            }
        }

        Ok(result)
    }
}

enum Fallback {
    None,
    Default(String),
    Required(String),
}

struct VarSpec {
    name: String,
    fallback: Fallback,
}

/// Parses the inside of `${...}`; the opening brace is already consumed.
fn parse_var_spec(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    source_path: &Path,
) -> Result<VarSpec, ConfigError> {
    let mut name = String::new();

    while let Some(c) = chars.next() {
        match c {
            '}' => {
                return Ok(VarSpec {
                    name,
                    fallback: Fallback::None,
                });
            }
            ':' if matches!(chars.peek(), Some('-' | '?')) => {
                let marker = chars.next();
                let tail = read_until_close(chars, source_path)?;
                let fallback = if marker == Some('-') {
                    Fallback::Default(tail)
                } else {
                    Fallback::Required(tail)
                };
                return Ok(VarSpec { name, fallback });
            }
            _ => name.push(c),
        }
    }

    Err(unclosed(source_path, &name))
}

/// Reads content until the matching `}`, handling nested braces.
fn read_until_close(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    source_path: &Path,
) -> Result<String, ConfigError> {
    let mut value = String::new();
    let mut depth = 1;

    for c in chars.by_ref() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(value);
                }
            }
            _ => {}
        }
        value.push(c);
    }

    Err(unclosed(source_path, &value))
}

fn unclosed(source_path: &Path, fragment: &str) -> ConfigError {
    ConfigError::ParseError {
        path: source_path.to_path_buf(),
        line: None,
        message: format!("Unclosed environment variable reference: ${{{fragment}"),
    }
}
