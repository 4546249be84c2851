//! `config check` handler.

use crate::cli::args::ConfigCheckArgs;
use crate::config::{ConfigLoader, LoadResult, LoaderOptions};
use crate::error::ArenaError;

/// Load and validate a configuration, optionally printing the result.
///
/// # Errors
///
/// Returns a config error if the file cannot be read, parsed or validated.
pub fn check(args: &ConfigCheckArgs) -> Result<(), ArenaError> {
    let source = args
        .config
        .as_deref()
        .map_or_else(|| "<defaults>".to_string(), |p| p.display().to_string());
    tracing::info!(file = %source, "validating configuration");

    let loader = ConfigLoader::new(LoaderOptions::default());
    let LoadResult { config, warnings } = loader.load(args.config.as_deref())?;
    log_warnings(&warnings);

    if args.print {
        print!("{}", serde_yaml::to_string(&config)?);
    }

    tracing::info!(file = %source, "configuration valid");
    Ok(())
}

pub(super) fn log_warnings(warnings: &[crate::config::LoadWarning]) {
    for warning in warnings {
        tracing::warn!(
            location = warning.location.as_deref().unwrap_or("<unknown>"),
            "{}",
            warning.message
        );
    }
}
