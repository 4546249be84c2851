//! CLI command dispatch
//!
//! Routes parsed CLI arguments to the appropriate command handler.

pub mod config;
pub mod serve;
pub mod version;

use tokio_util::sync::CancellationToken;

use crate::cli::args::{Cli, Commands, ConfigSubcommand};
use crate::error::ArenaError;

/// Dispatch a parsed CLI invocation to the appropriate command handler.
///
/// # Errors
///
/// Returns an error if the dispatched command handler fails.
pub async fn dispatch(cli: Cli, cancel: CancellationToken) -> Result<(), ArenaError> {
    match cli.command {
        Commands::Serve(args) => serve::run(&args, cancel).await,
        Commands::Config(cmd) => match cmd.subcommand {
            ConfigSubcommand::Check(args) => config::check(&args),
        },
        Commands::Version(args) => {
            version::run(&args);
            Ok(())
        }
    }
}
