//! Configuration module
//!
//! Loads and validates the arena service configuration: listener, storage,
//! Round Executor retry policy, judge policy and scheduler limits.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLoader, LoadResult, LoadWarning, LoaderOptions};
pub use schema::*;
pub use validation::{ValidationResult, validate};
