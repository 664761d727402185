//! RSP Validator Common Library
//!
//! Data model, configuration and fixture readers shared by the validator
//! crates.

pub mod config;
pub mod error;
pub mod fixtures;
pub mod query;
pub mod scenario;
pub mod timer;

// Re-export commonly used types
pub use config::{ApiEndpoint, CapabilityIncludes, Config, ServiceApp};
pub use error::{Error, Result};
pub use fixtures::{TaplintLimits, TaplintMaximums};
pub use query::{AggregateResults, QueryResult, QuerySpec, STATUS_OK};
pub use scenario::{QueryMode, Scenario, TapApplication};

/// Validator version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Home directory of the current user
pub fn home_dir() -> Option<std::path::PathBuf> {
    std::env::var_os("HOME").map(std::path::PathBuf::from)
}
