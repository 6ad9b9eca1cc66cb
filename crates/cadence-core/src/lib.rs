//! `cadence-core`: identifiers, configuration and errors shared by the
//! Cadence scheduler crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::{CadenceConfig, LoggingConfig, SchedulerSettings, SupersedePolicy};
pub use error::{CadenceError, Result};
pub use types::JobId;
