//! Configuration module for the memo recorder.
//!
//! Provides CLI argument parsing and the settings persisted between runs.

#[allow(clippy::module_inception)]
mod config;
mod settings;

pub use config::{AppConfig, parse_volume};
pub use settings::{FormatLabel, Settings};
