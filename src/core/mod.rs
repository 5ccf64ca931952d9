//! Core configuration, error and domain types for kubepulse.
//!
//! This module contains the fundamental types shared by the telemetry
//! engine, the time-series concentrator and the CLI.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder};
pub use error::{KubepulseError, Result};
pub use types::{EdgeKey, ServiceKey};
