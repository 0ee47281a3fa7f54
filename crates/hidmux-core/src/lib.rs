//! `hidmux` Core Library
//!
//! Shared functionality for `hidmux` components:
//! - Configuration resolution and hierarchy
//! - Tracing subscriber initialisation
//! - Common error types

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::{Config, LogConfig, MonitorConfig, MultiplexerConfig};
pub use error::{Error, Result};
