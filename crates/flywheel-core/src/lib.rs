//! # Flywheel Core
//!
//! Shared foundation for the Flywheel scheduler: configuration loading and
//! the error taxonomy used across the workspace.

pub mod config;
pub mod error;

pub use config::{FlywheelConfig, SchedulerConfig, TaskEntry};
pub use error::{FlywheelError, Result};
