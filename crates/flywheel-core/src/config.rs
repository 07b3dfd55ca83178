//! Flywheel configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{FlywheelError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FlywheelConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Tasks registered by the daemon at startup.
    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskEntry>,
}

impl FlywheelConfig {
    /// Load config from the default path (~/.flywheel/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FlywheelError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| FlywheelError::Config(format!("Failed to parse config: {e}")))?;
        config.scheduler.validate()?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| FlywheelError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".flywheel")
            .join("config.toml")
    }

    /// Get the Flywheel home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".flywheel")
    }
}

/// Engine-wide scheduler settings. Set at startup, mutable at runtime
/// through the scheduler facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on concurrently running task bodies.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,
    /// Timeout applied to tasks that don't set their own.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Retry attempts applied to tasks that don't set their own.
    #[serde(default = "default_retry_attempts")]
    pub default_retry_attempts: u32,
    /// Fixed pause between a failed attempt and its retry.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Trigger clock resolution.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// How many recent execution records to keep for the dashboard stream.
    #[serde(default = "default_log_capacity")]
    pub execution_log_capacity: usize,
}

fn default_max_concurrent() -> usize { 4 }
fn default_timeout_secs() -> u64 { 300 }
fn default_retry_attempts() -> u32 { 2 }
fn default_retry_backoff_ms() -> u64 { 3000 }
fn default_tick_interval_ms() -> u64 { 1000 }
fn default_log_capacity() -> usize { 100 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent(),
            default_timeout_secs: default_timeout_secs(),
            default_retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            execution_log_capacity: default_log_capacity(),
        }
    }
}

impl SchedulerConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(FlywheelError::Validation(
                "max_concurrent_tasks must be >= 1".into(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(FlywheelError::Validation(
                "tick_interval_ms must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// One task declared in the config file. The daemon maps these to task
/// definitions with shell-command bodies at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEntry {
    /// Explicit id. Generated when empty.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Cron expression ("0 8 * * *"). Mutually exclusive with `every_secs`.
    #[serde(default)]
    pub cron: Option<String>,
    /// IANA timezone for cron evaluation (default UTC).
    #[serde(default)]
    pub timezone: Option<String>,
    /// Fixed interval in seconds. Mutually exclusive with `cron`.
    #[serde(default)]
    pub every_secs: Option<u64>,
    /// Shell command to run when the task fires.
    pub command: String,
    /// "critical", "high", "normal", or "low".
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry_limit: Option<u32>,
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

fn default_priority() -> String { "normal".into() }
fn bool_true() -> bool { true }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_concurrent_tasks, 4);
        assert_eq!(config.default_timeout_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = SchedulerConfig {
            max_concurrent_tasks: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [scheduler]
            max_concurrent_tasks = 8

            [[task]]
            id = "nightly-backup"
            cron = "0 2 * * *"
            command = "backup.sh"
            priority = "high"
            retry_limit = 3
        "#;
        let config: FlywheelConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scheduler.max_concurrent_tasks, 8);
        // Unset fields fall back to serde defaults
        assert_eq!(config.scheduler.tick_interval_ms, 1000);
        assert_eq!(config.tasks.len(), 1);
        assert_eq!(config.tasks[0].id, "nightly-backup");
        assert_eq!(config.tasks[0].priority, "high");
        assert!(config.tasks[0].enabled);
        assert!(config.tasks[0].every_secs.is_none());
    }
}
