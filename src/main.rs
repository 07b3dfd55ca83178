//! # Flywheel — Priority-Aware Task Scheduler Daemon
//!
//! Loads task declarations from a TOML config, runs them as shell commands
//! on cron or interval schedules, and keeps going until Ctrl-C.
//!
//! Usage:
//!   flywheel                             # Run with ~/.flywheel/config.toml
//!   flywheel --config ./tasks.toml       # Custom config
//!   flywheel --init                      # Write a starter config and exit

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono_tz::Tz;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use flywheel_core::{FlywheelConfig, FlywheelError, TaskEntry};
use flywheel_scheduler::{
    Priority, Schedule, Scheduler, TaskBody, TaskDefinition, TaskSource,
};

#[derive(Parser)]
#[command(
    name = "flywheel",
    version,
    about = "⚙️ Flywheel — Priority-Aware Task Scheduler"
)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "~/.flywheel/config.toml")]
    config: String,

    /// Write a starter config to the config path and exit
    #[arg(long)]
    init: bool,

    /// Seconds between stats log lines (0 disables)
    #[arg(long, default_value = "60")]
    stats_interval: u64,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Runs a task as `sh -c <command>`. Non-zero exit is a failure;
/// cancellation kills the child.
struct ShellBody {
    command: String,
}

#[async_trait]
impl TaskBody for ShellBody {
    async fn run(&self, cancel: CancellationToken) -> std::result::Result<(), String> {
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("failed to spawn: {e}"))?;
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                Err("cancelled".to_string())
            }
            status = child.wait() => match status {
                Ok(s) if s.success() => Ok(()),
                Ok(s) => Err(format!("command exited with {s}")),
                Err(e) => Err(format!("wait failed: {e}")),
            }
        }
    }
}

/// Map one config entry to a definition and its shell body. The entry's
/// position supplies the id when none is declared.
fn build_task(
    entry: &TaskEntry,
    index: usize,
) -> flywheel_core::Result<(TaskDefinition, Arc<dyn TaskBody>)> {
    let schedule = match (&entry.cron, entry.every_secs) {
        (Some(_), Some(_)) => {
            return Err(FlywheelError::Validation(
                "task declares both cron and every_secs".into(),
            ));
        }
        (None, None) => {
            return Err(FlywheelError::Validation(
                "task declares neither cron nor every_secs".into(),
            ));
        }
        (Some(expr), None) => {
            let tz: Tz = match &entry.timezone {
                Some(name) => name
                    .parse()
                    .map_err(|_| FlywheelError::Validation(format!("unknown timezone '{name}'")))?,
                None => chrono_tz::UTC,
            };
            Schedule::cron_tz(expr, tz)
        }
        (None, Some(secs)) => Schedule::interval(Duration::from_secs(secs)),
    };

    let priority = Priority::parse(&entry.priority)
        .ok_or_else(|| FlywheelError::Validation(format!("unknown priority '{}'", entry.priority)))?;

    let id = if entry.id.is_empty() {
        format!("task-{index}")
    } else {
        entry.id.clone()
    };
    let mut def = TaskDefinition::new(id, schedule)
        .with_description(&entry.description)
        .with_priority(priority)
        .with_enabled(entry.enabled);
    if let Some(secs) = entry.timeout_secs {
        def = def.with_timeout(Duration::from_secs(secs));
    }
    if let Some(limit) = entry.retry_limit {
        def = def.with_retry_limit(limit);
    }
    let body: Arc<dyn TaskBody> = Arc::new(ShellBody {
        command: entry.command.clone(),
    });
    Ok((def, body))
}

/// Re-reads the config file on `restart`, so edits land without bouncing
/// the daemon.
struct ConfigTaskSource {
    path: PathBuf,
}

#[async_trait]
impl TaskSource for ConfigTaskSource {
    async fn load(&self) -> flywheel_core::Result<Vec<(TaskDefinition, Arc<dyn TaskBody>)>> {
        let config = FlywheelConfig::load_from(&self.path)?;
        config
            .tasks
            .iter()
            .enumerate()
            .map(|(index, entry)| build_task(entry, index))
            .collect()
    }
}

const STARTER_CONFIG: &str = r#"[scheduler]
max_concurrent_tasks = 4
default_timeout_secs = 300
default_retry_attempts = 2
retry_backoff_ms = 3000
tick_interval_ms = 1000

[[task]]
id = "heartbeat"
description = "Prove the scheduler is alive"
every_secs = 300
command = "date >> /tmp/flywheel-heartbeat.log"
priority = "low"

[[task]]
id = "nightly-backup"
description = "Back up the data directory"
cron = "0 2 * * *"
timezone = "UTC"
command = "echo 'backup would run here'"
priority = "high"
retry_limit = 3
"#;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "flywheel=debug,flywheel_scheduler=debug"
    } else {
        "flywheel=info,flywheel_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config_path = PathBuf::from(shellexpand::tilde(&cli.config).to_string());

    // --init: write a starter config and exit
    if cli.init {
        if config_path.exists() {
            println!("⚠️  Config already exists at {}", config_path.display());
            return Ok(());
        }
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&config_path, STARTER_CONFIG)?;
        println!("✅ Starter config written to {}", config_path.display());
        println!("   Edit it, then run `flywheel` to start the daemon.");
        return Ok(());
    }

    let config = if config_path.exists() {
        FlywheelConfig::load_from(&config_path)?
    } else {
        println!("📝 No config at {} — starting empty.", config_path.display());
        println!("   Run `flywheel --init` to create a starter config.");
        FlywheelConfig::default()
    };

    println!("⚙️ Flywheel v{}", env!("CARGO_PKG_VERSION"));
    println!("   📂 Config:       {}", config_path.display());
    println!("   🔀 Worker slots: {}", config.scheduler.max_concurrent_tasks);
    println!("   ⏱️  Tick:         {}ms", config.scheduler.tick_interval_ms);
    println!("   📋 Tasks:        {}", config.tasks.len());
    println!();

    let source = Arc::new(ConfigTaskSource {
        path: config_path.clone(),
    });
    let scheduler = Scheduler::with_source(config.scheduler.clone(), source)?;

    for (index, entry) in config.tasks.iter().enumerate() {
        let (def, body) = build_task(entry, index)?;
        let id = scheduler.schedule_task(def, body).await?;
        tracing::info!("📌 Registered task '{id}'");
    }

    scheduler.start().await;

    // Periodic stats line
    if cli.stats_interval > 0 {
        let scheduler = scheduler.clone();
        let every = Duration::from_secs(cli.stats_interval);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !scheduler.is_running() {
                    break;
                }
                let stats = scheduler.stats().await;
                tracing::info!(
                    "📊 {} task(s), {} running, {} queued | executed {} (ok {}, failed {})",
                    stats.total_tasks,
                    stats.running,
                    stats.queued,
                    stats.tasks_executed,
                    stats.tasks_completed,
                    stats.tasks_failed
                );
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    println!();
    scheduler.shutdown().await;
    // Give in-flight cycles a moment to settle before the runtime drops
    tokio::time::sleep(Duration::from_millis(200)).await;
    let stats = scheduler.stats().await;
    println!(
        "👋 Flywheel stopped after {}s — executed {} cycle(s), {} failed.",
        stats.uptime_secs, stats.tasks_executed, stats.tasks_failed
    );
    Ok(())
}
