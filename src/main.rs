//! Cronwarden - versioned, gated scheduling of recurring jobs
//!
//! Main entry point for the cronwarden CLI and scheduler.

mod adapters;
mod cli;
mod cmd_approval;
mod cmd_job;
mod cmd_run;
mod cmd_schedule;
mod services;

use clap::Parser;
use tracing::warn;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt, layer::Layered, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use cronwarden_config::{ConfigLoader, ConfigValidator, LoggingConfig};

use crate::cli::{Cli, Commands};
use crate::services::Services;

/// Set up console logging plus an optional daily rolling log file.
fn init_tracing(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let file_layer: Option<Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>> = if config.file_enabled {
        std::fs::create_dir_all(&config.directory)?;

        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("cronwarden")
            .filename_suffix("log")
            .max_log_files(30) // Keep 30 days of logs
            .build(&config.directory)?;

        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // Dropping the guard stops the writer thread.
        static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
            std::sync::OnceLock::new();
        let _ = GUARD.set(guard);

        let layer = if config.json {
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_ansi(false)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .boxed()
        };
        Some(layer)
    } else {
        None
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        // Console layer
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(true)
                .with_writer(std::io::stderr),
        )
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = ConfigLoader::load_or_default(cli.config.as_deref())?;
    let warnings = ConfigValidator::validate(&config).into_result()?;

    init_tracing(&config.logging)?;
    for warning in warnings {
        warn!("Config {}: {}", warning.path, warning.message);
    }

    match cli.command {
        Commands::Validate { expression } => cmd_schedule::validate_expression(&expression),
        Commands::Next {
            expression,
            timezone,
            after,
            count,
            calendar,
        } => cmd_schedule::next_fire_times(
            &config,
            &expression,
            &timezone,
            after,
            count,
            calendar.as_deref(),
        ),
        Commands::Job { action } => {
            let services = Services::open(&config).await?;
            cmd_job::handle_job_command(&services, action).await
        }
        Commands::Deploy {
            id,
            version,
            env,
            actor,
        } => {
            let services = Services::open(&config).await?;
            cmd_run::deploy(&services, &id, version, env, &actor).await
        }
        Commands::Deployments { id } => {
            let services = Services::open(&config).await?;
            cmd_run::list_deployments(&services, &id).await
        }
        Commands::Approval { action } => {
            let services = Services::open(&config).await?;
            cmd_approval::handle_approval_command(&services, action).await
        }
        Commands::Run => {
            let services = Services::open(&config).await?;
            cmd_run::run_scheduler(&services).await
        }
    }
}
