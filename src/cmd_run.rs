//! Deployment and scheduler subcommands.

use std::error::Error;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use cronwarden_protocols::{Environment, JobId};

use crate::services::Services;

/// Deploy a job version; defaults to the head.
pub(crate) async fn deploy(
    services: &Services,
    id: &JobId,
    version: Option<u32>,
    environment: Environment,
    actor: &str,
) -> Result<(), Box<dyn Error>> {
    let version = match version {
        Some(v) => v,
        None => services.store.get(id).await?.current_version,
    };

    let record = services
        .orchestrator
        .deploy(id, version, environment, actor)
        .await?;

    match record.approval_request.as_ref().filter(|_| record.awaiting_approval()) {
        Some(request) => println!(
            "Deployment {} of version {} to {} is waiting for approval {}",
            record.deployment_id, record.version, record.environment, request
        ),
        None => println!(
            "Deployment {} of version {} to {} is {}",
            record.deployment_id, record.version, record.environment, record.status
        ),
    }
    Ok(())
}

/// List deployments of a job, newest first.
pub(crate) async fn list_deployments(services: &Services, id: &JobId) -> Result<(), Box<dyn Error>> {
    let mut records = services.orchestrator.deployments(id).await?;
    if records.is_empty() {
        println!("No deployments for job {}.", id);
        return Ok(());
    }
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    println!(
        "{:<38} {:<8} {:<12} {:<11} {:<20} {}",
        "DEPLOYMENT", "VERSION", "ENV", "STATUS", "STARTED", "REASON"
    );
    println!("{}", "-".repeat(110));
    for record in records {
        println!(
            "{:<38} {:<8} {:<12} {:<11} {:<20} {}",
            record.deployment_id,
            record.version,
            record.environment.to_string(),
            record.status.to_string(),
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.reason.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

/// Run the scheduler until Ctrl-C.
pub(crate) async fn run_scheduler(services: &Services) -> Result<(), Box<dyn Error>> {
    let scheduler = Arc::new(services.scheduler());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(scheduler.run(shutdown_rx));
    info!("Scheduler running, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }

    info!("Shutting down scheduler...");
    // The receiver is gone only if the scheduler already stopped.
    let _ = shutdown_tx.send(true);
    handle.await?;
    info!("Scheduler stopped");
    Ok(())
}
