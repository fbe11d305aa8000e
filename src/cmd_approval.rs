//! Approval inbox subcommands.

use std::error::Error;

use cronwarden_protocols::{ApprovalRequestId, ApprovalStatus};

use crate::cli::ApprovalAction;
use crate::services::Services;

/// Handle approval subcommands.
pub(crate) async fn handle_approval_command(
    services: &Services,
    action: ApprovalAction,
) -> Result<(), Box<dyn Error>> {
    match action {
        ApprovalAction::List { pending } => approval_list(services, pending).await,
        ApprovalAction::Approve { id, actor } => {
            approval_resolve(services, &id, ApprovalStatus::Approved, &actor).await
        }
        ApprovalAction::Reject { id, actor } => {
            approval_resolve(services, &id, ApprovalStatus::Rejected, &actor).await
        }
    }
}

async fn approval_list(services: &Services, pending_only: bool) -> Result<(), Box<dyn Error>> {
    let records: Vec<_> = services
        .inbox
        .list()
        .await?
        .into_iter()
        .filter(|r| !pending_only || r.status == ApprovalStatus::Pending)
        .collect();

    if records.is_empty() {
        println!("No approval requests.");
        return Ok(());
    }

    println!(
        "{:<40} {:<38} {:<10} {:<20} {}",
        "REQUEST", "JOB", "STATUS", "REQUESTED", "APPROVERS"
    );
    println!("{}", "-".repeat(120));
    for record in records {
        println!(
            "{:<40} {:<38} {:<10} {:<20} {}",
            record.request_id,
            record.job_id,
            format!("{:?}", record.status),
            record.requested_at.format("%Y-%m-%d %H:%M:%S"),
            record.approvers.join(",")
        );
    }
    Ok(())
}

async fn approval_resolve(
    services: &Services,
    id: &ApprovalRequestId,
    status: ApprovalStatus,
    actor: &str,
) -> Result<(), Box<dyn Error>> {
    let record = services.inbox.resolve(id, status, actor).await?;
    println!("Request {} for job {} is now {:?}", id, record.job_id, status);

    // Pick the decision up right away instead of waiting for the next tick.
    match services.orchestrator.resume_pending().await {
        Ok(changed) => {
            for deployment in changed.iter().filter(|d| d.job_id == record.job_id) {
                println!(
                    "  deployment {} of version {} to {} is {}",
                    deployment.deployment_id,
                    deployment.version,
                    deployment.environment,
                    deployment.status
                );
            }
        }
        Err(e) => println!("  deployments will be updated by the scheduler: {}", e),
    }
    Ok(())
}
