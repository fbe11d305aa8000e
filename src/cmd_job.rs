//! Job subcommand handlers.

use std::error::Error;
use std::path::Path;

use cronwarden_protocols::{JobDefinition, JobId, JobSpec};
use cronwarden_store::JobFilter;

use crate::cli::JobAction;
use crate::services::Services;

/// Handle job subcommands.
pub(crate) async fn handle_job_command(
    services: &Services,
    action: JobAction,
) -> Result<(), Box<dyn Error>> {
    match action {
        JobAction::Create { file, author } => job_create(services, &file, &author).await,
        JobAction::Update {
            id,
            file,
            base,
            message,
            author,
        } => job_update(services, &id, &file, base, &message, &author).await,
        JobAction::Show {
            id,
            version,
            format,
        } => job_show(services, &id, version, &format).await,
        JobAction::History { id } => job_history(services, &id).await,
        JobAction::List { status, env, tag } => {
            let mut filter = JobFilter::new();
            if let Some(status) = status {
                filter = filter.with_status(status);
            }
            if let Some(env) = env {
                filter = filter.with_environment(env);
            }
            if let Some(tag) = tag {
                filter = filter.with_tag(tag);
            }
            job_list(services, &filter).await
        }
        JobAction::Diff { id, from, to } => job_diff(services, &id, from, to).await,
        JobAction::Rollback {
            id,
            version,
            env,
            author,
        } => {
            let pending = services
                .rollback
                .rollback_and_redeploy(&id, version, env, &author)
                .await?;
            println!(
                "Rolled back job {} from version {} to the content of version {} (now version {}).",
                id, pending.rolled_back_from, version, pending.version
            );
            for record in &pending.superseded {
                println!(
                    "  deployment {} to {} marked RolledBack",
                    record.deployment_id, record.environment
                );
            }
            println!(
                "The job is a Draft. Redeploy with: cronwarden deploy {} --version {} --env {}",
                id,
                pending.version,
                pending.environment.to_string().to_lowercase()
            );
            Ok(())
        }
        JobAction::Pause { id, actor } => {
            print_status(&services.store.pause(&id, &actor).await?);
            Ok(())
        }
        JobAction::Resume { id, actor } => {
            print_status(&services.store.resume(&id, &actor).await?);
            Ok(())
        }
        JobAction::Archive { id, actor } => {
            print_status(&services.store.archive(&id, &actor).await?);
            Ok(())
        }
    }
}

/// Read a draft spec. `.json` files are JSON, anything else is TOML.
pub(crate) fn read_draft(path: &Path) -> Result<JobSpec, Box<dyn Error>> {
    let content = std::fs::read_to_string(path)?;
    let spec = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&content)?
    } else {
        toml::from_str(&content)?
    };
    Ok(spec)
}

async fn job_create(services: &Services, file: &Path, author: &str) -> Result<(), Box<dyn Error>> {
    let spec = read_draft(file)?;
    let job = services.store.create(spec, author).await?;
    println!("Created job {} ({}) at version 1", job.id, job.spec.name);
    Ok(())
}

async fn job_update(
    services: &Services,
    id: &JobId,
    file: &Path,
    base: u32,
    message: &str,
    author: &str,
) -> Result<(), Box<dyn Error>> {
    let draft = read_draft(file)?;
    let version = services
        .store
        .save(id, base, move |spec| *spec = draft, message, author)
        .await?;
    println!("Saved job {} as version {} (status Draft)", id, version);
    Ok(())
}

async fn job_show(
    services: &Services,
    id: &JobId,
    version: Option<u32>,
    format: &str,
) -> Result<(), Box<dyn Error>> {
    let job = services.store.get(id).await?;
    let (version, spec) = match version {
        Some(v) if v != job.current_version => {
            let record = services.store.version(id, v).await?;
            (record.version, record.spec)
        }
        _ => (job.current_version, job.spec.clone()),
    };

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&spec)?);
        return Ok(());
    }

    println!("Job: {}", spec.name);
    println!("{}", "=".repeat(50));
    println!("ID:          {}", job.id);
    println!("Version:     {} (head {})", version, job.current_version);
    println!("Status:      {}", job.status);
    if let Some(description) = &spec.description {
        println!("Description: {}", description);
    }
    println!(
        "Schedule:    {} ({})",
        spec.schedule.expression, spec.schedule.timezone
    );
    if let Some(calendar) = &spec.schedule.holiday_calendar {
        println!("Holidays:    {}", calendar);
    }
    let mut command = spec.execution.command.clone();
    for arg in &spec.execution.args {
        command.push(' ');
        command.push_str(arg);
    }
    println!("Command:     {}", command);
    println!("Concurrency: {:?}", spec.execution.concurrency_policy);
    println!("Environment: {}", spec.environment);
    println!("Priority:    {}", spec.gating.queue_priority);
    if spec.gating.manual_approval_required {
        println!("Approval:    required from {}", spec.gating.approvers.join(", "));
    }
    for dependency in &spec.gating.data_dependencies {
        println!("Depends on:  {}", dependency);
    }
    if !spec.tags.is_empty() {
        println!("Tags:        {}", spec.tags.join(", "));
    }
    Ok(())
}

async fn job_history(services: &Services, id: &JobId) -> Result<(), Box<dyn Error>> {
    let job = services.store.get(id).await?;
    let history = services.store.history(id).await?;

    println!("{:<8} {:<20} {:<12} {}", "VERSION", "TIMESTAMP", "AUTHOR", "MESSAGE");
    println!("{}", "-".repeat(80));
    for record in &history {
        println!(
            "{:<8} {:<20} {:<12} {}",
            record.version,
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.author,
            record.commit_message
        );
    }
    println!(
        "{:<8} {:<20} {:<12} {} (head)",
        job.current_version,
        job.updated_at.format("%Y-%m-%d %H:%M:%S"),
        job.author,
        job.commit_message
    );
    Ok(())
}

async fn job_list(services: &Services, filter: &JobFilter) -> Result<(), Box<dyn Error>> {
    let jobs = services.store.list(filter).await?;
    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!(
        "{:<38} {:<24} {:<8} {:<10} {}",
        "ID", "NAME", "VERSION", "STATUS", "SCHEDULE"
    );
    println!("{}", "-".repeat(100));
    for job in jobs {
        println!(
            "{:<38} {:<24} {:<8} {:<10} {}",
            job.id, job.spec.name, job.current_version, job.status, job.spec.schedule.expression
        );
    }
    Ok(())
}

async fn job_diff(services: &Services, id: &JobId, from: u32, to: u32) -> Result<(), Box<dyn Error>> {
    let changes = services.store.diff(id, from, to).await?;
    if changes.is_empty() {
        println!("Versions {} and {} are identical.", from, to);
        return Ok(());
    }
    println!("Changes from version {} to {}:", from, to);
    for change in changes {
        println!("  {}", change);
    }
    Ok(())
}

fn print_status(job: &JobDefinition) {
    println!("Job {} is {}", job.id, job.status);
}
