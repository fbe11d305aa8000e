//! CLI definitions for cronwarden.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use cronwarden_protocols::{ApprovalRequestId, Environment, JobId, LifecycleStatus};

/// Cronwarden CLI.
#[derive(Parser)]
#[command(name = "cronwarden")]
#[command(about = "Versioned, gated and auditable scheduling of recurring jobs")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (default: ~/.cronwarden/config.toml)
    #[arg(short, long, env = "CRONWARDEN_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Check a schedule expression and print every field error
    Validate {
        /// Five-field expression, quoted
        expression: String,
    },

    /// Print upcoming fire times of an expression
    Next {
        expression: String,

        /// IANA timezone the expression is evaluated in
        #[arg(long, default_value = "UTC")]
        timezone: String,

        /// Start searching after this instant (RFC 3339, default: now)
        #[arg(long)]
        after: Option<DateTime<Utc>>,

        /// Number of fire times to print
        #[arg(long, default_value_t = 5)]
        count: usize,

        /// Holiday calendar from the config to skip
        #[arg(long)]
        calendar: Option<String>,
    },

    /// Job definition commands
    Job {
        #[command(subcommand)]
        action: JobAction,
    },

    /// Deploy the head version of a job into an environment
    Deploy {
        id: JobId,

        /// Version to deploy (default: the head)
        #[arg(long)]
        version: Option<u32>,

        #[arg(long, default_value = "development")]
        env: Environment,

        #[arg(long, env = "USER", default_value = "cli")]
        actor: String,
    },

    /// List deployments of a job
    Deployments { id: JobId },

    /// Approval inbox commands
    Approval {
        #[command(subcommand)]
        action: ApprovalAction,
    },

    /// Run the scheduler in the foreground until Ctrl-C
    Run,
}

#[derive(Subcommand)]
pub(crate) enum JobAction {
    /// Create a job from a TOML or JSON draft
    Create {
        /// Draft file (`.json` is read as JSON, anything else as TOML)
        file: PathBuf,

        #[arg(long, env = "USER", default_value = "cli")]
        author: String,
    },

    /// Save a new version of a job from a draft file
    Update {
        id: JobId,

        file: PathBuf,

        /// Version the edit is based on
        #[arg(long)]
        base: u32,

        #[arg(short, long)]
        message: String,

        #[arg(long, env = "USER", default_value = "cli")]
        author: String,
    },

    /// Show the head of a job
    Show {
        id: JobId,

        /// Show this version instead of the head
        #[arg(long)]
        version: Option<u32>,

        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Show the version history of a job
    History { id: JobId },

    /// List jobs
    List {
        #[arg(long)]
        status: Option<LifecycleStatus>,

        #[arg(long)]
        env: Option<Environment>,

        #[arg(long)]
        tag: Option<String>,
    },

    /// Show field changes between two versions
    Diff { id: JobId, from: u32, to: u32 },

    /// Roll a job back to an earlier version (does not redeploy)
    Rollback {
        id: JobId,

        version: u32,

        /// Environment the redeploy hint is printed for
        #[arg(long, default_value = "development")]
        env: Environment,

        #[arg(long, env = "USER", default_value = "cli")]
        author: String,
    },

    /// Disarm a scheduled job
    Pause {
        id: JobId,

        #[arg(long, env = "USER", default_value = "cli")]
        actor: String,
    },

    /// Re-arm a paused job
    Resume {
        id: JobId,

        #[arg(long, env = "USER", default_value = "cli")]
        actor: String,
    },

    /// Retire a job for good
    Archive {
        id: JobId,

        #[arg(long, env = "USER", default_value = "cli")]
        actor: String,
    },
}

#[derive(Subcommand)]
pub(crate) enum ApprovalAction {
    /// List approval requests
    List {
        /// Only show pending requests
        #[arg(long)]
        pending: bool,
    },

    /// Approve a request
    Approve {
        id: ApprovalRequestId,

        #[arg(long, env = "USER", default_value = "cli")]
        actor: String,
    },

    /// Reject a request
    Reject {
        id: ApprovalRequestId,

        #[arg(long, env = "USER", default_value = "cli")]
        actor: String,
    },
}
