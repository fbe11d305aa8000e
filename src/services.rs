//! Wiring of the core components and local adapters.

use std::error::Error;
use std::sync::Arc;

use tracing::{info, warn};

use cronwarden_config::Config;
use cronwarden_deploy::{
    DeploymentOrchestrator, DeploymentRepository, FileDeploymentRepository,
    MemoryDeploymentRepository, RollbackCoordinator,
};
use cronwarden_gating::{GatingConfig, GatingEvaluator, InstanceTracker};
use cronwarden_protocols::Observers;
use cronwarden_scheduler::{JobScheduler, SchedulerConfig};
use cronwarden_store::{FileJobRepository, JobDefinitionStore, JobRepository, MemoryJobRepository};

use crate::adapters::{
    ConfigHolidayCalendar, FileApprovalInbox, LocalDataOracle, LocalProcessExecutor,
    TracingAuditLog, TracingNotifier,
};

/// Everything a command needs, built from the config.
pub(crate) struct Services {
    pub store: JobDefinitionStore,
    pub gating: GatingEvaluator,
    pub orchestrator: DeploymentOrchestrator,
    pub rollback: RollbackCoordinator,
    pub inbox: Arc<FileApprovalInbox>,
    pub calendars: Arc<ConfigHolidayCalendar>,
    scheduler_config: SchedulerConfig,
}

impl Services {
    pub(crate) async fn open(config: &Config) -> Result<Self, Box<dyn Error>> {
        let port_timeout = config.gating.port_timeout();
        let observers = Observers::new(Arc::new(TracingNotifier), Arc::new(TracingAuditLog))
            .with_timeout(port_timeout);

        let (jobs, deployments): (Arc<dyn JobRepository>, Arc<dyn DeploymentRepository>) =
            if config.store.backend == "memory" {
                warn!("Using the memory store; nothing survives this process");
                (
                    Arc::new(MemoryJobRepository::new()),
                    Arc::new(MemoryDeploymentRepository::new()),
                )
            } else {
                info!("Using file store at {}", config.store.path.display());
                (
                    Arc::new(FileJobRepository::new(&config.store.path).await?),
                    Arc::new(FileDeploymentRepository::new(&config.store.path).await?),
                )
            };

        let store = JobDefinitionStore::new(jobs).with_observers(observers.clone());
        let tracker = Arc::new(InstanceTracker::new());
        let inbox = Arc::new(FileApprovalInbox::new(&config.approvals.path).await?);
        let calendars = Arc::new(ConfigHolidayCalendar::new(&config.calendars));

        let gating = GatingEvaluator::new(
            store.clone(),
            tracker.clone(),
            inbox.clone(),
            Arc::new(LocalDataOracle),
        )
        .with_config(
            GatingConfig::from_secs(
                config.gating.approval_poll_secs,
                config.gating.dependency_retry_secs,
            )
            .with_port_timeout(port_timeout),
        );

        if config.execution.dry_run {
            warn!("Dry-run execution; triggered jobs are logged and reported as succeeded");
        }
        let executor = Arc::new(LocalProcessExecutor::new(
            store.clone(),
            config.execution.dry_run,
        ));

        let orchestrator = DeploymentOrchestrator::new(
            store.clone(),
            deployments,
            inbox.clone(),
            executor,
            tracker,
        )
        .with_observers(observers)
        .with_port_timeout(port_timeout);
        let rollback = RollbackCoordinator::new(orchestrator.clone());

        let scheduler_config = SchedulerConfig::default()
            .with_tick_interval(config.scheduler.tick_interval())
            .with_max_concurrent_triggers(config.scheduler.max_concurrent_triggers)
            .with_search_horizon_days(config.scheduler.search_horizon_days);

        Ok(Self {
            store,
            gating,
            orchestrator,
            rollback,
            inbox,
            calendars,
            scheduler_config,
        })
    }

    /// Build the scheduler over these services.
    pub(crate) fn scheduler(&self) -> JobScheduler {
        JobScheduler::new(
            self.store.clone(),
            self.gating.clone(),
            self.orchestrator.clone(),
            self.calendars.clone(),
        )
        .with_config(self.scheduler_config)
    }
}
