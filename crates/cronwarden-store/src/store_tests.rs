use super::*;
use async_trait::async_trait;
use cronwarden_protocols::{
    ApprovalRequestId, AuditEntry, AuditLogPort, ConcurrencyPolicy, ExecutionSpec, NoopNotifier,
    PortError, ScheduleSpec,
};
use futures::future::join_all;
use tempfile::TempDir;
use tokio::sync::Mutex;

use crate::file::FileJobRepository;

fn draft(name: &str) -> JobSpec {
    JobSpec::new(
        name,
        ScheduleSpec::new("0 * * * *"),
        ExecutionSpec::new("run.sh").with_args(["--region", "eu"]),
    )
}

#[derive(Default)]
struct RecordingAudit {
    entries: Mutex<Vec<AuditEntry>>,
}

#[async_trait]
impl AuditLogPort for RecordingAudit {
    async fn record(&self, entry: &AuditEntry) -> Result<(), PortError> {
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }
}

impl RecordingAudit {
    /// Actions recorded once `n` deliveries have landed, sorted.
    async fn actions(&self, n: usize) -> Vec<String> {
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            loop {
                {
                    let entries = self.entries.lock().await;
                    if entries.len() >= n {
                        let mut actions: Vec<String> =
                            entries.iter().map(|e| e.action.clone()).collect();
                        actions.sort();
                        return actions;
                    }
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap()
    }
}

#[tokio::test]
async fn test_create_starts_at_version_one() {
    let store = JobDefinitionStore::in_memory();
    let job = store.create(draft("hourly-sync"), "alice").await.unwrap();

    assert_eq!(job.current_version, 1);
    assert_eq!(job.status, LifecycleStatus::Draft);
    assert_eq!(job.author, "alice");
    assert!(store.history(&job.id).await.unwrap().is_empty());
    assert_eq!(store.get(&job.id).await.unwrap(), job);
}

#[tokio::test]
async fn test_create_rejects_invalid_schedule() {
    let store = JobDefinitionStore::in_memory();
    let mut spec = draft("broken");
    spec.schedule.expression = "0 25 * * *".into();

    let err = store.create(spec, "alice").await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidScheduleExpression(_)));
    assert!(store.list(&JobFilter::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_save_appends_history() {
    let store = JobDefinitionStore::in_memory();
    let job = store.create(draft("hourly-sync"), "alice").await.unwrap();

    let v2 = store
        .save(
            &job.id,
            1,
            |spec| spec.schedule.expression = "*/15 * * * *".into(),
            "every quarter hour",
            "bob",
        )
        .await
        .unwrap();
    assert_eq!(v2, 2);

    let head = store.get(&job.id).await.unwrap();
    let history = store.history(&job.id).await.unwrap();
    assert_eq!(head.current_version as usize, history.len() + 1);
    assert_eq!(head.commit_message, "every quarter hour");
    assert_eq!(head.author, "bob");
    assert_eq!(history[0].version, 1);
    assert_eq!(history[0].spec.schedule.expression, "0 * * * *");
    assert_eq!(history[0].author, "alice");
}

#[tokio::test]
async fn test_save_validates_before_writing() {
    let store = JobDefinitionStore::in_memory();
    let job = store.create(draft("hourly-sync"), "alice").await.unwrap();

    let err = store
        .save(
            &job.id,
            1,
            |spec| spec.schedule.expression = "*/0 * * * *".into(),
            "bad step",
            "bob",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::InvalidScheduleExpression(_)));
    assert_eq!(store.get(&job.id).await.unwrap().current_version, 1);
}

#[tokio::test]
async fn test_save_with_stale_base_fails() {
    let store = JobDefinitionStore::in_memory();
    let job = store.create(draft("hourly-sync"), "alice").await.unwrap();
    store
        .save(&job.id, 1, |s| s.name = "a".into(), "first", "bob")
        .await
        .unwrap();

    let err = store
        .save(&job.id, 1, |s| s.name = "b".into(), "second", "carol")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::ConcurrentModification {
            expected: 1,
            actual: 2,
            ..
        }
    ));
}

#[tokio::test]
async fn test_concurrent_saves_only_one_wins() {
    let store = JobDefinitionStore::in_memory();
    let job = store.create(draft("hourly-sync"), "alice").await.unwrap();

    let attempts = (0..8).map(|i| {
        let store = store.clone();
        let id = job.id;
        async move {
            store
                .save(
                    &id,
                    1,
                    move |s| s.description = Some(format!("edit {}", i)),
                    "edit",
                    "editor",
                )
                .await
        }
    });
    let results = join_all(attempts).await;

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(StoreError::is_conflict));

    let head = store.get(&job.id).await.unwrap();
    assert_eq!(head.current_version, 2);
    assert_eq!(store.history(&job.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_saves_on_shared_file_repository() {
    let temp_dir = TempDir::new().unwrap();
    let repo = Arc::new(FileJobRepository::new(temp_dir.path()).await.unwrap());
    let store = JobDefinitionStore::new(repo);
    let job = store.create(draft("nightly"), "alice").await.unwrap();

    let mut handles = Vec::new();
    for i in 0..4 {
        let store = store.clone();
        let id = job.id;
        handles.push(tokio::spawn(async move {
            store
                .save(&id, 1, move |s| s.tags = vec![format!("t{}", i)], "tag", "ops")
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(store.history(&job.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_save_unknown_job() {
    let store = JobDefinitionStore::in_memory();
    let err = store
        .save(&JobId::new(), 1, |_| {}, "noop", "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn test_rollback_restores_snapshot_as_new_draft() {
    let store = JobDefinitionStore::in_memory();
    let job = store.create(draft("hourly-sync"), "alice").await.unwrap();
    store
        .save(
            &job.id,
            1,
            |s| {
                s.execution.command = "run-v2.sh".into();
                s.execution.concurrency_policy = ConcurrencyPolicy::Allow;
            },
            "v2",
            "bob",
        )
        .await
        .unwrap();
    store
        .transition(&job.id, LifecycleStatus::Scheduled, "deployer")
        .await
        .unwrap();

    let version = store.rollback(&job.id, 1, "carol").await.unwrap();
    assert_eq!(version, 3);

    let head = store.get(&job.id).await.unwrap();
    let history = store.history(&job.id).await.unwrap();
    assert_eq!(head.status, LifecycleStatus::Draft);
    assert_eq!(head.current_version, 3);
    assert_eq!(head.commit_message, "Rollback to version 1");
    assert_eq!(history.len(), 2);
    assert_eq!(
        serde_json::to_vec(&head.spec.execution).unwrap(),
        serde_json::to_vec(&history[0].spec.execution).unwrap()
    );
    assert_eq!(head.spec.schedule, history[0].spec.schedule);
    // v2 stays intact in history
    assert_eq!(history[1].spec.execution.command, "run-v2.sh");
}

#[tokio::test]
async fn test_rollback_requires_version_in_history() {
    let store = JobDefinitionStore::in_memory();
    let job = store.create(draft("hourly-sync"), "alice").await.unwrap();

    for target in [1, 7] {
        let err = store.rollback(&job.id, target, "carol").await.unwrap_err();
        assert!(matches!(err, StoreError::VersionNotFound { .. }));
    }
}

#[tokio::test]
async fn test_save_disarms_scheduled_job() {
    let store = JobDefinitionStore::in_memory();
    let job = store.create(draft("hourly-sync"), "alice").await.unwrap();
    store
        .transition(&job.id, LifecycleStatus::Scheduled, "deployer")
        .await
        .unwrap();

    store
        .save(&job.id, 1, |s| s.tags.push("edited".into()), "tag", "bob")
        .await
        .unwrap();

    assert_eq!(
        store.get(&job.id).await.unwrap().status,
        LifecycleStatus::Draft
    );
}

#[tokio::test]
async fn test_transition_table() {
    let store = JobDefinitionStore::in_memory();
    let job = store.create(draft("hourly-sync"), "alice").await.unwrap();

    let err = store
        .transition(&job.id, LifecycleStatus::Running, "exec")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));

    store
        .transition(&job.id, LifecycleStatus::Scheduled, "deployer")
        .await
        .unwrap();
    assert_eq!(
        store.pause(&job.id, "ops").await.unwrap().status,
        LifecycleStatus::Paused
    );
    assert_eq!(
        store.resume(&job.id, "ops").await.unwrap().status,
        LifecycleStatus::Scheduled
    );

    // Status changes are not versions.
    let head = store.get(&job.id).await.unwrap();
    assert_eq!(head.current_version, 1);
    assert!(store.history(&job.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_archived_is_terminal() {
    let store = JobDefinitionStore::in_memory();
    let job = store.create(draft("hourly-sync"), "alice").await.unwrap();
    store
        .save(&job.id, 1, |s| s.name = "renamed".into(), "rename", "bob")
        .await
        .unwrap();
    store.archive(&job.id, "ops").await.unwrap();

    assert!(matches!(
        store.save(&job.id, 2, |_| {}, "edit", "bob").await,
        Err(StoreError::Archived(_))
    ));
    assert!(matches!(
        store.rollback(&job.id, 1, "bob").await,
        Err(StoreError::Archived(_))
    ));
    assert!(matches!(
        store.resume(&job.id, "ops").await,
        Err(StoreError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_diff_between_versions() {
    let store = JobDefinitionStore::in_memory();
    let job = store.create(draft("hourly-sync"), "alice").await.unwrap();
    store
        .save(
            &job.id,
            1,
            |s| s.schedule.expression = "*/15 * * * *".into(),
            "faster",
            "bob",
        )
        .await
        .unwrap();

    let changes = store.diff(&job.id, 1, 2).await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(
        changes[0].to_string(),
        r#"schedule.expression: "0 * * * *" -> "*/15 * * * *""#
    );

    assert!(matches!(
        store.diff(&job.id, 1, 5).await,
        Err(StoreError::VersionNotFound { version: 5, .. })
    ));
}

#[tokio::test]
async fn test_list_filters() {
    let store = JobDefinitionStore::in_memory();
    let mut tagged = draft("finance-close");
    tagged.tags = vec!["finance".into()];
    tagged.environment = Environment::Production;
    let finance = store.create(tagged, "alice").await.unwrap();
    let other = store.create(draft("cleanup"), "alice").await.unwrap();
    store
        .transition(&other.id, LifecycleStatus::Scheduled, "deployer")
        .await
        .unwrap();

    let all = store.list(&JobFilter::new()).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[0].id < all[1].id);

    let by_tag = store
        .list(&JobFilter::new().with_tag("finance"))
        .await
        .unwrap();
    assert_eq!(by_tag.len(), 1);
    assert_eq!(by_tag[0].id, finance.id);

    let prod = store
        .list(&JobFilter::new().with_environment(Environment::Production))
        .await
        .unwrap();
    assert_eq!(prod.len(), 1);

    let scheduled = store
        .list(&JobFilter::new().with_status(LifecycleStatus::Scheduled))
        .await
        .unwrap();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].id, other.id);
}

#[tokio::test]
async fn test_record_approval() {
    let store = JobDefinitionStore::in_memory();
    let job = store.create(draft("hourly-sync"), "alice").await.unwrap();
    let approval = ApprovalRef {
        request_id: ApprovalRequestId::new("req-1"),
        version: 1,
        environment: Environment::Production,
        requested_at: Utc::now(),
    };

    let head = store
        .record_approval(&job.id, Some(approval.clone()), "deployer")
        .await
        .unwrap();
    assert_eq!(head.approval_for(1), Some(&approval));
    assert_eq!(head.current_version, 1);

    let cleared = store
        .record_approval(&job.id, None, "deployer")
        .await
        .unwrap();
    assert!(cleared.approval.is_none());
}

#[tokio::test]
async fn test_observers_see_every_transition() {
    let audit = Arc::new(RecordingAudit::default());
    let store = JobDefinitionStore::in_memory()
        .with_observers(Observers::new(Arc::new(NoopNotifier), audit.clone()));

    let job = store.create(draft("hourly-sync"), "alice").await.unwrap();
    store
        .transition(&job.id, LifecycleStatus::Scheduled, "deployer")
        .await
        .unwrap();
    store
        .save(&job.id, 1, |s| s.name = "x".into(), "rename", "bob")
        .await
        .unwrap();
    store.rollback(&job.id, 1, "carol").await.unwrap();

    assert_eq!(
        audit.actions(5).await,
        vec![
            "job.created",
            "job.rolled_back",
            "job.saved",
            "job.status_changed",
            "job.status_changed",
        ]
    );
}

#[tokio::test]
async fn test_file_backed_store_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let job_id = {
        let repo = Arc::new(FileJobRepository::new(temp_dir.path()).await.unwrap());
        let store = JobDefinitionStore::new(repo);
        let job = store.create(draft("hourly-sync"), "alice").await.unwrap();
        store
            .save(&job.id, 1, |s| s.name = "renamed".into(), "rename", "bob")
            .await
            .unwrap();
        job.id
    };

    let repo = Arc::new(FileJobRepository::new(temp_dir.path()).await.unwrap());
    let store = JobDefinitionStore::new(repo);
    let head = store.get(&job_id).await.unwrap();
    assert_eq!(head.current_version, 2);
    assert_eq!(head.spec.name, "renamed");
    assert_eq!(store.version(&job_id, 1).await.unwrap().spec.name, "hourly-sync");
}

/// Archives the job through `update_head` right before passing a commit on.
struct ArchivingRepository {
    inner: Arc<dyn JobRepository>,
}

#[async_trait]
impl JobRepository for ArchivingRepository {
    async fn insert(&self, definition: &JobDefinition) -> Result<(), StoreError> {
        self.inner.insert(definition).await
    }

    async fn load(&self, id: &JobId) -> Result<Option<JobDefinition>, StoreError> {
        self.inner.load(id).await
    }

    async fn load_all(&self) -> Result<Vec<JobDefinition>, StoreError> {
        self.inner.load_all().await
    }

    async fn commit(&self, commit: &VersionCommit) -> Result<(), StoreError> {
        let head = self.inner.load(&commit.job_id()).await?.unwrap();
        let mut archived = head.clone();
        archived.status = LifecycleStatus::Archived;
        self.inner
            .update_head(head.current_version, head.status, &archived)
            .await?;
        self.inner.commit(commit).await
    }

    async fn update_head(
        &self,
        expected_version: u32,
        expected_status: LifecycleStatus,
        definition: &JobDefinition,
    ) -> Result<(), StoreError> {
        self.inner
            .update_head(expected_version, expected_status, definition)
            .await
    }

    async fn versions(&self, id: &JobId) -> Result<Vec<VersionRecord>, StoreError> {
        self.inner.versions(id).await
    }
}

async fn assert_archive_survives_save(inner: Arc<dyn JobRepository>) {
    let store = JobDefinitionStore::new(Arc::new(ArchivingRepository { inner }));
    let job = store.create(draft("nightly"), "alice").await.unwrap();

    let err = store
        .save(&job.id, 1, |spec| spec.description = Some("late edit".into()), "edit", "bob")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Archived(_)));

    let head = store.get(&job.id).await.unwrap();
    assert_eq!(head.status, LifecycleStatus::Archived);
    assert_eq!(head.current_version, 1);
    assert!(store.history(&job.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_archive_landing_before_commit_wins() {
    assert_archive_survives_save(Arc::new(MemoryJobRepository::new())).await;

    let temp_dir = TempDir::new().unwrap();
    let file = FileJobRepository::new(temp_dir.path()).await.unwrap();
    assert_archive_survives_save(Arc::new(file)).await;
}

struct HungNotifier;

#[async_trait]
impl cronwarden_protocols::NotificationPort for HungNotifier {
    async fn notify(&self, _event: &cronwarden_protocols::JobEvent) -> Result<(), PortError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_hung_notifier_does_not_block_writes() {
    let audit = Arc::new(RecordingAudit::default());
    let store = JobDefinitionStore::in_memory()
        .with_observers(Observers::new(Arc::new(HungNotifier), audit.clone()));

    let job = tokio::time::timeout(std::time::Duration::from_secs(1), async {
        let job = store.create(draft("nightly"), "alice").await.unwrap();
        store
            .save(
                &job.id,
                1,
                |spec| spec.schedule.expression = "0 3 * * *".into(),
                "later",
                "alice",
            )
            .await
            .unwrap();
        job
    })
    .await
    .unwrap();

    assert_eq!(store.get(&job.id).await.unwrap().current_version, 2);
    assert_eq!(audit.actions(2).await, vec!["job.created", "job.saved"]);
}
