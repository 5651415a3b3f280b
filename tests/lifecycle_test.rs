use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use pgkeep::config::types::Settings;
use pgkeep::error::{LifecycleError, RemoteError};
use pgkeep::executor::remote::{RemoteExec, RemoteOutput};
use pgkeep::resource::descriptor::{Destination, ResourceDescriptor, Server, DATA_MOUNT_PATH};
use pgkeep::resource::lifecycle::{lifecycle_state, LifecycleCoordinator, LifecycleState};
use pgkeep::state::backend::{
    EnvironmentVariableStore, PersistentVolumeStore, ScheduledBackupStore, StateBackend,
    TagAssociationStore,
};
use pgkeep::state::models::{
    EnvironmentVariable, PersistentVolume, ResourceFilter, ScheduledBackup, Tag,
};
use pgkeep::state::sqlite::SqliteBackend;

/// Records every command; fails those containing `fail_on`.
#[derive(Default)]
struct RecordingExec {
    commands: Mutex<Vec<String>>,
    fail_on: Option<String>,
}

impl RecordingExec {
    fn failing_on(pattern: &str) -> Self {
        Self {
            commands: Mutex::new(vec![]),
            fail_on: Some(pattern.to_string()),
        }
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteExec for RecordingExec {
    async fn execute(
        &self,
        commands: &[String],
        server: &Server,
        _interactive: bool,
    ) -> Result<RemoteOutput, RemoteError> {
        self.commands.lock().unwrap().extend(commands.iter().cloned());
        if let Some(ref pattern) = self.fail_on {
            if let Some(cmd) = commands.iter().find(|c| c.contains(pattern.as_str())) {
                return Err(RemoteError::CommandFailed {
                    server: server.name.clone(),
                    command: cmd.clone(),
                    exit_code: 1,
                    message: "no such volume".to_string(),
                });
            }
        }
        Ok(RemoteOutput::default())
    }
}

/// Sqlite backend whose volume inserts always fail.
struct VolumelessBackend {
    inner: SqliteBackend,
}

#[async_trait]
impl PersistentVolumeStore for VolumelessBackend {
    async fn create_persistent_volume(&self, volume: &PersistentVolume) -> Result<()> {
        bail!("volume store unavailable for '{}'", volume.name)
    }

    async fn list_persistent_volumes(&self, resource_id: &str) -> Result<Vec<PersistentVolume>> {
        self.inner.list_persistent_volumes(resource_id).await
    }

    async fn delete_persistent_volumes(&self, resource_id: &str) -> Result<usize> {
        self.inner.delete_persistent_volumes(resource_id).await
    }
}

#[async_trait]
impl ScheduledBackupStore for VolumelessBackend {
    async fn create_scheduled_backup(&self, backup: &ScheduledBackup) -> Result<()> {
        self.inner.create_scheduled_backup(backup).await
    }

    async fn list_scheduled_backups(&self, resource_id: &str) -> Result<Vec<ScheduledBackup>> {
        self.inner.list_scheduled_backups(resource_id).await
    }

    async fn delete_scheduled_backups(&self, resource_id: &str) -> Result<usize> {
        self.inner.delete_scheduled_backups(resource_id).await
    }
}

#[async_trait]
impl EnvironmentVariableStore for VolumelessBackend {
    async fn set_environment_variable(
        &self,
        resource_id: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        self.inner.set_environment_variable(resource_id, key, value).await
    }

    async fn list_environment_variables(
        &self,
        resource_id: &str,
    ) -> Result<Vec<EnvironmentVariable>> {
        self.inner.list_environment_variables(resource_id).await
    }

    async fn delete_environment_variables(&self, resource_id: &str) -> Result<usize> {
        self.inner.delete_environment_variables(resource_id).await
    }
}

#[async_trait]
impl TagAssociationStore for VolumelessBackend {
    async fn attach_tag(&self, resource_id: &str, name: &str) -> Result<Tag> {
        self.inner.attach_tag(resource_id, name).await
    }

    async fn list_tags(&self, resource_id: &str) -> Result<Vec<Tag>> {
        self.inner.list_tags(resource_id).await
    }

    async fn detach_all_tags(&self, resource_id: &str) -> Result<usize> {
        self.inner.detach_all_tags(resource_id).await
    }
}

#[async_trait]
impl StateBackend for VolumelessBackend {
    async fn initialize(&self) -> Result<()> {
        self.inner.initialize().await
    }

    async fn upsert_server(&self, server: &Server) -> Result<()> {
        self.inner.upsert_server(server).await
    }

    async fn get_server(&self, id_or_name: &str) -> Result<Option<Server>> {
        self.inner.get_server(id_or_name).await
    }

    async fn list_servers(&self) -> Result<Vec<Server>> {
        self.inner.list_servers().await
    }

    async fn insert_resource(&self, resource: &ResourceDescriptor) -> Result<()> {
        self.inner.insert_resource(resource).await
    }

    async fn get_resource(&self, uuid: &str) -> Result<Option<ResourceDescriptor>> {
        self.inner.get_resource(uuid).await
    }

    async fn save_resource(&self, resource: &ResourceDescriptor) -> Result<()> {
        self.inner.save_resource(resource).await
    }

    async fn list_resources(&self, filter: &ResourceFilter) -> Result<Vec<ResourceDescriptor>> {
        self.inner.list_resources(filter).await
    }

    async fn delete_resource(&self, uuid: &str) -> Result<()> {
        self.inner.delete_resource(uuid).await
    }
}

struct Harness {
    backend: Arc<dyn StateBackend>,
    exec: Arc<RecordingExec>,
    coordinator: LifecycleCoordinator,
    server: Server,
}

async fn harness_with(exec: RecordingExec) -> Harness {
    let backend = SqliteBackend::open_memory().unwrap();
    harness_over(Arc::new(backend), exec).await
}

async fn harness_over(backend: Arc<dyn StateBackend>, exec: RecordingExec) -> Harness {
    backend.initialize().await.unwrap();

    let server = Server::new("edge-1", "203.0.113.7");
    backend.upsert_server(&server).await.unwrap();

    let exec = Arc::new(exec);
    let coordinator = LifecycleCoordinator::new(
        Arc::clone(&backend),
        Arc::clone(&exec) as Arc<dyn RemoteExec>,
        &Settings::default(),
    );
    Harness {
        backend,
        exec,
        coordinator,
        server,
    }
}

async fn harness() -> Harness {
    harness_with(RecordingExec::default()).await
}

async fn create_database(h: &Harness, name: &str) -> ResourceDescriptor {
    let db = ResourceDescriptor::new(
        name,
        Destination::StandaloneDocker {
            server: h.server.clone(),
        },
    );
    h.coordinator.create(&db).await.unwrap();
    h.backend.get_resource(&db.uuid).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_create_provisions_default_volume() {
    let h = harness().await;
    let db = create_database(&h, "orders").await;

    let volumes = h.backend.list_persistent_volumes(&db.id).await.unwrap();
    assert_eq!(volumes.len(), 1);
    let volume = &volumes[0];
    assert_eq!(volume.name, format!("postgres-data-{}", db.uuid));
    assert_eq!(volume.mount_path, DATA_MOUNT_PATH);
    assert!(volume.host_path.is_none());
    assert!(volume.is_readonly);

    // Running the hook again does not add a second record.
    let again = h.coordinator.on_created(&db).await.unwrap();
    assert_eq!(again.id, volume.id);
    assert_eq!(h.backend.list_persistent_volumes(&db.id).await.unwrap().len(), 1);

    assert_eq!(lifecycle_state(&db), LifecycleState::Created);
    assert!(h.exec.commands().is_empty());
}

#[tokio::test]
async fn test_create_rolls_back_when_hook_fails() {
    let backend = VolumelessBackend {
        inner: SqliteBackend::open_memory().unwrap(),
    };
    let h = harness_over(Arc::new(backend), RecordingExec::default()).await;
    let db = ResourceDescriptor::new(
        "orders",
        Destination::StandaloneDocker {
            server: h.server.clone(),
        },
    );

    let err = h.coordinator.create(&db).await.unwrap_err();
    let rendered = format!("{:#}", err);
    assert!(rendered.contains(&db.uuid));
    assert!(rendered.contains("volume store unavailable"));

    assert!(h.backend.get_resource(&db.uuid).await.unwrap().is_none());
    assert!(h.backend.list_persistent_volumes(&db.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_update_status_stamps_only_on_change() {
    let h = harness().await;
    let db = create_database(&h, "orders").await;

    let (updated, changed) = h
        .coordinator
        .update_status(&db.uuid, "running (healthy)")
        .await
        .unwrap();
    assert!(changed);
    let stamped = updated.last_online_at().unwrap();

    let stored = h.backend.get_resource(&db.uuid).await.unwrap().unwrap();
    assert_eq!(stored.real_status(), "running:healthy");
    assert_eq!(stored.last_online_at(), Some(stamped));
    assert_eq!(lifecycle_state(&stored), LifecycleState::Active);

    let (same, changed) = h
        .coordinator
        .update_status(&db.uuid, "running:healthy")
        .await
        .unwrap();
    assert!(!changed);
    assert_eq!(same.last_online_at(), Some(stamped));
}

#[tokio::test]
async fn test_update_status_unknown_database() {
    let h = harness().await;
    let err = h
        .coordinator
        .update_status("missing", "running")
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LifecycleError>(),
        Some(LifecycleError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_drift_persist_commits_hash() {
    let h = harness().await;
    let mut db = create_database(&h, "orders").await;

    assert!(h.coordinator.is_config_drifted(&mut db, false).await.unwrap());
    let stored = h.backend.get_resource(&db.uuid).await.unwrap().unwrap();
    assert!(stored.config_hash().is_none());

    assert!(h.coordinator.is_config_drifted(&mut db, true).await.unwrap());
    let stored = h.backend.get_resource(&db.uuid).await.unwrap().unwrap();
    assert_eq!(stored.config_hash(), db.config_hash());
    assert!(stored.config_hash().is_some());

    let mut reloaded = stored;
    assert!(!h.coordinator.is_config_drifted(&mut reloaded, true).await.unwrap());

    h.backend
        .set_environment_variable(&reloaded.id, "TZ", "UTC")
        .await
        .unwrap();
    assert!(h.coordinator.is_config_drifted(&mut reloaded, false).await.unwrap());
}

#[tokio::test]
async fn test_drift_check_keeps_concurrent_status() {
    let h = harness().await;
    let mut stale = create_database(&h, "orders").await;

    h.coordinator
        .update_status(&stale.uuid, "running (healthy)")
        .await
        .unwrap();
    assert!(h.coordinator.is_config_drifted(&mut stale, true).await.unwrap());

    let stored = h.backend.get_resource(&stale.uuid).await.unwrap().unwrap();
    assert_eq!(stored.real_status(), "running:healthy");
    assert!(stored.last_online_at().is_some());
    assert!(stored.config_hash().is_some());
    assert_eq!(stale.real_status(), "running:healthy");
}

#[tokio::test]
async fn test_soft_delete_keeps_concurrent_status() {
    let h = harness().await;
    let mut stale = create_database(&h, "orders").await;

    h.coordinator
        .update_status(&stale.uuid, "running (healthy)")
        .await
        .unwrap();
    h.coordinator.soft_delete(&mut stale).await.unwrap();

    let stored = h.backend.get_resource(&stale.uuid).await.unwrap().unwrap();
    assert!(stored.is_deleted());
    assert_eq!(stored.real_status(), "running:healthy");
    assert_eq!(stored.last_online_at(), stale.last_online_at());
}

#[tokio::test]
async fn test_save_keeps_lifecycle_fields() {
    let h = harness().await;
    let mut stale = create_database(&h, "orders").await;

    h.coordinator
        .update_status(&stale.uuid, "running (healthy)")
        .await
        .unwrap();
    let mut other = h.backend.get_resource(&stale.uuid).await.unwrap().unwrap();
    h.coordinator.is_config_drifted(&mut other, true).await.unwrap();

    stale.name = "orders-renamed".to_string();
    h.coordinator.save(&mut stale).await.unwrap();

    let stored = h.backend.get_resource(&stale.uuid).await.unwrap().unwrap();
    assert_eq!(stored.name, "orders-renamed");
    assert_eq!(stored.real_status(), "running:healthy");
    assert!(stored.last_online_at().is_some());
    assert_eq!(stored.config_hash(), other.config_hash());
}

#[tokio::test]
async fn test_cascade_removes_everything_owned() {
    let h = harness().await;
    let mut db = create_database(&h, "orders").await;
    let id = db.id.clone();

    h.backend
        .create_scheduled_backup(&ScheduledBackup::new(&id, "daily"))
        .await
        .unwrap();
    h.backend
        .create_scheduled_backup(&ScheduledBackup::new(&id, "0 * * * *"))
        .await
        .unwrap();
    for (key, value) in [("TZ", "UTC"), ("LANG", "C.UTF-8"), ("PGDATA", "/data")] {
        h.backend
            .set_environment_variable(&id, key, value)
            .await
            .unwrap();
    }
    h.backend.attach_tag(&id, "prod").await.unwrap();
    h.backend.attach_tag(&id, "billing").await.unwrap();

    // A sibling database shares a tag and must keep it.
    let sibling = create_database(&h, "invoices").await;
    h.backend.attach_tag(&sibling.id, "prod").await.unwrap();

    h.coordinator.soft_delete(&mut db).await.unwrap();
    let summary = h.coordinator.on_permanently_deleted(&db).await.unwrap();

    assert_eq!(summary.persistent_volumes, 1);
    assert_eq!(summary.scheduled_backups, 2);
    assert_eq!(summary.environment_variables, 3);
    assert_eq!(summary.tags_detached, 2);

    assert!(h.backend.list_persistent_volumes(&id).await.unwrap().is_empty());
    assert!(h.backend.list_scheduled_backups(&id).await.unwrap().is_empty());
    assert!(h.backend.list_environment_variables(&id).await.unwrap().is_empty());
    assert!(h.backend.list_tags(&id).await.unwrap().is_empty());

    let sibling_tags = h.backend.list_tags(&sibling.id).await.unwrap();
    assert_eq!(sibling_tags.len(), 1);
    assert_eq!(sibling_tags[0].name, "prod");
}

#[tokio::test]
async fn test_cascade_requires_soft_delete() {
    let h = harness().await;
    let db = create_database(&h, "orders").await;

    let err = h.coordinator.on_permanently_deleted(&db).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LifecycleError>(),
        Some(LifecycleError::NotSoftDeleted { .. })
    ));
    assert_eq!(h.backend.list_persistent_volumes(&db.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_configuration_directory() {
    let h = harness().await;
    let db = create_database(&h, "orders").await;

    assert!(h.coordinator.delete_configuration_directory(&db).await.unwrap());
    assert_eq!(
        h.exec.commands(),
        vec![format!("rm -rf '/data/pgkeep/databases/{}'", db.uuid)]
    );
}

#[tokio::test]
async fn test_delete_configuration_directory_guard() {
    let h = harness().await;
    let mut db = create_database(&h, "orders").await;

    // Resolves to the parent directory once normalized.
    db.uuid = "db1/..".to_string();
    assert!(!h.coordinator.delete_configuration_directory(&db).await.unwrap());

    db.uuid = String::new();
    assert!(!h.coordinator.delete_configuration_directory(&db).await.unwrap());

    // Joining an absolute path would replace the configuration root.
    db.uuid = "/etc".to_string();
    assert!(!h.coordinator.delete_configuration_directory(&db).await.unwrap());

    db.uuid = "nested/db1".to_string();
    assert!(!h.coordinator.delete_configuration_directory(&db).await.unwrap());

    assert!(h.exec.commands().is_empty());
}

#[tokio::test]
async fn test_delete_configuration_directory_failure_names_database() {
    let h = harness_with(RecordingExec::failing_on("rm -rf")).await;
    let db = create_database(&h, "orders").await;

    let err = h
        .coordinator
        .delete_configuration_directory(&db)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Remote {
            operation: "delete_configuration_directory",
            ..
        }
    ));
    let rendered = err.to_string();
    assert!(rendered.contains(&db.uuid));
    assert!(rendered.contains("delete_configuration_directory"));
}

#[tokio::test]
async fn test_delete_volumes() {
    let h = harness().await;
    let db = create_database(&h, "orders").await;
    h.backend
        .create_persistent_volume(&PersistentVolume::new(&db.id, "orders-wal", "/wal"))
        .await
        .unwrap();

    let report = h.coordinator.delete_volumes(&db).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.removed.len(), 2);
    let commands = h.exec.commands();
    assert!(commands.contains(&format!("docker volume rm -f 'postgres-data-{}'", db.uuid)));
    assert!(commands.contains(&"docker volume rm -f 'orders-wal'".to_string()));
}

#[tokio::test]
async fn test_delete_volumes_without_volumes_is_noop() {
    let h = harness().await;
    let db = ResourceDescriptor::new(
        "bare",
        Destination::StandaloneDocker {
            server: h.server.clone(),
        },
    );
    h.backend.insert_resource(&db).await.unwrap();

    let report = h.coordinator.delete_volumes(&db).await.unwrap();
    assert!(report.removed.is_empty());
    assert!(report.is_clean());
    assert!(h.exec.commands().is_empty());
}

#[tokio::test]
async fn test_destroy_completes_despite_remote_failures() {
    let h = harness_with(RecordingExec::failing_on("docker volume rm")).await;
    let mut db = create_database(&h, "orders").await;
    h.backend
        .set_environment_variable(&db.id, "TZ", "UTC")
        .await
        .unwrap();
    h.coordinator.soft_delete(&mut db).await.unwrap();
    let id = db.id.clone();
    let uuid = db.uuid.clone();

    let report = h.coordinator.destroy(db).await.unwrap();

    assert!(report.configuration_removed);
    assert!(!report.cleanup.is_clean());
    assert_eq!(report.cleanup.failures.len(), 1);
    assert_eq!(report.cleanup.failures[0].operation, "delete_volumes");
    assert_eq!(report.cascade.persistent_volumes, 1);
    assert_eq!(report.cascade.environment_variables, 1);

    assert!(h.backend.get_resource(&uuid).await.unwrap().is_none());
    assert!(h.backend.list_persistent_volumes(&id).await.unwrap().is_empty());
    assert!(h.coordinator.locks().is_empty());
}

#[tokio::test]
async fn test_destroy_follows_stored_deletion() {
    let h = harness().await;
    let stale = create_database(&h, "orders").await;
    let uuid = stale.uuid.clone();

    let mut other = h.backend.get_resource(&uuid).await.unwrap().unwrap();
    h.coordinator.soft_delete(&mut other).await.unwrap();

    let report = h.coordinator.destroy(stale).await.unwrap();
    assert!(report.configuration_removed);
    assert_eq!(report.cascade.persistent_volumes, 1);
    assert!(h.backend.get_resource(&uuid).await.unwrap().is_none());
}

#[tokio::test]
async fn test_destroy_requires_soft_delete() {
    let h = harness().await;
    let db = create_database(&h, "orders").await;
    let uuid = db.uuid.clone();

    assert!(h.coordinator.destroy(db).await.is_err());
    assert!(h.backend.get_resource(&uuid).await.unwrap().is_some());
    assert!(h.exec.commands().is_empty());
}
