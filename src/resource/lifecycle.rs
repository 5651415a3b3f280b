use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;

use super::descriptor::{ResourceDescriptor, DATA_MOUNT_PATH};
use super::fingerprint::{self, FingerprintMode};
use crate::config::types::Settings;
use crate::error::{LifecycleError, RemoteError};
use crate::executor::remote::RemoteExec;
use crate::state::backend::{
    EnvironmentVariableStore, PersistentVolumeStore, ScheduledBackupStore, StateBackend,
    TagAssociationStore,
};
use crate::state::lock::ResourceLocks;
use crate::state::models::PersistentVolume;

/// Where a database is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Provisioned, no status observed yet.
    Created,
    /// At least one status transition observed.
    Active,
    /// Soft-deleted, eligible for permanent deletion.
    Deleted,
}

pub fn lifecycle_state(resource: &ResourceDescriptor) -> LifecycleState {
    if resource.is_deleted() {
        LifecycleState::Deleted
    } else if resource.last_online_at().is_some() {
        LifecycleState::Active
    } else {
        LifecycleState::Created
    }
}

/// Records removed by a permanent-delete cascade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeSummary {
    pub persistent_volumes: usize,
    pub scheduled_backups: usize,
    pub environment_variables: usize,
    pub tags_detached: usize,
}

/// A remote artifact that could not be removed.
#[derive(Debug)]
pub struct CleanupFailure {
    pub operation: &'static str,
    pub uuid: String,
    pub target: String,
    pub error: RemoteError,
}

/// Outcome of best-effort removal of remote artifacts.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of `destroy`.
#[derive(Debug, Default)]
pub struct DestroyReport {
    pub configuration_removed: bool,
    pub cleanup: CleanupReport,
    pub cascade: CascadeSummary,
}

/// Drives creation, status updates, drift checks and deletion of databases.
///
/// Every read-modify-write of a row happens under that database's lock.
pub struct LifecycleCoordinator {
    backend: Arc<dyn StateBackend>,
    exec: Arc<dyn RemoteExec>,
    locks: ResourceLocks,
    configuration_dir: PathBuf,
    fingerprint_mode: FingerprintMode,
}

impl LifecycleCoordinator {
    pub fn new(
        backend: Arc<dyn StateBackend>,
        exec: Arc<dyn RemoteExec>,
        settings: &Settings,
    ) -> Self {
        Self {
            backend,
            exec,
            locks: ResourceLocks::new(),
            configuration_dir: settings.database_configuration_dir.clone(),
            fingerprint_mode: settings.fingerprint_mode,
        }
    }

    pub fn backend(&self) -> &Arc<dyn StateBackend> {
        &self.backend
    }

    pub fn locks(&self) -> &ResourceLocks {
        &self.locks
    }

    /// Remote directory holding this database's configuration.
    pub fn workdir(&self, resource: &ResourceDescriptor) -> PathBuf {
        resource.workdir(&self.configuration_dir)
    }

    // ─── Creation ───────────────────────────────────────────────────────────

    /// Insert a new database and run the creation hook. If the hook fails the
    /// row is removed again.
    pub async fn create(&self, resource: &ResourceDescriptor) -> Result<PersistentVolume> {
        self.backend.insert_resource(resource).await?;
        match self.on_created(resource).await {
            Ok(volume) => Ok(volume),
            Err(error) => {
                if let Err(rollback) = self.backend.delete_resource(&resource.uuid).await {
                    tracing::warn!(
                        uuid = %resource.uuid,
                        error = %format!("{:#}", rollback),
                        "Failed to roll back database row"
                    );
                }
                Err(error.context(format!("Failed to create database '{}'", resource.uuid)))
            }
        }
    }

    /// Provision the default data volume record. Calling it again for the same
    /// database returns the existing record.
    pub async fn on_created(&self, resource: &ResourceDescriptor) -> Result<PersistentVolume> {
        let name = resource.default_volume_name();
        let existing = self.backend.list_persistent_volumes(&resource.id).await?;
        if let Some(volume) = existing.into_iter().find(|v| v.name == name) {
            return Ok(volume);
        }

        let mut volume = PersistentVolume::new(&resource.id, &name, DATA_MOUNT_PATH);
        volume.is_readonly = true;
        self.backend
            .create_persistent_volume(&volume)
            .await
            .with_context(|| format!("Failed to create default volume for '{}'", resource.uuid))?;

        tracing::info!(uuid = %resource.uuid, volume = %volume.name, "Provisioned default volume");
        Ok(volume)
    }

    // ─── Saves ──────────────────────────────────────────────────────────────

    /// Hook run before every write of the row.
    pub fn before_save(&self, resource: &mut ResourceDescriptor) {
        resource.updated_at = Utc::now();
    }

    /// Persist a descriptor. Status, last-online stamp, fingerprint and
    /// deletion mark are taken from the stored row, not from `resource`.
    pub async fn save(&self, resource: &mut ResourceDescriptor) -> Result<()> {
        let _guard = self.locks.acquire(&resource.uuid).await;
        let stored = self.load(&resource.uuid).await?;
        resource.adopt_lifecycle_fields(&stored);
        self.save_unlocked(resource).await
    }

    async fn save_unlocked(&self, resource: &mut ResourceDescriptor) -> Result<()> {
        self.before_save(resource);
        self.backend.save_resource(resource).await
    }

    async fn load(&self, uuid: &str) -> Result<ResourceDescriptor> {
        self.backend
            .get_resource(uuid)
            .await?
            .ok_or_else(|| LifecycleError::NotFound {
                uuid: uuid.to_string(),
            })
            .map_err(Into::into)
    }

    /// Record an observed status. Returns the stored descriptor and whether
    /// the status changed; unchanged statuses are not written.
    pub async fn update_status(&self, uuid: &str, raw: &str) -> Result<(ResourceDescriptor, bool)> {
        let _guard = self.locks.acquire(uuid).await;
        let mut resource = self.load(uuid).await?;
        let changed = resource.set_status(raw);
        if changed {
            self.save_unlocked(&mut resource).await?;
            tracing::info!(uuid = %uuid, status = %resource.real_status(), "Status updated");
        }
        Ok((resource, changed))
    }

    /// Whether the stored configuration differs from the last committed
    /// fingerprint. With `persist`, a drifted fingerprint is committed and the
    /// row saved. `resource` is replaced with the stored row.
    pub async fn is_config_drifted(
        &self,
        resource: &mut ResourceDescriptor,
        persist: bool,
    ) -> Result<bool> {
        let _guard = self.locks.acquire(&resource.uuid).await;
        let mut current = self.load(&resource.uuid).await?;
        let env = self
            .backend
            .list_environment_variables(&current.id)
            .await?;
        let drifted = fingerprint::has_drifted(&mut current, &env, self.fingerprint_mode, persist);

        if persist && drifted {
            self.save_unlocked(&mut current).await?;
            tracing::info!(uuid = %current.uuid, "Committed new configuration fingerprint");
        }
        *resource = current;
        Ok(drifted)
    }

    // ─── Deletion ───────────────────────────────────────────────────────────

    /// Mark a database as deleted. Reversible; nothing owned is touched.
    /// `resource` is replaced with the stored row.
    pub async fn soft_delete(&self, resource: &mut ResourceDescriptor) -> Result<()> {
        let _guard = self.locks.acquire(&resource.uuid).await;
        let mut current = self.load(&resource.uuid).await?;
        current.mark_deleted();
        self.save_unlocked(&mut current).await?;
        *resource = current;
        Ok(())
    }

    /// Remove everything the database owns: volume, backup and environment
    /// records, and tag associations. Requires a prior soft delete of the
    /// stored row.
    pub async fn on_permanently_deleted(
        &self,
        resource: &ResourceDescriptor,
    ) -> Result<CascadeSummary> {
        let _guard = self.locks.acquire(&resource.uuid).await;
        let current = self.load(&resource.uuid).await?;
        self.cascade(&current).await
    }

    async fn cascade(&self, resource: &ResourceDescriptor) -> Result<CascadeSummary> {
        if !resource.is_deleted() {
            return Err(LifecycleError::NotSoftDeleted {
                uuid: resource.uuid.clone(),
            }
            .into());
        }

        let id = &resource.id;
        let mut summary = CascadeSummary::default();
        let mut errors = Vec::new();

        // Every step runs even if an earlier one failed.
        match self.backend.delete_persistent_volumes(id).await {
            Ok(n) => summary.persistent_volumes = n,
            Err(e) => errors.push(format!("persistent volumes: {:#}", e)),
        }
        match self.backend.delete_scheduled_backups(id).await {
            Ok(n) => summary.scheduled_backups = n,
            Err(e) => errors.push(format!("scheduled backups: {:#}", e)),
        }
        match self.backend.delete_environment_variables(id).await {
            Ok(n) => summary.environment_variables = n,
            Err(e) => errors.push(format!("environment variables: {:#}", e)),
        }
        match self.backend.detach_all_tags(id).await {
            Ok(n) => summary.tags_detached = n,
            Err(e) => errors.push(format!("tags: {:#}", e)),
        }

        if !errors.is_empty() {
            bail!(
                "Cascade for database '{}' incomplete: {}",
                resource.uuid,
                errors.join("; ")
            );
        }

        tracing::info!(
            uuid = %resource.uuid,
            volumes = summary.persistent_volumes,
            backups = summary.scheduled_backups,
            env = summary.environment_variables,
            tags = summary.tags_detached,
            "Cascade complete"
        );
        Ok(summary)
    }

    /// Remove the configuration directory on the server. Returns `false`
    /// without running anything unless the resolved path is a direct child of
    /// the configuration root named after the database uuid.
    pub async fn delete_configuration_directory(
        &self,
        resource: &ResourceDescriptor,
    ) -> Result<bool, LifecycleError> {
        let Some(workdir) = resource.owned_workdir(&self.configuration_dir) else {
            tracing::warn!(
                uuid = %resource.uuid,
                workdir = %self.workdir(resource).display(),
                "Refusing to remove configuration directory outside the database's own path"
            );
            return Ok(false);
        };

        let path = workdir.to_string_lossy();
        let command = format!("rm -rf {}", shell_quote(&path));
        self.exec
            .execute(&[command], resource.server(), false)
            .await
            .map_err(|source| LifecycleError::Remote {
                operation: "delete_configuration_directory",
                uuid: resource.uuid.clone(),
                source,
            })?;
        tracing::info!(uuid = %resource.uuid, workdir = %path, "Removed configuration directory");
        Ok(true)
    }

    /// Remove every owned docker volume on the server. Failures are collected
    /// per volume; the remaining volumes are still attempted.
    pub async fn delete_volumes(&self, resource: &ResourceDescriptor) -> Result<CleanupReport> {
        let volumes = self
            .backend
            .list_persistent_volumes(&resource.id)
            .await?;
        let mut report = CleanupReport::default();
        if volumes.is_empty() {
            return Ok(report);
        }

        let server = resource.server();
        for volume in volumes {
            let command = format!("docker volume rm -f {}", shell_quote(&volume.name));
            match self.exec.execute(&[command], server, false).await {
                Ok(_) => {
                    tracing::info!(uuid = %resource.uuid, volume = %volume.name, "Removed volume");
                    report.removed.push(volume.name);
                }
                Err(error) => {
                    tracing::warn!(uuid = %resource.uuid, volume = %volume.name, error = %error, "Failed to remove volume");
                    report.failures.push(CleanupFailure {
                        operation: "delete_volumes",
                        uuid: resource.uuid.clone(),
                        target: volume.name,
                        error,
                    });
                }
            }
        }
        Ok(report)
    }

    /// Permanently delete a soft-deleted database: remote cleanup first (best
    /// effort), then the cascade, then the row itself. The stored row decides
    /// whether the database is soft-deleted.
    pub async fn destroy(&self, resource: ResourceDescriptor) -> Result<DestroyReport> {
        let guard = self.locks.acquire(&resource.uuid).await;
        let resource = self.load(&resource.uuid).await?;
        if !resource.is_deleted() {
            return Err(LifecycleError::NotSoftDeleted {
                uuid: resource.uuid.clone(),
            }
            .into());
        }

        let mut report = DestroyReport::default();

        match self.delete_configuration_directory(&resource).await {
            Ok(removed) => report.configuration_removed = removed,
            Err(LifecycleError::Remote { operation, source, .. }) => {
                tracing::warn!(uuid = %resource.uuid, error = %source, "Failed to remove configuration directory");
                report.cleanup.failures.push(CleanupFailure {
                    operation,
                    uuid: resource.uuid.clone(),
                    target: self.workdir(&resource).to_string_lossy().to_string(),
                    error: source,
                });
            }
            Err(other) => return Err(other.into()),
        }

        let volumes = self.delete_volumes(&resource).await?;
        report.cleanup.removed.extend(volumes.removed);
        report.cleanup.failures.extend(volumes.failures);

        report.cascade = self.cascade(&resource).await?;
        self.backend.delete_resource(&resource.uuid).await?;

        drop(guard);
        self.locks.forget(&resource.uuid);
        tracing::info!(
            uuid = %resource.uuid,
            cleanup_failures = report.cleanup.failures.len(),
            "Database permanently deleted"
        );
        Ok(report)
    }
}

/// Single-quote a value for a POSIX shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
