use anyhow::Result;
use async_trait::async_trait;

use super::models::{EnvironmentVariable, PersistentVolume, ResourceFilter, ScheduledBackup, Tag};
use crate::resource::descriptor::{ResourceDescriptor, Server};

/// Volume records owned by a database.
#[async_trait]
pub trait PersistentVolumeStore: Send + Sync {
    async fn create_persistent_volume(&self, volume: &PersistentVolume) -> Result<()>;

    async fn list_persistent_volumes(&self, resource_id: &str) -> Result<Vec<PersistentVolume>>;

    /// Delete every volume record of a resource. Returns the number removed.
    async fn delete_persistent_volumes(&self, resource_id: &str) -> Result<usize>;
}

/// Backup schedules owned by a database.
#[async_trait]
pub trait ScheduledBackupStore: Send + Sync {
    async fn create_scheduled_backup(&self, backup: &ScheduledBackup) -> Result<()>;

    async fn list_scheduled_backups(&self, resource_id: &str) -> Result<Vec<ScheduledBackup>>;

    async fn delete_scheduled_backups(&self, resource_id: &str) -> Result<usize>;
}

/// Environment variables owned by a database.
#[async_trait]
pub trait EnvironmentVariableStore: Send + Sync {
    /// Insert or overwrite the variable with this key.
    async fn set_environment_variable(
        &self,
        resource_id: &str,
        key: &str,
        value: &str,
    ) -> Result<()>;

    /// All variables of a resource, ordered by key.
    async fn list_environment_variables(
        &self,
        resource_id: &str,
    ) -> Result<Vec<EnvironmentVariable>>;

    async fn delete_environment_variables(&self, resource_id: &str) -> Result<usize>;
}

/// Tag associations. Tags themselves are shared and outlive resources.
#[async_trait]
pub trait TagAssociationStore: Send + Sync {
    /// Attach a tag by name, creating the tag if needed.
    async fn attach_tag(&self, resource_id: &str, name: &str) -> Result<Tag>;

    async fn list_tags(&self, resource_id: &str) -> Result<Vec<Tag>>;

    /// Remove every association of a resource. Returns the number detached.
    async fn detach_all_tags(&self, resource_id: &str) -> Result<usize>;
}

/// Pluggable state backend: the database rows plus everything they own.
#[async_trait]
pub trait StateBackend:
    PersistentVolumeStore + ScheduledBackupStore + EnvironmentVariableStore + TagAssociationStore
{
    // ─── Initialization ─────────────────────────────────────────────────────

    /// Create tables and apply migrations.
    async fn initialize(&self) -> Result<()>;

    // ─── Servers ────────────────────────────────────────────────────────────

    async fn upsert_server(&self, server: &Server) -> Result<()>;

    /// Look up a server by id or name.
    async fn get_server(&self, id_or_name: &str) -> Result<Option<Server>>;

    async fn list_servers(&self) -> Result<Vec<Server>>;

    // ─── Resources ──────────────────────────────────────────────────────────

    async fn insert_resource(&self, resource: &ResourceDescriptor) -> Result<()>;

    /// Look up a resource by uuid, including soft-deleted ones.
    async fn get_resource(&self, uuid: &str) -> Result<Option<ResourceDescriptor>>;

    /// Persist every mutable column of an existing resource.
    async fn save_resource(&self, resource: &ResourceDescriptor) -> Result<()>;

    async fn list_resources(&self, filter: &ResourceFilter) -> Result<Vec<ResourceDescriptor>>;

    /// Remove the resource row itself.
    async fn delete_resource(&self, uuid: &str) -> Result<()>;
}
