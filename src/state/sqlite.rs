use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::backend::{
    EnvironmentVariableStore, PersistentVolumeStore, ScheduledBackupStore, StateBackend,
    TagAssociationStore,
};
use super::migration;
use super::models::*;
use crate::resource::descriptor::{Destination, ResourceDescriptor, Secret, Server};

/// SQLite-backed state store.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create the SQLite state database.
    pub fn open(db_path: &str) -> Result<Self> {
        let parent = Path::new(db_path).parent();
        if let Some(dir) = parent {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open state database at {}", db_path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("State database connection lock poisoned"))
    }

    fn now() -> String {
        Utc::now().to_rfc3339()
    }
}

const SELECT_DATABASE_SQL: &str = "
SELECT d.id, d.uuid, d.name, d.description, d.image, d.ports_mappings,
       d.postgres_user, d.postgres_password, d.postgres_db,
       d.postgres_initdb_args, d.postgres_host_auth_method, d.init_scripts,
       d.enable_ssl, d.ssl_mode, d.is_public, d.public_port, d.is_log_drain_enabled,
       d.destination_kind, d.namespace, d.status, d.last_online_at, d.config_hash,
       d.created_at, d.updated_at, d.deleted_at,
       s.id, s.name, s.ip, s.user, s.port, s.private_key_path, s.metrics_token, s.is_functional
FROM databases d JOIN servers s ON s.id = d.server_id";

const SELECT_SERVER_SQL: &str =
    "SELECT id, name, ip, user, port, private_key_path, metrics_token, is_functional FROM servers";

#[async_trait]
impl StateBackend for SqliteBackend {
    // ─── Initialization ─────────────────────────────────────────────────────

    async fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        migration::check_and_migrate(&conn)
    }

    // ─── Servers ────────────────────────────────────────────────────────────

    async fn upsert_server(&self, server: &Server) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO servers (id, name, ip, user, port, private_key_path, metrics_token, is_functional)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                ip = excluded.ip,
                user = excluded.user,
                port = excluded.port,
                private_key_path = excluded.private_key_path,
                metrics_token = excluded.metrics_token,
                is_functional = excluded.is_functional",
            params![
                server.id,
                server.name,
                server.ip,
                server.user,
                server.port,
                server
                    .private_key_path
                    .as_ref()
                    .map(|p| p.to_string_lossy().to_string()),
                server.metrics_token.as_ref().map(|t| t.expose().to_string()),
                server.is_functional,
            ],
        )
        .with_context(|| format!("Failed to save server '{}'", server.name))?;
        Ok(())
    }

    async fn get_server(&self, id_or_name: &str) -> Result<Option<Server>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1 OR name = ?1", SELECT_SERVER_SQL))?;
        let result = stmt
            .query_row(params![id_or_name], |row| server_from_row(row, 0))
            .optional()?;
        Ok(result)
    }

    async fn list_servers(&self) -> Result<Vec<Server>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY name", SELECT_SERVER_SQL))?;
        let rows = stmt
            .query_map([], |row| server_from_row(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ─── Resources ──────────────────────────────────────────────────────────

    async fn insert_resource(&self, resource: &ResourceDescriptor) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO databases (id, uuid, name, description, image, ports_mappings,
                postgres_user, postgres_password, postgres_db, postgres_initdb_args,
                postgres_host_auth_method, init_scripts, enable_ssl, ssl_mode, is_public,
                public_port, is_log_drain_enabled, destination_kind, server_id, namespace,
                status, last_online_at, config_hash, created_at, updated_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
            params![
                resource.id,
                resource.uuid,
                resource.name,
                resource.description,
                resource.image,
                resource.ports_mappings,
                resource.postgres_user,
                resource.postgres_password.expose(),
                resource.postgres_db,
                resource.postgres_initdb_args,
                resource.postgres_host_auth_method,
                serde_json::to_string(&resource.init_scripts)?,
                resource.enable_ssl,
                resource.ssl_mode.as_str(),
                resource.is_public,
                resource.public_port,
                resource.is_log_drain_enabled,
                resource.destination.kind(),
                resource.server().id,
                resource.destination.namespace(),
                resource.status_raw,
                resource.last_online_at.map(|t| t.to_rfc3339()),
                resource.config_hash,
                resource.created_at.to_rfc3339(),
                resource.updated_at.to_rfc3339(),
                resource.deleted_at.map(|t| t.to_rfc3339()),
            ],
        )
        .with_context(|| format!("Failed to insert database '{}'", resource.uuid))?;
        Ok(())
    }

    async fn get_resource(&self, uuid: &str) -> Result<Option<ResourceDescriptor>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} WHERE d.uuid = ?1", SELECT_DATABASE_SQL))?;
        let row = stmt
            .query_row(params![uuid], DatabaseRow::from_row)
            .optional()?;
        row.map(DatabaseRow::into_descriptor).transpose()
    }

    async fn save_resource(&self, resource: &ResourceDescriptor) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE databases SET
                name = ?2, description = ?3, image = ?4, ports_mappings = ?5,
                postgres_user = ?6, postgres_password = ?7, postgres_db = ?8,
                postgres_initdb_args = ?9, postgres_host_auth_method = ?10, init_scripts = ?11,
                enable_ssl = ?12, ssl_mode = ?13, is_public = ?14, public_port = ?15,
                is_log_drain_enabled = ?16, destination_kind = ?17, server_id = ?18,
                namespace = ?19, status = ?20, last_online_at = ?21, config_hash = ?22,
                updated_at = ?23, deleted_at = ?24
             WHERE uuid = ?1",
            params![
                resource.uuid,
                resource.name,
                resource.description,
                resource.image,
                resource.ports_mappings,
                resource.postgres_user,
                resource.postgres_password.expose(),
                resource.postgres_db,
                resource.postgres_initdb_args,
                resource.postgres_host_auth_method,
                serde_json::to_string(&resource.init_scripts)?,
                resource.enable_ssl,
                resource.ssl_mode.as_str(),
                resource.is_public,
                resource.public_port,
                resource.is_log_drain_enabled,
                resource.destination.kind(),
                resource.server().id,
                resource.destination.namespace(),
                resource.status_raw,
                resource.last_online_at.map(|t| t.to_rfc3339()),
                resource.config_hash,
                resource.updated_at.to_rfc3339(),
                resource.deleted_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        if updated == 0 {
            anyhow::bail!("Database '{}' does not exist in state", resource.uuid);
        }
        Ok(())
    }

    async fn list_resources(&self, filter: &ResourceFilter) -> Result<Vec<ResourceDescriptor>> {
        let conn = self.conn()?;
        let mut sql = format!("{} WHERE 1 = 1", SELECT_DATABASE_SQL);
        let mut param_values: Vec<String> = vec![];
        let mut param_idx = 1;

        if let Some(ref server_id) = filter.server_id {
            sql.push_str(&format!(" AND d.server_id = ?{}", param_idx));
            param_values.push(server_id.clone());
            param_idx += 1;
        }
        if let Some(ref status) = filter.status {
            sql.push_str(&format!(" AND d.status LIKE ?{}", param_idx));
            param_values.push(format!("%{}%", status));
        }
        if !filter.include_deleted {
            sql.push_str(" AND d.deleted_at IS NULL");
        }
        sql.push_str(" ORDER BY d.name");

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> =
            param_values.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), DatabaseRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(DatabaseRow::into_descriptor).collect()
    }

    async fn delete_resource(&self, uuid: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM databases WHERE uuid = ?1", params![uuid])
            .with_context(|| format!("Failed to delete database '{}'", uuid))?;
        Ok(())
    }
}

// ─── Persistent Volumes ─────────────────────────────────────────────────────

#[async_trait]
impl PersistentVolumeStore for SqliteBackend {
    async fn create_persistent_volume(&self, volume: &PersistentVolume) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO persistent_volumes (id, resource_id, name, mount_path, host_path, is_readonly, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                volume.id,
                volume.resource_id,
                volume.name,
                volume.mount_path,
                volume.host_path,
                volume.is_readonly,
                volume.created_at,
            ],
        )?;
        Ok(())
    }

    async fn list_persistent_volumes(&self, resource_id: &str) -> Result<Vec<PersistentVolume>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, resource_id, name, mount_path, host_path, is_readonly, created_at
             FROM persistent_volumes WHERE resource_id = ?1 ORDER BY name",
        )?;
        let rows = stmt
            .query_map(params![resource_id], |row| {
                Ok(PersistentVolume {
                    id: row.get(0)?,
                    resource_id: row.get(1)?,
                    name: row.get(2)?,
                    mount_path: row.get(3)?,
                    host_path: row.get(4)?,
                    is_readonly: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn delete_persistent_volumes(&self, resource_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM persistent_volumes WHERE resource_id = ?1",
            params![resource_id],
        )?;
        Ok(removed)
    }
}

// ─── Scheduled Backups ──────────────────────────────────────────────────────

#[async_trait]
impl ScheduledBackupStore for SqliteBackend {
    async fn create_scheduled_backup(&self, backup: &ScheduledBackup) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO scheduled_backups (id, resource_id, frequency, enabled, keep_locally, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                backup.id,
                backup.resource_id,
                backup.frequency,
                backup.enabled,
                backup.keep_locally,
                backup.created_at,
            ],
        )?;
        Ok(())
    }

    async fn list_scheduled_backups(&self, resource_id: &str) -> Result<Vec<ScheduledBackup>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, resource_id, frequency, enabled, keep_locally, created_at
             FROM scheduled_backups WHERE resource_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![resource_id], |row| {
                Ok(ScheduledBackup {
                    id: row.get(0)?,
                    resource_id: row.get(1)?,
                    frequency: row.get(2)?,
                    enabled: row.get(3)?,
                    keep_locally: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn delete_scheduled_backups(&self, resource_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM scheduled_backups WHERE resource_id = ?1",
            params![resource_id],
        )?;
        Ok(removed)
    }
}

// ─── Environment Variables ──────────────────────────────────────────────────

#[async_trait]
impl EnvironmentVariableStore for SqliteBackend {
    async fn set_environment_variable(
        &self,
        resource_id: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO environment_variables (id, resource_id, key, value, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(resource_id, key) DO UPDATE SET value = excluded.value",
            params![
                uuid::Uuid::new_v4().to_string(),
                resource_id,
                key,
                value,
                Self::now()
            ],
        )?;
        Ok(())
    }

    async fn list_environment_variables(
        &self,
        resource_id: &str,
    ) -> Result<Vec<EnvironmentVariable>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, resource_id, key, value, created_at
             FROM environment_variables WHERE resource_id = ?1 ORDER BY key ASC",
        )?;
        let rows = stmt
            .query_map(params![resource_id], |row| {
                Ok(EnvironmentVariable {
                    id: row.get(0)?,
                    resource_id: row.get(1)?,
                    key: row.get(2)?,
                    value: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn delete_environment_variables(&self, resource_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM environment_variables WHERE resource_id = ?1",
            params![resource_id],
        )?;
        Ok(removed)
    }
}

// ─── Tags ───────────────────────────────────────────────────────────────────

#[async_trait]
impl TagAssociationStore for SqliteBackend {
    async fn attach_tag(&self, resource_id: &str, name: &str) -> Result<Tag> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO tags (id, name) VALUES (?1, ?2)",
            params![uuid::Uuid::new_v4().to_string(), name],
        )?;
        let tag = conn.query_row(
            "SELECT id, name FROM tags WHERE name = ?1",
            params![name],
            |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO resource_tags (resource_id, tag_id) VALUES (?1, ?2)",
            params![resource_id, tag.id],
        )?;
        Ok(tag)
    }

    async fn list_tags(&self, resource_id: &str) -> Result<Vec<Tag>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.name FROM tags t
             JOIN resource_tags rt ON rt.tag_id = t.id
             WHERE rt.resource_id = ?1 ORDER BY t.name",
        )?;
        let rows = stmt
            .query_map(params![resource_id], |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn detach_all_tags(&self, resource_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM resource_tags WHERE resource_id = ?1",
            params![resource_id],
        )?;
        Ok(removed)
    }
}

// ─── Row mapping ────────────────────────────────────────────────────────────

fn server_from_row(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Server> {
    let private_key_path: Option<String> = row.get(offset + 5)?;
    let metrics_token: Option<String> = row.get(offset + 6)?;
    Ok(Server {
        id: row.get(offset)?,
        name: row.get(offset + 1)?,
        ip: row.get(offset + 2)?,
        user: row.get(offset + 3)?,
        port: row.get(offset + 4)?,
        private_key_path: private_key_path.map(PathBuf::from),
        metrics_token: metrics_token.map(Secret::from),
        is_functional: row.get(offset + 7)?,
    })
}

/// Raw columns of a database row; converted to a descriptor outside the
/// rusqlite closure so parse failures carry context.
struct DatabaseRow {
    id: String,
    uuid: String,
    name: String,
    description: Option<String>,
    image: String,
    ports_mappings: Option<String>,
    postgres_user: String,
    postgres_password: String,
    postgres_db: String,
    postgres_initdb_args: Option<String>,
    postgres_host_auth_method: Option<String>,
    init_scripts: String,
    enable_ssl: bool,
    ssl_mode: String,
    is_public: bool,
    public_port: Option<u16>,
    is_log_drain_enabled: bool,
    destination_kind: String,
    namespace: Option<String>,
    status: String,
    last_online_at: Option<String>,
    config_hash: Option<String>,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
    server: Server,
}

impl DatabaseRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            uuid: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            image: row.get(4)?,
            ports_mappings: row.get(5)?,
            postgres_user: row.get(6)?,
            postgres_password: row.get(7)?,
            postgres_db: row.get(8)?,
            postgres_initdb_args: row.get(9)?,
            postgres_host_auth_method: row.get(10)?,
            init_scripts: row.get(11)?,
            enable_ssl: row.get(12)?,
            ssl_mode: row.get(13)?,
            is_public: row.get(14)?,
            public_port: row.get(15)?,
            is_log_drain_enabled: row.get(16)?,
            destination_kind: row.get(17)?,
            namespace: row.get(18)?,
            status: row.get(19)?,
            last_online_at: row.get(20)?,
            config_hash: row.get(21)?,
            created_at: row.get(22)?,
            updated_at: row.get(23)?,
            deleted_at: row.get(24)?,
            server: server_from_row(row, 25)?,
        })
    }

    fn into_descriptor(self) -> Result<ResourceDescriptor> {
        let uuid = self.uuid;
        let context = || format!("Corrupt state for database '{}'", uuid);

        Ok(ResourceDescriptor {
            id: self.id,
            name: self.name,
            description: self.description,
            image: self.image,
            ports_mappings: self.ports_mappings,
            postgres_user: self.postgres_user,
            postgres_password: Secret::from(self.postgres_password),
            postgres_db: self.postgres_db,
            postgres_initdb_args: self.postgres_initdb_args,
            postgres_host_auth_method: self.postgres_host_auth_method,
            init_scripts: serde_json::from_str(&self.init_scripts).with_context(context)?,
            enable_ssl: self.enable_ssl,
            ssl_mode: self.ssl_mode.parse().with_context(context)?,
            is_public: self.is_public,
            public_port: self.public_port,
            is_log_drain_enabled: self.is_log_drain_enabled,
            destination: Destination::from_parts(
                &self.destination_kind,
                self.server,
                self.namespace,
            )
            .with_context(context)?,
            status_raw: self.status,
            last_online_at: parse_optional_time(self.last_online_at).with_context(context)?,
            config_hash: self.config_hash,
            created_at: parse_time(&self.created_at).with_context(context)?,
            updated_at: parse_time(&self.updated_at).with_context(context)?,
            deleted_at: parse_optional_time(self.deleted_at).with_context(context)?,
            uuid,
        })
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid timestamp '{}'", value))?
        .with_timezone(&Utc))
}

fn parse_optional_time(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_time).transpose()
}
