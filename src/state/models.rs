use serde::{Deserialize, Serialize};

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ─── Persistent Volumes ─────────────────────────────────────────────────────

/// A docker volume owned by a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentVolume {
    pub id: String,
    pub resource_id: String,
    pub name: String,
    pub mount_path: String,
    pub host_path: Option<String>,
    pub is_readonly: bool,
    pub created_at: String,
}

impl PersistentVolume {
    pub fn new(resource_id: &str, name: &str, mount_path: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            resource_id: resource_id.to_string(),
            name: name.to_string(),
            mount_path: mount_path.to_string(),
            host_path: None,
            is_readonly: false,
            created_at: now(),
        }
    }
}

// ─── Scheduled Backups ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledBackup {
    pub id: String,
    pub resource_id: String,
    /// Cron expression or shorthand such as `daily`.
    pub frequency: String,
    pub enabled: bool,
    pub keep_locally: u32,
    pub created_at: String,
}

impl ScheduledBackup {
    pub fn new(resource_id: &str, frequency: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            resource_id: resource_id.to_string(),
            frequency: frequency.to_string(),
            enabled: true,
            keep_locally: 7,
            created_at: now(),
        }
    }
}

// ─── Environment Variables ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub id: String,
    pub resource_id: String,
    pub key: String,
    pub value: String,
    pub created_at: String,
}

impl EnvironmentVariable {
    pub fn new(resource_id: &str, key: &str, value: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            resource_id: resource_id.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            created_at: now(),
        }
    }
}

// ─── Tags ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
}

// ─── Query ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    pub server_id: Option<String>,
    /// Substring matched against the stored status column.
    pub status: Option<String>,
    pub include_deleted: bool,
}
