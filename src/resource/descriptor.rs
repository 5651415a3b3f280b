use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fingerprint::ConfigSurface;
use super::status::{self, Status};

pub const DATABASE_TYPE: &str = "standalone-postgresql";
pub const DEFAULT_IMAGE: &str = "postgres:16-alpine";
pub const DATA_MOUNT_PATH: &str = "/var/lib/postgresql/data";

// ─── Secrets ────────────────────────────────────────────────────────────────

/// A credential held in plaintext in memory. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"***\"")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ─── TLS ────────────────────────────────────────────────────────────────────

/// libpq `sslmode` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    Allow,
    Prefer,
    #[default]
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Allow => "allow",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }

    /// Whether clients must be pointed at the platform CA certificate.
    pub fn verifies_server(&self) -> bool {
        matches!(self, SslMode::VerifyCa | SslMode::VerifyFull)
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SslMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_lowercase().as_str() {
            "disable" => SslMode::Disable,
            "allow" => SslMode::Allow,
            "prefer" => SslMode::Prefer,
            "require" => SslMode::Require,
            "verify-ca" => SslMode::VerifyCa,
            "verify-full" => SslMode::VerifyFull,
            other => bail!("Unknown sslmode '{}'", other),
        })
    }
}

// ─── Destination ────────────────────────────────────────────────────────────

/// A remote machine that runs database containers.
#[derive(Debug, Clone, PartialEq)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub ip: String,
    pub user: String,
    pub port: u16,
    pub private_key_path: Option<PathBuf>,
    pub metrics_token: Option<Secret>,
    pub is_functional: bool,
}

impl Server {
    pub fn new(name: &str, ip: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            ip: ip.to_string(),
            user: "root".to_string(),
            port: 22,
            private_key_path: None,
            metrics_token: None,
            is_functional: true,
        }
    }
}

/// Where a database is deployed. Every variant resolves to a server.
#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    StandaloneDocker { server: Server },
    Swarm { server: Server },
    Kubernetes { server: Server, namespace: String },
}

impl Destination {
    pub fn server(&self) -> &Server {
        match self {
            Destination::StandaloneDocker { server }
            | Destination::Swarm { server }
            | Destination::Kubernetes { server, .. } => server,
        }
    }

    /// Discriminant persisted alongside the server reference.
    pub fn kind(&self) -> &'static str {
        match self {
            Destination::StandaloneDocker { .. } => destination_kind::STANDALONE_DOCKER,
            Destination::Swarm { .. } => destination_kind::SWARM,
            Destination::Kubernetes { .. } => destination_kind::KUBERNETES,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            Destination::Kubernetes { namespace, .. } => Some(namespace),
            _ => None,
        }
    }

    pub fn from_parts(kind: &str, server: Server, namespace: Option<String>) -> Result<Self> {
        Ok(match kind {
            destination_kind::STANDALONE_DOCKER => Destination::StandaloneDocker { server },
            destination_kind::SWARM => Destination::Swarm { server },
            destination_kind::KUBERNETES => Destination::Kubernetes {
                server,
                namespace: namespace.unwrap_or_else(|| "default".to_string()),
            },
            other => bail!("Unknown destination kind '{}'", other),
        })
    }
}

pub mod destination_kind {
    pub const STANDALONE_DOCKER: &str = "standalone-docker";
    pub const SWARM: &str = "swarm";
    pub const KUBERNETES: &str = "kubernetes";
}

// ─── Resource ───────────────────────────────────────────────────────────────

/// A standalone PostgreSQL instance as tracked by the platform.
///
/// `status_raw`, `config_hash` and `last_online_at` are only changed through
/// the status codec and the fingerprint, so they are not public fields.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    pub id: String,
    pub uuid: String,
    pub name: String,
    pub description: Option<String>,
    pub image: String,
    pub(crate) ports_mappings: Option<String>,
    pub postgres_user: String,
    pub postgres_password: Secret,
    pub postgres_db: String,
    pub postgres_initdb_args: Option<String>,
    pub postgres_host_auth_method: Option<String>,
    pub init_scripts: Vec<String>,
    pub enable_ssl: bool,
    pub ssl_mode: SslMode,
    pub is_public: bool,
    pub public_port: Option<u16>,
    pub is_log_drain_enabled: bool,
    pub destination: Destination,
    pub(crate) status_raw: String,
    pub(crate) last_online_at: Option<DateTime<Utc>>,
    pub(crate) config_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub(crate) deleted_at: Option<DateTime<Utc>>,
}

impl ResourceDescriptor {
    /// Create a new descriptor with default image and credentials.
    pub fn new(name: &str, destination: Destination) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            uuid: uuid::Uuid::new_v4().simple().to_string(),
            name: name.to_string(),
            description: None,
            image: DEFAULT_IMAGE.to_string(),
            ports_mappings: None,
            postgres_user: "postgres".to_string(),
            postgres_password: Secret::new(uuid::Uuid::new_v4().simple().to_string()),
            postgres_db: "postgres".to_string(),
            postgres_initdb_args: None,
            postgres_host_auth_method: None,
            init_scripts: vec![],
            enable_ssl: false,
            ssl_mode: SslMode::default(),
            is_public: false,
            public_port: None,
            is_log_drain_enabled: false,
            destination,
            status_raw: status::normalize("exited"),
            last_online_at: None,
            config_hash: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    // ─── Status ─────────────────────────────────────────────────────────────

    pub fn status(&self) -> Status {
        status::decode(&self.status_raw)
    }

    /// Store a normalized status. Returns whether the stored value changed;
    /// any change stamps `last_online_at`.
    pub fn set_status(&mut self, raw: &str) -> bool {
        let canonical = status::normalize(raw);
        if canonical == self.status_raw {
            return false;
        }
        tracing::debug!(
            uuid = %self.uuid,
            from = %self.status_raw,
            to = %canonical,
            "Status transition"
        );
        self.status_raw = canonical;
        self.last_online_at = Some(Utc::now());
        true
    }

    /// The stored status column, without decoding.
    pub fn real_status(&self) -> &str {
        &self.status_raw
    }

    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    pub fn is_exited(&self) -> bool {
        self.status().is_exited()
    }

    pub fn last_online_at(&self) -> Option<DateTime<Utc>> {
        self.last_online_at
    }

    // ─── Configuration ──────────────────────────────────────────────────────

    pub fn config_hash(&self) -> Option<&str> {
        self.config_hash.as_deref()
    }

    pub(crate) fn set_config_hash(&mut self, digest: String) {
        self.config_hash = Some(digest);
    }

    pub fn ports_mappings(&self) -> Option<&str> {
        self.ports_mappings.as_deref()
    }

    /// An empty string clears the mappings.
    pub fn set_ports_mappings(&mut self, value: Option<&str>) {
        self.ports_mappings = value.filter(|v| !v.is_empty()).map(str::to_string);
    }

    pub fn ports_mappings_list(&self) -> Vec<String> {
        match &self.ports_mappings {
            Some(v) => v.split(',').map(str::to_string).collect(),
            None => vec![],
        }
    }

    pub fn config_surface(&self) -> ConfigSurface<'_> {
        ConfigSurface {
            image: &self.image,
            ports_mappings: self.ports_mappings.as_deref(),
            postgres_initdb_args: self.postgres_initdb_args.as_deref(),
            postgres_host_auth_method: self.postgres_host_auth_method.as_deref(),
        }
    }

    // ─── Derived ────────────────────────────────────────────────────────────

    pub fn database_type(&self) -> &'static str {
        DATABASE_TYPE
    }

    pub fn server(&self) -> &Server {
        self.destination.server()
    }

    pub fn server_status(&self) -> bool {
        self.server().is_functional
    }

    pub fn is_backup_solution_available(&self) -> bool {
        true
    }

    /// Container, volume and host-directory name of the default data volume.
    pub fn default_volume_name(&self) -> String {
        format!("postgres-data-{}", self.uuid)
    }

    /// `<base>/<uuid>`, lexically normalized.
    pub fn workdir(&self, base: &Path) -> PathBuf {
        normalize_path(&base.join(&self.uuid))
    }

    /// The workdir, only if it is a direct child of `base` named after the
    /// uuid. An absolute uuid or one with separators yields `None`.
    pub fn owned_workdir(&self, base: &Path) -> Option<PathBuf> {
        let uuid = self.uuid.as_str();
        if uuid.is_empty() || uuid.contains('/') || Path::new(uuid).is_absolute() {
            return None;
        }
        let base = normalize_path(base);
        let workdir = self.workdir(&base);
        let contained = workdir.parent() == Some(base.as_path())
            && workdir.file_name().and_then(|n| n.to_str()) == Some(uuid);
        contained.then_some(workdir)
    }

    // ─── Deletion ───────────────────────────────────────────────────────────

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub(crate) fn mark_deleted(&mut self) {
        if self.deleted_at.is_none() {
            self.deleted_at = Some(Utc::now());
        }
    }

    /// Take the fields only the coordinator writes from the stored row.
    pub(crate) fn adopt_lifecycle_fields(&mut self, stored: &ResourceDescriptor) {
        self.status_raw = stored.status_raw.clone();
        self.last_online_at = stored.last_online_at;
        self.config_hash = stored.config_hash.clone();
        self.deleted_at = stored.deleted_at;
    }
}

/// Resolve `.` and `..` components without touching the filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
