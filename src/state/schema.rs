/// SQL DDL for the pgkeep state database.
///
/// Owned records reference their database without `ON DELETE CASCADE`: the
/// lifecycle coordinator removes them explicitly before the database row, and
/// the foreign keys reject any attempt to delete the row first.

pub const SCHEMA_VERSION: i32 = 1;

pub const CREATE_TABLES_SQL: &str = "
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL,
    description TEXT
);

-- Servers that host database containers
CREATE TABLE IF NOT EXISTS servers (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    ip TEXT NOT NULL,
    user TEXT NOT NULL DEFAULT 'root',
    port INTEGER NOT NULL DEFAULT 22,
    private_key_path TEXT,
    metrics_token TEXT,
    is_functional INTEGER NOT NULL DEFAULT 1
);

-- Standalone PostgreSQL databases
CREATE TABLE IF NOT EXISTS databases (
    id TEXT PRIMARY KEY,
    uuid TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    description TEXT,
    image TEXT NOT NULL,
    ports_mappings TEXT,
    postgres_user TEXT NOT NULL,
    postgres_password TEXT NOT NULL,
    postgres_db TEXT NOT NULL,
    postgres_initdb_args TEXT,
    postgres_host_auth_method TEXT,
    init_scripts TEXT NOT NULL DEFAULT '[]',
    enable_ssl INTEGER NOT NULL DEFAULT 0,
    ssl_mode TEXT NOT NULL DEFAULT 'require',
    is_public INTEGER NOT NULL DEFAULT 0,
    public_port INTEGER,
    is_log_drain_enabled INTEGER NOT NULL DEFAULT 0,
    destination_kind TEXT NOT NULL,
    server_id TEXT NOT NULL,
    namespace TEXT,
    status TEXT NOT NULL DEFAULT 'exited:unhealthy',
    last_online_at TEXT,
    config_hash TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    FOREIGN KEY (server_id) REFERENCES servers(id)
);

-- Docker volumes owned by a database
CREATE TABLE IF NOT EXISTS persistent_volumes (
    id TEXT PRIMARY KEY,
    resource_id TEXT NOT NULL,
    name TEXT NOT NULL,
    mount_path TEXT NOT NULL,
    host_path TEXT,
    is_readonly INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    FOREIGN KEY (resource_id) REFERENCES databases(id)
);

-- Backup schedules
CREATE TABLE IF NOT EXISTS scheduled_backups (
    id TEXT PRIMARY KEY,
    resource_id TEXT NOT NULL,
    frequency TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    keep_locally INTEGER NOT NULL DEFAULT 7,
    created_at TEXT NOT NULL,
    FOREIGN KEY (resource_id) REFERENCES databases(id)
);

-- Environment variables
CREATE TABLE IF NOT EXISTS environment_variables (
    id TEXT PRIMARY KEY,
    resource_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(resource_id, key),
    FOREIGN KEY (resource_id) REFERENCES databases(id)
);

-- Tags are shared between resources
CREATE TABLE IF NOT EXISTS tags (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS resource_tags (
    resource_id TEXT NOT NULL,
    tag_id TEXT NOT NULL,
    PRIMARY KEY (resource_id, tag_id),
    FOREIGN KEY (resource_id) REFERENCES databases(id),
    FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
);
";

pub const CREATE_INDEXES_SQL: &str = "
CREATE INDEX IF NOT EXISTS idx_databases_server ON databases(server_id);
CREATE INDEX IF NOT EXISTS idx_databases_status ON databases(status);
CREATE INDEX IF NOT EXISTS idx_volumes_resource ON persistent_volumes(resource_id);
CREATE INDEX IF NOT EXISTS idx_backups_resource ON scheduled_backups(resource_id);
CREATE INDEX IF NOT EXISTS idx_env_resource ON environment_variables(resource_id);
CREATE INDEX IF NOT EXISTS idx_resource_tags_resource ON resource_tags(resource_id);
";
