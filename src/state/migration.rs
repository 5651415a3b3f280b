use anyhow::{bail, Result};
use rusqlite::Connection;

use super::schema;

/// Check the schema version and bring the database up to date.
pub fn check_and_migrate(conn: &Connection) -> Result<()> {
    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|c| c > 0)
        .unwrap_or(false);

    if !table_exists {
        // Fresh install
        apply_schema(conn, "Initial schema")?;
        return Ok(());
    }

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version > schema::SCHEMA_VERSION {
        bail!(
            "State database schema version {} is newer than supported version {}. Upgrade pgkeep.",
            current_version,
            schema::SCHEMA_VERSION
        );
    }

    if current_version < schema::SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = schema::SCHEMA_VERSION,
            "Migrating state database"
        );
        apply_schema(conn, "Standalone database schema")?;
    }

    Ok(())
}

fn apply_schema(conn: &Connection, description: &str) -> Result<()> {
    conn.execute_batch(schema::CREATE_TABLES_SQL)?;
    conn.execute_batch(schema::CREATE_INDEXES_SQL)?;
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (version, applied_at, description) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            schema::SCHEMA_VERSION,
            chrono::Utc::now().to_rfc3339(),
            description
        ],
    )?;
    Ok(())
}
