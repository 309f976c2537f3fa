//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The `schema_version`
//! user-version pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
/// Versions start at 1. The current schema version is stored in the SQLite
/// `user_version` pragma.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS spaces (
            id          TEXT PRIMARY KEY,
            project_id  TEXT NOT NULL REFERENCES projects (id) ON DELETE CASCADE,
            name        TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_spaces_project ON spaces (project_id);

        CREATE TABLE IF NOT EXISTS branches (
            id                TEXT PRIMARY KEY,
            name              TEXT NOT NULL,
            slug              TEXT NOT NULL,
            space_id          TEXT NOT NULL REFERENCES spaces (id) ON DELETE CASCADE,
            is_default        INTEGER NOT NULL DEFAULT 0,
            source_branch_id  TEXT REFERENCES branches (id) ON DELETE SET NULL,
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_branches_space_slug ON branches (space_id, slug);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_branches_one_default
            ON branches (space_id) WHERE is_default = 1;

        CREATE TABLE IF NOT EXISTS translation_keys (
            id           TEXT PRIMARY KEY,
            name         TEXT NOT NULL,
            namespace    TEXT,
            description  TEXT,
            branch_id    TEXT NOT NULL REFERENCES branches (id) ON DELETE CASCADE,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_translation_keys_branch ON translation_keys (branch_id, id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_translation_keys_qualified
            ON translation_keys (branch_id, IFNULL(namespace, ''), name);

        CREATE TABLE IF NOT EXISTS translations (
            id           TEXT PRIMARY KEY,
            key_id       TEXT NOT NULL REFERENCES translation_keys (id) ON DELETE CASCADE,
            language     TEXT NOT NULL,
            value        TEXT NOT NULL DEFAULT '',
            status       TEXT NOT NULL DEFAULT 'pending',
            is_outdated  INTEGER NOT NULL DEFAULT 0,
            version      INTEGER NOT NULL DEFAULT 1,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL,
            UNIQUE (key_id, language)
        );

        CREATE TABLE IF NOT EXISTS environments (
            id          TEXT PRIMARY KEY,
            space_id    TEXT NOT NULL REFERENCES spaces (id) ON DELETE CASCADE,
            name        TEXT NOT NULL,
            branch_id   TEXT NOT NULL REFERENCES branches (id),
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_environments_branch ON environments (branch_id);
        "#,
    ),
    (
        2,
        "activity log",
        r#"
        CREATE TABLE IF NOT EXISTS activity_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            action      TEXT NOT NULL,
            branch_id   TEXT,
            actor       TEXT,
            details     TEXT,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_activity_log_created_at ON activity_log (created_at);
        CREATE INDEX IF NOT EXISTS idx_activity_log_action ON activity_log (action);
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version via the SQLite `user_version` pragma.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_idempotently() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 2);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };

        for table in [
            "projects",
            "spaces",
            "branches",
            "translation_keys",
            "translations",
            "environments",
            "activity_log",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }
}
