//! Typed query helpers for every table in the keybranch database.
//!
//! The free functions take a `&Connection` so the branch engine can compose
//! them inside a single transaction. The `impl Database` block wraps the
//! read-only ones for callers that just want a one-shot query.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{
    ActivityEntry, Branch, Environment, Project, Space, Translation, TranslationKey,
    TranslationStatus,
};

const BRANCH_COLUMNS: &str =
    "id, name, slug, space_id, is_default, source_branch_id, created_at, updated_at";
const KEY_COLUMNS: &str = "id, name, namespace, description, branch_id, created_at, updated_at";
const TRANSLATION_COLUMNS: &str =
    "t.id, t.key_id, t.language, t.value, t.status, t.is_outdated, t.version, t.created_at, t.updated_at";

fn not_found(entity: &str, id: &str) -> DatabaseError {
    DatabaseError::NotFound {
        entity: entity.into(),
        id: id.to_string(),
    }
}

/// Map `QueryReturnedNoRows` to a typed NotFound.
fn or_not_found<T>(
    result: Result<T, rusqlite::Error>,
    entity: &str,
    id: &str,
) -> Result<T, DatabaseError> {
    result.map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => not_found(entity, id),
        other => other.into(),
    })
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    let created_at: String = row.get(2)?;
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: parse_datetime(&created_at),
    })
}

fn space_from_row(row: &Row<'_>) -> rusqlite::Result<Space> {
    let created_at: String = row.get(3)?;
    Ok(Space {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        created_at: parse_datetime(&created_at),
    })
}

fn branch_from_row(row: &Row<'_>) -> rusqlite::Result<Branch> {
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    Ok(Branch {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        space_id: row.get(3)?,
        is_default: row.get(4)?,
        source_branch_id: row.get(5)?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

fn key_from_row(row: &Row<'_>) -> rusqlite::Result<TranslationKey> {
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    Ok(TranslationKey {
        id: row.get(0)?,
        name: row.get(1)?,
        namespace: row.get(2)?,
        description: row.get(3)?,
        branch_id: row.get(4)?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

fn translation_from_row(row: &Row<'_>) -> rusqlite::Result<Translation> {
    let status: String = row.get(4)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    Ok(Translation {
        id: row.get(0)?,
        key_id: row.get(1)?,
        language: row.get(2)?,
        value: row.get(3)?,
        status: TranslationStatus::from_str_val(&status),
        is_outdated: row.get(5)?,
        version: row.get(6)?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

fn environment_from_row(row: &Row<'_>) -> rusqlite::Result<Environment> {
    let created_at: String = row.get(4)?;
    Ok(Environment {
        id: row.get(0)?,
        space_id: row.get(1)?,
        name: row.get(2)?,
        branch_id: row.get(3)?,
        created_at: parse_datetime(&created_at),
    })
}

// ---------------------------------------------------------------------------
// projects / spaces
// ---------------------------------------------------------------------------

pub fn insert_project(conn: &Connection, project: &Project) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO projects (id, name, created_at) VALUES (?1, ?2, ?3)",
        params![project.id, project.name, project.created_at.to_rfc3339()],
    )?;
    debug!(id = %project.id, name = %project.name, "inserted project");
    Ok(())
}

pub fn get_project(conn: &Connection, id: &str) -> Result<Project, DatabaseError> {
    or_not_found(
        conn.query_row(
            "SELECT id, name, created_at FROM projects WHERE id = ?1",
            params![id],
            project_from_row,
        ),
        "project",
        id,
    )
}

pub fn insert_space(conn: &Connection, space: &Space) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO spaces (id, project_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![space.id, space.project_id, space.name, space.created_at.to_rfc3339()],
    )?;
    debug!(id = %space.id, project_id = %space.project_id, "inserted space");
    Ok(())
}

pub fn get_space(conn: &Connection, id: &str) -> Result<Space, DatabaseError> {
    or_not_found(
        conn.query_row(
            "SELECT id, project_id, name, created_at FROM spaces WHERE id = ?1",
            params![id],
            space_from_row,
        ),
        "space",
        id,
    )
}

pub fn list_spaces(conn: &Connection, project_id: &str) -> Result<Vec<Space>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, project_id, name, created_at FROM spaces
         WHERE project_id = ?1 ORDER BY name, id",
    )?;
    let spaces = stmt
        .query_map(params![project_id], space_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(spaces)
}

// ---------------------------------------------------------------------------
// branches
// ---------------------------------------------------------------------------

pub fn insert_branch(conn: &Connection, branch: &Branch) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO branches (id, name, slug, space_id, is_default, source_branch_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            branch.id,
            branch.name,
            branch.slug,
            branch.space_id,
            branch.is_default,
            branch.source_branch_id,
            branch.created_at.to_rfc3339(),
            branch.updated_at.to_rfc3339(),
        ],
    )?;
    debug!(id = %branch.id, slug = %branch.slug, is_default = branch.is_default, "inserted branch");
    Ok(())
}

pub fn get_branch(conn: &Connection, id: &str) -> Result<Branch, DatabaseError> {
    or_not_found(
        conn.query_row(
            &format!("SELECT {BRANCH_COLUMNS} FROM branches WHERE id = ?1"),
            params![id],
            branch_from_row,
        ),
        "branch",
        id,
    )
}

pub fn find_branch_by_slug(
    conn: &Connection,
    space_id: &str,
    slug: &str,
) -> Result<Option<Branch>, DatabaseError> {
    let branch = conn
        .query_row(
            &format!("SELECT {BRANCH_COLUMNS} FROM branches WHERE space_id = ?1 AND slug = ?2"),
            params![space_id, slug],
            branch_from_row,
        )
        .optional()?;
    Ok(branch)
}

/// Branches of a space, default branch first, then by name.
pub fn list_branches(conn: &Connection, space_id: &str) -> Result<Vec<Branch>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BRANCH_COLUMNS} FROM branches WHERE space_id = ?1
         ORDER BY is_default DESC, name, id"
    ))?;
    let branches = stmt
        .query_map(params![space_id], branch_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(branches)
}

/// Delete a branch row. Its keys and translations go with it via
/// `ON DELETE CASCADE`.
pub fn delete_branch(conn: &Connection, id: &str) -> Result<(), DatabaseError> {
    let changed = conn.execute("DELETE FROM branches WHERE id = ?1", params![id])?;
    if changed == 0 {
        return Err(not_found("branch", id));
    }
    debug!(id, "deleted branch");
    Ok(())
}

pub fn touch_branch(conn: &Connection, id: &str, now: &DateTime<Utc>) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE branches SET updated_at = ?1 WHERE id = ?2",
        params![now.to_rfc3339(), id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// environments
// ---------------------------------------------------------------------------

pub fn insert_environment(conn: &Connection, env: &Environment) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO environments (id, space_id, name, branch_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![env.id, env.space_id, env.name, env.branch_id, env.created_at.to_rfc3339()],
    )?;
    debug!(id = %env.id, branch_id = %env.branch_id, "inserted environment");
    Ok(())
}

pub fn list_environments(
    conn: &Connection,
    space_id: &str,
) -> Result<Vec<Environment>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, space_id, name, branch_id, created_at FROM environments
         WHERE space_id = ?1 ORDER BY name, id",
    )?;
    let envs = stmt
        .query_map(params![space_id], environment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(envs)
}

pub fn count_environments_for_branch(
    conn: &Connection,
    branch_id: &str,
) -> Result<i64, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM environments WHERE branch_id = ?1",
        params![branch_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ---------------------------------------------------------------------------
// translation_keys
// ---------------------------------------------------------------------------

pub fn insert_key(conn: &Connection, key: &TranslationKey) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO translation_keys (id, name, namespace, description, branch_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            key.id,
            key.name,
            key.namespace,
            key.description,
            key.branch_id,
            key.created_at.to_rfc3339(),
            key.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn find_key(
    conn: &Connection,
    branch_id: &str,
    namespace: Option<&str>,
    name: &str,
) -> Result<Option<TranslationKey>, DatabaseError> {
    let key = conn
        .query_row(
            &format!(
                "SELECT {KEY_COLUMNS} FROM translation_keys
                 WHERE branch_id = ?1 AND IFNULL(namespace, '') = ?2 AND name = ?3"
            ),
            params![branch_id, namespace.unwrap_or(""), name],
            key_from_row,
        )
        .optional()?;
    Ok(key)
}

pub fn update_key_description(
    conn: &Connection,
    key_id: &str,
    description: Option<&str>,
    now: &DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE translation_keys SET description = ?1, updated_at = ?2 WHERE id = ?3",
        params![description, now.to_rfc3339(), key_id],
    )?;
    Ok(())
}

pub fn count_keys(conn: &Connection, branch_id: &str) -> Result<i64, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM translation_keys WHERE branch_id = ?1",
        params![branch_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// One page of a branch's keys in id order, starting after `after_id`
/// (exclusive; pass `""` for the first page).
pub fn list_keys_page(
    conn: &Connection,
    branch_id: &str,
    after_id: &str,
    limit: usize,
) -> Result<Vec<TranslationKey>, DatabaseError> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {KEY_COLUMNS} FROM translation_keys
         WHERE branch_id = ?1 AND id > ?2 ORDER BY id LIMIT ?3"
    ))?;
    let keys = stmt
        .query_map(params![branch_id, after_id, limit as i64], key_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(keys)
}

// ---------------------------------------------------------------------------
// translations
// ---------------------------------------------------------------------------

/// Translations for the keys of `branch_id` whose ids fall in
/// `(after_id, last_id]`, i.e. the keys of one [`list_keys_page`] page.
pub fn list_translations_for_key_range(
    conn: &Connection,
    branch_id: &str,
    after_id: &str,
    last_id: &str,
) -> Result<Vec<Translation>, DatabaseError> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {TRANSLATION_COLUMNS} FROM translations t
         JOIN translation_keys k ON k.id = t.key_id
         WHERE k.branch_id = ?1 AND k.id > ?2 AND k.id <= ?3
         ORDER BY t.key_id, t.language"
    ))?;
    let rows = stmt
        .query_map(params![branch_id, after_id, last_id], translation_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_translations_for_key(
    conn: &Connection,
    key_id: &str,
) -> Result<Vec<Translation>, DatabaseError> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {TRANSLATION_COLUMNS} FROM translations t WHERE t.key_id = ?1 ORDER BY t.language"
    ))?;
    let rows = stmt
        .query_map(params![key_id], translation_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn insert_translation(conn: &Connection, t: &Translation) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO translations (id, key_id, language, value, status, is_outdated, version, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    stmt.execute(params![
        t.id,
        t.key_id,
        t.language,
        t.value,
        t.status.to_string(),
        t.is_outdated,
        t.version,
        t.created_at.to_rfc3339(),
        t.updated_at.to_rfc3339(),
    ])?;
    Ok(())
}

/// Insert or update the `(key_id, language)` translation.
///
/// An existing row is only touched when its value actually changes; the
/// version is bumped and the outdated flag cleared. Returns whether a row was
/// written.
pub fn upsert_translation_value(
    conn: &Connection,
    key_id: &str,
    language: &str,
    value: &str,
    status: TranslationStatus,
    now: &DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO translations (id, key_id, language, value, status, is_outdated, version, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, 1, ?6, ?6)
         ON CONFLICT (key_id, language) DO UPDATE SET
             value = excluded.value,
             status = excluded.status,
             is_outdated = 0,
             version = translations.version + 1,
             updated_at = excluded.updated_at
         WHERE translations.value <> excluded.value",
    )?;
    let changed = stmt.execute(params![
        uuid::Uuid::new_v4().to_string(),
        key_id,
        language,
        value,
        status.to_string(),
        now.to_rfc3339(),
    ])?;
    Ok(changed > 0)
}

// ---------------------------------------------------------------------------
// activity_log
// ---------------------------------------------------------------------------

pub fn insert_activity(
    conn: &Connection,
    action: &str,
    branch_id: Option<&str>,
    actor: Option<&str>,
    details: Option<&str>,
) -> Result<i64, DatabaseError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO activity_log (action, branch_id, actor, details, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![action, branch_id, actor, details, now],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, action, "inserted activity_log entry");
    Ok(id)
}

// ---------------------------------------------------------------------------
// Database wrappers
// ---------------------------------------------------------------------------

impl Database {
    pub fn get_project(&self, id: &str) -> Result<Project, DatabaseError> {
        get_project(&self.conn(), id)
    }

    pub fn get_space(&self, id: &str) -> Result<Space, DatabaseError> {
        get_space(&self.conn(), id)
    }

    pub fn list_spaces(&self, project_id: &str) -> Result<Vec<Space>, DatabaseError> {
        list_spaces(&self.conn(), project_id)
    }

    pub fn get_branch(&self, id: &str) -> Result<Branch, DatabaseError> {
        get_branch(&self.conn(), id)
    }

    pub fn list_branches(&self, space_id: &str) -> Result<Vec<Branch>, DatabaseError> {
        list_branches(&self.conn(), space_id)
    }

    pub fn list_environments(&self, space_id: &str) -> Result<Vec<Environment>, DatabaseError> {
        list_environments(&self.conn(), space_id)
    }

    pub fn count_keys(&self, branch_id: &str) -> Result<i64, DatabaseError> {
        count_keys(&self.conn(), branch_id)
    }

    pub fn find_key(
        &self,
        branch_id: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<TranslationKey>, DatabaseError> {
        find_key(&self.conn(), branch_id, namespace, name)
    }

    pub fn list_translations_for_key(&self, key_id: &str) -> Result<Vec<Translation>, DatabaseError> {
        list_translations_for_key(&self.conn(), key_id)
    }

    /// Insert an activity-log entry.
    pub fn insert_activity(
        &self,
        action: &str,
        branch_id: Option<&str>,
        actor: Option<&str>,
        details: Option<&str>,
    ) -> Result<i64, DatabaseError> {
        insert_activity(&self.conn(), action, branch_id, actor, details)
    }

    /// List recent activity-log entries, newest first.
    pub fn list_activity(&self, limit: u32) -> Result<Vec<ActivityEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, action, branch_id, actor, details, created_at
             FROM activity_log ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit], |row| {
                Ok(ActivityEntry {
                    id: row.get(0)?,
                    action: row.get(1)?,
                    branch_id: row.get(2)?,
                    actor: row.get(3)?,
                    details: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

/// Parse a datetime string, returning Utc::now() as a fallback if parsing fails.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn seed_branch(db: &Database) -> Branch {
        let now = Utc::now();
        let conn = db.conn();
        insert_project(
            &conn,
            &Project {
                id: "p".into(),
                name: "Project".into(),
                created_at: now,
            },
        )
        .unwrap();
        insert_space(
            &conn,
            &Space {
                id: "s".into(),
                project_id: "p".into(),
                name: "Web".into(),
                created_at: now,
            },
        )
        .unwrap();
        let branch = Branch {
            id: "b".into(),
            name: "main".into(),
            slug: "main".into(),
            space_id: "s".into(),
            is_default: true,
            source_branch_id: None,
            created_at: now,
            updated_at: now,
        };
        insert_branch(&conn, &branch).unwrap();
        branch
    }

    fn key(id: &str, namespace: Option<&str>, name: &str) -> TranslationKey {
        let now = Utc::now();
        TranslationKey {
            id: id.into(),
            name: name.into(),
            namespace: namespace.map(str::to_string),
            description: None,
            branch_id: "b".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_branch_crud() {
        let db = setup_db();
        let branch = seed_branch(&db);
        assert_eq!(db.get_branch("b").unwrap(), branch);
        assert!(matches!(
            db.get_branch("missing"),
            Err(DatabaseError::NotFound { ref entity, .. }) if entity == "branch"
        ));
        assert!(find_branch_by_slug(&db.conn(), "s", "main").unwrap().is_some());
        assert_eq!(db.list_branches("s").unwrap().len(), 1);
    }

    #[test]
    fn test_second_default_branch_rejected() {
        let db = setup_db();
        let mut other = seed_branch(&db);
        other.id = "b2".into();
        other.slug = "other".into();
        assert!(insert_branch(&db.conn(), &other).is_err());
    }

    #[test]
    fn test_qualified_key_uniqueness() {
        let db = setup_db();
        seed_branch(&db);
        let conn = db.conn();
        insert_key(&conn, &key("k1", None, "greeting")).unwrap();
        insert_key(&conn, &key("k2", Some("auth"), "greeting")).unwrap();
        assert!(insert_key(&conn, &key("k3", None, "greeting")).is_err());

        let found = find_key(&conn, "b", Some("auth"), "greeting").unwrap().unwrap();
        assert_eq!(found.id, "k2");
        assert_eq!(find_key(&conn, "b", None, "greeting").unwrap().unwrap().id, "k1");
    }

    #[test]
    fn test_keys_page_and_translation_range() {
        let db = setup_db();
        seed_branch(&db);
        let conn = db.conn();
        let now = Utc::now();
        for id in ["k1", "k2", "k3"] {
            insert_key(&conn, &key(id, None, id)).unwrap();
            upsert_translation_value(&conn, id, "en", id, TranslationStatus::Translated, &now)
                .unwrap();
        }

        let first = list_keys_page(&conn, "b", "", 2).unwrap();
        assert_eq!(first.iter().map(|k| k.id.as_str()).collect::<Vec<_>>(), vec!["k1", "k2"]);
        let translations = list_translations_for_key_range(&conn, "b", "", "k2").unwrap();
        assert_eq!(translations.len(), 2);

        let second = list_keys_page(&conn, "b", "k2", 2).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, "k3");
    }

    #[test]
    fn test_upsert_translation_value_bumps_version_only_on_change() {
        let db = setup_db();
        seed_branch(&db);
        let conn = db.conn();
        let now = Utc::now();
        insert_key(&conn, &key("k1", None, "greeting")).unwrap();

        assert!(upsert_translation_value(&conn, "k1", "en", "Hi", TranslationStatus::Translated, &now).unwrap());
        assert!(!upsert_translation_value(&conn, "k1", "en", "Hi", TranslationStatus::Translated, &now).unwrap());
        assert!(upsert_translation_value(&conn, "k1", "en", "Hello", TranslationStatus::Translated, &now).unwrap());

        let rows = list_translations_for_key(&conn, "k1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, "Hello");
        assert_eq!(rows[0].version, 2);
    }

    #[test]
    fn test_delete_branch_cascades() {
        let db = setup_db();
        seed_branch(&db);
        let conn = db.conn();
        let now = Utc::now();
        insert_key(&conn, &key("k1", None, "greeting")).unwrap();
        upsert_translation_value(&conn, "k1", "en", "Hi", TranslationStatus::Translated, &now).unwrap();

        delete_branch(&conn, "b").unwrap();
        assert_eq!(count_keys(&conn, "b").unwrap(), 0);
        assert!(list_translations_for_key(&conn, "k1").unwrap().is_empty());
        assert!(matches!(delete_branch(&conn, "b"), Err(DatabaseError::NotFound { .. })));
    }

    #[test]
    fn test_activity_log() {
        let db = setup_db();
        db.insert_activity("branch_forked", Some("b"), Some("alice"), Some("test"))
            .unwrap();
        let entries = db.list_activity(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "branch_forked");
        assert_eq!(entries[0].actor.as_deref(), Some("alice"));
    }
}
