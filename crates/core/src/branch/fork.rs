//! Branch forking: eager deep copy of a branch's keys and translations.

use std::sync::OnceLock;

use chrono::Utc;
use regex_lite::Regex;
use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::queries;
use crate::errors::BranchError;
use crate::models::{Branch, ForkResult, Translation, TranslationKey};

/// Derive a URL-safe slug: lowercase ASCII alphanumerics, every other run of
/// characters collapsed to a single `-`, no leading or trailing `-`.
pub fn slugify(name: &str) -> String {
    static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
    let re = NON_ALNUM.get_or_init(|| Regex::new("[^a-z0-9]+").expect("static regex"));
    let lower = name.to_ascii_lowercase();
    re.replace_all(&lower, "-").trim_matches('-').to_string()
}

/// Stateless branch forker.
pub struct BranchForker;

impl BranchForker {
    /// Create branch `name` in `space_id` as a full copy of `from_branch_id`.
    ///
    /// All validation happens before the first write. Run inside a transaction
    /// so the source is read as one snapshot and a failure leaves no partial
    /// branch behind.
    pub fn fork(
        conn: &Connection,
        name: &str,
        space_id: &str,
        from_branch_id: &str,
        batch_size: usize,
    ) -> Result<ForkResult, BranchError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BranchError::validation("Branch name must not be empty"));
        }
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(BranchError::validation(
                "Branch name must contain at least one letter or digit",
            ));
        }

        queries::get_space(conn, space_id)?;
        let source = queries::get_branch(conn, from_branch_id)?;
        if source.space_id != space_id {
            return Err(BranchError::validation(
                "Cannot fork a branch from a different space",
            ));
        }
        if queries::find_branch_by_slug(conn, space_id, &slug)?.is_some() {
            return Err(BranchError::validation(format!(
                "A branch named '{}' already exists in this space",
                name
            )));
        }

        let now = Utc::now();
        let branch = Branch {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            slug,
            space_id: space_id.to_string(),
            is_default: false,
            source_branch_id: Some(source.id.clone()),
            created_at: now,
            updated_at: now,
        };
        queries::insert_branch(conn, &branch)?;

        let batch_size = batch_size.max(1);
        let mut key_count = 0usize;
        let mut after_id = String::new();

        loop {
            let page = queries::list_keys_page(conn, &source.id, &after_id, batch_size)?;
            let last_id = match page.last() {
                Some(last) => last.id.clone(),
                None => break,
            };
            let translations =
                queries::list_translations_for_key_range(conn, &source.id, &after_id, &last_id)?;

            let mut new_ids = std::collections::HashMap::with_capacity(page.len());
            for key in &page {
                let copy = TranslationKey {
                    id: Uuid::new_v4().to_string(),
                    branch_id: branch.id.clone(),
                    created_at: now,
                    updated_at: now,
                    ..key.clone()
                };
                queries::insert_key(conn, &copy)?;
                new_ids.insert(key.id.as_str(), copy.id);
            }

            let mut rows = 0usize;
            for t in translations {
                let Some(key_id) = new_ids.get(t.key_id.as_str()) else {
                    continue;
                };
                queries::insert_translation(
                    conn,
                    &Translation {
                        id: Uuid::new_v4().to_string(),
                        key_id: key_id.clone(),
                        created_at: now,
                        updated_at: now,
                        ..t
                    },
                )?;
                rows += 1;
            }

            key_count += page.len();
            debug!(keys = page.len(), translations = rows, "copied fork page");
            if page.len() < batch_size {
                break;
            }
            after_id = last_id;
        }

        info!(
            branch_id = %branch.id,
            branch = %branch.name,
            source_branch = %source.name,
            key_count,
            "branch forked"
        );
        Ok(ForkResult { branch, key_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::diff::DiffEngine;
    use crate::branch::testutil::{fixture, put_key, values_of};

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Feature/New Login"), "feature-new-login");
        assert_eq!(slugify("  --Release 2.0--  "), "release-2-0");
        assert_eq!(slugify("main"), "main");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_fork_copies_everything() {
        let (db, ids) = fixture();
        put_key(&db, &ids.main, None, "greeting", &[("en", "Hello"), ("de", "Hallo")]);
        put_key(&db, &ids.main, Some("auth"), "login", &[("en", "Log in"), ("fr", "")]);
        put_key(&db, &ids.main, None, "bare", &[]);

        let result = BranchForker::fork(&db.conn(), "Feature X", &ids.space, &ids.main, 2).unwrap();
        assert_eq!(result.key_count, 3);
        assert_eq!(result.branch.slug, "feature-x");
        assert!(!result.branch.is_default);
        assert_eq!(result.branch.source_branch_id.as_deref(), Some(ids.main.as_str()));

        let fork_id = result.branch.id;
        assert_eq!(
            values_of(&db, &fork_id, None, "greeting"),
            values_of(&db, &ids.main, None, "greeting")
        );
        let diff = DiffEngine::diff(&db.conn(), &fork_id, &ids.main, 500).unwrap();
        assert!(diff.to_result().is_empty());

        // Deep copy: row ids differ between the branches.
        let original = db.find_key(&ids.main, None, "greeting").unwrap().unwrap();
        let copied = db.find_key(&fork_id, None, "greeting").unwrap().unwrap();
        assert_ne!(original.id, copied.id);

        // The empty "fr" row is copied too, so the copy is row-for-row.
        let login = db.find_key(&fork_id, Some("auth"), "login").unwrap().unwrap();
        assert_eq!(db.list_translations_for_key(&login.id).unwrap().len(), 2);
    }

    #[test]
    fn test_fork_is_independent_of_source() {
        let (db, ids) = fixture();
        put_key(&db, &ids.main, None, "greeting", &[("en", "Hello")]);
        let fork = BranchForker::fork(&db.conn(), "feature", &ids.space, &ids.main, 500).unwrap();

        put_key(&db, &ids.main, None, "greeting", &[("en", "Hi")]);
        let copied = values_of(&db, &fork.branch.id, None, "greeting").unwrap();
        assert_eq!(copied.get("en").map(String::as_str), Some("Hello"));
    }

    #[test]
    fn test_fork_validation() {
        let (db, ids) = fixture();
        let conn = db.conn();

        let err = BranchForker::fork(&conn, "   ", &ids.space, &ids.main, 500).unwrap_err();
        assert!(matches!(err, BranchError::Validation(_)));

        let err = BranchForker::fork(&conn, "???", &ids.space, &ids.main, 500).unwrap_err();
        assert!(matches!(err, BranchError::Validation(_)));

        let err = BranchForker::fork(&conn, "Main", &ids.space, &ids.main, 500).unwrap_err();
        assert_eq!(err.to_string(), "A branch named 'Main' already exists in this space");

        let err = BranchForker::fork(&conn, "x", &ids.space, "missing", 500).unwrap_err();
        assert!(matches!(err, BranchError::NotFound { ref entity, .. } if entity == "branch"));

        let err = BranchForker::fork(&conn, "x", "missing", &ids.main, 500).unwrap_err();
        assert!(matches!(err, BranchError::NotFound { ref entity, .. } if entity == "space"));
    }

    #[test]
    fn test_fork_rejects_cross_space_source() {
        let (db, ids) = fixture();
        let now = Utc::now();
        queries::insert_space(
            &db.conn(),
            &crate::models::Space {
                id: "space-2".into(),
                project_id: ids.project.clone(),
                name: "Mobile".into(),
                created_at: now,
            },
        )
        .unwrap();

        let err = BranchForker::fork(&db.conn(), "x", "space-2", &ids.main, 500).unwrap_err();
        assert!(matches!(err, BranchError::Validation(_)));
    }
}
