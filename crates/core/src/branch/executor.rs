//! Merge execution.
//!
//! [`MergeExecutor::merge`] runs diff, plan and write against one connection.
//! The caller owns the transaction: the engine wraps the call in
//! [`Database::write_transaction`](crate::db::Database::write_transaction), so
//! any error rolls back every chunk written so far.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::diff::DiffEngine;
use super::planner::{KeyCreate, MergePlan, MergePlanner};
use crate::db::queries;
use crate::errors::BranchError;
use crate::models::{MergeResult, Resolution, Translation, TranslationKey, TranslationStatus};

/// Stateless merge executor.
pub struct MergeExecutor;

impl MergeExecutor {
    /// Merge `source_branch_id` into `target_branch_id`.
    ///
    /// Returns `success == false` with the unresolved conflicts, and writes
    /// nothing, if any conflict lacks a resolution.
    pub fn merge(
        conn: &Connection,
        source_branch_id: &str,
        target_branch_id: &str,
        resolutions: &[Resolution],
        batch_size: usize,
    ) -> Result<MergeResult, BranchError> {
        let diff = DiffEngine::diff(conn, source_branch_id, target_branch_id, batch_size)?;
        let plan = MergePlanner::plan(&diff, resolutions);

        if !plan.is_executable() {
            warn!(
                source_branch = %diff.source.name,
                target_branch = %diff.target.name,
                unresolved = plan.unresolved.len(),
                "merge refused: unresolved conflicts"
            );
            return Ok(MergeResult::blocked(plan.unresolved));
        }

        let merged = Self::apply(conn, target_branch_id, &plan, batch_size)?;
        info!(
            source_branch = %diff.source.name,
            target_branch = %diff.target.name,
            merged,
            "merge applied"
        );
        Ok(MergeResult::applied(merged))
    }

    /// Write an executable plan into `target_branch_id`, `batch_size` keys at a
    /// time. Returns the number of keys created or updated.
    pub fn apply(
        conn: &Connection,
        target_branch_id: &str,
        plan: &MergePlan,
        batch_size: usize,
    ) -> Result<usize, BranchError> {
        if !plan.is_executable() {
            return Err(BranchError::validation(
                "Cannot apply a merge plan with unresolved conflicts",
            ));
        }
        let batch_size = batch_size.max(1);
        let now = Utc::now();

        for (chunk_no, chunk) in plan.to_create.chunks(batch_size).enumerate() {
            for create in chunk {
                insert_copy(conn, target_branch_id, create, &now)?;
            }
            debug!(chunk = chunk_no, keys = chunk.len(), "created keys");
        }

        for (chunk_no, chunk) in plan.to_update.chunks(batch_size).enumerate() {
            let mut rows = 0usize;
            for update in chunk {
                for (language, value) in &update.writes {
                    if queries::upsert_translation_value(
                        conn,
                        &update.key_id,
                        language,
                        value,
                        TranslationStatus::Translated,
                        &now,
                    )? {
                        rows += 1;
                    }
                }
            }
            debug!(chunk = chunk_no, keys = chunk.len(), rows, "updated keys");
        }

        let merged = plan.merged_count();
        if merged > 0 {
            queries::touch_branch(conn, target_branch_id, &now)?;
        }
        Ok(merged)
    }
}

fn insert_copy(
    conn: &Connection,
    branch_id: &str,
    create: &KeyCreate,
    now: &DateTime<Utc>,
) -> Result<(), BranchError> {
    let key = TranslationKey {
        id: Uuid::new_v4().to_string(),
        name: create.key.name().to_string(),
        namespace: create.key.namespace().map(str::to_string),
        description: create.description.clone(),
        branch_id: branch_id.to_string(),
        created_at: *now,
        updated_at: *now,
    };
    queries::insert_key(conn, &key)?;

    for (language, value) in &create.translations {
        queries::insert_translation(
            conn,
            &Translation {
                id: Uuid::new_v4().to_string(),
                key_id: key.id.clone(),
                language: language.clone(),
                value: value.clone(),
                status: TranslationStatus::Translated,
                is_outdated: false,
                version: 1,
                created_at: *now,
                updated_at: *now,
            },
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::testutil::{add_branch, fixture, put_key, values_of};
    use crate::models::TranslationMap;

    fn map(pairs: &[(&str, &str)]) -> TranslationMap {
        pairs
            .iter()
            .map(|(l, v)| (l.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_creates_added_keys() {
        let (db, ids) = fixture();
        let feature = add_branch(&db, &ids, "feature");
        put_key(&db, &feature, Some("auth"), "login", &[("en", "Log in"), ("de", "Anmelden")]);

        let result = MergeExecutor::merge(&db.conn(), &feature, &ids.main, &[], 500).unwrap();
        assert_eq!(result, MergeResult::applied(1));

        let copied = values_of(&db, &ids.main, Some("auth"), "login").unwrap();
        assert_eq!(copied, map(&[("en", "Log in"), ("de", "Anmelden")]));
        let key = db.find_key(&ids.main, Some("auth"), "login").unwrap().unwrap();
        let rows = db.list_translations_for_key(&key.id).unwrap();
        assert!(rows
            .iter()
            .all(|t| t.version == 1 && !t.is_outdated && t.status == TranslationStatus::Translated));
    }

    #[test]
    fn test_conflicts_block_all_writes() {
        let (db, ids) = fixture();
        let feature = add_branch(&db, &ids, "feature");
        put_key(&db, &feature, None, "new", &[("en", "New")]);
        put_key(&db, &feature, None, "farewell", &[("en", "Bye")]);
        put_key(&db, &ids.main, None, "farewell", &[("en", "Goodbye")]);

        let result = MergeExecutor::merge(&db.conn(), &feature, &ids.main, &[], 500).unwrap();
        assert!(!result.success);
        assert_eq!(result.merged, 0);
        assert_eq!(result.conflicts.as_ref().map(Vec::len), Some(1));
        assert!(values_of(&db, &ids.main, None, "new").is_none());
    }

    #[test]
    fn test_update_bumps_version_and_touches_target() {
        let (db, ids) = fixture();
        let feature = add_branch(&db, &ids, "feature");
        put_key(&db, &feature, None, "farewell", &[("en", "Bye")]);
        put_key(&db, &ids.main, None, "farewell", &[("en", "Goodbye")]);
        let before = db.get_branch(&ids.main).unwrap().updated_at;

        let result = MergeExecutor::merge(
            &db.conn(),
            &feature,
            &ids.main,
            &[Resolution::source("farewell")],
            500,
        )
        .unwrap();
        assert_eq!(result, MergeResult::applied(1));

        let key = db.find_key(&ids.main, None, "farewell").unwrap().unwrap();
        let rows = db.list_translations_for_key(&key.id).unwrap();
        assert_eq!(rows[0].value, "Bye");
        assert_eq!(rows[0].version, 2);
        assert!(db.get_branch(&ids.main).unwrap().updated_at >= before);
    }

    #[test]
    fn test_small_batches_write_everything() {
        let (db, ids) = fixture();
        let feature = add_branch(&db, &ids, "feature");
        for i in 0..9 {
            put_key(&db, &feature, None, &format!("k{i}"), &[("en", "v")]);
        }

        let result = MergeExecutor::merge(&db.conn(), &feature, &ids.main, &[], 2).unwrap();
        assert_eq!(result.merged, 9);
        assert_eq!(db.count_keys(&ids.main).unwrap(), 9);
    }

    #[test]
    fn test_apply_refuses_unresolved_plan() {
        let (db, ids) = fixture();
        let mut plan = MergePlan::default();
        plan.unresolved.push(crate::models::KeyedSourceTarget {
            key: "x".into(),
            namespace: None,
            source: map(&[("en", "a")]),
            target: map(&[("en", "b")]),
        });
        let err = MergeExecutor::apply(&db.conn(), &ids.main, &plan, 500).unwrap_err();
        assert!(matches!(err, BranchError::Validation(_)));
    }
}
