//! Branch deletion rules.

use rusqlite::Connection;
use tracing::info;

use crate::db::queries;
use crate::errors::BranchError;
use crate::models::Branch;

/// Stateless lifecycle guard.
pub struct LifecycleGuard;

impl LifecycleGuard {
    /// Check that `branch_id` may be deleted and return it.
    ///
    /// The default branch is always protected, whatever its environments.
    pub fn can_delete(conn: &Connection, branch_id: &str) -> Result<Branch, BranchError> {
        let branch = queries::get_branch(conn, branch_id)?;
        if branch.is_default {
            return Err(BranchError::validation("Cannot delete the default branch"));
        }
        if queries::count_environments_for_branch(conn, branch_id)? > 0 {
            return Err(BranchError::validation(
                "Cannot delete branch: it is used by one or more environments",
            ));
        }
        Ok(branch)
    }

    /// Delete `branch_id` after [`can_delete`](Self::can_delete) passes. The
    /// branch's own keys and translations cascade; other branches are untouched.
    pub fn delete(conn: &Connection, branch_id: &str) -> Result<Branch, BranchError> {
        let branch = Self::can_delete(conn, branch_id)?;
        queries::delete_branch(conn, branch_id)?;
        info!(branch_id, branch = %branch.name, "branch deleted");
        Ok(branch)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::branch::testutil::{add_branch, fixture, put_key};
    use crate::models::Environment;

    fn pin(db: &crate::db::Database, space_id: &str, branch_id: &str) {
        queries::insert_environment(
            &db.conn(),
            &Environment {
                id: format!("env-{branch_id}"),
                space_id: space_id.into(),
                name: "production".into(),
                branch_id: branch_id.into(),
                created_at: Utc::now(),
            },
        )
        .unwrap();
    }

    #[test]
    fn test_default_branch_is_protected() {
        let (db, ids) = fixture();
        let err = LifecycleGuard::can_delete(&db.conn(), &ids.main).unwrap_err();
        assert_eq!(err.to_string(), "Cannot delete the default branch");

        // Still the default-branch message when an environment pins it too.
        pin(&db, &ids.space, &ids.main);
        let err = LifecycleGuard::can_delete(&db.conn(), &ids.main).unwrap_err();
        assert_eq!(err.to_string(), "Cannot delete the default branch");
    }

    #[test]
    fn test_pinned_branch_is_protected() {
        let (db, ids) = fixture();
        let feature = add_branch(&db, &ids, "feature");
        pin(&db, &ids.space, &feature);

        let err = LifecycleGuard::delete(&db.conn(), &feature).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot delete branch: it is used by one or more environments"
        );
        assert!(db.get_branch(&feature).is_ok());
    }

    #[test]
    fn test_delete_cascades_to_own_keys_only() {
        let (db, ids) = fixture();
        let feature = add_branch(&db, &ids, "feature");
        put_key(&db, &feature, None, "greeting", &[("en", "Hello")]);
        put_key(&db, &ids.main, None, "greeting", &[("en", "Hello")]);

        let deleted = LifecycleGuard::delete(&db.conn(), &feature).unwrap();
        assert_eq!(deleted.name, "feature");
        assert_eq!(db.count_keys(&feature).unwrap(), 0);
        assert_eq!(db.count_keys(&ids.main).unwrap(), 1);
    }

    #[test]
    fn test_missing_branch_is_not_found() {
        let (db, _) = fixture();
        let err = LifecycleGuard::can_delete(&db.conn(), "missing").unwrap_err();
        assert!(matches!(err, BranchError::NotFound { .. }));
    }
}
