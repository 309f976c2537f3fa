//! The branch engine: command/query entry point for projects, spaces,
//! branches, keys and environments.
//!
//! [`BranchEngine`] owns the transaction boundaries. Each public method opens
//! exactly one SQLite transaction and hands the connection to the stateless
//! components in [`crate::branch`]. Activity entries are written after commit
//! and never fail the operation they describe.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::branch::planner::validate_resolutions;
use crate::branch::{BranchForker, DiffEngine, KeyIndex, LifecycleGuard, MergeExecutor};
use crate::config::{AppConfig, MergeConfig};
use crate::db::{queries, Database};
use crate::errors::BranchError;
use crate::models::{
    ActivityEntry, Branch, CreatedSpace, DiffResult, Environment, ForkResult, KeyInput,
    KeyWithTranslations, MergeRequest, MergeResult, Project, QualifiedKey, Space, TranslationKey,
    TranslationMap, TranslationStatus, key_part_is_valid,
};

/// Activity-log action names.
pub mod actions {
    pub const BRANCH_FORKED: &str = "branch_forked";
    pub const BRANCH_MERGED: &str = "branch_merged";
    pub const BRANCH_DELETED: &str = "branch_deleted";
}

type LockTable = HashMap<String, Arc<Mutex<()>>>;

pub struct BranchEngine {
    db: Arc<Database>,
    merge: MergeConfig,
    default_branch_name: String,
    /// Advisory locks serializing merges into the same target branch.
    merge_locks: Mutex<LockTable>,
}

impl BranchEngine {
    pub fn new(db: Arc<Database>, config: &AppConfig) -> Self {
        info!(
            batch_size = config.merge.batch_size,
            default_branch = %config.branches.default_name,
            "initializing branch engine"
        );
        Self {
            db,
            merge: config.merge.clone(),
            default_branch_name: config.branches.default_name.clone(),
            merge_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // -----------------------------------------------------------------------
    // Projects & spaces
    // -----------------------------------------------------------------------

    pub fn create_project(&self, name: &str) -> Result<Project, BranchError> {
        let name = required(name, "Project name")?;
        let project = Project {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        queries::insert_project(&self.db.conn(), &project)?;
        info!(project_id = %project.id, name = %project.name, "project created");
        Ok(project)
    }

    /// Create a space together with its default branch.
    pub fn create_space(&self, project_id: &str, name: &str) -> Result<CreatedSpace, BranchError> {
        let name = required(name, "Space name")?;
        let default_name = self.default_branch_name.clone();

        let created = self.db.write_transaction(|conn| {
            queries::get_project(conn, project_id)?;
            let now = Utc::now();
            let space = Space {
                id: Uuid::new_v4().to_string(),
                project_id: project_id.to_string(),
                name: name.to_string(),
                created_at: now,
            };
            queries::insert_space(conn, &space)?;

            let default_branch = Branch {
                id: Uuid::new_v4().to_string(),
                slug: crate::branch::slugify(&default_name),
                name: default_name,
                space_id: space.id.clone(),
                is_default: true,
                source_branch_id: None,
                created_at: now,
                updated_at: now,
            };
            queries::insert_branch(conn, &default_branch)?;
            Ok::<_, BranchError>(CreatedSpace {
                space,
                default_branch,
            })
        })?;

        info!(
            space_id = %created.space.id,
            default_branch = %created.default_branch.name,
            "space created"
        );
        Ok(created)
    }

    pub fn list_spaces(&self, project_id: &str) -> Result<Vec<Space>, BranchError> {
        self.db.transaction(|conn| {
            queries::get_project(conn, project_id)?;
            Ok(queries::list_spaces(conn, project_id)?)
        })
    }

    // -----------------------------------------------------------------------
    // Branches
    // -----------------------------------------------------------------------

    pub fn get_branch(&self, branch_id: &str) -> Result<Branch, BranchError> {
        Ok(self.db.get_branch(branch_id)?)
    }

    /// Branches of a space, default branch first.
    pub fn list_branches(&self, space_id: &str) -> Result<Vec<Branch>, BranchError> {
        self.db.transaction(|conn| {
            queries::get_space(conn, space_id)?;
            Ok(queries::list_branches(conn, space_id)?)
        })
    }

    /// Fork `from_branch_id` into a new branch named `name`.
    pub fn fork(
        &self,
        space_id: &str,
        name: &str,
        from_branch_id: &str,
        user_id: Option<&str>,
    ) -> Result<ForkResult, BranchError> {
        let batch_size = self.merge.batch_size;
        let result = self.db.write_transaction(|conn| {
            BranchForker::fork(conn, name, space_id, from_branch_id, batch_size)
        })?;

        self.record(
            actions::BRANCH_FORKED,
            &result.branch.id,
            user_id,
            json!({
                "name": result.branch.name,
                "sourceBranchId": from_branch_id,
                "keyCount": result.key_count,
            }),
        );
        Ok(result)
    }

    /// Structural diff of `source_branch_id` against `target_branch_id`.
    pub fn diff(
        &self,
        source_branch_id: &str,
        target_branch_id: &str,
    ) -> Result<DiffResult, BranchError> {
        let batch_size = self.merge.batch_size;
        let diff = self.db.transaction(|conn| {
            DiffEngine::diff(conn, source_branch_id, target_branch_id, batch_size)
        })?;
        Ok(diff.to_result())
    }

    /// Merge `source_branch_id` into `request.target_branch_id`.
    ///
    /// Merges into the same target are serialized. Diff, plan and write run
    /// in one IMMEDIATE transaction, so the target cannot change between the
    /// diff and the write.
    pub fn merge(
        &self,
        source_branch_id: &str,
        request: &MergeRequest,
        user_id: Option<&str>,
    ) -> Result<MergeResult, BranchError> {
        let target_branch_id = request.target_branch_id.as_str();
        if source_branch_id == target_branch_id {
            return Err(BranchError::validation("Cannot merge a branch into itself"));
        }
        let resolutions = request.resolutions.as_deref().unwrap_or_default();
        validate_resolutions(resolutions, self.merge.max_resolutions)?;

        let batch_size = self.merge.batch_size;
        let lock = self.target_lock(target_branch_id);
        let result = {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            debug!(target_branch_id, "acquired merge lock");
            self.db.write_transaction(|conn| {
                MergeExecutor::merge(conn, source_branch_id, target_branch_id, resolutions, batch_size)
            })
        };
        self.release_lock(target_branch_id, lock);
        let result = result?;

        if result.success {
            self.record(
                actions::BRANCH_MERGED,
                target_branch_id,
                user_id,
                json!({
                    "sourceBranchId": source_branch_id,
                    "merged": result.merged,
                    "resolutions": resolutions.len(),
                }),
            );
        }
        Ok(result)
    }

    /// Whether `branch_id` may be deleted. `Ok(())` or a Validation error.
    pub fn can_delete(&self, branch_id: &str) -> Result<(), BranchError> {
        self.db
            .transaction(|conn| LifecycleGuard::can_delete(conn, branch_id))
            .map(|_| ())
    }

    pub fn delete_branch(&self, branch_id: &str, user_id: Option<&str>) -> Result<(), BranchError> {
        let branch = self
            .db
            .write_transaction(|conn| LifecycleGuard::delete(conn, branch_id))?;
        self.record(
            actions::BRANCH_DELETED,
            branch_id,
            user_id,
            json!({ "name": branch.name, "spaceId": branch.space_id }),
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Keys
    // -----------------------------------------------------------------------

    /// Create the key if its qualified name is new in the branch, otherwise
    /// update its description (when given) and translations.
    ///
    /// An empty translation value is stored as-is and reads as absent.
    pub fn upsert_key(
        &self,
        branch_id: &str,
        input: &KeyInput,
    ) -> Result<KeyWithTranslations, BranchError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(BranchError::validation("Key name must not be empty"));
        }
        let namespace = input
            .namespace
            .as_deref()
            .map(str::trim)
            .filter(|ns| !ns.is_empty());
        if !key_part_is_valid(name) {
            return Err(BranchError::validation(
                "Key name may not contain ':' or NUL characters",
            ));
        }
        if let Some(ns) = namespace {
            if !key_part_is_valid(ns) {
                return Err(BranchError::validation(
                    "Key namespace may not contain ':' or NUL characters",
                ));
            }
        }
        if input.translations.keys().any(|language| language.trim().is_empty()) {
            return Err(BranchError::validation("Language code must not be empty"));
        }

        self.db.write_transaction(|conn| {
            queries::get_branch(conn, branch_id)?;
            let now = Utc::now();

            let key = match queries::find_key(conn, branch_id, namespace, name)? {
                Some(mut existing) => {
                    if input.description.is_some() {
                        queries::update_key_description(
                            conn,
                            &existing.id,
                            input.description.as_deref(),
                            &now,
                        )?;
                        existing.description = input.description.clone();
                    }
                    existing
                }
                None => {
                    let key = TranslationKey {
                        id: Uuid::new_v4().to_string(),
                        name: name.to_string(),
                        namespace: namespace.map(str::to_string),
                        description: input.description.clone(),
                        branch_id: branch_id.to_string(),
                        created_at: now,
                        updated_at: now,
                    };
                    queries::insert_key(conn, &key)?;
                    debug!(branch_id, key = name, "created key");
                    key
                }
            };

            for (language, value) in &input.translations {
                let status = if value.is_empty() {
                    TranslationStatus::Pending
                } else {
                    TranslationStatus::Translated
                };
                queries::upsert_translation_value(conn, &key.id, language, value, status, &now)?;
            }

            let translations: TranslationMap = queries::list_translations_for_key(conn, &key.id)?
                .into_iter()
                .filter(|t| !t.value.is_empty())
                .map(|t| (t.language, t.value))
                .collect();
            let qualified = QualifiedKey::new(key.namespace.as_deref(), &key.name);
            Ok(KeyWithTranslations {
                key: qualified.to_string(),
                id: key.id,
                name: key.name,
                namespace: key.namespace,
                description: key.description,
                translations,
            })
        })
    }

    /// Every key of a branch with its non-empty values, in qualified-key order.
    pub fn list_keys(&self, branch_id: &str) -> Result<Vec<KeyWithTranslations>, BranchError> {
        let batch_size = self.merge.batch_size;
        let index = self
            .db
            .transaction(|conn| KeyIndex::build(conn, branch_id, batch_size))?;
        let (_, entries) = index.into_parts();
        Ok(entries
            .into_iter()
            .map(|(qualified, entry)| KeyWithTranslations {
                key: qualified.to_string(),
                id: entry.key_id,
                name: qualified.name().to_string(),
                namespace: qualified.namespace().map(str::to_string),
                description: entry.description,
                translations: entry.translations,
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Environments
    // -----------------------------------------------------------------------

    /// Pin a new environment to `branch_id`, which must belong to `space_id`.
    pub fn create_environment(
        &self,
        space_id: &str,
        name: &str,
        branch_id: &str,
    ) -> Result<Environment, BranchError> {
        let name = required(name, "Environment name")?;
        let env = self.db.write_transaction(|conn| {
            queries::get_space(conn, space_id)?;
            let branch = queries::get_branch(conn, branch_id)?;
            if branch.space_id != space_id {
                return Err(BranchError::validation(
                    "Environment branch must belong to the same space",
                ));
            }
            let env = Environment {
                id: Uuid::new_v4().to_string(),
                space_id: space_id.to_string(),
                name: name.to_string(),
                branch_id: branch_id.to_string(),
                created_at: Utc::now(),
            };
            queries::insert_environment(conn, &env)?;
            Ok(env)
        })?;
        info!(environment = %env.name, branch_id, "environment created");
        Ok(env)
    }

    pub fn list_environments(&self, space_id: &str) -> Result<Vec<Environment>, BranchError> {
        self.db.transaction(|conn| {
            queries::get_space(conn, space_id)?;
            Ok(queries::list_environments(conn, space_id)?)
        })
    }

    // -----------------------------------------------------------------------
    // Activity
    // -----------------------------------------------------------------------

    pub fn list_activity(&self, limit: u32) -> Result<Vec<ActivityEntry>, BranchError> {
        Ok(self.db.list_activity(limit)?)
    }

    /// Best-effort activity entry. Failures are logged, never returned.
    fn record(&self, action: &str, branch_id: &str, actor: Option<&str>, details: serde_json::Value) {
        let details = details.to_string();
        if let Err(e) = self
            .db
            .insert_activity(action, Some(branch_id), actor, Some(&details))
        {
            warn!(action, branch_id, error = %e, "failed to record activity");
        }
    }

    // -----------------------------------------------------------------------
    // Merge locks
    // -----------------------------------------------------------------------

    fn lock_table(&self) -> MutexGuard<'_, LockTable> {
        self.merge_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn target_lock(&self, target_branch_id: &str) -> Arc<Mutex<()>> {
        self.lock_table()
            .entry(target_branch_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the table entry once no other merge holds or waits on it.
    fn release_lock(&self, target_branch_id: &str, lock: Arc<Mutex<()>>) {
        let mut table = self.lock_table();
        drop(lock);
        if let Some(entry) = table.get(target_branch_id) {
            if Arc::strong_count(entry) == 1 {
                table.remove(target_branch_id);
            }
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.lock_table().len()
    }
}

fn required<'a>(value: &'a str, what: &str) -> Result<&'a str, BranchError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BranchError::validation(format!("{what} must not be empty")));
    }
    Ok(trimmed)
}
