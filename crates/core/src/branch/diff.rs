//! Structural diff between two branches.
//!
//! Keys are matched by qualified name, never by row id. A key present on both
//! sides is compared language by language over the union of languages:
//!
//! | source    | target    | language is   |
//! |-----------|-----------|---------------|
//! | absent    | absent    | unchanged     |
//! | value     | absent    | one-sided     |
//! | absent    | value     | one-sided     |
//! | value `a` | value `a` | unchanged     |
//! | value `a` | value `b` | two-sided     |
//!
//! Any two-sided language makes the whole key a conflict; otherwise any
//! one-sided language makes it modified; otherwise it is left out.

use rusqlite::Connection;
use tracing::{debug, info};

use super::index::{IndexedKey, KeyIndex};
use crate::errors::BranchError;
use crate::models::{
    BranchRef, DiffResult, KeyedSourceTarget, KeyedTranslations, QualifiedKey, TranslationMap,
};

/// Per-key classification of a key present on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyChange {
    Unchanged,
    Modified,
    Conflict,
}

/// A key present only in the source branch.
#[derive(Debug, Clone)]
pub struct AddedKey {
    pub key: QualifiedKey,
    pub source: IndexedKey,
}

/// A key present only in the target branch.
#[derive(Debug, Clone)]
pub struct DeletedKey {
    pub key: QualifiedKey,
    pub target: IndexedKey,
}

/// A key present in both branches whose values differ.
#[derive(Debug, Clone)]
pub struct ChangedKey {
    pub key: QualifiedKey,
    pub source: IndexedKey,
    pub target: IndexedKey,
}

/// Full-fidelity diff: like [`DiffResult`] but keeps the row ids and key
/// metadata the merge planner needs. Every list is in ascending qualified-key
/// order.
#[derive(Debug, Clone)]
pub struct KeyDiff {
    pub source: BranchRef,
    pub target: BranchRef,
    pub added: Vec<AddedKey>,
    pub modified: Vec<ChangedKey>,
    pub deleted: Vec<DeletedKey>,
    pub conflicts: Vec<ChangedKey>,
}

impl KeyDiff {
    /// The wire shape of this diff.
    pub fn to_result(&self) -> DiffResult {
        DiffResult {
            source: self.source.clone(),
            target: self.target.clone(),
            added: self
                .added
                .iter()
                .map(|a| keyed_translations(&a.key, &a.source.translations))
                .collect(),
            modified: self.modified.iter().map(ChangedKey::to_wire).collect(),
            deleted: self
                .deleted
                .iter()
                .map(|d| keyed_translations(&d.key, &d.target.translations))
                .collect(),
            conflicts: self.conflicts.iter().map(ChangedKey::to_wire).collect(),
        }
    }
}

impl ChangedKey {
    pub fn to_wire(&self) -> KeyedSourceTarget {
        KeyedSourceTarget {
            key: self.key.to_string(),
            namespace: self.key.namespace().map(str::to_string),
            source: self.source.translations.clone(),
            target: self.target.translations.clone(),
        }
    }
}

fn keyed_translations(key: &QualifiedKey, translations: &TranslationMap) -> KeyedTranslations {
    KeyedTranslations {
        key: key.to_string(),
        namespace: key.namespace().map(str::to_string),
        translations: translations.clone(),
    }
}

/// Stateless diff engine.
pub struct DiffEngine;

impl DiffEngine {
    /// Index both branches and compare them.
    ///
    /// Propagates `NotFound` for either branch unchanged.
    pub fn diff(
        conn: &Connection,
        source_branch_id: &str,
        target_branch_id: &str,
        batch_size: usize,
    ) -> Result<KeyDiff, BranchError> {
        let source = KeyIndex::build(conn, source_branch_id, batch_size)?;
        let target = KeyIndex::build(conn, target_branch_id, batch_size)?;
        Ok(Self::compare(source, target))
    }

    /// Compare two already-built indexes.
    pub fn compare(source: KeyIndex, target: KeyIndex) -> KeyDiff {
        info!(
            source = %source.branch().name,
            target = %target.branch().name,
            source_keys = source.len(),
            target_keys = target.len(),
            "computing branch diff"
        );

        let (source_ref, source_entries) = source.into_parts();
        let (target_ref, mut target_entries) = target.into_parts();

        let mut diff = KeyDiff {
            source: source_ref,
            target: target_ref,
            added: Vec::new(),
            modified: Vec::new(),
            deleted: Vec::new(),
            conflicts: Vec::new(),
        };

        // Source entries come out of a BTreeMap, so every list below is
        // pushed in ascending key order.
        for (key, source_key) in source_entries {
            match target_entries.remove(&key) {
                None => diff.added.push(AddedKey {
                    key,
                    source: source_key,
                }),
                Some(target_key) => {
                    let change = classify(&source_key.translations, &target_key.translations);
                    let changed = ChangedKey {
                        key,
                        source: source_key,
                        target: target_key,
                    };
                    match change {
                        KeyChange::Unchanged => {}
                        KeyChange::Modified => diff.modified.push(changed),
                        KeyChange::Conflict => {
                            debug!(key = %changed.key, "conflicting key");
                            diff.conflicts.push(changed);
                        }
                    }
                }
            }
        }

        diff.deleted = target_entries
            .into_iter()
            .map(|(key, target)| DeletedKey { key, target })
            .collect();

        info!(
            added = diff.added.len(),
            modified = diff.modified.len(),
            deleted = diff.deleted.len(),
            conflicts = diff.conflicts.len(),
            "branch diff complete"
        );
        diff
    }
}

/// Classify a key present on both sides. Both maps hold non-empty values only.
pub fn classify(source: &TranslationMap, target: &TranslationMap) -> KeyChange {
    let mut one_sided = false;

    for (language, source_value) in source {
        match target.get(language) {
            Some(target_value) if target_value != source_value => return KeyChange::Conflict,
            Some(_) => {}
            None => one_sided = true,
        }
    }
    if target.keys().any(|language| !source.contains_key(language)) {
        one_sided = true;
    }

    if one_sided {
        KeyChange::Modified
    } else {
        KeyChange::Unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::testutil::{add_branch, fixture, put_key};

    fn map(pairs: &[(&str, &str)]) -> TranslationMap {
        pairs
            .iter()
            .map(|(l, v)| (l.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_classify_language_rules() {
        assert_eq!(classify(&map(&[]), &map(&[])), KeyChange::Unchanged);
        assert_eq!(classify(&map(&[("en", "a")]), &map(&[("en", "a")])), KeyChange::Unchanged);
        assert_eq!(classify(&map(&[("en", "a")]), &map(&[])), KeyChange::Modified);
        assert_eq!(classify(&map(&[]), &map(&[("en", "a")])), KeyChange::Modified);
        assert_eq!(classify(&map(&[("en", "a")]), &map(&[("en", "b")])), KeyChange::Conflict);
        // One two-sided language outweighs any number of one-sided ones.
        assert_eq!(
            classify(&map(&[("en", "a"), ("de", "x")]), &map(&[("en", "b"), ("fr", "y")])),
            KeyChange::Conflict
        );
    }

    #[test]
    fn test_added_deleted_modified_conflict() {
        let (db, ids) = fixture();
        let feature = add_branch(&db, &ids, "feature");

        put_key(&db, &feature, None, "greeting", &[("en", "Hello"), ("de", "Hallo")]);
        put_key(&db, &ids.main, None, "legacy", &[("en", "Old")]);
        put_key(&db, &feature, None, "farewell", &[("en", "Bye")]);
        put_key(&db, &ids.main, None, "farewell", &[("en", "Goodbye")]);
        put_key(&db, &feature, None, "title", &[("en", "Title"), ("fr", "Titre")]);
        put_key(&db, &ids.main, None, "title", &[("en", "Title")]);
        put_key(&db, &feature, None, "same", &[("en", "Same")]);
        put_key(&db, &ids.main, None, "same", &[("en", "Same"), ("de", "")]);

        let diff = DiffEngine::diff(&db.conn(), &feature, &ids.main, 500)
            .unwrap()
            .to_result();

        assert_eq!(diff.source.name, "feature");
        assert_eq!(diff.target.name, "main");
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].key, "greeting");
        assert_eq!(diff.added[0].translations, map(&[("en", "Hello"), ("de", "Hallo")]));
        assert_eq!(diff.deleted.len(), 1);
        assert_eq!(diff.deleted[0].key, "legacy");
        assert_eq!(diff.modified.len(), 1);
        assert_eq!(diff.modified[0].key, "title");
        assert_eq!(diff.modified[0].target, map(&[("en", "Title")]));
        assert_eq!(diff.conflicts.len(), 1);
        assert_eq!(diff.conflicts[0].key, "farewell");
        assert_eq!(diff.conflicts[0].source, map(&[("en", "Bye")]));
        assert_eq!(diff.conflicts[0].target, map(&[("en", "Goodbye")]));
    }

    #[test]
    fn test_matches_by_qualified_name_not_row_id() {
        let (db, ids) = fixture();
        let feature = add_branch(&db, &ids, "feature");
        put_key(&db, &feature, Some("auth"), "title", &[("en", "A")]);
        put_key(&db, &ids.main, None, "title", &[("en", "A")]);

        let diff = DiffEngine::diff(&db.conn(), &feature, &ids.main, 500)
            .unwrap()
            .to_result();
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].key, "auth:title");
        assert_eq!(diff.added[0].namespace.as_deref(), Some("auth"));
        assert_eq!(diff.deleted.len(), 1);
        assert_eq!(diff.deleted[0].key, "title");
    }

    #[test]
    fn test_output_is_sorted_and_deterministic() {
        let (db, ids) = fixture();
        let feature = add_branch(&db, &ids, "feature");
        for name in ["zeta", "alpha", "mid"] {
            put_key(&db, &feature, None, name, &[("en", name)]);
        }
        put_key(&db, &feature, Some("ns"), "aaa", &[("en", "x")]);

        let first = DiffEngine::diff(&db.conn(), &feature, &ids.main, 2).unwrap().to_result();
        let second = DiffEngine::diff(&db.conn(), &feature, &ids.main, 500).unwrap().to_result();
        assert_eq!(first, second);

        let keys: Vec<&str> = first.added.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, vec!["alpha", "mid", "zeta", "ns:aaa"]);
    }

    #[test]
    fn test_identical_branches_have_empty_diff() {
        let (db, ids) = fixture();
        put_key(&db, &ids.main, None, "greeting", &[("en", "Hello")]);

        let diff = DiffEngine::diff(&db.conn(), &ids.main, &ids.main, 500).unwrap();
        assert!(diff.to_result().is_empty());
    }

    #[test]
    fn test_missing_target_is_not_found() {
        let (db, ids) = fixture();
        let err = DiffEngine::diff(&db.conn(), &ids.main, "missing", 500).unwrap_err();
        assert!(matches!(err, BranchError::NotFound { ref id, .. } if id == "missing"));
    }
}
