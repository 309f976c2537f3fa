//! Merge planning: diff + resolutions -> concrete writes.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use super::diff::{ChangedKey, KeyDiff};
use crate::errors::BranchError;
use crate::models::{
    KeyedSourceTarget, QualifiedKey, Resolution, ResolutionChoice, ResolutionSide, TranslationMap,
};

/// A key to insert into the target, copied from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCreate {
    pub key: QualifiedKey,
    pub description: Option<String>,
    pub translations: TranslationMap,
}

/// Translation writes against an existing target key.
///
/// An empty value in `writes` clears that language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyUpdate {
    pub key: QualifiedKey,
    pub key_id: String,
    pub writes: TranslationMap,
}

#[derive(Debug, Clone, Default)]
pub struct MergePlan {
    pub to_create: Vec<KeyCreate>,
    pub to_update: Vec<KeyUpdate>,
    /// Conflicts with no resolution. Non-empty means nothing may be written.
    pub unresolved: Vec<KeyedSourceTarget>,
}

impl MergePlan {
    pub fn is_executable(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// Number of keys the plan touches once applied.
    pub fn merged_count(&self) -> usize {
        self.to_create.len() + self.to_update.len()
    }
}

/// Stateless merge planner.
pub struct MergePlanner;

impl MergePlanner {
    /// Build a plan from `diff` and the caller's `resolutions`.
    ///
    /// Resolutions are matched against conflicts by wire key (`name` or
    /// `namespace:name`). Call [`validate_resolutions`] first; duplicates are
    /// not detected here.
    pub fn plan(diff: &KeyDiff, resolutions: &[Resolution]) -> MergePlan {
        let by_key: HashMap<&str, &ResolutionChoice> = resolutions
            .iter()
            .map(|r| (r.key.as_str(), &r.resolution))
            .collect();

        let mut plan = MergePlan::default();

        for added in &diff.added {
            plan.to_create.push(KeyCreate {
                key: added.key.clone(),
                description: added.source.description.clone(),
                translations: added.source.translations.clone(),
            });
        }

        // Every modified key is a step, even when only the target has extra
        // languages and there is nothing to copy.
        for modified in &diff.modified {
            plan.to_update.push(update(modified, fill_missing(modified)));
        }

        let mut used = HashSet::new();
        for conflict in &diff.conflicts {
            let wire_key = conflict.key.to_string();
            let Some(choice) = by_key.get(wire_key.as_str()) else {
                plan.unresolved.push(conflict.to_wire());
                continue;
            };
            used.insert(wire_key);

            let writes = match choice {
                ResolutionChoice::Side(ResolutionSide::Source) => take_source(conflict),
                ResolutionChoice::Side(ResolutionSide::Target) => TranslationMap::new(),
                ResolutionChoice::Manual(values) => take_manual(conflict, values),
            };
            if !writes.is_empty() {
                plan.to_update.push(update(conflict, writes));
            }
        }

        for resolution in resolutions {
            if !used.contains(&resolution.key) {
                debug!(key = %resolution.key, "ignoring resolution for a key that is not in conflict");
            }
        }

        info!(
            to_create = plan.to_create.len(),
            to_update = plan.to_update.len(),
            unresolved = plan.unresolved.len(),
            "merge plan built"
        );
        plan
    }
}

/// Reject resolution sets that are too large or name a key twice.
pub fn validate_resolutions(resolutions: &[Resolution], max: usize) -> Result<(), BranchError> {
    if resolutions.len() > max {
        return Err(BranchError::validation(format!(
            "Too many resolutions: {} (maximum is {})",
            resolutions.len(),
            max
        )));
    }
    let mut seen = HashSet::with_capacity(resolutions.len());
    for resolution in resolutions {
        if !seen.insert(resolution.key.as_str()) {
            return Err(BranchError::validation(format!(
                "Duplicate resolution for key '{}'",
                resolution.key
            )));
        }
    }
    Ok(())
}

fn update(changed: &ChangedKey, writes: TranslationMap) -> KeyUpdate {
    KeyUpdate {
        key: changed.key.clone(),
        key_id: changed.target.key_id.clone(),
        writes,
    }
}

/// Source values for languages the target lacks.
fn fill_missing(changed: &ChangedKey) -> TranslationMap {
    let target = &changed.target.translations;
    changed
        .source
        .translations
        .iter()
        .filter(|(language, _)| !target.contains_key(*language))
        .map(|(language, value)| (language.clone(), value.clone()))
        .collect()
}

/// Make the target's values equal to the source's, clearing target-only
/// languages.
fn take_source(changed: &ChangedKey) -> TranslationMap {
    let source = &changed.source.translations;
    let target = &changed.target.translations;

    let mut writes: TranslationMap = source
        .iter()
        .filter(|(language, value)| target.get(*language) != Some(*value))
        .map(|(language, value)| (language.clone(), value.clone()))
        .collect();
    for language in target.keys() {
        if !source.contains_key(language) {
            writes.insert(language.clone(), String::new());
        }
    }
    writes
}

/// Exactly the given languages; an empty value clears the language.
fn take_manual(changed: &ChangedKey, values: &TranslationMap) -> TranslationMap {
    let target = &changed.target.translations;
    values
        .iter()
        .filter(|(language, value)| match target.get(*language) {
            Some(current) => current != *value,
            None => !value.is_empty(),
        })
        .map(|(language, value)| (language.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::branch::diff::DiffEngine;
    use crate::branch::index::{IndexedKey, KeyIndex};
    use crate::models::BranchRef;

    fn map(pairs: &[(&str, &str)]) -> TranslationMap {
        pairs
            .iter()
            .map(|(l, v)| (l.to_string(), v.to_string()))
            .collect()
    }

    fn index(branch: &str, keys: &[(&str, &[(&str, &str)])]) -> KeyIndex {
        let entries: BTreeMap<QualifiedKey, IndexedKey> = keys
            .iter()
            .map(|(name, values)| {
                (
                    QualifiedKey::new(None, name),
                    IndexedKey {
                        key_id: format!("{branch}-{name}"),
                        description: Some(format!("{name} text")),
                        translations: map(values),
                    },
                )
            })
            .collect();
        KeyIndex::new(
            BranchRef {
                id: branch.into(),
                name: branch.into(),
            },
            entries,
        )
    }

    fn sample_diff() -> KeyDiff {
        let source = index(
            "src",
            &[
                ("greeting", &[("en", "Hello"), ("de", "Hallo")]),
                ("farewell", &[("en", "Bye"), ("de", "Tschuess")]),
                ("title", &[("en", "Title"), ("fr", "Titre")]),
                ("extra", &[("en", "Extra")]),
            ],
        );
        let target = index(
            "tgt",
            &[
                ("farewell", &[("en", "Goodbye"), ("fr", "Au revoir")]),
                ("title", &[("en", "Title")]),
                ("extra", &[("en", "Extra"), ("es", "Extra")]),
                ("legacy", &[("en", "Old")]),
            ],
        );
        DiffEngine::compare(source, target)
    }

    #[test]
    fn test_unresolved_conflict_blocks_plan() {
        let plan = MergePlanner::plan(&sample_diff(), &[]);
        assert!(!plan.is_executable());
        assert_eq!(plan.unresolved.len(), 1);
        assert_eq!(plan.unresolved[0].key, "farewell");
        assert_eq!(plan.unresolved[0].source, map(&[("en", "Bye"), ("de", "Tschuess")]));
    }

    #[test]
    fn test_added_and_modified_keys() {
        let plan = MergePlanner::plan(&sample_diff(), &[Resolution::target("farewell")]);
        assert!(plan.is_executable());

        assert_eq!(plan.to_create.len(), 1);
        assert_eq!(plan.to_create[0].key.name(), "greeting");
        assert_eq!(plan.to_create[0].description.as_deref(), Some("greeting text"));

        // "extra" only differs by a target-only language, so its step writes
        // nothing; the "target" resolution adds no step at all.
        assert_eq!(plan.to_update.len(), 2);
        assert_eq!(plan.to_update[0].key.name(), "extra");
        assert!(plan.to_update[0].writes.is_empty());
        assert_eq!(plan.to_update[1].key.name(), "title");
        assert_eq!(plan.to_update[1].key_id, "tgt-title");
        assert_eq!(plan.to_update[1].writes, map(&[("fr", "Titre")]));
        assert_eq!(plan.merged_count(), 3);
    }

    #[test]
    fn test_source_resolution_replaces_wholesale() {
        let plan = MergePlanner::plan(&sample_diff(), &[Resolution::source("farewell")]);
        let farewell = plan
            .to_update
            .iter()
            .find(|u| u.key.name() == "farewell")
            .unwrap();
        assert_eq!(
            farewell.writes,
            map(&[("en", "Bye"), ("de", "Tschuess"), ("fr", "")])
        );
    }

    #[test]
    fn test_manual_resolution_writes_only_given_languages() {
        let resolution = Resolution::manual("farewell", map(&[("en", "See you"), ("it", "")]));
        let plan = MergePlanner::plan(&sample_diff(), &[resolution]);
        let farewell = plan
            .to_update
            .iter()
            .find(|u| u.key.name() == "farewell")
            .unwrap();
        assert_eq!(farewell.writes, map(&[("en", "See you")]));
    }

    #[test]
    fn test_deleted_keys_never_planned() {
        let plan = MergePlanner::plan(&sample_diff(), &[Resolution::source("farewell")]);
        assert!(plan.to_create.iter().all(|c| c.key.name() != "legacy"));
        assert!(plan.to_update.iter().all(|u| u.key.name() != "legacy"));
    }

    #[test]
    fn test_resolution_for_non_conflict_is_ignored() {
        let plan = MergePlanner::plan(
            &sample_diff(),
            &[Resolution::source("farewell"), Resolution::source("title")],
        );
        let title = plan.to_update.iter().find(|u| u.key.name() == "title").unwrap();
        assert_eq!(title.writes, map(&[("fr", "Titre")]));
    }

    #[test]
    fn test_validate_resolutions() {
        assert!(validate_resolutions(&[Resolution::source("a")], 1).is_ok());

        let err = validate_resolutions(&[Resolution::source("a"), Resolution::target("b")], 1)
            .unwrap_err();
        assert!(matches!(err, BranchError::Validation(_)));

        let err = validate_resolutions(&[Resolution::source("a"), Resolution::target("a")], 10)
            .unwrap_err();
        assert_eq!(err.to_string(), "Duplicate resolution for key 'a'");
    }
}
