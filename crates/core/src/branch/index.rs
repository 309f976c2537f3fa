//! In-memory index of a branch's keys, keyed by qualified name.

use std::collections::btree_map;
use std::collections::{BTreeMap, HashMap};

use rusqlite::Connection;
use tracing::debug;

use crate::db::queries;
use crate::errors::BranchError;
use crate::models::{BranchRef, QualifiedKey, TranslationMap};

/// One key of an indexed branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedKey {
    /// Row id in the indexed branch. Never comparable across branches.
    pub key_id: String,
    pub description: Option<String>,
    /// Non-empty translation values only; an empty value reads as absent.
    pub translations: TranslationMap,
}

/// Read-only snapshot of a branch's keys and translation values.
#[derive(Debug, Clone)]
pub struct KeyIndex {
    branch: BranchRef,
    entries: BTreeMap<QualifiedKey, IndexedKey>,
}

impl KeyIndex {
    pub fn new(branch: BranchRef, entries: BTreeMap<QualifiedKey, IndexedKey>) -> Self {
        Self { branch, entries }
    }

    /// Load every key of `branch_id`, reading `batch_size` keys (and their
    /// translations) per round trip.
    ///
    /// Fails with `NotFound` if the branch does not exist. Run it inside a
    /// transaction when the index must be consistent with a later write.
    pub fn build(conn: &Connection, branch_id: &str, batch_size: usize) -> Result<Self, BranchError> {
        let branch = queries::get_branch(conn, branch_id)?;
        let batch_size = batch_size.max(1);

        let mut entries = BTreeMap::new();
        let mut after_id = String::new();
        let mut pages = 0usize;

        loop {
            let page = queries::list_keys_page(conn, branch_id, &after_id, batch_size)?;
            let last_id = match page.last() {
                Some(last) => last.id.clone(),
                None => break,
            };

            let mut values: HashMap<String, TranslationMap> = HashMap::new();
            for t in queries::list_translations_for_key_range(conn, branch_id, &after_id, &last_id)? {
                if t.value.is_empty() {
                    continue;
                }
                values.entry(t.key_id).or_default().insert(t.language, t.value);
            }

            let page_len = page.len();
            for key in page {
                let translations = values.remove(&key.id).unwrap_or_default();
                entries.insert(
                    QualifiedKey::new(key.namespace.as_deref(), &key.name),
                    IndexedKey {
                        key_id: key.id,
                        description: key.description,
                        translations,
                    },
                );
            }

            pages += 1;
            if page_len < batch_size {
                break;
            }
            after_id = last_id;
        }

        debug!(
            branch_id,
            keys = entries.len(),
            pages,
            "built key index"
        );
        Ok(Self {
            branch: branch.to_ref(),
            entries,
        })
    }

    pub fn branch(&self) -> &BranchRef {
        &self.branch
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &QualifiedKey) -> Option<&IndexedKey> {
        self.entries.get(key)
    }

    /// Entries in ascending qualified-key order.
    pub fn iter(&self) -> btree_map::Iter<'_, QualifiedKey, IndexedKey> {
        self.entries.iter()
    }

    pub fn into_parts(self) -> (BranchRef, BTreeMap<QualifiedKey, IndexedKey>) {
        (self.branch, self.entries)
    }
}
