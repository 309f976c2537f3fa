//! Domain model types used throughout keybranch.
//!
//! These types bridge the branch engine, database layer, and web API. Wire
//! field names are camelCase so the HTTP shapes match what clients send.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Language code -> translation value.
pub type TranslationMap = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Projects, spaces, environments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A named grouping within a project. Owns one or more branches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A newly created space and the default branch created with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSpace {
    pub space: Space,
    pub default_branch: Branch,
}

/// A deployment target pinned to exactly one branch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: String,
    pub space_id: String,
    pub name: String,
    pub branch_id: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Branches
// ---------------------------------------------------------------------------

/// An independently editable set of translation keys within a space.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub space_id: String,
    pub is_default: bool,
    /// The branch this one was forked from. Lineage metadata only.
    pub source_branch_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Branch {
    pub fn to_ref(&self) -> BranchRef {
        BranchRef {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BranchRef {
    pub id: String,
    pub name: String,
}

/// Outcome of forking a branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkResult {
    pub branch: Branch,
    pub key_count: usize,
}

// ---------------------------------------------------------------------------
// Keys and translations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TranslationKey {
    pub id: String,
    pub name: String,
    pub namespace: Option<String>,
    pub description: Option<String>,
    pub branch_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Review status of a single translation value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TranslationStatus {
    Pending,
    Translated,
    Reviewed,
}

impl TranslationStatus {
    /// Parse a stored status string. Unknown values read as `Pending`.
    pub fn from_str_val(s: &str) -> Self {
        match s {
            "translated" => Self::Translated,
            "reviewed" => Self::Reviewed,
            _ => Self::Pending,
        }
    }
}

impl fmt::Display for TranslationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Translated => write!(f, "translated"),
            Self::Reviewed => write!(f, "reviewed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Translation {
    pub id: String,
    pub key_id: String,
    pub language: String,
    pub value: String,
    pub status: TranslationStatus,
    pub is_outdated: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A key together with its non-empty translation values, as listed by the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyWithTranslations {
    pub key: String,
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub translations: TranslationMap,
}

/// Body of a key create-or-update request.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct KeyInput {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub translations: TranslationMap,
}

// ---------------------------------------------------------------------------
// Qualified key
// ---------------------------------------------------------------------------

/// Separator between namespace and name. Rejected in both by key validation.
const QUALIFIED_SEPARATOR: char = '\u{0}';

/// Separator used in the human / wire form of a namespaced key.
pub const NAMESPACE_DISPLAY_SEPARATOR: char = ':';

/// The `(namespace, name)` identity of a logical key across branches.
///
/// Ordering is by namespace then name (an absent namespace sorts first), which
/// is the ordering of every list in a [`DiffResult`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedKey(String);

impl QualifiedKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        let mut qualified = String::with_capacity(name.len() + 16);
        qualified.push_str(namespace.unwrap_or(""));
        qualified.push(QUALIFIED_SEPARATOR);
        qualified.push_str(name);
        Self(qualified)
    }

    pub fn namespace(&self) -> Option<&str> {
        match self.0.split_once(QUALIFIED_SEPARATOR) {
            Some(("", _)) | None => None,
            Some((ns, _)) => Some(ns),
        }
    }

    pub fn name(&self) -> &str {
        self.0
            .split_once(QUALIFIED_SEPARATOR)
            .map(|(_, name)| name)
            .unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Wire form: `name`, or `namespace:name` for namespaced keys.
impl fmt::Display for QualifiedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace() {
            Some(ns) => write!(f, "{}{}{}", ns, NAMESPACE_DISPLAY_SEPARATOR, self.name()),
            None => write!(f, "{}", self.name()),
        }
    }
}

/// Whether `part` can be used as a namespace or name.
///
/// Neither separator may appear in either part, so both the internal form and
/// the `namespace:name` wire form identify exactly one key.
pub fn key_part_is_valid(part: &str) -> bool {
    !part.contains(QUALIFIED_SEPARATOR) && !part.contains(NAMESPACE_DISPLAY_SEPARATOR)
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// A key present on one side only, with that side's translations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyedTranslations {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub translations: TranslationMap,
}

/// A key present on both sides, with both translation maps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyedSourceTarget {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub source: TranslationMap,
    pub target: TranslationMap,
}

/// Classified structural comparison of two branches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffResult {
    pub source: BranchRef,
    pub target: BranchRef,
    pub added: Vec<KeyedTranslations>,
    pub modified: Vec<KeyedSourceTarget>,
    pub deleted: Vec<KeyedTranslations>,
    pub conflicts: Vec<KeyedSourceTarget>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.conflicts.is_empty()
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Which side wins wholesale for a conflicting key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionSide {
    Source,
    Target,
}

/// `"source"`, `"target"`, or an explicit language -> value map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ResolutionChoice {
    Side(ResolutionSide),
    Manual(TranslationMap),
}

/// Caller-supplied instruction for one conflicting key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub key: String,
    pub resolution: ResolutionChoice,
}

impl Resolution {
    pub fn source(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            resolution: ResolutionChoice::Side(ResolutionSide::Source),
        }
    }

    pub fn target(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            resolution: ResolutionChoice::Side(ResolutionSide::Target),
        }
    }

    pub fn manual(key: impl Into<String>, values: TranslationMap) -> Self {
        Self {
            key: key.into(),
            resolution: ResolutionChoice::Manual(values),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub target_branch_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolutions: Option<Vec<Resolution>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeResult {
    pub success: bool,
    pub merged: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<Vec<KeyedSourceTarget>>,
}

impl MergeResult {
    pub fn applied(merged: usize) -> Self {
        Self {
            success: true,
            merged,
            conflicts: None,
        }
    }

    pub fn blocked(conflicts: Vec<KeyedSourceTarget>) -> Self {
        Self {
            success: false,
            merged: 0,
            conflicts: Some(conflicts),
        }
    }
}

// ---------------------------------------------------------------------------
// Activity log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: i64,
    pub action: String,
    pub branch_id: Option<String>,
    pub actor: Option<String>,
    pub details: Option<String>,
    pub created_at: String,
}
