//! Branch fork, diff and merge.
//!
//! The branch subsystem is responsible for:
//! 1. **Indexing** -- loading a branch's keys into a map keyed by qualified name.
//! 2. **Diffing** -- classifying two indexes into added / modified / deleted / conflicting keys.
//! 3. **Planning** -- turning a diff plus caller resolutions into a write plan.
//! 4. **Executing** -- applying a plan to the target branch in one transaction.
//! 5. **Forking** -- deep-copying a branch into a new one.
//! 6. **Guarding** -- refusing to delete default or environment-pinned branches.
//!
//! Every component works on a borrowed `rusqlite::Connection` so the caller
//! decides the transaction boundary; see [`crate::engine::BranchEngine`].

pub mod diff;
pub mod executor;
pub mod fork;
pub mod guard;
pub mod index;
pub mod planner;

pub use diff::{DiffEngine, KeyDiff};
pub use executor::MergeExecutor;
pub use fork::{slugify, BranchForker};
pub use guard::LifecycleGuard;
pub use index::{IndexedKey, KeyIndex};
pub use planner::{MergePlan, MergePlanner};
