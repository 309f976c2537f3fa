//! keybranch core library.
//!
//! This crate provides the foundational components for branching localization
//! data: configuration, database persistence, the domain model, and the branch
//! engine that forks, diffs and merges branches of translation keys.

pub mod branch;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod models;

// Re-exports for convenience.
pub use config::AppConfig;
pub use db::Database;
pub use engine::BranchEngine;
pub use errors::{BranchError, CoreError};
