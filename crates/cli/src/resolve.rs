//! Turning diff conflicts into merge resolutions.

use anyhow::{Context, Result};
use dialoguer::Select;

use keybranch_core::models::{KeyedSourceTarget, Resolution};

/// How `merge` deals with conflicting keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Refuse to merge while conflicts exist.
    Plain,
    /// Take the source side for every conflict.
    Force,
    /// Ask per conflict.
    Interactive,
}

impl ResolveMode {
    /// Mode for the `merge` flags. `--force` wins if both are somehow set.
    pub fn from_flags(force: bool, interactive: bool) -> Self {
        if force {
            ResolveMode::Force
        } else if interactive {
            ResolveMode::Interactive
        } else {
            ResolveMode::Plain
        }
    }
}

/// Answer to a single interactive prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Source,
    Target,
    Skip,
}

/// Source of per-conflict answers in interactive mode.
pub trait Prompter {
    fn choose(&mut self, conflict: &KeyedSourceTarget) -> Result<Choice>;
}

/// Terminal prompter backed by `dialoguer`.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn choose(&mut self, conflict: &KeyedSourceTarget) -> Result<Choice> {
        println!();
        println!("Conflict on '{}'", conflict.key);
        for (language, value) in &conflict.source {
            println!("  source {language}: {value}");
        }
        for (language, value) in &conflict.target {
            println!("  target {language}: {value}");
        }

        let items = &[
            "source  (take the source branch values)",
            "target  (keep the target branch values)",
            "skip    (leave unresolved)",
        ];
        let picked = Select::new()
            .with_prompt(format!("Resolve '{}'", conflict.key))
            .items(items)
            .default(0)
            .interact()
            .context("failed to read resolution selection")?;

        Ok(match picked {
            0 => Choice::Source,
            1 => Choice::Target,
            _ => Choice::Skip,
        })
    }
}

/// Build the resolution list for `conflicts` under `mode`.
///
/// Returns `None` in plain mode when there is anything to resolve, meaning
/// the merge should not be attempted. Skipped conflicts are simply left out;
/// the server then reports them back as unresolved.
pub fn collect_resolutions(
    conflicts: &[KeyedSourceTarget],
    mode: ResolveMode,
    prompter: &mut dyn Prompter,
) -> Result<Option<Vec<Resolution>>> {
    match mode {
        ResolveMode::Plain if !conflicts.is_empty() => Ok(None),
        ResolveMode::Plain => Ok(Some(Vec::new())),
        ResolveMode::Force => Ok(Some(
            conflicts
                .iter()
                .map(|c| Resolution::source(c.key.clone()))
                .collect(),
        )),
        ResolveMode::Interactive => {
            let mut resolutions = Vec::with_capacity(conflicts.len());
            for conflict in conflicts {
                match prompter.choose(conflict)? {
                    Choice::Source => resolutions.push(Resolution::source(conflict.key.clone())),
                    Choice::Target => resolutions.push(Resolution::target(conflict.key.clone())),
                    Choice::Skip => {}
                }
            }
            Ok(Some(resolutions))
        }
    }
}
