//! Text rendering of a branch diff for the `diff` and `merge` commands.

use std::collections::BTreeSet;
use std::fmt::Write;

use keybranch_core::models::{DiffResult, KeyedSourceTarget, TranslationMap};

use crate::style;

const MISSING: &str = "(none)";

/// Render `diff` as a multi-line report ending in a summary line.
///
/// Sections come in the order added, modified, deleted, conflicts. Keys keep
/// the order the server returned them in.
pub fn render_diff(diff: &DiffResult, colored: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} -> {}", diff.source.name, diff.target.name);

    if diff.is_empty() {
        let _ = writeln!(out, "Branches are identical.");
        return out;
    }
    out.push('\n');

    let added = style::added(colored);
    for entry in &diff.added {
        let _ = writeln!(out, "{} {}", added.apply_to("+"), entry.key);
        write_values(&mut out, &entry.translations);
    }

    let modified = style::modified(colored);
    for entry in &diff.modified {
        let _ = writeln!(out, "{} {}", modified.apply_to("~"), entry.key);
        write_pairs(&mut out, entry);
    }

    let deleted = style::deleted(colored);
    for entry in &diff.deleted {
        let _ = writeln!(out, "{} {}", deleted.apply_to("-"), entry.key);
        write_values(&mut out, &entry.translations);
    }

    let conflict = style::conflict(colored);
    for entry in &diff.conflicts {
        let _ = writeln!(out, "{} {}", conflict.apply_to("!"), entry.key);
        write_pairs(&mut out, entry);
    }

    out.push('\n');
    let _ = writeln!(out, "{}", summary(diff));
    out
}

/// `"2 added, 0 modified, 1 deleted, 1 conflict"`.
pub fn summary(diff: &DiffResult) -> String {
    let conflicts = diff.conflicts.len();
    format!(
        "{} added, {} modified, {} deleted, {} {}",
        diff.added.len(),
        diff.modified.len(),
        diff.deleted.len(),
        conflicts,
        if conflicts == 1 { "conflict" } else { "conflicts" }
    )
}

fn write_values(out: &mut String, values: &TranslationMap) {
    for (language, value) in values {
        let _ = writeln!(out, "    {language}: {value}");
    }
}

fn write_pairs(out: &mut String, entry: &KeyedSourceTarget) {
    let languages: BTreeSet<&String> = entry.source.keys().chain(entry.target.keys()).collect();
    for language in languages {
        let source = entry.source.get(language).map(String::as_str);
        let target = entry.target.get(language).map(String::as_str);
        if source == target {
            continue;
        }
        let _ = writeln!(
            out,
            "    {language}: {} -> {}",
            source.unwrap_or(MISSING),
            target.unwrap_or(MISSING)
        );
    }
}
