//! Shared styling utilities for the CLI.

use console::Style;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

// Diff markers. `colored` forces styling on or off so reports render the
// same whether or not stdout is a terminal.

pub fn added(colored: bool) -> Style {
    Style::new().green().force_styling(colored)
}

pub fn modified(colored: bool) -> Style {
    Style::new().yellow().force_styling(colored)
}

pub fn deleted(colored: bool) -> Style {
    Style::new().red().force_styling(colored)
}

pub fn conflict(colored: bool) -> Style {
    Style::new().red().bold().force_styling(colored)
}
