//! keybranch command-line client.
//!
//! Talks to a running keybranch server to list, fork, delete, diff and merge
//! branches, and generates / validates server configuration files.

mod client;
mod report;
mod resolve;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use keybranch_core::config::AppConfig;
use keybranch_core::models::{Branch, MergeRequest};

use crate::client::ApiClient;
use crate::resolve::{ResolveMode, TerminalPrompter};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// keybranch command-line client.
#[derive(Parser, Debug)]
#[command(
    name = "keybranch",
    version,
    about = "Fork, diff and merge localization branches"
)]
struct Cli {
    /// Base URL of the keybranch server.
    #[arg(short, long, global = true, default_value = "http://127.0.0.1:3000")]
    server: String,

    /// User name recorded in the activity log for fork / merge / delete.
    #[arg(short, long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the branches of a space.
    Branches {
        /// Space ID.
        space: String,
    },

    /// Create a branch as a full copy of an existing one.
    Fork {
        /// Space ID.
        space: String,

        /// Name of the new branch.
        name: String,

        /// Branch ID to copy from.
        #[arg(long)]
        from: String,
    },

    /// Delete a branch.
    Delete {
        /// Branch ID.
        branch: String,
    },

    /// Show what merging `source` into `target` would change.
    Diff {
        /// Source branch ID.
        source: String,
        /// Target branch ID.
        target: String,
    },

    /// Merge `source` into `target`.
    Merge {
        /// Source branch ID.
        source: String,
        /// Target branch ID.
        target: String,

        /// Resolve every conflict in favour of the source branch.
        #[arg(long, conflicts_with = "interactive")]
        force: bool,

        /// Prompt for each conflict.
        #[arg(short, long)]
        interactive: bool,
    },

    /// Generate a default server configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./keybranch.toml")]
        output: PathBuf,
    },

    /// Validate a server configuration file.
    Validate {
        /// Path to the TOML configuration file.
        #[arg(short, long, default_value = "./keybranch.toml")]
        config: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    // Minimal logging for CLI
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("Error: {:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let connect = || ApiClient::new(&cli.server, cli.user.clone());
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Branches { space } => cmd_branches(&connect()?, &space).await,
        Commands::Fork { space, name, from } => cmd_fork(&connect()?, &space, &name, &from).await,
        Commands::Delete { branch } => cmd_delete(&connect()?, &branch).await,
        Commands::Diff { source, target } => cmd_diff(&connect()?, &source, &target).await,
        Commands::Merge {
            source,
            target,
            force,
            interactive,
        } => {
            let mode = ResolveMode::from_flags(force, interactive);
            cmd_merge(&connect()?, &source, &target, mode).await
        }
    }
}

// ---------------------------------------------------------------------------
// Branch commands
// ---------------------------------------------------------------------------

async fn cmd_branches(client: &ApiClient, space_id: &str) -> Result<()> {
    let spinner = spinner("Loading branches...");
    let branches = client.list_branches(space_id).await;
    spinner.finish_and_clear();
    let branches = branches?;

    if branches.is_empty() {
        println!("No branches found.");
        return Ok(());
    }

    println!("{}", branch_table(&branches));
    println!("{} branches", branches.len());
    Ok(())
}

fn branch_table(branches: &[Branch]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Name", "ID", "Default", "Forked from", "Updated"]);

    for b in branches {
        let forked_from = b
            .source_branch_id
            .as_deref()
            .map(|id| truncate(id, 12))
            .unwrap_or_else(|| "—".to_string());
        table.add_row(vec![
            Cell::new(&b.name),
            Cell::new(&b.id),
            Cell::new(if b.is_default { "yes" } else { "" }),
            Cell::new(forked_from),
            Cell::new(b.updated_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }
    table
}

async fn cmd_fork(client: &ApiClient, space_id: &str, name: &str, from: &str) -> Result<()> {
    let spinner = spinner(&format!("Forking '{}'...", name));
    let result = client.fork(space_id, name, from).await;
    spinner.finish_and_clear();
    let result = result?;

    println!(
        "{}",
        style::success(&format!(
            "Created branch '{}' with {} keys",
            result.branch.name, result.key_count
        ))
    );
    println!("  ID: {}", result.branch.id);
    Ok(())
}

async fn cmd_delete(client: &ApiClient, branch_id: &str) -> Result<()> {
    client.delete_branch(branch_id).await?;
    println!("{}", style::success(&format!("Deleted branch {}", branch_id)));
    Ok(())
}

async fn cmd_diff(client: &ApiClient, source: &str, target: &str) -> Result<()> {
    let spinner = spinner("Comparing branches...");
    let diff = client.diff(source, target).await;
    spinner.finish_and_clear();

    print!("{}", report::render_diff(&diff?, console::colors_enabled()));
    Ok(())
}

async fn cmd_merge(client: &ApiClient, source: &str, target: &str, mode: ResolveMode) -> Result<()> {
    let spinner = spinner("Comparing branches...");
    let diff = client.diff(source, target).await;
    spinner.finish_and_clear();
    let diff = diff?;

    print!("{}", report::render_diff(&diff, console::colors_enabled()));
    if diff.is_empty() {
        return Ok(());
    }

    let resolutions = match resolve::collect_resolutions(&diff.conflicts, mode, &mut TerminalPrompter)? {
        Some(resolutions) => resolutions,
        None => anyhow::bail!(
            "{} conflicting key(s) need a resolution; rerun with --force or --interactive",
            diff.conflicts.len()
        ),
    };

    let request = MergeRequest {
        target_branch_id: target.to_string(),
        resolutions: (!resolutions.is_empty()).then_some(resolutions),
    };

    let spinner = self::spinner("Merging...");
    let result = client.merge(source, &request).await;
    spinner.finish_and_clear();
    let result = result?;

    if result.success {
        println!();
        println!(
            "{}",
            style::success(&format!(
                "Merged {} keys from {} into {}",
                result.merged, diff.source.name, diff.target.name
            ))
        );
        return Ok(());
    }

    let remaining = result.conflicts.unwrap_or_default();
    println!();
    println!("{}", style::warn("Merge blocked by unresolved conflicts:"));
    for conflict in &remaining {
        println!("  {}", conflict.key);
    }
    anyhow::bail!("merge not applied: {} unresolved conflict(s)", remaining.len())
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"# keybranch server configuration

[server]
listen = "127.0.0.1:3000"
log_level = "info"
data_dir = "/var/lib/keybranch"
# log_dir = "/var/log/keybranch"

[database]
file_name = "keybranch.db"
busy_timeout_ms = 5000

[merge]
batch_size = 500
max_resolutions = 10000

[branches]
default_name = "main"
"#;

fn cmd_init(output: &Path) -> Result<()> {
    write_default_config(output)?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Adjust data_dir and listen for your deployment");
    println!(
        "  2. Validate with: keybranch validate --config {}",
        output.display()
    );
    println!(
        "  3. Start the server: keybranch-server --config {}",
        output.display()
    );

    Ok(())
}

fn write_default_config(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }
    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config.apply_env_overrides();
    println!("  [OK] Environment overrides applied");

    match config.validate() {
        Ok(()) => println!("  [OK] All fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Listen        : {}", config.server.listen);
    println!("  Log level     : {}", config.server.log_level);
    println!("  Database      : {}", config.database_path().display());
    println!("  Batch size    : {}", config.merge.batch_size);
    println!("  Max resolves  : {}", config.merge.max_resolutions);
    println!("  Default branch: {}", config.branches.default_name);
    println!();
    println!("Configuration is valid.");

    Ok(())
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn spinner(msg: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::with_template("{spinner:.blue} {msg}") {
        spinner.set_style(
            template.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
    }
    spinner.set_message(msg.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
