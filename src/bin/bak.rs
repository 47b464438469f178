//! # bak CLI - Snapshot backups for a directory
//!
//! ## Usage
//! ```bash
//! # Start backing up the current directory
//! bak init
//!
//! # Record the current state
//! bak snapshot --tag "Before refactor"
//!
//! # What changed since the last snapshot?
//! bak status
//!
//! # List snapshots and go back to one
//! bak log
//! bak checkout <snapshot-id>
//!
//! # Freeze the tree, then thaw it again
//! bak lock
//! bak unlock
//! ```

use anyhow::Context;
use bak::{format_bytes, BakError, ChangeSet, RepoPaths, Repository};
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// bak - content-addressed snapshot backups for a working directory
#[derive(Parser)]
#[command(name = "bak")]
#[command(version)]
#[command(about = "Snapshot, restore and lock a directory tree")]
#[command(long_about = None)]
struct Cli {
    /// Path to directory (defaults to current)
    #[arg(short = 'C', long, global = true)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a backup and take the first snapshot
    Init {
        /// Tag for the initial snapshot
        #[arg(short, long)]
        tag: Option<String>,

        /// Replace an existing backup
        #[arg(long)]
        force: bool,
    },

    /// Show changes since the current snapshot
    #[command(alias = "st")]
    Status,

    /// List all snapshots
    Log,

    /// Record the current state
    #[command(alias = "snap")]
    Snapshot {
        /// Tag for the snapshot
        #[arg(short, long)]
        tag: Option<String>,
    },

    /// Restore the tree to a snapshot
    #[command(alias = "co")]
    Checkout {
        /// Snapshot ID
        snapshot: String,

        /// Discard pending changes without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Prune redundant copies and make the tree read-only
    Lock,

    /// Restore store copies and write access
    Unlock,
}

fn main() {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    if std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        match e.downcast_ref::<BakError>() {
            Some(err) if err.is_soft() => {
                println!("{}", err.user_message().yellow());
            }
            Some(err) => {
                eprintln!("{}: {}", "Error".red().bold(), err.user_message());
                std::process::exit(1);
            }
            None => {
                eprintln!("{}: {:#}", "Error".red().bold(), e);
                std::process::exit(1);
            }
        }
    }
}

/// Log to stderr; `--verbose` forces debug, otherwise `RUST_LOG` applies
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<()> {
    let root = cli.path.unwrap_or_else(|| PathBuf::from("."));

    match cli.command {
        Commands::Init { tag, force } => cmd_init(&root, tag, force),
        Commands::Status => cmd_status(&root),
        Commands::Log => cmd_log(&root),
        Commands::Snapshot { tag } => cmd_snapshot(&root, tag),
        Commands::Checkout { snapshot, yes } => cmd_checkout(&root, &snapshot, yes),
        Commands::Lock => cmd_lock(&root),
        Commands::Unlock => cmd_unlock(&root),
    }
}

fn cmd_init(root: &Path, tag: Option<String>, force: bool) -> anyhow::Result<()> {
    if force && RepoPaths::new(root).is_initialized() {
        println!("{}", "Removing existing backup (--force).".yellow());
    }

    let spinner = spinner("Taking initial snapshot...");
    let repo = Repository::init(root, tag, force)?;
    spinner.finish_and_clear();

    println!("{} Initialized backup", "✓".green().bold());
    println!("  Root: {}", root.display().to_string().cyan());
    if let Some(snapshot) = repo.current_snapshot() {
        println!("  Snapshot: {}", snapshot.id.yellow().bold());
        println!("  Files: {}", snapshot.file_list.len().to_string().cyan());
    }
    Ok(())
}

fn cmd_status(root: &Path) -> anyhow::Result<()> {
    let repo = Repository::open(root)?;
    let changes = repo.status()?;
    print_changes(&changes);
    Ok(())
}

fn print_changes(changes: &ChangeSet) {
    if !changes.changed() {
        println!("No changes.");
        return;
    }

    if !changes.dirs_added.is_empty() || !changes.files_added.is_empty() {
        println!("Added:");
        for path in changes.dirs_added.iter().chain(&changes.files_added) {
            println!("    {}", path.display().to_string().green());
        }
    }
    if !changes.dirs_removed.is_empty() || !changes.files_removed.is_empty() {
        println!("Removed:");
        for path in changes.dirs_removed.iter().chain(&changes.files_removed) {
            println!("    {}", path.display().to_string().red());
        }
    }
    if !changes.files_modified.is_empty() {
        println!("Modified:");
        for path in &changes.files_modified {
            println!("    {}", path.display().to_string().yellow());
        }
    }
}

fn cmd_log(root: &Path) -> anyhow::Result<()> {
    let repo = Repository::open(root)?;
    let entries = repo.log();

    if entries.is_empty() {
        println!("{}", "No snapshots found.".yellow());
        return Ok(());
    }

    println!("{}", format!("  {:<10} {:<21} {}", "ID", "Time", "Tag").bold());
    for entry in &entries {
        let time = entry
            .time
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let row = format!("{:<10} {:<21} {}", entry.id, time, entry.tag);
        if entry.is_current {
            println!("{} {}", "*".green().bold(), row.green());
        } else {
            println!("  {}", row);
        }
    }
    Ok(())
}

fn cmd_snapshot(root: &Path, tag: Option<String>) -> anyhow::Result<()> {
    let mut repo = Repository::open(root)?;

    let start = Instant::now();
    let spinner = spinner("Scanning files...");
    let result = repo.snapshot(tag);
    spinner.finish_and_clear();
    let snapshot = result?;

    println!(
        "{} Created snapshot {}",
        "✓".green().bold(),
        snapshot.id.yellow().bold()
    );
    println!("  Tag: {}", snapshot.tag.cyan());
    println!("  Files: {}", snapshot.file_list.len().to_string().cyan());
    println!("  Time: {}", format_duration(round_ms(start.elapsed())).to_string().cyan());
    Ok(())
}

fn cmd_checkout(root: &Path, snapshot_id: &str, yes: bool) -> anyhow::Result<()> {
    let mut repo = Repository::open(root)?;

    let mut prompt_error = None;
    let result = repo.checkout(snapshot_id, |_pending| {
        if yes {
            return true;
        }
        match confirm("There are pending changes which will be lost on checkout. Continue (y/N)? ") {
            Ok(answer) => answer,
            Err(e) => {
                prompt_error = Some(e);
                false
            }
        }
    });
    if let Some(e) = prompt_error {
        return Err(e);
    }
    let result = result?;

    println!("Checked out snapshot {}.", result.snapshot_id.yellow().bold());
    println!(
        "  {}",
        format!(
            "{} files restored ({}), {} deleted, {} dirs created, {} removed in {}",
            result.files_restored,
            format_bytes(result.bytes_written),
            result.files_deleted,
            result.dirs_created,
            result.dirs_removed,
            format_duration(Duration::from_millis(result.duration_ms))
        )
        .dimmed()
    );
    Ok(())
}

fn cmd_lock(root: &Path) -> anyhow::Result<()> {
    let mut repo = Repository::open(root)?;

    let spinner = spinner("Locking...");
    let result = repo.lock();
    spinner.finish_and_clear();
    let result = result?;

    println!("{} Backup locked", "✓".green().bold());
    println!(
        "  {}",
        format!(
            "{} store copies pruned, {} paths made read-only",
            result.blobs_removed, result.paths_restricted
        )
        .dimmed()
    );
    Ok(())
}

fn cmd_unlock(root: &Path) -> anyhow::Result<()> {
    let mut repo = Repository::open(root)?;

    let spinner = spinner("Unlocking...");
    let result = repo.unlock();
    spinner.finish_and_clear();
    let result = result?;

    println!("{} Backup unlocked", "✓".green().bold());
    println!(
        "  {}",
        format!(
            "{} store copies restored, {} paths made writable",
            result.blobs_restored, result.paths_granted
        )
        .dimmed()
    );
    Ok(())
}

/// Ask a yes/no question on stdin; anything but `y`/`yes` is no
fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{}", question);
    io::stdout().flush().context("failed to flush prompt")?;

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read answer")?;
    let answer = answer.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

fn spinner(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn round_ms(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}
