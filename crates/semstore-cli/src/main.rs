//! Semstore CLI
//!
//! Command-line tools for property-table diffs:
//! - Printing the flat id list a diff touches (what downstream caches evict)
//! - Summarizing per-table insert/delete counts
//! - Converting legacy side-major diffs into the current representation
//! - Listing and replaying the store's audit log

use anyhow::{bail, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use semstore_diff::DiffSide;
use semstore_storage::persistence::{replay_audit_log, AuditLog};
use std::path::{Path, PathBuf};
use tracing::Level;

mod inspect;

#[derive(Parser)]
#[command(name = "semstore")]
#[command(author, version, about = "Semstore: property-table diff tools")]
struct Cli {
    /// Log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the deduplicated entity ids a diff touches
    Ids {
        /// Diff file (JSON representation, or CBOR for `.cbor`)
        input: PathBuf,
        /// Only one side (`insert`/`delete`, or `i`/`d`)
        #[arg(long)]
        side: Option<DiffSide>,
        /// Read the legacy side-major layout
        #[arg(long)]
        legacy: bool,
        /// Print a JSON array instead of one id per line
        #[arg(long)]
        json: bool,
    },

    /// Per-table insert/delete row counts and id totals
    Summary {
        /// Diff file (JSON representation, or CBOR for `.cbor`)
        input: PathBuf,
        /// Read the legacy side-major layout
        #[arg(long)]
        legacy: bool,
    },

    /// Convert a legacy side-major diff (`{"i": {...}, "d": {...}}`)
    ImportLegacy {
        /// Legacy JSON diff
        input: PathBuf,
        /// Output diff (`.cbor` for CBOR, JSON otherwise)
        #[arg(short, long)]
        out: PathBuf,
    },

    /// List audit log entries, then rebuild the tables they describe
    Replay {
        /// Audit log written by the store
        log: PathBuf,
        /// Only ids from one side of each entry
        #[arg(long)]
        side: Option<DiffSide>,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Ids {
            input,
            side,
            legacy,
            json,
        } => cmd_ids(&input, side, legacy, json),
        Commands::Summary { input, legacy } => cmd_summary(&input, legacy),
        Commands::ImportLegacy { input, out } => cmd_import_legacy(&input, &out),
        Commands::Replay { log, side } => cmd_replay(&log, side),
    }
}

fn cmd_ids(input: &Path, side: Option<DiffSide>, legacy: bool, json: bool) -> Result<()> {
    let diff = inspect::load_diff(input, legacy)?;
    let ids = diff.ids(side);

    if json {
        println!("{}", serde_json::to_string(&ids)?);
    } else {
        for id in ids.iter() {
            println!("{id}");
        }
    }
    Ok(())
}

fn cmd_summary(input: &Path, legacy: bool) -> Result<()> {
    let diff = inspect::load_diff(input, legacy)?;
    let summary = inspect::summarize(&diff);

    println!(
        "{} {} ({} tables)",
        "diff".bold(),
        input.display(),
        summary.tables.len()
    );
    for table in &summary.tables {
        println!(
            "  {:<32} {} {}",
            table.table,
            format!("+{}", table.inserts).green(),
            format!("-{}", table.deletes).red()
        );
    }
    println!(
        "ids: insert={} delete={} all={}",
        summary.insert_ids, summary.delete_ids, summary.all_ids
    );
    Ok(())
}

fn cmd_import_legacy(input: &Path, out: &Path) -> Result<()> {
    let diff = inspect::load_diff(input, true)?;
    inspect::write_diff(out, &diff)?;
    eprintln!(
        "{} {} ({} tables, {} rows)",
        "wrote".green().bold(),
        out.display().to_string().bold(),
        diff.len(),
        diff.row_count(None)
    );
    Ok(())
}

fn cmd_replay(log_path: &Path, side: Option<DiffSide>) -> Result<()> {
    if !log_path.exists() {
        bail!("audit log not found: {}", log_path.display());
    }

    let entries = AuditLog::open(log_path)?.read_all()?;
    for entry in &entries {
        let ids = entry.diff.ids(side);
        let marker = match entry.reverts {
            Some(original) => format!(" reverts {original}").yellow().to_string(),
            None => String::new(),
        };
        println!(
            "{} {} subject={} tables={}{}",
            entry.id.to_string().bold(),
            entry.timestamp.to_rfc3339(),
            entry.subject,
            entry.diff.len(),
            marker
        );
        println!("  ids: [{}]", inspect::format_ids(&ids));
    }

    let tables = replay_audit_log(log_path)?;
    eprintln!(
        "{} replayed {} entries into {} tables",
        "ok".green().bold(),
        entries.len(),
        tables.len()
    );
    for (table, rows) in &tables {
        println!("  {:<32} {} rows", table, rows.len());
    }
    Ok(())
}
