//! Schemup: dependency-ordered schema update task engine.
//!
//! A groupware database evolves through hundreds of small, idempotent
//! update tasks: add a column, create an index, backfill a UUID, clean up
//! stale rows. Schemup is the engine that runs them: a registry of named
//! tasks with declared dependencies, a deterministic topological resolver,
//! a transactional executor, and a persisted execution ledger that makes
//! re-runs skip everything that already committed.
//!
//! # Guarantees
//!
//! - **Dependency order**: within a schema, a task runs only after every
//!   task it depends on has committed (this run or a previous one).
//! - **Atomicity**: each task runs in its own transaction; failure rolls
//!   the task back in full and writes no ledger row.
//! - **Resumability**: a failed run aborts at the failing task; the next
//!   invocation recomputes the pending set from the ledger and continues.
//! - **Determinism**: the same registry and ledger state always produce
//!   the same execution order (ties break by task name).
//! - **Mutual exclusion**: runs with pending Exclusive tasks hold a
//!   per-schema lock with bounded-wait acquisition.
//!
//! # Crate Structure
//!
//! - [`core::task`]: task descriptors, builder, registry with rename aliases
//! - [`core::resolver`]: topological ordering, cycle/missing-dep detection
//! - [`core::executor`]: scoped-transaction execution, commit-then-record
//! - [`core::ledger`]: the `update_task` bookkeeping table
//! - [`core::lock`]: per-schema update lock
//! - [`core::runner`]: the per-schema scheduler state machine
//! - [`core::catalog`]: built-in groupware task bodies used by the binary

pub mod core;

use crate::core::config::EngineConfig;
use crate::core::error::SchemupError;
use crate::core::progress::CountingProgress;
use crate::core::runner::{RunOutcome, SchemaRun, Scheduler};
use crate::core::{catalog, db, ledger, time};

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(
    name = "schemup",
    version = env!("CARGO_PKG_VERSION"),
    about = "Dependency-ordered schema update task runner"
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run all pending update tasks for a schema
    Run(RunCli),

    /// Show the execution order without running anything
    Plan(TargetCli),

    /// Show executed and pending tasks for a schema
    Status(TargetCli),

    /// Inspect and maintain the execution ledger
    Ledger(LedgerCli),

    /// Show version information
    Version,
}

#[derive(clap::Args, Debug)]
struct RunCli {
    /// Path to the schema database.
    #[clap(long)]
    db: PathBuf,
    /// Schema identifier recorded in the ledger.
    #[clap(long)]
    schema: String,
    /// Tenant/context ids sharing this schema.
    #[clap(long)]
    context: Vec<i64>,
    /// Engine config file (defaults to schemup.toml next to the database).
    #[clap(long)]
    config: Option<PathBuf>,
    /// Emit the run report as JSON instead of human output.
    #[clap(long)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct TargetCli {
    /// Path to the schema database.
    #[clap(long)]
    db: PathBuf,
    /// Schema identifier recorded in the ledger.
    #[clap(long)]
    schema: String,
    /// Engine config file (defaults to schemup.toml next to the database).
    #[clap(long)]
    config: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct LedgerCli {
    #[clap(subcommand)]
    command: LedgerCommand,
}

#[derive(Subcommand, Debug)]
enum LedgerCommand {
    /// List ledger rows, newest first.
    List {
        #[clap(long)]
        db: PathBuf,
        /// Restrict to one schema.
        #[clap(long)]
        schema: Option<String>,
    },
    /// Remove duplicate ledger rows, keeping the most recent per task.
    Dedupe {
        #[clap(long)]
        db: PathBuf,
    },
}

fn load_config(explicit: Option<&PathBuf>, db: &PathBuf) -> Result<EngineConfig, SchemupError> {
    match explicit {
        Some(path) => EngineConfig::load(path),
        None => {
            let dir = db.parent().unwrap_or_else(|| std::path::Path::new("."));
            EngineConfig::load_or_default(dir)
        }
    }
}

pub fn run() -> Result<(), SchemupError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Version => {
            println!("v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Run(run_cli) => {
            let config = load_config(run_cli.config.as_ref(), &run_cli.db)?;
            let registry = catalog::built_in_registry()?;
            let scheduler = Scheduler::new(&registry, config);

            let progress = Arc::new(CountingProgress::new());
            let run = SchemaRun::new(&run_cli.schema)
                .with_contexts(run_cli.context.clone())
                .with_progress(progress.clone());

            let report = scheduler.run_schema(&run_cli.db.to_string_lossy(), &run)?;

            if run_cli.json {
                println!("{}", serde_json::to_string_pretty(&report).unwrap());
            } else {
                for name in &report.committed {
                    println!("  {} {}", "●".bright_green(), name.bright_white());
                }
                for warning in &report.warnings {
                    println!(
                        "  {} {}",
                        "⚠".bright_yellow(),
                        serde_json::to_string(warning).unwrap()
                    );
                }
                match &report.outcome {
                    RunOutcome::Complete => {
                        println!(
                            "{} {} task(s) committed for schema '{}'",
                            "✓".bright_green(),
                            report.committed.len(),
                            run_cli.schema
                        );
                    }
                    RunOutcome::Aborted { task, error } => {
                        eprintln!(
                            "{} aborted at task '{}': {}",
                            "✗".bright_red(),
                            task.bright_white().bold(),
                            error
                        );
                    }
                }
            }

            match report.outcome {
                RunOutcome::Complete => Ok(()),
                RunOutcome::Aborted { task, error } => Err(SchemupError::Validation(format!(
                    "run aborted at task '{task}': {error}"
                ))),
            }
        }
        Command::Plan(target) => {
            let config = load_config(target.config.as_ref(), &target.db)?;
            let registry = catalog::built_in_registry()?;
            let scheduler = Scheduler::new(&registry, config);
            let order = scheduler.plan(&target.db.to_string_lossy(), &target.schema)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&time::command_envelope(
                    "plan",
                    "ok",
                    serde_json::json!({ "schema": target.schema, "order": order })
                ))
                .unwrap()
            );
            Ok(())
        }
        Command::Status(target) => {
            let config = load_config(target.config.as_ref(), &target.db)?;
            let registry = catalog::built_in_registry()?;
            let scheduler = Scheduler::new(&registry, config);
            let status = scheduler.status(&target.db.to_string_lossy(), &target.schema)?;
            println!("{}", serde_json::to_string_pretty(&status).unwrap());
            Ok(())
        }
        Command::Ledger(ledger_cli) => match ledger_cli.command {
            LedgerCommand::List { db, schema } => {
                let conn = db::db_connect(&db.to_string_lossy())?;
                ledger::initialize_ledger(&conn)?;
                let rows = ledger::history(&conn, schema.as_deref())?;
                println!("{}", serde_json::to_string_pretty(&rows).unwrap());
                Ok(())
            }
            LedgerCommand::Dedupe { db } => {
                let conn = db::db_connect(&db.to_string_lossy())?;
                ledger::initialize_ledger(&conn)?;
                let removed = ledger::remove_duplicates(&conn)?;
                println!(
                    "{}",
                    time::command_envelope(
                        "ledger.dedupe",
                        "ok",
                        serde_json::json!({ "removed": removed })
                    )
                );
                Ok(())
            }
        },
    }
}
