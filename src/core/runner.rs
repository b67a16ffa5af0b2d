//! The scheduler: drives the per-schema update process.
//!
//! State machine for one run: Init (acquire the schema lock if any pending
//! task is Exclusive) → Plan (load ledger, pending = registered − executed,
//! resolve order) → Run (execute task by task) → Complete, or Aborted at
//! the first failure. Aborted runs are resumable: committed tasks are in
//! the ledger and a later invocation picks up from the failing task.

use crate::core::config::EngineConfig;
use crate::core::db;
use crate::core::error::SchemupError;
use crate::core::executor::{self, RunWarning};
use crate::core::ledger;
use crate::core::lock::SchemaLockGuard;
use crate::core::progress::{NullProgress, ProgressSink};
use crate::core::resolver;
use crate::core::task::{Concurrency, LockScope, TaskContext, TaskRegistry};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Parameters for one schema run.
pub struct SchemaRun {
    pub schema_id: String,
    /// Tenant/context identifiers sharing this schema.
    pub context_ids: Vec<i64>,
    pub progress: Arc<dyn ProgressSink>,
}

impl SchemaRun {
    pub fn new(schema_id: &str) -> Self {
        Self {
            schema_id: schema_id.to_string(),
            context_ids: Vec::new(),
            progress: Arc::new(NullProgress),
        }
    }

    pub fn with_contexts(mut self, context_ids: Vec<i64>) -> Self {
        self.context_ids = context_ids;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }
}

/// Terminal state of a run.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunOutcome {
    Complete,
    /// Stopped at the named task; operator must diagnose and re-run.
    Aborted { task: String, error: String },
}

/// Per-run operator report: tasks attempted, tasks committed, warnings,
/// and the terminal state.
#[derive(Serialize, Debug)]
pub struct RunReport {
    pub schema_id: String,
    pub planned: Vec<String>,
    pub attempted: Vec<String>,
    pub committed: Vec<String>,
    pub warnings: Vec<RunWarning>,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.outcome == RunOutcome::Complete
    }
}

/// Pending-versus-executed view of a schema, for operator inspection.
#[derive(Serialize, Debug)]
pub struct SchemaStatus {
    pub schema_id: String,
    pub executed: Vec<String>,
    pub pending: Vec<String>,
}

/// Single-threaded, synchronous per-schema runner. Independent schemas may
/// be processed concurrently by separate instances, each holding its own
/// schema lock; no cross-schema coordination exists.
pub struct Scheduler<'a> {
    registry: &'a TaskRegistry,
    config: EngineConfig,
}

impl<'a> Scheduler<'a> {
    pub fn new(registry: &'a TaskRegistry, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    /// Compute the execution order for the schema's pending tasks without
    /// executing anything.
    pub fn plan(&self, db_path: &str, schema_id: &str) -> Result<Vec<String>, SchemupError> {
        self.registry.validate()?;
        let conn = db::db_connect(db_path)?;
        ledger::initialize_ledger(&conn)?;
        let executed = ledger::executed_tasks(&conn, self.registry, schema_id)?;
        let pending = self.pending_set(&executed);
        resolver::resolve_order(self.registry, &pending, &executed)
    }

    /// Report which registered tasks have and have not run for the schema.
    pub fn status(&self, db_path: &str, schema_id: &str) -> Result<SchemaStatus, SchemupError> {
        self.registry.validate()?;
        let conn = db::db_connect(db_path)?;
        ledger::initialize_ledger(&conn)?;
        let executed = ledger::executed_tasks(&conn, self.registry, schema_id)?;
        let pending = self.pending_set(&executed);
        Ok(SchemaStatus {
            schema_id: schema_id.to_string(),
            executed: executed
                .into_iter()
                .filter(|n| self.registry.get(n).is_some())
                .collect(),
            pending: pending.into_iter().collect(),
        })
    }

    /// Run all pending tasks for the schema, stopping at the first failure.
    ///
    /// Configuration errors and lock contention return `Err` before any
    /// task executes. Task failures terminate the run but return the report
    /// with an `Aborted` outcome so callers can see what did commit.
    pub fn run_schema(
        &self,
        db_path: &str,
        run: &SchemaRun,
    ) -> Result<RunReport, SchemupError> {
        self.registry.validate()?;

        let mut conn = db::db_connect(db_path)?;
        ledger::initialize_ledger(&conn)?;

        let executed = ledger::executed_tasks(&conn, self.registry, &run.schema_id)?;
        let mut pending = self.pending_set(&executed);

        // Init: Exclusive work serializes whole runs on the schema;
        // Background-only pending sets rely on per-statement locking.
        let guard = if self.needs_schema_lock(&pending) {
            Some(SchemaLockGuard::acquire(
                db_path,
                &run.schema_id,
                &self.config,
            )?)
        } else {
            None
        };

        // Plan: re-read under the lock; a concurrent run may have
        // progressed while we waited.
        let executed = ledger::executed_tasks(&conn, self.registry, &run.schema_id)?;
        pending = self.pending_set(&executed);
        let order = match resolver::resolve_order(self.registry, &pending, &executed) {
            Ok(order) => order,
            Err(e) => {
                if let Some(g) = guard {
                    let _ = g.release();
                }
                return Err(e);
            }
        };

        let ctx = TaskContext::new(&run.schema_id, self.config.pool_id, run.context_ids.clone())
            .with_progress(run.progress.clone());

        let mut report = RunReport {
            schema_id: run.schema_id.clone(),
            planned: order.clone(),
            attempted: Vec::new(),
            committed: Vec::new(),
            warnings: Vec::new(),
            outcome: RunOutcome::Complete,
        };

        // Run: strictly in resolved order, synchronously.
        for name in &order {
            let task = self.registry.get(name).ok_or_else(|| {
                SchemupError::Validation(format!("planned task '{name}' is not registered"))
            })?;
            report.attempted.push(name.clone());
            match executor::execute(task, &mut conn, &ctx) {
                Ok(warning) => {
                    report.committed.push(name.clone());
                    if let Some(w) = warning {
                        report.warnings.push(w);
                    }
                }
                Err(e) => {
                    report.outcome = RunOutcome::Aborted {
                        task: name.clone(),
                        error: e.to_string(),
                    };
                    break;
                }
            }
        }

        if let Some(g) = guard {
            match &report.outcome {
                RunOutcome::Complete => g.release()?,
                RunOutcome::Aborted { .. } => {
                    let _ = g.release();
                }
            }
        }

        Ok(report)
    }

    fn pending_set(&self, executed: &BTreeSet<String>) -> BTreeSet<String> {
        self.registry
            .names()
            .into_iter()
            .filter(|n| !executed.contains(n))
            .collect()
    }

    fn needs_schema_lock(&self, pending: &BTreeSet<String>) -> bool {
        pending.iter().any(|name| {
            self.registry.get(name).is_some_and(|t| {
                t.concurrency == Concurrency::Exclusive && t.lock_scope == LockScope::Schema
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::TaskDescriptor;

    fn setup() -> (tempfile::TempDir, String) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("schema.db").to_string_lossy().to_string();
        (tmp, path)
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            lock_wait_ms: 100,
            ..EngineConfig::default()
        }
    }

    fn marker_task(name: &str, deps: &[&str]) -> TaskDescriptor {
        let marker = name.replace('.', "_");
        let mut builder = TaskDescriptor::builder(name);
        for dep in deps {
            builder = builder.depends_on(dep);
        }
        builder.action(move |conn, _| {
            conn.execute(
                &format!("CREATE TABLE IF NOT EXISTS marker_{marker} (id INTEGER)"),
                [],
            )?;
            Ok(())
        })
    }

    #[test]
    fn run_commits_in_dependency_order_and_second_run_is_empty() {
        let (_tmp, path) = setup();
        let mut registry = TaskRegistry::new();
        registry.register(marker_task("b", &["a"])).expect("register");
        registry.register(marker_task("a", &[])).expect("register");
        registry.register(marker_task("c", &["b"])).expect("register");

        let scheduler = Scheduler::new(&registry, fast_config());
        let run = SchemaRun::new("s1");
        let report = scheduler.run_schema(&path, &run).expect("run");
        assert!(report.is_complete());
        assert_eq!(report.committed, vec!["a", "b", "c"]);

        let report = scheduler.run_schema(&path, &run).expect("second run");
        assert!(report.is_complete());
        assert!(report.committed.is_empty(), "idempotent re-run");
    }

    #[test]
    fn failure_aborts_and_run_is_resumable() {
        let (_tmp, path) = setup();
        let mut registry = TaskRegistry::new();
        registry.register(marker_task("a", &[])).expect("register");
        registry
            .register(TaskDescriptor::builder("b").depends_on("a").action(|_, _| {
                Err(SchemupError::Validation("simulated failure".to_string()))
            }))
            .expect("register");
        registry.register(marker_task("c", &["b"])).expect("register");

        let scheduler = Scheduler::new(&registry, fast_config());
        let run = SchemaRun::new("s1");
        let report = scheduler.run_schema(&path, &run).expect("run");
        assert_eq!(report.committed, vec!["a"]);
        assert_eq!(report.attempted, vec!["a", "b"]);
        match &report.outcome {
            RunOutcome::Aborted { task, .. } => assert_eq!(task, "b"),
            other => panic!("unexpected outcome: {other:?}"),
        }

        // Fix "b" in a fresh registry; the rerun skips "a".
        let mut fixed = TaskRegistry::new();
        fixed.register(marker_task("a", &[])).expect("register");
        fixed.register(marker_task("b", &["a"])).expect("register");
        fixed.register(marker_task("c", &["b"])).expect("register");
        let scheduler = Scheduler::new(&fixed, fast_config());
        let report = scheduler.run_schema(&path, &run).expect("rerun");
        assert!(report.is_complete());
        assert_eq!(report.committed, vec!["b", "c"]);
    }

    #[test]
    fn cycle_fails_before_any_task_executes() {
        let (_tmp, path) = setup();
        let mut registry = TaskRegistry::new();
        registry.register(marker_task("a", &["b"])).expect("register");
        registry.register(marker_task("b", &["a"])).expect("register");

        let scheduler = Scheduler::new(&registry, fast_config());
        let err = scheduler.run_schema(&path, &SchemaRun::new("s1")).unwrap_err();
        assert!(matches!(err, SchemupError::Config(_)));

        let conn = db::db_connect(&path).expect("connect");
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM update_task", [], |r| r.get(0))
            .expect("count");
        assert_eq!(rows, 0, "no ledger row may exist after a config error");
    }

    #[test]
    fn background_only_pending_set_skips_the_schema_lock() {
        let (_tmp, path) = setup();
        let mut registry = TaskRegistry::new();
        registry
            .register(
                TaskDescriptor::builder("bg")
                    .concurrency(Concurrency::Background)
                    .lock_scope(LockScope::None)
                    .action(|conn, _| {
                        conn.execute("CREATE TABLE IF NOT EXISTS bg_marker (id INTEGER)", [])?;
                        Ok(())
                    }),
            )
            .expect("register");

        // Another run holds the schema lock the whole time.
        {
            let conn = db::db_connect(&path).expect("connect");
            ledger::initialize_ledger(&conn).expect("init");
            conn.execute(
                "INSERT INTO update_lock(schema_id, owner, acquired_at) VALUES('s1', 'other', ?1)",
                rusqlite::params![crate::core::time::now_epoch_secs()],
            )
            .expect("hold lock");
        }

        let scheduler = Scheduler::new(&registry, fast_config());
        let report = scheduler
            .run_schema(&path, &SchemaRun::new("s1"))
            .expect("background run proceeds without the lock");
        assert!(report.is_complete());
        assert_eq!(report.committed, vec!["bg"]);
    }

    #[test]
    fn exclusive_pending_set_contends_on_the_schema_lock() {
        let (_tmp, path) = setup();
        let mut registry = TaskRegistry::new();
        registry.register(marker_task("a", &[])).expect("register");

        {
            let conn = db::db_connect(&path).expect("connect");
            ledger::initialize_ledger(&conn).expect("init");
            conn.execute(
                "INSERT INTO update_lock(schema_id, owner, acquired_at) VALUES('s1', 'other', ?1)",
                rusqlite::params![crate::core::time::now_epoch_secs()],
            )
            .expect("hold lock");
        }

        let scheduler = Scheduler::new(&registry, fast_config());
        let err = scheduler.run_schema(&path, &SchemaRun::new("s1")).unwrap_err();
        assert!(matches!(err, SchemupError::LockContention { .. }));
    }

    #[test]
    fn status_and_plan_reflect_the_ledger() {
        let (_tmp, path) = setup();
        let mut registry = TaskRegistry::new();
        registry.register(marker_task("a", &[])).expect("register");
        registry.register(marker_task("b", &["a"])).expect("register");

        let scheduler = Scheduler::new(&registry, fast_config());
        assert_eq!(scheduler.plan(&path, "s1").expect("plan"), vec!["a", "b"]);

        scheduler
            .run_schema(&path, &SchemaRun::new("s1"))
            .expect("run");
        let status = scheduler.status(&path, "s1").expect("status");
        assert_eq!(status.executed, vec!["a", "b"]);
        assert!(status.pending.is_empty());
        assert!(scheduler.plan(&path, "s1").expect("plan").is_empty());
    }
}
