//! Single-task execution inside a scoped transaction.
//!
//! The transaction guard is rusqlite's own RAII type: dropping it rolls
//! back, committing consumes it. There is no rollback flag to track: the
//! outcome of the action decides the fate of the transaction.
//!
//! Side effects outside the transaction (external file deletions and the
//! like) are tolerated as non-atomic; task authors must make them
//! idempotent (delete-if-exists) so a retried task is safe. The executor
//! likewise relies on every action performing its own "already applied?"
//! probe before changing anything.

use crate::core::error::SchemupError;
use crate::core::ledger;
use crate::core::task::{TaskContext, TaskDescriptor};
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;

/// Non-fatal condition surfaced to the operator without aborting the run.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    /// The task's transaction committed but the ledger row could not be
    /// written. The task is not re-attempted; the next run may retry it and
    /// relies on the task's own idempotency.
    LedgerWrite { task: String, message: String },
}

/// Run one task's action in its own transaction.
///
/// On success the transaction commits and the execution is recorded in the
/// ledger; a ledger failure after the commit is returned as a warning. On
/// action failure the transaction rolls back, nothing is recorded, and the
/// error is wrapped with the task name.
pub fn execute(
    task: &TaskDescriptor,
    conn: &mut Connection,
    ctx: &TaskContext,
) -> Result<Option<RunWarning>, SchemupError> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| SchemupError::in_task(&task.name, e.into()))?;

    if let Err(e) = (task.action)(&tx, ctx) {
        // Dropping the transaction rolls it back.
        drop(tx);
        return Err(SchemupError::in_task(&task.name, e));
    }

    tx.commit()
        .map_err(|e| SchemupError::in_task(&task.name, e.into()))?;

    match ledger::record_execution(conn, &task.name, &ctx.schema_id, ctx.pool_id) {
        Ok(()) => Ok(None),
        Err(e) => Ok(Some(RunWarning::LedgerWrite {
            task: task.name.clone(),
            message: e.to_string(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::SchemupError;
    use crate::core::progress::CountingProgress;
    use crate::core::task::TaskDescriptor;
    use rusqlite::params;
    use std::sync::Arc;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        ledger::initialize_ledger(&conn).expect("ledger init");
        conn.execute("CREATE TABLE contacts (id INTEGER PRIMARY KEY, uuid TEXT)", [])
            .expect("create");
        conn
    }

    fn ctx() -> TaskContext {
        TaskContext::new("s1", 7, vec![1, 2])
    }

    #[test]
    fn success_commits_and_records() {
        let mut conn = setup();
        let task = TaskDescriptor::builder("contacts.seed").action(|conn, _| {
            conn.execute("INSERT INTO contacts(id) VALUES(1)", [])?;
            Ok(())
        });

        let warning = execute(&task, &mut conn, &ctx()).expect("execute");
        assert!(warning.is_none());

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM contacts", [], |r| r.get(0))
            .expect("count");
        assert_eq!(rows, 1);

        let recorded: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM update_task WHERE task_name = 'contacts.seed'
                 AND schema_id = 's1' AND pool_id = 7",
                [],
                |r| r.get(0),
            )
            .expect("ledger count");
        assert_eq!(recorded, 1);
    }

    #[test]
    fn failure_rolls_back_everything_and_records_nothing() {
        let mut conn = setup();
        let task = TaskDescriptor::builder("contacts.partial").action(|conn, _| {
            // First statement applies, then the action fails.
            conn.execute("INSERT INTO contacts(id) VALUES(1)", [])?;
            conn.execute("INSERT INTO contacts(id) VALUES(2)", [])?;
            Err(SchemupError::Validation("boom".to_string()))
        });

        let err = execute(&task, &mut conn, &ctx()).unwrap_err();
        match err {
            SchemupError::TaskFailed { task, .. } => assert_eq!(task, "contacts.partial"),
            other => panic!("unexpected error: {other}"),
        }

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM contacts", [], |r| r.get(0))
            .expect("count");
        assert_eq!(rows, 0, "partial statements must be rolled back");

        let recorded: i64 = conn
            .query_row("SELECT COUNT(*) FROM update_task", [], |r| r.get(0))
            .expect("ledger count");
        assert_eq!(recorded, 0);
    }

    #[test]
    fn ledger_failure_after_commit_is_a_warning() {
        let mut conn = setup();
        conn.execute("DROP TABLE update_task", []).expect("drop ledger");

        let task = TaskDescriptor::builder("contacts.seed").action(|conn, _| {
            conn.execute("INSERT INTO contacts(id) VALUES(1)", [])?;
            Ok(())
        });

        let warning = execute(&task, &mut conn, &ctx()).expect("execute");
        match warning {
            Some(RunWarning::LedgerWrite { task, .. }) => assert_eq!(task, "contacts.seed"),
            None => panic!("expected ledger warning"),
        }

        // The commit stands even though the ledger write failed.
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM contacts", [], |r| r.get(0))
            .expect("count");
        assert_eq!(rows, 1);
    }

    #[test]
    fn action_sees_context_and_reports_progress() {
        let mut conn = setup();
        conn.execute(
            "INSERT INTO contacts(id) VALUES(1), (2), (3)",
            [],
        )
        .expect("seed");

        let progress = Arc::new(CountingProgress::new());
        let ctx = ctx().with_progress(progress.clone());

        let task = TaskDescriptor::builder("contacts.backfillUuid").action(|conn, ctx| {
            assert_eq!(ctx.schema_id, "s1");
            assert_eq!(ctx.context_ids, vec![1, 2]);
            let total: i64 =
                conn.query_row("SELECT COUNT(*) FROM contacts WHERE uuid IS NULL", [], |r| {
                    r.get(0)
                })?;
            ctx.progress.set_total(total as u64);
            let mut stmt = conn.prepare("SELECT id FROM contacts WHERE uuid IS NULL")?;
            let ids: Vec<i64> = stmt
                .query_map([], |r| r.get(0))?
                .collect::<Result<_, _>>()?;
            for id in ids {
                conn.execute(
                    "UPDATE contacts SET uuid = ?1 WHERE id = ?2",
                    params![format!("uuid-{id}"), id],
                )?;
                ctx.progress.advance();
            }
            Ok(())
        });

        execute(&task, &mut conn, &ctx).expect("execute");
        assert_eq!(progress.total(), 3);
        assert_eq!(progress.current(), 3);
    }
}
