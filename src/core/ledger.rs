//! The execution ledger: persisted record of which tasks have run against a
//! schema.
//!
//! One row per completed execution in the `update_task` table. The
//! authoritative invariant is at most one row per (task_name, schema_id);
//! duplicate rows are a known legacy defect that [`remove_duplicates`]
//! repairs by keeping the most recently executed row.

use crate::core::error::SchemupError;
use crate::core::schemas;
use crate::core::task::TaskRegistry;
use crate::core::time;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One ledger row. Created when a task completes; never updated afterwards.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExecutionRecord {
    pub task_name: String,
    pub schema_id: String,
    pub pool_id: i64,
    pub executed_at: i64,
    pub success: bool,
}

/// Create the bookkeeping tables if absent. Safe to call on every run.
pub fn initialize_ledger(conn: &Connection) -> Result<(), SchemupError> {
    conn.execute(schemas::LEDGER_SCHEMA, [])?;
    conn.execute(schemas::LEDGER_INDEX, [])?;
    conn.execute(schemas::LOCK_SCHEMA, [])?;
    Ok(())
}

/// Load the set of task names that have successfully executed against the
/// schema, normalized through the registry's rename alias list.
pub fn executed_tasks(
    conn: &Connection,
    registry: &TaskRegistry,
    schema_id: &str,
) -> Result<BTreeSet<String>, SchemupError> {
    let mut stmt = conn.prepare(
        "SELECT task_name FROM update_task WHERE schema_id = ?1 AND success = 1",
    )?;
    let names = stmt.query_map(params![schema_id], |row| row.get::<_, String>(0))?;
    let mut executed = BTreeSet::new();
    for name in names {
        let name = name?;
        executed.insert(registry.resolve_alias(&name).to_string());
    }
    Ok(executed)
}

/// Append a row marking the task executed. Called after the task's
/// transaction has committed.
pub fn record_execution(
    conn: &Connection,
    task_name: &str,
    schema_id: &str,
    pool_id: i64,
) -> Result<(), SchemupError> {
    conn.execute(
        "INSERT INTO update_task(task_name, schema_id, pool_id, executed_at, success)
         VALUES(?1, ?2, ?3, ?4, 1)",
        params![task_name, schema_id, pool_id, time::now_epoch_secs()],
    )?;
    Ok(())
}

/// List ledger rows, newest first, optionally filtered to one schema.
pub fn history(
    conn: &Connection,
    schema_id: Option<&str>,
) -> Result<Vec<ExecutionRecord>, SchemupError> {
    let map_row = |row: &rusqlite::Row| -> rusqlite::Result<ExecutionRecord> {
        Ok(ExecutionRecord {
            task_name: row.get(0)?,
            schema_id: row.get(1)?,
            pool_id: row.get(2)?,
            executed_at: row.get(3)?,
            success: row.get::<_, i64>(4)? != 0,
        })
    };

    let mut records = Vec::new();
    match schema_id {
        Some(schema) => {
            let mut stmt = conn.prepare(
                "SELECT task_name, schema_id, pool_id, executed_at, success
                 FROM update_task WHERE schema_id = ?1
                 ORDER BY executed_at DESC, rowid DESC",
            )?;
            let rows = stmt.query_map(params![schema], map_row)?;
            for row in rows {
                records.push(row?);
            }
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT task_name, schema_id, pool_id, executed_at, success
                 FROM update_task ORDER BY executed_at DESC, rowid DESC",
            )?;
            let rows = stmt.query_map([], map_row)?;
            for row in rows {
                records.push(row?);
            }
        }
    }
    Ok(records)
}

/// Remove duplicate ledger rows, keeping exactly the most recently executed
/// row per (task_name, schema_id). Ties on executed_at keep the highest
/// rowid. Idempotent: a second invocation deletes nothing.
pub fn remove_duplicates(conn: &Connection) -> Result<usize, SchemupError> {
    let removed = conn.execute(
        "DELETE FROM update_task
         WHERE EXISTS (
             SELECT 1 FROM update_task newer
             WHERE newer.task_name = update_task.task_name
               AND newer.schema_id = update_task.schema_id
               AND (newer.executed_at > update_task.executed_at
                    OR (newer.executed_at = update_task.executed_at
                        AND newer.rowid > update_task.rowid))
         )",
        [],
    )?;
    Ok(removed)
}
