//! Centralized SQL definitions for the engine's bookkeeping tables.
//!
//! Two tables live alongside the application schema in every managed
//! database:
//! 1. update_task: the execution ledger, one row per completed task run.
//! 2. update_lock: ephemeral per-schema lock rows serializing Exclusive runs.

pub const LEDGER_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS update_task (
        task_name TEXT NOT NULL,
        schema_id TEXT NOT NULL,
        pool_id INTEGER NOT NULL DEFAULT 0,
        executed_at INTEGER NOT NULL,
        success INTEGER NOT NULL DEFAULT 1
    )
";

// (task_name, schema_id) uniqueness is an invariant of the ledger, but the
// index is deliberately non-unique: legacy duplicates must remain readable
// so the dedupe operation can repair them.
pub const LEDGER_INDEX: &str = "
    CREATE INDEX IF NOT EXISTS idx_update_task_name_schema
        ON update_task(task_name, schema_id)
";

pub const LOCK_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS update_lock (
        schema_id TEXT PRIMARY KEY,
        owner TEXT NOT NULL,
        acquired_at INTEGER NOT NULL
    )
";
