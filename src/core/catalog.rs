//! Built-in catalog of groupware update tasks.
//!
//! These are the representative task bodies the `schemup` binary registers:
//! base table creation, column additions, a UUID backfill with progress
//! reporting, an index, and ledger maintenance. Each action performs its
//! own "already applied?" probe so a retried task is a no-op. That is the
//! idempotency contract every task author must honor.

use crate::core::db;
use crate::core::error::SchemupError;
use crate::core::ledger;
use crate::core::task::{Concurrency, LockScope, TaskDescriptor, TaskRegistry};
use rusqlite::params;
use ulid::Ulid;

pub const CREATE_BASE_TABLES: &str = "groupware.createBaseTables";
pub const CONTACTS_ADD_UUID: &str = "contacts.addUuidColumn";
pub const CONTACTS_BACKFILL_UUID: &str = "contacts.backfillUuid";
pub const CONTACTS_UUID_INDEX: &str = "contacts.addUuidIndex";
pub const APPOINTMENTS_ADD_ORGANIZER: &str = "appointments.addOrganizerColumn";
pub const LEDGER_REMOVE_DUPLICATES: &str = "ledger.removeDuplicateEntries";

/// Registry with the built-in task catalog.
pub fn built_in_registry() -> Result<TaskRegistry, SchemupError> {
    let mut registry = TaskRegistry::new();

    registry.register(TaskDescriptor::builder(CREATE_BASE_TABLES).action(
        |conn, _| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS contacts (
                     cid INTEGER NOT NULL,
                     id INTEGER NOT NULL,
                     email TEXT,
                     PRIMARY KEY (cid, id)
                 )",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS appointments (
                     cid INTEGER NOT NULL,
                     id INTEGER NOT NULL,
                     start_at INTEGER,
                     end_at INTEGER,
                     PRIMARY KEY (cid, id)
                 )",
                [],
            )?;
            Ok(())
        },
    ))?;

    registry.register(
        TaskDescriptor::builder(CONTACTS_ADD_UUID)
            .depends_on(CREATE_BASE_TABLES)
            .action(|conn, _| {
                if db::column_exists(conn, "contacts", "uuid")? {
                    return Ok(());
                }
                conn.execute("ALTER TABLE contacts ADD COLUMN uuid TEXT", [])?;
                Ok(())
            }),
    )?;

    registry.register(
        TaskDescriptor::builder(CONTACTS_BACKFILL_UUID)
            .depends_on(CONTACTS_ADD_UUID)
            .concurrency(Concurrency::Background)
            .lock_scope(LockScope::None)
            .action(|conn, ctx| {
                // Scoped to the contexts sharing this schema when given.
                let filter = if ctx.context_ids.is_empty() {
                    String::new()
                } else {
                    let ids: Vec<String> =
                        ctx.context_ids.iter().map(|c| c.to_string()).collect();
                    format!(" AND cid IN ({})", ids.join(", "))
                };

                let total: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM contacts WHERE uuid IS NULL{filter}"),
                    [],
                    |r| r.get(0),
                )?;
                ctx.progress.set_total(total as u64);

                let mut stmt = conn.prepare(&format!(
                    "SELECT cid, id FROM contacts WHERE uuid IS NULL{filter}"
                ))?;
                let keys: Vec<(i64, i64)> = stmt
                    .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
                    .collect::<Result<_, _>>()?;
                for (cid, id) in keys {
                    conn.execute(
                        "UPDATE contacts SET uuid = ?1 WHERE cid = ?2 AND id = ?3",
                        params![Ulid::new().to_string(), cid, id],
                    )?;
                    ctx.progress.advance();
                }
                Ok(())
            }),
    )?;

    registry.register(
        TaskDescriptor::builder(CONTACTS_UUID_INDEX)
            .depends_on(CONTACTS_BACKFILL_UUID)
            .action(|conn, _| {
                conn.execute(
                    "CREATE INDEX IF NOT EXISTS idx_contacts_uuid ON contacts(uuid)",
                    [],
                )?;
                Ok(())
            }),
    )?;

    registry.register(
        TaskDescriptor::builder(APPOINTMENTS_ADD_ORGANIZER)
            .depends_on(CREATE_BASE_TABLES)
            .action(|conn, _| {
                if db::column_exists(conn, "appointments", "organizer")? {
                    return Ok(());
                }
                conn.execute("ALTER TABLE appointments ADD COLUMN organizer TEXT", [])?;
                Ok(())
            }),
    )?;

    registry.register(
        TaskDescriptor::builder(LEDGER_REMOVE_DUPLICATES)
            .concurrency(Concurrency::Background)
            .lock_scope(LockScope::None)
            .action(|conn, _| {
                ledger::remove_duplicates(conn)?;
                Ok(())
            }),
    )?;

    registry.validate()?;
    Ok(registry)
}
