use crate::core::error::SchemupError;
use rusqlite::Connection;
use std::time::Duration;

/// Open a schema database with the connection settings every engine
/// operation relies on: WAL journaling, a busy timeout for cross-process
/// contention, and enforced foreign keys.
pub fn db_connect(db_path: &str) -> Result<Connection, SchemupError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(5))
        .map_err(SchemupError::Sqlite)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(SchemupError::Sqlite)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(SchemupError::Sqlite)?;
    Ok(conn)
}

/// Probe whether a column exists on a table. Task actions use this for
/// their "is this change already applied?" checks before ALTER TABLE.
pub fn column_exists(
    conn: &Connection,
    table: &str,
    column: &str,
) -> Result<bool, SchemupError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        rusqlite::params![table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Probe whether a table exists in the schema.
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, SchemupError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        rusqlite::params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Probe whether an index exists in the schema.
pub fn index_exists(conn: &Connection, index: &str) -> Result<bool, SchemupError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
        rusqlite::params![index],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
