//! Per-schema update lock.
//!
//! A lock is a row in the `update_lock` table keyed by schema id. It
//! serializes Exclusive task execution against concurrent scheduler runs on
//! the same schema. Acquisition fails fast after a bounded wait instead of
//! blocking indefinitely; rows left behind by a crashed run are taken over
//! once they pass the staleness threshold.

use crate::core::config::EngineConfig;
use crate::core::db;
use crate::core::error::SchemupError;
use crate::core::time;
use rusqlite::{Connection, params};
use std::thread;
use std::time::{Duration, Instant};

/// Poll interval while waiting for a contended lock.
const ACQUIRE_POLL_MS: u64 = 50;

/// Held schema lock. Lifetime bounded to one scheduler run; released
/// explicitly at Complete/Aborted, with a best-effort release on drop.
#[derive(Debug)]
pub struct SchemaLockGuard {
    conn: Connection,
    schema_id: String,
    owner: String,
    released: bool,
}

impl SchemaLockGuard {
    /// Acquire the lock for `schema_id`, waiting at most
    /// `config.lock_wait_ms` before surfacing lock contention.
    pub fn acquire(
        db_path: &str,
        schema_id: &str,
        config: &EngineConfig,
    ) -> Result<Self, SchemupError> {
        let conn = db::db_connect(db_path)?;
        let owner = time::new_event_id();
        let deadline = Instant::now() + Duration::from_millis(config.lock_wait_ms);

        loop {
            // Crash-safe takeover: a run that died without releasing leaves
            // a row that ages out.
            let stale_before = time::now_epoch_secs() - config.lock_stale_secs;
            conn.execute(
                "DELETE FROM update_lock WHERE schema_id = ?1 AND acquired_at < ?2",
                params![schema_id, stale_before],
            )?;

            let inserted = conn.execute(
                "INSERT OR IGNORE INTO update_lock(schema_id, owner, acquired_at)
                 VALUES(?1, ?2, ?3)",
                params![schema_id, owner, time::now_epoch_secs()],
            )?;
            if inserted == 1 {
                return Ok(Self {
                    conn,
                    schema_id: schema_id.to_string(),
                    owner,
                    released: false,
                });
            }

            if Instant::now() >= deadline {
                return Err(SchemupError::LockContention {
                    schema: schema_id.to_string(),
                });
            }
            thread::sleep(Duration::from_millis(ACQUIRE_POLL_MS));
        }
    }

    /// Release the lock. Only removes the row this guard inserted.
    pub fn release(mut self) -> Result<(), SchemupError> {
        self.delete_row()?;
        self.released = true;
        Ok(())
    }

    fn delete_row(&self) -> Result<(), SchemupError> {
        self.conn.execute(
            "DELETE FROM update_lock WHERE schema_id = ?1 AND owner = ?2",
            params![self.schema_id, self.owner],
        )?;
        Ok(())
    }
}

impl Drop for SchemaLockGuard {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.delete_row();
        }
    }
}
