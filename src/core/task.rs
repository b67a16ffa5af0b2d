//! Task descriptors and the process-wide task registry.
//!
//! A task is one discrete, named, idempotent schema change. Descriptors are
//! immutable once registered; the registry is populated at startup and
//! read-only afterwards. Registration is append-only and a duplicate name
//! is a fatal configuration error.

use crate::core::error::{ConfigError, SchemupError};
use crate::core::progress::{NullProgress, ProgressSink};
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Whether a task needs the schema to itself while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    /// No other task may execute against the schema concurrently.
    Exclusive,
    /// May run alongside unrelated reads/writes, still in its own transaction.
    Background,
}

/// Lock scope requested by a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    /// Serialize against other runs on the same schema.
    Schema,
    /// Rely on per-statement locking only.
    None,
}

/// Task-scoped execution context passed to every action.
pub struct TaskContext {
    /// Identifier of the schema being updated.
    pub schema_id: String,
    /// Identity of the database pool hosting this schema.
    pub pool_id: i64,
    /// Tenant/context identifiers sharing this schema.
    pub context_ids: Vec<i64>,
    /// Progress sink for long-running backfills.
    pub progress: Arc<dyn ProgressSink>,
}

impl TaskContext {
    pub fn new(schema_id: &str, pool_id: i64, context_ids: Vec<i64>) -> Self {
        Self {
            schema_id: schema_id.to_string(),
            pool_id,
            context_ids,
            progress: Arc::new(NullProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }
}

/// Executable body of a task. The connection is inside an open transaction
/// owned exclusively by this task; returning Err rolls the transaction back.
pub type TaskAction =
    Box<dyn Fn(&Connection, &TaskContext) -> Result<(), SchemupError> + Send + Sync>;

/// Immutable metadata plus action for one update task.
pub struct TaskDescriptor {
    pub name: String,
    pub dependencies: BTreeSet<String>,
    pub concurrency: Concurrency,
    pub lock_scope: LockScope,
    pub action: TaskAction,
}

impl TaskDescriptor {
    /// Start building a task. Defaults: no dependencies, Exclusive
    /// concurrency, Schema lock scope.
    pub fn builder(name: &str) -> TaskBuilder {
        TaskBuilder {
            name: name.to_string(),
            dependencies: BTreeSet::new(),
            concurrency: Concurrency::Exclusive,
            lock_scope: LockScope::Schema,
        }
    }
}

/// Builder with the defaults most tasks want; background backfills opt out.
pub struct TaskBuilder {
    name: String,
    dependencies: BTreeSet<String>,
    concurrency: Concurrency,
    lock_scope: LockScope,
}

impl TaskBuilder {
    pub fn depends_on(mut self, name: &str) -> Self {
        self.dependencies.insert(name.to_string());
        self
    }

    pub fn concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn lock_scope(mut self, lock_scope: LockScope) -> Self {
        self.lock_scope = lock_scope;
        self
    }

    pub fn action<F>(self, f: F) -> TaskDescriptor
    where
        F: Fn(&Connection, &TaskContext) -> Result<(), SchemupError> + Send + Sync + 'static,
    {
        TaskDescriptor {
            name: self.name,
            dependencies: self.dependencies,
            concurrency: self.concurrency,
            lock_scope: self.lock_scope,
            action: Box::new(f),
        }
    }
}

/// Process-wide set of registered tasks, constructed once at startup and
/// passed by reference into the scheduler.
///
/// Renamed tasks are handled by an explicit alias list: `alias(old, new)`
/// makes ledger rows recorded under the old name count as executions of the
/// new name. New executions always record the current name.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, TaskDescriptor>,
    aliases: BTreeMap<String, String>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task. Duplicate names are rejected; dependency names are
    /// checked later by [`validate`](Self::validate), since registration
    /// order is unspecified.
    pub fn register(&mut self, task: TaskDescriptor) -> Result<(), SchemupError> {
        if self.tasks.contains_key(&task.name) {
            return Err(ConfigError::DuplicateTask(task.name).into());
        }
        self.tasks.insert(task.name.clone(), task);
        Ok(())
    }

    /// Record that `old_name` was renamed to `current_name`. Ledger rows
    /// under the old name satisfy the current one at plan time.
    pub fn alias(&mut self, old_name: &str, current_name: &str) {
        self.aliases
            .insert(old_name.to_string(), current_name.to_string());
    }

    /// Validate the full registry: every dependency and every alias target
    /// must resolve to a registered task.
    pub fn validate(&self) -> Result<(), SchemupError> {
        for task in self.tasks.values() {
            for dep in &task.dependencies {
                if !self.tasks.contains_key(dep) {
                    return Err(ConfigError::UnknownDependency {
                        task: task.name.clone(),
                        dependency: dep.clone(),
                    }
                    .into());
                }
            }
        }
        for (alias, target) in &self.aliases {
            if !self.tasks.contains_key(target) {
                return Err(ConfigError::DanglingAlias {
                    alias: alias.clone(),
                    target: target.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TaskDescriptor> {
        self.tasks.get(name)
    }

    /// Registered task names in lexical order.
    pub fn names(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Map a ledger task name through the alias list to its current name.
    /// Unknown names pass through unchanged.
    pub fn resolve_alias<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskDescriptor> {
        self.tasks.values()
    }
}
