use rusqlite;
use std::io;
use thiserror::Error;

/// Pre-run configuration failures. Detected during planning; when one of
/// these is raised no task has executed and no ledger row has been written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("duplicate task name registered: '{0}'")]
    DuplicateTask(String),
    #[error("task '{task}' depends on unregistered task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },
    #[error("dependency cycle among tasks: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),
    #[error("alias '{alias}' does not resolve to a registered task '{target}'")]
    DanglingAlias { alias: String, target: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum SchemupError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("task '{task}' failed: {source}")]
    TaskFailed {
        task: String,
        #[source]
        source: Box<SchemupError>,
    },
    #[error("schema '{schema}' is busy: update lock held by another run")]
    LockContention { schema: String },
    #[error("validation error: {0}")]
    Validation(String),
}

impl SchemupError {
    /// Wrap an execution failure with the name of the task it came from.
    pub fn in_task(task: &str, source: SchemupError) -> Self {
        SchemupError::TaskFailed {
            task: task.to_string(),
            source: Box::new(source),
        }
    }
}
