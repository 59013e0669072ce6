//! Errors and their operational classification.

use thiserror::Error;

/// ErrorKind groups errors by how the scheduler reacts to them.
///
/// - ConfigValidation: recovered locally (default substituted, warning logged)
/// - StorageIo: recovered (empty document or skipped record, error logged)
/// - SchedulingConflict: the caller defers its own action
/// - ResourceExhausted: turned into a switch/stop control signal
/// - FatalAutomationFailure: the task is disabled, other tasks keep running
/// - Usage: wiring mistakes reported to whoever built the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigValidation,
    StorageIo,
    SchedulingConflict,
    ResourceExhausted,
    FatalAutomationFailure,
    Usage,
}

#[derive(Debug, Error)]
pub enum RotaError {
    #[error("invalid config at {path}: {reason}")]
    ConfigValidation { path: String, reason: String },

    #[error("path is not declared: {0}")]
    UndeclaredPath(String),

    #[error("type mismatch at {path}: expected {expected}")]
    TypeMismatch { path: String, expected: &'static str },

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("storage error at {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed storage document: {0}")]
    StorageFormat(String),

    #[error("resource {resource} is busy until {until}")]
    SchedulingConflict { resource: String, until: String },

    #[error("resource {resource} exhausted: have {current}, need {required}")]
    ResourceExhausted {
        resource: String,
        current: i64,
        required: i64,
    },

    #[error("task {task} cannot make progress: {reason}")]
    FatalAutomationFailure { task: String, reason: String },

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("duplicate task: {0}")]
    DuplicateTask(String),

    #[error("tasks without a registered body: {0:?}")]
    MissingTaskBodies(Vec<String>),
}

impl RotaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RotaError::ConfigValidation { .. }
            | RotaError::UndeclaredPath(_)
            | RotaError::TypeMismatch { .. }
            | RotaError::InvalidTimestamp(_) => ErrorKind::ConfigValidation,
            RotaError::Storage { .. } | RotaError::StorageFormat(_) => ErrorKind::StorageIo,
            RotaError::SchedulingConflict { .. } => ErrorKind::SchedulingConflict,
            RotaError::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            RotaError::FatalAutomationFailure { .. } => ErrorKind::FatalAutomationFailure,
            RotaError::UnknownTask(_)
            | RotaError::DuplicateTask(_)
            | RotaError::MissingTaskBodies(_) => ErrorKind::Usage,
        }
    }

    /// Shorthand for a fatal failure of one task.
    pub fn fatal(task: impl Into<String>, reason: impl Into<String>) -> Self {
        RotaError::FatalAutomationFailure {
            task: task.into(),
            reason: reason.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::FatalAutomationFailure
    }
}

pub type Result<T> = std::result::Result<T, RotaError>;
