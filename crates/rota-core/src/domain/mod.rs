//! Domain model (tasks, decisions, errors, time).

pub mod decision;
pub mod errors;
pub mod task;
pub mod time;

pub use self::decision::{Control, DefaultFailureDecider, FailureDecider, FailureDecision, GateDecision};
pub use self::errors::{ErrorKind, Result, RotaError};
pub use self::task::{Bucket, TaskName, TaskRecord};
pub use self::time::ResetSchedule;
