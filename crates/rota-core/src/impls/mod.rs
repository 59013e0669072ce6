//! In-memory implementations of the ports, for tests and the demo binary.

pub mod log_only;
pub mod scripted;

pub use self::log_only::LogOnlyBody;
pub use self::scripted::{QueuedContent, RecordingPerformer, ScriptedCounters};
