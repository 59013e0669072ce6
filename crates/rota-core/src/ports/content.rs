//! Content ports: where a task's units of work come from and how they run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::Result;

/// One unit of work offered by the environment (a zone to clear, a map to search).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub kind: String,
    pub id: String,

    #[serde(default)]
    pub payload: Value,
}

impl WorkItem {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            payload: Value::Null,
        }
    }
}

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// `Ok(None)` means the content of this kind is exhausted for the cycle.
    async fn acquire_work_item(&self, kind: &str) -> Result<Option<WorkItem>>;
}

/// Carries out one unit of work against the environment.
///
/// Returning `RotaError::FatalAutomationFailure` disables the task.
#[async_trait]
pub trait WorkPerformer: Send + Sync {
    async fn perform(&self, item: &WorkItem) -> Result<()>;
}
