//! Cooldown detection for mechanisms shared between tasks.
//!
//! A shared mechanism (e.g. the submarine fleet) cannot be used by two tasks
//! within its cooldown. Before using one, a task asks whether another
//! scheduled task will need it within the lookahead window, and defers
//! itself until that task's run time if so.

use chrono::{NaiveDateTime, TimeDelta};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::errors::Result;
use crate::domain::time::format_timestamp;
use crate::registry::{FieldKind, TaskRegistry};

pub const LOOKAHEAD_MINUTES: i64 = 60;

/// How tasks declare that they use a resource.
///
/// A task uses the resource if `<Task>.<flag>` is true OR
/// `<Task>.<filter>` contains `token` (case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceUsage {
    pub resource: String,
    pub flag: String,
    pub filter: String,
    pub token: String,
}

impl ResourceUsage {
    pub fn submarine() -> Self {
        Self {
            resource: "submarine".to_string(),
            flag: "OpsiFleet.Submarine".to_string(),
            filter: "OpsiFleetFilter.Filter".to_string(),
            token: "submarine".to_string(),
        }
    }

    fn flag_path(&self, task: &str) -> String {
        format!("{task}.{}", self.flag)
    }

    fn filter_path(&self, task: &str) -> String {
        format!("{task}.{}", self.filter)
    }

    pub fn used_by(&self, registry: &TaskRegistry, task: &str) -> bool {
        let flagged = matches!(registry.lookup(&self.flag_path(task)), Some(Value::Bool(true)));
        let filtered = match registry.lookup(&self.filter_path(task)) {
            Some(Value::String(filter)) => filter
                .to_lowercase()
                .contains(&self.token.to_lowercase()),
            _ => false,
        };
        flagged || filtered
    }

    /// Declare the flag and filter fields for `task`.
    pub fn declare_for(&self, registry: &mut TaskRegistry, task: &str) -> Result<()> {
        registry.declare(&self.flag_path(task), FieldKind::Bool, Value::Bool(false))?;
        registry.declare(
            &self.filter_path(task),
            FieldKind::Text,
            Value::String(String::new()),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownStatus {
    pub busy: bool,
    pub until: Option<NaiveDateTime>,
}

impl CooldownStatus {
    pub const IDLE: CooldownStatus = CooldownStatus {
        busy: false,
        until: None,
    };
}

/// A busy resource and the time its pending user is scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooldownWindow {
    pub resource: String,
    pub busy_until: NaiveDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct CooldownMonitor {
    usages: Vec<ResourceUsage>,
}

impl CooldownMonitor {
    pub fn new(usages: Vec<ResourceUsage>) -> Self {
        Self { usages }
    }

    pub fn usages(&self) -> &[ResourceUsage] {
        &self.usages
    }

    pub fn usage(&self, resource: &str) -> Option<&ResourceUsage> {
        self.usages.iter().find(|u| u.resource == resource)
    }

    /// Declare usage fields for every registered task.
    pub fn declare_fields(&self, registry: &mut TaskRegistry) -> Result<()> {
        for name in registry.names() {
            for usage in &self.usages {
                usage.declare_for(registry, name.as_str())?;
            }
        }
        Ok(())
    }

    /// Is `resource` needed by a task scheduled within the next 60 minutes?
    ///
    /// Scans enabled pending then waiting tasks in dispatch order; the first
    /// match wins. Read-only.
    pub fn check(&self, registry: &TaskRegistry, resource: &str, now: NaiveDateTime) -> CooldownStatus {
        let Some(usage) = self.usage(resource) else {
            warn!(resource, "unknown resource kind, treating as idle");
            return CooldownStatus::IDLE;
        };
        let horizon = now + TimeDelta::minutes(LOOKAHEAD_MINUTES);

        let candidates = registry.pending().into_iter().chain(registry.waiting());
        for task in candidates {
            let Some(next_run) = task.next_run else {
                continue;
            };
            if next_run <= now || next_run > horizon {
                continue;
            }
            if usage.used_by(registry, task.name.as_str()) {
                debug!(
                    resource,
                    task = %task.name,
                    next_run = %format_timestamp(next_run),
                    "resource reserved by upcoming task"
                );
                return CooldownStatus {
                    busy: true,
                    until: Some(next_run),
                };
            }
        }
        CooldownStatus::IDLE
    }

    pub fn window(resource: &str, status: CooldownStatus) -> Option<CooldownWindow> {
        match status {
            CooldownStatus {
                busy: true,
                until: Some(busy_until),
            } => Some(CooldownWindow {
                resource: resource.to_string(),
                busy_until,
            }),
            _ => None,
        }
    }
}
