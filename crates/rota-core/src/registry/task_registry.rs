//! Task catalog plus the cross-task namespace.
//!
//! Design:
//! - The registry is the single owner of task records and namespace values.
//! - It is passed by `&mut` through the scheduling loop (inside `TaskContext`);
//!   there is no global instance.
//! - Suspension primitives only move `next_run`. Buckets change when the
//!   scheduler calls `refresh_buckets` at the top of its next iteration.

use std::collections::HashMap;

use chrono::{NaiveDateTime, TimeDelta};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::namespace::{FieldKind, SharedNamespace};
use super::overrides::{OverrideId, Overrides};
use crate::domain::errors::{Result, RotaError};
use crate::domain::task::{Bucket, TaskName, TaskRecord};
use crate::domain::time::{ResetSchedule, format_timestamp, parse_timestamp};

const ENABLE_SUFFIX: &str = "Scheduler.Enable";
const NEXT_RUN_SUFFIX: &str = "Scheduler.NextRun";

/// Where a delayed task should run next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayTarget {
    At(NaiveDateTime),
    Minutes(i64),
    /// The next daily maintenance boundary.
    UntilBoundary,
}

enum MetaField {
    Enable,
    NextRun,
}

/// Split `"<Task>.Scheduler.Enable"` / `"<Task>.Scheduler.NextRun"`.
fn metadata_path(path: &str) -> Option<(&str, MetaField)> {
    let (task, rest) = path.split_once('.')?;
    match rest {
        ENABLE_SUFFIX => Some((task, MetaField::Enable)),
        NEXT_RUN_SUFFIX => Some((task, MetaField::NextRun)),
        _ => None,
    }
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<TaskRecord>,
    index: HashMap<TaskName, usize>,
    namespace: SharedNamespace,
    overrides: Overrides,
    reset: ResetSchedule,
}

impl TaskRegistry {
    pub fn new(reset: ResetSchedule) -> Self {
        Self {
            reset,
            ..Self::default()
        }
    }

    pub fn reset_schedule(&self) -> ResetSchedule {
        self.reset
    }

    /// Append a task in registration order.
    pub fn register(
        &mut self,
        name: impl Into<TaskName>,
        enabled: bool,
        next_run: Option<NaiveDateTime>,
    ) -> Result<()> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(RotaError::DuplicateTask(name.to_string()));
        }
        let order = self.tasks.len();
        self.index.insert(name.clone(), order);
        self.tasks.push(TaskRecord::new(name, enabled, next_run, order));
        Ok(())
    }

    pub fn declare(&mut self, path: &str, kind: FieldKind, default: Value) -> Result<()> {
        if metadata_path(path).is_some() {
            return Err(RotaError::ConfigValidation {
                path: path.to_string(),
                reason: "task metadata paths are built in".to_string(),
            });
        }
        self.namespace.declare(path, kind, default)
    }

    /// Apply nested initial namespace values; see `SharedNamespace::load_tree`.
    pub fn load_namespace(&mut self, tree: &Value) -> usize {
        self.namespace.load_tree(tree)
    }

    pub fn get(&self, name: &str) -> Option<&TaskRecord> {
        self.index.get(name).map(|&i| &self.tasks[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut TaskRecord> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| RotaError::UnknownTask(name.to_string()))?;
        Ok(&mut self.tasks[idx])
    }

    /// All records in registration order.
    pub fn tasks(&self) -> &[TaskRecord] {
        &self.tasks
    }

    pub fn names(&self) -> Vec<TaskName> {
        self.tasks.iter().map(|t| t.name.clone()).collect()
    }

    // --- dotted-path access -------------------------------------------------

    /// Read any path; metadata paths address task records.
    pub fn cross_get(&self, path: &str) -> Result<Value> {
        if let Some((task, field)) = metadata_path(path) {
            let record = self
                .get(task)
                .ok_or_else(|| RotaError::UnknownTask(task.to_string()))?;
            return Ok(match field {
                MetaField::Enable => Value::Bool(record.enabled),
                MetaField::NextRun => record
                    .next_run
                    .map(|t| Value::String(format_timestamp(t)))
                    .unwrap_or(Value::Null),
            });
        }
        if let Some(v) = self.overrides.effective(path) {
            return Ok(v.clone());
        }
        self.namespace.get(path).cloned()
    }

    /// Non-failing read: `None` for undeclared paths and unknown tasks.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        self.cross_get(path).ok()
    }

    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let value = self.cross_get(path)?;
        serde_json::from_value(value).map_err(|_| RotaError::TypeMismatch {
            path: path.to_string(),
            expected: std::any::type_name::<T>(),
        })
    }

    /// Write any path. Namespace writes change the base value; an active
    /// override keeps shadowing it.
    pub fn cross_set(&mut self, path: &str, value: Value) -> Result<()> {
        if let Some((task, field)) = metadata_path(path) {
            let record = self.get_mut(task)?;
            match (field, value) {
                (MetaField::Enable, Value::Bool(b)) => record.enabled = b,
                (MetaField::NextRun, Value::Null) => record.next_run = None,
                (MetaField::NextRun, Value::String(s)) => {
                    record.next_run = Some(parse_timestamp(&s)?);
                }
                (MetaField::Enable, _) => {
                    return Err(RotaError::TypeMismatch {
                        path: path.to_string(),
                        expected: FieldKind::Bool.name(),
                    });
                }
                (MetaField::NextRun, _) => {
                    return Err(RotaError::TypeMismatch {
                        path: path.to_string(),
                        expected: FieldKind::Timestamp.name(),
                    });
                }
            }
            return Ok(());
        }
        self.namespace.set(path, value)?;
        if self.overrides.active(path) > 0 {
            debug!(path, "base value written while an override is active");
        }
        Ok(())
    }

    // --- overrides ----------------------------------------------------------

    pub fn push_override(&mut self, path: &str, value: Value, precedence: i32) -> Result<OverrideId> {
        if metadata_path(path).is_some() {
            return Err(RotaError::ConfigValidation {
                path: path.to_string(),
                reason: "task metadata cannot be overridden".to_string(),
            });
        }
        self.namespace.check(path, &value)?;
        let id = self.overrides.push(path, value, precedence);
        debug!(path, precedence, "override pushed");
        Ok(id)
    }

    /// Returns false if the override was already released.
    pub fn release_override(&mut self, id: OverrideId) -> bool {
        match self.overrides.release(id) {
            Some(path) => {
                debug!(path = %path, "override released");
                true
            }
            None => false,
        }
    }

    // --- buckets ------------------------------------------------------------

    pub fn refresh_buckets(&mut self, now: NaiveDateTime) {
        for t in &mut self.tasks {
            t.refresh_bucket(now);
        }
    }

    fn listed(&self, bucket: Bucket) -> Vec<TaskRecord> {
        let mut out: Vec<TaskRecord> = self
            .tasks
            .iter()
            .filter(|t| t.enabled && t.bucket == bucket)
            .cloned()
            .collect();
        out.sort_by_key(|t| t.dispatch_key());
        out
    }

    /// Enabled due tasks in dispatch order.
    pub fn pending(&self) -> Vec<TaskRecord> {
        self.listed(Bucket::Pending)
    }

    /// Enabled future tasks in dispatch order.
    pub fn waiting(&self) -> Vec<TaskRecord> {
        self.listed(Bucket::Waiting)
    }

    pub fn next_due(&self) -> Option<TaskName> {
        self.pending().into_iter().next().map(|t| t.name)
    }

    pub fn earliest_waiting(&self) -> Option<NaiveDateTime> {
        self.tasks
            .iter()
            .filter(|t| t.enabled && t.bucket == Bucket::Waiting)
            .filter_map(|t| t.next_run)
            .min()
    }

    /// A due task that would be dispatched before `current`, evaluated live
    /// (without waiting for the next bucket refresh).
    pub fn preempting(&self, current: &str, now: NaiveDateTime) -> Option<TaskName> {
        let current = self.get(current)?;
        self.tasks
            .iter()
            .filter(|t| t.enabled && t.name != current.name && t.is_due(now))
            .filter(|t| t.dispatch_key() < current.dispatch_key())
            .min_by_key(|t| t.dispatch_key())
            .map(|t| t.name.clone())
    }

    // --- suspension primitives ---------------------------------------------

    /// Move `task`'s next run. The bucket is left alone until the next refresh.
    pub fn delay(&mut self, task: &str, target: DelayTarget, now: NaiveDateTime) -> Result<NaiveDateTime> {
        let at = match target {
            DelayTarget::At(t) => t,
            DelayTarget::Minutes(n) => now + TimeDelta::minutes(n),
            DelayTarget::UntilBoundary => self.reset.next_boundary(now),
        };
        self.get_mut(task)?.next_run = Some(at);
        info!(task, next_run = %format_timestamp(at), "task delayed");
        Ok(at)
    }

    /// Enable `task` and make it due now.
    pub fn invoke(&mut self, task: &str) -> Result<()> {
        let record = self.get_mut(task)?;
        record.enabled = true;
        record.next_run = None;
        info!(task, "task invoked");
        Ok(())
    }

    pub fn set_next_run(&mut self, task: &str, next_run: Option<NaiveDateTime>) -> Result<()> {
        self.get_mut(task)?.next_run = next_run;
        Ok(())
    }

    pub fn record_success(&mut self, task: &str) -> Result<()> {
        self.get_mut(task)?.mark_succeeded();
        Ok(())
    }

    /// Count one failure; returns the consecutive failure count.
    pub fn record_failure(&mut self, task: &str, reason: String) -> Result<u32> {
        let record = self.get_mut(task)?;
        record.record_failure(reason);
        Ok(record.failures)
    }

    /// Disable `task` until an operator re-enables it.
    pub fn mark_failed(&mut self, task: &str, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        self.get_mut(task)?.mark_failed(reason.clone());
        warn!(task, reason = %reason, "task disabled");
        Ok(())
    }

    /// Task records plus namespace values, for status output.
    pub fn snapshot(&self) -> Value {
        serde_json::json!({
            "tasks": self.tasks,
            "namespace": self.namespace.snapshot(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn names(records: &[TaskRecord]) -> Vec<&str> {
        records.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut reg = TaskRegistry::default();
        reg.register("A", true, None).unwrap();
        assert!(matches!(
            reg.register("A", true, None),
            Err(RotaError::DuplicateTask(_))
        ));
    }

    #[test]
    fn pending_is_ordered_by_next_run_then_registration() {
        let mut reg = TaskRegistry::default();
        reg.register("Late", true, Some(at(1, 9, 0))).unwrap();
        reg.register("TieB", true, Some(at(1, 8, 0))).unwrap();
        reg.register("TieA", true, Some(at(1, 8, 0))).unwrap();
        reg.register("Unset", true, None).unwrap();
        reg.register("Future", true, Some(at(1, 11, 0))).unwrap();
        reg.register("Off", false, None).unwrap();

        reg.refresh_buckets(at(1, 10, 0));

        assert_eq!(names(&reg.pending()), vec!["Unset", "TieB", "TieA", "Late"]);
        assert_eq!(names(&reg.waiting()), vec!["Future"]);
        assert_eq!(reg.next_due().unwrap().as_str(), "Unset");
        assert_eq!(reg.earliest_waiting(), Some(at(1, 11, 0)));
    }

    #[test]
    fn delay_does_not_move_buckets_until_refresh() {
        let mut reg = TaskRegistry::default();
        reg.register("A", true, None).unwrap();
        reg.refresh_buckets(at(1, 10, 0));

        reg.delay("A", DelayTarget::Minutes(30), at(1, 10, 0)).unwrap();
        assert_eq!(reg.get("A").unwrap().bucket, Bucket::Pending);
        assert_eq!(reg.get("A").unwrap().next_run, Some(at(1, 10, 30)));

        reg.refresh_buckets(at(1, 10, 0));
        assert_eq!(reg.get("A").unwrap().bucket, Bucket::Waiting);
    }

    #[test]
    fn delay_until_boundary_uses_reset_schedule() {
        let mut reg = TaskRegistry::default();
        reg.register("A", true, None).unwrap();
        let t = reg
            .delay("A", DelayTarget::UntilBoundary, at(1, 23, 54))
            .unwrap();
        assert_eq!(t, at(2, 0, 0));
        assert!(reg.delay("Nope", DelayTarget::At(t), t).is_err());
    }

    #[test]
    fn invoke_enables_and_makes_due() {
        let mut reg = TaskRegistry::default();
        reg.register("Current", true, Some(at(1, 9, 0))).unwrap();
        reg.register("Alt", false, Some(at(1, 12, 0))).unwrap();

        assert_eq!(reg.preempting("Current", at(1, 10, 0)), None);
        reg.invoke("Alt").unwrap();
        assert!(reg.get("Alt").unwrap().enabled);
        assert_eq!(
            reg.preempting("Current", at(1, 10, 0)).unwrap().as_str(),
            "Alt"
        );
    }

    #[test]
    fn metadata_paths_route_to_task_records() {
        let mut reg = TaskRegistry::default();
        reg.register("OpsiExplore", true, None).unwrap();

        assert_eq!(reg.cross_get("OpsiExplore.Scheduler.NextRun").unwrap(), json!(null));
        reg.cross_set("OpsiExplore.Scheduler.NextRun", json!("2024-01-02 00:05:00"))
            .unwrap();
        assert_eq!(reg.get("OpsiExplore").unwrap().next_run, Some(at(2, 0, 5)));

        reg.cross_set("OpsiExplore.Scheduler.Enable", json!(false))
            .unwrap();
        assert!(!reg.get_as::<bool>("OpsiExplore.Scheduler.Enable").unwrap());

        assert!(matches!(
            reg.cross_set("OpsiExplore.Scheduler.Enable", json!("no")),
            Err(RotaError::TypeMismatch { .. })
        ));
        assert!(matches!(
            reg.cross_get("Ghost.Scheduler.Enable"),
            Err(RotaError::UnknownTask(_))
        ));
    }

    #[test]
    fn namespace_access_requires_declaration() {
        let mut reg = TaskRegistry::default();
        assert!(reg.lookup("OpsiAbyssal.OpsiFleet.Submarine").is_none());
        assert!(reg.cross_set("OpsiAbyssal.OpsiFleet.Submarine", json!(true)).is_err());

        reg.declare("OpsiAbyssal.OpsiFleet.Submarine", FieldKind::Bool, json!(false))
            .unwrap();
        reg.cross_set("OpsiAbyssal.OpsiFleet.Submarine", json!(true))
            .unwrap();
        assert_eq!(reg.lookup("OpsiAbyssal.OpsiFleet.Submarine"), Some(json!(true)));
        assert!(matches!(
            reg.get_as::<i64>("OpsiAbyssal.OpsiFleet.Submarine"),
            Err(RotaError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn overrides_shadow_base_values() {
        let mut reg = TaskRegistry::default();
        reg.register("A", true, None).unwrap();
        reg.declare("A.Storage.Mode", FieldKind::Text, json!("normal"))
            .unwrap();

        let id = reg.push_override("A.Storage.Mode", json!("stay"), 1).unwrap();
        reg.cross_set("A.Storage.Mode", json!("changed")).unwrap();
        assert_eq!(reg.cross_get("A.Storage.Mode").unwrap(), json!("stay"));

        assert!(reg.release_override(id));
        assert!(!reg.release_override(id));
        assert_eq!(reg.cross_get("A.Storage.Mode").unwrap(), json!("changed"));

        assert!(reg.push_override("A.Scheduler.Enable", json!(false), 1).is_err());
        assert!(reg.push_override("A.Storage.Mode", json!(3), 1).is_err());
    }

    #[test]
    fn mark_failed_removes_task_from_listings() {
        let mut reg = TaskRegistry::default();
        reg.register("A", true, None).unwrap();
        reg.mark_failed("A", "stuck").unwrap();
        reg.refresh_buckets(at(1, 0, 0));
        assert!(reg.pending().is_empty());
        assert_eq!(reg.get("A").unwrap().last_failure.as_deref(), Some("stuck"));
    }
}
