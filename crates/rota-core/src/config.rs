//! RotaConfig: JSON configuration for the scheduler.
//!
//! Every field has a default, so `{}` is a valid file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::app::retry::RetryPolicy;
use crate::coordination::{CooldownMonitor, MaintenanceConfig, MaintenanceWindowCoordinator, ResourceUsage};
use crate::domain::errors::{Result, RotaError};
use crate::domain::time::{parse_timestamp, ResetSchedule};
use crate::registry::TaskRegistry;
use crate::store::DelayStateStore;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub name: String,
    pub enabled: bool,
    /// `YYYY-MM-DD HH:MM:SS`; absent means due now.
    pub next_run: Option<String>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            next_run: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RotaConfig {
    pub reset_time: String,
    pub reference_offset_minutes: i64,
    pub delay_state_path: PathBuf,
    pub idle_poll_secs: u64,
    pub retry: RetryPolicy,
    pub maintenance: MaintenanceConfig,
    pub cooldowns: Vec<ResourceUsage>,
    pub tasks: Vec<TaskConfig>,
    pub namespace: Value,
}

impl Default for RotaConfig {
    fn default() -> Self {
        Self {
            reset_time: "00:00".to_string(),
            reference_offset_minutes: 0,
            delay_state_path: PathBuf::from("./log/daily_delay_status.json"),
            idle_poll_secs: 60,
            retry: RetryPolicy::default(),
            maintenance: MaintenanceConfig::default(),
            cooldowns: vec![ResourceUsage::submarine()],
            tasks: Vec::new(),
            namespace: Value::Object(Default::default()),
        }
    }
}

impl RotaConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| RotaError::Storage {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).map_err(|e| RotaError::ConfigValidation {
            path: "<config>".to_string(),
            reason: e.to_string(),
        })?;
        // fail at load time rather than on first use
        config.reset_schedule()?;
        Ok(config)
    }

    pub fn reset_schedule(&self) -> Result<ResetSchedule> {
        ResetSchedule::parse(&self.reset_time, self.reference_offset_minutes)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_secs(self.idle_poll_secs.max(1))
    }

    /// Register the configured tasks (plus the coordinator if it is not
    /// listed), declare the fields the coordination layer reads, then apply
    /// the initial namespace values.
    pub fn build_registry(&self) -> Result<TaskRegistry> {
        let mut registry = TaskRegistry::new(self.reset_schedule()?);

        for task in &self.tasks {
            let next_run = task.next_run.as_deref().map(parse_timestamp).transpose()?;
            registry.register(task.name.as_str(), task.enabled, next_run)?;
        }
        if !registry.contains(&self.maintenance.task) {
            registry.register(self.maintenance.task.as_str(), true, None)?;
        }

        self.cooldown_monitor().declare_fields(&mut registry)?;
        self.coordinator().declare_fields(&mut registry)?;
        let applied = registry.load_namespace(&self.namespace);
        info!(tasks = registry.tasks().len(), applied, "registry built");
        Ok(registry)
    }

    pub fn coordinator(&self) -> MaintenanceWindowCoordinator {
        MaintenanceWindowCoordinator::new(
            self.maintenance.clone(),
            DelayStateStore::new(self.delay_state_path.clone()),
        )
    }

    pub fn cooldown_monitor(&self) -> CooldownMonitor {
        CooldownMonitor::new(self.cooldowns.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn empty_object_uses_defaults() {
        let config = RotaConfig::from_json("{}").unwrap();
        assert_eq!(config, RotaConfig::default());
        assert_eq!(config.maintenance.task, "OpsiDailyDelay");
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn bad_reset_time_is_rejected_at_load() {
        let err = RotaConfig::from_json(r#"{"reset_time": "25:99"}"#).unwrap_err();
        assert!(matches!(err, RotaError::ConfigValidation { ref path, .. } if path == "reset_time"));
    }

    #[test]
    fn malformed_json_is_a_validation_error() {
        let err = RotaConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, RotaError::ConfigValidation { .. }));
    }

    #[test]
    fn missing_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RotaConfig::from_path(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, RotaError::Storage { .. }));
    }

    #[test]
    fn builds_registry_with_declared_fields_and_initial_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rota.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            "{}",
            json!({
                "tasks": [
                    {"name": "OpsiObscure", "next_run": "2024-01-01 10:00:00"},
                    {"name": "Commission", "enabled": false}
                ],
                "namespace": {
                    "OpsiObscure": {"OpsiFleet": {"Submarine": true}},
                    "OpsiDailyDelay": {"OpsiDailyDelay": {"TriggerMinutesBeforeReset": 10}},
                    "Nobody": {"Declared": 1}
                }
            })
        )
        .unwrap();

        let config = RotaConfig::from_path(&path).unwrap();
        let registry = config.build_registry().unwrap();

        let names: Vec<String> = registry.names().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, vec!["OpsiObscure", "Commission", "OpsiDailyDelay"]);
        assert_eq!(
            registry.get("OpsiObscure").unwrap().next_run,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(10, 0, 0)
        );
        assert!(!registry.get("Commission").unwrap().enabled);
        assert_eq!(registry.lookup("OpsiObscure.OpsiFleet.Submarine"), Some(json!(true)));
        assert_eq!(registry.lookup("Commission.OpsiFleet.Submarine"), Some(json!(false)));
        assert_eq!(config.coordinator().lead_minutes(&registry), 10);
        assert_eq!(registry.lookup("Nobody.Declared"), None);
    }

    #[test]
    fn bad_task_timestamp_fails_the_build() {
        let config = RotaConfig::from_json(r#"{"tasks": [{"name": "A", "next_run": "tomorrow"}]}"#)
            .unwrap();
        assert!(matches!(
            config.build_registry(),
            Err(RotaError::InvalidTimestamp(_))
        ));
    }
}
