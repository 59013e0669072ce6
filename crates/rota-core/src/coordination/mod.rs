//! Cross-task coordination: the daily maintenance window, shared cooldowns
//! and resource gates.

pub mod cooldown;
pub mod gate;
pub mod maintenance;

pub use self::cooldown::{CooldownMonitor, CooldownStatus, CooldownWindow, ResourceUsage};
pub use self::gate::{GateEvaluation, GatePolicy, ResourceGate, ResourceRequirement, ResourceSnapshot};
pub use self::maintenance::{
    validate_lead_minutes, DelayFilter, MaintenanceConfig, MaintenanceWindowCoordinator, Phase,
};
