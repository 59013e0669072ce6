//! Task catalog, shared namespace and scoped overrides.

pub mod namespace;
pub mod overrides;
pub mod task_registry;

pub use self::namespace::{FieldKind, SharedNamespace};
pub use self::overrides::{OverrideId, Overrides};
pub use self::task_registry::{DelayTarget, TaskRegistry};
