//! App layer: task bodies, the per-run context and the scheduler loop.
//!
//! # Components
//! - **SchedulerBuilder**: wiring plus startup validation
//! - **BodyRegistry**: task name -> body
//! - **TaskContext**: what a body may touch during one run
//! - **TaskRunner**: the generic gate/acquire/perform loop
//! - **Scheduler**: pick the earliest due task, run it, apply the result

pub mod builder;
pub mod context;
pub mod retry;
pub mod runner;
pub mod runtime;
pub mod scheduler;

pub use self::builder::SchedulerBuilder;
pub use self::context::TaskContext;
pub use self::retry::RetryPolicy;
pub use self::runner::{RunnerSpec, TaskRunner};
pub use self::runtime::{BodyRegistry, TaskBody};
pub use self::scheduler::{RunOutcome, Scheduler};
