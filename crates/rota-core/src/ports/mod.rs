//! Ports: the narrow interfaces the core consumes from the outside world.
//!
//! Screen recognition, input simulation and navigation live behind these
//! traits; the core only sees counters, work items and time.

pub mod clock;
pub mod content;
pub mod resources;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::content::{ContentSource, WorkItem, WorkPerformer};
pub use self::resources::ResourceCounters;
