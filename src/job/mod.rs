//! Job state, counters and work items for one migration run

pub mod counter;
pub mod item;
pub mod state;

pub use counter::{CounterKind, CounterSnapshot, Counters};
pub use item::{AssociationWorkItem, DocumentProperties, DocumentWorkItem, ItemStatus, TargetRef};
pub use state::{JobState, JobStateGuard};
