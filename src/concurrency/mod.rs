//! Lanes and the join primitive that tracks work across them.

pub mod dispatch_group;
pub mod work_queue;

pub use dispatch_group::{DispatchGroup, GroupToken};
pub use work_queue::{LaneTag, WorkQueue};
