//! Live view of call-home sessions and a periodic feed of what changed.

pub mod delta;
pub mod monitor;

pub use delta::{DeltaTracker, SessionDelta};
pub use monitor::{SessionInfo, SessionMonitor};
