//! Session lifecycle: startup, timers and host hooks.

mod guard;
mod scheduler;

pub use guard::{DocumentGuard, GuardBuilder, InitReport, SnapshotContext};
pub use scheduler::Scheduler;
