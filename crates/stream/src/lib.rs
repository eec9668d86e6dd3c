//! Streaming: per-tick LOD refinement over a node hierarchy.
//!
//! Each tick the [`TargetStateController`] decides, from the observers, which
//! nodes should be expanded. The [`ExpansionScheduler`] then converges the
//! actual state toward that goal under a concurrent-load cap, driving loads,
//! unloads and visibility through the [`CurrentStateController`].
//! [`Streamer`] bundles the three for a host loop.
//!
//! # Invariants
//! - Visible implies Loaded; Loaded implies the parent is Loaded.
//! - A node's children are evaluated only after it is expanded and they are
//!   resident.
//! - An expansion is presented as one atomic visibility change.
//! - The scheduler never blocks; it yields with `WaitingOnLoad` instead.

mod config;
mod current;
mod scheduler;
mod streamer;
mod target;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, StreamConfig};
pub use current::CurrentStateController;
pub use lodstream_content::LoadExecution;
pub use scheduler::{ExpansionScheduler, SchedulerState, SchedulerStats};
pub use streamer::{Streamer, TickStats};
pub use target::{ErrorFunction, Observer, ScreenSpaceError, TargetStateController, TargetStats};

pub fn crate_info() -> &'static str {
    "lodstream-stream v0.1.0"
}
