//! Content manager bridge between the scheduler and format-specific loaders.
//!
//! The scheduler speaks to content only through the [`ContentManager`] trait.
//! [`StreamingContentManager`] is the production implementation: it looks up
//! a [`ContentLoader`] by [`ContentKind`](lodstream_hierarchy::ContentKind),
//! runs the load through a [`TaskScheduler`], and collects completions over a
//! channel on the next [`poll`](ContentManager::poll).
//!
//! # Invariants
//! - `loading_count` counts loads dispatched and not yet polled or cancelled.
//! - A completion is applied only on the thread that owns the manager.
//! - An instance id belongs to at most one node.

mod error;
mod loader;
mod manager;
mod task;

pub use error::{ContentError, LoadFailure};
pub use loader::{CancellationToken, ContentLoader, LoadContext, LoadRequest, LoaderRegistry};
pub use manager::{ContentManager, StreamingContentManager};
pub use task::{
    DeferredScheduler, ImmediateScheduler, LoadExecution, Task, TaskScheduler,
    ThreadPoolScheduler,
};

pub fn crate_info() -> &'static str {
    "lodstream-content v0.1.0"
}
