//! Resource command queue: the one cross-thread boundary of the streaming system.
//!
//! Background loads push resource mutations (allocate a mesh, show an
//! instance, ...) from any thread; a single consumer drains them, one command
//! per call, into a [`CommandListener`] that owns the real render resources.
//!
//! # Invariants
//! - Commands are delivered in the order they were queued.
//! - A block spliced with [`CommandQueue::queue_atomic`] is delivered as
//!   `BeginAtomic`, its commands, `EndAtomic`, with nothing interleaved.
//! - The queue lock is never held while a listener callback runs.

mod command;
mod queue;

pub use command::{
    Command, CommandListener, CommandTag, DeferredAction, InstanceData, MaterialProperty,
    MeshData, PropertyKey, PropertyValue, TextureData, VisibilityChange,
};
pub use queue::CommandQueue;

pub fn crate_info() -> &'static str {
    "lodstream-commands v0.1.0"
}
