//! LOD hierarchy: an arena of nodes addressed by stable handles.
//!
//! # Invariants
//! - Visible implies Loaded; Loaded implies the parent is Loaded.
//! - A node's data changes only while all of its children are Unloaded.
//! - A Visible node is never removed; the root is never removed.
//! - A child slab never holds more handles than its capacity.
//!
//! Violating any of these is a programmer error and panics.

pub mod arena;
pub mod node;
pub mod slab;

pub use arena::Hierarchy;
pub use node::{
    ContentDescriptor, ContentKind, CurrentState, NodeData, RefinementMode, SchedulerCache,
    TargetState,
};
pub use slab::{IndirectionTable, MIN_SLAB_CAPACITY, SlabHandle};

pub fn crate_info() -> &'static str {
    "lodstream-hierarchy v0.1.0"
}
