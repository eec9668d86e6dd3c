//! Shared types for the lodstream workspace: node handles, resource ids and
//! bounding volumes.
//!
//! # Invariants
//! - Handles are plain values; they never own what they refer to.
//! - Id allocation is explicit and per-instance; there is no process-wide counter.

mod bounds;
mod types;

pub use bounds::{Aabb, BoundingSphere, BoundingVolume};
pub use types::{IdAllocator, InstanceId, MaterialId, MeshId, NodeId, TextureId};

pub fn crate_info() -> &'static str {
    "lodstream-common v0.1.0"
}
