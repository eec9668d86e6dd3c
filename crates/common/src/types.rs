use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable handle to a node slot in the hierarchy arena.
///
/// The generation is bumped every time a slot is freed, so a handle that
/// outlives its node is detected instead of silently aliasing a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub index: u32,
    pub generation: u32,
}

impl NodeId {
    /// The root always occupies slot 0 and is never freed.
    pub const ROOT: NodeId = NodeId {
        index: 0,
        generation: 0,
    };

    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Render instance created for a node's loaded content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

/// Mesh resource handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeshId(pub u64);

/// Texture resource handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TextureId(pub u64);

/// Material resource handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaterialId(pub u64);

/// Monotonic id source shared between the content manager and its loaders.
///
/// Cloning shares the counter. Each streaming system owns one and injects it
/// where ids are minted, so two systems never contend on a global.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    next: Arc<AtomicU64>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting from `first` (useful when resuming or in tests).
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: Arc::new(AtomicU64::new(first)),
        }
    }

    fn next_raw(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    pub fn instance(&self) -> InstanceId {
        InstanceId(self.next_raw())
    }

    pub fn mesh(&self) -> MeshId {
        MeshId(self.next_raw())
    }

    pub fn texture(&self) -> TextureId {
        TextureId(self.next_raw())
    }

    pub fn material(&self) -> MaterialId {
        MaterialId(self.next_raw())
    }

    /// Number of ids handed out so far (plus the starting offset).
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}
