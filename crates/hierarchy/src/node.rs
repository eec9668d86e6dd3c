use glam::Mat4;
use lodstream_common::BoundingVolume;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a node's children relate to the node when they are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RefinementMode {
    /// Children fully substitute for the parent; the parent is hidden.
    #[default]
    Replace,
    /// Children add detail on top of the parent; both stay visible.
    Additive,
}

/// Geometric description of a node, replaced as a whole by `update_node`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub bounds: BoundingVolume,
    /// World-space error introduced by drawing this node instead of its children.
    pub geometric_error: f32,
    pub refinement: RefinementMode,
    /// Forces expansion regardless of observer distance.
    pub always_expand: bool,
    /// World transform handed to loaders alongside the content descriptor.
    pub transform: Mat4,
}

impl NodeData {
    pub fn new(bounds: BoundingVolume, geometric_error: f32) -> Self {
        Self {
            bounds,
            geometric_error,
            ..Self::default()
        }
    }

    pub fn with_refinement(mut self, refinement: RefinementMode) -> Self {
        self.refinement = refinement;
        self
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn always_expanded(mut self) -> Self {
        self.always_expand = true;
        self
    }

    /// The root covers everything, is always expanded and keeps itself
    /// visible next to its children.
    pub fn root() -> Self {
        Self {
            bounds: BoundingVolume::unbounded(),
            geometric_error: f32::INFINITY,
            refinement: RefinementMode::Additive,
            always_expand: true,
            transform: Mat4::IDENTITY,
        }
    }
}

impl Default for NodeData {
    fn default() -> Self {
        Self {
            bounds: BoundingVolume::default(),
            geometric_error: 0.0,
            refinement: RefinementMode::Replace,
            always_expand: false,
            transform: Mat4::IDENTITY,
        }
    }
}

/// Identifies which loader handles a piece of content (e.g. `"b3dm"`, `"glb"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentKind(pub String);

impl ContentKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What to load for a node. Interpreting `uri` is entirely up to the loader.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDescriptor {
    pub kind: ContentKind,
    pub uri: String,
}

impl ContentDescriptor {
    pub fn new(kind: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::new(kind),
            uri: uri.into(),
        }
    }
}

/// What is actually resident and drawn for a node.
///
/// Packed as bit flags; the only reachable combinations are unloaded,
/// loaded-hidden and loaded-visible.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CurrentState(u8);

impl CurrentState {
    const LOADED_BIT: u8 = 1 << 0;
    const VISIBLE_BIT: u8 = 1 << 1;

    pub const UNLOADED: Self = Self(0);
    pub const LOADED: Self = Self(Self::LOADED_BIT);
    pub const VISIBLE: Self = Self(Self::LOADED_BIT | Self::VISIBLE_BIT);

    pub fn is_loaded(self) -> bool {
        self.0 & Self::LOADED_BIT != 0
    }

    pub fn is_visible(self) -> bool {
        self.0 & Self::VISIBLE_BIT != 0
    }

    pub fn is_hidden(self) -> bool {
        !self.is_visible()
    }

    pub fn with_loaded(self, loaded: bool) -> Self {
        if loaded {
            Self(self.0 | Self::LOADED_BIT)
        } else {
            Self(self.0 & !Self::LOADED_BIT)
        }
    }

    pub fn with_visible(self, visible: bool) -> Self {
        if visible {
            Self(self.0 | Self::VISIBLE_BIT)
        } else {
            Self(self.0 & !Self::VISIBLE_BIT)
        }
    }

    /// Visible without Loaded is not a legal state.
    pub fn is_consistent(self) -> bool {
        !self.is_visible() || self.is_loaded()
    }
}

impl fmt::Debug for CurrentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loaded = if self.is_loaded() { "Loaded" } else { "Unloaded" };
        let visible = if self.is_visible() { "Visible" } else { "Hidden" };
        write!(f, "{loaded}|{visible}")
    }
}

/// The scheduler's goal for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TargetState {
    #[default]
    Collapsed,
    Expanded,
}

/// Bookkeeping owned by the expansion scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SchedulerCache {
    /// Children are resident and shown in place of (or on top of) this node.
    pub expanded: bool,
    /// Time at which a pending collapse fires, once one has been requested.
    pub collapse_deadline: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_state_flags() {
        assert!(!CurrentState::UNLOADED.is_loaded());
        assert!(CurrentState::LOADED.is_loaded());
        assert!(CurrentState::LOADED.is_hidden());
        assert!(CurrentState::VISIBLE.is_visible());
        assert!(CurrentState::VISIBLE.is_loaded());
    }

    #[test]
    fn current_state_transitions() {
        let s = CurrentState::UNLOADED.with_loaded(true).with_visible(true);
        assert_eq!(s, CurrentState::VISIBLE);
        assert_eq!(s.with_visible(false), CurrentState::LOADED);
        assert_eq!(CurrentState::LOADED.with_loaded(false), CurrentState::UNLOADED);
    }

    #[test]
    fn visible_without_loaded_is_inconsistent() {
        let bogus = CurrentState::UNLOADED.with_visible(true);
        assert!(!bogus.is_consistent());
        assert!(CurrentState::VISIBLE.is_consistent());
    }

    #[test]
    fn root_data_is_additive_and_forced() {
        let root = NodeData::root();
        assert_eq!(root.refinement, RefinementMode::Additive);
        assert!(root.always_expand);
    }

    #[test]
    fn debug_format_names_both_axes() {
        assert_eq!(format!("{:?}", CurrentState::LOADED), "Loaded|Hidden");
    }
}
