use std::collections::VecDeque;
use std::sync::Arc;

use glam::{Mat4, Vec4};
use lodstream_common::{BoundingSphere, BoundingVolume, NodeId};
use lodstream_hierarchy::{Hierarchy, TargetState};

/// Maps a node's bounds, as seen by one observer, to the largest geometric
/// error that is still acceptable on screen.
pub trait ErrorFunction: Send + Sync {
    fn error_specification(&self, clip_from_world: &Mat4, sphere: &BoundingSphere) -> f32;
}

/// Pixel-tolerance error for a perspective projection.
///
/// The tolerance is projected to world units at the nearest depth of the
/// bounding sphere: `max_pixel_error * 2 * depth / (focal * viewport_height)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenSpaceError {
    pub viewport_height: f32,
    pub max_pixel_error: f32,
}

impl ScreenSpaceError {
    pub fn new(viewport_height: f32, max_pixel_error: f32) -> Self {
        Self {
            viewport_height,
            max_pixel_error,
        }
    }
}

impl ErrorFunction for ScreenSpaceError {
    fn error_specification(&self, clip_from_world: &Mat4, sphere: &BoundingSphere) -> f32 {
        let focal = clip_from_world.row(1).truncate().length();
        if focal <= 0.0 || self.viewport_height <= 0.0 {
            return f32::INFINITY;
        }
        let w = (*clip_from_world * sphere.center.extend(1.0)).w;
        let depth = (w - sphere.radius).max(0.0);
        self.max_pixel_error * 2.0 * depth / (focal * self.viewport_height)
    }
}

/// One viewpoint driving refinement.
#[derive(Clone)]
pub struct Observer {
    pub clip_from_world: Mat4,
    /// Nodes entirely on the negative side of `xyz·p + w = 0` are culled.
    pub clip_plane: Option<Vec4>,
    pub error_function: Arc<dyn ErrorFunction>,
    pub error_multiplier: f32,
}

impl Observer {
    pub fn new(clip_from_world: Mat4, error_function: Arc<dyn ErrorFunction>) -> Self {
        Self {
            clip_from_world,
            clip_plane: None,
            error_function,
            error_multiplier: 1.0,
        }
    }

    /// Perspective observer with a [`ScreenSpaceError`] metric.
    pub fn screen_space(clip_from_world: Mat4, viewport_height: f32, max_pixel_error: f32) -> Self {
        Self::new(
            clip_from_world,
            Arc::new(ScreenSpaceError::new(viewport_height, max_pixel_error)),
        )
    }

    pub fn with_clip_plane(mut self, plane: Vec4) -> Self {
        self.clip_plane = Some(plane);
        self
    }

    pub fn with_error_multiplier(mut self, multiplier: f32) -> Self {
        self.error_multiplier = multiplier;
        self
    }

    /// Acceptable error for `bounds`; `+∞` when the node is clipped away.
    pub fn error_specification(&self, bounds: &BoundingVolume) -> f32 {
        let sphere = bounds.bounding_sphere();
        if let Some(plane) = self.clip_plane {
            if sphere.plane_distance(plane) < 0.0 {
                return f32::INFINITY;
            }
        }
        self.error_function
            .error_specification(&self.clip_from_world, &sphere)
            * self.error_multiplier
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("clip_from_world", &self.clip_from_world)
            .field("clip_plane", &self.clip_plane)
            .field("error_multiplier", &self.error_multiplier)
            .finish_non_exhaustive()
    }
}

/// Counters from one target-state pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetStats {
    /// Nodes whose error was computed.
    pub evaluated: usize,
    pub expanded: usize,
    /// Nodes marked Collapsed, including skipped subtrees.
    pub collapsed: usize,
}

/// Recomputes every node's target state from the observers.
#[derive(Debug, Default)]
pub struct TargetStateController {
    queue: VecDeque<NodeId>,
    last: TargetStats,
}

impl TargetStateController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_stats(&self) -> TargetStats {
        self.last
    }

    /// Minimum error specification for `id` across all observers.
    pub fn error_specification(hierarchy: &Hierarchy, id: NodeId, observers: &[Observer]) -> f32 {
        let data = hierarchy.data(id);
        if data.always_expand {
            return f32::NEG_INFINITY;
        }
        observers
            .iter()
            .map(|o| o.error_specification(&data.bounds))
            .fold(f32::INFINITY, f32::min)
    }

    /// Breadth-first pass from the root. A node is Expanded only when its
    /// error specification is strictly below its geometric error; otherwise
    /// it and its whole subtree are Collapsed without being evaluated.
    pub fn update_target_state(
        &mut self,
        hierarchy: &mut Hierarchy,
        observers: &[Observer],
    ) -> TargetStats {
        let _span = tracing::info_span!("update_target_state", observers = observers.len())
            .entered();
        let mut stats = TargetStats::default();

        self.queue.clear();
        let root = hierarchy.root();
        hierarchy.set_target_state(root, TargetState::Expanded);
        hierarchy.set_error_specification(root, f32::NEG_INFINITY);
        stats.expanded += 1;
        self.queue.extend(hierarchy.children(root));

        while let Some(id) = self.queue.pop_front() {
            stats.evaluated += 1;
            let spec = Self::error_specification(hierarchy, id, observers);
            if spec < hierarchy.data(id).geometric_error {
                hierarchy.set_target_state(id, TargetState::Expanded);
                hierarchy.set_error_specification(id, spec);
                stats.expanded += 1;
                self.queue.extend(hierarchy.children(id));
            } else {
                stats.collapsed += collapse_subtree(hierarchy, id);
            }
        }

        tracing::trace!(
            evaluated = stats.evaluated,
            expanded = stats.expanded,
            collapsed = stats.collapsed,
            "target state updated"
        );
        self.last = stats;
        stats
    }
}

fn collapse_subtree(hierarchy: &mut Hierarchy, id: NodeId) -> usize {
    let subtree = hierarchy.subtree(id);
    for &node in &subtree {
        hierarchy.set_target_state(node, TargetState::Collapsed);
        hierarchy.set_error_specification(node, f32::INFINITY);
    }
    subtree.len()
}
