use lodstream_common::NodeId;
use lodstream_content::{ContentManager, LoadFailure};
use lodstream_hierarchy::{CurrentState, Hierarchy};

/// Applies current-state transitions to the hierarchy and mirrors them into
/// the content manager.
///
/// Every transition checks its preconditions; a violation is a bug in the
/// caller and panics.
#[derive(Debug)]
pub struct CurrentStateController<C> {
    content: C,
}

impl<C: ContentManager> CurrentStateController<C> {
    pub fn new(content: C) -> Self {
        Self { content }
    }

    pub fn content(&self) -> &C {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut C {
        &mut self.content
    }

    pub fn into_content(self) -> C {
        self.content
    }

    /// Unloaded + Hidden → Loaded + Hidden, dispatching the content load.
    pub fn load(&mut self, hierarchy: &mut Hierarchy, id: NodeId) {
        let state = hierarchy.current_state(id);
        assert!(
            !state.is_loaded() && state.is_hidden(),
            "load of node {id} requires Unloaded|Hidden, found {state:?}"
        );
        hierarchy.set_current_state(id, CurrentState::LOADED);
        self.content
            .load(id, hierarchy.content(id), hierarchy.transform(id));
        tracing::debug!(node = %id, "node loading");
    }

    /// Loaded + Hidden → Unloaded, releasing (or cancelling) its content.
    pub fn unload(&mut self, hierarchy: &mut Hierarchy, id: NodeId) {
        let state = hierarchy.current_state(id);
        assert!(
            state.is_loaded() && state.is_hidden(),
            "unload of node {id} requires Loaded|Hidden, found {state:?}"
        );
        hierarchy.set_current_state(id, CurrentState::UNLOADED);
        self.content.unload(id);
        tracing::debug!(node = %id, "node unloaded");
    }

    /// Show and hide nodes in one atomic step.
    pub fn update_visibility(&mut self, hierarchy: &mut Hierarchy, show: &[NodeId], hide: &[NodeId]) {
        for &id in show {
            let state = hierarchy.current_state(id);
            assert!(
                state.is_loaded() && state.is_hidden(),
                "show of node {id} requires Loaded|Hidden, found {state:?}"
            );
        }
        for &id in hide {
            let state = hierarchy.current_state(id);
            assert!(
                state.is_visible(),
                "hide of node {id} requires Loaded|Visible, found {state:?}"
            );
        }
        for &id in hide {
            hierarchy.set_current_state(id, CurrentState::LOADED);
        }
        for &id in show {
            hierarchy.set_current_state(id, CurrentState::VISIBLE);
        }
        self.content.update_visibility(show, hide);
        tracing::debug!(shown = show.len(), hidden = hide.len(), "visibility updated");
    }

    /// Apply finished loads. Nodes whose load failed go back to Unloaded;
    /// their target state is left alone.
    pub fn poll(&mut self, hierarchy: &mut Hierarchy) -> Vec<LoadFailure> {
        let failures = self.content.poll();
        for failure in &failures {
            let id = failure.node;
            if !hierarchy.contains(id) {
                continue;
            }
            let state = hierarchy.current_state(id);
            if state.is_loaded() && state.is_hidden() {
                hierarchy.set_current_state(id, CurrentState::UNLOADED);
                tracing::debug!(node = %id, error = %failure.error, "failed load reverted");
            }
        }
        failures
    }

    /// Unload every Loaded node under `id` (bottom-up), then remove the
    /// subtree from the hierarchy.
    ///
    /// # Panics
    /// If any node in the subtree is Visible.
    pub fn retire_subtree(&mut self, hierarchy: &mut Hierarchy, id: NodeId) {
        let subtree = hierarchy.subtree(id);
        for &node in subtree.iter().rev() {
            if hierarchy.current_state(node).is_loaded() {
                self.unload(hierarchy, node);
            }
        }
        hierarchy.remove_node(id);
    }

    pub fn loading_count(&self) -> usize {
        self.content.loading_count()
    }

    pub fn is_loading(&self, id: NodeId) -> bool {
        self.content.is_loading(id)
    }

    pub fn can_load(&self, id: NodeId) -> bool {
        self.content.can_load(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualContent;
    use glam::Vec3;
    use lodstream_common::BoundingVolume;
    use lodstream_hierarchy::{ContentDescriptor, NodeData};

    fn setup() -> (Hierarchy, NodeId, CurrentStateController<ManualContent>) {
        let mut h = Hierarchy::new();
        let a = h.add_node(
            h.root(),
            NodeData::new(BoundingVolume::sphere(Vec3::ZERO, 1.0), 1.0),
            Some(ContentDescriptor::new("mesh", "a")),
        );
        (h, a, CurrentStateController::new(ManualContent::default()))
    }

    #[test]
    fn load_marks_loaded_and_dispatches() {
        let (mut h, a, mut c) = setup();
        c.load(&mut h, a);
        assert_eq!(h.current_state(a), CurrentState::LOADED);
        assert!(c.is_loading(a));
        assert_eq!(c.loading_count(), 1);
    }

    #[test]
    fn show_then_hide_then_unload() {
        let (mut h, a, mut c) = setup();
        c.load(&mut h, a);
        c.content_mut().complete_all();
        c.update_visibility(&mut h, &[a], &[]);
        assert_eq!(h.current_state(a), CurrentState::VISIBLE);
        c.update_visibility(&mut h, &[], &[a]);
        c.unload(&mut h, a);
        assert_eq!(h.current_state(a), CurrentState::UNLOADED);
        assert_eq!(c.content().visibility_calls.len(), 2);
    }

    #[test]
    fn failed_load_reverts_to_unloaded() {
        let (mut h, a, mut c) = setup();
        c.load(&mut h, a);
        c.content_mut().fail(a);
        let failures = c.poll(&mut h);
        assert_eq!(failures.len(), 1);
        assert_eq!(h.current_state(a), CurrentState::UNLOADED);
    }

    #[test]
    fn retire_subtree_unloads_bottom_up() {
        let (mut h, a, mut c) = setup();
        let child = h.add_node(a, NodeData::default(), None);
        c.load(&mut h, a);
        c.load(&mut h, child);
        c.retire_subtree(&mut h, a);
        assert!(!h.contains(a));
        assert!(!h.contains(child));
        assert_eq!(c.content().unloaded, vec![child, a]);
    }

    #[test]
    #[should_panic(expected = "requires Unloaded|Hidden")]
    fn double_load_panics() {
        let (mut h, a, mut c) = setup();
        c.load(&mut h, a);
        c.load(&mut h, a);
    }

    #[test]
    #[should_panic(expected = "requires Loaded|Hidden")]
    fn unloading_visible_node_panics() {
        let (mut h, a, mut c) = setup();
        c.load(&mut h, a);
        c.update_visibility(&mut h, &[a], &[]);
        c.unload(&mut h, a);
    }

    #[test]
    #[should_panic(expected = "requires Loaded|Visible")]
    fn hiding_hidden_node_panics() {
        let (mut h, a, mut c) = setup();
        c.load(&mut h, a);
        c.update_visibility(&mut h, &[], &[a]);
    }

    #[test]
    #[should_panic(expected = "requires Loaded|Hidden")]
    fn retiring_visible_subtree_panics() {
        let (mut h, a, mut c) = setup();
        c.load(&mut h, a);
        c.update_visibility(&mut h, &[a], &[]);
        c.retire_subtree(&mut h, a);
    }
}
