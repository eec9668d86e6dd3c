//! Hand-driven content manager for unit tests.

use std::collections::HashSet;

use glam::Mat4;
use lodstream_common::NodeId;
use lodstream_content::{ContentError, ContentManager, LoadFailure};
use lodstream_hierarchy::ContentDescriptor;

/// Loads stay in flight until the test completes or fails them.
#[derive(Debug, Default)]
pub struct ManualContent {
    pub in_flight: Vec<NodeId>,
    pub resident: HashSet<NodeId>,
    pub stalled: HashSet<NodeId>,
    pub loads: Vec<NodeId>,
    pub unloaded: Vec<NodeId>,
    pub visibility_calls: Vec<(Vec<NodeId>, Vec<NodeId>)>,
    failures: Vec<LoadFailure>,
}

impl ManualContent {
    pub fn complete_all(&mut self) {
        self.resident.extend(self.in_flight.drain(..));
    }

    pub fn fail(&mut self, node: NodeId) {
        self.in_flight.retain(|&n| n != node);
        self.stalled.insert(node);
        self.failures.push(LoadFailure {
            node,
            error: ContentError::Decode("test failure".into()),
        });
    }
}

impl ContentManager for ManualContent {
    fn load(&mut self, node: NodeId, _: Option<&ContentDescriptor>, _: Mat4) {
        self.loads.push(node);
        self.in_flight.push(node);
    }

    fn unload(&mut self, node: NodeId) {
        self.in_flight.retain(|&n| n != node);
        self.resident.remove(&node);
        self.unloaded.push(node);
    }

    fn update_visibility(&mut self, show: &[NodeId], hide: &[NodeId]) {
        self.visibility_calls.push((show.to_vec(), hide.to_vec()));
    }

    fn loading_count(&self) -> usize {
        self.in_flight.len()
    }

    fn is_loading(&self, node: NodeId) -> bool {
        self.in_flight.contains(&node)
    }

    fn can_load(&self, node: NodeId) -> bool {
        !self.stalled.contains(&node)
    }

    fn poll(&mut self) -> Vec<LoadFailure> {
        std::mem::take(&mut self.failures)
    }
}
