use std::collections::VecDeque;

use glam::Mat4;
use lodstream_common::NodeId;

use crate::node::{ContentDescriptor, CurrentState, NodeData, SchedulerCache, TargetState};
use crate::slab::{IndirectionTable, SlabHandle};

/// Everything the arena knows about one live node.
#[derive(Debug, Clone)]
struct NodeRecord {
    data: NodeData,
    content: Option<ContentDescriptor>,
    current: CurrentState,
    target: TargetState,
    /// Minimum on-screen error across observers; meaningful only while Expanded.
    error_specification: f32,
    cache: SchedulerCache,
    parent: Option<NodeId>,
    children: SlabHandle,
    depth: u32,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    record: Option<NodeRecord>,
}

/// Arena of LOD nodes.
///
/// Nodes refer to each other only through [`NodeId`] handles. Slots live in a
/// growable array, so growth moves storage but never renumbers a node. Freed
/// slots are reused in LIFO order with a bumped generation.
///
/// Child lists are kept in a shared [`IndirectionTable`]; the arena stores
/// only the slot index of each child there.
#[derive(Debug)]
pub struct Hierarchy {
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    slabs: IndirectionTable,
    live: usize,
}

impl Default for Hierarchy {
    fn default() -> Self {
        Self::new()
    }
}

impl Hierarchy {
    /// Create a hierarchy holding only the root, which is Loaded, Visible and
    /// Expanded for its whole life.
    pub fn new() -> Self {
        let root = NodeRecord {
            data: NodeData::root(),
            content: None,
            current: CurrentState::VISIBLE,
            target: TargetState::Expanded,
            error_specification: f32::NEG_INFINITY,
            cache: SchedulerCache::default(),
            parent: None,
            children: SlabHandle::NULL,
            depth: 0,
        };
        Self {
            slots: vec![Slot {
                generation: NodeId::ROOT.generation,
                record: Some(root),
            }],
            free_slots: Vec::new(),
            slabs: IndirectionTable::new(),
            live: 1,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Number of live nodes, root included.
    pub fn node_count(&self) -> usize {
        self.live
    }

    /// Number of slots ever allocated (live + free).
    pub fn slot_capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn slabs(&self) -> &IndirectionTable {
        &self.slabs
    }

    fn record(&self, id: NodeId) -> &NodeRecord {
        match self.slots.get(id.index as usize) {
            Some(Slot {
                generation,
                record: Some(record),
            }) if *generation == id.generation => record,
            _ => panic!("stale or invalid node handle {id}"),
        }
    }

    fn record_mut(&mut self, id: NodeId) -> &mut NodeRecord {
        match self.slots.get_mut(id.index as usize) {
            Some(Slot {
                generation,
                record: Some(record),
            }) if *generation == id.generation => record,
            _ => panic!("stale or invalid node handle {id}"),
        }
    }

    /// Rebuild a full handle from a slot index stored in a child slab.
    fn handle_at(&self, index: u32) -> NodeId {
        NodeId::new(index, self.slots[index as usize].generation)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        matches!(
            self.slots.get(id.index as usize),
            Some(Slot { generation, record: Some(_) }) if *generation == id.generation
        )
    }

    /// Add a node under `parent`. It starts Unloaded, Hidden and Collapsed.
    pub fn add_node(
        &mut self,
        parent: NodeId,
        data: NodeData,
        content: Option<ContentDescriptor>,
    ) -> NodeId {
        let depth = self.record(parent).depth + 1;
        let record = NodeRecord {
            data,
            content,
            current: CurrentState::UNLOADED,
            target: TargetState::Collapsed,
            error_specification: f32::INFINITY,
            cache: SchedulerCache::default(),
            parent: Some(parent),
            children: SlabHandle::NULL,
            depth,
        };

        let id = match self.free_slots.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                debug_assert!(slot.record.is_none());
                slot.record = Some(record);
                NodeId::new(index, slot.generation)
            }
            None => {
                let index = u32::try_from(self.slots.len())
                    .expect("hierarchy exceeded u32::MAX node slots");
                self.slots.push(Slot {
                    generation: 0,
                    record: Some(record),
                });
                NodeId::new(index, 0)
            }
        };

        let slab = self.record(parent).children;
        let slab = self.slabs.push(slab, id.index);
        self.record_mut(parent).children = slab;
        self.live += 1;

        tracing::trace!(node = %id, parent = %parent, depth, "node added");
        id
    }

    /// Remove `id` and its whole subtree.
    ///
    /// # Panics
    /// If `id` is the root, stale, or any node in the subtree is Visible.
    pub fn remove_node(&mut self, id: NodeId) {
        assert!(!id.is_root(), "the root node cannot be removed");
        let parent = self
            .record(id)
            .parent
            .expect("non-root node always has a parent");

        // Pass 1: unlink, then gather the subtree breadth-first.
        let parent_slab = self.record(parent).children;
        let unlinked = self.slabs.remove(parent_slab, id.index);
        debug_assert!(unlinked, "node {id} missing from its parent's child slab");
        if self.slabs.count(parent_slab) == 0 {
            self.slabs.release(parent_slab);
            self.record_mut(parent).children = SlabHandle::NULL;
        }

        let mut doomed = Vec::new();
        let mut queue = VecDeque::from([id]);
        while let Some(node) = queue.pop_front() {
            let record = self.record(node);
            assert!(
                !record.current.is_visible(),
                "cannot remove node {node}: it is Visible"
            );
            queue.extend(
                self.slabs
                    .entries(record.children)
                    .iter()
                    .map(|&i| self.handle_at(i)),
            );
            doomed.push(node);
        }

        // Pass 2: release bottom-up so no freed slab is still referenced.
        let removed = doomed.len();
        while let Some(node) = doomed.pop() {
            let slot = &mut self.slots[node.index as usize];
            let record = slot.record.take().expect("collected node is live");
            slot.generation = slot.generation.wrapping_add(1);
            self.slabs.release(record.children);
            self.free_slots.push(node.index);
        }
        self.live -= removed;

        tracing::debug!(node = %id, removed, "subtree removed");
    }

    /// Replace a node's geometric data.
    ///
    /// # Panics
    /// If any child of `id` is Loaded.
    pub fn update_node(&mut self, id: NodeId, data: NodeData) {
        assert!(
            self.children(id).all(|c| !self.record(c).current.is_loaded()),
            "cannot update node {id}: it has Loaded children"
        );
        self.record_mut(id).data = data;
    }

    pub fn children(&self, id: NodeId) -> impl ExactSizeIterator<Item = NodeId> + '_ {
        let slab = self.record(id).children;
        self.slabs
            .entries(slab)
            .iter()
            .map(move |&index| self.handle_at(index))
    }

    pub fn child_count(&self, id: NodeId) -> usize {
        self.slabs.count(self.record(id).children) as usize
    }

    pub fn has_children(&self, id: NodeId) -> bool {
        self.child_count(id) > 0
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.record(id).parent
    }

    pub fn depth(&self, id: NodeId) -> u32 {
        self.record(id).depth
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.record(id).data
    }

    pub fn transform(&self, id: NodeId) -> Mat4 {
        self.record(id).data.transform
    }

    pub fn slab_capacity(&self, id: NodeId) -> u32 {
        self.slabs.capacity(self.record(id).children)
    }

    pub fn slab_count(&self, id: NodeId) -> u32 {
        self.slabs.count(self.record(id).children)
    }

    pub fn content(&self, id: NodeId) -> Option<&ContentDescriptor> {
        self.record(id).content.as_ref()
    }

    /// Replace the content descriptor.
    ///
    /// # Panics
    /// If the node is Loaded; its current content must be unloaded first.
    pub fn set_content(&mut self, id: NodeId, content: Option<ContentDescriptor>) {
        let record = self.record_mut(id);
        assert!(
            !record.current.is_loaded(),
            "cannot replace content of node {id}: it is Loaded"
        );
        record.content = content;
    }

    pub fn current_state(&self, id: NodeId) -> CurrentState {
        self.record(id).current
    }

    /// Overwrite the current state.
    ///
    /// # Panics
    /// If the new state breaks Visible ⟹ Loaded, Loaded ⟹ parent Loaded, or
    /// unloads a node that still has Loaded children.
    pub fn set_current_state(&mut self, id: NodeId, state: CurrentState) {
        assert!(
            state.is_consistent(),
            "node {id}: Visible requires Loaded (got {state:?})"
        );
        let record = self.record(id);
        if state.is_loaded() {
            if let Some(parent) = record.parent {
                assert!(
                    self.record(parent).current.is_loaded(),
                    "node {id} cannot be Loaded while its parent {parent} is Unloaded"
                );
            }
        } else if record.current.is_loaded() {
            assert!(
                self.children(id).all(|c| !self.record(c).current.is_loaded()),
                "node {id} cannot be Unloaded while it has Loaded children"
            );
        }
        self.record_mut(id).current = state;
    }

    pub fn target_state(&self, id: NodeId) -> TargetState {
        self.record(id).target
    }

    pub fn set_target_state(&mut self, id: NodeId, target: TargetState) {
        self.record_mut(id).target = target;
    }

    pub fn error_specification(&self, id: NodeId) -> f32 {
        self.record(id).error_specification
    }

    pub fn set_error_specification(&mut self, id: NodeId, error: f32) {
        self.record_mut(id).error_specification = error;
    }

    pub fn scheduler_cache(&self, id: NodeId) -> SchedulerCache {
        self.record(id).cache
    }

    pub fn set_scheduler_cache(&mut self, id: NodeId, cache: SchedulerCache) {
        self.record_mut(id).cache = cache;
    }

    /// Live node handles in slot order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.record.is_some())
            .map(|(i, slot)| NodeId::new(i as u32, slot.generation))
    }

    /// Handles of `id` and all of its descendants, breadth-first.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = vec![id];
        let mut i = 0;
        while i < out.len() {
            let node = out[i];
            out.extend(self.children(node));
            i += 1;
        }
        out
    }
}
