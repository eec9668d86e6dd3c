use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use lodstream_common::NodeId;
use lodstream_content::ContentManager;
use lodstream_hierarchy::{Hierarchy, RefinementMode, SchedulerCache, TargetState};

use crate::config::StreamConfig;
use crate::current::CurrentStateController;

/// Where the scheduler stopped on its last `process_next`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Processing,
    /// The load cap is reached; the pass resumes on the next call.
    WaitingOnLoad,
    /// The queue is empty. Expansions still parked on in-flight loads are
    /// picked up again by the next pass.
    Done,
}

/// Counters from one `process_next` call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SchedulerStats {
    pub processed: usize,
    pub expansions: usize,
    pub collapses: usize,
    pub loads_dispatched: usize,
    pub elapsed: Duration,
}

/// Pending evaluation. The heap pops the lowest priority first, ties in
/// insertion order.
#[derive(Debug, Clone, Copy)]
struct Entry {
    priority: f32,
    seq: u64,
    node: NodeId,
}

impl Eq for Entry {}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap, so both keys are reversed.
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Incrementally converges current state toward target state.
///
/// Nodes are evaluated most-over-budget first (`error_specification /
/// geometric_error` ascending). An expansion loads the node's children and,
/// once every child is resident, shows them in one atomic visibility swap
/// before queueing them. Until then the node is parked. A node whose target
/// turns Collapsed keeps its children for `unload_delay` seconds before they
/// are hidden and unloaded.
#[derive(Debug)]
pub struct ExpansionScheduler {
    queue: BinaryHeap<Entry>,
    parked: Vec<NodeId>,
    seq: u64,
    max_concurrent_loads: usize,
    unload_delay: f64,
    state: SchedulerState,
    last: SchedulerStats,
}

impl ExpansionScheduler {
    pub fn new(max_concurrent_loads: usize, unload_delay: f64) -> Self {
        assert!(max_concurrent_loads > 0, "max_concurrent_loads must be at least 1");
        Self {
            queue: BinaryHeap::new(),
            parked: Vec::new(),
            seq: 0,
            max_concurrent_loads,
            unload_delay,
            state: SchedulerState::Done,
            last: SchedulerStats::default(),
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.max_concurrent_loads, config.unload_delay)
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn last_stats(&self) -> SchedulerStats {
        self.last
    }

    /// Entries waiting in the priority queue.
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn parked(&self) -> &[NodeId] {
        &self.parked
    }

    pub fn is_parked(&self, id: NodeId) -> bool {
        self.parked.contains(&id)
    }

    pub fn max_concurrent_loads(&self) -> usize {
        self.max_concurrent_loads
    }

    pub fn set_max_concurrent_loads(&mut self, max: usize) {
        assert!(max > 0, "max_concurrent_loads must be at least 1");
        self.max_concurrent_loads = max;
    }

    pub fn unload_delay(&self) -> f64 {
        self.unload_delay
    }

    pub fn set_unload_delay(&mut self, delay: f64) {
        self.unload_delay = delay;
    }

    /// Drop all pending work and start a new pass from the root. Parked
    /// expansions are forgotten; the traversal reaches them again.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.parked.clear();
        self.queue.push(Entry {
            priority: f32::NEG_INFINITY,
            seq: self.seq,
            node: NodeId::ROOT,
        });
        self.seq += 1;
        self.state = SchedulerState::Processing;
        tracing::trace!("scheduler reset");
    }

    fn priority(hierarchy: &Hierarchy, id: NodeId) -> f32 {
        if hierarchy.target_state(id) == TargetState::Collapsed {
            return f32::INFINITY;
        }
        let ratio = hierarchy.error_specification(id) / hierarchy.data(id).geometric_error;
        if ratio.is_nan() { f32::INFINITY } else { ratio }
    }

    fn push(&mut self, hierarchy: &Hierarchy, id: NodeId) {
        self.queue.push(Entry {
            priority: Self::priority(hierarchy, id),
            seq: self.seq,
            node: id,
        });
        self.seq += 1;
    }

    /// Queue the resident children of an expanded node. Replace children that
    /// are expanded themselves are hidden but still need evaluating.
    fn enqueue_children(&mut self, hierarchy: &Hierarchy, id: NodeId) {
        let children: Vec<NodeId> = hierarchy
            .children(id)
            .filter(|&c| hierarchy.current_state(c).is_loaded())
            .collect();
        for child in children {
            self.push(hierarchy, child);
        }
    }

    fn park(&mut self, id: NodeId) {
        if !self.parked.contains(&id) {
            self.parked.push(id);
            tracing::debug!(node = %id, "expansion parked on child loads");
        }
    }

    /// Requeue parked nodes none of whose children are still loading.
    fn unpark_ready<C: ContentManager>(
        &mut self,
        hierarchy: &Hierarchy,
        current: &CurrentStateController<C>,
    ) {
        for id in std::mem::take(&mut self.parked) {
            if !hierarchy.contains(id) {
                continue;
            }
            if hierarchy.children(id).any(|c| current.is_loading(c)) {
                self.parked.push(id);
            } else {
                self.push(hierarchy, id);
            }
        }
    }

    /// Work through the queue until it empties or the load cap is reached.
    pub fn process_next<C: ContentManager>(
        &mut self,
        hierarchy: &mut Hierarchy,
        current: &mut CurrentStateController<C>,
        time: f64,
    ) -> SchedulerStats {
        let _span = tracing::info_span!("process_next", time).entered();
        let start = Instant::now();
        let mut stats = SchedulerStats::default();

        let failures = current.poll(hierarchy);
        if !failures.is_empty() {
            tracing::debug!(count = failures.len(), "failed loads reverted");
        }
        self.unpark_ready(hierarchy, current);

        self.state = loop {
            if current.loading_count() >= self.max_concurrent_loads {
                break SchedulerState::WaitingOnLoad;
            }
            let Some(entry) = self.queue.pop() else {
                break SchedulerState::Done;
            };
            let id = entry.node;
            if !hierarchy.contains(id) || !hierarchy.current_state(id).is_loaded() {
                continue;
            }
            stats.processed += 1;
            match hierarchy.target_state(id) {
                TargetState::Expanded => self.expand(hierarchy, current, id, &mut stats),
                TargetState::Collapsed => {
                    self.collapse_when_due(hierarchy, current, id, time, &mut stats)
                }
            }
        };

        stats.elapsed = start.elapsed();
        tracing::trace!(
            processed = stats.processed,
            expansions = stats.expansions,
            collapses = stats.collapses,
            loads = stats.loads_dispatched,
            queued = self.queue.len(),
            parked = self.parked.len(),
            state = ?self.state,
            "scheduler pass"
        );
        self.last = stats;
        stats
    }

    fn expand<C: ContentManager>(
        &mut self,
        hierarchy: &mut Hierarchy,
        current: &mut CurrentStateController<C>,
        id: NodeId,
        stats: &mut SchedulerStats,
    ) {
        let mut cache = hierarchy.scheduler_cache(id);
        if cache.collapse_deadline.take().is_some() {
            hierarchy.set_scheduler_cache(id, cache);
            tracing::debug!(node = %id, "pending collapse cancelled");
        }
        let children: Vec<NodeId> = hierarchy.children(id).collect();

        if cache.expanded {
            if self.admit_late_children(hierarchy, current, &children, stats) {
                self.park(id);
            }
            self.enqueue_children(hierarchy, id);
            return;
        }
        if children.is_empty() || !hierarchy.current_state(id).is_visible() {
            return;
        }

        let mut waiting = false;
        let mut stalled = false;
        for &child in &children {
            if hierarchy.current_state(child).is_loaded() {
                waiting |= current.is_loading(child);
                continue;
            }
            if !current.can_load(child) {
                stalled = true;
                continue;
            }
            if current.loading_count() >= self.max_concurrent_loads {
                waiting = true;
                continue;
            }
            current.load(hierarchy, child);
            stats.loads_dispatched += 1;
            waiting |= current.is_loading(child);
        }

        if stalled {
            // Loaded siblings stay resident and hidden so the expansion can
            // finish once the failure is cleared; a collapse unloads them.
            tracing::debug!(node = %id, "expansion stalled on a failed child load");
            return;
        }
        if waiting {
            self.park(id);
            return;
        }

        let hide = match hierarchy.data(id).refinement {
            RefinementMode::Replace => vec![id],
            RefinementMode::Additive => Vec::new(),
        };
        current.update_visibility(hierarchy, &children, &hide);
        cache.expanded = true;
        hierarchy.set_scheduler_cache(id, cache);
        stats.expansions += 1;
        tracing::debug!(node = %id, children = children.len(), "node expanded");
        self.enqueue_children(hierarchy, id);
    }

    /// Children added under an already expanded node are loaded and shown on
    /// their own. Returns true while any of them is still loading.
    fn admit_late_children<C: ContentManager>(
        &mut self,
        hierarchy: &mut Hierarchy,
        current: &mut CurrentStateController<C>,
        children: &[NodeId],
        stats: &mut SchedulerStats,
    ) -> bool {
        let mut ready = Vec::new();
        let mut waiting = false;
        for &child in children {
            let state = hierarchy.current_state(child);
            if !state.is_loaded() {
                if !current.can_load(child) {
                    continue;
                }
                if current.loading_count() < self.max_concurrent_loads {
                    current.load(hierarchy, child);
                    stats.loads_dispatched += 1;
                }
                waiting |= !hierarchy.current_state(child).is_loaded() || current.is_loading(child);
            } else if current.is_loading(child) {
                waiting = true;
            } else if state.is_hidden() && !hierarchy.scheduler_cache(child).expanded {
                ready.push(child);
            }
        }
        if !ready.is_empty() {
            current.update_visibility(hierarchy, &ready, &[]);
        }
        waiting
    }

    fn collapse_when_due<C: ContentManager>(
        &mut self,
        hierarchy: &mut Hierarchy,
        current: &mut CurrentStateController<C>,
        id: NodeId,
        time: f64,
        stats: &mut SchedulerStats,
    ) {
        if id.is_root() {
            return;
        }
        let mut cache = hierarchy.scheduler_cache(id);
        let holds_children = hierarchy
            .children(id)
            .any(|c| hierarchy.current_state(c).is_loaded());
        if !cache.expanded && !holds_children {
            if cache.collapse_deadline.take().is_some() {
                hierarchy.set_scheduler_cache(id, cache);
            }
            return;
        }

        let deadline = *cache
            .collapse_deadline
            .get_or_insert(time + self.unload_delay);
        hierarchy.set_scheduler_cache(id, cache);
        if time < deadline {
            tracing::trace!(node = %id, remaining = deadline - time, "collapse pending");
            return;
        }

        self.collapse(hierarchy, current, id);
        stats.collapses += 1;
    }

    /// Tear down everything resident below `id`, leaf-to-root: hide the
    /// children, re-show the parent where it was replaced, unload the children.
    fn collapse<C: ContentManager>(
        &mut self,
        hierarchy: &mut Hierarchy,
        current: &mut CurrentStateController<C>,
        id: NodeId,
    ) {
        let mut order = vec![id];
        let mut i = 0;
        while i < order.len() {
            let node = order[i];
            order.extend(
                hierarchy
                    .children(node)
                    .filter(|&c| hierarchy.current_state(c).is_loaded()),
            );
            i += 1;
        }

        let mut unloaded = 0;
        for &node in order.iter().rev() {
            let loaded: Vec<NodeId> = hierarchy
                .children(node)
                .filter(|&c| hierarchy.current_state(c).is_loaded())
                .collect();
            if !loaded.is_empty() {
                let hide: Vec<NodeId> = loaded
                    .iter()
                    .copied()
                    .filter(|&c| hierarchy.current_state(c).is_visible())
                    .collect();
                let state = hierarchy.current_state(node);
                let show = if hierarchy.scheduler_cache(node).expanded
                    && state.is_loaded()
                    && state.is_hidden()
                {
                    vec![node]
                } else {
                    Vec::new()
                };
                if !hide.is_empty() || !show.is_empty() {
                    current.update_visibility(hierarchy, &show, &hide);
                }
                for child in loaded {
                    current.unload(hierarchy, child);
                    unloaded += 1;
                }
            }
            if hierarchy.scheduler_cache(node) != SchedulerCache::default() {
                hierarchy.set_scheduler_cache(node, SchedulerCache::default());
            }
            self.parked.retain(|&p| p != node);
        }
        tracing::debug!(node = %id, unloaded, "node collapsed");
    }
}
