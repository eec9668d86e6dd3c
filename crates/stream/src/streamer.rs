use lodstream_common::NodeId;
use lodstream_content::ContentManager;
use lodstream_hierarchy::Hierarchy;

use crate::config::StreamConfig;
use crate::current::CurrentStateController;
use crate::scheduler::{ExpansionScheduler, SchedulerState, SchedulerStats};
use crate::target::{Observer, TargetStateController, TargetStats};

/// What one [`Streamer::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickStats {
    pub target: TargetStats,
    pub scheduler: SchedulerStats,
    pub state: SchedulerState,
}

/// Owns the hierarchy and the three controllers and drives them once per tick.
#[derive(Debug)]
pub struct Streamer<C: ContentManager> {
    hierarchy: Hierarchy,
    target: TargetStateController,
    scheduler: ExpansionScheduler,
    current: CurrentStateController<C>,
}

impl<C: ContentManager> Streamer<C> {
    /// # Panics
    /// If `config.max_concurrent_loads` is zero. Configs read through
    /// [`StreamConfig::load`] are already validated.
    pub fn new(config: &StreamConfig, content: C) -> Self {
        Self::with_hierarchy(config, Hierarchy::new(), content)
    }

    /// # Panics
    /// Same as [`Streamer::new`].
    pub fn with_hierarchy(config: &StreamConfig, hierarchy: Hierarchy, content: C) -> Self {
        Self {
            hierarchy,
            target: TargetStateController::new(),
            scheduler: ExpansionScheduler::from_config(config),
            current: CurrentStateController::new(content),
        }
    }

    /// Recompute targets, start a new pass if the last one finished, then
    /// advance the scheduler as far as the load cap allows. A pass finishes
    /// once its queue drains; parked expansions are picked up by the next.
    pub fn tick(&mut self, observers: &[Observer], time: f64) -> TickStats {
        let _span = tracing::info_span!("tick", time).entered();
        let target = self
            .target
            .update_target_state(&mut self.hierarchy, observers);
        if self.scheduler.state() == SchedulerState::Done {
            self.scheduler.reset();
        }
        let scheduler = self
            .scheduler
            .process_next(&mut self.hierarchy, &mut self.current, time);
        TickStats {
            target,
            scheduler,
            state: self.scheduler.state(),
        }
    }

    /// Unload and remove a hidden subtree.
    pub fn retire_subtree(&mut self, id: NodeId) {
        self.current.retire_subtree(&mut self.hierarchy, id);
    }

    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub fn hierarchy_mut(&mut self) -> &mut Hierarchy {
        &mut self.hierarchy
    }

    pub fn scheduler(&self) -> &ExpansionScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut ExpansionScheduler {
        &mut self.scheduler
    }

    pub fn current(&self) -> &CurrentStateController<C> {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut CurrentStateController<C> {
        &mut self.current
    }

    pub fn content(&self) -> &C {
        self.current.content()
    }

    pub fn content_mut(&mut self) -> &mut C {
        self.current.content_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::ErrorFunction;
    use crate::testing::ManualContent;
    use glam::{Mat4, Vec3};
    use lodstream_common::{BoundingSphere, BoundingVolume};
    use lodstream_hierarchy::{ContentDescriptor, CurrentState, NodeData};
    use std::sync::Arc;

    struct Fixed(f32);

    impl ErrorFunction for Fixed {
        fn error_specification(&self, _: &Mat4, _: &BoundingSphere) -> f32 {
            self.0
        }
    }

    fn streamer() -> (Streamer<ManualContent>, NodeId, NodeId) {
        let mut s = Streamer::new(&StreamConfig::default(), ManualContent::default());
        let h = s.hierarchy_mut();
        let data = |e| NodeData::new(BoundingVolume::sphere(Vec3::ZERO, 1.0), e);
        let a = h.add_node(h.root(), data(10.0), Some(ContentDescriptor::new("mesh", "a")));
        let b = h.add_node(a, data(1.0), Some(ContentDescriptor::new("mesh", "b")));
        (s, a, b)
    }

    #[test]
    fn ticks_converge_to_targets() {
        let (mut s, a, b) = streamer();
        let observers = [Observer::new(Mat4::IDENTITY, Arc::new(Fixed(5.0)))];
        let mut time = 0.0;
        for _ in 0..10 {
            s.tick(&observers, time);
            s.content_mut().complete_all();
            time += 0.1;
        }
        assert_eq!(s.state(), SchedulerState::Done);
        assert_eq!(s.hierarchy().current_state(a), CurrentState::LOADED);
        assert_eq!(s.hierarchy().current_state(b), CurrentState::VISIBLE);
    }

    #[test]
    fn losing_observers_collapses_after_delay() {
        let (mut s, a, b) = streamer();
        let observers = [Observer::new(Mat4::IDENTITY, Arc::new(Fixed(5.0)))];
        for i in 0..10 {
            s.tick(&observers, i as f64 * 0.1);
            s.content_mut().complete_all();
        }
        s.tick(&[], 1.0);
        assert_eq!(s.hierarchy().current_state(b), CurrentState::VISIBLE);
        s.tick(&[], 3.0);
        assert_eq!(s.hierarchy().current_state(a), CurrentState::VISIBLE);
        assert_eq!(s.hierarchy().current_state(b), CurrentState::UNLOADED);
    }

    #[test]
    fn tick_reports_pass_state() {
        let (mut s, _, _) = streamer();
        let stats = s.tick(&[], 0.0);
        assert_eq!(stats.target.evaluated, 1);
        assert_eq!(stats.state, SchedulerState::Done);
        assert_eq!(stats.scheduler.loads_dispatched, 1);
        assert!(s.scheduler().is_parked(s.hierarchy().root()));
    }

    fn fixed(spec: f32) -> [Observer; 1] {
        [Observer::new(Mat4::IDENTITY, Arc::new(Fixed(spec)))]
    }

    #[test]
    fn slow_load_does_not_block_other_nodes() {
        let mut s = Streamer::new(&StreamConfig::default(), ManualContent::default());
        let h = s.hierarchy_mut();
        let data = |e| NodeData::new(BoundingVolume::sphere(Vec3::ZERO, 1.0), e);
        let a = h.add_node(h.root(), data(20.0), Some(ContentDescriptor::new("mesh", "a")));
        let a0 = h.add_node(a, data(1.0), Some(ContentDescriptor::new("mesh", "a0")));
        let b = h.add_node(h.root(), data(10.0), Some(ContentDescriptor::new("mesh", "b")));
        let b0 = h.add_node(b, data(1.0), Some(ContentDescriptor::new("mesh", "b0")));

        s.tick(&fixed(5.0), 0.0);
        s.content_mut().complete_all();
        s.tick(&fixed(5.0), 0.1);

        // b0 arrives, a0 stays in flight.
        let content = s.content_mut();
        content.in_flight.retain(|&n| n != b0);
        content.resident.insert(b0);
        s.tick(&fixed(5.0), 0.2);
        assert!(s.hierarchy().scheduler_cache(b).expanded);
        assert!(s.scheduler().is_parked(a));
        assert_eq!(s.state(), SchedulerState::Done);

        // b loses its target while a is still waiting.
        s.tick(&fixed(15.0), 0.3);
        s.tick(&fixed(15.0), 2.5);
        assert_eq!(s.hierarchy().current_state(b0), CurrentState::UNLOADED);
        assert_eq!(s.hierarchy().current_state(b), CurrentState::VISIBLE);
        assert!(s.content().is_loading(a0));

        // Collapsing a cancels the load it was parked on.
        s.tick(&fixed(25.0), 3.0);
        s.tick(&fixed(25.0), 5.0);
        assert_eq!(s.hierarchy().current_state(a0), CurrentState::UNLOADED);
        assert_eq!(s.current().loading_count(), 0);
        assert!(s.content().unloaded.contains(&a0));
        assert!(!s.scheduler().is_parked(a));
    }

    #[test]
    #[should_panic(expected = "max_concurrent_loads must be at least 1")]
    fn zero_load_cap_panics() {
        let config = StreamConfig {
            max_concurrent_loads: 0,
            ..StreamConfig::default()
        };
        Streamer::new(&config, ManualContent::default());
    }
}
