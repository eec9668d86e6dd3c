use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use glam::Mat4;
use lodstream_commands::CommandQueue;
use lodstream_common::{IdAllocator, InstanceId, NodeId};
use lodstream_hierarchy::{ContentDescriptor, ContentKind};

use crate::error::{ContentError, LoadFailure};
use crate::loader::{CancellationToken, ContentLoader, LoadContext, LoadRequest, LoaderRegistry};
use crate::task::{LoadExecution, TaskScheduler};

/// What the current-state controller needs from the content side.
pub trait ContentManager {
    /// Start loading `content` for `node`. Nodes without content are resident
    /// immediately.
    fn load(&mut self, node: NodeId, content: Option<&ContentDescriptor>, transform: Mat4);

    /// Release `node`'s content, cancelling its load if one is in flight.
    fn unload(&mut self, node: NodeId);

    /// Show and hide nodes as one indivisible change.
    fn update_visibility(&mut self, show: &[NodeId], hide: &[NodeId]);

    /// Loads dispatched and not yet completed or cancelled.
    fn loading_count(&self) -> usize;

    fn is_loading(&self, node: NodeId) -> bool;

    /// False once a load for `node` failed and its loader does not retry.
    fn can_load(&self, node: NodeId) -> bool;

    /// Apply finished loads. Returns the ones that failed.
    fn poll(&mut self) -> Vec<LoadFailure>;
}

struct Completion {
    node: NodeId,
    ticket: u64,
    kind: Option<ContentKind>,
    result: Result<InstanceId, ContentError>,
}

#[derive(Debug)]
struct Ticket {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Debug, Clone)]
struct Resident {
    kind: Option<ContentKind>,
    instance: Option<InstanceId>,
}

/// Content manager backed by a loader registry and a task scheduler.
///
/// Loads run wherever the [`TaskScheduler`] puts them and report back over a
/// channel; nothing is applied until [`poll`](ContentManager::poll).
pub struct StreamingContentManager {
    registry: LoaderRegistry,
    scheduler: Box<dyn TaskScheduler>,
    ctx: LoadContext,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    next_ticket: u64,
    pending: HashMap<NodeId, Ticket>,
    /// Cancelled loads whose completion has not arrived yet.
    retired: HashSet<u64>,
    resident: HashMap<NodeId, Resident>,
    owners: HashMap<InstanceId, NodeId>,
    stalled: HashSet<NodeId>,
}

impl StreamingContentManager {
    pub fn new(
        registry: LoaderRegistry,
        scheduler: Box<dyn TaskScheduler>,
        commands: Arc<CommandQueue>,
        ids: IdAllocator,
    ) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            registry,
            scheduler,
            ctx: LoadContext::new(commands, ids),
            tx,
            rx,
            next_ticket: 0,
            pending: HashMap::new(),
            retired: HashSet::new(),
            resident: HashMap::new(),
            owners: HashMap::new(),
            stalled: HashSet::new(),
        }
    }

    pub fn with_execution(
        registry: LoaderRegistry,
        execution: LoadExecution,
        commands: Arc<CommandQueue>,
        ids: IdAllocator,
    ) -> Self {
        Self::new(registry, execution.scheduler(), commands, ids)
    }

    pub fn registry(&self) -> &LoaderRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut LoaderRegistry {
        &mut self.registry
    }

    pub fn commands(&self) -> &Arc<CommandQueue> {
        &self.ctx.commands
    }

    pub fn context(&self) -> &LoadContext {
        &self.ctx
    }

    /// Instance currently representing `node`, if its content is resident.
    pub fn instance(&self, node: NodeId) -> Option<InstanceId> {
        self.resident.get(&node).and_then(|r| r.instance)
    }

    pub fn is_resident(&self, node: NodeId) -> bool {
        self.resident.contains_key(&node)
    }

    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    /// Cancelled loads still running somewhere.
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Allow every stalled node to be loaded again.
    pub fn clear_failures(&mut self) {
        self.stalled.clear();
    }

    fn send_now(&self, completion: Completion) {
        // The receiver lives in `self`, so sending cannot fail here.
        let _ = self.tx.send(completion);
    }

    fn release(&self, kind: Option<&ContentKind>, instance: InstanceId) {
        match kind.and_then(|k| self.registry.get(k)) {
            Some(loader) => loader.unload(instance, &self.ctx),
            None => tracing::warn!(?instance, "no loader to release instance"),
        }
    }

    fn apply(&mut self, completion: Completion, failures: &mut Vec<LoadFailure>) {
        let Completion {
            node,
            ticket,
            kind,
            result,
        } = completion;

        let current = self.pending.get(&node).is_some_and(|t| t.id == ticket);
        if !current {
            // Cancelled while in flight; whatever it produced goes straight back.
            let was_retired = self.retired.remove(&ticket);
            debug_assert!(was_retired, "completion for unknown load ticket {ticket}");
            match result {
                Ok(instance) => {
                    tracing::warn!(%node, ?instance, "cancelled load completed; unloading");
                    self.release(kind.as_ref(), instance);
                }
                Err(error) => tracing::debug!(%node, %error, "cancelled load finished"),
            }
            return;
        }
        self.pending.remove(&node);

        match result {
            Ok(instance) => {
                if let Some(owner) = self.owners.insert(instance, node) {
                    assert!(
                        owner == node,
                        "instance {instance:?} already registered to node {owner}"
                    );
                }
                tracing::debug!(%node, ?instance, "load complete");
                self.resident.insert(
                    node,
                    Resident {
                        kind,
                        instance: Some(instance),
                    },
                );
            }
            Err(error) => {
                let retry = kind
                    .as_ref()
                    .and_then(|k| self.registry.get(k))
                    .is_some_and(|l| l.retry_failed());
                if !retry {
                    self.stalled.insert(node);
                }
                tracing::warn!(%node, %error, retry, "load failed");
                failures.push(LoadFailure { node, error });
            }
        }
    }
}

impl ContentManager for StreamingContentManager {
    fn load(&mut self, node: NodeId, content: Option<&ContentDescriptor>, transform: Mat4) {
        assert!(
            !self.pending.contains_key(&node) && !self.resident.contains_key(&node),
            "node {node} is already loading or resident"
        );

        let Some(content) = content else {
            self.resident.insert(
                node,
                Resident {
                    kind: None,
                    instance: None,
                },
            );
            tracing::debug!(%node, "empty node resident");
            return;
        };

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let cancel = CancellationToken::new();
        self.pending.insert(
            node,
            Ticket {
                id: ticket,
                cancel: cancel.clone(),
            },
        );

        let kind = content.kind.clone();
        let Some(loader) = self.registry.get(&kind).map(Arc::clone) else {
            self.send_now(Completion {
                node,
                ticket,
                kind: None,
                result: Err(ContentError::UnknownKind(kind)),
            });
            return;
        };

        let request = LoadRequest {
            node,
            content: content.clone(),
            transform,
            cancel,
        };
        let ctx = self.ctx.clone();
        let tx = self.tx.clone();
        tracing::debug!(%node, %kind, uri = %content.uri, ticket, "load dispatched");
        self.scheduler.spawn(Box::new(move || {
            let result = if request.cancel.is_cancelled() {
                Err(ContentError::Cancelled)
            } else {
                run_loader(loader.as_ref(), &request, &ctx)
            };
            let _ = tx.send(Completion {
                node,
                ticket,
                kind: Some(kind),
                result,
            });
        }));
    }

    fn unload(&mut self, node: NodeId) {
        if let Some(ticket) = self.pending.remove(&node) {
            ticket.cancel.cancel();
            self.retired.insert(ticket.id);
            tracing::debug!(%node, ticket = ticket.id, "in-flight load cancelled");
            return;
        }
        let Some(resident) = self.resident.remove(&node) else {
            tracing::trace!(%node, "unload of non-resident node ignored");
            return;
        };
        if let Some(instance) = resident.instance {
            self.owners.remove(&instance);
            self.release(resident.kind.as_ref(), instance);
        }
        tracing::debug!(%node, "content unloaded");
    }

    fn update_visibility(&mut self, show: &[NodeId], hide: &[NodeId]) {
        let block = CommandQueue::new();
        for &node in show {
            if let Some(instance) = self.instance(node) {
                block.update_instance_visibility(instance, true);
            }
        }
        for &node in hide {
            if let Some(instance) = self.instance(node) {
                block.update_instance_visibility(instance, false);
            }
        }
        self.ctx.commands.queue_atomic(&block);
    }

    fn loading_count(&self) -> usize {
        self.pending.len()
    }

    fn is_loading(&self, node: NodeId) -> bool {
        self.pending.contains_key(&node)
    }

    fn can_load(&self, node: NodeId) -> bool {
        !self.stalled.contains(&node)
    }

    fn poll(&mut self) -> Vec<LoadFailure> {
        self.scheduler.run_pending();
        let mut failures = Vec::new();
        while let Ok(completion) = self.rx.try_recv() {
            self.apply(completion, &mut failures);
        }
        failures
    }
}

fn run_loader(
    loader: &dyn ContentLoader,
    request: &LoadRequest,
    ctx: &LoadContext,
) -> Result<InstanceId, ContentError> {
    let _span = tracing::debug_span!("content_load", node = %request.node).entered();
    loader.load(request, ctx)
}

impl std::fmt::Debug for StreamingContentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingContentManager")
            .field("registry", &self.registry)
            .field("loading", &self.pending.len())
            .field("resident", &self.resident.len())
            .field("retired", &self.retired.len())
            .field("stalled", &self.stalled.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{DeferredScheduler, ImmediateScheduler};
    use lodstream_commands::{
        CommandListener, InstanceData, MaterialProperty, MeshData, PropertyKey, TextureData,
        VisibilityChange,
    };
    use lodstream_common::{MeshId, TextureId};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Posts a mesh and an instance per load; fails for uris starting with "bad".
    #[derive(Default)]
    struct MeshLoader {
        retry: bool,
        unloads: AtomicUsize,
    }

    impl ContentLoader for MeshLoader {
        fn load(&self, req: &LoadRequest, ctx: &LoadContext) -> Result<InstanceId, ContentError> {
            if req.content.uri.starts_with("bad") {
                return Err(ContentError::Decode(format!("cannot decode {}", req.content.uri)));
            }
            let mesh = ctx.ids.mesh();
            ctx.commands.allocate_mesh(MeshData {
                id: mesh,
                positions: Vec::new(),
                normals: Vec::new(),
                uvs: Vec::new(),
                indices: Vec::new(),
            });
            let instance = ctx.ids.instance();
            ctx.commands
                .allocate_instance(instance, req.node, mesh, req.transform);
            Ok(instance)
        }

        fn unload(&self, instance: InstanceId, ctx: &LoadContext) {
            self.unloads.fetch_add(1, Ordering::SeqCst);
            ctx.commands.dispose_instance(instance);
        }

        fn retry_failed(&self) -> bool {
            self.retry
        }
    }

    /// Hands out the same instance id for every load.
    struct SameInstance;

    impl ContentLoader for SameInstance {
        fn load(&self, _: &LoadRequest, _: &LoadContext) -> Result<InstanceId, ContentError> {
            Ok(InstanceId(7))
        }
        fn unload(&self, _: InstanceId, _: &LoadContext) {}
    }

    #[derive(Default)]
    struct Log(Vec<String>);

    impl CommandListener for Log {
        fn allocate_texture(&mut self, t: TextureData) {
            self.0.push(format!("tex+{}", t.id.0));
        }
        fn dispose_texture(&mut self, id: TextureId) {
            self.0.push(format!("tex-{}", id.0));
        }
        fn allocate_mesh(&mut self, m: MeshData) {
            self.0.push(format!("mesh+{}", m.id.0));
        }
        fn dispose_mesh(&mut self, id: MeshId) {
            self.0.push(format!("mesh-{}", id.0));
        }
        fn allocate_instance(&mut self, i: InstanceData) {
            self.0.push(format!("inst+{}", i.id.0));
        }
        fn dispose_instance(&mut self, id: InstanceId) {
            self.0.push(format!("inst-{}", id.0));
        }
        fn update_instance_visibility(&mut self, v: VisibilityChange) {
            self.0.push(format!("vis {} {}", v.instance.0, v.visible));
        }
        fn add_material_property(&mut self, _: MaterialProperty) {}
        fn remove_material_property(&mut self, _: PropertyKey) {}
        fn begin_atomic(&mut self) {
            self.0.push("begin".into());
        }
        fn end_atomic(&mut self) {
            self.0.push("end".into());
        }
    }

    fn manager(
        scheduler: Box<dyn TaskScheduler>,
        loader: Arc<dyn ContentLoader>,
    ) -> StreamingContentManager {
        let mut registry = LoaderRegistry::new();
        registry.register("mesh", loader);
        StreamingContentManager::new(
            registry,
            scheduler,
            Arc::new(CommandQueue::new()),
            IdAllocator::starting_at(100),
        )
    }

    fn node(i: u32) -> NodeId {
        NodeId::new(i, 0)
    }

    fn mesh_content(uri: &str) -> ContentDescriptor {
        ContentDescriptor::new("mesh", uri)
    }

    #[test]
    fn immediate_load_is_counted_until_polled() {
        let mut m = manager(Box::new(ImmediateScheduler), Arc::new(MeshLoader::default()));
        m.load(node(1), Some(&mesh_content("a")), Mat4::IDENTITY);
        assert_eq!(m.loading_count(), 1);
        assert!(m.is_loading(node(1)));

        assert!(m.poll().is_empty());
        assert_eq!(m.loading_count(), 0);
        assert!(m.instance(node(1)).is_some());
        assert_eq!(m.commands().len(), 2);
    }

    #[test]
    fn deferred_load_runs_on_poll() {
        let mut m = manager(
            Box::new(DeferredScheduler::new()),
            Arc::new(MeshLoader::default()),
        );
        m.load(node(1), Some(&mesh_content("a")), Mat4::IDENTITY);
        assert!(m.commands().is_empty());
        m.poll();
        assert!(m.is_resident(node(1)));
        assert!(!m.commands().is_empty());
    }

    #[test]
    fn node_without_content_is_resident_at_once() {
        let mut m = manager(Box::new(ImmediateScheduler), Arc::new(MeshLoader::default()));
        m.load(node(1), None, Mat4::IDENTITY);
        assert_eq!(m.loading_count(), 0);
        assert!(m.is_resident(node(1)));
        assert_eq!(m.instance(node(1)), None);
    }

    #[test]
    fn unknown_kind_fails_on_poll() {
        let mut m = manager(Box::new(ImmediateScheduler), Arc::new(MeshLoader::default()));
        m.load(
            node(1),
            Some(&ContentDescriptor::new("pnts", "x")),
            Mat4::IDENTITY,
        );
        let failures = m.poll();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].error, ContentError::UnknownKind(_)));
        assert!(!m.can_load(node(1)));
        assert!(!m.is_resident(node(1)));
    }

    #[test]
    fn failed_load_stalls_without_retry() {
        let mut m = manager(Box::new(ImmediateScheduler), Arc::new(MeshLoader::default()));
        m.load(node(1), Some(&mesh_content("bad.glb")), Mat4::IDENTITY);
        let failures = m.poll();
        assert_eq!(failures[0].node, node(1));
        assert!(matches!(failures[0].error, ContentError::Decode(_)));
        assert!(!m.can_load(node(1)));

        m.clear_failures();
        assert!(m.can_load(node(1)));
    }

    #[test]
    fn retrying_loader_keeps_node_loadable() {
        let loader = MeshLoader {
            retry: true,
            ..MeshLoader::default()
        };
        let mut m = manager(Box::new(ImmediateScheduler), Arc::new(loader));
        m.load(node(1), Some(&mesh_content("bad")), Mat4::IDENTITY);
        assert_eq!(m.poll().len(), 1);
        assert!(m.can_load(node(1)));
    }

    #[test]
    fn unload_releases_instance_through_loader() {
        let loader = Arc::new(MeshLoader::default());
        let mut m = manager(Box::new(ImmediateScheduler), loader.clone());
        m.load(node(1), Some(&mesh_content("a")), Mat4::IDENTITY);
        m.poll();
        m.unload(node(1));
        assert!(!m.is_resident(node(1)));
        assert_eq!(loader.unloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unload_cancels_in_flight_load() {
        let loader = Arc::new(MeshLoader::default());
        let mut m = manager(Box::new(DeferredScheduler::new()), loader.clone());
        m.load(node(1), Some(&mesh_content("a")), Mat4::IDENTITY);
        m.unload(node(1));
        assert_eq!(m.loading_count(), 0);
        assert_eq!(m.retired_count(), 1);

        // The task sees the token and never reaches the loader.
        assert!(m.poll().is_empty());
        assert_eq!(m.retired_count(), 0);
        assert!(m.commands().is_empty());
        assert_eq!(loader.unloads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancelled_load_that_completes_is_unloaded() {
        let loader = Arc::new(MeshLoader::default());
        let mut m = manager(Box::new(ImmediateScheduler), loader.clone());
        m.load(node(1), Some(&mesh_content("a")), Mat4::IDENTITY);
        // Already finished on the immediate scheduler, but not yet polled.
        m.unload(node(1));
        assert!(m.poll().is_empty());
        assert!(!m.is_resident(node(1)));
        assert_eq!(loader.unloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reload_after_cancel_uses_fresh_ticket() {
        let mut m = manager(
            Box::new(DeferredScheduler::new()),
            Arc::new(MeshLoader::default()),
        );
        m.load(node(1), Some(&mesh_content("a")), Mat4::IDENTITY);
        m.unload(node(1));
        m.load(node(1), Some(&mesh_content("a")), Mat4::IDENTITY);
        m.poll();
        assert!(m.is_resident(node(1)));
        assert_eq!(m.loading_count(), 0);
    }

    #[test]
    fn visibility_is_one_atomic_block() {
        let mut m = manager(Box::new(ImmediateScheduler), Arc::new(MeshLoader::default()));
        for i in 1..=3 {
            m.load(node(i), Some(&mesh_content("a")), Mat4::IDENTITY);
        }
        m.load(node(4), None, Mat4::IDENTITY);
        m.poll();
        let mut log = Log::default();
        m.commands().execute_all(&mut log);

        m.update_visibility(&[node(2), node(3), node(4)], &[node(1)]);
        log.0.clear();
        m.commands().execute_all(&mut log);
        let i1 = m.instance(node(1)).unwrap().0;
        let i2 = m.instance(node(2)).unwrap().0;
        let i3 = m.instance(node(3)).unwrap().0;
        assert_eq!(
            log.0,
            vec![
                "begin".to_string(),
                format!("vis {i2} true"),
                format!("vis {i3} true"),
                format!("vis {i1} false"),
                "end".to_string(),
            ]
        );
    }

    #[test]
    fn visibility_for_empty_nodes_queues_nothing() {
        let mut m = manager(Box::new(ImmediateScheduler), Arc::new(MeshLoader::default()));
        m.load(node(1), None, Mat4::IDENTITY);
        m.update_visibility(&[node(1)], &[]);
        assert!(m.commands().is_empty());
    }

    #[test]
    #[should_panic(expected = "already registered to node")]
    fn duplicate_instance_id_panics() {
        let mut m = manager(Box::new(ImmediateScheduler), Arc::new(SameInstance));
        m.load(node(1), Some(&mesh_content("a")), Mat4::IDENTITY);
        m.load(node(2), Some(&mesh_content("b")), Mat4::IDENTITY);
        m.poll();
    }

    #[test]
    #[should_panic(expected = "already loading or resident")]
    fn double_load_panics() {
        let mut m = manager(
            Box::new(DeferredScheduler::new()),
            Arc::new(MeshLoader::default()),
        );
        m.load(node(1), Some(&mesh_content("a")), Mat4::IDENTITY);
        m.load(node(1), Some(&mesh_content("a")), Mat4::IDENTITY);
    }

    #[test]
    fn thread_pool_loads_complete() {
        let mut registry = LoaderRegistry::new();
        registry.register("mesh", Arc::new(MeshLoader::default()));
        let mut m = StreamingContentManager::with_execution(
            registry,
            LoadExecution::ThreadPool,
            Arc::new(CommandQueue::new()),
            IdAllocator::new(),
        );
        for i in 1..=8 {
            m.load(node(i), Some(&mesh_content("a")), Mat4::IDENTITY);
        }
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        while m.loading_count() > 0 && std::time::Instant::now() < deadline {
            m.poll();
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(m.loading_count(), 0);
        assert_eq!(m.resident_count(), 8);
        let ids: HashSet<_> = (1..=8).filter_map(|i| m.instance(node(i))).collect();
        assert_eq!(ids.len(), 8);
    }

    #[test]
    fn loader_sees_cancellation_mid_flight() {
        struct Watcher(Mutex<Option<CancellationToken>>);
        impl ContentLoader for Watcher {
            fn load(&self, req: &LoadRequest, _: &LoadContext) -> Result<InstanceId, ContentError> {
                *self.0.lock().unwrap() = Some(req.cancel.clone());
                Ok(InstanceId(1))
            }
            fn unload(&self, _: InstanceId, _: &LoadContext) {}
        }
        let watcher = Arc::new(Watcher(Mutex::new(None)));
        let mut m = manager(Box::new(ImmediateScheduler), watcher.clone());
        m.load(node(1), Some(&mesh_content("a")), Mat4::IDENTITY);
        m.unload(node(1));
        let token = watcher.0.lock().unwrap().clone().unwrap();
        assert!(token.is_cancelled());
    }
}
