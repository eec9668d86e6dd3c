use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use glam::Mat4;
use lodstream_commands::CommandQueue;
use lodstream_common::{IdAllocator, InstanceId, NodeId};
use lodstream_hierarchy::{ContentDescriptor, ContentKind};

use crate::error::ContentError;

/// Shared flag a loader may check to abandon work early.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// One node's load, as handed to a loader.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub node: NodeId,
    pub content: ContentDescriptor,
    pub transform: Mat4,
    pub cancel: CancellationToken,
}

/// What a loader may touch while loading or unloading.
///
/// Cheap to clone; every clone posts to the same queue and draws from the
/// same id counter.
#[derive(Debug, Clone)]
pub struct LoadContext {
    pub commands: Arc<CommandQueue>,
    pub ids: IdAllocator,
}

impl LoadContext {
    pub fn new(commands: Arc<CommandQueue>, ids: IdAllocator) -> Self {
        Self { commands, ids }
    }
}

/// Format-specific loader for one content kind.
///
/// `load` may run on a worker thread. It decodes the content, posts the
/// resource commands that materialize it and returns the instance that now
/// represents the node. Instances are posted hidden; visibility is driven by
/// the scheduler.
pub trait ContentLoader: Send + Sync {
    fn load(&self, request: &LoadRequest, ctx: &LoadContext) -> Result<InstanceId, ContentError>;

    /// Release everything `load` created for `instance`. Runs on the owning thread.
    fn unload(&self, instance: InstanceId, ctx: &LoadContext);

    /// Whether a node whose load failed may be loaded again on a later pass.
    fn retry_failed(&self) -> bool {
        false
    }
}

/// Capability map from content kind to loader.
#[derive(Default, Clone)]
pub struct LoaderRegistry {
    loaders: HashMap<ContentKind, Arc<dyn ContentLoader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `loader` for `kind`, returning the loader it replaced.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        loader: Arc<dyn ContentLoader>,
    ) -> Option<Arc<dyn ContentLoader>> {
        let kind = ContentKind::new(kind);
        tracing::debug!(%kind, "content loader registered");
        self.loaders.insert(kind, loader)
    }

    pub fn get(&self, kind: &ContentKind) -> Option<&Arc<dyn ContentLoader>> {
        self.loaders.get(kind)
    }

    pub fn contains(&self, kind: &ContentKind) -> bool {
        self.loaders.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }

    /// Registered kinds in sorted order.
    pub fn kinds(&self) -> Vec<&ContentKind> {
        let mut kinds: Vec<_> = self.loaders.keys().collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
