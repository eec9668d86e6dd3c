use std::collections::VecDeque;
use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};

use glam::Mat4;
use lodstream_common::{InstanceId, MeshId, NodeId, TextureId};

use crate::command::{
    Command, CommandListener, CommandTag, DeferredAction, InstanceData, MaterialProperty,
    MeshData, PropertyKey, TextureData, VisibilityChange,
};

/// Tags in arrival order plus one FIFO per payload type.
///
/// Popping a tag always pops the head of exactly one side queue (or none for
/// the payload-free markers), so the side queues stay aligned with the tags.
#[derive(Default)]
struct Pending {
    tags: VecDeque<CommandTag>,
    textures: VecDeque<TextureData>,
    texture_ids: VecDeque<TextureId>,
    meshes: VecDeque<MeshData>,
    mesh_ids: VecDeque<MeshId>,
    instances: VecDeque<InstanceData>,
    instance_ids: VecDeque<InstanceId>,
    visibility: VecDeque<VisibilityChange>,
    properties: VecDeque<MaterialProperty>,
    property_keys: VecDeque<PropertyKey>,
    actions: VecDeque<DeferredAction>,
}

impl Pending {
    fn push(&mut self, command: Command) {
        self.tags.push_back(command.tag());
        match command {
            Command::AllocateTexture(t) => self.textures.push_back(t),
            Command::DisposeTexture(id) => self.texture_ids.push_back(id),
            Command::AllocateMesh(m) => self.meshes.push_back(m),
            Command::DisposeMesh(id) => self.mesh_ids.push_back(id),
            Command::AllocateInstance(i) => self.instances.push_back(i),
            Command::DisposeInstance(id) => self.instance_ids.push_back(id),
            Command::UpdateInstanceVisibility(v) => self.visibility.push_back(v),
            Command::AddMaterialProperty(p) => self.properties.push_back(p),
            Command::RemoveMaterialProperty(k) => self.property_keys.push_back(k),
            Command::DeferredAction(a) => self.actions.push_back(a),
            Command::BeginAtomic | Command::EndAtomic => {}
        }
    }

    fn pop(&mut self) -> Option<Command> {
        let tag = self.tags.pop_front()?;
        let missing = "command side queue out of step with its tag";
        let command = match tag {
            CommandTag::AllocateTexture => {
                Command::AllocateTexture(self.textures.pop_front().expect(missing))
            }
            CommandTag::DisposeTexture => {
                Command::DisposeTexture(self.texture_ids.pop_front().expect(missing))
            }
            CommandTag::AllocateMesh => {
                Command::AllocateMesh(self.meshes.pop_front().expect(missing))
            }
            CommandTag::DisposeMesh => {
                Command::DisposeMesh(self.mesh_ids.pop_front().expect(missing))
            }
            CommandTag::AllocateInstance => {
                Command::AllocateInstance(self.instances.pop_front().expect(missing))
            }
            CommandTag::DisposeInstance => {
                Command::DisposeInstance(self.instance_ids.pop_front().expect(missing))
            }
            CommandTag::UpdateInstanceVisibility => {
                Command::UpdateInstanceVisibility(self.visibility.pop_front().expect(missing))
            }
            CommandTag::AddMaterialProperty => {
                Command::AddMaterialProperty(self.properties.pop_front().expect(missing))
            }
            CommandTag::RemoveMaterialProperty => {
                Command::RemoveMaterialProperty(self.property_keys.pop_front().expect(missing))
            }
            CommandTag::BeginAtomic => Command::BeginAtomic,
            CommandTag::EndAtomic => Command::EndAtomic,
            CommandTag::DeferredAction => {
                Command::DeferredAction(self.actions.pop_front().expect(missing))
            }
        };
        Some(command)
    }

    /// Move everything from `other` behind what is already queued.
    fn append(&mut self, mut other: Pending) {
        self.tags.append(&mut other.tags);
        self.textures.append(&mut other.textures);
        self.texture_ids.append(&mut other.texture_ids);
        self.meshes.append(&mut other.meshes);
        self.mesh_ids.append(&mut other.mesh_ids);
        self.instances.append(&mut other.instances);
        self.instance_ids.append(&mut other.instance_ids);
        self.visibility.append(&mut other.visibility);
        self.properties.append(&mut other.properties);
        self.property_keys.append(&mut other.property_keys);
        self.actions.append(&mut other.actions);
    }
}

/// Multi-producer, single-consumer queue of resource commands.
///
/// Producers on any thread enqueue under a short lock. The consumer calls
/// [`execute_single`](Self::execute_single) (or [`execute_all`](Self::execute_all))
/// once per tick; the lock is dropped before each listener callback so a
/// slow consumer never stalls the producers.
///
/// A `CommandQueue` also serves as the sub-buffer for
/// [`queue_atomic`](Self::queue_atomic).
#[derive(Default)]
pub struct CommandQueue {
    pending: Mutex<Pending>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        // Listeners never run under the lock and each tag/payload pair is
        // pushed in one step, so a poisoned queue is still consistent.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, command: Command) {
        self.lock().push(command);
    }

    pub fn allocate_texture(&self, texture: TextureData) {
        self.push(Command::AllocateTexture(texture));
    }

    pub fn dispose_texture(&self, id: TextureId) {
        self.push(Command::DisposeTexture(id));
    }

    pub fn allocate_mesh(&self, mesh: MeshData) {
        self.push(Command::AllocateMesh(mesh));
    }

    pub fn dispose_mesh(&self, id: MeshId) {
        self.push(Command::DisposeMesh(id));
    }

    pub fn allocate_instance(
        &self,
        id: InstanceId,
        node: NodeId,
        mesh: MeshId,
        transform: Mat4,
    ) {
        self.push(Command::AllocateInstance(InstanceData {
            id,
            node,
            mesh,
            material: None,
            transform,
            visible: false,
        }));
    }

    pub fn dispose_instance(&self, id: InstanceId) {
        self.push(Command::DisposeInstance(id));
    }

    pub fn update_instance_visibility(&self, instance: InstanceId, visible: bool) {
        self.push(Command::UpdateInstanceVisibility(VisibilityChange {
            instance,
            visible,
        }));
    }

    pub fn add_material_property(&self, property: MaterialProperty) {
        self.push(Command::AddMaterialProperty(property));
    }

    pub fn remove_material_property(&self, key: PropertyKey) {
        self.push(Command::RemoveMaterialProperty(key));
    }

    pub fn defer(&self, action: impl FnOnce() + Send + 'static) {
        self.push(Command::DeferredAction(Box::new(action)));
    }

    /// Splice all of `sub`'s commands in as one `BeginAtomic`/`EndAtomic` block.
    ///
    /// `sub` is left empty. An empty sub-buffer queues nothing.
    pub fn queue_atomic(&self, sub: &CommandQueue) {
        // Drain the sub-buffer before taking our own lock so the two locks are
        // never held together.
        let spliced = mem::take(&mut *sub.lock());
        if spliced.tags.is_empty() {
            return;
        }
        let count = spliced.tags.len();
        let mut pending = self.lock();
        pending.push(Command::BeginAtomic);
        pending.append(spliced);
        pending.push(Command::EndAtomic);
        tracing::trace!(count, "atomic block queued");
    }

    /// Move every pending command into a fresh queue.
    pub fn take(&self) -> CommandQueue {
        CommandQueue {
            pending: Mutex::new(mem::take(&mut *self.lock())),
        }
    }

    /// Dequeue exactly one command and dispatch it to `listener`.
    ///
    /// Returns `false` when the queue was empty.
    pub fn execute_single<L: CommandListener + ?Sized>(&self, listener: &mut L) -> bool {
        let Some(command) = self.lock().pop() else {
            return false;
        };
        command.dispatch(listener);
        true
    }

    /// Drain the queue, including commands pushed by the listener while draining.
    pub fn execute_all<L: CommandListener + ?Sized>(&self, listener: &mut L) -> usize {
        let mut executed = 0;
        while self.execute_single(listener) {
            executed += 1;
        }
        executed
    }

    pub fn len(&self) -> usize {
        self.lock().tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tags.is_empty()
    }

    pub fn clear(&self) {
        *self.lock() = Pending::default();
    }

    /// Tags of the pending commands, oldest first.
    pub fn pending_tags(&self) -> Vec<CommandTag> {
        self.lock().tags.iter().copied().collect()
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("len", &self.len())
            .finish()
    }
}
