use glam::{Mat4, Vec2, Vec3, Vec4};
use lodstream_common::{InstanceId, MaterialId, MeshId, NodeId, TextureId};
use std::fmt;

/// Work to run on the consumer thread.
pub type DeferredAction = Box<dyn FnOnce() + Send + 'static>;

/// Discriminant stored in the queue's main FIFO. Payloads live in side queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandTag {
    AllocateTexture,
    DisposeTexture,
    AllocateMesh,
    DisposeMesh,
    AllocateInstance,
    DisposeInstance,
    UpdateInstanceVisibility,
    AddMaterialProperty,
    RemoveMaterialProperty,
    BeginAtomic,
    EndAtomic,
    DeferredAction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub id: TextureId,
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8 rows.
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    pub id: MeshId,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub indices: Vec<u32>,
}

/// A drawable placement of a mesh, owned by one hierarchy node.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceData {
    pub id: InstanceId,
    pub node: NodeId,
    pub mesh: MeshId,
    pub material: Option<MaterialId>,
    pub transform: Mat4,
    /// Instances are created hidden and shown through visibility updates.
    pub visible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityChange {
    pub instance: InstanceId,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Float(f32),
    Vector(Vec4),
    Texture(TextureId),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyKey {
    pub instance: InstanceId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaterialProperty {
    pub key: PropertyKey,
    pub value: PropertyValue,
}

/// A dequeued command with its payload reattached.
pub enum Command {
    AllocateTexture(TextureData),
    DisposeTexture(TextureId),
    AllocateMesh(MeshData),
    DisposeMesh(MeshId),
    AllocateInstance(InstanceData),
    DisposeInstance(InstanceId),
    UpdateInstanceVisibility(VisibilityChange),
    AddMaterialProperty(MaterialProperty),
    RemoveMaterialProperty(PropertyKey),
    BeginAtomic,
    EndAtomic,
    DeferredAction(DeferredAction),
}

impl Command {
    pub fn tag(&self) -> CommandTag {
        match self {
            Self::AllocateTexture(_) => CommandTag::AllocateTexture,
            Self::DisposeTexture(_) => CommandTag::DisposeTexture,
            Self::AllocateMesh(_) => CommandTag::AllocateMesh,
            Self::DisposeMesh(_) => CommandTag::DisposeMesh,
            Self::AllocateInstance(_) => CommandTag::AllocateInstance,
            Self::DisposeInstance(_) => CommandTag::DisposeInstance,
            Self::UpdateInstanceVisibility(_) => CommandTag::UpdateInstanceVisibility,
            Self::AddMaterialProperty(_) => CommandTag::AddMaterialProperty,
            Self::RemoveMaterialProperty(_) => CommandTag::RemoveMaterialProperty,
            Self::BeginAtomic => CommandTag::BeginAtomic,
            Self::EndAtomic => CommandTag::EndAtomic,
            Self::DeferredAction(_) => CommandTag::DeferredAction,
        }
    }

    /// Hand the command to the matching listener callback.
    pub fn dispatch<L: CommandListener + ?Sized>(self, listener: &mut L) {
        match self {
            Self::AllocateTexture(t) => listener.allocate_texture(t),
            Self::DisposeTexture(id) => listener.dispose_texture(id),
            Self::AllocateMesh(m) => listener.allocate_mesh(m),
            Self::DisposeMesh(id) => listener.dispose_mesh(id),
            Self::AllocateInstance(i) => listener.allocate_instance(i),
            Self::DisposeInstance(id) => listener.dispose_instance(id),
            Self::UpdateInstanceVisibility(v) => listener.update_instance_visibility(v),
            Self::AddMaterialProperty(p) => listener.add_material_property(p),
            Self::RemoveMaterialProperty(k) => listener.remove_material_property(k),
            Self::BeginAtomic => listener.begin_atomic(),
            Self::EndAtomic => listener.end_atomic(),
            Self::DeferredAction(action) => listener.execute_action(action),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocateTexture(t) => f.debug_tuple("AllocateTexture").field(&t.id).finish(),
            Self::DisposeTexture(id) => f.debug_tuple("DisposeTexture").field(id).finish(),
            Self::AllocateMesh(m) => f.debug_tuple("AllocateMesh").field(&m.id).finish(),
            Self::DisposeMesh(id) => f.debug_tuple("DisposeMesh").field(id).finish(),
            Self::AllocateInstance(i) => f.debug_tuple("AllocateInstance").field(&i.id).finish(),
            Self::DisposeInstance(id) => f.debug_tuple("DisposeInstance").field(id).finish(),
            Self::UpdateInstanceVisibility(v) => {
                f.debug_tuple("UpdateInstanceVisibility").field(v).finish()
            }
            Self::AddMaterialProperty(p) => {
                f.debug_tuple("AddMaterialProperty").field(&p.key).finish()
            }
            Self::RemoveMaterialProperty(k) => {
                f.debug_tuple("RemoveMaterialProperty").field(k).finish()
            }
            Self::BeginAtomic => f.write_str("BeginAtomic"),
            Self::EndAtomic => f.write_str("EndAtomic"),
            Self::DeferredAction(_) => f.write_str("DeferredAction"),
        }
    }
}

/// Consumer side of the queue: materializes and destroys render resources.
///
/// Everything between `begin_atomic` and `end_atomic` belongs to one
/// indivisible change, e.g. a parent hidden and its children shown; a
/// consumer should present it in a single frame.
pub trait CommandListener {
    fn allocate_texture(&mut self, texture: TextureData);
    fn dispose_texture(&mut self, id: TextureId);
    fn allocate_mesh(&mut self, mesh: MeshData);
    fn dispose_mesh(&mut self, id: MeshId);
    fn allocate_instance(&mut self, instance: InstanceData);
    fn dispose_instance(&mut self, id: InstanceId);
    fn update_instance_visibility(&mut self, change: VisibilityChange);
    fn add_material_property(&mut self, property: MaterialProperty);
    fn remove_material_property(&mut self, key: PropertyKey);

    fn begin_atomic(&mut self) {}

    fn end_atomic(&mut self) {}

    fn execute_action(&mut self, action: DeferredAction) {
        action();
    }
}
