//! Scene graph capability trait
//!
//! Nodes are addressed by `NodeHandle`. Traversal reports every node as a
//! tagged `SceneNode` so callers branch on the variant instead of probing
//! node properties.

use bitflags::bitflags;

use super::handles::{MaterialHandle, NodeHandle};
use super::render_host::BackendResult;
use crate::foundation::math::{Vec2, Vec3};

bitflags! {
    /// Per-mesh rendering flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u32 {
        /// Rendered into shadow maps
        const CAST_SHADOW = 1 << 0;
        /// Samples shadow maps when shaded
        const RECEIVE_SHADOW = 1 << 1;
        /// Drawn at all
        const VISIBLE = 1 << 2;
        /// Skipped when outside the camera frustum
        const FRUSTUM_CULLED = 1 << 3;
    }
}

impl Default for NodeFlags {
    fn default() -> Self {
        Self::VISIBLE | Self::FRUSTUM_CULLED
    }
}

/// Kind of a scene node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Renderable geometry with a material
    Mesh,
    /// Light source with an intensity
    Light,
    /// Transform-only container
    Group,
}

/// A node reported by scene traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SceneNode {
    /// Renderable geometry
    Mesh(NodeHandle),
    /// Light source
    Light(NodeHandle),
    /// Container
    Group(NodeHandle),
}

impl SceneNode {
    /// Handle of the node regardless of kind
    pub fn handle(self) -> NodeHandle {
        match self {
            Self::Mesh(h) | Self::Light(h) | Self::Group(h) => h,
        }
    }

    /// Kind of the node
    pub fn kind(self) -> NodeKind {
        match self {
            Self::Mesh(_) => NodeKind::Mesh,
            Self::Light(_) => NodeKind::Light,
            Self::Group(_) => NodeKind::Group,
        }
    }
}

/// Bounding box of a mesh's UV coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshUvBounds {
    /// Lower-left corner
    pub min: Vec2,
    /// Upper-right corner
    pub max: Vec2,
}

impl MeshUvBounds {
    /// The full [0, 1]² chart
    pub fn unit() -> Self {
        Self {
            min: Vec2::zeros(),
            max: Vec2::new(1.0, 1.0),
        }
    }

    /// Create bounds from corners
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Chart width and height
    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }
}

/// Affine remap from a mesh's own UVs into a shared lightmap
///
/// `lightmap_uv = uv * scale + offset`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvTransform {
    /// Translation in lightmap UV units
    pub offset: Vec2,
    /// Per-axis scale
    pub scale: Vec2,
}

impl UvTransform {
    /// Identity mapping
    pub fn identity() -> Self {
        Self {
            offset: Vec2::zeros(),
            scale: Vec2::new(1.0, 1.0),
        }
    }

    /// Map a mesh UV into lightmap space
    pub fn apply(&self, uv: Vec2) -> Vec2 {
        uv.component_mul(&self.scale) + self.offset
    }
}

impl Default for UvTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Orthographic shadow camera of a directional light
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowCameraParams {
    /// Shadow map side length in pixels
    pub map_size: u32,
    /// Depth bias
    pub bias: f32,
    /// Near plane
    pub near: f32,
    /// Far plane
    pub far: f32,
    /// Frustum left/right/top/bottom magnitude
    pub half_extent: f32,
}

/// Parameters for creating a directional light
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLightDescriptor {
    /// Light intensity
    pub intensity: f32,
    /// Initial position (the light points at its target, the parent origin)
    pub position: Vec3,
    /// Shadow camera configuration
    pub shadow: ShadowCameraParams,
}

/// Scene graph capability trait
pub trait SceneHost {
    /// Create an empty, detached group node
    fn create_group(&mut self) -> NodeHandle;

    /// Append `child` to `parent`, detaching it from any previous parent
    fn add_child(&mut self, parent: NodeHandle, child: NodeHandle) -> BackendResult<()>;

    /// Detach `child` from `parent`
    fn remove_child(&mut self, parent: NodeHandle, child: NodeHandle) -> BackendResult<()>;

    /// Reparent `child` under `parent` preserving its world transform
    fn attach(&mut self, parent: NodeHandle, child: NodeHandle) -> BackendResult<()>;

    /// Parent of a node, `None` for detached or root nodes
    fn parent(&self, node: NodeHandle) -> BackendResult<Option<NodeHandle>>;

    /// Destroy a node and its subtree
    fn remove_node(&mut self, node: NodeHandle) -> BackendResult<()>;

    /// Depth-first traversal of `root` and all descendants, `root` included
    fn traverse(&self, root: NodeHandle) -> BackendResult<Vec<SceneNode>>;

    /// Kind of a node
    fn node_kind(&self, node: NodeHandle) -> BackendResult<NodeKind>;

    /// Show or hide a node and its subtree
    fn set_visible(&mut self, node: NodeHandle, visible: bool) -> BackendResult<()>;

    /// Material currently assigned to a mesh
    fn mesh_material(&self, mesh: NodeHandle) -> BackendResult<MaterialHandle>;

    /// Assign a material to a mesh
    fn set_mesh_material(&mut self, mesh: NodeHandle, material: MaterialHandle) -> BackendResult<()>;

    /// Rendering flags of a mesh
    fn mesh_flags(&self, mesh: NodeHandle) -> BackendResult<NodeFlags>;

    /// Replace the rendering flags of a mesh
    fn set_mesh_flags(&mut self, mesh: NodeHandle, flags: NodeFlags) -> BackendResult<()>;

    /// UV bounds of a mesh, `None` when the geometry carries no UVs
    fn mesh_uv_bounds(&self, mesh: NodeHandle) -> BackendResult<Option<MeshUvBounds>>;

    /// Set the remap used to derive the mesh's lightmap UV channel
    fn set_lightmap_uv_transform(&mut self, mesh: NodeHandle, transform: UvTransform) -> BackendResult<()>;

    /// Create a detached directional light
    fn create_directional_light(&mut self, desc: &DirectionalLightDescriptor) -> BackendResult<NodeHandle>;

    /// Intensity of a light
    fn light_intensity(&self, light: NodeHandle) -> BackendResult<f32>;

    /// Change the intensity of a light
    fn set_light_intensity(&mut self, light: NodeHandle, intensity: f32) -> BackendResult<()>;

    /// Move a light
    fn set_light_position(&mut self, light: NodeHandle, position: Vec3) -> BackendResult<()>;

    /// Toggle a debug helper showing the light's shadow camera
    fn set_helper_visible(&mut self, _light: NodeHandle, _visible: bool) -> BackendResult<()> {
        Ok(())
    }
}
