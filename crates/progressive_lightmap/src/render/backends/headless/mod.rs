//! Headless software backend
//!
//! A CPU implementation of `RenderHost` and `SceneHost`. Render targets are
//! plain RGBA float arrays; a scene draw rasterizes every visible mesh whose
//! material unwraps along its lightmap UVs over that mesh's chart, shading
//! each texel with a pluggable irradiance model and blending it with the
//! sampled previous buffer the way the accumulation fragment stage does.
//! Meshes drawn with ordinary (camera-projected) materials leave no texels.
//!
//! Beyond the host traits it offers inspection helpers (texels, draw log,
//! node state) and fault injection for tests.

mod raster;
mod scene;

use crate::foundation::collections::{key_from_raw, key_to_raw, HandleMap};
use crate::foundation::math::{Vec2, Vec3};
use crate::render::api::{
    BackendResult, BuiltinProgram, CameraHandle, ClearColor, MaterialHandle, MeshUvBounds, NodeFlags, NodeHandle,
    PixelFormat, RenderHost, RenderTargetHandle, ShadowCameraParams, TextureHandle, UvTransform,
};
use crate::render::shader::ShaderProgram;
use crate::render::RenderError;

pub use raster::{DrawKind, DrawRecord, IrradianceQuery, LitLight};

/// Irradiance model: shading of one texel given the lights in the draw
pub type IrradianceModel = Box<dyn Fn(&IrradianceQuery<'_>) -> f32>;

#[derive(Debug)]
struct MeshData {
    material: MaterialHandle,
    flags: NodeFlags,
    uv_bounds: Option<MeshUvBounds>,
    lightmap_uv: UvTransform,
}

#[derive(Debug)]
struct LightData {
    intensity: f32,
    position: Vec3,
    shadow: Option<ShadowCameraParams>,
    helper_visible: bool,
}

#[derive(Debug)]
enum NodeData {
    Group,
    Mesh(MeshData),
    Light(LightData),
}

#[derive(Debug)]
struct Node {
    parent: Option<NodeHandle>,
    children: Vec<NodeHandle>,
    visible: bool,
    data: NodeData,
}

impl Node {
    fn new(data: NodeData) -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            visible: true,
            data,
        }
    }
}

#[derive(Debug)]
struct Material {
    program: ShaderProgram,
}

#[derive(Debug)]
struct TargetStorage {
    width: u32,
    height: u32,
    format: PixelFormat,
    texels: Vec<[f32; 4]>,
    texture: TextureHandle,
}

/// CPU host for tests, tools and the demo
pub struct HeadlessHost {
    nodes: HandleMap<Node>,
    materials: HandleMap<Material>,
    targets: HandleMap<TargetStorage>,
    textures: HandleMap<RenderTargetHandle>,
    cameras: HandleMap<()>,

    supported_formats: Vec<PixelFormat>,
    bound_target: Option<RenderTargetHandle>,
    clear_color: ClearColor,

    irradiance: IrradianceModel,
    draw_log: Vec<DrawRecord>,
    render_fault: Option<u32>,
    render_calls: u64,
}

impl Default for HeadlessHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessHost {
    /// Create an empty host supporting every pixel format
    ///
    /// The default irradiance model sums the intensities of the lights in
    /// the draw, i.e. an unshadowed scene.
    pub fn new() -> Self {
        Self {
            nodes: HandleMap::new(),
            materials: HandleMap::new(),
            targets: HandleMap::new(),
            textures: HandleMap::new(),
            cameras: HandleMap::new(),
            supported_formats: vec![PixelFormat::Rgba32Float, PixelFormat::Rgba16Float, PixelFormat::Rgba8Unorm],
            bound_target: None,
            clear_color: ClearColor::TRANSPARENT,
            irradiance: Box::new(|query| query.lights.iter().map(|l| l.intensity).sum()),
            draw_log: Vec::new(),
            render_fault: None,
            render_calls: 0,
        }
    }

    /// Create a camera
    pub fn create_camera(&mut self) -> CameraHandle {
        CameraHandle(key_to_raw(self.cameras.insert(())))
    }

    /// Create a detached mesh with its own Lambert material
    ///
    /// `None` bounds model geometry without UV coordinates.
    pub fn create_mesh(&mut self, uv_bounds: Option<MeshUvBounds>) -> NodeHandle {
        let program = self.builtin_program(BuiltinProgram::Lambert);
        let material = MaterialHandle(key_to_raw(self.materials.insert(Material { program })));
        self.insert_node(NodeData::Mesh(MeshData {
            material,
            flags: NodeFlags::default(),
            uv_bounds,
            lightmap_uv: UvTransform::identity(),
        }))
    }

    /// Create a detached light without a shadow camera
    pub fn create_point_light(&mut self, intensity: f32) -> NodeHandle {
        self.insert_node(NodeData::Light(LightData {
            intensity,
            position: Vec3::zeros(),
            shadow: None,
            helper_visible: false,
        }))
    }

    fn insert_node(&mut self, data: NodeData) -> NodeHandle {
        NodeHandle(key_to_raw(self.nodes.insert(Node::new(data))))
    }

    /// Restrict the formats render targets can be created with
    pub fn set_supported_formats(&mut self, formats: &[PixelFormat]) {
        self.supported_formats = formats.to_vec();
    }

    /// Replace the irradiance model
    pub fn set_irradiance_model(&mut self, model: impl Fn(&IrradianceQuery<'_>) -> f32 + 'static) {
        self.irradiance = Box::new(model);
    }

    /// Make a scene draw fail after `successes` more successful ones
    ///
    /// The fault fires once and then disarms.
    pub fn fail_render_after(&mut self, successes: u32) {
        self.render_fault = Some(successes);
    }

    /// Number of scene draws requested so far, failed ones included
    pub fn render_calls(&self) -> u64 {
        self.render_calls
    }

    /// Draws recorded so far
    pub fn draw_log(&self) -> &[DrawRecord] {
        &self.draw_log
    }

    /// Forget recorded draws
    pub fn clear_draw_log(&mut self) {
        self.draw_log.clear();
    }

    /// Fill a render target with one value
    pub fn fill_target(&mut self, target: RenderTargetHandle, value: [f32; 4]) -> BackendResult<()> {
        let storage = self.target_mut(target)?;
        storage.texels.fill(value);
        Ok(())
    }

    /// Texels of a render target, row-major from the first row
    pub fn target_texels(&self, target: RenderTargetHandle) -> BackendResult<&[[f32; 4]]> {
        Ok(&self.target(target)?.texels)
    }

    /// Width and height of a render target
    pub fn target_size(&self, target: RenderTargetHandle) -> BackendResult<(u32, u32)> {
        let storage = self.target(target)?;
        Ok((storage.width, storage.height))
    }

    /// Render target a texture views
    pub fn texture_target(&self, texture: TextureHandle) -> Option<RenderTargetHandle> {
        self.textures.get(key_from_raw(texture.0)).copied()
    }

    /// Texels behind a texture
    pub fn texture_texels(&self, texture: TextureHandle) -> BackendResult<&[[f32; 4]]> {
        let target = self.texture_target(texture).ok_or(RenderError::InvalidHandle {
            kind: "texture",
            raw: texture.0,
        })?;
        self.target_texels(target)
    }

    /// Nearest texel of a texture at `uv`
    pub fn sample(&self, texture: TextureHandle, uv: Vec2) -> BackendResult<[f32; 4]> {
        let target = self.texture_target(texture).ok_or(RenderError::InvalidHandle {
            kind: "texture",
            raw: texture.0,
        })?;
        let storage = self.target(target)?;
        Ok(raster::sample_nearest(&storage.texels, storage.width, storage.height, uv))
    }

    /// Program of a material, with its current uniform values
    pub fn material_program(&self, material: MaterialHandle) -> BackendResult<&ShaderProgram> {
        Ok(&self.material(material)?.program)
    }

    /// Number of live materials
    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    /// Number of live scene nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of live render targets
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Whether a node's own visibility flag is set
    pub fn is_visible(&self, node: NodeHandle) -> BackendResult<bool> {
        Ok(self.node(node)?.visible)
    }

    /// Whether a light's shadow-camera helper is shown
    pub fn helper_visible(&self, light: NodeHandle) -> bool {
        self.light(light).is_ok_and(|l| l.helper_visible)
    }

    /// Position of a light
    pub fn light_position(&self, light: NodeHandle) -> BackendResult<Vec3> {
        Ok(self.light(light)?.position)
    }

    /// Shadow camera of a directional light
    pub fn light_shadow(&self, light: NodeHandle) -> BackendResult<Option<ShadowCameraParams>> {
        Ok(self.light(light)?.shadow)
    }

    /// Lightmap UV remap of a mesh
    pub fn lightmap_uv_transform(&self, mesh: NodeHandle) -> BackendResult<UvTransform> {
        Ok(self.mesh(mesh)?.lightmap_uv)
    }

    fn node(&self, node: NodeHandle) -> BackendResult<&Node> {
        self.nodes.get(key_from_raw(node.0)).ok_or(RenderError::InvalidHandle {
            kind: "node",
            raw: node.0,
        })
    }

    fn node_mut(&mut self, node: NodeHandle) -> BackendResult<&mut Node> {
        self.nodes.get_mut(key_from_raw(node.0)).ok_or(RenderError::InvalidHandle {
            kind: "node",
            raw: node.0,
        })
    }

    fn mesh(&self, mesh: NodeHandle) -> BackendResult<&MeshData> {
        match &self.node(mesh)?.data {
            NodeData::Mesh(data) => Ok(data),
            _ => Err(RenderError::WrongNodeKind {
                raw: mesh.0,
                expected: "mesh",
            }),
        }
    }

    fn mesh_mut(&mut self, mesh: NodeHandle) -> BackendResult<&mut MeshData> {
        match &mut self.node_mut(mesh)?.data {
            NodeData::Mesh(data) => Ok(data),
            _ => Err(RenderError::WrongNodeKind {
                raw: mesh.0,
                expected: "mesh",
            }),
        }
    }

    fn light(&self, light: NodeHandle) -> BackendResult<&LightData> {
        match &self.node(light)?.data {
            NodeData::Light(data) => Ok(data),
            _ => Err(RenderError::WrongNodeKind {
                raw: light.0,
                expected: "light",
            }),
        }
    }

    fn light_mut(&mut self, light: NodeHandle) -> BackendResult<&mut LightData> {
        match &mut self.node_mut(light)?.data {
            NodeData::Light(data) => Ok(data),
            _ => Err(RenderError::WrongNodeKind {
                raw: light.0,
                expected: "light",
            }),
        }
    }

    fn material(&self, material: MaterialHandle) -> BackendResult<&Material> {
        self.materials.get(key_from_raw(material.0)).ok_or(RenderError::InvalidHandle {
            kind: "material",
            raw: material.0,
        })
    }

    fn material_mut(&mut self, material: MaterialHandle) -> BackendResult<&mut Material> {
        self.materials.get_mut(key_from_raw(material.0)).ok_or(RenderError::InvalidHandle {
            kind: "material",
            raw: material.0,
        })
    }

    fn target(&self, target: RenderTargetHandle) -> BackendResult<&TargetStorage> {
        self.targets.get(key_from_raw(target.0)).ok_or(RenderError::InvalidHandle {
            kind: "render target",
            raw: target.0,
        })
    }

    fn target_mut(&mut self, target: RenderTargetHandle) -> BackendResult<&mut TargetStorage> {
        self.targets.get_mut(key_from_raw(target.0)).ok_or(RenderError::InvalidHandle {
            kind: "render target",
            raw: target.0,
        })
    }

    fn camera_exists(&self, camera: CameraHandle) -> bool {
        self.cameras.contains_key(key_from_raw(camera.0))
    }
}
