//! Render targets, materials and the texel-space rasterizer

use std::ops::Range;

use super::{HeadlessHost, Material, NodeData, TargetStorage};
use crate::foundation::collections::{key_from_raw, key_to_raw};
use crate::foundation::math::{Vec2, Vec3};
use crate::render::api::{
    BackendResult, BuiltinProgram, CameraHandle, ClearColor, MaterialHandle, NodeFlags, NodeHandle, PixelFormat, RenderHost,
    RenderTargetDescriptor, RenderTargetHandle, SceneNode, TextureHandle,
};
use crate::render::shader::{uniforms, FragmentOutput, ShaderProgram, UniformValue, VertexOutput};
use crate::render::systems::lightmap::blend::blend_rgb;
use crate::render::systems::lightmap::edge_blur::box_blur_8;
use crate::render::RenderError;

/// A light taking part in a scene draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LitLight {
    /// Light node
    pub handle: NodeHandle,
    /// Position at draw time
    pub position: Vec3,
    /// Intensity at draw time
    pub intensity: f32,
}

/// Input of the irradiance model for one texel
#[derive(Debug)]
pub struct IrradianceQuery<'a> {
    /// Mesh being rasterized
    pub mesh: NodeHandle,
    /// Lightmap UV of the texel centre
    pub uv: Vec2,
    /// Visible lights of the draw
    pub lights: &'a [LitLight],
}

/// What a recorded draw was
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawKind {
    /// `render(root, camera)`
    Scene {
        /// Root drawn
        root: NodeHandle,
    },
    /// `draw_fullscreen(material)`
    Fullscreen {
        /// Material drawn
        material: MaterialHandle,
    },
}

/// One draw as seen by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawRecord {
    /// Target bound during the draw
    pub target: Option<RenderTargetHandle>,
    /// Draw kind
    pub kind: DrawKind,
    /// Render targets whose textures were sampled
    pub sampled: Vec<RenderTargetHandle>,
}

const LAMBERT_VERTEX: &str = "\
attribute vec3 position;
attribute vec3 normal;
attribute vec2 uv;
attribute vec2 uv1;
uniform mat4 modelViewMatrix;
uniform mat4 projectionMatrix;
varying vec3 vNormal;
void main() {
\tvNormal = normal;
\tgl_Position = projectionMatrix * modelViewMatrix * vec4(position, 1.0);
}
";

const LAMBERT_FRAGMENT: &str = "\
uniform vec3 diffuse;
varying vec3 vNormal;
void main() {
\tvec3 irradiance = directionalIrradiance(normalize(vNormal));
\tgl_FragColor = vec4(diffuse * irradiance, 1.0);
}
";

const BASIC_VERTEX: &str = "\
attribute vec3 position;
attribute vec2 uv;
uniform mat4 modelViewMatrix;
uniform mat4 projectionMatrix;
void main() {
\tgl_Position = projectionMatrix * modelViewMatrix * vec4(position, 1.0);
}
";

const BASIC_FRAGMENT: &str = "\
uniform vec3 diffuse;
void main() {
\tgl_FragColor = vec4(diffuse, 1.0);
}
";

fn quantize(format: PixelFormat, value: f32) -> f32 {
    match format {
        PixelFormat::Rgba32Float => value,
        // drop the 13 low mantissa bits a half float cannot hold
        PixelFormat::Rgba16Float => f32::from_bits(value.to_bits() & 0xFFFF_E000),
        PixelFormat::Rgba8Unorm => (value.clamp(0.0, 1.0) * 255.0).round() / 255.0,
    }
}

fn store(format: PixelFormat, texel: [f32; 4]) -> [f32; 4] {
    texel.map(|v| quantize(format, v))
}

/// Texels whose centres fall in `[lo, hi)`, in UV units along one axis
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn texel_span(lo: f32, hi: f32, size: u32) -> Range<u32> {
    let extent = size as f32;
    let edge = |v: f32| (v * extent - 0.5).ceil().clamp(0.0, extent) as u32;
    edge(lo)..edge(hi)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn texel_index(v: f32, size: u32) -> usize {
    let extent = size as f32;
    (v * extent).floor().clamp(0.0, extent - 1.0) as usize
}

/// Nearest-neighbour lookup with clamp-to-edge addressing
pub(super) fn sample_nearest(texels: &[[f32; 4]], width: u32, height: u32, uv: Vec2) -> [f32; 4] {
    if width == 0 || height == 0 {
        return [0.0; 4];
    }
    let x = texel_index(uv.x, width);
    let y = texel_index(uv.y, height);
    texels.get(y * width as usize + x).copied().unwrap_or_default()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn blur_tap(pixel_offset: f32, size: u32) -> u32 {
    (pixel_offset * size as f32).round().max(1.0) as u32
}

/// Snapshot of a sampled target, taken before the bound target is written
struct Snapshot {
    target: RenderTargetHandle,
    width: u32,
    height: u32,
    texels: Vec<[f32; 4]>,
}

struct MeshDraw {
    mesh: NodeHandle,
    columns: Range<u32>,
    rows: Range<u32>,
    diffuse: [f32; 3],
    blend: Option<(Snapshot, f32)>,
}

impl HeadlessHost {
    fn snapshot(&self, texture: Option<TextureHandle>, bound: RenderTargetHandle) -> BackendResult<Option<Snapshot>> {
        let Some(texture) = texture else {
            return Ok(None);
        };
        let target = self.texture_target(texture).ok_or(RenderError::InvalidHandle {
            kind: "texture",
            raw: texture.0,
        })?;
        if target == bound {
            return Err(RenderError::RenderingFailed(format!(
                "render target {:#x} is both sampled and written",
                target.0
            )));
        }
        let storage = self.target(target)?;
        Ok(Some(Snapshot {
            target,
            width: storage.width,
            height: storage.height,
            texels: storage.texels.clone(),
        }))
    }

    fn plan_mesh(&self, mesh: NodeHandle, bound: RenderTargetHandle) -> BackendResult<Option<MeshDraw>> {
        let NodeData::Mesh(data) = &self.node(mesh)?.data else {
            return Ok(None);
        };
        if !data.flags.contains(NodeFlags::VISIBLE) {
            return Ok(None);
        }
        let program = &self.material(data.material)?.program;
        if !matches!(program.vertex_output, Some(VertexOutput::UvUnwrap { .. })) {
            return Ok(None);
        }
        if program.fragment_output == Some(FragmentOutput::Discard) {
            return Ok(None);
        }
        let Some(bounds) = data.uv_bounds else {
            return Ok(None);
        };

        let storage = self.target(bound)?;
        let lo = data.lightmap_uv.apply(bounds.min);
        let hi = data.lightmap_uv.apply(bounds.max);

        let diffuse = match program.uniforms.get("diffuse") {
            Some(UniformValue::Vec3(c)) => [c.x, c.y, c.z],
            _ => [1.0; 3],
        };
        let blend = if program.fragment_output == Some(FragmentOutput::TemporalBlend) {
            let window = program.uniforms.float(uniforms::AVERAGING_WINDOW).unwrap_or(1.0);
            self.snapshot(program.uniforms.texture(uniforms::PREVIOUS_BUFFER), bound)?
                .map(|snapshot| (snapshot, window))
        } else {
            None
        };

        Ok(Some(MeshDraw {
            mesh,
            columns: texel_span(lo.x, hi.x, storage.width),
            rows: texel_span(lo.y, hi.y, storage.height),
            diffuse,
            blend,
        }))
    }

    fn rasterize(&mut self, bound: RenderTargetHandle, draws: &[MeshDraw], lights: &[LitLight]) -> BackendResult<()> {
        let irradiance = &self.irradiance;
        let storage = self
            .targets
            .get_mut(key_from_raw(bound.0))
            .ok_or(RenderError::InvalidHandle {
                kind: "render target",
                raw: bound.0,
            })?;
        let (width, height, format) = (storage.width, storage.height, storage.format);

        for draw in draws {
            for y in draw.rows.clone() {
                for x in draw.columns.clone() {
                    let uv = Vec2::new((x as f32 + 0.5) / width as f32, (y as f32 + 0.5) / height as f32);
                    let light = irradiance(&IrradianceQuery {
                        mesh: draw.mesh,
                        uv,
                        lights,
                    });
                    let current = draw.diffuse.map(|c| c * light);

                    let rgb = match &draw.blend {
                        Some((previous, window)) => {
                            let old = sample_nearest(&previous.texels, previous.width, previous.height, uv);
                            blend_rgb([old[0], old[1], old[2]], current, *window)
                        }
                        None => current,
                    };
                    let index = y as usize * width as usize + x as usize;
                    storage.texels[index] = store(format, [rgb[0], rgb[1], rgb[2], 1.0]);
                }
            }
        }
        Ok(())
    }
}

impl RenderHost for HeadlessHost {
    fn supports_format(&self, format: PixelFormat) -> bool {
        self.supported_formats.contains(&format)
    }

    fn create_render_target(&mut self, desc: &RenderTargetDescriptor) -> BackendResult<RenderTargetHandle> {
        if !self.supports_format(desc.format) {
            return Err(RenderError::ResourceCreationFailed(format!(
                "{:?} render targets are not supported",
                desc.format
            )));
        }
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::ResourceCreationFailed(
                "render target dimensions must be non-zero".to_string(),
            ));
        }

        let texel_count = desc.width as usize * desc.height as usize;
        let key = self.targets.insert(TargetStorage {
            width: desc.width,
            height: desc.height,
            format: desc.format,
            texels: vec![[0.0; 4]; texel_count],
            texture: TextureHandle(0),
        });
        let target = RenderTargetHandle(key_to_raw(key));
        let texture = TextureHandle(key_to_raw(self.textures.insert(target)));
        self.target_mut(target)?.texture = texture;

        log::trace!("Created {}x{} {:?} target {target:?}", desc.width, desc.height, desc.format);
        Ok(target)
    }

    fn dispose_render_target(&mut self, target: RenderTargetHandle) -> BackendResult<()> {
        let storage = self.targets.remove(key_from_raw(target.0)).ok_or(RenderError::InvalidHandle {
            kind: "render target",
            raw: target.0,
        })?;
        self.textures.remove(key_from_raw(storage.texture.0));
        if self.bound_target == Some(target) {
            self.bound_target = None;
        }
        Ok(())
    }

    fn render_target_texture(&self, target: RenderTargetHandle) -> BackendResult<TextureHandle> {
        Ok(self.target(target)?.texture)
    }

    fn render_target(&self) -> Option<RenderTargetHandle> {
        self.bound_target
    }

    fn set_render_target(&mut self, target: Option<RenderTargetHandle>) -> BackendResult<()> {
        if let Some(target) = target {
            self.target(target)?;
        }
        self.bound_target = target;
        Ok(())
    }

    fn clear_color(&self) -> ClearColor {
        self.clear_color
    }

    fn set_clear_color(&mut self, color: ClearColor) {
        self.clear_color = color;
    }

    fn clear(&mut self) -> BackendResult<()> {
        let Some(bound) = self.bound_target else {
            return Ok(());
        };
        let ClearColor { rgb, alpha } = self.clear_color;
        let storage = self.target_mut(bound)?;
        let value = store(storage.format, [rgb[0], rgb[1], rgb[2], alpha]);
        storage.texels.fill(value);
        Ok(())
    }

    fn render(&mut self, root: NodeHandle, camera: CameraHandle) -> BackendResult<()> {
        self.render_calls += 1;
        match self.render_fault {
            Some(0) => {
                self.render_fault = None;
                return Err(RenderError::RenderingFailed("injected render failure".to_string()));
            }
            Some(remaining) => self.render_fault = Some(remaining - 1),
            None => {}
        }
        if !self.camera_exists(camera) {
            return Err(RenderError::InvalidHandle {
                kind: "camera",
                raw: camera.0,
            });
        }

        let visible = self.visible_nodes(root)?;
        let Some(bound) = self.bound_target else {
            // the default framebuffer keeps no texels
            self.draw_log.push(DrawRecord {
                target: None,
                kind: DrawKind::Scene { root },
                sampled: Vec::new(),
            });
            return Ok(());
        };

        let mut lights = Vec::new();
        let mut draws = Vec::new();
        for node in visible {
            match node {
                SceneNode::Light(handle) => {
                    let light = self.light(handle)?;
                    lights.push(LitLight {
                        handle,
                        position: light.position,
                        intensity: light.intensity,
                    });
                }
                SceneNode::Mesh(mesh) => {
                    if let Some(draw) = self.plan_mesh(mesh, bound)? {
                        draws.push(draw);
                    }
                }
                SceneNode::Group(_) => {}
            }
        }

        self.rasterize(bound, &draws, &lights)?;

        let mut sampled: Vec<RenderTargetHandle> = draws
            .iter()
            .filter_map(|d| d.blend.as_ref().map(|(snapshot, _)| snapshot.target))
            .collect();
        sampled.dedup();
        self.draw_log.push(DrawRecord {
            target: Some(bound),
            kind: DrawKind::Scene { root },
            sampled,
        });
        Ok(())
    }

    fn draw_fullscreen(&mut self, material: MaterialHandle) -> BackendResult<()> {
        let bound = self
            .bound_target
            .ok_or_else(|| RenderError::RenderingFailed("full-screen draw without a render target".to_string()))?;
        let program = &self.material(material)?.program;

        let sampled = match program.fragment_output {
            Some(FragmentOutput::Discard) => Vec::new(),
            Some(FragmentOutput::EdgeBlur) => {
                let pixel_offset = program.uniforms.float(uniforms::PIXEL_OFFSET).unwrap_or(0.0);
                let source = self
                    .snapshot(program.uniforms.texture(uniforms::PREVIOUS_BUFFER), bound)?
                    .ok_or_else(|| RenderError::RenderingFailed("edge blur without a source texture".to_string()))?;

                let storage = self.target_mut(bound)?;
                if source.width != storage.width || source.height != storage.height || storage.width != storage.height {
                    return Err(RenderError::RenderingFailed(
                        "edge blur needs equally sized square targets".to_string(),
                    ));
                }
                let format = storage.format;
                let blurred = box_blur_8(&source.texels, storage.width, blur_tap(pixel_offset, storage.width));
                for (dst, src) in storage.texels.iter_mut().zip(blurred) {
                    *dst = store(format, src);
                }
                vec![source.target]
            }
            _ => {
                return Err(RenderError::RenderingFailed(format!(
                    "`{}` cannot be drawn full-screen",
                    program.label
                )))
            }
        };

        self.draw_log.push(DrawRecord {
            target: Some(bound),
            kind: DrawKind::Fullscreen { material },
            sampled,
        });
        Ok(())
    }

    fn builtin_program(&self, program: BuiltinProgram) -> ShaderProgram {
        let mut built = match program {
            BuiltinProgram::Lambert => ShaderProgram::new("lambert", LAMBERT_VERTEX, LAMBERT_FRAGMENT),
            BuiltinProgram::Basic => ShaderProgram::new("basic", BASIC_VERTEX, BASIC_FRAGMENT),
        };
        built.uniforms.set("diffuse", UniformValue::Vec3(Vec3::new(1.0, 1.0, 1.0)));
        built
    }

    fn create_material(&mut self, program: ShaderProgram) -> BackendResult<MaterialHandle> {
        let compiled = program
            .patched_vertex_source()
            .and_then(|_| program.patched_fragment_source());
        if let Err(e) = compiled {
            return Err(RenderError::ShaderCompilationFailed {
                label: program.label.clone(),
                reason: e.to_string(),
            });
        }

        let material = MaterialHandle(key_to_raw(self.materials.insert(Material { program })));
        Ok(material)
    }

    fn set_uniform(&mut self, material: MaterialHandle, name: &str, value: UniformValue) -> BackendResult<()> {
        self.material_mut(material)?.program.uniforms.set(name, value);
        Ok(())
    }

    fn dispose_material(&mut self, material: MaterialHandle) -> BackendResult<()> {
        self.materials
            .remove(key_from_raw(material.0))
            .map(|_| ())
            .ok_or(RenderError::InvalidHandle {
                kind: "material",
                raw: material.0,
            })
    }
}
