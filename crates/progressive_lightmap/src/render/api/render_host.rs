//! Renderer capability trait
//!
//! The subset of a rasterizing renderer the lightmap accumulator drives:
//! offscreen targets, clear state, materials built from `ShaderProgram`
//! descriptors, scene draws and full-screen passes.

use serde::{Deserialize, Serialize};

use super::handles::{CameraHandle, MaterialHandle, NodeHandle, RenderTargetHandle, TextureHandle};
use crate::render::shader::{ShaderProgram, UniformValue};
use crate::render::RenderError;

/// Result type for host operations
pub type BackendResult<T> = Result<T, RenderError>;

/// Channel storage of a render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 32-bit float per channel
    Rgba32Float,
    /// 16-bit float per channel, the reduced-precision fallback
    Rgba16Float,
    /// 8-bit normalized per channel; clamps and bands, never used for accumulation
    Rgba8Unorm,
}

impl PixelFormat {
    /// Whether channels can hold values outside [0, 1]
    pub fn is_float(self) -> bool {
        matches!(self, Self::Rgba32Float | Self::Rgba16Float)
    }
}

/// Description of an offscreen render target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTargetDescriptor {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Channel storage
    pub format: PixelFormat,
}

/// RGBA clear colour
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearColor {
    /// Red, green, blue
    pub rgb: [f32; 3],
    /// Alpha
    pub alpha: f32,
}

impl ClearColor {
    /// Fully transparent black
    pub const TRANSPARENT: Self = Self { rgb: [0.0; 3], alpha: 0.0 };

    /// Create a clear colour
    pub fn new(rgb: [f32; 3], alpha: f32) -> Self {
        Self { rgb, alpha }
    }
}

impl Default for ClearColor {
    fn default() -> Self {
        Self::TRANSPARENT
    }
}

/// Stock shading programs a host generates for its own materials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinProgram {
    /// Diffuse-only lit program with shadow reception (the accumulation base)
    Lambert,
    /// Unlit program (the base for full-screen and discard variants)
    Basic,
}

/// Main renderer capability trait
pub trait RenderHost {
    /// Whether render targets of this format can be created
    fn supports_format(&self, format: PixelFormat) -> bool;

    /// Create an offscreen render target
    fn create_render_target(&mut self, desc: &RenderTargetDescriptor) -> BackendResult<RenderTargetHandle>;

    /// Release a render target and its texture
    fn dispose_render_target(&mut self, target: RenderTargetHandle) -> BackendResult<()>;

    /// Texture view of a render target, usable as a shader input
    fn render_target_texture(&self, target: RenderTargetHandle) -> BackendResult<TextureHandle>;

    /// Currently bound render target (`None` = the default framebuffer)
    fn render_target(&self) -> Option<RenderTargetHandle>;

    /// Bind a render target for subsequent clears and draws
    fn set_render_target(&mut self, target: Option<RenderTargetHandle>) -> BackendResult<()>;

    /// Current clear colour
    fn clear_color(&self) -> ClearColor;

    /// Change the clear colour
    fn set_clear_color(&mut self, color: ClearColor);

    /// Clear the bound target with the clear colour
    fn clear(&mut self) -> BackendResult<()>;

    /// Draw every visible node below `root` into the bound target
    ///
    /// Hosts must not clear implicitly; the accumulator decides what the target
    /// holds before the draw.
    fn render(&mut self, root: NodeHandle, camera: CameraHandle) -> BackendResult<()>;

    /// Draw a full-screen triangle with the given material into the bound target
    fn draw_fullscreen(&mut self, material: MaterialHandle) -> BackendResult<()>;

    /// Generated source of one of the host's stock programs
    fn builtin_program(&self, program: BuiltinProgram) -> ShaderProgram;

    /// Compile a program into a material
    fn create_material(&mut self, program: ShaderProgram) -> BackendResult<MaterialHandle>;

    /// Update a named uniform of a material
    fn set_uniform(&mut self, material: MaterialHandle, name: &str, value: UniformValue) -> BackendResult<()>;

    /// Release a material
    fn dispose_material(&mut self, material: MaterialHandle) -> BackendResult<()>;
}
