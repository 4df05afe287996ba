//! Lightmap program variants
//!
//! Derives the accumulation, edge-blur and discard programs from a host's base
//! program, and provides the shadow-catcher display program.

use super::program::{FragmentOutput, ShaderError, ShaderProgram, UniformValue, VertexOutput};
use crate::foundation::math::Vec3;

/// Names of the uniform slots the lightmap variants add
pub mod uniforms {
    /// Texture holding the previous blend result
    pub const PREVIOUS_BUFFER: &str = "previousBuffer";
    /// Effective number of frames of the running average
    pub const AVERAGING_WINDOW: &str = "averagingWindow";
    /// Blur tap distance in UV units
    pub const PIXEL_OFFSET: &str = "pixelOffset";
    /// Accumulated lightmap sampled by the catcher
    pub const MAP: &str = "map";
    /// Catcher shadow tint
    pub const COLOR: &str = "color";
    /// Catcher tint multiplier
    pub const COLOR_BLEND: &str = "colorBlend";
    /// Catcher opacity
    pub const OPACITY: &str = "opacity";
    /// Catcher discard threshold
    pub const ALPHA_TEST: &str = "alphaTest";
}

/// UV attribute the accumulation pass unwraps along
pub const LIGHTMAP_UV_ATTRIBUTE: &str = "uv1";

/// UV attribute full-screen passes unwrap along
pub const SCREEN_UV_ATTRIBUTE: &str = "uv";

/// Builds the lightmap variants of a base program
///
/// Every builder starts from the base program's own sources and replaces the
/// extension points instead of stacking them, so re-deriving a variant from
/// its own output is a no-op.
pub struct LightmapProgramBuilder;

impl LightmapProgramBuilder {
    /// UV-unwrapped program blending with the previous buffer
    ///
    /// `previousBuffer` starts unbound; the accumulator binds it every step.
    pub fn accumulation(base: &ShaderProgram, averaging_window: f32) -> Result<ShaderProgram, ShaderError> {
        let mut program = derive(base, "lightmap-accumulation");
        program.vertex_output = Some(VertexOutput::UvUnwrap {
            attribute: LIGHTMAP_UV_ATTRIBUTE.to_string(),
        });
        program.fragment_output = Some(FragmentOutput::TemporalBlend);
        program.uniforms.set(uniforms::PREVIOUS_BUFFER, UniformValue::Texture(None));
        program
            .uniforms
            .set(uniforms::AVERAGING_WINDOW, UniformValue::Float(averaging_window));
        validate(program)
    }

    /// Full-screen 8-tap box filter over the previous buffer
    pub fn edge_blur(base: &ShaderProgram, pixel_offset: f32) -> Result<ShaderProgram, ShaderError> {
        let mut program = derive(base, "lightmap-edge-blur");
        program.vertex_output = Some(VertexOutput::UvUnwrap {
            attribute: SCREEN_UV_ATTRIBUTE.to_string(),
        });
        program.fragment_output = Some(FragmentOutput::EdgeBlur);
        program.uniforms.set(uniforms::PREVIOUS_BUFFER, UniformValue::Texture(None));
        program.uniforms.set(uniforms::PIXEL_OFFSET, UniformValue::Float(pixel_offset));
        validate(program)
    }

    /// Program that discards every fragment
    ///
    /// Meshes keep casting shadows (shadow maps use their own depth program)
    /// but leave no colour in the lightmap.
    pub fn discard(base: &ShaderProgram) -> Result<ShaderProgram, ShaderError> {
        let mut program = derive(base, "lightmap-discard");
        program.vertex_output = None;
        program.fragment_output = Some(FragmentOutput::Discard);
        validate(program)
    }
}

fn derive(base: &ShaderProgram, label: &str) -> ShaderProgram {
    let mut program = base.clone();
    program.label = label.to_string();
    program
}

fn validate(program: ShaderProgram) -> Result<ShaderProgram, ShaderError> {
    program.patched_vertex_source()?;
    program.patched_fragment_source()?;
    Ok(program)
}

const SOFT_SHADOW_VERTEX: &str = "\
varying vec2 vUv;
void main() {
\tgl_Position = projectionMatrix * viewMatrix * modelMatrix * vec4(position, 1.0);
\tvUv = uv;
}
";

const SOFT_SHADOW_FRAGMENT: &str = "\
varying vec2 vUv;
uniform sampler2D map;
uniform vec3 color;
uniform float colorBlend;
uniform float opacity;
uniform float alphaTest;
void main() {
\tvec4 sampledDiffuseColor = texture2D(map, vUv);
\tgl_FragColor = vec4(color * sampledDiffuseColor.r * colorBlend,
\t\tmax(0.0, (1.0 - (sampledDiffuseColor.r + sampledDiffuseColor.g + sampledDiffuseColor.b) / alphaTest)) * opacity);
}
";

/// Display program of the shadow catcher
///
/// Opacity and alpha test start at zero; the accumulator ramps them in.
pub fn soft_shadow_program(color: [f32; 3], color_blend: f32) -> ShaderProgram {
    let mut program = ShaderProgram::new("soft-shadow-catcher", SOFT_SHADOW_VERTEX, SOFT_SHADOW_FRAGMENT);
    program.uniforms.set(uniforms::MAP, UniformValue::Texture(None));
    program
        .uniforms
        .set(uniforms::COLOR, UniformValue::Vec3(Vec3::new(color[0], color[1], color[2])));
    program.uniforms.set(uniforms::COLOR_BLEND, UniformValue::Float(color_blend));
    program.uniforms.set(uniforms::OPACITY, UniformValue::Float(0.0));
    program.uniforms.set(uniforms::ALPHA_TEST, UniformValue::Float(0.0));
    program
}
