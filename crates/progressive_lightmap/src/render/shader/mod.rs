//! Shader program descriptors
//!
//! A `ShaderProgram` is a host-generated base program plus two optional named
//! extension points (vertex output override, fragment output override) and an
//! explicit uniform table. Hosts compile the patched sources; the lightmap
//! system only derives variants.

mod program;
mod lightmap_variants;

pub use program::{FragmentOutput, ShaderError, ShaderProgram, UniformTable, UniformValue, VertexOutput};
pub use lightmap_variants::{soft_shadow_program, uniforms, LightmapProgramBuilder};
