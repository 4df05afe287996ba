//! Lightmap system errors

use crate::config::ConfigError;
use crate::render::api::NodeHandle;
use crate::render::shader::ShaderError;
use crate::render::RenderError;

/// Result type for lightmap operations
pub type LightmapResult<T> = Result<T, LightmapError>;

/// Errors that can occur while setting up or running accumulation
#[derive(Debug, thiserror::Error)]
pub enum LightmapError {
    /// The configuration was rejected at construction
    ///
    /// Fatal: the caller has to fix the configuration.
    #[error("Invalid lightmap configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),

    /// A mesh registered for accumulation has no UV coordinates
    ///
    /// Reported per mesh; the mesh is left out and accumulation continues.
    #[error("Mesh {0:?} has no UV coordinates and cannot receive a lightmap")]
    MissingUv(NodeHandle),

    /// A node registered as a receiver is not a mesh
    #[error("Node {0:?} is not a mesh")]
    NotAMesh(NodeHandle),

    /// A lightmap program could not be derived from the host's base program
    #[error("Shader variant error: {0}")]
    Shader(#[from] ShaderError),

    /// The host failed; any running cycle was restored before this surfaced
    #[error("Host error: {0}")]
    Render(#[from] RenderError),
}
