//! Rendering integration
//!
//! - `api`: the capability traits a host engine implements
//! - `backends`: concrete hosts (currently the headless software backend)
//! - `shader`: shader program descriptors and the lightmap variant builder
//! - `systems`: the lightmap accumulation system itself

pub mod api;
pub mod backends;
pub mod shader;
pub mod systems;

/// Errors reported by a rendering host
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    /// A rendering operation failed during execution
    ///
    /// Covers device/context loss and failed draws. The current accumulation
    /// cycle is aborted and scene state restored before this is surfaced.
    #[error("Rendering failed: {0}")]
    RenderingFailed(String),

    /// Resource creation or management failed
    #[error("Resource creation failed: {0}")]
    ResourceCreationFailed(String),

    /// A shader program could not be compiled by the host
    #[error("Shader compilation failed for `{label}`: {reason}")]
    ShaderCompilationFailed {
        /// Label of the failing program
        label: String,
        /// Compiler diagnostic
        reason: String,
    },

    /// A handle does not refer to a live host object
    #[error("Invalid {kind} handle: {raw:#x}")]
    InvalidHandle {
        /// Kind of object the handle was expected to name
        kind: &'static str,
        /// Raw handle value
        raw: u64,
    },

    /// The node exists but is not of the kind the operation needs
    #[error("Node {raw:#x} is not a {expected}")]
    WrongNodeKind {
        /// Raw node handle
        raw: u64,
        /// Kind the operation required
        expected: &'static str,
    },

    /// Backend-specific error
    #[error("Backend error: {0}")]
    BackendError(String),
}
