//! Host capability API
//!
//! The lightmap system never talks to a GPU directly. It drives a host engine
//! through the traits in this module: `RenderHost` for targets, materials and
//! draws, `SceneHost` for the scene graph.

pub mod handles;
pub mod render_host;
pub mod scene_host;

pub use handles::{CameraHandle, MaterialHandle, NodeHandle, RenderTargetHandle, TextureHandle};
pub use render_host::{BackendResult, BuiltinProgram, ClearColor, PixelFormat, RenderHost, RenderTargetDescriptor};
pub use scene_host::{
    DirectionalLightDescriptor, MeshUvBounds, NodeFlags, NodeKind, SceneHost, SceneNode, ShadowCameraParams,
    UvTransform,
};

/// Everything the progressive lightmap needs from a host engine
pub trait LightmapHost: RenderHost + SceneHost {}

impl<T: RenderHost + SceneHost> LightmapHost for T {}
