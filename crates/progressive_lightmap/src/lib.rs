//! # Progressive Lightmap
//!
//! Soft shadow accumulation for rasterizing renderers. A swarm of low-intensity
//! directional lights is re-sampled every frame and the scene is rendered into a
//! UV-unwrapped lightmap which is blended with the previous frame's estimate, so
//! the result converges over many frames to a soft contact-shadow approximation.
//!
//! ## Features
//!
//! - **Ping-pong accumulation**: two floating-point render targets, exponential
//!   moving average controlled by an averaging window
//! - **Randomized light ensemble**: ambient hemisphere vs. directional jitter
//! - **Material swapping**: accumulation/discard materials with guaranteed restoration
//! - **Cooperative scheduling**: one step per `poll`, cancellable at every step
//! - **Host agnostic**: the engine is consumed through the `render::api` traits
//! - **Headless backend**: a CPU implementation of the host traits for tests and tools
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use progressive_lightmap::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut host = HeadlessHost::new();
//!     let root = host.create_group();
//!     let camera = host.create_camera();
//!     let ground = host.create_mesh(Some(MeshUvBounds::unit()));
//!     host.add_child(root, ground)?;
//!
//!     let mut lightmap = ProgressiveLightmap::new(host, ShadowConfig::default(), root, camera)?;
//!     lightmap.attach_catcher(ground)?;
//!     lightmap.clear()?;
//!     lightmap.recalculate(None)?;
//!     while lightmap.poll()?.is_pending() {
//!         // the host renders its own frame here
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod foundation;
pub mod config;
pub mod render;

/// Common imports for library users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, ShadowConfig},
        foundation::math::{Vec2, Vec3},
        render::{
            api::{
                BuiltinProgram, CameraHandle, ClearColor, LightmapHost, MaterialHandle, MeshUvBounds,
                NodeFlags, NodeHandle, NodeKind, PixelFormat, RenderHost, RenderTargetHandle, SceneHost,
                SceneNode, TextureHandle, UvTransform,
            },
            backends::headless::HeadlessHost,
            shader::{LightmapProgramBuilder, ShaderProgram, UniformValue},
            systems::lightmap::{
                CancellationToken, CycleStatus, LightmapError, LightmapResult, Phase, ProgressiveLightmap,
                SamplingMode,
            },
            RenderError,
        },
    };
}
