//! Progressive lightmap system
//!
//! Soft shadows accumulated over many frames into a ping-pong pair of float
//! render targets, lit by a randomized ensemble of directional lights.

pub mod accumulator;
pub mod blend;
pub mod cancellation;
pub mod catcher;
pub mod edge_blur;
pub mod error;
pub mod light_ensemble;
pub mod material_swap;
pub mod packing;
pub mod targets;

#[cfg(test)]
mod tests;

// Re-export the accumulator surface
pub use accumulator::{CycleStatus, Phase, ProgressiveLightmap, Registration};
pub use cancellation::CancellationToken;
pub use catcher::{OpacityRamp, SoftShadowParams};
pub use error::{LightmapError, LightmapResult};
pub use light_ensemble::{SampleBranch, SamplingMode};
pub use material_swap::{Participant, ParticipantRole};
pub use packing::{pack_charts, AtlasLayout, UvChart};
