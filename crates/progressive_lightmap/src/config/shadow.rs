//! # Shadow Accumulation Configuration
//!
//! Everything the progressive lightmap needs at construction time: target
//! resolution, ensemble size and sampling distribution, blend windows and the
//! shadow-catcher appearance. Serializable so applications can ship presets as
//! TOML or RON files.

use serde::{Deserialize, Serialize};

use super::{Config, ConfigError};
use crate::render::api::PixelFormat;
use crate::render::systems::lightmap::SamplingMode;

/// # Shadow Configuration
///
/// Defaults follow a typical contact-shadow setup: a 1024² lightmap, eight
/// lights, forty frames blended over a window of twenty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Side length in pixels of each square accumulation target
    pub resolution: u32,
    /// Per-light shadow map resolution
    pub shadow_map_res: u32,
    /// Number of directional lights in the ensemble
    pub light_count: u32,
    /// Shadow-catcher footprint in world units (also bounds the shadow frustum)
    pub size: f32,
    /// Default number of frames per accumulation cycle
    pub frames: u32,
    /// Opacity ramp length and temporal averaging window, in frames
    pub blend_window: f32,
    /// Spread of the directional jitter around the light anchor
    pub light_radius: f32,
    /// Probability of drawing a light from the ambient hemisphere
    pub ambient_weight: f32,
    /// Discard threshold of the catcher material
    pub alpha_test: f32,
    /// Show shadow-camera helpers for the ensemble lights
    pub show_helpers: bool,

    /// Accumulate one frame per host frame instead of whole cycles
    pub temporal: bool,
    /// Upper bound on temporally accumulated frames (`None` = only `frames`)
    pub limit: Option<u32>,
    /// Target opacity of the catcher material
    pub opacity: f32,
    /// Shadow tint of the catcher material
    pub color: [f32; 3],
    /// Multiplier applied to the tint
    pub color_blend: f32,
    /// Anchor position of the directional-jitter branch
    pub light_position: [f32; 3],
    /// Summed intensity of the whole ensemble
    pub light_intensity: f32,
    /// Sampling distribution of the ensemble
    pub sampling: SamplingMode,
    /// Shadow map depth bias
    pub shadow_bias: f32,
    /// Shadow camera near plane
    pub shadow_near: f32,
    /// Shadow camera far plane
    pub shadow_far: f32,
    /// Run the 8-tap seam blur before each accumulation draw
    pub blur_edges: bool,
    /// Render receivers inside a private scene root
    pub isolate: bool,
    /// Preferred pixel format of the accumulation targets
    pub pixel_format: PixelFormat,
    /// Seed for light sampling; entropy when unset
    pub seed: Option<u64>,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            resolution: 1024,
            shadow_map_res: 512,
            light_count: 8,
            size: 10.0,
            frames: 40,
            blend_window: 20.0,
            light_radius: 1.0,
            ambient_weight: 0.5,
            alpha_test: 0.75,
            show_helpers: false,
            temporal: false,
            limit: None,
            opacity: 1.0,
            color: [0.0, 0.0, 0.0],
            color_blend: 2.0,
            light_position: [5.0, 5.0, -10.0],
            light_intensity: 1.0,
            sampling: SamplingMode::Mixed,
            shadow_bias: 0.001,
            shadow_near: 0.5,
            shadow_far: 500.0,
            blur_edges: true,
            isolate: false,
            pixel_format: PixelFormat::Rgba32Float,
            seed: None,
        }
    }
}

impl Config for ShadowConfig {}

impl ShadowConfig {
    /// Create a configuration with the given target resolution
    pub fn new(resolution: u32) -> Self {
        Self {
            resolution,
            ..Default::default()
        }
    }

    /// Set the accumulation target resolution
    pub fn with_resolution(mut self, resolution: u32) -> Self {
        self.resolution = resolution;
        self
    }

    /// Set the ensemble size
    pub fn with_light_count(mut self, count: u32) -> Self {
        self.light_count = count;
        self
    }

    /// Set the default frames per cycle
    pub fn with_frames(mut self, frames: u32) -> Self {
        self.frames = frames;
        self
    }

    /// Set the blend window
    pub fn with_blend_window(mut self, window: f32) -> Self {
        self.blend_window = window;
        self
    }

    /// Set the ambient sampling probability
    pub fn with_ambient_weight(mut self, weight: f32) -> Self {
        self.ambient_weight = weight;
        self
    }

    /// Set the directional jitter spread
    pub fn with_light_radius(mut self, radius: f32) -> Self {
        self.light_radius = radius;
        self
    }

    /// Set the directional anchor
    pub fn with_light_position(mut self, position: [f32; 3]) -> Self {
        self.light_position = position;
        self
    }

    /// Enable or disable temporal accumulation
    pub fn with_temporal(mut self, temporal: bool) -> Self {
        self.temporal = temporal;
        self
    }

    /// Cap temporally accumulated frames
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Enable or disable the seam blur pass
    pub fn with_blur_edges(mut self, blur: bool) -> Self {
        self.blur_edges = blur;
        self
    }

    /// Render receivers in a private scene root
    pub fn with_isolation(mut self, isolate: bool) -> Self {
        self.isolate = isolate;
        self
    }

    /// Set the sampling distribution
    pub fn with_sampling(mut self, sampling: SamplingMode) -> Self {
        self.sampling = sampling;
        self
    }

    /// Fix the sampling seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Frames to accumulate temporally before `frame()` goes quiet
    pub fn temporal_budget(&self) -> u32 {
        self.limit.map_or(self.frames, |limit| limit.min(self.frames))
    }

    /// Texel size of the accumulation targets in UV units
    pub fn pixel_offset(&self) -> f32 {
        1.0 / self.resolution.max(1) as f32
    }

    /// Margin around each packed chart in lightmap units, three texels
    pub fn chart_padding(&self) -> f32 {
        3.0 / self.resolution.max(1) as f32
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolution == 0 {
            return Err(invalid("resolution", "must be at least 1 pixel"));
        }
        if self.light_count == 0 {
            return Err(invalid("light_count", "the ensemble needs at least one light"));
        }
        if self.shadow_map_res == 0 {
            return Err(invalid("shadow_map_res", "must be at least 1 pixel"));
        }
        if self.frames == 0 {
            return Err(invalid("frames", "must be at least 1"));
        }
        if !(self.blend_window >= 1.0) {
            return Err(invalid("blend_window", format!("must be >= 1, got {}", self.blend_window)));
        }
        if !(0.0..=1.0).contains(&self.ambient_weight) {
            return Err(invalid("ambient_weight", format!("must lie in [0, 1], got {}", self.ambient_weight)));
        }
        if !(self.light_radius >= 0.0) {
            return Err(invalid("light_radius", "must be non-negative"));
        }
        if !(self.alpha_test > 0.0) {
            return Err(invalid("alpha_test", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(invalid("opacity", "must lie in [0, 1]"));
        }
        if !(self.size > 0.0) {
            return Err(invalid("size", "must be positive"));
        }
        if !(self.shadow_near > 0.0 && self.shadow_far > self.shadow_near) {
            return Err(invalid("shadow_far", "shadow camera needs 0 < near < far"));
        }
        if self.limit == Some(0) {
            return Err(invalid("limit", "must be at least 1 when set"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ShadowConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_resolution_and_lights() {
        let err = ShadowConfig::new(0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "resolution", .. }));

        let err = ShadowConfig::default().with_light_count(0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "light_count", .. }));
    }

    #[test]
    fn test_rejects_out_of_range_weights() {
        assert!(ShadowConfig::default().with_ambient_weight(1.5).validate().is_err());
        assert!(ShadowConfig::default().with_blend_window(0.5).validate().is_err());
        assert!(ShadowConfig::default().with_blend_window(f32::NAN).validate().is_err());
    }

    #[test]
    fn test_temporal_budget_respects_limit() {
        let config = ShadowConfig::default().with_frames(40);
        assert_eq!(config.temporal_budget(), 40);
        assert_eq!(config.clone().with_limit(12).temporal_budget(), 12);
        assert_eq!(config.with_limit(400).temporal_budget(), 40);
    }

    #[test]
    fn test_toml_round_trip_keeps_values() {
        let config = ShadowConfig::new(256).with_light_count(4).with_seed(9);
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed = ShadowConfig::from_str_with_format(&text, "shadows.toml").unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_ron_uses_defaults() {
        let parsed = ShadowConfig::from_str_with_format("(resolution: 128, frames: 10)", "preset.ron").unwrap();
        assert_eq!(parsed.resolution, 128);
        assert_eq!(parsed.frames, 10);
        assert_eq!(parsed.light_count, ShadowConfig::default().light_count);
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let err = ShadowConfig::from_str_with_format("", "shadows.json").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }
}
