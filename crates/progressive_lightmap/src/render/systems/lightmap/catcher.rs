//! Shadow catcher
//!
//! A receiver displayed with the soft-shadow material: the accumulated
//! lightmap turned into a tinted, alpha-tested shadow overlay. Its opacity and
//! alpha threshold ramp in after a reset so a fresh, noisy estimate does not
//! pop.

use crate::render::api::{BackendResult, LightmapHost, MaterialHandle, NodeHandle, TextureHandle};
use crate::render::shader::{soft_shadow_program, uniforms, UniformValue};

use super::error::LightmapResult;

/// CPU reference of the soft-shadow display program
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftShadowParams {
    /// Shadow tint
    pub color: [f32; 3],
    /// Tint multiplier
    pub color_blend: f32,
    /// Overall opacity
    pub opacity: f32,
    /// Brightness above which the overlay fades out
    pub alpha_test: f32,
}

impl SoftShadowParams {
    /// Display colour for one lightmap texel
    pub fn shade(&self, texel: [f32; 4]) -> [f32; 4] {
        let [r, g, b, _] = texel;
        let tint = r * self.color_blend;
        let coverage = if self.alpha_test > 0.0 {
            (1.0 - (r + g + b) / self.alpha_test).max(0.0)
        } else {
            0.0
        };
        [
            self.color[0] * tint,
            self.color[1] * tint,
            self.color[2] * tint,
            coverage * self.opacity,
        ]
    }
}

/// Opacity and alpha-test ramp of the catcher
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpacityRamp {
    target_opacity: f32,
    target_alpha_test: f32,
    blend_window: f32,
    opacity: f32,
    alpha_test: f32,
}

impl OpacityRamp {
    /// Ramp starting at zero
    pub fn new(target_opacity: f32, target_alpha_test: f32, blend_window: f32) -> Self {
        Self {
            target_opacity,
            target_alpha_test,
            blend_window,
            opacity: 0.0,
            alpha_test: 0.0,
        }
    }

    /// Back to zero
    pub fn reset(&mut self) {
        self.opacity = 0.0;
        self.alpha_test = 0.0;
    }

    /// Advance one step
    ///
    /// Temporal accumulation rises by `target / blend_window` per step; a
    /// one-shot cycle jumps straight to the targets.
    pub fn advance(&mut self, temporal: bool) {
        if temporal {
            self.opacity = (self.opacity + self.target_opacity / self.blend_window).min(self.target_opacity);
            self.alpha_test = (self.alpha_test + self.target_alpha_test / self.blend_window).min(self.target_alpha_test);
        } else {
            self.opacity = self.target_opacity;
            self.alpha_test = self.target_alpha_test;
        }
    }

    /// Current opacity
    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Current alpha-test threshold
    pub fn alpha_test(&self) -> f32 {
        self.alpha_test
    }

    /// Whether both values reached their targets
    pub fn is_settled(&self) -> bool {
        self.opacity >= self.target_opacity && self.alpha_test >= self.target_alpha_test
    }
}

/// A mesh showing the accumulated shadows
#[derive(Debug)]
pub struct ShadowCatcher {
    mesh: NodeHandle,
    material: MaterialHandle,
    replaced: MaterialHandle,
    ramp: OpacityRamp,
    color: [f32; 3],
    color_blend: f32,
}

impl ShadowCatcher {
    /// Give `mesh` the soft-shadow material
    pub fn attach<H: LightmapHost + ?Sized>(
        host: &mut H,
        mesh: NodeHandle,
        color: [f32; 3],
        color_blend: f32,
        ramp: OpacityRamp,
    ) -> LightmapResult<Self> {
        let replaced = host.mesh_material(mesh)?;
        let material = host.create_material(soft_shadow_program(color, color_blend))?;
        if let Err(e) = host.set_mesh_material(mesh, material) {
            let _ = host.dispose_material(material);
            return Err(e.into());
        }
        log::debug!("Attached shadow catcher to mesh {mesh:?}");
        Ok(Self {
            mesh,
            material,
            replaced,
            ramp,
            color,
            color_blend,
        })
    }

    /// Point the material at the latest lightmap
    pub fn bind_map<H: LightmapHost + ?Sized>(&self, host: &mut H, texture: TextureHandle) -> BackendResult<()> {
        host.set_uniform(self.material, uniforms::MAP, UniformValue::Texture(Some(texture)))
    }

    /// Reset the ramp and hide the overlay
    pub fn reset<H: LightmapHost + ?Sized>(&mut self, host: &mut H) -> BackendResult<()> {
        self.ramp.reset();
        self.push(host)
    }

    /// Advance the ramp one step
    pub fn advance<H: LightmapHost + ?Sized>(&mut self, host: &mut H, temporal: bool) -> BackendResult<()> {
        self.ramp.advance(temporal);
        self.push(host)
    }

    fn push<H: LightmapHost + ?Sized>(&self, host: &mut H) -> BackendResult<()> {
        host.set_uniform(self.material, uniforms::OPACITY, UniformValue::Float(self.ramp.opacity()))?;
        host.set_uniform(self.material, uniforms::ALPHA_TEST, UniformValue::Float(self.ramp.alpha_test()))
    }

    /// Display parameters as currently uploaded
    pub fn params(&self) -> SoftShadowParams {
        SoftShadowParams {
            color: self.color,
            color_blend: self.color_blend,
            opacity: self.ramp.opacity(),
            alpha_test: self.ramp.alpha_test(),
        }
    }

    /// Catcher mesh
    pub fn mesh(&self) -> NodeHandle {
        self.mesh
    }

    /// Soft-shadow material
    pub fn material(&self) -> MaterialHandle {
        self.material
    }

    /// Ramp state
    pub fn ramp(&self) -> &OpacityRamp {
        &self.ramp
    }

    /// Give the mesh its previous material back and release ours
    pub fn detach<H: LightmapHost + ?Sized>(self, host: &mut H) -> BackendResult<()> {
        let restored = host.set_mesh_material(self.mesh, self.replaced);
        let disposed = host.dispose_material(self.material);
        restored.and(disposed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::{MeshUvBounds, SceneHost};
    use crate::render::backends::headless::HeadlessHost;
    use approx::assert_relative_eq;

    #[test]
    fn test_non_temporal_ramp_jumps() {
        let mut ramp = OpacityRamp::new(0.8, 0.75, 20.0);
        ramp.advance(false);
        assert_relative_eq!(ramp.opacity(), 0.8);
        assert_relative_eq!(ramp.alpha_test(), 0.75);
        assert!(ramp.is_settled());
    }

    #[test]
    fn test_temporal_ramp_rate_limited() {
        let mut ramp = OpacityRamp::new(1.0, 0.5, 4.0);
        ramp.advance(true);
        assert_relative_eq!(ramp.opacity(), 0.25);
        assert_relative_eq!(ramp.alpha_test(), 0.125);

        for _ in 0..10 {
            ramp.advance(true);
        }
        assert_relative_eq!(ramp.opacity(), 1.0);
        assert_relative_eq!(ramp.alpha_test(), 0.5);

        ramp.reset();
        assert_eq!(ramp.opacity(), 0.0);
        assert!(!ramp.is_settled());
    }

    #[test]
    fn test_shade_dark_texel_is_opaque_tint() {
        let params = SoftShadowParams {
            color: [0.5, 0.5, 1.0],
            color_blend: 2.0,
            opacity: 1.0,
            alpha_test: 0.75,
        };
        let dark = params.shade([0.0, 0.0, 0.0, 1.0]);
        assert_relative_eq!(dark[3], 1.0);
        assert_relative_eq!(dark[0], 0.0);

        let bright = params.shade([1.0, 1.0, 1.0, 1.0]);
        assert_relative_eq!(bright[3], 0.0);
        assert_relative_eq!(bright[2], 2.0);
    }

    #[test]
    fn test_attach_and_detach_swap_material() {
        let mut host = HeadlessHost::new();
        let mesh = host.create_mesh(Some(MeshUvBounds::unit()));
        let original = host.mesh_material(mesh).unwrap();

        let mut catcher = ShadowCatcher::attach(&mut host, mesh, [0.0; 3], 2.0, OpacityRamp::new(1.0, 0.75, 10.0)).unwrap();
        assert_eq!(host.mesh_material(mesh).unwrap(), catcher.material());

        catcher.advance(&mut host, false).unwrap();
        let program = host.material_program(catcher.material()).unwrap();
        assert_eq!(program.uniforms.float(uniforms::OPACITY), Some(1.0));
        assert_eq!(program.uniforms.float(uniforms::ALPHA_TEST), Some(0.75));

        catcher.reset(&mut host).unwrap();
        let program = host.material_program(catcher.material()).unwrap();
        assert_eq!(program.uniforms.float(uniforms::OPACITY), Some(0.0));

        catcher.detach(&mut host).unwrap();
        assert_eq!(host.mesh_material(mesh).unwrap(), original);
    }
}
