//! Randomized directional light ensemble
//!
//! N lights of intensity `total / N` whose positions are redrawn every
//! accumulation step, either around a fixed anchor (directional jitter, a soft
//! area light) or anywhere on the upper hemisphere (ambient sky light).
//! Resampling only moves lights; intensities are fixed at creation.

use std::f32::consts::PI;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::foundation::math::Vec3;
use crate::render::api::{BackendResult, DirectionalLightDescriptor, NodeHandle, SceneHost, ShadowCameraParams};

/// Distribution the ensemble is drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SamplingMode {
    /// Ambient branch with probability `ambient_weight`, jitter otherwise
    #[default]
    Mixed,
    /// Ambient hemisphere only
    Ambient,
    /// Directional jitter only
    Directional,
}

/// Branch a sample was drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleBranch {
    /// Uniform upper hemisphere
    Ambient,
    /// Jitter around the anchor
    Directional,
}

/// Inputs of one resampling pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    /// Distribution
    pub mode: SamplingMode,
    /// Probability of the ambient branch in `Mixed` mode
    pub ambient_weight: f32,
    /// Jitter spread around the anchor (each axis in `[-radius/2, radius/2)`)
    pub radius: f32,
    /// Directional anchor
    pub anchor: Vec3,
    /// Centre of the ambient hemisphere
    pub origin: Vec3,
}

/// One drawn light position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSample {
    /// New position
    pub position: Vec3,
    /// Branch it came from
    pub branch: SampleBranch,
}

/// Draw one light position
pub fn sample_light<R: Rng + ?Sized>(rng: &mut R, params: &SamplingParams) -> LightSample {
    let ambient = match params.mode {
        SamplingMode::Ambient => true,
        SamplingMode::Directional => false,
        SamplingMode::Mixed => rng.gen::<f32>() <= params.ambient_weight,
    };

    if ambient {
        let length = (params.anchor - params.origin).magnitude();
        let lambda = 2.0f32.mul_add(rng.gen::<f32>(), -1.0).acos() - PI / 2.0;
        let phi = 2.0 * PI * rng.gen::<f32>();
        let direction = Vec3::new(
            lambda.cos() * phi.cos(),
            (lambda.cos() * phi.sin()).abs(),
            lambda.sin(),
        );
        LightSample {
            position: params.origin + direction * length,
            branch: SampleBranch::Ambient,
        }
    } else {
        let mut spread = || (rng.gen::<f32>() - 0.5) * params.radius;
        let jitter = Vec3::new(spread(), spread(), spread());
        LightSample {
            position: params.anchor + jitter,
            branch: SampleBranch::Directional,
        }
    }
}

/// One member of the ensemble
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleLight {
    /// Host light node
    pub handle: NodeHandle,
    /// Intensity the light was created with
    pub base_intensity: f32,
    /// Position set by the last resample
    pub current_position: Vec3,
}

/// Parameters for creating the ensemble
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleDescriptor {
    /// Number of lights
    pub count: u32,
    /// Summed intensity of all lights
    pub total_intensity: f32,
    /// Initial position of every light
    pub anchor: Vec3,
    /// Shadow camera shared by all lights
    pub shadow: ShadowCameraParams,
    /// Show shadow-camera helpers
    pub show_helpers: bool,
}

/// Fixed-size set of host directional lights under one group node
#[derive(Debug)]
pub struct LightEnsemble {
    group: NodeHandle,
    lights: Vec<EnsembleLight>,
}

impl LightEnsemble {
    /// Create the group and its lights below `parent`
    ///
    /// The group starts hidden; accumulation shows it for the duration of a
    /// cycle.
    pub fn create<H: SceneHost + ?Sized>(host: &mut H, parent: NodeHandle, desc: &EnsembleDescriptor) -> BackendResult<Self> {
        let group = host.create_group();
        let lights = match Self::populate(host, parent, group, desc) {
            Ok(lights) => lights,
            Err(e) => {
                let _ = host.remove_node(group);
                return Err(e);
            }
        };

        let intensity = desc.total_intensity / desc.count as f32;
        log::debug!("Created light ensemble of {} lights at intensity {intensity}", lights.len());
        Ok(Self { group, lights })
    }

    /// Attach the hidden group under `parent` and fill it with lights
    fn populate<H: SceneHost + ?Sized>(
        host: &mut H,
        parent: NodeHandle,
        group: NodeHandle,
        desc: &EnsembleDescriptor,
    ) -> BackendResult<Vec<EnsembleLight>> {
        host.add_child(parent, group)?;
        host.set_visible(group, false)?;

        let intensity = desc.total_intensity / desc.count as f32;
        let mut lights = Vec::with_capacity(desc.count as usize);
        for _ in 0..desc.count {
            let handle = host.create_directional_light(&DirectionalLightDescriptor {
                intensity,
                position: desc.anchor,
                shadow: desc.shadow,
            })?;
            // not yet under the group, so removing the group would miss it
            if let Err(e) = host.add_child(group, handle) {
                let _ = host.remove_node(handle);
                return Err(e);
            }
            if desc.show_helpers {
                host.set_helper_visible(handle, true)?;
            }
            lights.push(EnsembleLight {
                handle,
                base_intensity: intensity,
                current_position: desc.anchor,
            });
        }
        Ok(lights)
    }

    /// Redraw every light position independently
    pub fn resample<R: Rng + ?Sized>(&mut self, rng: &mut R, params: &SamplingParams) -> Vec<LightSample> {
        self.lights
            .iter_mut()
            .map(|light| {
                let sample = sample_light(rng, params);
                light.current_position = sample.position;
                sample
            })
            .collect()
    }

    /// Push current positions to the host lights
    pub fn apply_positions<H: SceneHost + ?Sized>(&self, host: &mut H) -> BackendResult<()> {
        for light in &self.lights {
            host.set_light_position(light.handle, light.current_position)?;
        }
        Ok(())
    }

    /// Show or hide the whole ensemble
    pub fn set_visible<H: SceneHost + ?Sized>(&self, host: &mut H, visible: bool) -> BackendResult<()> {
        host.set_visible(self.group, visible)
    }

    /// Group node holding the lights
    pub fn group(&self) -> NodeHandle {
        self.group
    }

    /// Lights in creation order
    pub fn lights(&self) -> &[EnsembleLight] {
        &self.lights
    }

    /// Whether `node` belongs to the ensemble
    pub fn contains(&self, node: NodeHandle) -> bool {
        node == self.group || self.lights.iter().any(|l| l.handle == node)
    }

    /// Remove the group and its lights from the host
    pub fn dispose<H: SceneHost + ?Sized>(self, host: &mut H) -> BackendResult<()> {
        host.remove_node(self.group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::HeadlessHost;
    use crate::render::RenderError;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn params(mode: SamplingMode, ambient_weight: f32) -> SamplingParams {
        SamplingParams {
            mode,
            ambient_weight,
            radius: 2.0,
            anchor: Vec3::new(3.0, 4.0, 0.0),
            origin: Vec3::zeros(),
        }
    }

    fn shadow() -> ShadowCameraParams {
        ShadowCameraParams {
            map_size: 512,
            bias: 0.001,
            near: 0.5,
            far: 500.0,
            half_extent: 5.0,
        }
    }

    #[test]
    fn test_ambient_fraction_matches_weight() {
        let mut rng = StdRng::seed_from_u64(7);
        let p = params(SamplingMode::Mixed, 0.3);
        let draws = 100_000;

        let mut ambient = 0;
        for _ in 0..draws {
            let sample = sample_light(&mut rng, &p);
            if sample.branch == SampleBranch::Ambient {
                ambient += 1;
                assert!(sample.position.y >= 0.0);
            }
        }

        let fraction = f64::from(ambient) / f64::from(draws);
        assert!((fraction - 0.3).abs() < 0.01, "ambient fraction {fraction}");
    }

    #[test]
    fn test_ambient_samples_cover_upper_hemisphere_uniformly() {
        let mut rng = StdRng::seed_from_u64(11);
        let p = params(SamplingMode::Ambient, 0.0);
        let draws = 20_000;

        let mut mean_height = 0.0_f64;
        for _ in 0..draws {
            let sample = sample_light(&mut rng, &p);
            assert_eq!(sample.branch, SampleBranch::Ambient);
            assert_relative_eq!(sample.position.magnitude(), 5.0, epsilon = 1e-4);
            mean_height += f64::from(sample.position.y);
        }
        mean_height /= f64::from(draws);

        // |y| of a uniform sphere point averages half the radius
        assert!((mean_height - 2.5).abs() < 0.05, "mean height {mean_height}");
    }

    #[test]
    fn test_directional_jitter_stays_in_box() {
        let mut rng = StdRng::seed_from_u64(3);
        let p = params(SamplingMode::Directional, 1.0);

        for _ in 0..5_000 {
            let sample = sample_light(&mut rng, &p);
            assert_eq!(sample.branch, SampleBranch::Directional);
            let offset = sample.position - p.anchor;
            for axis in offset.iter() {
                assert!(axis.abs() <= 1.0);
            }
        }
    }

    #[test]
    fn test_zero_radius_pins_to_anchor() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut p = params(SamplingMode::Directional, 0.0);
        p.radius = 0.0;
        assert_eq!(sample_light(&mut rng, &p).position, p.anchor);
    }

    #[test]
    fn test_create_splits_intensity_and_hides_group() {
        let mut host = HeadlessHost::new();
        let root = host.create_group();
        let ensemble = LightEnsemble::create(
            &mut host,
            root,
            &EnsembleDescriptor {
                count: 4,
                total_intensity: 2.0,
                anchor: Vec3::new(1.0, 2.0, 3.0),
                shadow: shadow(),
                show_helpers: true,
            },
        )
        .unwrap();

        assert_eq!(ensemble.lights().len(), 4);
        for light in ensemble.lights() {
            assert_relative_eq!(host.light_intensity(light.handle).unwrap(), 0.5);
            assert!(host.helper_visible(light.handle));
        }
        assert_eq!(host.parent(ensemble.group()).unwrap(), Some(root));
        assert!(!host.is_visible(ensemble.group()).unwrap());
    }

    #[test]
    fn test_failed_create_leaves_no_nodes_behind() {
        let mut host = HeadlessHost::new();
        let parent = host.create_group();
        host.remove_node(parent).unwrap();
        let before = host.node_count();

        let result = LightEnsemble::create(
            &mut host,
            parent,
            &EnsembleDescriptor {
                count: 4,
                total_intensity: 1.0,
                anchor: Vec3::new(1.0, 2.0, 3.0),
                shadow: shadow(),
                show_helpers: false,
            },
        );

        assert!(matches!(result, Err(RenderError::InvalidHandle { .. })));
        assert_eq!(host.node_count(), before);
    }

    #[test]
    fn test_resample_moves_lights_never_intensity() {
        let mut host = HeadlessHost::new();
        let root = host.create_group();
        let mut ensemble = LightEnsemble::create(
            &mut host,
            root,
            &EnsembleDescriptor {
                count: 8,
                total_intensity: 1.0,
                anchor: Vec3::new(5.0, 5.0, -10.0),
                shadow: shadow(),
                show_helpers: false,
            },
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let p = params(SamplingMode::Mixed, 0.5);

        for _ in 0..10 {
            let samples = ensemble.resample(&mut rng, &p);
            ensemble.apply_positions(&mut host).unwrap();

            assert_eq!(samples.len(), 8);
            for (light, sample) in ensemble.lights().iter().zip(&samples) {
                assert_eq!(light.current_position, sample.position);
                assert_eq!(host.light_position(light.handle).unwrap(), sample.position);
                assert_eq!(host.light_intensity(light.handle).unwrap(), light.base_intensity);
            }
        }
    }
}
