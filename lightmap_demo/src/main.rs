//! Progressive lightmap demo
//!
//! Builds a small headless scene (a ground plane with a few boxes standing
//! on it), accumulates its soft shadows and writes the catcher's view of the
//! lightmap to a PNG.
//!
//! ```text
//! lightmap_demo [config.toml|config.ron] [output.png]
//! ```

use progressive_lightmap::prelude::*;
use progressive_lightmap::render::backends::headless::IrradianceQuery;
use progressive_lightmap::render::systems::lightmap::SoftShadowParams;

/// Axis-aligned box standing on the ground plane
#[derive(Debug, Clone, Copy)]
struct Block {
    center: Vec3,
    half: Vec3,
}

impl Block {
    fn new(x: f32, z: f32, half: [f32; 3]) -> Self {
        Self {
            center: Vec3::new(x, half[1], z),
            half: Vec3::new(half[0], half[1], half[2]),
        }
    }

    /// Slab test for the ray `origin + t * dir`, `t > 0`
    fn blocks(&self, origin: &Vec3, dir: &Vec3) -> bool {
        let mut near = 0.0_f32;
        let mut far = f32::INFINITY;
        for axis in 0..3 {
            let lo = self.center[axis] - self.half[axis];
            let hi = self.center[axis] + self.half[axis];
            if dir[axis].abs() < 1e-6 {
                if origin[axis] < lo || origin[axis] > hi {
                    return false;
                }
                continue;
            }
            let t0 = (lo - origin[axis]) / dir[axis];
            let t1 = (hi - origin[axis]) / dir[axis];
            near = near.max(t0.min(t1));
            far = far.min(t0.max(t1));
            if near > far {
                return false;
            }
        }
        true
    }
}

fn load_config() -> Result<ShadowConfig, ConfigError> {
    match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Loading shadow config from {path}");
            ShadowConfig::load_from_file(&path)
        }
        None => Ok(ShadowConfig::new(256)
            .with_light_count(8)
            .with_frames(60)
            .with_blend_window(30.0)
            .with_seed(42)),
    }
}

fn write_png(
    path: &str,
    texels: &[[f32; 4]],
    resolution: u32,
    shading: &SoftShadowParams,
) -> Result<(), image::ImageError> {
    let image = image::RgbaImage::from_fn(resolution, resolution, |x, y| {
        let index = (y * resolution + x) as usize;
        let texel = texels.get(index).copied().unwrap_or_default();
        let shaded = shading.shade(texel);
        // composite over white so the shadow reads without an alpha-aware viewer
        let over = |c: f32| (c * shaded[3] + (1.0 - shaded[3])).clamp(0.0, 1.0);
        image::Rgba([
            (over(shaded[0]) * 255.0).round() as u8,
            (over(shaded[1]) * 255.0).round() as u8,
            (over(shaded[2]) * 255.0).round() as u8,
            255,
        ])
    });
    image.save(path)
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let output = std::env::args().nth(2).unwrap_or_else(|| "lightmap.png".to_string());
    let ground_size = config.size;
    let resolution = config.resolution;

    let mut host = HeadlessHost::new();
    let root = host.create_group();
    let camera = host.create_camera();
    let ground = host.create_mesh(Some(MeshUvBounds::unit()));
    host.add_child(root, ground)?;

    let blocks = [
        Block::new(0.0, 0.0, [0.8, 0.8, 0.8]),
        Block::new(-2.5, 1.5, [0.4, 1.5, 0.4]),
        Block::new(2.0, -2.0, [1.2, 0.3, 0.6]),
    ];
    for _ in &blocks {
        // no UVs: the boxes only occlude
        let mesh = host.create_mesh(None);
        host.add_child(root, mesh)?;
    }
    let lamp = host.create_point_light(1.0);
    host.add_child(root, lamp)?;

    let mut lightmap = ProgressiveLightmap::new(host, config, root, camera)?;
    lightmap.attach_catcher(ground)?;
    lightmap.clear()?;

    // lightmap UV -> ground UV -> world position on the y = 0 plane
    let chart = lightmap.host().lightmap_uv_transform(ground)?;
    lightmap
        .host_mut()
        .set_irradiance_model(move |query: &IrradianceQuery<'_>| {
            if query.mesh != ground {
                return query.lights.iter().map(|l| l.intensity).sum();
            }
            let local = (query.uv - chart.offset).component_div(&chart.scale);
            let point = Vec3::new((local.x - 0.5) * ground_size, 0.0, (local.y - 0.5) * ground_size);
            query
                .lights
                .iter()
                .filter(|light| {
                    let dir = light.position.normalize();
                    !blocks.iter().any(|b| b.blocks(&point, &dir))
                })
                .map(|light| light.intensity)
                .sum()
        });

    lightmap.recalculate(None)?;
    log::info!("Accumulating {} steps", lightmap.config().frames);
    let mut reported = 0;
    loop {
        match lightmap.poll()? {
            CycleStatus::Pending { progress } => {
                if progress >= reported + 10 {
                    log::info!("Accumulation {progress}%");
                    reported = progress;
                }
            }
            CycleStatus::Complete => break,
            CycleStatus::Cancelled => {
                log::warn!("Accumulation cancelled");
                return Ok(());
            }
        }
    }

    let shading = lightmap
        .catcher()
        .map(|catcher| catcher.params())
        .ok_or("shadow catcher missing")?;
    let texels = lightmap.host().texture_texels(lightmap.result_texture())?;
    write_png(&output, texels, resolution, &shading)?;
    log::info!("Wrote {output}");

    let _host = lightmap.dispose();
    Ok(())
}

fn main() {
    progressive_lightmap::foundation::logging::init_with_default("info");

    if let Err(e) = run() {
        log::error!("Lightmap demo failed: {e}");
        std::process::exit(1);
    }
}
