//! Edge-blur pass
//!
//! A full-screen 8-tap box filter over the previous buffer, drawn into the
//! active buffer right before the accumulation draw. Texels outside every UV
//! chart pick up their neighbours' values, which hides chart seams when the
//! lightmap is sampled with bilinear filtering.

use crate::render::api::{BackendResult, BuiltinProgram, MaterialHandle, RenderHost, TextureHandle};
use crate::render::shader::{uniforms, LightmapProgramBuilder, UniformValue};

use super::error::LightmapResult;

/// Neighbour offsets sampled by the filter, in texels
const TAPS: [(i64, i64); 8] = [(1, 0), (0, 1), (0, -1), (-1, 0), (1, 1), (-1, 1), (1, -1), (-1, -1)];

/// Full-screen blur material
#[derive(Debug)]
pub struct EdgeBlurPass {
    material: MaterialHandle,
    pixel_offset: f32,
}

impl EdgeBlurPass {
    /// Build the blur material from the host's unlit program
    pub fn create<H: RenderHost + ?Sized>(host: &mut H, pixel_offset: f32) -> LightmapResult<Self> {
        let base = host.builtin_program(BuiltinProgram::Basic);
        let program = LightmapProgramBuilder::edge_blur(&base, pixel_offset)?;
        let material = host.create_material(program)?;
        Ok(Self { material, pixel_offset })
    }

    /// Blur `source` into the bound render target
    pub fn draw<H: RenderHost + ?Sized>(&self, host: &mut H, source: TextureHandle) -> BackendResult<()> {
        host.set_uniform(
            self.material,
            uniforms::PREVIOUS_BUFFER,
            UniformValue::Texture(Some(source)),
        )?;
        host.draw_fullscreen(self.material)
    }

    /// Blur material
    pub fn material(&self) -> MaterialHandle {
        self.material
    }

    /// Tap distance in UV units
    pub fn pixel_offset(&self) -> f32 {
        self.pixel_offset
    }

    /// Release the material
    pub fn dispose<H: RenderHost + ?Sized>(self, host: &mut H) -> BackendResult<()> {
        host.dispose_material(self.material)
    }
}

/// CPU reference of the filter over a square RGBA image
///
/// RGB is the mean of the eight neighbours `tap` texels away, clamped to the
/// image edge. Alpha is taken from the centre texel.
pub fn box_blur_8(texels: &[[f32; 4]], resolution: u32, tap: u32) -> Vec<[f32; 4]> {
    let size = i64::from(resolution);
    let tap = i64::from(tap);
    let at = |x: i64, y: i64| -> [f32; 4] {
        let x = x.clamp(0, size - 1);
        let y = y.clamp(0, size - 1);
        usize::try_from(y * size + x)
            .ok()
            .and_then(|i| texels.get(i))
            .copied()
            .unwrap_or_default()
    };

    let mut out = Vec::with_capacity(texels.len());
    for y in 0..size {
        for x in 0..size {
            let mut rgb = [0.0_f32; 3];
            for (dx, dy) in TAPS {
                let sample = at(x + dx * tap, y + dy * tap);
                for (acc, value) in rgb.iter_mut().zip(sample) {
                    *acc += value;
                }
            }
            let centre = at(x, y);
            out.push([rgb[0] / 8.0, rgb[1] / 8.0, rgb[2] / 8.0, centre[3]]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::HeadlessHost;
    use approx::assert_relative_eq;

    #[test]
    fn test_constant_image_is_unchanged() {
        let texels = vec![[0.4, 0.5, 0.6, 1.0]; 16];
        let blurred = box_blur_8(&texels, 4, 1);
        for texel in blurred {
            assert_relative_eq!(texel[0], 0.4);
            assert_relative_eq!(texel[1], 0.5);
            assert_relative_eq!(texel[2], 0.6);
        }
    }

    #[test]
    fn test_single_texel_spreads_to_neighbours() {
        let mut texels = vec![[0.0; 4]; 25];
        texels[12] = [8.0, 8.0, 8.0, 1.0];
        let blurred = box_blur_8(&texels, 5, 1);

        // centre excludes itself
        assert_relative_eq!(blurred[12][0], 0.0);
        assert_eq!(blurred[12][3], 1.0);
        for index in [6, 7, 8, 11, 13, 16, 17, 18] {
            assert_relative_eq!(blurred[index][0], 1.0);
        }
        assert_relative_eq!(blurred[0][0], 0.0);
    }

    #[test]
    fn test_edges_clamp() {
        let texels = vec![[1.0, 0.0, 0.0, 0.0]; 4];
        let blurred = box_blur_8(&texels, 2, 1);
        assert_relative_eq!(blurred[0][0], 1.0);
    }

    #[test]
    fn test_create_sets_pixel_offset() {
        let mut host = HeadlessHost::new();
        let pass = EdgeBlurPass::create(&mut host, 1.0 / 64.0).unwrap();
        let program = host.material_program(pass.material()).unwrap();
        assert_eq!(program.uniforms.float(uniforms::PIXEL_OFFSET), Some(1.0 / 64.0));
        assert_relative_eq!(pass.pixel_offset(), 1.0 / 64.0);
    }
}
