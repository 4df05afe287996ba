//! Temporal blend math
//!
//! CPU reference of the accumulation fragment stage: an exponential moving
//! average with smoothing factor `1 / averaging_window`.

use crate::foundation::math::mix;

/// One blend step: `mix(previous, current, 1 / window)`
#[inline]
pub fn blend(previous: f32, current: f32, averaging_window: f32) -> f32 {
    mix(previous, current, 1.0 / averaging_window)
}

/// Blend an RGB texel, leaving alpha to the caller
#[inline]
pub fn blend_rgb(previous: [f32; 3], current: [f32; 3], averaging_window: f32) -> [f32; 3] {
    [
        blend(previous[0], current[0], averaging_window),
        blend(previous[1], current[1], averaging_window),
        blend(previous[2], current[2], averaging_window),
    ]
}

/// Closed form of `steps` blends of a constant input starting from zero
///
/// `input * (1 - (1 - 1/W)^k)`
pub fn converged_value(input: f32, averaging_window: f32, steps: u32) -> f32 {
    let retain = 1.0 - 1.0 / f64::from(averaging_window);
    let steps = i32::try_from(steps).unwrap_or(i32::MAX);
    (f64::from(input) * (1.0 - retain.powi(steps))) as f32
}

/// Steps needed for a constant input to get within `tolerance` (relative) of itself
pub fn steps_to_converge(averaging_window: f32, tolerance: f32) -> u32 {
    if averaging_window <= 1.0 {
        return 1;
    }
    let retain = 1.0 - 1.0 / f64::from(averaging_window);
    let steps = f64::from(tolerance).ln() / retain.ln();
    steps.ceil().max(1.0) as u32
}
