//! UV chart packing
//!
//! Every receiver owns a rectangular chart of the shared lightmap. Charts are
//! laid out with the space-splitting packer popularised by `potpack`: tallest
//! first into a list of free spaces that starts as one column of roughly square
//! width and unbounded height. The atlas is the square enclosing the result.
//!
//! Padding is given in lightmap units. Since the atlas is rescaled to the unit
//! square afterwards, the margin actually packed is `padding * side`, found by
//! repacking until the scaled margin reaches the requested one.

use crate::foundation::math::Vec2;
use crate::render::api::{MeshUvBounds, NodeHandle, UvTransform};

/// Target fill ratio used to pick the starting width
const FILL_ESTIMATE: f32 = 0.95;

/// Repacks allowed while the margin converges
const PADDING_PASSES: usize = 8;

/// Relative shortfall of the scaled margin accepted as converged
const PADDING_TOLERANCE: f32 = 1e-4;

/// One mesh's UV footprint to place
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvChart {
    /// Owning mesh
    pub mesh: NodeHandle,
    /// Bounds of the mesh's own UVs
    pub bounds: MeshUvBounds,
}

/// Placement of one chart
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackedChart {
    /// Owning mesh
    pub mesh: NodeHandle,
    /// Lower-left corner of the padded box, atlas units
    pub position: Vec2,
    /// Padded box size, atlas units
    pub size: Vec2,
    /// Remap from the mesh's UVs into the lightmap
    pub transform: UvTransform,
}

impl PackedChart {
    /// Region of the lightmap the mesh's UVs land in, padding excluded
    pub fn lightmap_rect(&self, bounds: &MeshUvBounds) -> (Vec2, Vec2) {
        (self.transform.apply(bounds.min), self.transform.apply(bounds.max))
    }
}

/// Result of packing, charts in input order
#[derive(Debug, Clone, PartialEq)]
pub struct AtlasLayout {
    /// Placed charts
    pub charts: Vec<PackedChart>,
    /// Side of the square atlas, atlas units
    pub side: f32,
    /// Fraction of the atlas covered by padded boxes
    pub fill: f32,
    /// Margin around every chart, atlas units
    pub padding: f32,
}

#[derive(Debug, Clone, Copy)]
struct Space {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
}

fn same(a: f32, b: f32) -> bool {
    (a - b).abs() <= 1e-6
}

/// Lay out charts without overlap inside a square atlas
///
/// Every chart keeps at least `padding` (lightmap units, e.g. `3 / resolution`
/// for three texels) of margin on each side once mapped into the lightmap;
/// the returned transforms map the unpadded UVs into the centre of their box.
pub fn pack_charts(charts: &[UvChart], padding: f32) -> AtlasLayout {
    let mut layout = pack_padded(charts, padding);
    for _ in 0..PADDING_PASSES {
        if margin_reached(&layout, padding) {
            return layout;
        }
        layout = pack_padded(charts, padding * layout.side);
    }
    if !margin_reached(&layout, padding) {
        log::warn!(
            "Chart margin {:.5} below requested {padding:.5} after {PADDING_PASSES} repacks",
            layout.padding / layout.side
        );
    }
    layout
}

fn margin_reached(layout: &AtlasLayout, padding: f32) -> bool {
    layout.side <= 0.0 || layout.padding >= padding * layout.side * (1.0 - PADDING_TOLERANCE)
}

/// One packing pass with `padding` in atlas units
fn pack_padded(charts: &[UvChart], padding: f32) -> AtlasLayout {
    if charts.is_empty() {
        return AtlasLayout {
            charts: Vec::new(),
            side: 0.0,
            fill: 0.0,
            padding,
        };
    }

    let boxes: Vec<Vec2> = charts
        .iter()
        .map(|chart| chart.bounds.size().map(|v| v.max(0.0)) + Vec2::repeat(2.0 * padding))
        .collect();

    let area: f32 = boxes.iter().map(|b| b.x * b.y).sum();
    let max_width = boxes.iter().map(|b| b.x).fold(0.0_f32, f32::max);

    let mut order: Vec<usize> = (0..boxes.len()).collect();
    order.sort_by(|&a, &b| boxes[b].y.total_cmp(&boxes[a].y));

    let start_width = (area / FILL_ESTIMATE).sqrt().max(max_width);
    let mut spaces = vec![Space {
        x: 0.0,
        y: 0.0,
        w: start_width,
        h: f32::INFINITY,
    }];

    let mut positions = vec![Vec2::zeros(); boxes.len()];
    let mut width = 0.0_f32;
    let mut height = 0.0_f32;

    for index in order {
        let b = boxes[index];
        // smaller spaces sit at the end, try them first
        for i in (0..spaces.len()).rev() {
            let space = spaces[i];
            if b.x > space.w || b.y > space.h {
                continue;
            }

            positions[index] = Vec2::new(space.x, space.y);
            width = width.max(space.x + b.x);
            height = height.max(space.y + b.y);

            if same(b.x, space.w) && same(b.y, space.h) {
                spaces.swap_remove(i);
            } else if same(b.y, space.h) {
                spaces[i].x += b.x;
                spaces[i].w -= b.x;
            } else if same(b.x, space.w) {
                spaces[i].y += b.y;
                spaces[i].h -= b.y;
            } else {
                spaces.push(Space {
                    x: space.x + b.x,
                    y: space.y,
                    w: space.w - b.x,
                    h: b.y,
                });
                spaces[i].y += b.y;
                spaces[i].h -= b.y;
            }
            break;
        }
    }

    let side = width.max(height);
    let scale = 1.0 / side;
    let placed = charts
        .iter()
        .zip(boxes.iter().zip(&positions))
        .map(|(chart, (&size, &position))| PackedChart {
            mesh: chart.mesh,
            position,
            size,
            transform: UvTransform {
                offset: (position + Vec2::repeat(padding) - chart.bounds.min) * scale,
                scale: Vec2::repeat(scale),
            },
        })
        .collect();

    log::debug!("Packed {} UV charts into a {side:.3} atlas", charts.len());
    AtlasLayout {
        charts: placed,
        side,
        fill: area / (side * side),
        padding,
    }
}
