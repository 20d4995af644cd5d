//! Canvas layout: bounding box, uniform scaling, and alignment offsets.

use crate::errors::{PlotError, Result};
use crate::types::{CanvasOptions, Point, Polyline, ScaleMode};

/// Extents below which an axis is treated as degenerate.
const DEGENERATE_EPSILON: f64 = 1e-9;

/// Axis-aligned bounds over a set of polylines, in source units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn of(polylines: &[Polyline]) -> Option<Self> {
        let mut points = polylines.iter().flatten();
        let first = points.next()?;
        let mut bbox = Self {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        for p in points {
            bbox.min_x = bbox.min_x.min(p.x);
            bbox.min_y = bbox.min_y.min(p.y);
            bbox.max_x = bbox.max_x.max(p.x);
            bbox.max_y = bbox.max_y.max(p.y);
        }
        Some(bbox)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    fn is_degenerate(&self) -> bool {
        self.width() < DEGENERATE_EPSILON && self.height() < DEGENERATE_EPSILON
    }
}

/// A resolved uniform transform onto the machine canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

/// Choose scale and offsets for `bbox` under the configured canvas.
///
/// Fails when the margins leave no drawable area.
pub fn plan_placement(bbox: &BoundingBox, opts: &CanvasOptions) -> Result<Placement> {
    let avail_w = opts.canvas_width - 2.0 * opts.margin;
    let avail_h = opts.canvas_height - 2.0 * opts.margin;
    if avail_w <= 0.0 || avail_h <= 0.0 {
        return Err(PlotError::parse(format!(
            "margin {} leaves no drawable area on a {}x{} canvas",
            opts.margin, opts.canvas_width, opts.canvas_height
        )));
    }

    let scale = match opts.scale_mode {
        ScaleMode::None => 1.0,
        ScaleMode::Fit => fit_ratio(bbox, avail_w, avail_h),
        ScaleMode::Contain => fit_ratio(bbox, avail_w, avail_h).min(1.0),
    };

    let scaled_w = bbox.width() * scale;
    let scaled_h = bbox.height() * scale;
    let offset_x = opts.margin + opts.align_x.factor() * (avail_w - scaled_w);
    let offset_y = opts.margin + opts.align_y.factor() * (avail_h - scaled_h);

    Ok(Placement {
        scale,
        offset_x,
        offset_y,
    })
}

/// Smallest per-axis ratio, skipping degenerate axes. A fully degenerate
/// box passes through unscaled.
fn fit_ratio(bbox: &BoundingBox, avail_w: f64, avail_h: f64) -> f64 {
    if bbox.is_degenerate() {
        return 1.0;
    }
    let mut ratio = f64::INFINITY;
    if bbox.width() > DEGENERATE_EPSILON {
        ratio = ratio.min(avail_w / bbox.width());
    }
    if bbox.height() > DEGENERATE_EPSILON {
        ratio = ratio.min(avail_h / bbox.height());
    }
    ratio
}

/// Apply a placement: translate to the origin, scale, then offset.
pub fn apply_placement(
    polylines: &[Polyline],
    bbox: &BoundingBox,
    placement: &Placement,
) -> Vec<Polyline> {
    polylines
        .iter()
        .map(|line| {
            line.iter()
                .map(|p| {
                    Point::new(
                        (p.x - bbox.min_x) * placement.scale + placement.offset_x,
                        (p.y - bbox.min_y) * placement.scale + placement.offset_y,
                    )
                })
                .collect()
        })
        .collect()
}
