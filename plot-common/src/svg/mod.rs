//! SVG-to-G-code compilation.
//!
//! The pipeline: parse the document into polylines, optionally rewrite
//! it through the external optimizer first, lay the geometry onto the
//! machine canvas, emit G-code, and tally statistics over the emitted
//! text.

mod emit;
mod layout;
mod optimize;
mod parse;
mod path;
mod stats;

pub use emit::emit_gcode;
pub use layout::{BoundingBox, Placement, apply_placement, plan_placement};
pub use optimize::optimize_svg;
pub use parse::{SvgDocument, parse_document};
pub use path::parse_path_data;
pub use stats::{GcodeStats, analyze_gcode};

use crate::errors::Result;
use crate::types::CanvasOptions;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Result of compiling one SVG document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOutput {
    pub gcode: String,
    pub stats: GcodeStats,
    /// Drawable paths that survived parsing and placement.
    pub path_count: usize,
}

/// Compile an SVG document into a G-code program for the configured
/// canvas.
pub async fn compile(svg: &str, opts: &CanvasOptions) -> Result<CompileOutput> {
    if opts.canvas_width - 2.0 * opts.margin <= 0.0
        || opts.canvas_height - 2.0 * opts.margin <= 0.0
    {
        return Err(crate::errors::PlotError::parse(format!(
            "margin {} leaves no drawable area on a {}x{} canvas",
            opts.margin, opts.canvas_width, opts.canvas_height
        )));
    }

    let source = if opts.optimize {
        optimize_svg(svg, opts).await?
    } else {
        svg.to_string()
    };

    let doc = parse_document(&source)?;

    let placed = match BoundingBox::of(&doc.polylines) {
        Some(bbox) => {
            let placement = plan_placement(&bbox, opts)?;
            debug!(
                paths = doc.polylines.len(),
                scale = placement.scale,
                "placed artwork on canvas"
            );
            apply_placement(&doc.polylines, &bbox, &placement)
        }
        None => Vec::new(),
    };

    let gcode = emit_gcode(&placed, opts);
    let stats = analyze_gcode(&gcode);
    let path_count = placed.iter().filter(|l| l.len() >= 2).count();

    Ok(CompileOutput {
        gcode,
        stats,
        path_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlignX, AlignY, ScaleMode};

    fn scenario_options() -> CanvasOptions {
        CanvasOptions {
            canvas_width: 200.0,
            canvas_height: 200.0,
            margin: 10.0,
            scale_mode: ScaleMode::Contain,
            align_x: AlignX::Center,
            align_y: AlignY::Center,
            travel_speed: 6000,
            draw_speed: 3000,
            pen_down_delay: 150,
            pen_up_delay: 100,
            ..CanvasOptions::default()
        }
    }

    #[tokio::test]
    async fn single_line_compiles_to_one_stroke() {
        let svg = r#"<svg><line x1="0" y1="0" x2="100" y2="0"/></svg>"#;
        let out = compile(svg, &scenario_options()).await.unwrap();

        // Unit-scale contain placement, centered in the 180 mm available
        // area: the 100 mm line starts 50 mm past the margin and sits on
        // the canvas midline.
        assert!(out.gcode.contains("G0 X50.000 Y100.000 F6000"));
        assert!(out.gcode.contains("G1 X150.000 Y100.000 F3000"));
        assert_eq!(out.stats.draw_moves, 1);
        assert_eq!(out.stats.pen_downs, 1);
        assert_eq!(out.path_count, 1);

        let plan = crate::gcode::parse(&out.gcode);
        assert_eq!(plan.stats.shapes, 1);
    }

    #[tokio::test]
    async fn empty_svg_compiles_to_header_and_footer() {
        let out = compile(r#"<svg viewBox="0 0 10 10"></svg>"#, &scenario_options())
            .await
            .unwrap();
        assert_eq!(out.path_count, 0);
        assert_eq!(out.stats.draw_moves, 0);
        assert_eq!(out.stats.pen_downs, 0);
        // Footer still returns to the origin.
        assert_eq!(out.stats.rapid_moves, 1);
    }

    #[tokio::test]
    async fn compile_fails_when_margins_eat_the_canvas() {
        let mut opts = scenario_options();
        opts.margin = 120.0;
        let svg = r#"<svg><line x1="0" y1="0" x2="100" y2="0"/></svg>"#;
        let err = compile(svg, &opts).await.unwrap_err();
        assert!(matches!(err, crate::errors::PlotError::Parse(_)));
    }

    #[tokio::test]
    async fn parser_and_stats_agree_on_movement_counts() {
        let svg = r#"<svg>
            <rect x="0" y="0" width="50" height="50"/>
            <circle cx="100" cy="100" r="20"/>
            <path d="M0 0 C 0 10, 10 10, 10 0 Z"/>
        </svg>"#;
        let out = compile(svg, &scenario_options()).await.unwrap();
        let plan = crate::gcode::parse(&out.gcode);
        assert_eq!(
            plan.stats.movement_commands,
            out.stats.rapid_moves + out.stats.draw_moves
        );
        assert_eq!(plan.stats.shapes, out.path_count as u32);
    }
}
