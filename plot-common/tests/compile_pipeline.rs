//! Full-pipeline checks: SVG in, G-code out, plan back.

use plot_common::gcode;
use plot_common::svg;
use plot_common::types::{AlignX, AlignY, CanvasOptions, ScaleMode};

fn canvas(mode: ScaleMode) -> CanvasOptions {
    CanvasOptions {
        canvas_width: 480.0,
        canvas_height: 480.0,
        margin: 20.0,
        scale_mode: mode,
        align_x: AlignX::Center,
        align_y: AlignY::Center,
        ..CanvasOptions::default()
    }
}

const ARTWORK: &str = r#"<svg viewBox="0 0 100 100">
    <rect x="10" y="10" width="30" height="30"/>
    <circle cx="70" cy="70" r="15"/>
    <polyline points="0,0 20,5 40,0"/>
    <path d="M50 10 Q 60 0, 70 10 L 70 20 Z"/>
</svg>"#;

#[tokio::test]
async fn artwork_compiles_and_replans_consistently() {
    let out = svg::compile(ARTWORK, &canvas(ScaleMode::Fit)).await.unwrap();
    assert_eq!(out.path_count, 4);
    assert_eq!(out.stats.pen_downs, 4);
    // One rapid per path plus the footer return.
    assert_eq!(out.stats.rapid_moves, 5);

    let plan = gcode::parse(&out.gcode);
    assert_eq!(
        plan.stats.movement_commands,
        out.stats.rapid_moves + out.stats.draw_moves
    );
    assert_eq!(plan.stats.shapes, 4);
    assert_eq!(plan.layers.len(), 1);
    assert_eq!(plan.layers[0].end_line, plan.stats.total_lines);
}

#[tokio::test]
async fn fit_layout_fills_the_available_area() {
    let out = svg::compile(ARTWORK, &canvas(ScaleMode::Fit)).await.unwrap();
    // The artwork spans 0..100 in both axes; fit scales it to the 440 mm
    // available square, so emitted coordinates reach the far margin.
    assert!(out.gcode.contains("X460.000") || out.gcode.contains("Y460.000"));
}

#[tokio::test]
async fn contain_keeps_small_artwork_at_unit_scale() {
    let out = svg::compile(ARTWORK, &canvas(ScaleMode::Contain))
        .await
        .unwrap();
    // 100 SVG units on a 440 mm available area: contain refuses to
    // enlarge, so the drawn extent stays 100 mm wide.
    let plan = gcode::parse(&out.gcode);
    assert!(plan.stats.movement_commands > 0);
    assert!((out.stats.draw_distance) < 450.0);
    assert!(!out.gcode.contains("X460.000"));
}

#[tokio::test]
async fn optimize_flag_survives_a_missing_optimizer() {
    let mut opts = canvas(ScaleMode::Fit);
    opts.optimize = true;
    opts.simplify = true;
    let out = svg::compile(ARTWORK, &opts).await.unwrap();
    assert!(out.stats.draw_moves > 0);
}

#[tokio::test]
async fn plan_serializes_with_wire_field_names() {
    let out = svg::compile(ARTWORK, &canvas(ScaleMode::Fit)).await.unwrap();
    let plan = gcode::parse(&out.gcode);
    let json = serde_json::to_value(&plan).unwrap();
    assert!(json["stats"]["movementCommands"].is_number());
    assert!(json["stats"]["totalLines"].is_number());
    assert!(json["layers"][0]["startLine"].is_number());
    assert!(json["layers"][0]["endLine"].is_number());
    let stats = serde_json::to_value(&out.stats).unwrap();
    assert!(stats["drawMoves"].is_number());
    assert!(stats["penDowns"].is_number());
    assert!(stats["estimatedTimeMs"].is_number());
}
