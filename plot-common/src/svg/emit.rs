//! G-code emission for placed polylines.

use crate::types::{CanvasOptions, Polyline};
use std::fmt::Write;

/// Render polylines into a complete G-code program.
///
/// Header sets metric units and absolute positioning and lifts the pen;
/// every path is one rapid to its start, a pen-down dwell, linear moves
/// through the remaining points, and a pen-up dwell; the footer lifts
/// the pen and returns to the origin. Paths with fewer than two points
/// are skipped.
pub fn emit_gcode(polylines: &[Polyline], opts: &CanvasOptions) -> String {
    let mut out = String::new();

    writeln!(out, "G21").unwrap();
    writeln!(out, "G90").unwrap();
    pen_up(&mut out, opts);

    for line in polylines.iter().filter(|l| l.len() >= 2) {
        let start = line[0];
        writeln!(
            out,
            "G0 X{:.3} Y{:.3} F{}",
            start.x, start.y, opts.travel_speed
        )
        .unwrap();
        pen_down(&mut out, opts);
        for p in &line[1..] {
            writeln!(out, "G1 X{:.3} Y{:.3} F{}", p.x, p.y, opts.draw_speed).unwrap();
        }
        pen_up(&mut out, opts);
    }

    pen_up(&mut out, opts);
    writeln!(out, "G0 X0.000 Y0.000 F{}", opts.travel_speed).unwrap();
    out
}

fn pen_down(out: &mut String, opts: &CanvasOptions) {
    writeln!(out, "M42 P{} S{}", opts.pen_pin, opts.pen_down_value).unwrap();
    if opts.pen_down_delay > 0 {
        writeln!(out, "G4 P{}", opts.pen_down_delay).unwrap();
    }
}

fn pen_up(out: &mut String, opts: &CanvasOptions) {
    writeln!(out, "M42 P{} S{}", opts.pen_pin, opts.pen_up_value).unwrap();
    if opts.pen_up_delay > 0 {
        writeln!(out, "G4 P{}", opts.pen_up_delay).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point;

    fn opts() -> CanvasOptions {
        CanvasOptions {
            travel_speed: 6000,
            draw_speed: 3000,
            pen_down_delay: 150,
            pen_up_delay: 100,
            ..CanvasOptions::default()
        }
    }

    #[test]
    fn empty_input_emits_header_and_footer_only() {
        let gcode = emit_gcode(&[], &opts());
        let lines: Vec<&str> = gcode.lines().collect();
        assert_eq!(
            lines,
            vec![
                "G21",
                "G90",
                "M42 P2 S0",
                "G4 P100",
                "M42 P2 S0",
                "G4 P100",
                "G0 X0.000 Y0.000 F6000",
            ]
        );
    }

    #[test]
    fn single_path_brackets_with_pen_moves() {
        let path = vec![vec![Point::new(10.0, 20.0), Point::new(30.0, 20.0)]];
        let gcode = emit_gcode(&path, &opts());
        assert!(gcode.contains("G0 X10.000 Y20.000 F6000"));
        assert!(gcode.contains("M42 P2 S255"));
        assert!(gcode.contains("G4 P150"));
        assert!(gcode.contains("G1 X30.000 Y20.000 F3000"));
        // One pen-down for the single path.
        assert_eq!(gcode.matches("M42 P2 S255").count(), 1);
    }

    #[test]
    fn short_paths_are_skipped() {
        let paths = vec![vec![Point::new(1.0, 1.0)], vec![]];
        let gcode = emit_gcode(&paths, &opts());
        assert!(!gcode.contains("G1"));
        assert_eq!(gcode.matches("M42 P2 S255").count(), 0);
    }

    #[test]
    fn zero_dwell_suppresses_g4() {
        let mut o = opts();
        o.pen_down_delay = 0;
        o.pen_up_delay = 0;
        let path = vec![vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)]];
        let gcode = emit_gcode(&path, &o);
        assert!(!gcode.contains("G4"));
    }

    #[test]
    fn coordinates_use_three_decimals() {
        let path = vec![vec![
            Point::new(1.23456, 2.0),
            Point::new(3.14159, 2.71828),
        ]];
        let gcode = emit_gcode(&path, &opts());
        assert!(gcode.contains("G0 X1.235 Y2.000 F6000"));
        assert!(gcode.contains("G1 X3.142 Y2.718 F3000"));
    }
}
