//! Statistics pass over emitted G-code.
//!
//! Re-reads the generated program instead of instrumenting the emitter,
//! so the numbers always describe what will actually be sent.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([XYFSP])(-?\d+\.?\d*)").unwrap());

/// Tallies over an emitted program.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcodeStats {
    pub rapid_moves: u32,
    pub draw_moves: u32,
    pub pen_downs: u32,
    pub pen_ups: u32,
    /// Sum of all move lengths, mm.
    pub total_distance: f64,
    /// Pen-down portion of `total_distance`.
    pub draw_distance: f64,
    /// Pen-up portion of `total_distance`.
    pub travel_distance: f64,
    pub estimated_time_ms: u64,
}

/// Analyze a G-code program produced by the emitter.
pub fn analyze_gcode(gcode: &str) -> GcodeStats {
    let mut stats = GcodeStats::default();
    let mut x = 0.0_f64;
    let mut y = 0.0_f64;
    // mm/min, refreshed by F words.
    let mut feed = 3000.0_f64;
    let mut time_ms = 0.0_f64;

    for raw in gcode.lines() {
        let line = match raw.find(';') {
            Some(i) => &raw[..i],
            None => raw,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            continue;
        };
        let head = head.to_ascii_uppercase();

        match head.as_str() {
            "G0" | "G1" => {
                let rapid = head == "G0";
                let mut nx = x;
                let mut ny = y;
                for caps in WORD_RE.captures_iter(&line.to_ascii_uppercase()) {
                    let Ok(value) = caps[2].parse::<f64>() else {
                        continue;
                    };
                    match &caps[1] {
                        "X" => nx = value,
                        "Y" => ny = value,
                        "F" => feed = value,
                        _ => {}
                    }
                }
                let dist = ((nx - x).powi(2) + (ny - y).powi(2)).sqrt();
                x = nx;
                y = ny;
                stats.total_distance += dist;
                if rapid {
                    stats.rapid_moves += 1;
                    stats.travel_distance += dist;
                } else {
                    stats.draw_moves += 1;
                    stats.draw_distance += dist;
                }
                if feed > 0.0 {
                    time_ms += dist / feed * 60_000.0;
                }
            }
            "G4" => {
                for caps in WORD_RE.captures_iter(&line.to_ascii_uppercase()) {
                    if &caps[1] == "P" {
                        if let Ok(ms) = caps[2].parse::<f64>() {
                            time_ms += ms;
                        }
                    }
                }
            }
            "M42" => {
                for caps in WORD_RE.captures_iter(&line.to_ascii_uppercase()) {
                    if &caps[1] == "S" {
                        if let Ok(s) = caps[2].parse::<f64>() {
                            if s > 0.0 {
                                stats.pen_downs += 1;
                            } else {
                                stats.pen_ups += 1;
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    stats.estimated_time_ms = time_ms.round() as u64;
    stats
}
