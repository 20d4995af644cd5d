//! Single-pass G-code scanner.
//!
//! Layers come from comment markers when the program carries them, and
//! are synthesized from tool changes and pauses otherwise. Pen state is
//! a heuristic over servo-style commands and Z motion; the resulting
//! shape count is informational.

use super::{Checkpoint, CheckpointKind, Layer, Plan, PlanStats, ToolChange};
use crate::types::MachinePosition;
use regex::Regex;
use std::sync::LazyLock;

/// Flat per-movement figure for the static estimate; the scheduler
/// refines this at runtime from observed throughput.
const MS_PER_MOVEMENT: u64 = 100;

/// Z travel below which a move is not considered a pen or layer action.
const Z_EPSILON: f64 = 0.5;

static LAYER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)LAYER[:\s]*(\d+)").unwrap());
static COLOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:COLOR|PEN)\b[:\s]*([#\w]+)").unwrap());
static AXIS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([XYZS])(-?\d+\.?\d*)").unwrap());

/// Scan a G-code program into a [`Plan`].
pub fn parse(content: &str) -> Plan {
    let mut scan = Scanner::new();
    for (idx, line) in content.lines().enumerate() {
        scan.line(idx as u32 + 1, line);
    }
    scan.finish(content)
}

struct OpenLayer {
    start_line: u32,
    name: String,
    color: Option<String>,
    tool: u32,
}

struct Scanner {
    stats: PlanStats,
    layers: Vec<Layer>,
    open: Option<OpenLayer>,
    tool_changes: Vec<ToolChange>,
    checkpoints: Vec<Checkpoint>,
    position: MachinePosition,
    pen_down: bool,
    current_tool: u32,
    explicit_layers: bool,
    section_counter: u32,
    total_lines: u32,
}

impl Scanner {
    fn new() -> Self {
        Self {
            stats: PlanStats::default(),
            layers: Vec::new(),
            open: None,
            tool_changes: Vec::new(),
            checkpoints: Vec::new(),
            position: MachinePosition::default(),
            pen_down: false,
            current_tool: 0,
            explicit_layers: false,
            section_counter: 0,
            total_lines: 0,
        }
    }

    fn line(&mut self, number: u32, raw: &str) {
        self.total_lines = number;
        if self.open.is_none() {
            self.open_layer(number, "Main".to_string());
        }

        let (code, comment) = match raw.find(';') {
            Some(i) => (&raw[..i], Some(&raw[i + 1..])),
            None => (raw, None),
        };

        if let Some(comment) = comment {
            self.comment(number, comment);
        }

        let code = code.trim();
        if code.is_empty() {
            return;
        }
        let mut words = code.split_whitespace();
        let Some(head) = words.next() else {
            return;
        };
        let head = head.to_ascii_uppercase();

        match head.as_str() {
            "G0" | "G00" => self.motion(number, code, true),
            "G1" | "G01" => self.motion(number, code, false),
            "M0" | "M1" => self.pause(number),
            "M3" | "M03" => self.set_pen(true),
            "M5" | "M05" => self.set_pen(false),
            "M42" | "M280" => self.servo(code),
            "M6" | "M06" => {
                let tool = words
                    .next()
                    .and_then(|w| w.trim_start_matches(['T', 't']).parse::<u32>().ok());
                if let Some(tool) = tool {
                    self.tool_change(number, tool);
                }
            }
            _ => {
                if let Some(rest) = head.strip_prefix('T') {
                    if let Ok(tool) = rest.parse::<u32>() {
                        self.tool_change(number, tool);
                    }
                }
            }
        }
    }

    fn comment(&mut self, number: u32, comment: &str) {
        if let Some(caps) = LAYER_RE.captures(comment) {
            let n: u32 = caps[1].parse().unwrap_or(0);
            self.explicit_layer(number, format!("Layer {n}"));
        } else if comment.to_ascii_uppercase().contains("LAYER_CHANGE") {
            let n = self.layer_count_with_open();
            self.explicit_layer(number, format!("Layer {n}"));
        } else if let Some(caps) = COLOR_RE.captures(comment) {
            if let Some(open) = self.open.as_mut() {
                open.color = Some(caps[1].to_string());
            }
        }
    }

    fn explicit_layer(&mut self, number: u32, name: String) {
        self.explicit_layers = true;
        self.close_layer(number.saturating_sub(1));
        self.open_layer(number, name);
        self.checkpoint(number, CheckpointKind::Layer);
    }

    fn motion(&mut self, number: u32, code: &str, rapid: bool) {
        self.stats.movement_commands += 1;
        if rapid {
            self.stats.rapid_count += 1;
        } else {
            self.stats.linear_count += 1;
        }

        let mut dz = 0.0;
        for caps in AXIS_RE.captures_iter(&code.to_ascii_uppercase()) {
            let Ok(value) = caps[2].parse::<f64>() else {
                continue;
            };
            match &caps[1] {
                "X" => self.position.x = value,
                "Y" => self.position.y = value,
                "Z" => {
                    dz = value - self.position.z;
                    self.position.z = value;
                }
                _ => {}
            }
        }

        if dz.abs() > Z_EPSILON {
            let pen_was_up = !self.pen_down;
            // Z-pen machines: a descend lowers the pen, a lift raises it.
            if dz < 0.0 {
                self.set_pen(true);
            } else {
                self.set_pen(false);
            }
            if pen_was_up && !self.explicit_layers {
                self.checkpoint(number, CheckpointKind::ZChange);
            }
        }
    }

    fn servo(&mut self, code: &str) {
        let mut s_value: Option<f64> = None;
        for caps in AXIS_RE.captures_iter(&code.to_ascii_uppercase()) {
            if &caps[1] == "S" {
                s_value = caps[2].parse().ok();
            }
        }
        if let Some(s) = s_value {
            self.set_pen(s > 0.0);
        }
    }

    fn set_pen(&mut self, down: bool) {
        if down && !self.pen_down {
            self.stats.shapes += 1;
        }
        self.pen_down = down;
    }

    fn tool_change(&mut self, number: u32, tool: u32) {
        self.tool_changes.push(ToolChange {
            line: number,
            tool,
            previous_tool: self.current_tool,
        });
        self.checkpoint(number, CheckpointKind::ToolChange);
        self.current_tool = tool;
        if !self.explicit_layers {
            self.close_layer(number.saturating_sub(1));
            self.open_layer(number, format!("Tool {tool}"));
        }
    }

    fn pause(&mut self, number: u32) {
        self.checkpoint(number, CheckpointKind::Pause);
        if !self.explicit_layers {
            self.close_layer(number);
            self.section_counter += 1;
            self.open_layer(number + 1, format!("Section {}", self.section_counter));
        }
    }

    fn checkpoint(&mut self, number: u32, kind: CheckpointKind) {
        self.checkpoints.push(Checkpoint {
            line: number,
            position: self.position,
            kind,
        });
    }

    fn open_layer(&mut self, start_line: u32, name: String) {
        self.open = Some(OpenLayer {
            start_line,
            name,
            color: None,
            tool: self.current_tool,
        });
    }

    /// Close the open layer at `end_line`, dropping it when the range is
    /// empty (a marker on its own first line).
    fn close_layer(&mut self, end_line: u32) {
        let Some(open) = self.open.take() else {
            return;
        };
        if open.start_line <= end_line {
            self.layers.push(Layer {
                index: 0,
                start_line: open.start_line,
                end_line,
                name: open.name,
                color: open.color,
                tool: open.tool,
            });
        }
    }

    fn layer_count_with_open(&self) -> usize {
        self.layers.len() + usize::from(self.open.is_some())
    }

    fn finish(mut self, content: &str) -> Plan {
        self.close_layer(self.total_lines);
        if self.layers.is_empty() {
            self.layers.push(Layer {
                index: 0,
                start_line: self.total_lines.min(1),
                end_line: self.total_lines,
                name: "Main".to_string(),
                color: None,
                tool: 0,
            });
        }
        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.index = i as u32;
        }

        self.stats.total_lines = self.total_lines;
        self.stats.estimated_time_ms = u64::from(self.stats.movement_commands) * MS_PER_MOVEMENT;

        Plan {
            stats: self.stats,
            layers: self.layers,
            tool_changes: self.tool_changes,
            checkpoints: self.checkpoints,
            content: content.to_string(),
        }
    }
}
