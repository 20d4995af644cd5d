//! Common types shared across plotterd components.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A point on the machine canvas, in millimetres.
///
/// Origin is the front-left corner of the bed; +Y runs away from the
/// operator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance_to(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// An ordered run of points drawn contiguously with the pen down.
pub type Polyline = Vec<Point>;

/// SVG-local viewBox captured during parsing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewBox {
    pub min_x: f64,
    pub min_y: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for ViewBox {
    fn default() -> Self {
        Self {
            min_x: 0.0,
            min_y: 0.0,
            width: 1.0,
            height: 1.0,
        }
    }
}

/// Current controller position report, one value per axis.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MachinePosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub e: f64,
}

/// Coarse machine state as tracked by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    /// No link to the controller.
    Disconnected,
    /// Link is up and no command is in flight.
    Ready,
    /// A command is currently awaiting its response.
    Busy,
    /// The last open or command attempt failed.
    Error,
}

impl Default for MachineStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl std::fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Ready => write!(f, "ready"),
            Self::Busy => write!(f, "busy"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Unique identifier for a plot job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Mint a fresh v4 id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a plot job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Paused,
    Cancelled,
    Error,
    Completed,
}

impl JobState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Error)
    }

    /// States from which execution may (re-)enter `running`.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Pending | Self::Paused)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Error => write!(f, "error"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// How SVG-unit geometry is scaled onto the machine canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleMode {
    /// Scale up or down so the artwork fills the available area.
    Fit,
    /// Like `fit`, but never enlarge beyond 1:1.
    Contain,
    /// Treat SVG units as millimetres, unscaled.
    None,
}

/// Horizontal placement of the scaled artwork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlignX {
    Left,
    Center,
    Right,
}

impl AlignX {
    pub(crate) fn factor(&self) -> f64 {
        match self {
            Self::Left => 0.0,
            Self::Center => 0.5,
            Self::Right => 1.0,
        }
    }
}

/// Depth placement of the scaled artwork. `front` is the edge nearest
/// the operator (low Y).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlignY {
    Front,
    Center,
    Back,
}

impl AlignY {
    pub(crate) fn factor(&self) -> f64 {
        match self {
            Self::Front => 0.0,
            Self::Center => 0.5,
            Self::Back => 1.0,
        }
    }
}

/// Compiler options describing the machine canvas and pen behavior.
///
/// Field names follow the wire/config spelling; unknown keys are
/// rejected so typos surface at parse time instead of silently using a
/// default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CanvasOptions {
    /// Machine X extent in mm.
    #[serde(default = "default_canvas_width")]
    pub canvas_width: f64,
    /// Machine Y extent in mm.
    #[serde(default = "default_canvas_height")]
    pub canvas_height: f64,
    /// Uniform inset from every canvas edge, mm.
    #[serde(default = "default_margin")]
    pub margin: f64,
    /// Feed rate for pen-up rapids, mm/min.
    #[serde(default = "default_travel_speed")]
    pub travel_speed: u32,
    /// Feed rate for pen-down drawing, mm/min.
    #[serde(default = "default_draw_speed")]
    pub draw_speed: u32,
    /// Dwell after lowering the pen, ms.
    #[serde(default = "default_pen_down_delay")]
    pub pen_down_delay: u64,
    /// Dwell after raising the pen, ms.
    #[serde(default = "default_pen_up_delay")]
    pub pen_up_delay: u64,
    /// Run the external linemerge/linesort optimizer when available.
    #[serde(default)]
    pub optimize: bool,
    /// Add a simplification step to the optimizer pipeline.
    #[serde(default)]
    pub simplify: bool,
    /// Tolerance for the simplification step, mm.
    #[serde(default = "default_simplify_tolerance")]
    pub simplify_tolerance: f64,
    #[serde(default = "default_scale_mode")]
    pub scale_mode: ScaleMode,
    #[serde(default = "default_align_x")]
    pub align_x: AlignX,
    #[serde(default = "default_align_y")]
    pub align_y: AlignY,
    /// Controller pin driving the pen servo.
    #[serde(default = "default_pen_pin")]
    pub pen_pin: u8,
    /// Pin value that lowers the pen.
    #[serde(default = "default_pen_down_value")]
    pub pen_down_value: u8,
    /// Pin value that lifts the pen.
    #[serde(default = "default_pen_up_value")]
    pub pen_up_value: u8,
}

impl Default for CanvasOptions {
    fn default() -> Self {
        Self {
            canvas_width: default_canvas_width(),
            canvas_height: default_canvas_height(),
            margin: default_margin(),
            travel_speed: default_travel_speed(),
            draw_speed: default_draw_speed(),
            pen_down_delay: default_pen_down_delay(),
            pen_up_delay: default_pen_up_delay(),
            optimize: false,
            simplify: false,
            simplify_tolerance: default_simplify_tolerance(),
            scale_mode: default_scale_mode(),
            align_x: default_align_x(),
            align_y: default_align_y(),
            pen_pin: default_pen_pin(),
            pen_down_value: default_pen_down_value(),
            pen_up_value: default_pen_up_value(),
        }
    }
}

fn default_canvas_width() -> f64 {
    480.0
}

fn default_canvas_height() -> f64 {
    480.0
}

fn default_margin() -> f64 {
    10.0
}

fn default_travel_speed() -> u32 {
    6000
}

fn default_draw_speed() -> u32 {
    3000
}

fn default_pen_down_delay() -> u64 {
    150
}

fn default_pen_up_delay() -> u64 {
    100
}

fn default_simplify_tolerance() -> f64 {
    0.1
}

fn default_scale_mode() -> ScaleMode {
    ScaleMode::Fit
}

fn default_align_x() -> AlignX {
    AlignX::Center
}

fn default_align_y() -> AlignY {
    AlignY::Center
}

fn default_pen_pin() -> u8 {
    2
}

fn default_pen_down_value() -> u8 {
    255
}

fn default_pen_up_value() -> u8 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canvas_options_parse_camel_case_keys() {
        let json = r#"{
            "canvasWidth": 200.0,
            "canvasHeight": 200.0,
            "margin": 10.0,
            "scaleMode": "contain",
            "alignX": "center",
            "alignY": "center",
            "drawSpeed": 3000,
            "travelSpeed": 6000,
            "penDownDelay": 150,
            "penUpDelay": 100
        }"#;
        let opts: CanvasOptions = serde_json::from_str(json).unwrap();
        assert_eq!(opts.canvas_width, 200.0);
        assert_eq!(opts.scale_mode, ScaleMode::Contain);
        assert_eq!(opts.align_y, AlignY::Center);
        assert!(!opts.optimize);
    }

    #[test]
    fn canvas_options_reject_unknown_keys() {
        let json = r#"{ "canvasWidth": 200.0, "cnvasHeight": 200.0 }"#;
        assert!(serde_json::from_str::<CanvasOptions>(json).is_err());
    }

    #[test]
    fn job_state_terminality() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(JobState::Error.is_terminal());
        assert!(!JobState::Paused.is_terminal());
        assert!(JobState::Paused.can_start());
        assert!(JobState::Pending.can_start());
        assert!(!JobState::Running.can_start());
    }

    #[test]
    fn job_ids_are_unique_v4() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_uuid().get_version_num(), 4);
        let round = JobId::parse(&a.to_string()).unwrap();
        assert_eq!(a, round);
    }

    #[test]
    fn point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance_to(&b) - 5.0).abs() < 1e-9);
    }
}
