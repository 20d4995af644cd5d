//! Shared foundation for the plotterd daemon.
//!
//! This crate holds everything that is useful outside the daemon process
//! itself: canvas and machine types, the error catalog, daemon
//! configuration, the G-code parser/annotator, and the SVG-to-G-code
//! compiler.

#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod gcode;
pub mod svg;
pub mod types;

pub use config::DaemonConfig;
pub use errors::{PlotError, Result};
pub use gcode::{Checkpoint, CheckpointKind, Layer, Plan, PlanStats, ToolChange};
pub use svg::{CompileOutput, GcodeStats};
pub use types::{
    AlignX, AlignY, CanvasOptions, JobId, JobState, MachinePosition, MachineStatus, Point,
    Polyline, ScaleMode, ViewBox,
};
