//! G-code planning: a linear scan of a program producing the structured
//! view the scheduler and clients work from.

mod parser;

pub use parser::parse;

use crate::types::MachinePosition;
use serde::{Deserialize, Serialize};

/// Structured view of a G-code program.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub stats: PlanStats,
    /// Always non-empty; a `Main` layer is synthesized when the program
    /// carries no markers.
    pub layers: Vec<Layer>,
    pub tool_changes: Vec<ToolChange>,
    pub checkpoints: Vec<Checkpoint>,
    /// Original program text, retained for execution.
    pub content: String,
}

/// Aggregate counts over the scanned program.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStats {
    pub total_lines: u32,
    /// `G0` + `G1` lines.
    pub movement_commands: u32,
    pub rapid_count: u32,
    pub linear_count: u32,
    /// Contiguous pen-down spans.
    pub shapes: u32,
    pub estimated_time_ms: u64,
}

/// A contiguous run of lines grouped under one marker, tool, or section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub index: u32,
    pub start_line: u32,
    pub end_line: u32,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub tool: u32,
}

/// A `T<n>` or `M6` transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolChange {
    pub line: u32,
    pub tool: u32,
    pub previous_tool: u32,
}

/// A resume point recorded during the scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub line: u32,
    pub position: MachinePosition,
    #[serde(rename = "type")]
    pub kind: CheckpointKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckpointKind {
    Layer,
    ToolChange,
    Pause,
    ZChange,
}
