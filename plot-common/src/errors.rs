//! Error catalog for the plotterd core.
//!
//! One enum covers every failure the daemon surfaces to callers:
//! transport readiness and protocol faults, scheduler state violations,
//! cancellation, and parse failures from the two compilers.

use thiserror::Error;

/// Convenience result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, PlotError>;

#[derive(Debug, Error)]
pub enum PlotError {
    /// The transport has no usable link to the controller.
    #[error("transport is not ready")]
    NotReady,

    /// A command did not terminate within its deadline.
    #[error("command timed out after {0} ms")]
    Timeout(u64),

    /// The controller answered with an error marker.
    #[error("controller error: {0}")]
    Controller(String),

    /// A response could not be interpreted.
    #[error("malformed controller response: {0}")]
    Protocol(String),

    /// An operation is not legal in the entity's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The referenced job does not exist.
    #[error("no such job: {0}")]
    NotFound(String),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// SVG or G-code input could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// Filesystem or device I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlotError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Whether this failure is a cancellation rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
