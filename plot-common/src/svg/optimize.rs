//! External optimizer pass.
//!
//! When the `vpype` binary is on PATH the document is rewritten through
//! a merge/sort pipeline before compilation; when it is absent (or
//! exits non-zero) the original document is used unchanged.

use crate::errors::Result;
use crate::types::{CanvasOptions, ScaleMode};
use std::io::Write;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

const OPTIMIZER_BIN: &str = "vpype";

/// Tolerance for joining near-collinear path ends, mm.
const MERGE_TOLERANCE_MM: f64 = 0.5;

/// Run the optimizer pipeline over an SVG document.
pub async fn optimize_svg(svg: &str, opts: &CanvasOptions) -> Result<String> {
    if !optimizer_available().await {
        debug!("optimizer not found on PATH, using original document");
        return Ok(svg.to_string());
    }

    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input.svg");
    let output = dir.path().join("output.svg");
    {
        let mut file = std::fs::File::create(&input)?;
        file.write_all(svg.as_bytes())?;
    }

    let mut command = Command::new(OPTIMIZER_BIN);
    command
        .arg("read")
        .arg(&input)
        .args(["linemerge", "-t", &format!("{MERGE_TOLERANCE_MM}mm")])
        .arg("linesort");
    if opts.simplify {
        command.args(["linesimplify", "-t", &format!("{}mm", opts.simplify_tolerance)]);
    }
    // Only fit-mode layout is delegated; for contain/none the compiler's
    // own scaler stays authoritative.
    if opts.scale_mode == ScaleMode::Fit {
        command.args([
            "layout",
            "-m",
            &format!("{}mm", opts.margin),
            &format!("{}x{}mm", opts.canvas_width, opts.canvas_height),
        ]);
    }
    command.arg("write").arg(&output);
    command.stdout(Stdio::null()).stderr(Stdio::piped());

    let run = command.output().await;
    match run {
        Ok(out) if out.status.success() => {
            let rewritten = std::fs::read_to_string(&output)?;
            debug!(
                input_len = svg.len(),
                output_len = rewritten.len(),
                "optimizer pass complete"
            );
            Ok(rewritten)
        }
        Ok(out) => {
            warn!(
                status = %out.status,
                stderr = %String::from_utf8_lossy(&out.stderr),
                "optimizer failed, using original document"
            );
            Ok(svg.to_string())
        }
        Err(e) => {
            warn!("optimizer could not be spawned: {e}, using original document");
            Ok(svg.to_string())
        }
    }
}

/// Probe PATH for the optimizer binary.
async fn optimizer_available() -> bool {
    Command::new(OPTIMIZER_BIN)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}
