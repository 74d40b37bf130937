//! Still-image capture through an external camera program.
//!
//! The program and its arguments come from [`CaptureConfig`]; the
//! `{output}` argument is replaced with a fresh
//! `capture_<unix_millis>.jpg` path under `output_dir`. No shell is
//! involved.

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Utc;
use thiserror::Error;

use triage_config::{CaptureConfig, OUTPUT_PLACEHOLDER};

use crate::{sys_info, sys_warn};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("cannot prepare capture directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("no image was captured at {0}")]
    NoImage(PathBuf),
}

pub fn capture_path(output_dir: &Path, unix_millis: i64) -> PathBuf {
    output_dir.join(format!("capture_{unix_millis}.jpg"))
}

/// Arguments with every `{output}` occurrence replaced.
pub fn capture_args(config: &CaptureConfig, output: &Path) -> Vec<String> {
    let output = output.display().to_string();
    config
        .args
        .iter()
        .map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &output))
        .collect()
}

/// Take one picture and return where it was written.
///
/// Blocks until the capture program exits.
pub fn capture_image(config: &CaptureConfig) -> Result<PathBuf, CaptureError> {
    std::fs::create_dir_all(&config.output_dir).map_err(|source| CaptureError::OutputDir {
        path: config.output_dir.clone(),
        source,
    })?;

    let output_path = capture_path(&config.output_dir, Utc::now().timestamp_millis());
    let args = capture_args(config, &output_path);
    sys_info!("[CAPTURE] {} {}", config.program, args.join(" "));

    let output = Command::new(&config.program)
        .args(&args)
        .output()
        .map_err(|source| CaptureError::Spawn {
            program: config.program.clone(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        sys_warn!("[CAPTURE] {} failed: {stderr}", config.program);
        return Err(CaptureError::CommandFailed {
            program: config.program.clone(),
            status: output.status.to_string(),
            stderr,
        });
    }

    if !output_path.is_file() {
        return Err(CaptureError::NoImage(output_path));
    }

    sys_info!("[CAPTURE] Saved {}", output_path.display());
    Ok(output_path)
}
