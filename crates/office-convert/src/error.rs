//! Error types for office document conversion

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors produced while validating or running a conversion
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("File does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Input file extension not supported: {0:?}")]
    UnsupportedInput(String),

    #[error("Output extension ({to}) not supported for input extension ({from})")]
    UnsupportedOutput { from: String, to: String },

    #[error("Conversion failed (exit code {}): {output}", exit_code_label(.exit_code))]
    ConversionFailed {
        /// `None` when the converter was terminated by a signal
        exit_code: Option<i32>,
        /// Combined stdout/stderr, truncated
        output: String,
    },

    #[error("Converter exited successfully but produced no output at {}", .0.display())]
    OutputMissing(PathBuf),

    #[error("Converter timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to move {} to {}: {source}", .from.display(), .to.display())]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to execute converter ({binary}): {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_code_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "none, killed by signal".to_string(), |c| c.to_string())
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ConvertError>;
