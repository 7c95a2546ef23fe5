use std::process::ExitStatus;

use reqwest::StatusCode;
use thiserror::Error;

/// One variant per failure class the pipeline can hit, so each surfaces
/// with its own message instead of disappearing into a generic fault.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("authentication failed: the login flow is missing `{field}`")]
    Authentication { field: &'static str },

    #[error("manifest did not match the expected shape: {reason}")]
    ManifestShape { reason: String },

    #[error("download of {asset} failed with HTTP status {status}")]
    Download { asset: String, status: StatusCode },

    #[error("encoder exited with {status}: {stderr_tail}")]
    Encoder {
        status: ExitStatus,
        stderr_tail: String,
    },
}
