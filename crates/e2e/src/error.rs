//! Error types for E2E validation

use std::path::PathBuf;

use thiserror::Error;

use crate::taplint::LintOutcome;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error(transparent)]
    Common(#[from] rspval_common::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("UWS job {job_id} still {phase} after {waited_secs:.1}s")]
    JobTimeout {
        job_id: String,
        phase: String,
        waited_secs: f64,
    },

    #[error("TAP service error: {0}")]
    Tap(String),

    #[error("File {} is smaller than expected ({actual} < {minimum} bytes)", path.display())]
    FileSize {
        path: PathBuf,
        actual: u64,
        minimum: u64,
    },

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("taplint did not complete: {0}")]
    Lint(LintOutcome),

    #[error("Simulated user {user} failed: {reason}")]
    Worker { user: usize, reason: String },

    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Page spec parse error: {0}")]
    SpecParse(String),

    #[error("Snapshot mismatch: {name} differs in {diff_pixels} pixel(s), see {}", dir.display())]
    SnapshotMismatch {
        name: String,
        diff_pixels: u64,
        dir: PathBuf,
    },

    #[error("New snapshot created for {name} at {}; please review the image", path.display())]
    NewSnapshot { name: String, path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

impl E2eError {
    /// Whether this error is a failed expectation rather than a broken check
    pub fn is_assertion(&self) -> bool {
        matches!(
            self,
            E2eError::AssertionFailed(_)
                | E2eError::JobTimeout { .. }
                | E2eError::SnapshotMismatch { .. }
                | E2eError::NewSnapshot { .. }
        )
    }
}
