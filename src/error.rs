//! Error types for the `animorph` crate.
//!
//! This module defines [`AnimorphError`], the unified error type returned by
//! all fallible operations in the crate, and [`Warning`], the non-fatal
//! conditions a conversion can accumulate without failing.
//!
//! Errors terminate only the conversion item they occur in — the pipeline's
//! batch join is fail-soft, so sibling items are never affected.

use std::{io::Error as IoError, path::PathBuf};

use image::ImageError;
use thiserror::Error;

/// The unified error type for all `animorph` operations.
///
/// Every public method that can fail returns `Result<T, AnimorphError>`.
/// Variants carry enough context to diagnose the problem without needing
/// additional logging at the call site.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AnimorphError {
    /// No decode strategy produced frames for this source.
    ///
    /// The message names the missing capability (decoder not found, tool
    /// unavailable, no frames produced) and lists what was tried.
    #[error("No working decode strategy: {reason}")]
    DecodeUnavailable {
        /// The missing capability, plus the per-strategy failures.
        reason: String,
    },

    /// An external tool exited with a non-zero status.
    #[error("Tool '{tool}' failed{}: {stderr}", status.map(|s| format!(" (exit code {s})")).unwrap_or_default())]
    ToolFailure {
        /// The tool that was invoked (e.g. `ffmpeg`, `webpmux`).
        tool: String,
        /// The exit code, if the process exited normally.
        status: Option<i32>,
        /// Captured diagnostic output.
        stderr: String,
    },

    /// An external tool could not be resolved via override, bundled
    /// directory, or the system PATH.
    #[error("Tool '{tool}' not found; configure its path or install it")]
    ToolNotFound {
        /// The tool that was requested.
        tool: String,
    },

    /// The operation was cancelled via a
    /// [`CancellationToken`](crate::CancellationToken).
    ///
    /// Never reported to the user as a failure — the pipeline renders a
    /// distinct "cancelled" status instead.
    #[error("Operation cancelled")]
    Cancelled,

    /// The input is not usable as an animation source.
    #[error("Invalid input {}: {reason}", path.display())]
    InvalidInput {
        /// The offending path.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// The file contains only audio, or no decodable video stream at all.
    #[error("No video stream found in {}", path.display())]
    NoVideoStream {
        /// The probed file.
        path: PathBuf,
    },

    /// Media probing produced output that could not be interpreted.
    #[error("Failed to probe media info: {0}")]
    ProbeFailed(String),

    /// GIF encoding through the in-process fallback encoder failed.
    #[error("GIF encoding error: {0}")]
    GifEncode(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// An error from the `image` crate during decode or compositing.
    #[error("Image processing error: {0}")]
    Image(#[from] ImageError),

    /// A JSON payload (Lottie document, ffprobe output, VAP sidecar)
    /// could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AnimorphError {
    /// Returns `true` for user-initiated cancellation.
    ///
    /// Cancellation is surfaced as a neutral status, never as a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AnimorphError::Cancelled)
    }
}

/// A non-fatal condition recorded while converting an item.
///
/// Warnings are absorbed by the stage that detects them; the item still
/// succeeds, with the warnings attached to its
/// [`Outcome`](crate::pipeline::Outcome).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Warning {
    /// The quantizer could not hit the requested quality target; the
    /// unquantized (or partially optimized) file was used instead.
    QualityTargetMissed,

    /// The extractor produced a different frame count than estimated from
    /// the container metadata. The actual count was used.
    FrameCountMismatch {
        /// Frames expected from `floor(duration × fps)` or the header.
        expected: u64,
        /// Frames actually produced.
        actual: u64,
    },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::QualityTargetMissed => {
                write!(
                    f,
                    "quality target could not be reached; output kept unquantized"
                )
            }
            Warning::FrameCountMismatch { expected, actual } => {
                write!(f, "expected {expected} frames, extractor produced {actual}")
            }
        }
    }
}
