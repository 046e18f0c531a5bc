//! Progress reporting and cancellation support.
//!
//! This module provides [`ProgressCallback`] for monitoring conversion
//! progress, [`CancellationToken`] for cooperative cancellation, and
//! [`ProgressInfo`] for per-item progress snapshots.
//!
//! Each pipeline stage emits a textual status and a fractional progress
//! value in `[0, 1]`; a sentinel of `-1.0` marks a failed or cancelled
//! item. The GUI/CLI layer renders these — the pipeline never prints.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use animorph::{ProgressCallback, ProgressInfo};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         println!("[item {}] {:?} {:.0}%: {}",
//!             info.item_index, info.stage, info.fraction * 100.0, info.message);
//!     }
//! }
//!
//! let sink: Arc<dyn ProgressCallback> = Arc::new(PrintProgress);
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// The pipeline stage a conversion item is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Stage {
    /// Waiting for the orchestrator to pick the item up.
    Queued,
    /// Extracting frames from the source container.
    Decoding,
    /// Replaying delta frames onto the canvas.
    Compositing,
    /// Encoding canonical frames into the requested targets.
    Assembling,
    /// All requested outputs written.
    Succeeded,
    /// The item failed; siblings are unaffected.
    Failed,
    /// The user cancelled the batch.
    Cancelled,
}

impl Stage {
    /// Whether this is a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Succeeded | Stage::Failed | Stage::Cancelled)
    }
}

/// A snapshot of one item's conversion progress.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Index of the item within its batch.
    pub item_index: usize,
    /// The stage being executed.
    pub stage: Stage,
    /// Human-readable status line (e.g. `"Assembling 120 frames (ffmpeg)…"`).
    pub message: String,
    /// Fractional progress in `[0, 1]`, or `-1.0` for failed/cancelled.
    pub fraction: f32,
}

/// Trait for receiving progress updates during conversion.
///
/// Implementations must be [`Send`] and [`Sync`] because callbacks are
/// invoked from concurrently running item tasks.
///
/// Progress callbacks are **infallible** — they observe but cannot halt the
/// pipeline. Use [`CancellationToken`] for cooperative cancellation.
pub trait ProgressCallback: Send + Sync {
    /// Called whenever an item's status line or fraction changes.
    fn on_progress(&self, info: &ProgressInfo);
}

/// A no-op implementation that discards all progress notifications.
///
/// This is the default when no callback is configured.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Cooperative cancellation token backed by an [`AtomicBool`].
///
/// Cloning is cheap — all clones share the same flag. The pipeline checks
/// the token at the start of every stage and before beginning (but not
/// mid-way through) bulk operations; cancelling additionally terminates all
/// live external-tool processes through the
/// [`ToolGateway`](crate::ToolGateway).
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to every holder of this token.
    ///
    /// Idempotent. Does not interrupt work already in flight — stages
    /// observe the flag at their next checkpoint.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A shared handle for emitting progress for one item.
///
/// Thin wrapper so pipeline stages don't each carry `(sink, index)` pairs.
#[derive(Clone)]
pub(crate) struct ProgressHandle {
    pub(crate) sink: Arc<dyn ProgressCallback>,
    pub(crate) item_index: usize,
}

impl ProgressHandle {
    pub(crate) fn emit(&self, stage: Stage, message: impl Into<String>, fraction: f32) {
        self.sink.on_progress(&ProgressInfo {
            item_index: self.item_index,
            stage,
            message: message.into(),
            fraction,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_starts_clear() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_is_shared_and_idempotent() {
        let token = CancellationToken::new();
        let clone = token.clone();
        token.cancel();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn terminal_stages() {
        assert!(Stage::Succeeded.is_terminal());
        assert!(Stage::Failed.is_terminal());
        assert!(Stage::Cancelled.is_terminal());
        assert!(!Stage::Decoding.is_terminal());
    }
}
