//! # animorph
//!
//! Convert animated visual assets between formats through one canonical
//! intermediate: an ordered sequence of fully-composited RGBA frames.
//!
//! Sources — animated GIF/WebP/APNG, numbered PNG sequences, Lottie, SVGA,
//! PAG, and video containers (MP4, WebM, MOV, and friends, including
//! MP4+JSON VAP pairs) — are classified, decoded through a per-kind
//! fallback chain, composited when the container is delta-encoded, and
//! re-encoded into any combination of APNG, GIF, animated WebP, or PNG/JPG
//! frame sequences.
//!
//! Decoding prefers in-process codecs and falls back to external tools
//! (ffmpeg, the WebP suite, the APNG toolchain); every external process is
//! supervised so a batch can be cancelled cleanly at any point.
//!
//! ## Quick start
//!
//! ```no_run
//! # async fn demo() -> Result<(), animorph::AnimorphError> {
//! use animorph::{
//!     CancellationToken, Classifier, ConvertOptions, Orchestrator, OutputFormat, Quality,
//! };
//!
//! let sources = Classifier::new().classify_paths(["sticker.webp", "./frames"])?;
//!
//! let options = ConvertOptions::new()
//!     .with_formats([OutputFormat::Apng, OutputFormat::Webp])
//!     .with_quality(Quality::target(80));
//!
//! let report = Orchestrator::new()
//!     .convert_all(sources, options, CancellationToken::new())
//!     .await;
//!
//! println!("{} converted, {} failed", report.succeeded(), report.failed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Pipeline shape
//!
//! Each item moves through `Queued → Decoding → [Compositing] →
//! Assembling`; batches run items concurrently and join fail-soft, so one
//! broken file never sinks its siblings. Progress is observable through
//! [`ProgressCallback`]; cancellation through [`CancellationToken`].

#![warn(missing_docs)]

pub mod assemble;
pub mod chain;
pub mod classify;
pub mod compose;
pub mod error;
pub mod extract;
pub mod frame;
pub mod options;
pub mod pipeline;
pub mod probe;
pub mod progress;
pub mod quantize;
pub mod tools;

pub use assemble::{Assembler, output_path};
pub use chain::{DecodeStrategy, renderer_tool, strategies_for};
pub use classify::{Classifier, SourceDescriptor, SourceKind};
pub use compose::{BlendOp, Compositor, DeltaFrame, DisposeOp, is_direct_stream};
pub use error::{AnimorphError, Warning};
pub use extract::{DecodeOutcome, Extractor};
pub use frame::{Frame, FrameSequence, MIN_FRAME_DURATION, SequentialPattern};
pub use options::{CompressionPolicy, ConvertOptions, OutputFormat, Quality};
pub use pipeline::{BatchReport, ItemResult, ItemStatus, Orchestrator, Outcome};
pub use probe::{MediaInfo, Prober};
pub use progress::{CancellationToken, ProgressCallback, ProgressInfo, Stage};
pub use quantize::Quantizer;
pub use tools::{KNOWN_TOOLS, ToolGateway, ToolOutput};
