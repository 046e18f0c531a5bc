//! Batch conversion orchestration.
//!
//! The [`Orchestrator`] drives each classified source through the item
//! state machine (`Queued → Decoding → [Compositing] → Assembling → done`)
//! and runs the items of a batch concurrently. The batch join is
//! fail-soft: one item failing, or being skipped, never affects its
//! siblings. Cancellation is batch-wide and cooperative — stages check the
//! token at their boundaries and every live external process is
//! terminated through the gateway.
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> Result<(), animorph::AnimorphError> {
//! use animorph::{
//!     CancellationToken, Classifier, ConvertOptions, Orchestrator, OutputFormat,
//! };
//!
//! let sources = Classifier::new().classify_paths(["sticker.webp"])?;
//! let options = ConvertOptions::new().with_formats([OutputFormat::Apng, OutputFormat::Gif]);
//!
//! let report = Orchestrator::new()
//!     .convert_all(sources, options, CancellationToken::new())
//!     .await;
//! println!("{} of {} succeeded", report.succeeded(), report.items.len());
//! # Ok(())
//! # }
//! ```

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio::task::JoinSet;

use crate::{
    assemble::{Assembler, output_path},
    classify::{SourceDescriptor, SourceKind},
    compose::{Compositor, DeltaFrame, is_direct_stream},
    error::{AnimorphError, Warning},
    extract::{DecodeOutcome, Extractor},
    frame::{Frame, FrameSequence, clamp_duration},
    options::{ConvertOptions, OutputFormat},
    progress::{CancellationToken, NoOpProgress, ProgressCallback, ProgressHandle, Stage},
    quantize::Quantizer,
    tools::ToolGateway,
};

/// How often the batch watchdog polls the cancellation token.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// A successfully converted item.
#[derive(Debug)]
pub struct Outcome {
    /// Paths of every output that was written.
    pub outputs: Vec<PathBuf>,
    /// Non-fatal findings recorded along the way.
    pub warnings: Vec<Warning>,
}

/// Terminal state of one batch item.
#[derive(Debug)]
pub enum ItemStatus {
    /// All requested outputs were written.
    Succeeded(Outcome),
    /// The item failed; the error names the cause.
    Failed(AnimorphError),
    /// The batch was cancelled before or during this item.
    Cancelled,
}

/// One item's result within a batch report.
#[derive(Debug)]
pub struct ItemResult {
    /// The item's position in the submitted batch.
    pub index: usize,
    /// The item's primary input path.
    pub source: PathBuf,
    /// How the item ended.
    pub status: ItemStatus,
}

/// The fail-soft result of a whole batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Per-item results, in submission order.
    pub items: Vec<ItemResult>,
}

impl BatchReport {
    /// Number of items that produced all their outputs.
    pub fn succeeded(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.status, ItemStatus::Succeeded(_)))
            .count()
    }

    /// Number of items that failed.
    pub fn failed(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.status, ItemStatus::Failed(_)))
            .count()
    }

    /// Number of items ended by cancellation.
    pub fn cancelled(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.status, ItemStatus::Cancelled))
            .count()
    }
}

/// Converts batches of classified sources into the requested outputs.
pub struct Orchestrator {
    gateway: ToolGateway,
    progress: Arc<dyn ProgressCallback>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    /// Create an orchestrator with a default gateway and no progress sink.
    pub fn new() -> Self {
        Self {
            gateway: ToolGateway::new(),
            progress: Arc::new(NoOpProgress),
        }
    }

    /// Use a pre-configured tool gateway (overrides, bundled binaries).
    pub fn with_gateway(mut self, gateway: ToolGateway) -> Self {
        self.gateway = gateway;
        self
    }

    /// Install a progress sink; it is invoked from concurrent item tasks.
    pub fn with_progress(mut self, sink: Arc<dyn ProgressCallback>) -> Self {
        self.progress = sink;
        self
    }

    /// Convert every source in the batch.
    ///
    /// Items run concurrently; the report carries one entry per item in
    /// submission order. This never returns an error — per-item failures
    /// live inside the report.
    pub async fn convert_all(
        &self,
        sources: Vec<SourceDescriptor>,
        options: ConvertOptions,
        token: CancellationToken,
    ) -> BatchReport {
        self.gateway.reset_cancel();

        // Bridge the token to the gateway so cancellation reaches every
        // in-flight external process.
        let watchdog = {
            let gateway = self.gateway.clone();
            let token = token.clone();
            tokio::spawn(async move {
                loop {
                    if token.is_cancelled() {
                        let killed = gateway.cancel_all();
                        if killed > 0 {
                            log::info!("cancellation signaled {killed} external processes");
                        }
                        break;
                    }
                    tokio::time::sleep(CANCEL_POLL).await;
                }
            })
        };

        let mut set = JoinSet::new();
        for (index, source) in sources.into_iter().enumerate() {
            let worker = ItemWorker {
                extractor: Extractor::new(self.gateway.clone()),
                assembler: Assembler::new(self.gateway.clone()),
                quantizer: Quantizer::new(self.gateway.clone()),
                options: options.clone(),
                token: token.clone(),
                handle: ProgressHandle {
                    sink: self.progress.clone(),
                    item_index: index,
                },
            };
            set.spawn(async move {
                let source_path = source.path.clone();
                let status = worker.run(source).await;
                (index, source_path, status)
            });
        }

        let mut items = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, source, status)) => items.push(ItemResult {
                    index,
                    source,
                    status,
                }),
                Err(err) => {
                    log::error!("conversion task aborted: {err}");
                }
            }
        }
        items.sort_by_key(|item| item.index);

        watchdog.abort();
        if token.is_cancelled() {
            self.gateway.cancel_all();
        }

        BatchReport { items }
    }
}

struct ItemWorker {
    extractor: Extractor,
    assembler: Assembler,
    quantizer: Quantizer,
    options: ConvertOptions,
    token: CancellationToken,
    handle: ProgressHandle,
}

impl ItemWorker {
    async fn run(&self, source: SourceDescriptor) -> ItemStatus {
        self.handle.emit(Stage::Queued, "waiting", 0.0);

        let mut warnings = Vec::new();
        match self.convert(&source, &mut warnings).await {
            Ok(outputs) => {
                self.handle.emit(Stage::Succeeded, "done", 1.0);
                ItemStatus::Succeeded(Outcome { outputs, warnings })
            }
            Err(err) if err.is_cancelled() => {
                self.handle.emit(Stage::Cancelled, "cancelled", -1.0);
                ItemStatus::Cancelled
            }
            Err(err) => {
                log::error!("{}: conversion failed: {err}", source.path.display());
                self.handle.emit(Stage::Failed, err.to_string(), -1.0);
                ItemStatus::Failed(err)
            }
        }
    }

    async fn convert(
        &self,
        source: &SourceDescriptor,
        warnings: &mut Vec<Warning>,
    ) -> Result<Vec<PathBuf>, AnimorphError> {
        self.checkpoint()?;

        // Scratch space for this item only; removed (best-effort) when the
        // guard drops, success or not.
        let scratch = tempfile::TempDir::new()?;
        let work_dir = scratch.path();

        self.handle
            .emit(Stage::Decoding, decode_message(source), 0.1);
        let outcome = self
            .extractor
            .decode(
                source,
                work_dir,
                self.options.frame_rate,
                &self.token,
                warnings,
            )
            .await?;

        let sequence = match outcome {
            DecodeOutcome::Canonical(sequence) => sequence,
            DecodeOutcome::Deltas {
                deltas,
                width,
                height,
                frame_rate,
                has_alpha,
            } => {
                self.checkpoint()?;
                self.handle.emit(
                    Stage::Compositing,
                    format!("replaying {} delta frames", deltas.len()),
                    0.4,
                );
                self.composite(deltas, width, height, frame_rate, has_alpha, work_dir)
                    .await?
            }
        };

        if sequence.is_empty() {
            return Err(AnimorphError::InvalidInput {
                path: source.path.clone(),
                reason: "decode produced no frames".into(),
            });
        }

        self.checkpoint()?;
        self.handle.emit(
            Stage::Assembling,
            format!("encoding {} frames", sequence.len()),
            0.6,
        );
        self.assemble_all(source, &sequence, work_dir, warnings)
            .await
    }

    /// Replay deltas, or skip the replay entirely when every delta is
    /// already a full canvas frame.
    async fn composite(
        &self,
        deltas: Vec<DeltaFrame>,
        width: u32,
        height: u32,
        frame_rate: f64,
        has_alpha: bool,
        work_dir: &Path,
    ) -> Result<FrameSequence, AnimorphError> {
        if is_direct_stream(&deltas, width, height) {
            log::debug!("all deltas cover the canvas; replay skipped");
            let frames = deltas
                .into_iter()
                .enumerate()
                .map(|(index, delta)| Frame {
                    index: index as u64,
                    path: delta.bitmap,
                    duration: clamp_duration(delta.duration),
                })
                .collect();
            return Ok(FrameSequence {
                frames,
                frame_rate,
                width,
                height,
                has_alpha,
            });
        }

        let out_dir = work_dir.join("composited");
        tokio::task::spawn_blocking(move || {
            Compositor::new(width, height).replay(&deltas, &out_dir, frame_rate, has_alpha)
        })
        .await
        .map_err(|err| AnimorphError::Io(std::io::Error::other(err)))?
    }

    async fn assemble_all(
        &self,
        source: &SourceDescriptor,
        sequence: &FrameSequence,
        work_dir: &Path,
        warnings: &mut Vec<Warning>,
    ) -> Result<Vec<PathBuf>, AnimorphError> {
        let output_dir = output_dir_for(source);
        let name = format!("{}{}", source.output_stem(), self.options.output_suffix);

        let mut outputs = Vec::new();

        // GIF wraps the (quantized) APNG, so the APNG intermediate is
        // built first and sequentially; sequence-only requests never
        // reach this branch.
        let apng_path = if self.options.needs_apng() {
            let apng_requested = self.options.formats.contains(&OutputFormat::Apng);
            let path = if apng_requested {
                output_path(&output_dir, &name, OutputFormat::Apng)
            } else {
                work_dir.join("intermediate.png")
            };
            self.assembler
                .assemble_apng(sequence, &self.options, &path, work_dir)
                .await?;
            self.quantizer
                .optimize(&path, &self.options, warnings)
                .await?;
            if apng_requested {
                outputs.push(path.clone());
            }
            Some(path)
        } else {
            None
        };

        self.checkpoint()?;

        // Remaining targets are independent; run them concurrently.
        let mut set: JoinSet<Result<PathBuf, AnimorphError>> = JoinSet::new();
        for format in self.options.formats.clone() {
            if format == OutputFormat::Apng {
                continue;
            }
            let assembler = self.assembler.clone();
            let options = self.options.clone();
            let sequence = sequence.clone();
            let apng = apng_path.clone();
            let out = output_path(&output_dir, &name, format);
            let name = name.clone();
            set.spawn(async move {
                match format {
                    OutputFormat::Gif => {
                        assembler
                            .assemble_gif(&sequence, apng.as_deref(), &options, &out)
                            .await?
                    }
                    OutputFormat::Webp => {
                        let scratch = tempfile::TempDir::new()?;
                        assembler
                            .assemble_webp(&sequence, &options, &out, scratch.path())
                            .await?
                    }
                    OutputFormat::PngSequence => {
                        assembler
                            .assemble_png_sequence(&sequence, &name, &out)
                            .await?
                    }
                    OutputFormat::JpgSequence => {
                        assembler
                            .assemble_jpg_sequence(&sequence, &options, &name, &out)
                            .await?
                    }
                    OutputFormat::Apng => unreachable!("assembled above"),
                }
                Ok(out)
            });
        }

        while let Some(joined) = set.join_next().await {
            let out = joined.map_err(|err| AnimorphError::Io(std::io::Error::other(err)))??;
            outputs.push(out);
        }

        Ok(outputs)
    }

    fn checkpoint(&self) -> Result<(), AnimorphError> {
        if self.token.is_cancelled() {
            Err(AnimorphError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Outputs land next to the source: for sequences, next to the sequence
/// directory rather than inside it.
fn output_dir_for(source: &SourceDescriptor) -> PathBuf {
    let anchor = source.path.parent().unwrap_or_else(|| Path::new("."));
    if source.kind == SourceKind::PngSequence {
        anchor
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(anchor)
            .to_path_buf()
    } else {
        anchor.to_path_buf()
    }
}

fn decode_message(source: &SourceDescriptor) -> String {
    format!(
        "decoding {} ({:?})",
        source
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.path.display().to_string()),
        source.kind
    )
}
