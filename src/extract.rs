//! Frame extraction.
//!
//! The [`Extractor`] turns a classified source into either a canonical
//! [`FrameSequence`] or a stream of [`DeltaFrame`]s for the compositor. It
//! walks the source kind's strategy list (see [`crate::chain`]) in order:
//! a strategy failure is logged and accumulated, and only when every
//! strategy has failed does the item fail, with one
//! [`AnimorphError::DecodeUnavailable`] naming everything that was tried.
//!
//! Strategy scratch output is isolated per attempt so a failed attempt
//! never leaves stray frames behind for the next one.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Duration,
};

use image::{
    AnimationDecoder,
    codecs::{gif::GifDecoder, png::PngDecoder, webp::WebPDecoder},
};
use serde::Deserialize;
use tokio::task::JoinSet;

use crate::{
    chain::{self, DecodeStrategy},
    classify::{SourceDescriptor, SourceKind, numeric_suffix},
    compose::{BlendOp, DeltaFrame, DisposeOp},
    error::{AnimorphError, Warning},
    frame::{Frame, FrameSequence, clamp_duration, pad6},
    probe::Prober,
    progress::CancellationToken,
    tools::ToolGateway,
};

/// Frame rate assumed for sources that declare none.
const DEFAULT_FRAME_RATE: f64 = 25.0;

/// How many per-frame tool invocations run concurrently.
const PER_FRAME_BATCH: usize = 5;

/// What a decode produced.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// Fully composited, canvas-sized frames.
    Canonical(FrameSequence),
    /// Delta frames that must be replayed before encoding.
    Deltas {
        /// The ordered delta stream.
        deltas: Vec<DeltaFrame>,
        /// Canvas width from the container header.
        width: u32,
        /// Canvas height from the container header.
        height: u32,
        /// Nominal frame rate derived from the declared durations.
        frame_rate: f64,
        /// Whether the container declares transparency.
        has_alpha: bool,
    },
}

/// Declared geometry carried by a VAP companion file.
#[derive(Debug, Deserialize)]
struct VapSidecar {
    info: Option<VapInfo>,
}

#[derive(Debug, Deserialize)]
struct VapInfo {
    w: Option<u32>,
    h: Option<u32>,
    fps: Option<f64>,
}

/// Decodes sources into frames via the per-kind strategy chain.
#[derive(Debug, Clone)]
pub struct Extractor {
    gateway: ToolGateway,
    prober: Prober,
}

impl Extractor {
    /// Create an extractor using the given gateway for external tools.
    pub fn new(gateway: ToolGateway) -> Self {
        let prober = Prober::new(gateway.clone());
        Self { gateway, prober }
    }

    /// Decode `source`, writing frame bitmaps under `work_dir`.
    ///
    /// `frame_rate` overrides the source's own rate for strategies that
    /// resample (the ffmpeg batch path). Non-fatal findings are appended to
    /// `warnings`.
    pub async fn decode(
        &self,
        source: &SourceDescriptor,
        work_dir: &Path,
        frame_rate: Option<f64>,
        token: &CancellationToken,
        warnings: &mut Vec<Warning>,
    ) -> Result<DecodeOutcome, AnimorphError> {
        if source.kind == SourceKind::PngSequence {
            return self
                .stage_bitmap_sequence(source, work_dir, frame_rate)
                .await
                .map(DecodeOutcome::Canonical);
        }

        let strategies = chain::strategies_for(source.kind);
        let mut failures: Vec<String> = Vec::new();

        for strategy in strategies {
            if token.is_cancelled() {
                return Err(AnimorphError::Cancelled);
            }

            let attempt_dir = work_dir.join(attempt_dir_name(*strategy));
            tokio::fs::create_dir_all(&attempt_dir).await?;

            let result = match strategy {
                DecodeStrategy::Native => self.decode_native(source, &attempt_dir).await,
                DecodeStrategy::ExternalBatch => {
                    self.decode_batch(source, &attempt_dir, frame_rate, warnings)
                        .await
                }
                DecodeStrategy::ExternalPerFrame => {
                    self.decode_per_frame(source, &attempt_dir).await
                }
                DecodeStrategy::ExternalRenderer => {
                    self.decode_renderer(source, &attempt_dir, frame_rate).await
                }
            };

            match result {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    log::warn!(
                        "{}: {:?} decode failed: {err}",
                        source.path.display(),
                        strategy
                    );
                    failures.push(format!("{strategy:?}: {err}"));
                    // Never leave a failed attempt's frames where the next
                    // attempt (or the assembler) could pick them up.
                    let _ = tokio::fs::remove_dir_all(&attempt_dir).await;
                }
            }
        }

        Err(AnimorphError::DecodeUnavailable {
            reason: if failures.is_empty() {
                format!("no decode strategy exists for {:?}", source.kind)
            } else {
                failures.join("; ")
            },
        })
    }

    /// A bitmap sequence is already canonical; copy it into the work dir
    /// under the standard numbering so downstream batch encoders get a
    /// sequential pattern.
    async fn stage_bitmap_sequence(
        &self,
        source: &SourceDescriptor,
        work_dir: &Path,
        frame_rate: Option<f64>,
    ) -> Result<FrameSequence, AnimorphError> {
        if source.file_list.is_empty() {
            return Err(AnimorphError::InvalidInput {
                path: source.path.clone(),
                reason: "sequence has no frames".into(),
            });
        }

        let (width, height) = image::image_dimensions(&source.path)?;

        let mut staged = Vec::with_capacity(source.file_list.len());
        for (index, original) in source.file_list.iter().enumerate() {
            let target = work_dir.join(format!("frame{}.png", pad6(index as u64 + 1)));
            tokio::fs::copy(original, &target).await?;
            staged.push(target);
        }

        Ok(FrameSequence::uniform(
            staged,
            frame_rate.unwrap_or(DEFAULT_FRAME_RATE),
            width,
            height,
            true,
        ))
    }

    /// In-process decode through the `image` crate. Fully composited frames
    /// come out of the animation decoders directly.
    async fn decode_native(
        &self,
        source: &SourceDescriptor,
        out_dir: &Path,
    ) -> Result<DecodeOutcome, AnimorphError> {
        let kind = source.kind;
        let input = source.path.clone();
        let out_dir = out_dir.to_path_buf();

        // Decoding a whole animation is CPU-bound; keep it off the runtime
        // threads.
        let sequence = tokio::task::spawn_blocking(move || -> Result<FrameSequence, AnimorphError> {
            let reader = BufReader::new(File::open(&input)?);
            let frames = match kind {
                SourceKind::Gif => GifDecoder::new(reader)?.into_frames().collect_frames()?,
                SourceKind::Apng => {
                    let decoder = PngDecoder::new(reader)?;
                    if !decoder.is_apng()? {
                        return Err(AnimorphError::InvalidInput {
                            path: input,
                            reason: "PNG carries no animation chunks".into(),
                        });
                    }
                    decoder.apng()?.into_frames().collect_frames()?
                }
                SourceKind::Webp => {
                    let decoder = WebPDecoder::new(reader)?;
                    if !decoder.has_animation() {
                        return Err(AnimorphError::InvalidInput {
                            path: input,
                            reason: "WebP is a still image".into(),
                        });
                    }
                    decoder.into_frames().collect_frames()?
                }
                other => {
                    return Err(AnimorphError::DecodeUnavailable {
                        reason: format!("no in-process decoder for {other:?}"),
                    });
                }
            };

            if frames.is_empty() {
                return Err(AnimorphError::InvalidInput {
                    path: input,
                    reason: "container declares zero frames".into(),
                });
            }

            let (width, height) = {
                let first = frames[0].buffer();
                (first.width(), first.height())
            };

            let mut out = Vec::with_capacity(frames.len());
            for (index, frame) in frames.into_iter().enumerate() {
                let duration = clamp_duration(Duration::from(frame.delay()));
                let path = out_dir.join(format!("frame{}.png", pad6(index as u64 + 1)));
                frame.into_buffer().save(&path)?;
                out.push(Frame {
                    index: index as u64,
                    path,
                    duration,
                });
            }

            let total: Duration = out.iter().map(|f| f.duration).sum();
            Ok(FrameSequence {
                frame_rate: rate_from_total(out.len(), total),
                frames: out,
                width,
                height,
                has_alpha: true,
            })
        })
        .await
        .map_err(|err| AnimorphError::Io(std::io::Error::other(err)))??;

        Ok(DecodeOutcome::Canonical(sequence))
    }

    /// One-shot ffmpeg extraction to a numbered pattern.
    async fn decode_batch(
        &self,
        source: &SourceDescriptor,
        out_dir: &Path,
        frame_rate: Option<f64>,
        warnings: &mut Vec<Warning>,
    ) -> Result<DecodeOutcome, AnimorphError> {
        let mut info = self.prober.probe(&source.path).await?;

        // A VAP companion file outranks probed geometry.
        let mut sidecar_rate = None;
        if let Some(sidecar) = &source.sidecar {
            match read_vap_sidecar(sidecar).await {
                Ok(Some(vap)) => {
                    if let (Some(w), Some(h)) = (vap.w, vap.h) {
                        info.width = w;
                        info.height = h;
                    }
                    sidecar_rate = vap.fps;
                }
                Ok(None) => {}
                Err(err) => {
                    log::warn!("{}: unreadable companion file: {err}", sidecar.display());
                }
            }
        }

        let rate = frame_rate
            .or(sidecar_rate)
            .unwrap_or(info.frame_rate)
            .max(1.0);
        let pattern = out_dir.join("frame%06d.png");

        let mut args: Vec<std::ffi::OsString> = vec![
            "-hide_banner".into(),
            "-y".into(),
            "-i".into(),
            source.path.as_os_str().into(),
            "-vf".into(),
            format!("fps={rate}:round=down").into(),
            "-vsync".into(),
            "0".into(),
        ];
        if info.has_alpha {
            // Only force RGBA for sources that actually carry alpha; on
            // opaque sources it turns pure white/black transparent.
            args.push("-pix_fmt".into());
            args.push("rgba".into());
        }
        args.push("-c:v".into());
        args.push("png".into());
        args.push(pattern.into_os_string());

        self.gateway.run("ffmpeg", &args, None).await?;

        let produced = collect_numbered_pngs(out_dir)?;
        if produced.is_empty() {
            return Err(AnimorphError::DecodeUnavailable {
                reason: format!("ffmpeg produced no frames for {}", source.path.display()),
            });
        }

        if let Some(expected) = info.estimated_frames(rate) {
            let actual = produced.len() as u64;
            if expected > 0 && expected != actual {
                log::warn!(
                    "{}: expected {expected} frames, got {actual}; continuing",
                    source.path.display()
                );
                warnings.push(Warning::FrameCountMismatch { expected, actual });
            }
        }

        Ok(DecodeOutcome::Canonical(FrameSequence::uniform(
            produced,
            rate,
            info.width,
            info.height,
            info.has_alpha,
        )))
    }

    /// Per-frame demux (`webpmux -get frame`) plus `dwebp` decode, bounded
    /// to small concurrent batches. Yields deltas for the compositor.
    async fn decode_per_frame(
        &self,
        source: &SourceDescriptor,
        out_dir: &Path,
    ) -> Result<DecodeOutcome, AnimorphError> {
        let info = self
            .gateway
            .run("webpmux", &["-info".as_ref(), source.path.as_os_str()], None)
            .await?;
        let mux = parse_webpmux_info(&info.stdout).ok_or_else(|| {
            AnimorphError::ProbeFailed(format!(
                "unrecognized webpmux output for {}",
                source.path.display()
            ))
        })?;

        if mux.frames.is_empty() {
            return Err(AnimorphError::InvalidInput {
                path: source.path.clone(),
                reason: "animation declares zero frames".into(),
            });
        }

        for batch in mux.frames.chunks(PER_FRAME_BATCH) {
            let mut set = JoinSet::new();
            for entry in batch {
                let gateway = self.gateway.clone();
                let input = source.path.clone();
                let number = entry.number;
                let raw = out_dir.join(format!("raw{}.webp", pad6(number)));
                let png = out_dir.join(format!("delta{}.png", pad6(number)));
                set.spawn(async move { demux_one(&gateway, &input, number, &raw, &png).await });
            }
            while let Some(joined) = set.join_next().await {
                joined.map_err(|err| AnimorphError::Io(std::io::Error::other(err)))??;
            }
        }

        let total: Duration = mux.frames.iter().map(|f| f.duration).sum();
        let frame_rate = rate_from_total(mux.frames.len(), total);

        let deltas = mux
            .frames
            .iter()
            .map(|entry| DeltaFrame {
                bitmap: out_dir.join(format!("delta{}.png", pad6(entry.number))),
                width: entry.width,
                height: entry.height,
                x_offset: entry.x_offset,
                y_offset: entry.y_offset,
                duration: entry.duration,
                dispose: entry.dispose,
                blend: entry.blend,
            })
            .collect();

        Ok(DecodeOutcome::Deltas {
            deltas,
            width: mux.canvas_width,
            height: mux.canvas_height,
            frame_rate,
            has_alpha: mux.has_alpha,
        })
    }

    /// Render a vector animation through its external renderer.
    async fn decode_renderer(
        &self,
        source: &SourceDescriptor,
        out_dir: &Path,
        frame_rate: Option<f64>,
    ) -> Result<DecodeOutcome, AnimorphError> {
        let tool = chain::renderer_tool(source.kind).ok_or_else(|| {
            AnimorphError::DecodeUnavailable {
                reason: format!("no renderer registered for {:?}", source.kind),
            }
        })?;
        if !self.gateway.is_available(tool) {
            return Err(AnimorphError::DecodeUnavailable {
                reason: format!(
                    "{:?} needs the '{tool}' renderer, which was not found",
                    source.kind
                ),
            });
        }

        self.gateway
            .run(tool, &[source.path.as_os_str(), out_dir.as_os_str()], None)
            .await?;

        let produced = collect_numbered_pngs(out_dir)?;
        let Some(first) = produced.first() else {
            return Err(AnimorphError::DecodeUnavailable {
                reason: format!("'{tool}' produced no frames"),
            });
        };
        let (width, height) = image::image_dimensions(first)?;

        let rate = match frame_rate {
            Some(rate) => rate,
            None => declared_vector_rate(source).await.unwrap_or(30.0),
        };

        Ok(DecodeOutcome::Canonical(FrameSequence::uniform(
            produced, rate, width, height, true,
        )))
    }
}

async fn demux_one(
    gateway: &ToolGateway,
    input: &Path,
    number: u64,
    raw: &Path,
    png: &Path,
) -> Result<(), AnimorphError> {
    gateway
        .run(
            "webpmux",
            &[
                "-get".as_ref(),
                "frame".as_ref(),
                number.to_string().as_ref(),
                input.as_os_str(),
                "-o".as_ref(),
                raw.as_os_str(),
            ],
            None,
        )
        .await?;
    gateway
        .run(
            "dwebp",
            &[raw.as_os_str(), "-o".as_ref(), png.as_os_str()],
            None,
        )
        .await?;
    Ok(())
}

async fn read_vap_sidecar(path: &Path) -> Result<Option<VapInfo>, AnimorphError> {
    let data = tokio::fs::read_to_string(path).await?;
    let sidecar: VapSidecar = serde_json::from_str(&data)?;
    Ok(sidecar.info)
}

/// A Lottie document's own `fr` field, when readable.
async fn declared_vector_rate(source: &SourceDescriptor) -> Option<f64> {
    if source.kind != SourceKind::Lottie {
        return None;
    }

    #[derive(Deserialize)]
    struct FrOnly {
        fr: Option<f64>,
    }

    let data = tokio::fs::read_to_string(&source.path).await.ok()?;
    let doc: FrOnly = serde_json::from_str(&data).ok()?;
    doc.fr.filter(|fr| *fr > 0.0)
}

fn attempt_dir_name(strategy: DecodeStrategy) -> &'static str {
    match strategy {
        DecodeStrategy::Native => "native",
        DecodeStrategy::ExternalBatch => "batch",
        DecodeStrategy::ExternalPerFrame => "perframe",
        DecodeStrategy::ExternalRenderer => "rendered",
    }
}

fn rate_from_total(count: usize, total: Duration) -> f64 {
    if total.is_zero() {
        DEFAULT_FRAME_RATE
    } else {
        count as f64 / total.as_secs_f64()
    }
}

/// PNG files in `dir` with a numeric suffix, sorted by that number.
fn collect_numbered_pngs(dir: &Path) -> Result<Vec<PathBuf>, AnimorphError> {
    let mut numbered = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_png = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("png"));
        if !is_png {
            continue;
        }
        if let Some((_, number)) = numeric_suffix(&path) {
            numbered.push((number, path));
        }
    }
    numbered.sort_by_key(|(number, _)| *number);
    Ok(numbered.into_iter().map(|(_, path)| path).collect())
}

#[derive(Debug)]
struct MuxInfo {
    canvas_width: u32,
    canvas_height: u32,
    has_alpha: bool,
    frames: Vec<MuxFrame>,
}

#[derive(Debug)]
struct MuxFrame {
    number: u64,
    width: u32,
    height: u32,
    x_offset: u32,
    y_offset: u32,
    duration: Duration,
    dispose: DisposeOp,
    blend: BlendOp,
}

/// Parse `webpmux -info` output: the canvas line plus one row per frame.
fn parse_webpmux_info(stdout: &str) -> Option<MuxInfo> {
    let mut canvas = None;
    let mut has_alpha = false;
    let mut frames = Vec::new();

    for line in stdout.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Canvas size:") {
            let mut dims = rest.split('x').map(str::trim);
            let width: u32 = dims.next()?.parse().ok()?;
            let height: u32 = dims.next()?.parse().ok()?;
            canvas = Some((width, height));
            continue;
        }
        if let Some(features) = line.strip_prefix("Features present:") {
            has_alpha = features.contains("transparency");
            continue;
        }
        if let Some(frame) = parse_mux_frame_line(line) {
            frames.push(frame);
        }
    }

    let (canvas_width, canvas_height) = canvas?;
    Some(MuxInfo {
        canvas_width,
        canvas_height,
        has_alpha,
        frames,
    })
}

/// One frame row: `No.: width height alpha x_offset y_offset duration
/// dispose blend image_size compression`.
fn parse_mux_frame_line(line: &str) -> Option<MuxFrame> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 9 {
        return None;
    }
    let number: u64 = tokens[0].strip_suffix(':')?.parse().ok()?;

    Some(MuxFrame {
        number,
        width: tokens[1].parse().ok()?,
        height: tokens[2].parse().ok()?,
        x_offset: tokens[4].parse().ok()?,
        y_offset: tokens[5].parse().ok()?,
        duration: Duration::from_millis(tokens[6].parse().ok()?),
        dispose: match tokens[7] {
            "none" => DisposeOp::None,
            "background" => DisposeOp::Background,
            _ => return None,
        },
        blend: match tokens[8] {
            "yes" => BlendOp::Over,
            "no" => BlendOp::Source,
            _ => return None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MUX_INFO: &str = "\
Canvas size: 400 x 300
Features present: animation transparency
Background color : 0xFFFFFFFF  Loop Count : 0
Number of frames: 3
No.: width height alpha x_offset y_offset duration   dispose blend image_size  compression
  1:   400    300    no        0        0       100      none    no       1032     lossless
  2:   200    150   yes        3        5        40 background   yes        640        lossy
  3:   200    150   yes       10       10         0      none   yes        512        lossy
";

    #[test]
    fn mux_info_parses() {
        let mux = parse_webpmux_info(MUX_INFO).expect("parses");
        assert_eq!((mux.canvas_width, mux.canvas_height), (400, 300));
        assert!(mux.has_alpha);
        assert_eq!(mux.frames.len(), 3);

        let second = &mux.frames[1];
        assert_eq!(second.number, 2);
        assert_eq!((second.width, second.height), (200, 150));
        assert_eq!((second.x_offset, second.y_offset), (3, 5));
        assert_eq!(second.duration, Duration::from_millis(40));
        assert_eq!(second.dispose, DisposeOp::Background);
        assert_eq!(second.blend, BlendOp::Over);

        assert_eq!(mux.frames[2].duration, Duration::ZERO);
        assert_eq!(mux.frames[0].blend, BlendOp::Source);
    }

    #[test]
    fn opaque_animations_are_flagged() {
        let info = "\
Canvas size: 64 x 64
Features present: animation
Number of frames: 1
No.: width height alpha x_offset y_offset duration   dispose blend image_size  compression
  1:    64     64    no        0        0       100      none    no        512     lossless
";
        let mux = parse_webpmux_info(info).expect("parses");
        assert!(!mux.has_alpha);
    }

    #[test]
    fn rate_derivation() {
        assert_eq!(rate_from_total(10, Duration::ZERO), DEFAULT_FRAME_RATE);
        let rate = rate_from_total(10, Duration::from_millis(400));
        assert!((rate - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn header_lines_are_not_frames() {
        assert!(parse_mux_frame_line("Number of frames: 3").is_none());
        assert!(
            parse_mux_frame_line(
                "No.: width height alpha x_offset y_offset duration dispose blend size comp"
            )
            .is_none()
        );
    }
}
