//! Delta-frame replay.
//!
//! Incrementally encoded containers (animated WebP, APNG) store many frames
//! as sub-canvas fragments with offsets plus dispose/blend instructions.
//! The [`Compositor`] replays such a delta stream onto a persistent RGBA
//! canvas and writes one full, canvas-sized bitmap per input frame.
//!
//! Replay is deterministic: the same delta stream always produces
//! byte-identical frames.

use std::path::{Path, PathBuf};

use image::{Rgba, RgbaImage, imageops};

use crate::{
    error::AnimorphError,
    frame::{Frame, FrameSequence, clamp_duration, pad6},
};

/// How the region a frame occupied is treated before the next frame draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisposeOp {
    /// Leave the canvas as-is.
    #[default]
    None,
    /// Clear the frame's rectangle to fully transparent black.
    Background,
    /// Revert the rectangle to its pre-frame content.
    ///
    /// Downgraded to [`DisposeOp::Background`] at replay time; see
    /// [`Compositor::replay`].
    Previous,
}

/// How a frame's pixels combine with the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendOp {
    /// Replace the rectangle outright, alpha included.
    Source,
    /// Alpha-composite over the existing canvas content.
    #[default]
    Over,
}

/// One delta frame: a sub-canvas bitmap fragment plus placement and
/// replay instructions.
#[derive(Debug, Clone)]
pub struct DeltaFrame {
    /// Path to the decoded fragment bitmap (any size up to the canvas).
    pub bitmap: PathBuf,
    /// Declared fragment width.
    pub width: u32,
    /// Declared fragment height.
    pub height: u32,
    /// Horizontal placement on the canvas.
    pub x_offset: u32,
    /// Vertical placement on the canvas.
    pub y_offset: u32,
    /// Declared display duration (zero allowed; clamped during replay).
    pub duration: std::time::Duration,
    /// Disposal instruction.
    pub dispose: DisposeOp,
    /// Blend instruction.
    pub blend: BlendOp,
}

/// Normalize a fragment offset to even alignment.
///
/// Chroma-subsampled fragments cannot sit at odd offsets; an odd value is
/// decremented by one. Returns the corrected value and whether a
/// correction was applied.
pub fn normalize_offset(offset: u32) -> (u32, bool) {
    if offset % 2 == 1 {
        (offset - 1, true)
    } else {
        (offset, false)
    }
}

/// Whether a delta stream needs no replay at all.
///
/// When every frame covers the full canvas at the origin with dispose
/// `None`, each delta already *is* its final frame; the fragments can be
/// decoded in parallel and used directly, skipping the sequential canvas
/// walk.
pub fn is_direct_stream(deltas: &[DeltaFrame], width: u32, height: u32) -> bool {
    deltas.iter().all(|d| {
        d.dispose == DisposeOp::None
            && d.x_offset == 0
            && d.y_offset == 0
            && d.width == width
            && d.height == height
    })
}

/// Replays delta streams onto a persistent canvas.
///
/// One compositor per conversion item; the canvas dimensions come from the
/// container header.
#[derive(Debug)]
pub struct Compositor {
    width: u32,
    height: u32,
}

impl Compositor {
    /// Create a compositor for a canvas of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Replay `deltas` in order and write one canvas-sized PNG per delta
    /// into `out_dir`, named `frame000001.png` onward.
    ///
    /// Replay rules:
    /// - a frame's rectangle is cleared *before the next frame draws* when
    ///   its dispose op is `Background`;
    /// - `Previous` dispose is downgraded to `Background` (logged) rather
    ///   than keeping per-frame canvas snapshots;
    /// - odd offsets are decremented to even (logged);
    /// - zero durations come out clamped to the format minimum.
    pub fn replay(
        &self,
        deltas: &[DeltaFrame],
        out_dir: &Path,
        frame_rate: f64,
        has_alpha: bool,
    ) -> Result<FrameSequence, AnimorphError> {
        std::fs::create_dir_all(out_dir)?;

        let mut canvas = RgbaImage::from_pixel(self.width, self.height, Rgba([0, 0, 0, 0]));
        let mut pending_clear: Option<(u32, u32, u32, u32)> = None;
        let mut frames = Vec::with_capacity(deltas.len());

        for (index, delta) in deltas.iter().enumerate() {
            if let Some((x, y, w, h)) = pending_clear.take() {
                clear_rect(&mut canvas, x, y, w, h);
            }

            let fragment = image::open(&delta.bitmap)?.into_rgba8();

            let (x, fixed_x) = normalize_offset(delta.x_offset);
            let (y, fixed_y) = normalize_offset(delta.y_offset);
            if fixed_x || fixed_y {
                log::warn!(
                    "frame {}: odd offset ({}, {}) corrected to ({x}, {y})",
                    index + 1,
                    delta.x_offset,
                    delta.y_offset
                );
            }

            match delta.blend {
                BlendOp::Over => imageops::overlay(&mut canvas, &fragment, x as i64, y as i64),
                BlendOp::Source => imageops::replace(&mut canvas, &fragment, x as i64, y as i64),
            }

            let dispose = match delta.dispose {
                DisposeOp::Previous => {
                    log::warn!(
                        "frame {}: dispose-to-previous downgraded to dispose-to-background",
                        index + 1
                    );
                    DisposeOp::Background
                }
                other => other,
            };
            if dispose == DisposeOp::Background {
                pending_clear = Some((x, y, fragment.width(), fragment.height()));
            }

            let path = out_dir.join(format!("frame{}.png", pad6(index as u64 + 1)));
            canvas.save(&path)?;
            frames.push(Frame {
                index: index as u64,
                path,
                duration: clamp_duration(delta.duration),
            });
        }

        Ok(FrameSequence {
            frames,
            frame_rate,
            width: self.width,
            height: self.height,
            has_alpha,
        })
    }
}

fn clear_rect(canvas: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32) {
    let x_end = (x + w).min(canvas.width());
    let y_end = (y + h).min(canvas.height());
    for py in y..y_end {
        for px in x..x_end {
            canvas.put_pixel(px, py, Rgba([0, 0, 0, 0]));
        }
    }
}
