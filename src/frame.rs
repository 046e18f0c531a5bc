//! The canonical frame sequence.
//!
//! Every decoder produces, and every encoder consumes, a [`FrameSequence`]:
//! ordered, absolute RGBA bitmap files with per-frame display durations.
//! Frames here are never deltas — delta containers go through the
//! [`Compositor`](crate::Compositor) first.

use std::{path::PathBuf, time::Duration};

/// Minimum display duration. Delta formats treat a declared zero as 10 ms.
pub const MIN_FRAME_DURATION: Duration = Duration::from_millis(10);

/// Clamp a declared duration to the format minimum.
///
/// APNG and WebP both specify that a zero delay is to be rendered as 10 ms;
/// normalizing here keeps every downstream encoder agreement-free.
pub fn clamp_duration(duration: Duration) -> Duration {
    if duration.is_zero() {
        MIN_FRAME_DURATION
    } else {
        duration
    }
}

/// Zero-pad a 1-based frame number to the fixed 6-digit naming scheme.
///
/// Supports up to 999,999 frames; every frame file the crate writes or
/// globs uses this width.
pub fn pad6(frame_number: u64) -> String {
    format!("{frame_number:06}")
}

/// One canonical frame: an absolute RGBA bitmap file plus display duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Zero-based position in the sequence.
    pub index: u64,
    /// Path to the frame's PNG bitmap, canvas-sized and fully composited.
    pub path: PathBuf,
    /// Display duration, already clamped (never zero).
    pub duration: Duration,
}

/// The format-agnostic intermediate representation all encoders consume.
///
/// Exactly one canonical sequence exists per conversion item at any time:
/// each decode attempt writes into its own scratch subdirectory, and a
/// failed attempt's bitmaps are removed before the next attempt runs.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    /// Ordered frames.
    pub frames: Vec<Frame>,
    /// Nominal frame rate in frames per second.
    pub frame_rate: f64,
    /// Canvas width in pixels.
    pub width: u32,
    /// Canvas height in pixels.
    pub height: u32,
    /// Whether the source carried an alpha channel.
    ///
    /// Threaded through to the assembler: forcing an alpha pixel format on
    /// an opaque source makes encoders treat pure white/black as
    /// transparent.
    pub has_alpha: bool,
}

impl FrameSequence {
    /// Build a sequence with a uniform per-frame duration of
    /// `1 / frame_rate` seconds.
    pub fn uniform(
        paths: Vec<PathBuf>,
        frame_rate: f64,
        width: u32,
        height: u32,
        has_alpha: bool,
    ) -> Self {
        let duration = clamp_duration(Duration::from_secs_f64(1.0 / frame_rate.max(1.0)));
        let frames = paths
            .into_iter()
            .enumerate()
            .map(|(index, path)| Frame {
                index: index as u64,
                path,
                duration,
            })
            .collect();
        Self {
            frames,
            frame_rate,
            width,
            height,
            has_alpha,
        }
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Total animation duration.
    pub fn total_duration(&self) -> Duration {
        self.frames.iter().map(|f| f.duration).sum()
    }

    /// `true` when the frame files form one `prefixNNNNNN.png` run in a
    /// single directory, numbered consecutively from the first frame.
    ///
    /// Batch encoders (ffmpeg printf patterns) require this layout.
    pub fn is_sequential_pattern(&self) -> Option<SequentialPattern> {
        let first = self.frames.first()?;
        let dir = first.path.parent()?.to_path_buf();
        let name = first.path.file_name()?.to_str()?;
        let stem = name.strip_suffix(".png")?;
        let digit_start = stem.rfind(|c: char| !c.is_ascii_digit()).map_or(0, |i| i + 1);
        let (prefix, digits) = stem.split_at(digit_start);
        if digits.is_empty() {
            return None;
        }
        let width = digits.len();
        let start: u64 = digits.parse().ok()?;

        for (offset, frame) in self.frames.iter().enumerate() {
            if frame.path.parent()? != dir {
                return None;
            }
            let expected = format!("{prefix}{:0width$}.png", start + offset as u64);
            if frame.path.file_name()?.to_str()? != expected {
                return None;
            }
        }

        Some(SequentialPattern {
            dir,
            prefix: prefix.to_string(),
            digits: width,
            start,
        })
    }

}

/// A `prefixNNNNNN.png` run usable as an ffmpeg input pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequentialPattern {
    /// Directory holding the run.
    pub dir: PathBuf,
    /// Filename prefix before the digits.
    pub prefix: String,
    /// Digit-field width.
    pub digits: usize,
    /// Number of the first frame file.
    pub start: u64,
}

impl SequentialPattern {
    /// The printf-style input pattern, e.g. `frame%06d.png`.
    pub fn printf_pattern(&self) -> PathBuf {
        self.dir
            .join(format!("{}%0{}d.png", self.prefix, self.digits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_duration_clamps_to_ten_ms() {
        assert_eq!(clamp_duration(Duration::ZERO), MIN_FRAME_DURATION);
        assert_eq!(
            clamp_duration(Duration::from_millis(40)),
            Duration::from_millis(40)
        );
    }

    #[test]
    fn pad6_widths() {
        assert_eq!(pad6(1), "000001");
        assert_eq!(pad6(999_999), "999999");
        assert_eq!(pad6(1_234_567), "1234567");
    }

    #[test]
    fn sequential_pattern_detected() {
        let paths = (1..=3)
            .map(|i| PathBuf::from(format!("/tmp/run/frame{}.png", pad6(i))))
            .collect();
        let sequence = FrameSequence::uniform(paths, 24.0, 4, 4, true);
        let pattern = sequence.is_sequential_pattern().expect("pattern");
        assert_eq!(pattern.prefix, "frame");
        assert_eq!(pattern.digits, 6);
        assert_eq!(pattern.start, 1);
        assert_eq!(
            pattern.printf_pattern(),
            PathBuf::from("/tmp/run/frame%06d.png")
        );
    }

    #[test]
    fn gapped_run_is_not_sequential() {
        let paths = vec![
            PathBuf::from("/tmp/run/frame000001.png"),
            PathBuf::from("/tmp/run/frame000003.png"),
        ];
        let sequence = FrameSequence::uniform(paths, 24.0, 4, 4, true);
        assert!(sequence.is_sequential_pattern().is_none());
    }
}
