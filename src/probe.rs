//! Media probing.
//!
//! [`Prober`] extracts stream metadata (dimensions, frame rate, duration,
//! alpha presence) from video containers. It asks `ffprobe` for JSON first;
//! when that fails it falls back to scraping the banner `ffmpeg -i` prints
//! to stderr, which is less precise but survives broken ffprobe installs.

use std::{collections::HashMap, path::Path, time::Duration};

use serde::Deserialize;

use crate::{error::AnimorphError, tools::ToolGateway};

/// Pixel formats that carry an alpha plane.
const ALPHA_PIX_FMTS: &[&str] = &[
    "yuva420p", "yuva422p", "yuva444p", "yuva420p10le", "rgba", "bgra", "argb", "abgr", "gbrap",
    "ya8", "ya16le", "ya16be", "rgba64le", "rgba64be",
];

/// Metadata for the primary video stream of a container.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Nominal frame rate in frames per second.
    pub frame_rate: f64,
    /// Stream or container duration, when declared.
    pub duration: Option<Duration>,
    /// Declared frame count, when the container carries one.
    pub frame_count: Option<u64>,
    /// Whether the stream's pixel format (or an `alpha_mode` tag) declares
    /// an alpha channel.
    pub has_alpha: bool,
    /// Codec name, when known.
    pub codec: Option<String>,
}

impl MediaInfo {
    /// Frames expected from the metadata: the declared count when present,
    /// otherwise `floor(duration × frame_rate)`.
    ///
    /// The extractor treats this as an estimate only; a mismatch with the
    /// actual extraction is a warning, not an error.
    pub fn estimated_frames(&self, frame_rate: f64) -> Option<u64> {
        if let Some(count) = self.frame_count {
            return Some(count);
        }
        self.duration
            .map(|d| (d.as_secs_f64() * frame_rate).floor() as u64)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeDoc {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
    pix_fmt: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Probes video containers through the configured tool gateway.
#[derive(Debug, Clone)]
pub struct Prober {
    gateway: ToolGateway,
}

impl Prober {
    /// Create a prober using the given gateway for tool access.
    pub fn new(gateway: ToolGateway) -> Self {
        Self { gateway }
    }

    /// Probe `path` for its primary video stream.
    ///
    /// Returns [`AnimorphError::NoVideoStream`] for audio-only files and
    /// [`AnimorphError::ProbeFailed`] when neither probe path yields usable
    /// metadata.
    pub async fn probe(&self, path: &Path) -> Result<MediaInfo, AnimorphError> {
        match self.probe_json(path).await {
            Ok(info) => Ok(info),
            Err(err @ AnimorphError::NoVideoStream { .. }) => Err(err),
            Err(err @ AnimorphError::Cancelled) => Err(err),
            Err(err) => {
                log::debug!("ffprobe failed for {} ({err}), trying ffmpeg banner", path.display());
                self.probe_banner(path).await
            }
        }
    }

    async fn probe_json(&self, path: &Path) -> Result<MediaInfo, AnimorphError> {
        let output = self
            .gateway
            .run(
                "ffprobe",
                &[
                    "-v".as_ref(),
                    "error".as_ref(),
                    "-show_streams".as_ref(),
                    "-show_format".as_ref(),
                    "-of".as_ref(),
                    "json".as_ref(),
                    path.as_os_str(),
                ],
                None,
            )
            .await?;

        let doc: ProbeDoc = serde_json::from_str(&output.stdout)?;
        let had_streams = !doc.streams.is_empty();
        let stream = doc
            .streams
            .into_iter()
            .find(|s| s.codec_type.as_deref() == Some("video"));
        let Some(stream) = stream else {
            return if had_streams {
                Err(AnimorphError::NoVideoStream { path: path.into() })
            } else {
                Err(AnimorphError::ProbeFailed(format!(
                    "ffprobe reported no streams for {}",
                    path.display()
                )))
            };
        };

        let (width, height) = match (stream.width, stream.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => {
                return Err(AnimorphError::ProbeFailed(format!(
                    "video stream in {} has no dimensions",
                    path.display()
                )));
            }
        };

        let frame_rate = stream
            .avg_frame_rate
            .as_deref()
            .and_then(parse_rational)
            .filter(|r| *r > 0.0)
            .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rational))
            .unwrap_or(25.0);

        let duration = stream
            .duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok())
            .or_else(|| {
                doc.format
                    .and_then(|f| f.duration)
                    .and_then(|d| d.parse().ok())
            })
            .filter(|d| *d > 0.0)
            .map(Duration::from_secs_f64);

        let has_alpha = stream
            .pix_fmt
            .as_deref()
            .is_some_and(pix_fmt_has_alpha)
            || stream.tags.get("alpha_mode").map(String::as_str) == Some("1");

        Ok(MediaInfo {
            width,
            height,
            frame_rate,
            duration,
            frame_count: stream.nb_frames.and_then(|n| n.parse().ok()),
            has_alpha,
            codec: stream.codec_name,
        })
    }

    /// Scrape `ffmpeg -i` stderr. ffmpeg exits non-zero without an output
    /// file, so the banner arrives inside the failure variant.
    async fn probe_banner(&self, path: &Path) -> Result<MediaInfo, AnimorphError> {
        let banner = match self
            .gateway
            .run(
                "ffmpeg",
                &["-hide_banner".as_ref(), "-i".as_ref(), path.as_os_str()],
                None,
            )
            .await
        {
            Ok(output) => output.stderr,
            Err(AnimorphError::ToolFailure { stderr, .. }) => stderr,
            Err(err) => return Err(err),
        };

        parse_banner(&banner).ok_or_else(|| {
            if banner.contains("Audio:") && !banner.contains("Video:") {
                AnimorphError::NoVideoStream { path: path.into() }
            } else {
                AnimorphError::ProbeFailed(format!(
                    "could not interpret media info for {}",
                    path.display()
                ))
            }
        })
    }
}

/// Parse an ffprobe rational like `30000/1001`.
fn parse_rational(value: &str) -> Option<f64> {
    match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => value.parse().ok(),
    }
}

fn pix_fmt_has_alpha(pix_fmt: &str) -> bool {
    ALPHA_PIX_FMTS.contains(&pix_fmt)
}

/// Parse the `Duration:` and `Video:` lines of an ffmpeg banner.
fn parse_banner(stderr: &str) -> Option<MediaInfo> {
    let video_line = stderr.lines().find(|l| l.contains("Video:"))?;
    let detail = video_line.split("Video:").nth(1)?;

    let mut width = 0u32;
    let mut height = 0u32;
    let mut frame_rate = None;
    let mut pix_fmt = None;
    let mut codec = None;

    for (index, token) in detail.split(',').enumerate() {
        let token = token.trim();
        if index == 0 {
            codec = token.split_whitespace().next().map(str::to_string);
        }
        if let Some((w, h)) = parse_dimensions(token) {
            width = w;
            height = h;
        } else if let Some(rate) = token
            .strip_suffix(" fps")
            .or_else(|| token.strip_suffix(" tbr"))
        {
            if frame_rate.is_none() {
                frame_rate = rate.trim().parse::<f64>().ok();
            }
        } else if index == 1 {
            // The pixel-format token may carry a color-range note, e.g.
            // `yuva420p(tv)`.
            pix_fmt = token.split(['(', ' ']).next().map(str::to_string);
        }
    }

    if width == 0 || height == 0 {
        return None;
    }

    let duration = stderr
        .lines()
        .find_map(|l| l.trim().strip_prefix("Duration: "))
        .and_then(|rest| rest.split(',').next())
        .and_then(parse_timestamp);

    Some(MediaInfo {
        width,
        height,
        frame_rate: frame_rate.unwrap_or(25.0),
        duration,
        frame_count: None,
        has_alpha: pix_fmt.as_deref().is_some_and(pix_fmt_has_alpha),
        codec,
    })
}

/// Parse a `640x480` dimension token, tolerating a trailing aspect note
/// like `640x480 [SAR 1:1 DAR 4:3]`.
fn parse_dimensions(token: &str) -> Option<(u32, u32)> {
    let core = token.split_whitespace().next()?;
    let (w, h) = core.split_once('x')?;
    let w: u32 = w.parse().ok()?;
    let h: u32 = h.parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

/// Parse an ffmpeg `HH:MM:SS.cc` timestamp.
fn parse_timestamp(value: &str) -> Option<Duration> {
    let mut parts = value.trim().splitn(3, ':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    Some(Duration::from_secs_f64(
        (hours * 3600 + minutes * 60) as f64 + seconds,
    ))
}
