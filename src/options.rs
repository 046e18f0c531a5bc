//! Conversion configuration.
//!
//! [`ConvertOptions`] is a builder that carries the requested output
//! formats, timing overrides, and quality/compression knobs through the
//! pipeline without polluting every function signature.
//!
//! # Example
//!
//! ```
//! use animorph::{ConvertOptions, OutputFormat, Quality};
//!
//! let options = ConvertOptions::new()
//!     .with_formats([OutputFormat::Webp, OutputFormat::PngSequence])
//!     .with_quality(Quality::target(80))
//!     .with_loop_count(0);
//!
//! assert!(!options.only_sequence_outputs());
//! ```

/// A target container kind for one conversion item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum OutputFormat {
    /// Animated PNG.
    Apng,
    /// Animated GIF (built by wrapping the APNG output).
    Gif,
    /// Animated WebP with per-frame delay/offset/dispose/blend metadata.
    Webp,
    /// A directory of numbered PNG frames.
    PngSequence,
    /// A directory of numbered JPEG frames.
    JpgSequence,
}

impl OutputFormat {
    /// Whether this target is a bitmap sequence rather than a container.
    pub fn is_sequence(self) -> bool {
        matches!(self, OutputFormat::PngSequence | OutputFormat::JpgSequence)
    }

    /// Whether building this target requires the APNG intermediate.
    ///
    /// WebP is muxed directly from the canonical frames; only APNG itself
    /// and GIF (which wraps APNG) need the assembled container.
    pub fn needs_apng(self) -> bool {
        matches!(self, OutputFormat::Apng | OutputFormat::Gif)
    }

    /// File extension for container targets, directory suffix for sequences.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Apng => "png",
            OutputFormat::Gif => "gif",
            OutputFormat::Webp => "webp",
            OutputFormat::PngSequence => "png",
            OutputFormat::JpgSequence => "jpg",
        }
    }

    /// Parse a user-facing format name (CLI `--to` values).
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "apng" | "png" => Some(OutputFormat::Apng),
            "gif" => Some(OutputFormat::Gif),
            "webp" => Some(OutputFormat::Webp),
            "png-seq" | "pngs" | "png-sequence" => Some(OutputFormat::PngSequence),
            "jpg-seq" | "jpgs" | "jpg-sequence" | "jpeg-seq" => Some(OutputFormat::JpgSequence),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OutputFormat::Apng => "apng",
            OutputFormat::Gif => "gif",
            OutputFormat::Webp => "webp",
            OutputFormat::PngSequence => "png-seq",
            OutputFormat::JpgSequence => "jpg-seq",
        };
        f.write_str(name)
    }
}

/// Encode quality setting.
///
/// When disabled, encoders use their own defaults (cwebp `-q 75`, JPEG 90)
/// and the quantization pass is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality {
    /// Whether a target quality was explicitly requested.
    pub enabled: bool,
    /// Target quality in `0..=100`.
    pub value: u8,
}

impl Quality {
    /// An explicitly requested quality target.
    pub fn target(value: u8) -> Self {
        Self {
            enabled: true,
            value: value.min(100),
        }
    }

    /// Encoder-default quality (no quantization).
    pub fn default_quality() -> Self {
        Self {
            enabled: false,
            value: 90,
        }
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self::default_quality()
    }
}

/// Policy for the lossy pre-compression (quantization) pass.
///
/// Quantization trades quality for size and is deliberately skipped at high
/// requested quality — the threshold is configurable rather than a
/// hard-coded constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionPolicy {
    /// Skip quantization entirely when the requested quality is at or
    /// above this value.
    pub skip_threshold: u8,
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self { skip_threshold: 90 }
    }
}

impl CompressionPolicy {
    /// Whether the quantization pass should run for the given quality.
    pub fn should_quantize(&self, quality: Quality) -> bool {
        quality.enabled && quality.value < self.skip_threshold
    }
}

/// Configuration for one conversion item.
///
/// All fields have sensible defaults — a default-constructed options value
/// converts to APNG with encoder-default quality and infinite looping.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Requested output kinds. Duplicates are ignored.
    pub formats: Vec<OutputFormat>,
    /// Frame-rate override. `None` keeps the source rate.
    pub frame_rate: Option<f64>,
    /// Encode quality.
    pub quality: Quality,
    /// Floyd–Steinberg dithering level for the quantizer, in `0.0..=1.0`.
    pub floyd: Option<f32>,
    /// Loop count for animated targets. `0` means loop forever.
    pub loop_count: u32,
    /// Appended to the source stem to form the output name.
    pub output_suffix: String,
    /// Quantization policy.
    pub compression: CompressionPolicy,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            formats: vec![OutputFormat::Apng],
            frame_rate: None,
            quality: Quality::default(),
            floyd: None,
            loop_count: 0,
            output_suffix: String::new(),
            compression: CompressionPolicy::default(),
        }
    }
}

impl ConvertOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the requested output formats, deduplicated in order.
    pub fn with_formats(mut self, formats: impl IntoIterator<Item = OutputFormat>) -> Self {
        self.formats.clear();
        for format in formats {
            if !self.formats.contains(&format) {
                self.formats.push(format);
            }
        }
        self
    }

    /// Override the output frame rate.
    pub fn with_frame_rate(mut self, frame_rate: f64) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    /// Set the encode quality.
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    /// Enable Floyd–Steinberg dithering for the quantizer.
    pub fn with_floyd(mut self, level: f32) -> Self {
        self.floyd = Some(level.clamp(0.0, 1.0));
        self
    }

    /// Set the loop count (`0` = infinite).
    pub fn with_loop_count(mut self, loop_count: u32) -> Self {
        self.loop_count = loop_count;
        self
    }

    /// Set the output-name suffix.
    pub fn with_output_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.output_suffix = suffix.into();
        self
    }

    /// Set the quantization policy.
    pub fn with_compression(mut self, policy: CompressionPolicy) -> Self {
        self.compression = policy;
        self
    }

    /// `true` when every requested output is a bitmap sequence.
    ///
    /// This is the major fast path: no container assembly and no delta
    /// reconstruction is needed, frames are copied/converted directly.
    pub fn only_sequence_outputs(&self) -> bool {
        !self.formats.is_empty() && self.formats.iter().all(|f| f.is_sequence())
    }

    /// `true` when any requested output needs the APNG intermediate.
    pub fn needs_apng(&self) -> bool {
        self.formats.iter().any(|f| f.needs_apng())
    }
}
