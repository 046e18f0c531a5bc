//! Decode-strategy selection.
//!
//! Each [`SourceKind`] maps to an ordered list of [`DecodeStrategy`]s. The
//! extractor tries them in order and moves on when one fails, accumulating
//! the failures; only when the whole list is exhausted does the item fail
//! with a single error naming everything that was tried.
//!
//! The mapping is data, not behavior — policy changes (new fallback, new
//! kind) edit a table instead of control flow.

use crate::classify::SourceKind;

/// One way of turning a source into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    /// In-process decode through the `image` crate's animation decoders.
    /// Fastest path; available for GIF, APNG, and animated WebP.
    Native,
    /// One `ffmpeg` invocation extracting every frame to a numbered
    /// pattern in a single pass.
    ExternalBatch,
    /// Per-frame demux and decode (`webpmux -get frame` + `dwebp`),
    /// yielding delta frames that must be replayed by the compositor.
    ExternalPerFrame,
    /// An external renderer for vector and procedural animation formats.
    ExternalRenderer,
}

/// The ordered strategy list for a source kind.
pub fn strategies_for(kind: SourceKind) -> &'static [DecodeStrategy] {
    use DecodeStrategy::*;
    match kind {
        // Already canonical bitmaps; the extractor short-circuits.
        SourceKind::PngSequence => &[],
        SourceKind::Apng | SourceKind::Gif => &[Native, ExternalBatch],
        SourceKind::Webp => &[Native, ExternalBatch, ExternalPerFrame],
        SourceKind::Lottie | SourceKind::Svga | SourceKind::Pag => &[ExternalRenderer],
        SourceKind::Avif
        | SourceKind::Vap
        | SourceKind::Webm
        | SourceKind::Mp4
        | SourceKind::Mov
        | SourceKind::Mpeg
        | SourceKind::Flv => &[ExternalBatch],
    }
}

/// The external renderer responsible for a vector kind.
///
/// The renderer contract is `<tool> <input> <output-dir>`: render numbered
/// PNG frames at the animation's native rate into the directory.
pub fn renderer_tool(kind: SourceKind) -> Option<&'static str> {
    match kind {
        SourceKind::Lottie => Some("lottie-to-png"),
        SourceKind::Svga => Some("svga2png"),
        SourceKind::Pag => Some("pag2png"),
        _ => None,
    }
}
