//! Source classification.
//!
//! The classifier inspects paths (and byte signatures) and yields typed
//! [`SourceDescriptor`]s. Directories are walked recursively to a fixed
//! depth; directories of numbered bitmaps are grouped into one
//! PNG-sequence source, sorted by the embedded numeral rather than
//! lexicographically.
//!
//! Files that match no rule are dropped silently from the batch (logged,
//! never an error) — a mixed drag-drop of media and stray files should
//! convert what it can.
//!
//! # Example
//!
//! ```no_run
//! use animorph::Classifier;
//!
//! let sources = Classifier::new().classify_paths(["./drop"])?;
//! for source in &sources {
//!     println!("{:?}: {}", source.kind, source.path.display());
//! }
//! # Ok::<(), animorph::AnimorphError>(())
//! ```

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AnimorphError;

/// Maximum directory recursion depth for dropped folders.
const MAX_WALK_DEPTH: usize = 5;

/// The classified kind of an animation source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SourceKind {
    /// A directory (or grouped set) of numbered PNG frames.
    PngSequence,
    /// Animated PNG (`acTL` chunk present).
    Apng,
    /// Animated GIF.
    Gif,
    /// Animated WebP.
    Webp,
    /// Lottie JSON animation.
    Lottie,
    /// SVGA animation.
    Svga,
    /// PAG animation.
    Pag,
    /// Video-with-alpha pair: an MP4 plus a same-stem JSON sidecar.
    Vap,
    /// WebM video.
    Webm,
    /// MP4 video.
    Mp4,
    /// AVIF image sequence / animation.
    Avif,
    /// QuickTime video.
    Mov,
    /// MPEG video.
    Mpeg,
    /// Flash video.
    Flv,
}

/// One classified animation source.
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    /// Primary input file; for PNG sequences, the first frame.
    pub path: PathBuf,
    /// Companion file for composite container kinds (VAP's JSON config).
    pub sidecar: Option<PathBuf>,
    /// For PNG sequences: every frame, numerically sorted. Otherwise just
    /// the primary path.
    pub file_list: Vec<PathBuf>,
    /// The classified kind.
    pub kind: SourceKind,
}

impl SourceDescriptor {
    fn single(kind: SourceKind, path: PathBuf) -> Self {
        Self {
            file_list: vec![path.clone()],
            path,
            sidecar: None,
            kind,
        }
    }

    /// The stem used to derive output names, stripped of spaces.
    ///
    /// For PNG sequences the frame numbering is trimmed off, so
    /// `shot_000001.png` yields `shot`; a sequence of bare numbers falls
    /// back to its directory name.
    pub fn output_stem(&self) -> String {
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");

        let stem = if self.kind == SourceKind::PngSequence {
            let prefix = stem
                .trim_end_matches(|c: char| c.is_ascii_digit())
                .trim_end_matches(['_', '-']);
            if prefix.is_empty() {
                self.path
                    .parent()
                    .and_then(Path::file_name)
                    .and_then(|n| n.to_str())
                    .unwrap_or("sequence")
            } else {
                prefix
            }
        } else {
            stem
        };

        stem.replace(' ', "")
    }
}

/// Minimal structural check for Lottie documents.
///
/// A Lottie JSON must carry a version, frame rate, and layer list; JSON
/// files missing any of them are not animations and are skipped.
#[derive(Debug, Deserialize)]
struct LottieHeader {
    v: Option<serde_json::Value>,
    fr: Option<f64>,
    layers: Option<Vec<serde_json::Value>>,
}

/// Path/byte-signature classifier.
///
/// Stateless; `new()` exists for call-site symmetry with the builders
/// elsewhere in the crate.
#[derive(Debug, Default)]
pub struct Classifier {
    _private: (),
}

impl Classifier {
    /// Create a classifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a set of dropped paths into source descriptors.
    ///
    /// Directories are walked to a depth of 5; static PNGs sharing a
    /// numeric-suffix naming scheme are grouped into sequence sources.
    pub fn classify_paths<I, P>(&self, paths: I) -> Result<Vec<SourceDescriptor>, AnimorphError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut sources = Vec::new();
        let mut static_pngs = Vec::new();

        for path in paths {
            self.visit(path.as_ref(), 0, &mut sources, &mut static_pngs)?;
        }

        sources.extend(group_png_sequences(static_pngs));
        Ok(sources)
    }

    fn visit(
        &self,
        path: &Path,
        depth: usize,
        sources: &mut Vec<SourceDescriptor>,
        static_pngs: &mut Vec<PathBuf>,
    ) -> Result<(), AnimorphError> {
        if depth > MAX_WALK_DEPTH {
            log::warn!("skipping {}: deeper than {MAX_WALK_DEPTH} levels", path.display());
            return Ok(());
        }

        let metadata = fs::metadata(path)?;
        if metadata.is_dir() {
            let mut entries: Vec<_> = fs::read_dir(path)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .collect();
            entries.sort();
            for entry in entries {
                self.visit(&entry, depth + 1, sources, static_pngs)?;
            }
            return Ok(());
        }

        if let Some(source) = self.classify_file(path) {
            sources.push(source);
        } else if has_extension(path, "png") {
            // Deferred: static PNGs group into sequences once the whole
            // drop has been walked.
            static_pngs.push(path.to_path_buf());
        }
        Ok(())
    }

    /// Classify a single file, or `None` when no rule matches.
    ///
    /// Static PNGs also return `None` here; callers collect them for
    /// sequence grouping.
    pub fn classify_file(&self, path: &Path) -> Option<SourceDescriptor> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)?;

        match ext.as_str() {
            "png" => match sniff_apng(path) {
                Ok(true) => Some(SourceDescriptor::single(SourceKind::Apng, path.into())),
                Ok(false) => None,
                Err(err) => {
                    log::warn!("could not read {}: {err}", path.display());
                    None
                }
            },
            "gif" => Some(SourceDescriptor::single(SourceKind::Gif, path.into())),
            "webp" => Some(SourceDescriptor::single(SourceKind::Webp, path.into())),
            "json" | "lottie" => match validate_lottie(path) {
                Ok(true) => Some(SourceDescriptor::single(SourceKind::Lottie, path.into())),
                Ok(false) => {
                    log::debug!("{}: JSON is not a Lottie animation", path.display());
                    None
                }
                Err(err) => {
                    log::debug!("{}: unparseable JSON skipped: {err}", path.display());
                    None
                }
            },
            "svga" => Some(SourceDescriptor::single(SourceKind::Svga, path.into())),
            "pag" => Some(SourceDescriptor::single(SourceKind::Pag, path.into())),
            // The sidecar rule outranks the plain-video rule: an MP4 with
            // a same-stem JSON sibling is a VAP pair, not a video.
            "mp4" => {
                let sidecar = path.with_extension("json");
                if sidecar.is_file() {
                    let mut source = SourceDescriptor::single(SourceKind::Vap, path.into());
                    source.file_list.push(sidecar.clone());
                    source.sidecar = Some(sidecar);
                    Some(source)
                } else {
                    Some(SourceDescriptor::single(SourceKind::Mp4, path.into()))
                }
            }
            "webm" => Some(SourceDescriptor::single(SourceKind::Webm, path.into())),
            "avif" => Some(SourceDescriptor::single(SourceKind::Avif, path.into())),
            "mov" => Some(SourceDescriptor::single(SourceKind::Mov, path.into())),
            "mpeg" | "mpg" => Some(SourceDescriptor::single(SourceKind::Mpeg, path.into())),
            "flv" => Some(SourceDescriptor::single(SourceKind::Flv, path.into())),
            other => {
                log::debug!("{}: no rule for extension '{other}'", path.display());
                None
            }
        }
    }
}

/// Whether a PNG file carries an animation control (`acTL`) chunk.
///
/// The chunk must appear before the first `IDAT`; sniffing the head of the
/// file is enough because `acTL` is required to precede image data.
pub fn sniff_apng(path: &Path) -> Result<bool, AnimorphError> {
    let mut head = [0u8; 4096];
    let mut file = fs::File::open(path)?;
    let read = read_fully(&mut file, &mut head)?;
    let head = &head[..read];

    let actl = find_bytes(head, b"acTL");
    let idat = find_bytes(head, b"IDAT");
    Ok(match (actl, idat) {
        (Some(a), Some(d)) => a < d,
        (Some(_), None) => true,
        _ => false,
    })
}

fn read_fully(reader: &mut impl std::io::Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    loop {
        match reader.read(&mut buf[total..]) {
            Ok(0) => return Ok(total),
            Ok(n) => {
                total += n;
                if total == buf.len() {
                    return Ok(total);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn validate_lottie(path: &Path) -> Result<bool, AnimorphError> {
    let data = fs::read_to_string(path)?;
    let header: LottieHeader = serde_json::from_str(&data)?;
    Ok(header.v.is_some() && header.fr.is_some() && header.layers.is_some_and(|l| !l.is_empty()))
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// Split a PNG filename into `(prefix, numeral)` when it ends in digits.
///
/// `frame10.png` → `("frame", 10)`. Files without a numeric suffix return
/// `None` and are excluded from sequence grouping.
pub(crate) fn numeric_suffix(path: &Path) -> Option<(String, u64)> {
    let stem = path.file_stem()?.to_str()?;
    let digit_start = stem.rfind(|c: char| !c.is_ascii_digit()).map_or(0, |i| i + 1);
    let digits = &stem[digit_start..];
    if digits.is_empty() {
        return None;
    }
    Some((stem[..digit_start].to_string(), digits.parse().ok()?))
}

/// Group loose static PNGs into per-(directory, prefix) sequence sources,
/// sorted by the embedded numeral (`1, 2, 10` — not `1, 10, 2`).
fn group_png_sequences(static_pngs: Vec<PathBuf>) -> Vec<SourceDescriptor> {
    let mut groups: BTreeMap<(PathBuf, String), Vec<(u64, PathBuf)>> = BTreeMap::new();

    for path in static_pngs {
        let Some((prefix, number)) = numeric_suffix(&path) else {
            log::debug!("{}: static PNG without numeric suffix, skipped", path.display());
            continue;
        };
        let dir = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        groups.entry((dir, prefix)).or_default().push((number, path));
    }

    groups
        .into_values()
        .map(|mut members| {
            members.sort_by_key(|(number, _)| *number);
            let file_list: Vec<PathBuf> = members.into_iter().map(|(_, path)| path).collect();
            SourceDescriptor {
                path: file_list[0].clone(),
                sidecar: None,
                file_list,
                kind: SourceKind::PngSequence,
            }
        })
        .collect()
}
