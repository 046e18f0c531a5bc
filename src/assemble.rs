//! Target encoding.
//!
//! The [`Assembler`] turns one canonical [`FrameSequence`] into the
//! requested outputs. Each target has a preferred batch tool with a
//! fallback:
//!
//! - **APNG** — one `ffmpeg` pass over the numbered frame pattern when the
//!   durations are uniform; otherwise `apngasm` with per-frame delay
//!   sidecar files.
//! - **GIF** — `apng2gif` over the assembled APNG; in-process `gif`-crate
//!   encoding when the tool is missing.
//! - **WebP** — concurrent per-frame `cwebp` encodes muxed by one
//!   `webpmux` invocation.
//! - **PNG/JPG sequences** — direct copies, or an ffmpeg batch transcode
//!   for JPEG when the frames form one sequential pattern.

use std::path::{Path, PathBuf};

use image::{Rgba, RgbaImage, imageops};
use tokio::task::JoinSet;

use crate::{
    error::AnimorphError,
    frame::{FrameSequence, pad6},
    options::{ConvertOptions, OutputFormat, Quality},
    tools::ToolGateway,
};

/// How many per-frame ffmpeg transcodes run concurrently.
const JPG_BATCH: usize = 5;

/// The output path for a target: `{name}.{ext}` for containers,
/// `{name}_frames_{ext}/` for sequences.
pub fn output_path(output_dir: &Path, name: &str, format: OutputFormat) -> PathBuf {
    if format.is_sequence() {
        output_dir.join(format!("{name}_frames_{}", format.extension()))
    } else {
        output_dir.join(format!("{name}.{}", format.extension()))
    }
}

/// Encodes canonical frames into output targets.
#[derive(Debug, Clone)]
pub struct Assembler {
    gateway: ToolGateway,
}

impl Assembler {
    /// Create an assembler using the given gateway for tool access.
    pub fn new(gateway: ToolGateway) -> Self {
        Self { gateway }
    }

    /// Assemble an APNG at `out`.
    pub async fn assemble_apng(
        &self,
        sequence: &FrameSequence,
        options: &ConvertOptions,
        out: &Path,
        work_dir: &Path,
    ) -> Result<(), AnimorphError> {
        if let Some(duration) = uniform_duration(sequence)
            && let Some(pattern) = sequence.is_sequential_pattern()
        {
            let rate = 1.0 / duration.as_secs_f64();
            let args: Vec<std::ffi::OsString> = vec![
                "-y".into(),
                "-framerate".into(),
                format!("{rate}").into(),
                "-start_number".into(),
                pattern.start.to_string().into(),
                "-i".into(),
                pattern.printf_pattern().into_os_string(),
                "-plays".into(),
                options.loop_count.to_string().into(),
                "-f".into(),
                "apng".into(),
                out.as_os_str().into(),
            ];
            match self.gateway.run("ffmpeg", &args, None).await {
                Ok(_) => return Ok(()),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    log::warn!("ffmpeg APNG pass failed ({err}), trying apngasm");
                }
            }
        }

        self.apng_via_apngasm(sequence, options, out, work_dir).await
    }

    /// `apngasm` fallback: stage the frames under one numbering scheme,
    /// write `delay=ms/1000` sidecars for per-frame timing, and run the
    /// tool from inside the staging directory.
    async fn apng_via_apngasm(
        &self,
        sequence: &FrameSequence,
        options: &ConvertOptions,
        out: &Path,
        work_dir: &Path,
    ) -> Result<(), AnimorphError> {
        let stage = work_dir.join("apng_stage");
        tokio::fs::create_dir_all(&stage).await?;

        for (index, frame) in sequence.frames.iter().enumerate() {
            let base = format!("frame{}", pad6(index as u64 + 1));
            tokio::fs::copy(&frame.path, stage.join(format!("{base}.png"))).await?;
            let delay = format!("delay={}/1000", frame.duration.as_millis());
            tokio::fs::write(stage.join(format!("{base}.txt")), delay).await?;
        }

        let out = std::path::absolute(out)?;
        self.gateway
            .run(
                "apngasm",
                &[
                    out.as_os_str(),
                    "frame000001.png".as_ref(),
                    "-kc".as_ref(),
                    "-z0".as_ref(),
                    format!("-l{}", options.loop_count).as_ref(),
                ],
                Some(&stage),
            )
            .await?;
        Ok(())
    }

    /// Assemble a GIF at `out`, preferably by wrapping the already-built
    /// APNG through `apng2gif`.
    pub async fn assemble_gif(
        &self,
        sequence: &FrameSequence,
        apng: Option<&Path>,
        options: &ConvertOptions,
        out: &Path,
    ) -> Result<(), AnimorphError> {
        if let Some(apng) = apng
            && self.gateway.is_available("apng2gif")
        {
            match self
                .gateway
                .run("apng2gif", &[apng.as_os_str(), out.as_os_str()], None)
                .await
            {
                Ok(_) => return Ok(()),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    log::warn!("apng2gif failed ({err}), encoding GIF in-process");
                }
            }
        }

        self.gif_in_process(sequence, options, out).await
    }

    async fn gif_in_process(
        &self,
        sequence: &FrameSequence,
        options: &ConvertOptions,
        out: &Path,
    ) -> Result<(), AnimorphError> {
        let frames: Vec<(PathBuf, std::time::Duration)> = sequence
            .frames
            .iter()
            .map(|f| (f.path.clone(), f.duration))
            .collect();
        let (width, height) = (sequence.width, sequence.height);
        let loop_count = options.loop_count;
        let out = out.to_path_buf();

        tokio::task::spawn_blocking(move || {
            encode_gif_frames(&frames, width, height, loop_count, &out)
        })
        .await
        .map_err(|err| AnimorphError::Io(std::io::Error::other(err)))?
    }

    /// Assemble an animated WebP at `out`: concurrent `cwebp` frame
    /// encodes, one `webpmux` mux.
    pub async fn assemble_webp(
        &self,
        sequence: &FrameSequence,
        options: &ConvertOptions,
        out: &Path,
        work_dir: &Path,
    ) -> Result<(), AnimorphError> {
        let enc_dir = work_dir.join("webp_frames");
        tokio::fs::create_dir_all(&enc_dir).await?;

        let quality = webp_quality(options.quality);
        let has_alpha = sequence.has_alpha;
        let mut set = JoinSet::new();
        for (index, frame) in sequence.frames.iter().enumerate() {
            let gateway = self.gateway.clone();
            let src = frame.path.clone();
            let dst = enc_dir.join(format!("frame{}.webp", pad6(index as u64 + 1)));
            let (width, height) = (sequence.width, sequence.height);
            set.spawn(async move {
                encode_webp_frame(&gateway, &src, &dst, quality, width, height, has_alpha).await
            });
        }
        while let Some(joined) = set.join_next().await {
            joined.map_err(|err| AnimorphError::Io(std::io::Error::other(err)))??;
        }

        let mut args: Vec<std::ffi::OsString> = Vec::new();
        for (index, frame) in sequence.frames.iter().enumerate() {
            args.push("-frame".into());
            args.push(
                enc_dir
                    .join(format!("frame{}.webp", pad6(index as u64 + 1)))
                    .into_os_string(),
            );
            // Full-canvas frames at the origin: dispose none, no blending.
            args.push(format!("+{}+0+0+0-b", frame.duration.as_millis()).into());
        }
        args.push("-loop".into());
        args.push(options.loop_count.to_string().into());
        args.push("-o".into());
        args.push(out.as_os_str().into());

        self.gateway.run("webpmux", &args, None).await?;
        Ok(())
    }

    /// Copy the canonical frames into `{name}_frames_png/` as
    /// `{name}_NNNNNN.png`.
    pub async fn assemble_png_sequence(
        &self,
        sequence: &FrameSequence,
        name: &str,
        out_dir: &Path,
    ) -> Result<(), AnimorphError> {
        tokio::fs::create_dir_all(out_dir).await?;

        let mut set = JoinSet::new();
        for (index, frame) in sequence.frames.iter().enumerate() {
            let src = frame.path.clone();
            let dst = out_dir.join(format!("{name}_{}.png", pad6(index as u64 + 1)));
            set.spawn(async move { tokio::fs::copy(&src, &dst).await.map(|_| ()) });
        }
        while let Some(joined) = set.join_next().await {
            joined.map_err(|err| AnimorphError::Io(std::io::Error::other(err)))??;
        }
        Ok(())
    }

    /// Transcode the canonical frames into `{name}_frames_jpg/`.
    ///
    /// One ffmpeg batch when the frames form a sequential pattern,
    /// otherwise per-frame transcodes in small concurrent batches.
    pub async fn assemble_jpg_sequence(
        &self,
        sequence: &FrameSequence,
        options: &ConvertOptions,
        name: &str,
        out_dir: &Path,
    ) -> Result<(), AnimorphError> {
        tokio::fs::create_dir_all(out_dir).await?;
        let qscale = jpeg_qscale(options.quality);

        if let Some(pattern) = sequence.is_sequential_pattern() {
            let out_pattern = out_dir.join(format!("{name}_%06d.jpg"));
            let args: Vec<std::ffi::OsString> = vec![
                "-y".into(),
                "-start_number".into(),
                pattern.start.to_string().into(),
                "-i".into(),
                pattern.printf_pattern().into_os_string(),
                "-q:v".into(),
                qscale.to_string().into(),
                out_pattern.into_os_string(),
            ];
            self.gateway.run("ffmpeg", &args, None).await?;
            return Ok(());
        }

        for batch in sequence.frames.chunks(JPG_BATCH) {
            let mut set = JoinSet::new();
            for frame in batch {
                let gateway = self.gateway.clone();
                let src = frame.path.clone();
                let dst = out_dir.join(format!("{name}_{}.jpg", pad6(frame.index + 1)));
                set.spawn(async move {
                    let args: Vec<std::ffi::OsString> = vec![
                        "-y".into(),
                        "-i".into(),
                        src.into_os_string(),
                        "-q:v".into(),
                        qscale.to_string().into(),
                        dst.into_os_string(),
                    ];
                    gateway.run("ffmpeg", &args, None).await.map(|_| ())
                });
            }
            while let Some(joined) = set.join_next().await {
                joined.map_err(|err| AnimorphError::Io(std::io::Error::other(err)))??;
            }
        }
        Ok(())
    }
}

async fn encode_webp_frame(
    gateway: &ToolGateway,
    src: &Path,
    dst: &Path,
    quality: u8,
    width: u32,
    height: u32,
    has_alpha: bool,
) -> Result<(), AnimorphError> {
    let pad_src = src.to_path_buf();
    let padded = tokio::task::spawn_blocking(move || pad_if_needed(&pad_src, width, height))
        .await
        .map_err(|err| AnimorphError::Io(std::io::Error::other(err)))??;

    let input = padded.as_deref().unwrap_or(src);
    let mut args: Vec<std::ffi::OsString> = vec![
        "-q".into(),
        quality.to_string().into(),
        "-m".into(),
        "4".into(),
    ];
    if !has_alpha {
        // Encoding an alpha plane for an opaque source turns pure
        // white/black pixels transparent in some decoders.
        args.push("-noalpha".into());
    }
    args.push(input.as_os_str().into());
    args.push("-o".into());
    args.push(dst.as_os_str().into());
    gateway.run("cwebp", &args, None).await?;
    Ok(())
}

/// Center a smaller frame onto a transparent canvas of the target size.
/// Returns the padded file's path, or `None` when the frame already fits.
fn pad_if_needed(src: &Path, width: u32, height: u32) -> Result<Option<PathBuf>, AnimorphError> {
    let (fw, fh) = image::image_dimensions(src)?;
    if fw == width && fh == height {
        return Ok(None);
    }

    let fragment = image::open(src)?.into_rgba8();
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    let x = (i64::from(width) - i64::from(fw)) / 2;
    let y = (i64::from(height) - i64::from(fh)) / 2;
    imageops::overlay(&mut canvas, &fragment, x.max(0), y.max(0));

    let padded = src.with_extension("padded.png");
    canvas.save(&padded)?;
    Ok(Some(padded))
}

fn encode_gif_frames(
    frames: &[(PathBuf, std::time::Duration)],
    width: u32,
    height: u32,
    loop_count: u32,
    out: &Path,
) -> Result<(), AnimorphError> {
    let map_gif = |err: gif::EncodingError| AnimorphError::GifEncode(err.to_string());

    let file = std::fs::File::create(out)?;
    let mut encoder =
        gif::Encoder::new(file, width as u16, height as u16, &[]).map_err(map_gif)?;
    encoder
        .set_repeat(if loop_count == 0 {
            gif::Repeat::Infinite
        } else {
            gif::Repeat::Finite(loop_count.min(u16::MAX as u32) as u16)
        })
        .map_err(map_gif)?;

    for (path, duration) in frames {
        let bitmap = image::open(path)?.into_rgba8();
        // Frames smaller or larger than the canvas would make the encoder
        // reject the buffer length; center them instead.
        let bitmap = if bitmap.dimensions() == (width, height) {
            bitmap
        } else {
            let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
            let x = (i64::from(width) - i64::from(bitmap.width())) / 2;
            let y = (i64::from(height) - i64::from(bitmap.height())) / 2;
            imageops::overlay(&mut canvas, &bitmap, x.max(0), y.max(0));
            canvas
        };
        let mut raw = bitmap.into_raw();
        let mut frame = gif::Frame::from_rgba_speed(width as u16, height as u16, &mut raw, 10);
        // GIF timing is in centiseconds.
        frame.delay = (duration.as_millis() / 10).min(u128::from(u16::MAX)) as u16;
        frame.dispose = gif::DisposalMethod::Keep;
        encoder.write_frame(&frame).map_err(map_gif)?;
    }
    Ok(())
}

fn webp_quality(quality: Quality) -> u8 {
    if quality.enabled { quality.value } else { 75 }
}

/// Map a 0..=100 quality to ffmpeg's 1..=31 JPEG qscale (lower is better).
fn jpeg_qscale(quality: Quality) -> u32 {
    let value = if quality.enabled { quality.value } else { 90 };
    (u32::from(100 - value.min(100)) / 10).clamp(1, 31)
}

fn uniform_duration(sequence: &FrameSequence) -> Option<std::time::Duration> {
    let first = sequence.frames.first()?.duration;
    sequence
        .frames
        .iter()
        .all(|f| f.duration == first)
        .then_some(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameSequence;

    #[test]
    fn output_paths() {
        let dir = Path::new("/out");
        assert_eq!(
            output_path(dir, "sticker", OutputFormat::Webp),
            PathBuf::from("/out/sticker.webp")
        );
        assert_eq!(
            output_path(dir, "sticker", OutputFormat::PngSequence),
            PathBuf::from("/out/sticker_frames_png")
        );
        assert_eq!(
            output_path(dir, "sticker", OutputFormat::JpgSequence),
            PathBuf::from("/out/sticker_frames_jpg")
        );
    }

    #[test]
    fn jpeg_qscale_mapping() {
        assert_eq!(jpeg_qscale(Quality::target(80)), 2);
        assert_eq!(jpeg_qscale(Quality::target(100)), 1);
        assert_eq!(jpeg_qscale(Quality::target(0)), 10);
        assert_eq!(jpeg_qscale(Quality::default_quality()), 1);
    }

    #[test]
    fn uniform_durations_detected() {
        let paths: Vec<PathBuf> = (1..=3)
            .map(|i| PathBuf::from(format!("/f/frame{}.png", pad6(i))))
            .collect();
        let uniform = FrameSequence::uniform(paths, 25.0, 4, 4, true);
        assert_eq!(
            uniform_duration(&uniform),
            Some(std::time::Duration::from_millis(40))
        );

        let mut mixed = uniform.clone();
        mixed.frames[1].duration = std::time::Duration::from_millis(80);
        assert_eq!(uniform_duration(&mixed), None);
    }
}
