//! Target encoding: the in-process GIF fallback, sequence naming, the
//! quantization skip, and the tool-backed paths (guarded on availability).

use std::{fs, io::BufReader, path::Path, time::Duration};

use animorph::{
    Assembler, ConvertOptions, FrameSequence, OutputFormat, Quality, Quantizer, ToolGateway,
    output_path,
};
use image::{AnimationDecoder, Rgba, RgbaImage, codecs::gif::GifDecoder};
use tempfile::TempDir;

fn make_sequence(dir: &Path, count: u32, width: u32, height: u32) -> FrameSequence {
    let paths = (1..=count)
        .map(|n| {
            let path = dir.join(format!("frame{n:06}.png"));
            RgbaImage::from_pixel(width, height, Rgba([(n * 50) as u8, 20, 20, 255]))
                .save(&path)
                .unwrap();
            path
        })
        .collect();
    FrameSequence::uniform(paths, 25.0, width, height, true)
}

fn has_tool(gateway: &ToolGateway, tool: &str) -> bool {
    let available = gateway.is_available(tool);
    if !available {
        eprintln!("skipping: '{tool}' not available on this system");
    }
    available
}

#[tokio::test]
async fn gif_falls_back_to_in_process_encoding() {
    let scratch = TempDir::new().unwrap();
    let sequence = make_sequence(scratch.path(), 3, 6, 4);

    let out = scratch.path().join("anim.gif");
    // No APNG handed over, so the tool wrapper is bypassed regardless of
    // what is installed.
    Assembler::new(ToolGateway::new())
        .assemble_gif(&sequence, None, &ConvertOptions::new(), &out)
        .await
        .expect("in-process GIF encode");

    let decoder = GifDecoder::new(BufReader::new(fs::File::open(&out).unwrap())).unwrap();
    let frames = decoder.into_frames().collect_frames().unwrap();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].buffer().width(), 6);
    assert_eq!(frames[0].buffer().height(), 4);
    // 40 ms per frame at 25 fps.
    assert_eq!(Duration::from(frames[0].delay()), Duration::from_millis(40));
}

#[tokio::test]
async fn mixed_size_frames_are_centered_in_the_gif_fallback() {
    let scratch = TempDir::new().unwrap();
    let mut sequence = make_sequence(scratch.path(), 2, 8, 8);

    // Shrink the second frame; the encoder must still get 8x8 buffers.
    let small = scratch.path().join("small.png");
    RgbaImage::from_pixel(4, 4, Rgba([0, 200, 0, 255]))
        .save(&small)
        .unwrap();
    sequence.frames[1].path = small;

    let out = scratch.path().join("mixed.gif");
    Assembler::new(ToolGateway::new())
        .assemble_gif(&sequence, None, &ConvertOptions::new(), &out)
        .await
        .expect("mixed sizes encode");

    let decoder = GifDecoder::new(BufReader::new(fs::File::open(&out).unwrap())).unwrap();
    let frames = decoder.into_frames().collect_frames().unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].buffer().width(), 8);
    assert_eq!(frames[1].buffer().height(), 8);
}

#[tokio::test]
async fn png_sequence_outputs_use_the_name_and_padded_numbering() {
    let scratch = TempDir::new().unwrap();
    let sequence = make_sequence(scratch.path(), 2, 4, 4);

    let out_dir = output_path(scratch.path(), "sticker", OutputFormat::PngSequence);
    Assembler::new(ToolGateway::new())
        .assemble_png_sequence(&sequence, "sticker", &out_dir)
        .await
        .expect("copy frames");

    assert!(out_dir.ends_with("sticker_frames_png"));
    assert!(out_dir.join("sticker_000001.png").is_file());
    assert!(out_dir.join("sticker_000002.png").is_file());
    assert!(!out_dir.join("sticker_000003.png").exists());
}

#[tokio::test]
async fn quantization_is_skipped_at_high_quality() {
    let scratch = TempDir::new().unwrap();
    let apng = scratch.path().join("anim.png");
    fs::write(&apng, b"placeholder bytes").unwrap();
    let before = fs::read(&apng).unwrap();

    // Default quality sits at the skip threshold; no tools are touched.
    let mut warnings = Vec::new();
    Quantizer::new(ToolGateway::new())
        .optimize(&apng, &ConvertOptions::new(), &mut warnings)
        .await
        .expect("skip is not an error");

    assert!(warnings.is_empty());
    assert_eq!(fs::read(&apng).unwrap(), before);
}

#[tokio::test]
async fn quantizer_failure_degrades_to_a_warning() {
    let gateway = ToolGateway::new();
    // Point the quantizer at a binary that exits non-zero for these args.
    let gateway = match gateway.resolve("false") {
        Ok(path) => gateway.with_override("apngquant", path),
        Err(_) => {
            eprintln!("skipping: 'false' not available on this system");
            return;
        }
    };

    let scratch = TempDir::new().unwrap();
    let apng = scratch.path().join("anim.png");
    fs::write(&apng, b"placeholder bytes").unwrap();

    let options = ConvertOptions::new().with_quality(Quality::target(60));
    let mut warnings = Vec::new();
    Quantizer::new(gateway)
        .optimize(&apng, &options, &mut warnings)
        .await
        .expect("degrades instead of failing");

    assert_eq!(warnings.len(), 1);
    assert!(apng.is_file());
}

#[tokio::test]
async fn apng_assembly_via_available_tooling() {
    let gateway = ToolGateway::new();
    if !has_tool(&gateway, "ffmpeg") && !has_tool(&gateway, "apngasm") {
        return;
    }

    let scratch = TempDir::new().unwrap();
    let sequence = make_sequence(scratch.path(), 3, 8, 8);

    let out = scratch.path().join("out").join("anim.png");
    fs::create_dir_all(out.parent().unwrap()).unwrap();
    Assembler::new(gateway)
        .assemble_apng(&sequence, &ConvertOptions::new(), &out, scratch.path())
        .await
        .expect("APNG assembly");

    assert!(out.is_file());
    assert!(fs::metadata(&out).unwrap().len() > 0);
}

#[tokio::test]
async fn jpg_sequence_via_ffmpeg() {
    let gateway = ToolGateway::new();
    if !has_tool(&gateway, "ffmpeg") {
        return;
    }

    let scratch = TempDir::new().unwrap();
    let sequence = make_sequence(scratch.path(), 2, 8, 8);

    let out_dir = scratch.path().join("clip_frames_jpg");
    Assembler::new(gateway)
        .assemble_jpg_sequence(
            &sequence,
            &ConvertOptions::new().with_quality(Quality::target(80)),
            "clip",
            &out_dir,
        )
        .await
        .expect("JPEG transcode");

    assert!(out_dir.join("clip_000001.jpg").is_file());
    assert!(out_dir.join("clip_000002.jpg").is_file());
}

#[tokio::test]
async fn webp_assembly_via_the_webp_suite() {
    let gateway = ToolGateway::new();
    if !has_tool(&gateway, "cwebp") || !has_tool(&gateway, "webpmux") {
        return;
    }

    let scratch = TempDir::new().unwrap();
    let sequence = make_sequence(scratch.path(), 3, 8, 8);

    let out = scratch.path().join("anim.webp");
    Assembler::new(gateway)
        .assemble_webp(
            &sequence,
            &ConvertOptions::new().with_quality(Quality::target(80)),
            &out,
            scratch.path(),
        )
        .await
        .expect("WebP assembly");

    assert!(out.is_file());
    assert!(fs::metadata(&out).unwrap().len() > 0);
}
