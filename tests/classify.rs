//! Classification rules over real files in a scratch directory.

use std::{fs, path::Path};

use animorph::{Classifier, SourceKind};
use tempfile::TempDir;

/// A PNG head with an `acTL` chunk ahead of the image data.
fn animated_png_bytes() -> Vec<u8> {
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.extend_from_slice(b"\x00\x00\x00\x0dIHDRxxxxxxxxxxxxx");
    bytes.extend_from_slice(b"\x00\x00\x00\x08acTLxxxxxxxx");
    bytes.extend_from_slice(b"\x00\x00\x00\x04IDATxxxx");
    bytes
}

fn static_png_bytes() -> Vec<u8> {
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.extend_from_slice(b"\x00\x00\x00\x0dIHDRxxxxxxxxxxxxx");
    bytes.extend_from_slice(b"\x00\x00\x00\x04IDATxxxx");
    bytes
}

fn classify_one(path: &Path) -> SourceKind {
    let sources = Classifier::new()
        .classify_paths([path])
        .expect("classification");
    assert_eq!(sources.len(), 1, "expected one source for {path:?}");
    sources[0].kind
}

#[test]
fn apng_is_sniffed_by_chunk_order() {
    let dir = TempDir::new().unwrap();

    let animated = dir.path().join("anim.png");
    fs::write(&animated, animated_png_bytes()).unwrap();
    assert_eq!(classify_one(&animated), SourceKind::Apng);

    // A static PNG with a numeric suffix groups into a one-frame sequence
    // instead.
    let plain = dir.path().join("still1.png");
    fs::write(&plain, static_png_bytes()).unwrap();
    assert_eq!(classify_one(&plain), SourceKind::PngSequence);
}

#[test]
fn extension_rules() {
    let dir = TempDir::new().unwrap();
    for (name, kind) in [
        ("a.gif", SourceKind::Gif),
        ("a.webp", SourceKind::Webp),
        ("a.svga", SourceKind::Svga),
        ("a.pag", SourceKind::Pag),
        ("a.webm", SourceKind::Webm),
        ("a.avif", SourceKind::Avif),
        ("a.MOV", SourceKind::Mov),
        ("a.mpg", SourceKind::Mpeg),
        ("a.flv", SourceKind::Flv),
    ] {
        let path = dir.path().join(name);
        fs::write(&path, b"data").unwrap();
        assert_eq!(classify_one(&path), kind, "{name}");
    }
}

#[test]
fn mp4_with_json_sidecar_is_a_vap_pair() {
    let dir = TempDir::new().unwrap();
    let video = dir.path().join("effect.mp4");
    let sidecar = dir.path().join("effect.json");
    fs::write(&video, b"data").unwrap();
    fs::write(&sidecar, r#"{"info":{"w":750,"h":1334}}"#).unwrap();

    let sources = Classifier::new().classify_paths([&video]).unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].kind, SourceKind::Vap);
    assert_eq!(sources[0].sidecar.as_deref(), Some(sidecar.as_path()));

    let alone = dir.path().join("plain.mp4");
    fs::write(&alone, b"data").unwrap();
    assert_eq!(classify_one(&alone), SourceKind::Mp4);
}

#[test]
fn lottie_requires_version_rate_and_layers() {
    let dir = TempDir::new().unwrap();

    let lottie = dir.path().join("anim.json");
    fs::write(&lottie, r#"{"v":"5.7.1","fr":30,"layers":[{"ty":4}]}"#).unwrap();
    assert_eq!(classify_one(&lottie), SourceKind::Lottie);

    // Arbitrary JSON is silently dropped, not an error.
    let config = dir.path().join("settings.json");
    fs::write(&config, r#"{"theme":"dark"}"#).unwrap();
    let sources = Classifier::new().classify_paths([&config]).unwrap();
    assert!(sources.is_empty());

    let broken = dir.path().join("broken.json");
    fs::write(&broken, "{not json").unwrap();
    let sources = Classifier::new().classify_paths([&broken]).unwrap();
    assert!(sources.is_empty());
}

#[test]
fn directory_walk_groups_numbered_frames_numerically() {
    let dir = TempDir::new().unwrap();
    let seq = dir.path().join("run");
    fs::create_dir(&seq).unwrap();
    for n in [1u32, 2, 10] {
        fs::write(seq.join(format!("frame{n}.png")), static_png_bytes()).unwrap();
    }
    // Non-numeric bitmap stays out of the group.
    fs::write(seq.join("cover.png"), static_png_bytes()).unwrap();
    // An unrelated file is dropped.
    fs::write(seq.join("notes.txt"), b"hi").unwrap();

    let sources = Classifier::new().classify_paths([dir.path()]).unwrap();
    assert_eq!(sources.len(), 1);

    let source = &sources[0];
    assert_eq!(source.kind, SourceKind::PngSequence);
    let names: Vec<_> = source
        .file_list
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["frame1.png", "frame2.png", "frame10.png"]);
    assert_eq!(source.output_stem(), "frame");
}

#[test]
fn mixed_drop_keeps_every_matching_source() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.gif"), b"data").unwrap();
    fs::write(dir.path().join("b.webp"), b"data").unwrap();
    fs::write(dir.path().join("skipped.bin"), b"data").unwrap();

    let sources = Classifier::new().classify_paths([dir.path()]).unwrap();
    let mut kinds: Vec<_> = sources.iter().map(|s| s.kind).collect();
    kinds.sort_by_key(|k| format!("{k:?}"));
    assert_eq!(kinds, [SourceKind::Gif, SourceKind::Webp]);
}
