//! Delta replay behavior: canvas sizing, disposal, offsets, determinism.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use animorph::{BlendOp, Compositor, DeltaFrame, DisposeOp, MIN_FRAME_DURATION, is_direct_stream};
use image::{Rgba, RgbaImage};
use tempfile::TempDir;

fn write_rect(dir: &Path, name: &str, width: u32, height: u32, color: [u8; 4]) -> PathBuf {
    let path = dir.join(name);
    RgbaImage::from_pixel(width, height, Rgba(color))
        .save(&path)
        .expect("write fragment");
    path
}

fn delta(bitmap: PathBuf, width: u32, height: u32, x: u32, y: u32) -> DeltaFrame {
    DeltaFrame {
        bitmap,
        width,
        height,
        x_offset: x,
        y_offset: y,
        duration: Duration::from_millis(40),
        dispose: DisposeOp::None,
        blend: BlendOp::Over,
    }
}

#[test]
fn every_delta_becomes_one_canvas_sized_frame() {
    let scratch = TempDir::new().expect("tempdir");
    let red = write_rect(scratch.path(), "red.png", 8, 8, [255, 0, 0, 255]);
    let blue = write_rect(scratch.path(), "blue.png", 2, 2, [0, 0, 255, 255]);

    let deltas = vec![
        delta(red, 8, 8, 0, 0),
        delta(blue.clone(), 2, 2, 4, 4),
        delta(blue, 2, 2, 0, 0),
    ];

    let out = scratch.path().join("frames");
    let sequence = Compositor::new(8, 8)
        .replay(&deltas, &out, 25.0, true)
        .expect("replay");

    assert_eq!(sequence.len(), 3);
    assert_eq!((sequence.width, sequence.height), (8, 8));
    for frame in &sequence.frames {
        let (w, h) = image::image_dimensions(&frame.path).expect("frame on disk");
        assert_eq!((w, h), (8, 8));
    }
}

#[test]
fn background_dispose_clears_the_previous_frames_region() {
    let scratch = TempDir::new().expect("tempdir");
    let red = write_rect(scratch.path(), "red.png", 4, 4, [255, 0, 0, 255]);
    let blue = write_rect(scratch.path(), "blue.png", 2, 2, [0, 0, 255, 255]);

    let mut first = delta(red, 4, 4, 0, 0);
    first.dispose = DisposeOp::Background;
    let second = delta(blue, 2, 2, 0, 0);

    let out = scratch.path().join("frames");
    let sequence = Compositor::new(4, 4)
        .replay(&[first, second], &out, 25.0, true)
        .expect("replay");

    // Frame 1 is untouched by its own dispose op.
    let frame1 = image::open(&sequence.frames[0].path).unwrap().into_rgba8();
    assert_eq!(frame1.get_pixel(3, 3), &Rgba([255, 0, 0, 255]));

    // Frame 2: red region cleared before the blue fragment drew.
    let frame2 = image::open(&sequence.frames[1].path).unwrap().into_rgba8();
    assert_eq!(frame2.get_pixel(0, 0), &Rgba([0, 0, 255, 255]));
    assert_eq!(frame2.get_pixel(3, 3), &Rgba([0, 0, 0, 0]));
}

#[test]
fn previous_dispose_downgrades_to_background() {
    let scratch = TempDir::new().expect("tempdir");
    let red = write_rect(scratch.path(), "red.png", 4, 4, [255, 0, 0, 255]);
    let blue = write_rect(scratch.path(), "blue.png", 1, 1, [0, 0, 255, 255]);

    let mut first = delta(red, 4, 4, 0, 0);
    first.dispose = DisposeOp::Previous;
    let second = delta(blue, 1, 1, 0, 0);

    let out = scratch.path().join("frames");
    let sequence = Compositor::new(4, 4)
        .replay(&[first, second], &out, 25.0, true)
        .expect("replay");

    // Downgraded to background: the red canvas must be gone, not restored.
    let frame2 = image::open(&sequence.frames[1].path).unwrap().into_rgba8();
    assert_eq!(frame2.get_pixel(2, 2), &Rgba([0, 0, 0, 0]));
}

#[test]
fn odd_offsets_are_decremented() {
    let scratch = TempDir::new().expect("tempdir");
    let dot = write_rect(scratch.path(), "dot.png", 1, 1, [0, 255, 0, 255]);

    let out = scratch.path().join("frames");
    let sequence = Compositor::new(8, 8)
        .replay(&[delta(dot, 1, 1, 3, 5)], &out, 25.0, true)
        .expect("replay");

    let frame = image::open(&sequence.frames[0].path).unwrap().into_rgba8();
    assert_eq!(frame.get_pixel(2, 4), &Rgba([0, 255, 0, 255]));
    assert_eq!(frame.get_pixel(3, 5), &Rgba([0, 0, 0, 0]));
}

#[test]
fn replay_is_deterministic() {
    let scratch = TempDir::new().expect("tempdir");
    let red = write_rect(scratch.path(), "red.png", 4, 4, [200, 10, 10, 255]);
    let half = write_rect(scratch.path(), "half.png", 2, 4, [10, 10, 200, 128]);

    let mut first = delta(red, 4, 4, 0, 0);
    first.dispose = DisposeOp::Background;
    let deltas = vec![first, delta(half, 2, 4, 2, 0)];

    let compositor = Compositor::new(4, 4);
    let a = compositor
        .replay(&deltas, &scratch.path().join("a"), 25.0, true)
        .expect("first replay");
    let b = compositor
        .replay(&deltas, &scratch.path().join("b"), 25.0, true)
        .expect("second replay");

    for (left, right) in a.frames.iter().zip(&b.frames) {
        let left = std::fs::read(&left.path).unwrap();
        let right = std::fs::read(&right.path).unwrap();
        assert_eq!(left, right);
    }
}

#[test]
fn zero_durations_are_clamped() {
    let scratch = TempDir::new().expect("tempdir");
    let red = write_rect(scratch.path(), "red.png", 2, 2, [255, 0, 0, 255]);

    let mut zero = delta(red, 2, 2, 0, 0);
    zero.duration = Duration::ZERO;

    let sequence = Compositor::new(2, 2)
        .replay(&[zero], &scratch.path().join("frames"), 25.0, true)
        .expect("replay");
    assert_eq!(sequence.frames[0].duration, MIN_FRAME_DURATION);
}

#[test]
fn direct_streams_need_no_replay() {
    let full = |dispose| DeltaFrame {
        bitmap: PathBuf::from("unused.png"),
        width: 8,
        height: 8,
        x_offset: 0,
        y_offset: 0,
        duration: Duration::from_millis(40),
        dispose,
        blend: BlendOp::Over,
    };

    assert!(is_direct_stream(
        &[full(DisposeOp::None), full(DisposeOp::None)],
        8,
        8
    ));
    assert!(!is_direct_stream(
        &[full(DisposeOp::None), full(DisposeOp::Background)],
        8,
        8
    ));

    let mut offset = full(DisposeOp::None);
    offset.x_offset = 2;
    assert!(!is_direct_stream(&[offset], 8, 8));

    let mut small = full(DisposeOp::None);
    small.width = 4;
    assert!(!is_direct_stream(&[small], 8, 8));
}
