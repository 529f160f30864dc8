//! Shared helpers for root integration tests.

#![allow(dead_code)]

use clipshrink_media::fixtures::Mp4FixtureBuilder;
use clipshrink_media::Rotation;
use std::path::{Path, PathBuf};

/// 2 s of 640x360 @ 30 fps, 1500 B per frame, stereo 44.1 kHz audio.
pub fn clip_with_audio(dir: &Path) -> PathBuf {
    let path = dir.join("clip.mp4");
    Mp4FixtureBuilder::new()
        .video(640, 360, 30, 60)
        .video_sample_size(1500)
        .keyframe_interval(30)
        .audio(44100, 2, 87)
        .write_to(&path)
        .unwrap();
    path
}

/// 1 s of portrait-recorded video without audio.
pub fn rotated_clip(dir: &Path) -> PathBuf {
    let path = dir.join("portrait.mp4");
    Mp4FixtureBuilder::new()
        .video(1280, 720, 30, 30)
        .video_sample_size(1000)
        .rotation(Rotation::Cw90)
        .write_to(&path)
        .unwrap();
    path
}
