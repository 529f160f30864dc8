//! Printable summaries of a probed source and its compression estimates.

use clipshrink_av::{QualityTier, TrackDescriptor};
use clipshrink_media::Rotation;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub file: PathBuf,
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub frame_count: u64,
    pub estimated_bitrate_bps: f64,
    pub rotation: Rotation,
    pub video_codec: Option<String>,
    pub audio: Option<AudioReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioReport {
    pub sample_rate: u32,
    pub channels: u16,
    pub codec: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Estimate {
    pub quality: QualityTier,
    pub target_bitrate_bps: f64,
    pub estimated_size_bytes: i64,
}

impl ProbeReport {
    pub fn new(file: &Path, descriptor: &TrackDescriptor) -> Self {
        let video = descriptor.video_track();
        Self {
            file: file.to_path_buf(),
            duration_secs: descriptor.duration_secs(),
            width: descriptor.natural_width(),
            height: descriptor.natural_height(),
            frame_rate: descriptor.frame_rate(),
            frame_count: descriptor.total_units(),
            estimated_bitrate_bps: descriptor.estimated_source_bitrate(),
            rotation: descriptor.transform().rotation(),
            video_codec: video.codec.clone(),
            audio: descriptor.audio_track().map(|a| AudioReport {
                sample_rate: a.sample_rate,
                channels: a.channels,
                codec: a.codec.clone(),
            }),
        }
    }

    pub fn print(&self) {
        println!("File: {}", self.file.display());
        println!("Duration: {}", format_duration(self.duration_secs));
        println!(
            "Video: {} {}x{} @ {:.3} fps ({} frames)",
            self.video_codec.as_deref().unwrap_or("unknown"),
            self.width,
            self.height,
            self.frame_rate,
            self.frame_count
        );
        println!("Bitrate: {}", format_bitrate(self.estimated_bitrate_bps));
        if self.rotation != Rotation::None {
            println!("Rotation: {:?}", self.rotation);
        }
        match &self.audio {
            Some(audio) => println!(
                "Audio: {} {} Hz, {}ch (passthrough)",
                audio.codec.as_deref().unwrap_or("unknown"),
                audio.sample_rate,
                audio.channels
            ),
            None => println!("Audio: none"),
        }
    }
}

/// Estimates for `tiers`, in the order given.
pub fn estimates(descriptor: &TrackDescriptor, tiers: &[QualityTier]) -> Vec<Estimate> {
    tiers
        .iter()
        .map(|&quality| Estimate {
            quality,
            target_bitrate_bps: descriptor.target_bitrate(quality),
            estimated_size_bytes: descriptor.estimated_output_size(quality),
        })
        .collect()
}

pub fn format_duration(secs: f64) -> String {
    let total = secs.max(0.0).round() as u64;
    let mins = total / 60;
    let hours = mins / 60;
    format!("{:02}:{:02}:{:02}", hours, mins % 60, total % 60)
}

pub fn format_bitrate(bps: f64) -> String {
    if bps >= 1_000_000.0 {
        format!("{:.2} Mbps", bps / 1_000_000.0)
    } else {
        format!("{:.0} kbps", bps / 1000.0)
    }
}

pub fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes.max(0) as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes.max(0))
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
