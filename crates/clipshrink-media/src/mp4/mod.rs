//! MP4 container parsing.
//!
//! Extracts the track layout of a progressive MP4: per-track timing, natural
//! size, display matrix and the resolved sample table.

mod atoms;
mod reader;
mod sample_reader;
mod sample_table;

pub use atoms::{Atom, AtomType, HandlerType, Rotation, TrackInfo, TransformMatrix};
pub use reader::Mp4Reader;
pub use sample_reader::{Mp4Sample, Mp4SampleReader};
pub use sample_table::{SampleEntry, SampleTable, SampleTableBuilder};

use crate::Result;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

/// Parsed MP4 file with extracted sample tables.
#[derive(Debug)]
pub struct Mp4File {
    /// Duration in timescale units.
    pub duration: u64,
    /// Movie timescale (time units per second).
    pub timescale: u32,
    /// First video track.
    pub video_track: Option<TrackInfo>,
    /// First audio track.
    pub audio_track: Option<TrackInfo>,
    /// Whether moov precedes mdat.
    pub has_faststart: bool,
}

impl Mp4File {
    /// Parse an MP4 file from the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::parse(&mut reader)
    }

    /// Parse an MP4 file from a reader.
    pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        Mp4Reader::new(reader)?.parse()
    }

    /// Movie duration in seconds.
    ///
    /// Falls back to the longest track when `mvhd` carries no duration.
    pub fn duration_secs(&self) -> f64 {
        if self.timescale != 0 && self.duration != 0 {
            return self.duration as f64 / self.timescale as f64;
        }
        [self.video_track.as_ref(), self.audio_track.as_ref()]
            .into_iter()
            .flatten()
            .map(TrackInfo::duration_secs)
            .fold(0.0, f64::max)
    }

    pub fn video_samples(&self) -> Option<&SampleTable> {
        self.video_track.as_ref().map(|t| &t.sample_table)
    }

    pub fn audio_samples(&self) -> Option<&SampleTable> {
        self.audio_track.as_ref().map(|t| &t.sample_table)
    }

    /// Display rotation of the video track.
    pub fn video_rotation(&self) -> Rotation {
        self.video_track
            .as_ref()
            .map_or(Rotation::None, |t| t.matrix.rotation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Mp4FixtureBuilder;
    use std::io::Cursor;

    fn empty(duration: u64, timescale: u32) -> Mp4File {
        Mp4File {
            duration,
            timescale,
            video_track: None,
            audio_track: None,
            has_faststart: true,
        }
    }

    #[test]
    fn test_mp4_file_duration() {
        assert!((empty(120000, 1000).duration_secs() - 120.0).abs() < 0.001);
    }

    #[test]
    fn test_mp4_file_zero_timescale() {
        assert_eq!(empty(120000, 0).duration_secs(), 0.0);
    }

    #[test]
    fn test_duration_falls_back_to_tracks() {
        let mut mp4 = empty(0, 1000);
        let mut track = TrackInfo::new(1);
        track.timescale = 90000;
        track.duration = 180000;
        mp4.video_track = Some(track);
        assert!((mp4.duration_secs() - 2.0).abs() < 0.001);
    }

    #[test]
    fn test_parse_fixture_video_and_audio() {
        let bytes = Mp4FixtureBuilder::new()
            .video(1920, 1080, 30, 60)
            .video_sample_size(2000)
            .audio(44100, 2, 86)
            .rotation(Rotation::Cw90)
            .build();

        let mp4 = Mp4File::parse(&mut Cursor::new(bytes)).unwrap();

        let video = mp4.video_track.as_ref().unwrap();
        assert_eq!(video.width, Some(1920));
        assert_eq!(video.height, Some(1080));
        assert_eq!(video.sample_table.sample_count, 60);
        assert_eq!(video.sample_format_str(), Some("avc1"));
        assert!((video.duration_secs() - 2.0).abs() < 1e-9);
        assert!((video.nominal_frame_rate() - 30.0).abs() < 1e-9);
        // 2000 bytes * 30 fps * 8 bits
        assert!((video.estimated_data_rate() - 480_000.0).abs() < 1e-6);
        assert_eq!(mp4.video_rotation(), Rotation::Cw90);

        let audio = mp4.audio_track.as_ref().unwrap();
        assert_eq!(audio.sample_rate, Some(44100));
        assert_eq!(audio.channels, Some(2));
        assert_eq!(audio.sample_format_str(), Some("mp4a"));
        assert_eq!(audio.sample_table.sample_count, 86);

        assert!(mp4.has_faststart);
        assert!((mp4.duration_secs() - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_parse_audio_only() {
        let bytes = Mp4FixtureBuilder::new().audio(48000, 1, 10).build();
        let mp4 = Mp4File::parse(&mut Cursor::new(bytes)).unwrap();
        assert!(mp4.video_track.is_none());
        assert!(mp4.audio_track.is_some());
        assert_eq!(mp4.video_rotation(), Rotation::None);
    }

    #[test]
    fn test_open_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, Mp4FixtureBuilder::new().video(64, 64, 24, 12).build()).unwrap();

        let mp4 = Mp4File::open(&path).unwrap();
        assert_eq!(mp4.video_samples().map(|t| t.sample_count), Some(12));
        assert!(mp4.audio_samples().is_none());
    }

    #[test]
    fn test_open_garbage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-movie.mp4");
        std::fs::write(&path, b"definitely not an mp4 file").unwrap();
        assert!(Mp4File::open(&path).is_err());
    }
}
