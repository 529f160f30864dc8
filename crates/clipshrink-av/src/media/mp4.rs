//! MP4 source backed by the `clipshrink-media` demuxer.
//!
//! Probes track metadata and reads compressed samples. It cannot decode, so
//! [`ReaderOutput::DecodedVideo`] readers are refused; pair it with a writer
//! that accepts compressed input, or use the FFmpeg backend.

use super::{
    AudioTrackInfo, MediaSource, MediaTime, ReaderOutput, ReaderStatus, SampleBuffer,
    SourceTracks, TrackHandle, TrackReader, VideoTrackInfo,
};
use crate::track::Transform;
use crate::{Error, Result};
use clipshrink_media::{Mp4File, Mp4SampleReader, TrackInfo};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// An MP4 file on disk.
#[derive(Debug)]
pub struct Mp4Source {
    path: PathBuf,
    file: Mp4File,
}

impl Mp4Source {
    /// Parse the `moov` of `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = Mp4File::open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `moov` precedes `mdat`.
    pub fn has_faststart(&self) -> bool {
        self.file.has_faststart
    }

    fn track(&self, handle: TrackHandle) -> Option<&TrackInfo> {
        [self.file.video_track.as_ref(), self.file.audio_track.as_ref()]
            .into_iter()
            .flatten()
            .find(|t| t.track_id == handle.0)
    }
}

fn video_info(track: &TrackInfo) -> VideoTrackInfo {
    VideoTrackInfo {
        handle: TrackHandle(track.track_id),
        duration_secs: track.duration_secs(),
        frame_rate: track.nominal_frame_rate(),
        width: track.width.unwrap_or(0),
        height: track.height.unwrap_or(0),
        estimated_data_rate: track.estimated_data_rate(),
        transform: Transform::from_matrix(track.matrix),
        codec: track.sample_format_str().map(str::to_string),
    }
}

fn audio_info(track: &TrackInfo) -> AudioTrackInfo {
    AudioTrackInfo {
        handle: TrackHandle(track.track_id),
        duration_secs: track.duration_secs(),
        sample_rate: track.sample_rate.unwrap_or(track.timescale),
        channels: track.channels.unwrap_or(0),
        codec: track.sample_format_str().map(str::to_string),
    }
}

impl MediaSource for Mp4Source {
    fn tracks(&self) -> Result<SourceTracks> {
        Ok(SourceTracks {
            duration_secs: self.file.duration_secs(),
            video: self.file.video_track.iter().map(video_info).collect(),
            audio: self.file.audio_track.iter().map(audio_info).collect(),
        })
    }

    fn open_reader(&self, handle: TrackHandle, output: ReaderOutput) -> Result<Box<dyn TrackReader>> {
        let track = self.track(handle).ok_or(Error::TrackNotFound(handle.0))?;
        if output == ReaderOutput::DecodedVideo {
            return Err(Error::unsupported(format!(
                "{} cannot be decoded without the native-ffmpeg feature",
                track.sample_format_str().unwrap_or("video")
            )));
        }
        let reader = Mp4SampleReader::open(&self.path, track)?;
        Ok(Box::new(Mp4TrackReader {
            reader,
            status: ReaderStatus::Unknown,
        }))
    }
}

/// Passthrough reader over one MP4 track.
pub struct Mp4TrackReader {
    reader: Mp4SampleReader<BufReader<File>>,
    status: ReaderStatus,
}

impl TrackReader for Mp4TrackReader {
    fn start_reading(&mut self) -> Result<()> {
        if self.status != ReaderStatus::Unknown {
            return Err(Error::invalid_input("reader already started"));
        }
        self.status = ReaderStatus::Reading;
        Ok(())
    }

    fn copy_next_sample(&mut self) -> Option<SampleBuffer> {
        if self.status != ReaderStatus::Reading {
            return None;
        }
        match self.reader.next_sample() {
            Ok(Some(sample)) => {
                let Ok(timescale) = i32::try_from(sample.timescale) else {
                    self.status =
                        ReaderStatus::Failed(format!("timescale {} out of range", sample.timescale));
                    return None;
                };
                Some(
                    SampleBuffer::new(
                        sample.data,
                        MediaTime::new(sample.pts as i64, timescale),
                        MediaTime::new(sample.duration as i64, timescale),
                    )
                    .with_sync(sample.is_keyframe),
                )
            }
            Ok(None) => {
                self.status = ReaderStatus::Completed;
                None
            }
            Err(err) => {
                self.status = ReaderStatus::Failed(err.to_string());
                None
            }
        }
    }

    fn status(&self) -> ReaderStatus {
        self.status.clone()
    }

    fn cancel_reading(&mut self) {
        if matches!(self.status, ReaderStatus::Unknown | ReaderStatus::Reading) {
            self.status = ReaderStatus::Cancelled;
        }
    }
}
