//! The media I/O seam.
//!
//! The relay engine talks to demuxers, decoders, encoders and muxers only
//! through the traits in this module:
//!
//! - [`MediaSource`] describes a source asset and opens [`TrackReader`]s on
//!   its tracks.
//! - [`WriterFactory`] creates a [`MediaWriter`] for a destination that does
//!   not exist yet. The writer hands out one [`WriterInput`] per track.
//!
//! A [`WriterInput`] signals back-pressure through
//! [`WriterInput::is_ready_for_more_media_data`] and lets the relay sleep until
//! it is ready again with [`WriterInput::wait_until_ready`].
//!
//! Backends:
//!
//! - [`memory`]: synthetic source and recording writer
//! - [`mp4`]: MP4 source backed by `clipshrink-media`
//! - `ffmpeg`: decoding source and H.264 writer (feature `native-ffmpeg`)

pub mod memory;
pub mod mp4;

#[cfg(feature = "native-ffmpeg")]
pub mod ffmpeg;

use crate::track::Transform;
use crate::Result;
use bytes::Bytes;
use std::path::Path;
use std::time::Duration;

/// A rational timestamp: `value / timescale` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: i32,
}

impl MediaTime {
    pub const ZERO: Self = Self {
        value: 0,
        timescale: 1,
    };

    pub const fn new(value: i64, timescale: i32) -> Self {
        Self { value, timescale }
    }

    /// Nearest representation of `seconds` in `timescale` units.
    pub fn from_seconds(seconds: f64, timescale: i32) -> Self {
        Self::new((seconds * timescale as f64).round() as i64, timescale)
    }

    pub fn seconds(&self) -> f64 {
        if self.timescale <= 0 {
            0.0
        } else {
            self.value as f64 / self.timescale as f64
        }
    }

    /// The same instant expressed in `timescale` units, rounded to nearest.
    pub fn rescale(&self, timescale: i32) -> Self {
        if self.timescale == timescale || self.timescale <= 0 || timescale <= 0 {
            return Self::new(if self.timescale <= 0 { 0 } else { self.value }, timescale);
        }
        let scaled = self.value as i128 * timescale as i128;
        let from = self.timescale as i128;
        let half = from / 2;
        let rounded = if scaled >= 0 {
            (scaled + half) / from
        } else {
            (scaled - half) / from
        };
        Self::new(rounded as i64, timescale)
    }
}

/// One unit of media: a video frame or a chunk of audio.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    pub data: Bytes,
    pub pts: MediaTime,
    pub duration: MediaTime,
    pub is_sync: bool,
    /// Media to drop from the start of this sample on playback (encoder
    /// priming).
    pub trim_at_start: Option<MediaTime>,
}

impl SampleBuffer {
    pub fn new(data: impl Into<Bytes>, pts: MediaTime, duration: MediaTime) -> Self {
        Self {
            data: data.into(),
            pts,
            duration,
            is_sync: true,
            trim_at_start: None,
        }
    }

    pub fn with_sync(mut self, is_sync: bool) -> Self {
        self.is_sync = is_sync;
        self
    }
}

/// Backend-specific track identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackHandle(pub u32);

/// Video track metadata as reported by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoTrackInfo {
    pub handle: TrackHandle,
    pub duration_secs: f64,
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
    /// Average bits per second of the compressed track.
    pub estimated_data_rate: f64,
    pub transform: Transform,
    pub codec: Option<String>,
}

impl VideoTrackInfo {
    /// A track the engine can relay: positive frame rate and non-zero size.
    pub fn is_decodable(&self) -> bool {
        self.frame_rate.is_finite() && self.frame_rate > 0.0 && self.width > 0 && self.height > 0
    }
}

/// Audio track metadata as reported by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrackInfo {
    pub handle: TrackHandle,
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub codec: Option<String>,
}

/// All tracks of a source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceTracks {
    /// Container duration in seconds.
    pub duration_secs: f64,
    pub video: Vec<VideoTrackInfo>,
    pub audio: Vec<AudioTrackInfo>,
}

/// What a reader hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderOutput {
    /// Decoded frames, ready for an encoder.
    DecodedVideo,
    /// Compressed samples exactly as stored.
    Passthrough,
}

/// Reader lifecycle as observed by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReaderStatus {
    #[default]
    Unknown,
    Reading,
    Completed,
    Failed(String),
    Cancelled,
}

/// Settings for the re-encoded video track.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoderSettings {
    pub bitrate_bps: f64,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    /// Copied verbatim from the source track.
    pub transform: Transform,
}

/// A source asset.
pub trait MediaSource: Send + Sync {
    /// Probe the tracks of the source.
    fn tracks(&self) -> Result<SourceTracks>;

    /// Open a reader on one track.
    fn open_reader(&self, track: TrackHandle, output: ReaderOutput) -> Result<Box<dyn TrackReader>>;
}

/// Pull-based reader over one track.
pub trait TrackReader: Send {
    fn start_reading(&mut self) -> Result<()>;

    /// Next sample in decode order. `None` means the track is exhausted, the
    /// reader failed or was cancelled; [`TrackReader::status`] tells which.
    /// The relay only appends samples returned while the status is
    /// [`ReaderStatus::Reading`].
    fn copy_next_sample(&mut self) -> Option<SampleBuffer>;

    fn status(&self) -> ReaderStatus;

    /// Stop reading and release buffers. Idempotent.
    fn cancel_reading(&mut self);
}

/// Creates writers for destinations.
pub trait WriterFactory: Send + Sync {
    /// Create a writer for `destination`. Fails if the destination exists.
    fn create_writer(&self, destination: &Path) -> Result<Box<dyn MediaWriter>>;
}

/// A muxing session over one destination.
///
/// Inputs are added before [`MediaWriter::start_writing`]. Samples are
/// accepted once [`MediaWriter::start_session`] has been called.
pub trait MediaWriter: Send {
    fn add_video_input(&mut self, settings: &VideoEncoderSettings) -> Result<Box<dyn WriterInput>>;

    /// Add a pass-through input for `track`.
    fn add_audio_input(&mut self, track: &AudioTrackInfo) -> Result<Box<dyn WriterInput>>;

    fn start_writing(&mut self) -> Result<()>;

    fn start_session(&mut self, at: MediaTime);

    /// Finalize the destination. Every input must have been marked finished.
    fn finish_writing(&mut self) -> Result<()>;

    /// Abort and discard any partial output. Idempotent.
    fn cancel_writing(&mut self);
}

/// One track's input into a [`MediaWriter`].
pub trait WriterInput: Send {
    /// Block until the input is ready for more data or `timeout` elapses.
    /// Returns the readiness at return time.
    fn wait_until_ready(&self, timeout: Duration) -> bool;

    fn is_ready_for_more_media_data(&self) -> bool;

    fn append(&mut self, sample: SampleBuffer) -> Result<()>;

    fn mark_as_finished(&mut self);
}
