//! # clipshrink-av
//!
//! Video compression engine: re-encodes the video track of a source at a
//! reduced bitrate and passes audio through, with progress reporting and
//! cooperative cancellation.
//!
//! The crate is organised bottom-up:
//!
//! - [`bitrate`] - quality tiers, target bitrate and output-size estimates
//! - [`track`] - immutable description of the source tracks
//! - [`job`] - lifecycle state and the cancellation flag of one attempt
//! - [`media`] - the reader/writer seam and its backends
//! - [`relay`] - the pull loops moving samples from reader to writer
//! - [`session`] - the public façade tying it all together
//!
//! ## Features
//!
//! - `native-ffmpeg` - FFmpeg backend (decode, H.264 encode, audio copy)
//! - `tracing` - Enable tracing support
//!
//! ## Example
//!
//! ```no_run
//! use clipshrink_av::media::mp4::Mp4Source;
//! use clipshrink_av::{QualityTier, TrackDescriptor};
//!
//! let source = Mp4Source::open("/path/to/clip.mp4")?;
//! let descriptor = TrackDescriptor::from_source(&source)?;
//! for tier in QualityTier::ALL {
//!     println!("{}: {} bytes", tier, descriptor.estimated_output_size(tier));
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod error;

pub mod bitrate;
pub mod job;
pub mod media;
pub mod relay;
pub mod session;
pub mod track;

// Re-exports
pub use bitrate::{estimated_output_size_bytes, target_bitrate, ParseQualityTierError, QualityTier};
pub use error::{Error, Result, TranscodeError};
pub use job::{CancellationHandle, JobState, TranscodeJob};
pub use relay::{PrimingCorrection, ProgressReport, RelayOptions};
pub use session::{
    CallbackContext, CompletionEvent, TranscodeEvent, TranscodeOutcome, TranscodeSession,
    TranscodeSessionBuilder,
};
pub use track::{Rotation, TrackDescriptor, Transform};
