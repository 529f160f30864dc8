//! clipshrink-media: MP4 container parsing for the transcoding engine.
//!
//! This crate reads just enough of an ISO-BMFF file to describe its tracks
//! before any decoding happens, and to serve compressed samples straight from
//! the file for pass-through relays.
//!
//! # Modules
//!
//! - `mp4` - MP4 container parsing (moov, tkhd display matrix, sample tables)
//! - `fixtures` - Progressive MP4 writer for tests (feature `fixtures`)
//!
//! # Probing
//!
//! A probe walks the `moov` atom once:
//!
//! 1. `mvhd` for the movie timescale and duration
//! 2. `tkhd` for track id, natural size and the display matrix (orientation)
//! 3. `mdhd`/`hdlr` for the media timescale and handler type
//! 4. `stsd`/`stts`/`stsz`/`stsc`/`stco` to resolve every sample's offset,
//!    size and decode time
//!
//! The resulting [`Mp4File`] carries the first video and first audio track.

pub mod error;
pub mod mp4;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use error::{Error, Result};
pub use mp4::{Mp4File, Mp4SampleReader, Rotation, TrackInfo, TransformMatrix};
