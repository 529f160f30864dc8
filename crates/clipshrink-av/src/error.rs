//! Error types for clipshrink-av.
//!
//! Two kinds of failure live here. [`Error`] is the ordinary `Result` error
//! returned by media backends and helpers. [`TranscodeError`] is the reason
//! carried by a failed transcode; it is plain data delivered through the
//! completion handler and never returned as an `Err` from `start`.

use std::path::PathBuf;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by media backends.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Container parsing failed.
    #[error("container error: {0}")]
    Media(#[from] clipshrink_media::Error),

    /// The writer destination already exists.
    #[error("destination already exists: {}", path.display())]
    DestinationExists { path: PathBuf },

    /// The referenced track does not exist in the source.
    #[error("no such track: {0}")]
    TrackNotFound(u32),

    /// Unsupported operation or format.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A backend reported a failure.
    #[error("{0}")]
    Backend(String),

    /// FFmpeg library error.
    #[cfg(feature = "native-ffmpeg")]
    #[error("FFmpeg error: {0}")]
    FFmpeg(String),
}

impl Error {
    /// Create a destination exists error.
    pub fn destination_exists(path: impl Into<PathBuf>) -> Self {
        Self::DestinationExists { path: path.into() }
    }

    /// Create an unsupported error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

#[cfg(feature = "native-ffmpeg")]
impl From<ffmpeg_the_third::Error> for Error {
    fn from(err: ffmpeg_the_third::Error) -> Self {
        Error::FFmpeg(err.to_string())
    }
}

/// Why a transcode did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscodeError {
    /// The source has no decodable video track.
    #[error("source has no decodable video track")]
    NoVideoTrack,

    /// No destination was configured.
    #[error("no destination configured")]
    MissingDestination,

    /// The writer or a reader could not be created or started.
    #[error("failed to initialize reader/writer: {0}")]
    MuxerInit(String),

    /// The source reader failed mid-relay.
    #[error("read error: {0}")]
    ReadError(String),

    /// Appending to or finalizing the writer failed.
    #[error("write error: {0}")]
    WriteError(String),

    /// The source could not be probed.
    #[error("source unreadable: {0}")]
    SourceUnreadable(String),

    /// The session was already started once.
    #[error("session already started")]
    AlreadyStarted,

    /// A relay thread could not be spawned or panicked.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TranscodeError {
    pub(crate) fn muxer_init(err: impl std::fmt::Display) -> Self {
        Self::MuxerInit(err.to_string())
    }

    pub(crate) fn write(err: impl std::fmt::Display) -> Self {
        Self::WriteError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::destination_exists("/tmp/out.mp4");
        assert_eq!(err.to_string(), "destination already exists: /tmp/out.mp4");

        let err = Error::from(clipshrink_media::Error::MissingAtom("moov"));
        assert!(err.to_string().contains("moov"));
    }

    #[test]
    fn test_transcode_error_carries_detail() {
        let err = TranscodeError::muxer_init(Error::unsupported("decoded video"));
        assert_eq!(
            err,
            TranscodeError::MuxerInit("unsupported: decoded video".to_string())
        );
        assert!(err.to_string().starts_with("failed to initialize"));
    }
}
