//! Encoder priming compensation for the relayed audio track.
//!
//! AAC encoders prepend one frame of priming samples. The first relayed audio
//! sample gets a trim annotation of [`PRIMING_TRIM`] so playback starts in
//! sync with video. Only the first sample of a session is touched.

use crate::media::{MediaTime, SampleBuffer};

/// One AAC frame at 44.1 kHz.
pub const PRIMING_TRIM: MediaTime = MediaTime::new(1024, 44100);

/// Whether the first audio sample is annotated with [`PRIMING_TRIM`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimingCorrection {
    #[default]
    Enabled,
    Disabled,
}

impl From<bool> for PrimingCorrection {
    fn from(enabled: bool) -> Self {
        if enabled {
            Self::Enabled
        } else {
            Self::Disabled
        }
    }
}

/// One-shot trim applied to the first sample it sees.
#[derive(Debug)]
pub(crate) struct PrimingTrim {
    pending: bool,
}

impl PrimingTrim {
    pub(crate) fn new(correction: PrimingCorrection) -> Self {
        Self {
            pending: correction == PrimingCorrection::Enabled,
        }
    }

    pub(crate) fn apply(&mut self, sample: &mut SampleBuffer) {
        if std::mem::take(&mut self.pending) {
            sample.trim_at_start = Some(PRIMING_TRIM);
        }
    }
}
