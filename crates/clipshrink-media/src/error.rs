//! Error types for clipshrink-media.

use crate::mp4::AtomType;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Why an MP4 file could not be parsed or read.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A box the parser cannot do without, e.g. `moov`.
    #[error("Missing required atom: {0}")]
    MissingAtom(&'static str),

    /// Atom bodies are read into memory; this one is larger than allowed.
    #[error("Atom {atom} is {size} bytes (limit {limit})")]
    AtomTooLarge { atom: AtomType, size: u64, limit: u64 },

    /// Sample index past the end of a track's sample table.
    #[error("Sample {index} out of range (track has {count} samples)")]
    SampleOutOfRange { index: u32, count: u32 },

    /// A sample table entry points past the end of the file.
    #[error("Sample {index} ends at byte {end} but the file is {len} bytes")]
    SampleBeyondEof { index: u32, end: u64, len: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atom_too_large_names_the_atom() {
        let err = Error::AtomTooLarge {
            atom: AtomType::MOOV,
            size: 1 << 30,
            limit: 64 << 20,
        };
        assert_eq!(
            err.to_string(),
            "Atom moov is 1073741824 bytes (limit 67108864)"
        );
    }
}
