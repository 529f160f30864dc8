//! MP4 atom definitions and parsing.

use super::SampleTable;

/// Four-character atom type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomType(pub [u8; 4]);

impl AtomType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MDAT: Self = Self(*b"mdat");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const STTS: Self = Self(*b"stts");
    pub const STSS: Self = Self(*b"stss");
    pub const STSC: Self = Self(*b"stsc");
    pub const STSZ: Self = Self(*b"stsz");
    pub const STCO: Self = Self(*b"stco");
    pub const CO64: Self = Self(*b"co64");
    pub const CTTS: Self = Self(*b"ctts");
    pub const UDTA: Self = Self(*b"udta");

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for AtomType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parsed atom header.
#[derive(Debug, Clone)]
pub struct Atom {
    /// Atom type code.
    pub atom_type: AtomType,
    /// Atom size including header.
    pub size: u64,
    /// File offset where atom data starts (after header).
    pub data_offset: u64,
    /// Size of the header (8 or 16 bytes).
    pub header_size: u8,
}

impl Atom {
    /// Get the data size (size - header).
    pub fn data_size(&self) -> u64 {
        self.size.saturating_sub(self.header_size as u64)
    }

    /// Check if this atom contains child atoms.
    pub fn is_container(&self) -> bool {
        matches!(
            self.atom_type,
            AtomType::MOOV
                | AtomType::TRAK
                | AtomType::MDIA
                | AtomType::MINF
                | AtomType::STBL
                | AtomType::UDTA
        )
    }
}

/// Handler type for a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerType {
    Video,
    Audio,
    Hint,
    Meta,
    Text,
    Unknown([u8; 4]),
}

impl HandlerType {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        match &bytes {
            b"vide" => Self::Video,
            b"soun" => Self::Audio,
            b"hint" => Self::Hint,
            b"meta" => Self::Meta,
            b"text" => Self::Text,
            _ => Self::Unknown(bytes),
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video)
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio)
    }
}

/// Display rotation derived from a track's transform matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Rotate180,
    Cw270,
}

impl Rotation {
    /// Clockwise rotation in degrees.
    pub fn degrees(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Cw90 => 90,
            Self::Rotate180 => 180,
            Self::Cw270 => 270,
        }
    }
}

/// The 3x3 display matrix stored in `tkhd`.
///
/// Layout is `[a, b, u, c, d, v, x, y, w]`: `a b c d x y` are 16.16 fixed
/// point, `u v w` are 2.30 fixed point. FFmpeg's display-matrix side data
/// uses the same layout, so the values travel between backends unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TransformMatrix(pub [i32; 9]);

impl TransformMatrix {
    const ONE: i32 = 0x0001_0000;
    const W_ONE: i32 = 0x4000_0000;

    pub const IDENTITY: Self = Self([Self::ONE, 0, 0, 0, Self::ONE, 0, 0, 0, Self::W_ONE]);

    /// Parse from the 36 big-endian bytes found in `tkhd`/`mvhd`.
    pub fn from_be_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 36 {
            return None;
        }
        let mut values = [0i32; 9];
        for (i, value) in values.iter_mut().enumerate() {
            let o = i * 4;
            *value = i32::from_be_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);
        }
        Some(Self(values))
    }

    /// Serialize to the 36 big-endian bytes used by `tkhd`.
    pub fn to_be_bytes(&self) -> [u8; 36] {
        let mut out = [0u8; 36];
        for (i, value) in self.0.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&value.to_be_bytes());
        }
        out
    }

    /// Pure rotation matrix for a display rotation.
    pub fn for_rotation(rotation: Rotation) -> Self {
        let (a, b, c, d) = match rotation {
            Rotation::None => (Self::ONE, 0, 0, Self::ONE),
            Rotation::Cw90 => (0, Self::ONE, -Self::ONE, 0),
            Rotation::Rotate180 => (-Self::ONE, 0, 0, -Self::ONE),
            Rotation::Cw270 => (0, -Self::ONE, Self::ONE, 0),
        };
        Self([a, b, 0, c, d, 0, 0, 0, Self::W_ONE])
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Rotation encoded by the matrix, snapped to the nearest quarter turn.
    ///
    /// Translation and scale are ignored; a matrix that is not a rotation
    /// (e.g. a mirror) still reports the quarter turn closest to its `a`/`b`
    /// column.
    pub fn rotation(&self) -> Rotation {
        let a = self.0[0] as f64;
        let b = self.0[1] as f64;
        if a == 0.0 && b == 0.0 {
            return Rotation::None;
        }
        let degrees = b.atan2(a).to_degrees();
        let quarter = ((degrees / 90.0).round() as i64).rem_euclid(4);
        match quarter {
            1 => Rotation::Cw90,
            2 => Rotation::Rotate180,
            3 => Rotation::Cw270,
            _ => Rotation::None,
        }
    }
}

impl Default for TransformMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Track information extracted from trak atom.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    /// Track ID.
    pub track_id: u32,
    /// Handler type (video/audio/etc).
    pub handler_type: HandlerType,
    /// Track duration in media timescale.
    pub duration: u64,
    /// Media timescale (samples per second for this track).
    pub timescale: u32,
    /// Sample table with all sample info.
    pub sample_table: SampleTable,
    /// Sample entry format of the first `stsd` entry (avc1, hvc1, mp4a, ...).
    pub sample_format: Option<[u8; 4]>,
    /// Codec configuration data (avcC, hvcC, esds, etc).
    pub codec_data: Option<Vec<u8>>,
    /// Display matrix from `tkhd`.
    pub matrix: TransformMatrix,
    /// Width (for video tracks).
    pub width: Option<u32>,
    /// Height (for video tracks).
    pub height: Option<u32>,
    /// Sample rate (for audio tracks).
    pub sample_rate: Option<u32>,
    /// Channel count (for audio tracks).
    pub channels: Option<u16>,
}

impl TrackInfo {
    /// Create empty track info.
    pub fn new(track_id: u32) -> Self {
        Self {
            track_id,
            handler_type: HandlerType::Unknown([0; 4]),
            duration: 0,
            timescale: 1,
            sample_table: SampleTable::default(),
            sample_format: None,
            codec_data: None,
            matrix: TransformMatrix::IDENTITY,
            width: None,
            height: None,
            sample_rate: None,
            channels: None,
        }
    }

    /// Get duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.timescale == 0 {
            0.0
        } else {
            self.duration as f64 / self.timescale as f64
        }
    }

    /// Average sample rate of the track (frames per second for video).
    pub fn nominal_frame_rate(&self) -> f64 {
        let secs = self.duration_secs();
        if secs <= 0.0 {
            0.0
        } else {
            self.sample_table.sample_count as f64 / secs
        }
    }

    /// Average data rate in bits per second, from the sample sizes alone.
    pub fn estimated_data_rate(&self) -> f64 {
        let secs = self.duration_secs();
        if secs <= 0.0 {
            0.0
        } else {
            self.sample_table.total_size() as f64 * 8.0 / secs
        }
    }

    /// Sample entry format as a string, if known.
    pub fn sample_format_str(&self) -> Option<&str> {
        self.sample_format
            .as_ref()
            .and_then(|f| std::str::from_utf8(f).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_has_no_rotation() {
        assert_eq!(TransformMatrix::IDENTITY.rotation(), Rotation::None);
        assert!(TransformMatrix::default().is_identity());
    }

    #[test]
    fn test_rotation_matrices_are_recognized() {
        for rotation in [
            Rotation::None,
            Rotation::Cw90,
            Rotation::Rotate180,
            Rotation::Cw270,
        ] {
            assert_eq!(TransformMatrix::for_rotation(rotation).rotation(), rotation);
        }
    }

    #[test]
    fn test_matrix_byte_layout() {
        let matrix = TransformMatrix::for_rotation(Rotation::Cw90);
        let bytes = matrix.to_be_bytes();
        // b = 1.0 in 16.16
        assert_eq!(&bytes[4..8], &[0x00, 0x01, 0x00, 0x00]);
        // c = -1.0 in 16.16
        assert_eq!(&bytes[12..16], &[0xFF, 0xFF, 0x00, 0x00]);
        assert_eq!(TransformMatrix::from_be_bytes(&bytes), Some(matrix));
        assert_eq!(TransformMatrix::from_be_bytes(&bytes[..20]), None);
    }

    #[test]
    fn test_zero_duration_rates() {
        let track = TrackInfo::new(1);
        assert_eq!(track.nominal_frame_rate(), 0.0);
        assert_eq!(track.estimated_data_rate(), 0.0);
    }
}
