//! Track descriptor: an immutable snapshot of the source's track metadata.

use crate::bitrate::{self, QualityTier};
use crate::error::TranscodeError;
use crate::media::{AudioTrackInfo, MediaSource, SourceTracks, VideoTrackInfo};
use clipshrink_media::TransformMatrix;

pub use clipshrink_media::Rotation;

/// Display transform of a video track.
///
/// Wraps the 3x3 `tkhd` display matrix. The matrix is carried verbatim from
/// source to encoder; [`Transform::rotation`] is derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Transform {
    matrix: TransformMatrix,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        matrix: TransformMatrix::IDENTITY,
    };

    pub fn from_matrix(matrix: TransformMatrix) -> Self {
        Self { matrix }
    }

    pub fn from_rotation(rotation: Rotation) -> Self {
        Self::from_matrix(TransformMatrix::for_rotation(rotation))
    }

    pub fn matrix(&self) -> TransformMatrix {
        self.matrix
    }

    pub fn rotation(&self) -> Rotation {
        self.matrix.rotation()
    }

    pub fn is_identity(&self) -> bool {
        self.matrix.is_identity()
    }
}

impl From<TransformMatrix> for Transform {
    fn from(matrix: TransformMatrix) -> Self {
        Self::from_matrix(matrix)
    }
}

/// Number of video frames expected for a track: `ceil(duration * fps)`,
/// never less than one.
pub fn frame_count(duration_secs: f64, frame_rate: f64) -> u64 {
    let frames = (duration_secs * frame_rate).ceil();
    if frames.is_finite() && frames >= 1.0 {
        frames as u64
    } else {
        1
    }
}

/// Read-only description of the source asset, built once per session.
#[derive(Debug, Clone)]
pub struct TrackDescriptor {
    duration_secs: f64,
    frame_rate: f64,
    natural_width: u32,
    natural_height: u32,
    estimated_source_bitrate: f64,
    transform: Transform,
    video_track: VideoTrackInfo,
    audio_track: Option<AudioTrackInfo>,
}

impl TrackDescriptor {
    /// Probe `source` and describe its first decodable video track and first
    /// audio track.
    pub fn from_source(source: &dyn MediaSource) -> Result<Self, TranscodeError> {
        let tracks = source
            .tracks()
            .map_err(|e| TranscodeError::SourceUnreadable(e.to_string()))?;
        Self::from_tracks(tracks)
    }

    /// Describe already-probed tracks.
    pub fn from_tracks(tracks: SourceTracks) -> Result<Self, TranscodeError> {
        let SourceTracks {
            duration_secs: container_duration,
            video,
            audio,
        } = tracks;

        let video_track = video
            .into_iter()
            .find(VideoTrackInfo::is_decodable)
            .ok_or(TranscodeError::NoVideoTrack)?;

        let duration_secs = if video_track.duration_secs > 0.0 {
            video_track.duration_secs
        } else {
            container_duration.max(0.0)
        };
        let estimated_source_bitrate = if video_track.estimated_data_rate.is_finite() {
            video_track.estimated_data_rate.max(0.0)
        } else {
            0.0
        };

        Ok(Self {
            duration_secs,
            frame_rate: video_track.frame_rate,
            natural_width: video_track.width,
            natural_height: video_track.height,
            estimated_source_bitrate,
            transform: video_track.transform,
            video_track,
            audio_track: audio.into_iter().next(),
        })
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn natural_width(&self) -> u32 {
        self.natural_width
    }

    pub fn natural_height(&self) -> u32 {
        self.natural_height
    }

    /// Source video bitrate in bits per second, as measured by the backend.
    pub fn estimated_source_bitrate(&self) -> f64 {
        self.estimated_source_bitrate
    }

    pub fn has_audio_track(&self) -> bool {
        self.audio_track.is_some()
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn video_track(&self) -> &VideoTrackInfo {
        &self.video_track
    }

    pub fn audio_track(&self) -> Option<&AudioTrackInfo> {
        self.audio_track.as_ref()
    }

    /// Progress denominator: one unit per expected video frame.
    pub fn total_units(&self) -> u64 {
        frame_count(self.duration_secs, self.frame_rate)
    }

    pub fn target_bitrate(&self, tier: QualityTier) -> f64 {
        bitrate::target_bitrate(self.estimated_source_bitrate, tier)
    }

    pub fn estimated_output_size(&self, tier: QualityTier) -> i64 {
        bitrate::estimated_output_size_bytes(self.target_bitrate(tier), self.duration_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::TrackHandle;

    fn video(duration: f64, fps: f64, width: u32, height: u32) -> VideoTrackInfo {
        VideoTrackInfo {
            handle: TrackHandle(1),
            duration_secs: duration,
            frame_rate: fps,
            width,
            height,
            estimated_data_rate: 8_000_000.0,
            transform: Transform::IDENTITY,
            codec: None,
        }
    }

    fn audio() -> AudioTrackInfo {
        AudioTrackInfo {
            handle: TrackHandle(2),
            duration_secs: 10.0,
            sample_rate: 44100,
            channels: 2,
            codec: None,
        }
    }

    #[test]
    fn test_scenario_descriptor() {
        let descriptor = TrackDescriptor::from_tracks(SourceTracks {
            duration_secs: 10.0,
            video: vec![video(10.0, 30.0, 1920, 1080)],
            audio: vec![],
        })
        .unwrap();

        assert_eq!(descriptor.total_units(), 300);
        assert!((descriptor.target_bitrate(QualityTier::Medium) - 2_400_000.0).abs() < 1e-6);
        assert_eq!(descriptor.estimated_output_size(QualityTier::Medium), 3_000_000);
        assert!(!descriptor.has_audio_track());
    }

    #[test]
    fn test_no_video_track() {
        let result = TrackDescriptor::from_tracks(SourceTracks {
            duration_secs: 10.0,
            video: vec![],
            audio: vec![audio()],
        });
        assert_eq!(result.unwrap_err(), TranscodeError::NoVideoTrack);
    }

    #[test]
    fn test_skips_undecodable_video_tracks() {
        let mut broken = video(10.0, 0.0, 1920, 1080);
        broken.handle = TrackHandle(7);
        let descriptor = TrackDescriptor::from_tracks(SourceTracks {
            duration_secs: 10.0,
            video: vec![broken, video(10.0, 25.0, 640, 360)],
            audio: vec![audio()],
        })
        .unwrap();

        assert_eq!(descriptor.video_track().handle, TrackHandle(1));
        assert_eq!(descriptor.natural_width(), 640);
        assert!(descriptor.has_audio_track());

        let only_broken = TrackDescriptor::from_tracks(SourceTracks {
            duration_secs: 10.0,
            video: vec![video(10.0, 30.0, 0, 1080)],
            audio: vec![],
        });
        assert_eq!(only_broken.unwrap_err(), TranscodeError::NoVideoTrack);
    }

    #[test]
    fn test_duration_falls_back_to_container() {
        let descriptor = TrackDescriptor::from_tracks(SourceTracks {
            duration_secs: 4.0,
            video: vec![video(0.0, 24.0, 320, 240)],
            audio: vec![],
        })
        .unwrap();
        assert_eq!(descriptor.duration_secs(), 4.0);
        assert_eq!(descriptor.total_units(), 96);
    }

    #[test]
    fn test_frame_count_rounds_up() {
        assert_eq!(frame_count(10.0, 30.0), 300);
        assert_eq!(frame_count(1.01, 30.0), 31);
        assert_eq!(frame_count(0.0, 30.0), 1);
        assert_eq!(frame_count(f64::NAN, 30.0), 1);
    }

    #[test]
    fn test_transform_rotation() {
        let transform = Transform::from_rotation(Rotation::Cw270);
        assert_eq!(transform.rotation(), Rotation::Cw270);
        assert!(!transform.is_identity());
        assert!(Transform::default().is_identity());
    }
}
