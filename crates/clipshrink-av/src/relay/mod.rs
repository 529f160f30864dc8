//! Media relay engine.
//!
//! Drives a source reader into a destination writer, video first and then
//! audio, on dedicated threads. The writer for both tracks is opened up front;
//! the audio relay only starts once the video input has been marked finished.
//!
//! Each track is relayed by a pull loop:
//!
//! 1. wait (bounded) for the writer input to become ready
//! 2. while it stays ready: poll cancellation, pull a sample, append it
//! 3. when the reader runs dry, mark the input finished
//!
//! The engine never chooses a terminal state itself; it returns the relay
//! outcome and the owning [`TranscodeJob`] concludes.

pub mod priming;

pub use priming::{PrimingCorrection, PRIMING_TRIM};

use crate::error::TranscodeError;
use crate::job::{JobState, TranscodeJob};
use crate::media::{
    MediaSource, MediaTime, MediaWriter, ReaderOutput, ReaderStatus, SampleBuffer,
    TrackReader, VideoEncoderSettings, WriterFactory, WriterInput,
};
use crate::track::TrackDescriptor;
use priming::PrimingTrim;
use std::sync::Arc;
use std::time::Duration;

/// Tuning for the relay loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOptions {
    /// Longest a loop sleeps on a writer input before polling cancellation.
    pub readiness_timeout: Duration,
    pub audio_priming: PrimingCorrection,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            readiness_timeout: Duration::from_millis(50),
            audio_priming: PrimingCorrection::Enabled,
        }
    }
}

/// Video frames relayed so far out of the expected total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressReport {
    pub completed_units: u64,
    pub total_units: u64,
}

impl ProgressReport {
    pub fn new(completed_units: u64, total_units: u64) -> Self {
        Self {
            completed_units,
            total_units,
        }
    }

    /// Completion in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.total_units == 0 {
            0.0
        } else {
            (self.completed_units as f64 / self.total_units as f64).min(1.0)
        }
    }
}

/// Receives relay notifications. Called from the relay threads.
pub(crate) trait RelayObserver: Send {
    /// Reader and writer are open and the writer session has begun.
    fn started(&mut self);

    fn progress(&mut self, report: ProgressReport);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpEnd {
    Drained,
    Cancelled,
}

/// Relays one track until the reader runs dry or cancellation is observed.
fn pump(
    reader: &mut dyn TrackReader,
    input: &mut dyn WriterInput,
    job: &TranscodeJob,
    readiness_timeout: Duration,
    mut prepare: impl FnMut(&mut SampleBuffer),
    mut appended: impl FnMut(),
) -> Result<PumpEnd, TranscodeError> {
    loop {
        if job.is_cancel_requested() {
            reader.cancel_reading();
            return Ok(PumpEnd::Cancelled);
        }
        if !input.wait_until_ready(readiness_timeout) {
            continue;
        }

        while input.is_ready_for_more_media_data() {
            if job.is_cancel_requested() {
                reader.cancel_reading();
                return Ok(PumpEnd::Cancelled);
            }

            // a sample handed out after the reader left `Reading` is dropped
            let next = reader
                .copy_next_sample()
                .filter(|_| reader.status() == ReaderStatus::Reading);
            let Some(mut sample) = next else {
                input.mark_as_finished();
                return match reader.status() {
                    ReaderStatus::Completed => Ok(PumpEnd::Drained),
                    ReaderStatus::Cancelled if job.is_cancel_requested() => {
                        Ok(PumpEnd::Cancelled)
                    }
                    ReaderStatus::Failed(detail) => Err(TranscodeError::ReadError(detail)),
                    status => Err(TranscodeError::ReadError(format!(
                        "reader stopped while {:?}",
                        status
                    ))),
                };
            };

            prepare(&mut sample);
            input.append(sample).map_err(TranscodeError::write)?;
            appended();
        }
    }
}

/// Run `relay` on a named thread and wait for it.
fn on_thread<T, F>(name: &str, relay: F) -> Result<T, TranscodeError>
where
    T: Send,
    F: FnOnce() -> Result<T, TranscodeError> + Send,
{
    std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn_scoped(scope, relay)
            .map_err(|e| TranscodeError::Internal(format!("failed to spawn {}: {}", name, e)))?;
        handle
            .join()
            .map_err(|_| TranscodeError::Internal(format!("{} panicked", name)))?
    })
}

/// The pull/push engine for one job.
pub(crate) struct MediaRelayEngine {
    job: TranscodeJob,
    descriptor: TrackDescriptor,
    source: Arc<dyn MediaSource>,
    writers: Arc<dyn WriterFactory>,
    options: RelayOptions,
}

impl MediaRelayEngine {
    pub(crate) fn new(
        job: TranscodeJob,
        descriptor: TrackDescriptor,
        source: Arc<dyn MediaSource>,
        writers: Arc<dyn WriterFactory>,
        options: RelayOptions,
    ) -> Self {
        Self {
            job,
            descriptor,
            source,
            writers,
            options,
        }
    }

    /// Relay every track into the job's destination.
    ///
    /// `Ok(())` with cancellation requested means the relay stopped early and
    /// the writer has been cancelled. A cancel that lands after finalize is
    /// cleaned up when the job concludes.
    pub(crate) fn run(&self, observer: &mut dyn RelayObserver) -> Result<(), TranscodeError> {
        let destination = self
            .job
            .destination()
            .ok_or(TranscodeError::MissingDestination)?;

        let mut writer = self
            .writers
            .create_writer(destination)
            .map_err(TranscodeError::muxer_init)?;

        let result = self.relay(writer.as_mut(), observer);
        if result.is_err() || self.job.is_cancel_requested() {
            writer.cancel_writing();
        }

        #[cfg(feature = "tracing")]
        match &result {
            Ok(()) if self.job.is_cancel_requested() => {
                tracing::debug!("relay into {} cancelled", destination.display())
            }
            Ok(()) => tracing::debug!("relay into {} finished", destination.display()),
            Err(e) => tracing::debug!("relay into {} failed: {}", destination.display(), e),
        }

        result
    }

    fn relay(
        &self,
        writer: &mut dyn MediaWriter,
        observer: &mut dyn RelayObserver,
    ) -> Result<(), TranscodeError> {
        let descriptor = &self.descriptor;
        let timeout = self.options.readiness_timeout;
        let job = &self.job;

        let mut video_reader = self
            .source
            .open_reader(descriptor.video_track().handle, ReaderOutput::DecodedVideo)
            .map_err(TranscodeError::muxer_init)?;
        let mut audio_reader = descriptor
            .audio_track()
            .map(|track| self.source.open_reader(track.handle, ReaderOutput::Passthrough))
            .transpose()
            .map_err(TranscodeError::muxer_init)?;

        let settings = VideoEncoderSettings {
            bitrate_bps: job.target_bitrate(),
            width: descriptor.natural_width(),
            height: descriptor.natural_height(),
            frame_rate: descriptor.frame_rate(),
            transform: descriptor.transform(),
        };
        let mut video_input = writer
            .add_video_input(&settings)
            .map_err(TranscodeError::muxer_init)?;
        let mut audio_input = descriptor
            .audio_track()
            .map(|track| writer.add_audio_input(track))
            .transpose()
            .map_err(TranscodeError::muxer_init)?;

        video_reader
            .start_reading()
            .map_err(TranscodeError::muxer_init)?;
        if let Some(reader) = audio_reader.as_mut() {
            reader.start_reading().map_err(TranscodeError::muxer_init)?;
        }
        writer.start_writing().map_err(TranscodeError::muxer_init)?;
        writer.start_session(MediaTime::ZERO);
        observer.started();

        if !job.transition(JobState::RelayingVideo) {
            return Err(TranscodeError::Internal(format!(
                "cannot relay video from {:?}",
                job.current_state()
            )));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "relaying video: {}x{} @ {:.3} fps, {:.0} bps",
            settings.width,
            settings.height,
            settings.frame_rate,
            settings.bitrate_bps
        );

        let total = descriptor.total_units();
        let video = {
            let reader = video_reader.as_mut();
            let input = video_input.as_mut();
            let observer = &mut *observer;
            on_thread("clipshrink-relay-video", move || {
                let mut completed = 0u64;
                let end = pump(reader, input, job, timeout, |_| {}, || {
                    completed += 1;
                    observer.progress(ProgressReport::new(completed.min(total), total));
                })?;
                // the container may hold fewer frames than duration x rate
                if end == PumpEnd::Drained && completed < total {
                    observer.progress(ProgressReport::new(total, total));
                }
                Ok(end)
            })
        };
        if !matches!(video, Ok(PumpEnd::Drained)) {
            if let Some(reader) = audio_reader.as_mut() {
                reader.cancel_reading();
            }
            return video.map(|_| ());
        }

        if let (Some(reader), Some(input)) = (audio_reader.as_mut(), audio_input.as_mut()) {
            if job.is_cancel_requested() {
                reader.cancel_reading();
                return Ok(());
            }
            if !job.transition(JobState::RelayingAudio) {
                return Err(TranscodeError::Internal(format!(
                    "cannot relay audio from {:?}",
                    job.current_state()
                )));
            }

            #[cfg(feature = "tracing")]
            tracing::debug!("relaying audio");

            let mut priming = PrimingTrim::new(self.options.audio_priming);
            let reader = reader.as_mut();
            let input = input.as_mut();
            let audio = on_thread("clipshrink-relay-audio", move || {
                pump(reader, input, job, timeout, |s| priming.apply(s), || {})
            })?;
            if audio == PumpEnd::Cancelled {
                return Ok(());
            }
        }

        if job.is_cancel_requested() {
            return Ok(());
        }
        writer.finish_writing().map_err(TranscodeError::write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::memory::{RecordingWriterFactory, SyntheticSource, WriterEvent};
    use std::path::PathBuf;

    #[derive(Default)]
    struct Collect {
        started: usize,
        reports: Vec<ProgressReport>,
    }

    impl RelayObserver for Collect {
        fn started(&mut self) {
            self.started += 1;
        }

        fn progress(&mut self, report: ProgressReport) {
            self.reports.push(report);
        }
    }

    fn engine(
        source: SyntheticSource,
        writers: RecordingWriterFactory,
        destination: PathBuf,
    ) -> (MediaRelayEngine, TranscodeJob) {
        let descriptor = TrackDescriptor::from_source(&source).unwrap();
        let job = TranscodeJob::new(1_000_000.0, Some(destination));
        job.transition(JobState::Started);
        let engine = MediaRelayEngine::new(
            job.clone(),
            descriptor,
            Arc::new(source),
            Arc::new(writers),
            RelayOptions::default(),
        );
        (engine, job)
    }

    #[test]
    fn test_relays_video_then_audio() {
        let dir = tempfile::tempdir().unwrap();
        let source = SyntheticSource::new(1.0, 30.0, 64, 48, 2e6).with_audio(44100, 2);
        let writers = RecordingWriterFactory::new();
        let (engine, job) = engine(source, writers.clone(), dir.path().join("out.mp4"));

        let mut observer = Collect::default();
        engine.run(&mut observer).unwrap();
        assert_eq!(job.current_state(), JobState::RelayingAudio);
        assert_eq!(observer.started, 1);
        assert_eq!(observer.reports.len(), 30);
        assert_eq!(observer.reports.last(), Some(&ProgressReport::new(30, 30)));

        let recording = writers.last_recording().unwrap();
        assert!(recording.is_finished());
        assert_eq!(recording.video_samples.len(), 30);
        assert_eq!(recording.audio_samples.len(), 44);
        assert_eq!(
            recording.events[..3],
            [
                WriterEvent::InputAdded(crate::media::memory::InputKind::Video),
                WriterEvent::InputAdded(crate::media::memory::InputKind::Audio),
                WriterEvent::StartedWriting,
            ]
        );
        assert_eq!(
            recording.video_settings.unwrap().bitrate_bps,
            job.target_bitrate()
        );
    }

    struct Overstated(SyntheticSource);

    impl MediaSource for Overstated {
        fn tracks(&self) -> crate::Result<crate::media::SourceTracks> {
            let mut tracks = self.0.tracks()?;
            tracks.video[0].duration_secs *= 2.0;
            Ok(tracks)
        }

        fn open_reader(
            &self,
            track: crate::media::TrackHandle,
            output: ReaderOutput,
        ) -> crate::Result<Box<dyn TrackReader>> {
            self.0.open_reader(track, output)
        }
    }

    #[test]
    fn test_catch_up_progress_when_track_runs_short() {
        let dir = tempfile::tempdir().unwrap();
        let source = Overstated(SyntheticSource::new(0.5, 10.0, 16, 16, 1e5));
        let descriptor = TrackDescriptor::from_source(&source).unwrap();
        assert_eq!(descriptor.total_units(), 10);

        let job = TranscodeJob::new(1e4, Some(dir.path().join("a.mp4")));
        job.transition(JobState::Started);
        let engine = MediaRelayEngine::new(
            job,
            descriptor,
            Arc::new(source),
            Arc::new(RecordingWriterFactory::new()),
            RelayOptions::default(),
        );
        let mut observer = Collect::default();
        engine.run(&mut observer).unwrap();

        assert_eq!(observer.reports.len(), 6);
        assert_eq!(observer.reports[4], ProgressReport::new(5, 10));
        assert_eq!(observer.reports[5], ProgressReport::new(10, 10));
    }

    #[test]
    fn test_progress_fraction() {
        assert_eq!(ProgressReport::new(15, 30).fraction(), 0.5);
        assert_eq!(ProgressReport::new(0, 0).fraction(), 0.0);
        assert_eq!(ProgressReport::new(40, 30).fraction(), 1.0);
    }

    /// Hands out one more sample after it has already failed.
    struct LateSample {
        emitted: u32,
        status: ReaderStatus,
    }

    impl TrackReader for LateSample {
        fn start_reading(&mut self) -> crate::Result<()> {
            self.status = ReaderStatus::Reading;
            Ok(())
        }

        fn copy_next_sample(&mut self) -> Option<SampleBuffer> {
            self.emitted += 1;
            if self.emitted == 3 {
                self.status = ReaderStatus::Failed("decoder lost sync".to_string());
            }
            (self.emitted <= 3).then(|| {
                SampleBuffer::new(vec![1u8; 4], MediaTime::ZERO, MediaTime::new(1, 30))
            })
        }

        fn status(&self) -> ReaderStatus {
            self.status.clone()
        }

        fn cancel_reading(&mut self) {}
    }

    #[derive(Default)]
    struct CountingInput {
        appended: usize,
        finished: bool,
    }

    impl WriterInput for CountingInput {
        fn wait_until_ready(&self, _timeout: Duration) -> bool {
            true
        }

        fn is_ready_for_more_media_data(&self) -> bool {
            true
        }

        fn append(&mut self, _sample: SampleBuffer) -> crate::Result<()> {
            self.appended += 1;
            Ok(())
        }

        fn mark_as_finished(&mut self) {
            self.finished = true;
        }
    }

    #[test]
    fn test_sample_after_reader_failed_is_not_appended() {
        let mut reader = LateSample {
            emitted: 0,
            status: ReaderStatus::Unknown,
        };
        reader.start_reading().unwrap();
        let mut input = CountingInput::default();
        let job = TranscodeJob::new(1e6, None);

        let err = pump(&mut reader, &mut input, &job, Duration::from_millis(1), |_| {}, || {})
            .unwrap_err();
        assert_eq!(err, TranscodeError::ReadError("decoder lost sync".to_string()));
        assert_eq!(input.appended, 2);
        assert!(input.finished);
    }

    #[test]
    fn test_read_failure_cancels_writer() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.mp4");
        let source = SyntheticSource::new(1.0, 30.0, 64, 48, 2e6).fail_video_after(5);
        let writers = RecordingWriterFactory::new();
        let (engine, _job) = engine(source, writers.clone(), destination.clone());

        let err = engine.run(&mut Collect::default()).unwrap_err();
        assert!(matches!(err, TranscodeError::ReadError(_)));
        assert!(writers.last_recording().unwrap().is_cancelled());
        assert!(!destination.exists());
    }
}
