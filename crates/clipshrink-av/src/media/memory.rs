//! In-memory backend.
//!
//! [`SyntheticSource`] fabricates a constant-rate video track and an optional
//! audio track without touching the filesystem. [`RecordingWriterFactory`]
//! creates writers that record everything they are given and model an
//! encoder's back-pressure with a bounded queue drained by a background
//! thread. On finish the writer stores the concatenated payloads at the
//! destination.

use super::{
    AudioTrackInfo, MediaSource, MediaTime, MediaWriter, ReaderOutput, ReaderStatus, SampleBuffer,
    SourceTracks, TrackHandle, TrackReader, VideoEncoderSettings, VideoTrackInfo, WriterFactory,
    WriterInput,
};
use crate::track::{frame_count, Transform};
use crate::{Error, Result};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const VIDEO_HANDLE: TrackHandle = TrackHandle(1);
const AUDIO_HANDLE: TrackHandle = TrackHandle(2);
const VIDEO_TIMESCALE: i32 = 90_000;

/// PCM frames per synthetic audio packet.
pub const AUDIO_PACKET_FRAMES: i64 = 1024;

#[derive(Debug, Clone, Copy)]
struct SyntheticAudio {
    sample_rate: u32,
    channels: u16,
}

/// A source whose samples are generated on demand.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    duration_secs: f64,
    frame_rate: f64,
    width: u32,
    height: u32,
    data_rate: f64,
    transform: Transform,
    has_video: bool,
    audio: Option<SyntheticAudio>,
    sample_size: usize,
    sample_delay: Duration,
    fail_video_after: Option<u64>,
    fail_audio_after: Option<u64>,
    fail_reader_open: bool,
    fail_probe: bool,
}

impl SyntheticSource {
    /// A video-only source.
    pub fn new(duration_secs: f64, frame_rate: f64, width: u32, height: u32, data_rate: f64) -> Self {
        Self {
            duration_secs,
            frame_rate,
            width,
            height,
            data_rate,
            transform: Transform::IDENTITY,
            has_video: true,
            audio: None,
            sample_size: 16,
            sample_delay: Duration::ZERO,
            fail_video_after: None,
            fail_audio_after: None,
            fail_reader_open: false,
            fail_probe: false,
        }
    }

    /// A source with the same track layout as `tracks`.
    pub fn mirroring(tracks: &SourceTracks) -> Self {
        let video = tracks.video.iter().find(|v| v.is_decodable());
        let mut source = match video {
            Some(v) => {
                let duration = if v.duration_secs > 0.0 {
                    v.duration_secs
                } else {
                    tracks.duration_secs
                };
                Self::new(duration, v.frame_rate, v.width, v.height, v.estimated_data_rate)
                    .with_transform(v.transform)
            }
            None => Self::new(tracks.duration_secs, 0.0, 0, 0, 0.0).without_video(),
        };
        if let Some(audio) = tracks.audio.first() {
            source = source.with_audio(audio.sample_rate, audio.channels);
        }
        source
    }

    pub fn with_audio(mut self, sample_rate: u32, channels: u16) -> Self {
        self.audio = Some(SyntheticAudio {
            sample_rate,
            channels,
        });
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Drop the video track.
    pub fn without_video(mut self) -> Self {
        self.has_video = false;
        self
    }

    /// Payload bytes per generated sample.
    pub fn sample_size(mut self, bytes: usize) -> Self {
        self.sample_size = bytes;
        self
    }

    /// Sleep this long before producing each sample.
    pub fn sample_delay(mut self, delay: Duration) -> Self {
        self.sample_delay = delay;
        self
    }

    /// Fail the video reader once `n` samples have been produced.
    pub fn fail_video_after(mut self, n: u64) -> Self {
        self.fail_video_after = Some(n);
        self
    }

    /// Fail the audio reader once `n` samples have been produced.
    pub fn fail_audio_after(mut self, n: u64) -> Self {
        self.fail_audio_after = Some(n);
        self
    }

    /// Make every `open_reader` call fail.
    pub fn fail_reader_open(mut self) -> Self {
        self.fail_reader_open = true;
        self
    }

    /// Make `tracks` fail.
    pub fn fail_probe(mut self) -> Self {
        self.fail_probe = true;
        self
    }

    pub fn video_sample_count(&self) -> u64 {
        frame_count(self.duration_secs, self.frame_rate)
    }

    pub fn audio_sample_count(&self) -> u64 {
        self.audio.map_or(0, |audio| {
            let packets =
                (self.duration_secs * audio.sample_rate as f64 / AUDIO_PACKET_FRAMES as f64).ceil();
            if packets.is_finite() && packets > 0.0 {
                packets as u64
            } else {
                0
            }
        })
    }

    fn video_info(&self) -> VideoTrackInfo {
        VideoTrackInfo {
            handle: VIDEO_HANDLE,
            duration_secs: self.duration_secs,
            frame_rate: self.frame_rate,
            width: self.width,
            height: self.height,
            estimated_data_rate: self.data_rate,
            transform: self.transform,
            codec: Some("synthetic".to_string()),
        }
    }

    fn audio_info(&self, audio: SyntheticAudio) -> AudioTrackInfo {
        AudioTrackInfo {
            handle: AUDIO_HANDLE,
            duration_secs: self.duration_secs,
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            codec: Some("synthetic".to_string()),
        }
    }
}

impl MediaSource for SyntheticSource {
    fn tracks(&self) -> Result<SourceTracks> {
        if self.fail_probe {
            return Err(Error::backend("synthetic probe failure"));
        }
        Ok(SourceTracks {
            duration_secs: self.duration_secs,
            video: if self.has_video {
                vec![self.video_info()]
            } else {
                Vec::new()
            },
            audio: self
                .audio
                .map(|audio| vec![self.audio_info(audio)])
                .unwrap_or_default(),
        })
    }

    fn open_reader(&self, track: TrackHandle, _output: ReaderOutput) -> Result<Box<dyn TrackReader>> {
        if self.fail_reader_open {
            return Err(Error::backend("synthetic reader could not be created"));
        }
        let reader = match (track, self.audio) {
            (VIDEO_HANDLE, _) if self.has_video => SyntheticReader {
                total: self.video_sample_count(),
                fail_after: self.fail_video_after,
                timescale: VIDEO_TIMESCALE,
                step: SampleStep::Seconds(1.0 / self.frame_rate),
                ..SyntheticReader::new(self)
            },
            (AUDIO_HANDLE, Some(audio)) => SyntheticReader {
                total: self.audio_sample_count(),
                fail_after: self.fail_audio_after,
                timescale: audio.sample_rate as i32,
                step: SampleStep::Units(AUDIO_PACKET_FRAMES),
                ..SyntheticReader::new(self)
            },
            _ => return Err(Error::TrackNotFound(track.0)),
        };
        Ok(Box::new(reader))
    }
}

#[derive(Debug, Clone, Copy)]
enum SampleStep {
    Seconds(f64),
    Units(i64),
}

struct SyntheticReader {
    total: u64,
    next: u64,
    fail_after: Option<u64>,
    timescale: i32,
    step: SampleStep,
    sample_size: usize,
    delay: Duration,
    status: ReaderStatus,
}

impl SyntheticReader {
    fn new(source: &SyntheticSource) -> Self {
        Self {
            total: 0,
            next: 0,
            fail_after: None,
            timescale: 1,
            step: SampleStep::Units(1),
            sample_size: source.sample_size,
            delay: source.sample_delay,
            status: ReaderStatus::Unknown,
        }
    }

    fn timing(&self, index: u64) -> (MediaTime, MediaTime) {
        match self.step {
            SampleStep::Seconds(step) => (
                MediaTime::from_seconds(index as f64 * step, self.timescale),
                MediaTime::from_seconds(step, self.timescale),
            ),
            SampleStep::Units(step) => (
                MediaTime::new(index as i64 * step, self.timescale),
                MediaTime::new(step, self.timescale),
            ),
        }
    }
}

impl TrackReader for SyntheticReader {
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
        if self.fail_after == Some(self.next) {
            self.status = ReaderStatus::Failed(format!(
                "synthetic read failure at sample {}",
                self.next
            ));
            return None;
        }
        if self.next >= self.total {
            self.status = ReaderStatus::Completed;
            return None;
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let index = self.next;
        self.next += 1;
        let (pts, duration) = self.timing(index);
        let fill = (index % 251) as u8;
        Some(SampleBuffer::new(
            Bytes::from(vec![fill; self.sample_size]),
            pts,
            duration,
        ))
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

/// Which input of a writer a sample went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Video,
    Audio,
}

/// Writer lifecycle events, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterEvent {
    InputAdded(InputKind),
    StartedWriting,
    SessionStarted(MediaTime),
    FirstSampleAppended(InputKind),
    InputFinished(InputKind),
    Finished,
    Cancelled,
}

/// Everything one writer was given.
#[derive(Debug, Clone, Default)]
pub struct Recording {
    pub destination: PathBuf,
    pub video_settings: Option<VideoEncoderSettings>,
    pub audio_track: Option<AudioTrackInfo>,
    /// Samples in the order the encoder consumed them.
    pub video_samples: Vec<SampleBuffer>,
    pub audio_samples: Vec<SampleBuffer>,
    pub events: Vec<WriterEvent>,
    /// Deepest any input queue got.
    pub max_queued: usize,
}

impl Recording {
    pub fn is_finished(&self) -> bool {
        self.events.contains(&WriterEvent::Finished)
    }

    pub fn is_cancelled(&self) -> bool {
        self.events.contains(&WriterEvent::Cancelled)
    }

    /// Index of `event` in the event log.
    pub fn position(&self, event: &WriterEvent) -> Option<usize> {
        self.events.iter().position(|e| e == event)
    }

    fn push_sample(&mut self, kind: InputKind, sample: SampleBuffer) {
        match kind {
            InputKind::Video => self.video_samples.push(sample),
            InputKind::Audio => self.audio_samples.push(sample),
        }
    }
}

#[derive(Debug, Clone)]
struct WriterBehavior {
    queue_depth: usize,
    drain_delay: Duration,
    fail_create: bool,
    fail_start: bool,
    fail_append_after: Option<usize>,
    fail_finish: bool,
}

impl Default for WriterBehavior {
    fn default() -> Self {
        Self {
            queue_depth: 4,
            drain_delay: Duration::ZERO,
            fail_create: false,
            fail_start: false,
            fail_append_after: None,
            fail_finish: false,
        }
    }
}

/// Creates [`RecordingWriter`]s and keeps their recordings.
#[derive(Debug, Clone, Default)]
pub struct RecordingWriterFactory {
    behavior: WriterBehavior,
    recordings: Arc<Mutex<Vec<Arc<Mutex<Recording>>>>>,
}

impl RecordingWriterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples an input accepts before reporting not ready.
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.behavior.queue_depth = depth.max(1);
        self
    }

    /// Time the background encoder spends on each sample.
    pub fn drain_delay(mut self, delay: Duration) -> Self {
        self.behavior.drain_delay = delay;
        self
    }

    pub fn fail_create(mut self) -> Self {
        self.behavior.fail_create = true;
        self
    }

    pub fn fail_start(mut self) -> Self {
        self.behavior.fail_start = true;
        self
    }

    /// Reject the append after `n` samples on any input.
    pub fn fail_append_after(mut self, n: usize) -> Self {
        self.behavior.fail_append_after = Some(n);
        self
    }

    pub fn fail_finish(mut self) -> Self {
        self.behavior.fail_finish = true;
        self
    }

    /// Snapshot of every writer created so far.
    pub fn recordings(&self) -> Vec<Recording> {
        self.recordings
            .lock()
            .iter()
            .map(|r| r.lock().clone())
            .collect()
    }

    pub fn last_recording(&self) -> Option<Recording> {
        self.recordings.lock().last().map(|r| r.lock().clone())
    }
}

impl WriterFactory for RecordingWriterFactory {
    fn create_writer(&self, destination: &Path) -> Result<Box<dyn MediaWriter>> {
        if self.behavior.fail_create {
            return Err(Error::backend("recording writer could not be created"));
        }
        if destination.exists() {
            return Err(Error::destination_exists(destination));
        }

        let recording = Arc::new(Mutex::new(Recording {
            destination: destination.to_path_buf(),
            ..Recording::default()
        }));
        self.recordings.lock().push(Arc::clone(&recording));

        Ok(Box::new(RecordingWriter {
            behavior: self.behavior.clone(),
            destination: destination.to_path_buf(),
            recording,
            inputs: Vec::new(),
            drains: Vec::new(),
            state: WriterState::Configuring,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Configuring,
    Writing,
    Finished,
    Cancelled,
}

#[derive(Debug, Default)]
struct InputQueue {
    pending: VecDeque<SampleBuffer>,
    appended: usize,
    high_water: usize,
    finished: bool,
    cancelled: bool,
}

#[derive(Debug)]
struct InputShared {
    kind: InputKind,
    depth: usize,
    queue: Mutex<InputQueue>,
    changed: Condvar,
}

impl InputShared {
    fn is_ready(&self, queue: &InputQueue) -> bool {
        !queue.finished && !queue.cancelled && queue.pending.len() < self.depth
    }

    fn cancel(&self) {
        self.queue.lock().cancelled = true;
        self.changed.notify_all();
    }
}

/// Background "encoder": consumes queued samples one at a time.
fn drain_input(shared: Arc<InputShared>, recording: Arc<Mutex<Recording>>, delay: Duration) {
    loop {
        {
            let mut queue = shared.queue.lock();
            while queue.pending.is_empty() && !queue.finished && !queue.cancelled {
                shared.changed.wait(&mut queue);
            }
            if queue.cancelled || queue.pending.is_empty() {
                return;
            }
        }

        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let sample = {
            let mut queue = shared.queue.lock();
            if queue.cancelled {
                return;
            }
            queue.pending.pop_front()
        };
        shared.changed.notify_all();

        if let Some(sample) = sample {
            recording.lock().push_sample(shared.kind, sample);
        }
    }
}

/// Writer created by [`RecordingWriterFactory`].
pub struct RecordingWriter {
    behavior: WriterBehavior,
    destination: PathBuf,
    recording: Arc<Mutex<Recording>>,
    inputs: Vec<Arc<InputShared>>,
    drains: Vec<JoinHandle<()>>,
    state: WriterState,
}

impl RecordingWriter {
    fn add_input(&mut self, kind: InputKind) -> Result<Box<dyn WriterInput>> {
        if self.state != WriterState::Configuring {
            return Err(Error::invalid_input(
                "inputs must be added before writing starts",
            ));
        }

        let shared = Arc::new(InputShared {
            kind,
            depth: self.behavior.queue_depth,
            queue: Mutex::new(InputQueue::default()),
            changed: Condvar::new(),
        });

        let name = match kind {
            InputKind::Video => "clipshrink-encoder-video",
            InputKind::Audio => "clipshrink-encoder-audio",
        };
        let drain = {
            let shared = Arc::clone(&shared);
            let recording = Arc::clone(&self.recording);
            let delay = self.behavior.drain_delay;
            std::thread::Builder::new()
                .name(name.to_string())
                .spawn(move || drain_input(shared, recording, delay))?
        };

        self.inputs.push(Arc::clone(&shared));
        self.drains.push(drain);
        self.recording.lock().events.push(WriterEvent::InputAdded(kind));

        Ok(Box::new(RecordingInput {
            shared,
            recording: Arc::clone(&self.recording),
            fail_append_after: self.behavior.fail_append_after,
        }))
    }

    fn join_drains(&mut self) {
        for drain in self.drains.drain(..) {
            let _ = drain.join();
        }
        let high_water = self
            .inputs
            .iter()
            .map(|input| input.queue.lock().high_water)
            .max()
            .unwrap_or(0);
        self.recording.lock().max_queued = high_water;
    }
}

impl MediaWriter for RecordingWriter {
    fn add_video_input(&mut self, settings: &VideoEncoderSettings) -> Result<Box<dyn WriterInput>> {
        let input = self.add_input(InputKind::Video)?;
        self.recording.lock().video_settings = Some(settings.clone());
        Ok(input)
    }

    fn add_audio_input(&mut self, track: &AudioTrackInfo) -> Result<Box<dyn WriterInput>> {
        let input = self.add_input(InputKind::Audio)?;
        self.recording.lock().audio_track = Some(track.clone());
        Ok(input)
    }

    fn start_writing(&mut self) -> Result<()> {
        if self.state != WriterState::Configuring {
            return Err(Error::invalid_input("writer already started"));
        }
        if self.behavior.fail_start {
            return Err(Error::backend("recording writer failed to start"));
        }
        std::fs::File::create(&self.destination)?;
        self.state = WriterState::Writing;
        self.recording.lock().events.push(WriterEvent::StartedWriting);
        Ok(())
    }

    fn start_session(&mut self, at: MediaTime) {
        self.recording
            .lock()
            .events
            .push(WriterEvent::SessionStarted(at));
    }

    fn finish_writing(&mut self) -> Result<()> {
        if self.state != WriterState::Writing {
            return Err(Error::invalid_input(format!(
                "cannot finish writer in state {:?}",
                self.state
            )));
        }
        if let Some(open) = self.inputs.iter().find(|i| !i.queue.lock().finished) {
            return Err(Error::invalid_input(format!(
                "{:?} input was not marked as finished",
                open.kind
            )));
        }

        self.join_drains();

        if self.behavior.fail_finish {
            return Err(Error::backend("recording writer failed to finalize"));
        }

        let payload: Vec<u8> = {
            let recording = self.recording.lock();
            recording
                .video_samples
                .iter()
                .chain(recording.audio_samples.iter())
                .flat_map(|s| s.data.iter().copied())
                .collect()
        };
        std::fs::write(&self.destination, payload)?;

        self.state = WriterState::Finished;
        self.recording.lock().events.push(WriterEvent::Finished);
        Ok(())
    }

    fn cancel_writing(&mut self) {
        if matches!(self.state, WriterState::Finished | WriterState::Cancelled) {
            return;
        }
        for input in &self.inputs {
            input.cancel();
        }
        self.join_drains();
        if let Err(err) = std::fs::remove_file(&self.destination) {
            if err.kind() != std::io::ErrorKind::NotFound {
                #[cfg(feature = "tracing")]
                tracing::warn!("could not remove {}: {}", self.destination.display(), err);
            }
        }
        self.state = WriterState::Cancelled;
        self.recording.lock().events.push(WriterEvent::Cancelled);
    }
}

impl Drop for RecordingWriter {
    fn drop(&mut self) {
        if matches!(self.state, WriterState::Configuring | WriterState::Writing) {
            self.cancel_writing();
        }
    }
}

struct RecordingInput {
    shared: Arc<InputShared>,
    recording: Arc<Mutex<Recording>>,
    fail_append_after: Option<usize>,
}

impl WriterInput for RecordingInput {
    fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.shared.queue.lock();
        while !self.shared.is_ready(&queue) && !queue.finished && !queue.cancelled {
            if self
                .shared
                .changed
                .wait_until(&mut queue, deadline)
                .timed_out()
            {
                break;
            }
        }
        self.shared.is_ready(&queue)
    }

    fn is_ready_for_more_media_data(&self) -> bool {
        let queue = self.shared.queue.lock();
        self.shared.is_ready(&queue)
    }

    fn append(&mut self, sample: SampleBuffer) -> Result<()> {
        let first = {
            let mut queue = self.shared.queue.lock();
            if queue.cancelled {
                return Err(Error::backend("writer was cancelled"));
            }
            if queue.finished {
                return Err(Error::invalid_input("append after mark_as_finished"));
            }
            if queue.pending.len() >= self.shared.depth {
                return Err(Error::backend("input is not ready for more media data"));
            }
            if self.fail_append_after == Some(queue.appended) {
                return Err(Error::backend(format!(
                    "injected append failure after {} samples",
                    queue.appended
                )));
            }
            queue.pending.push_back(sample);
            queue.appended += 1;
            queue.high_water = queue.high_water.max(queue.pending.len());
            queue.appended == 1
        };
        self.shared.changed.notify_all();

        if first {
            self.recording
                .lock()
                .events
                .push(WriterEvent::FirstSampleAppended(self.shared.kind));
        }
        Ok(())
    }

    fn mark_as_finished(&mut self) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.finished {
                return;
            }
            queue.finished = true;
        }
        self.shared.changed.notify_all();
        self.recording
            .lock()
            .events
            .push(WriterEvent::InputFinished(self.shared.kind));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_reader(reader: &mut dyn TrackReader) -> Vec<SampleBuffer> {
        reader.start_reading().unwrap();
        std::iter::from_fn(|| reader.copy_next_sample()).collect()
    }

    #[test]
    fn test_synthetic_counts() {
        let source = SyntheticSource::new(10.0, 30.0, 1920, 1080, 8e6).with_audio(44100, 2);
        assert_eq!(source.video_sample_count(), 300);
        // ceil(10 * 44100 / 1024)
        assert_eq!(source.audio_sample_count(), 431);

        let tracks = source.tracks().unwrap();
        assert_eq!(tracks.video.len(), 1);
        assert_eq!(tracks.audio.len(), 1);
    }

    #[test]
    fn test_synthetic_video_reader() {
        let source = SyntheticSource::new(1.0, 10.0, 16, 16, 1000.0).sample_size(3);
        let mut reader = source
            .open_reader(VIDEO_HANDLE, ReaderOutput::DecodedVideo)
            .unwrap();

        let samples = drain_reader(reader.as_mut());
        assert_eq!(samples.len(), 10);
        assert_eq!(reader.status(), ReaderStatus::Completed);
        assert_eq!(samples[3].pts, MediaTime::new(27_000, VIDEO_TIMESCALE));
        assert_eq!(samples[3].data.as_ref(), &[3, 3, 3]);
    }

    #[test]
    fn test_synthetic_failure_injection() {
        let source = SyntheticSource::new(1.0, 10.0, 16, 16, 1000.0).fail_video_after(4);
        let mut reader = source
            .open_reader(VIDEO_HANDLE, ReaderOutput::DecodedVideo)
            .unwrap();
        assert_eq!(drain_reader(reader.as_mut()).len(), 4);
        assert!(matches!(reader.status(), ReaderStatus::Failed(_)));

        assert!(source
            .open_reader(AUDIO_HANDLE, ReaderOutput::Passthrough)
            .is_err());
    }

    #[test]
    fn test_mirroring_copies_layout() {
        let original = SyntheticSource::new(2.0, 24.0, 640, 480, 5e5)
            .with_audio(48000, 1)
            .with_transform(Transform::from_rotation(crate::track::Rotation::Cw90));
        let mirrored = SyntheticSource::mirroring(&original.tracks().unwrap());
        assert_eq!(mirrored.tracks().unwrap(), original.tracks().unwrap());
    }

    #[test]
    fn test_writer_refuses_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exists.mp4");
        std::fs::write(&path, b"old").unwrap();

        let factory = RecordingWriterFactory::new();
        assert!(matches!(
            factory.create_writer(&path),
            Err(Error::DestinationExists { .. })
        ));
    }

    #[test]
    fn test_input_applies_back_pressure() {
        let dir = tempfile::tempdir().unwrap();
        let factory = RecordingWriterFactory::new()
            .queue_depth(2)
            .drain_delay(Duration::from_millis(200));
        let mut writer = factory.create_writer(&dir.path().join("out.mp4")).unwrap();
        let settings = VideoEncoderSettings {
            bitrate_bps: 1000.0,
            width: 16,
            height: 16,
            frame_rate: 10.0,
            transform: Transform::IDENTITY,
        };
        let mut input = writer.add_video_input(&settings).unwrap();
        writer.start_writing().unwrap();
        writer.start_session(MediaTime::ZERO);

        let sample = || SampleBuffer::new(vec![1u8; 4], MediaTime::ZERO, MediaTime::new(1, 10));
        input.append(sample()).unwrap();
        input.append(sample()).unwrap();
        // the slow encoder still holds both samples
        assert!(!input.is_ready_for_more_media_data());
        assert!(input.append(sample()).is_err());

        assert!(input.wait_until_ready(Duration::from_secs(5)));
        input.append(sample()).unwrap();
        input.mark_as_finished();
        assert!(!input.wait_until_ready(Duration::from_millis(10)));

        writer.finish_writing().unwrap();
        let recording = factory.last_recording().unwrap();
        assert!(recording.is_finished());
        assert_eq!(recording.video_samples.len(), 3);
        assert_eq!(recording.max_queued, 2);
    }

    #[test]
    fn test_finish_requires_finished_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let factory = RecordingWriterFactory::new();
        let mut writer = factory.create_writer(&dir.path().join("out.mp4")).unwrap();
        let track = AudioTrackInfo {
            handle: AUDIO_HANDLE,
            duration_secs: 1.0,
            sample_rate: 44100,
            channels: 2,
            codec: None,
        };
        let _input = writer.add_audio_input(&track).unwrap();
        writer.start_writing().unwrap();
        assert!(writer.finish_writing().is_err());
    }

    #[test]
    fn test_cancel_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        let factory = RecordingWriterFactory::new();
        let mut writer = factory.create_writer(&path).unwrap();
        writer.start_writing().unwrap();
        assert!(path.exists());

        writer.cancel_writing();
        writer.cancel_writing();
        assert!(!path.exists());
        let recording = factory.last_recording().unwrap();
        assert!(recording.is_cancelled());
        assert_eq!(
            recording
                .events
                .iter()
                .filter(|e| **e == WriterEvent::Cancelled)
                .count(),
            1
        );
    }
}
