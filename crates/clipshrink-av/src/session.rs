//! The public face of the engine.
//!
//! A [`TranscodeSession`] is built from a source, a writer factory and a
//! destination. Estimates are available right away; [`TranscodeSession::start`]
//! runs the relay in the background and reports progress and exactly one
//! terminal outcome.
//!
//! ```no_run
//! use clipshrink_av::media::memory::{RecordingWriterFactory, SyntheticSource};
//! use clipshrink_av::{CompletionEvent, QualityTier, TranscodeSession};
//! use std::sync::Arc;
//!
//! let source = SyntheticSource::new(10.0, 30.0, 1920, 1080, 8_000_000.0);
//! let mut session = TranscodeSession::builder(Arc::new(source), Arc::new(RecordingWriterFactory::new()))
//!     .destination("/tmp/out.mp4")
//!     .quality(QualityTier::Medium)
//!     .build()?;
//! println!("about {} bytes", session.estimated_output_size());
//!
//! let _handle = session.start(
//!     |report| println!("{}/{}", report.completed_units, report.total_units),
//!     |event| if let CompletionEvent::Success(path) = event {
//!         println!("wrote {}", path.display());
//!     },
//! );
//! # Ok::<(), clipshrink_av::TranscodeError>(())
//! ```

use crate::bitrate::QualityTier;
use crate::error::TranscodeError;
use crate::job::{CancellationHandle, JobState, TranscodeJob};
use crate::media::{MediaSource, WriterFactory};
use crate::relay::{MediaRelayEngine, ProgressReport, RelayObserver, RelayOptions};
use crate::track::TrackDescriptor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Where progress and completion handlers run.
#[derive(Debug, Clone, Default)]
pub enum CallbackContext {
    /// A thread owned by the session.
    #[default]
    Dedicated,
    /// A task on the given runtime.
    Runtime(tokio::runtime::Handle),
}

/// How a started session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    Success(PathBuf),
    Failure(TranscodeError),
    Cancelled,
}

/// Events delivered to the completion handler of [`TranscodeSession::start`].
///
/// `Started` is informational; exactly one of the others follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionEvent {
    Started,
    Success(PathBuf),
    Failure(TranscodeError),
    Cancelled,
}

impl From<TranscodeOutcome> for CompletionEvent {
    fn from(outcome: TranscodeOutcome) -> Self {
        match outcome {
            TranscodeOutcome::Success(path) => CompletionEvent::Success(path),
            TranscodeOutcome::Failure(reason) => CompletionEvent::Failure(reason),
            TranscodeOutcome::Cancelled => CompletionEvent::Cancelled,
        }
    }
}

/// The event stream of [`TranscodeSession::start_with_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeEvent {
    Started,
    Progress(ProgressReport),
    Finished(TranscodeOutcome),
}

/// Builder for [`TranscodeSession`].
pub struct TranscodeSessionBuilder {
    source: Arc<dyn MediaSource>,
    writers: Arc<dyn WriterFactory>,
    destination: Option<PathBuf>,
    quality: QualityTier,
    options: RelayOptions,
    callback_context: CallbackContext,
}

impl TranscodeSessionBuilder {
    /// Output location. Must not exist when the session starts.
    pub fn destination(mut self, path: impl Into<PathBuf>) -> Self {
        self.destination = Some(path.into());
        self
    }

    pub fn quality(mut self, tier: QualityTier) -> Self {
        self.quality = tier;
        self
    }

    pub fn options(mut self, options: RelayOptions) -> Self {
        self.options = options;
        self
    }

    pub fn callback_context(mut self, context: CallbackContext) -> Self {
        self.callback_context = context;
        self
    }

    /// Probe the source and build the session.
    pub fn build(self) -> Result<TranscodeSession, TranscodeError> {
        let descriptor = TrackDescriptor::from_source(self.source.as_ref())?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "source: {:.3}s, {}x{} @ {:.3} fps, ~{:.0} bps, audio: {}",
            descriptor.duration_secs(),
            descriptor.natural_width(),
            descriptor.natural_height(),
            descriptor.frame_rate(),
            descriptor.estimated_source_bitrate(),
            descriptor.has_audio_track()
        );

        Ok(TranscodeSession {
            source: self.source,
            writers: self.writers,
            destination: self.destination,
            quality: self.quality,
            options: self.options,
            callback_context: self.callback_context,
            descriptor,
            job: None,
        })
    }
}

/// One compression of one source. Single use.
pub struct TranscodeSession {
    source: Arc<dyn MediaSource>,
    writers: Arc<dyn WriterFactory>,
    destination: Option<PathBuf>,
    quality: QualityTier,
    options: RelayOptions,
    callback_context: CallbackContext,
    descriptor: TrackDescriptor,
    job: Option<TranscodeJob>,
}

impl TranscodeSession {
    pub fn builder(
        source: Arc<dyn MediaSource>,
        writers: Arc<dyn WriterFactory>,
    ) -> TranscodeSessionBuilder {
        TranscodeSessionBuilder {
            source,
            writers,
            destination: None,
            quality: QualityTier::default(),
            options: RelayOptions::default(),
            callback_context: CallbackContext::default(),
        }
    }

    pub fn descriptor(&self) -> &TrackDescriptor {
        &self.descriptor
    }

    pub fn quality_tier(&self) -> QualityTier {
        self.quality
    }

    /// Change the tier used by the estimates and by a later `start`.
    /// Ignored once the session has started.
    pub fn set_quality_tier(&mut self, tier: QualityTier) {
        if self.job.is_some() {
            #[cfg(feature = "tracing")]
            tracing::warn!("quality tier change to {} ignored: session already started", tier);
            return;
        }
        self.quality = tier;
    }

    pub fn target_bitrate(&self) -> f64 {
        self.descriptor.target_bitrate(self.quality)
    }

    /// Output size in bytes at the current tier.
    pub fn estimated_output_size(&self) -> i64 {
        self.descriptor.estimated_output_size(self.quality)
    }

    pub fn state(&self) -> JobState {
        self.job
            .as_ref()
            .map_or(JobState::NotStarted, TranscodeJob::current_state)
    }

    /// Request cancellation of the running relay. No-op before `start` and
    /// after completion.
    pub fn cancel(&self) {
        if let Some(job) = &self.job {
            job.request_cancel();
        }
    }

    /// Start relaying. Handlers run on the session's [`CallbackContext`], in
    /// order. A second call does not relay again; its completion handler
    /// receives `Failure(AlreadyStarted)`.
    pub fn start<P, C>(&mut self, mut progress: P, mut completion: C) -> CancellationHandle
    where
        P: FnMut(ProgressReport) + Send + 'static,
        C: FnMut(CompletionEvent) + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = move |event: TranscodeEvent| match event {
            TranscodeEvent::Progress(report) => progress(report),
            TranscodeEvent::Started => completion(CompletionEvent::Started),
            TranscodeEvent::Finished(outcome) => completion(outcome.into()),
        };
        if let Err(_e) = deliver(&self.callback_context, rx, handler) {
            #[cfg(feature = "tracing")]
            tracing::error!("could not spawn callback thread: {}", _e);
            return self.fail_to_launch(&tx, format!("could not spawn callback thread: {}", _e));
        }
        self.launch(tx)
    }

    /// Start relaying and receive events on a channel.
    pub fn start_with_events(&mut self) -> (CancellationHandle, UnboundedReceiver<TranscodeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.launch(tx), rx)
    }

    fn launch(&mut self, tx: UnboundedSender<TranscodeEvent>) -> CancellationHandle {
        if self.job.is_some() {
            let _ = tx.send(TranscodeEvent::Finished(TranscodeOutcome::Failure(
                TranscodeError::AlreadyStarted,
            )));
            return CancellationHandle::detached();
        }

        let job = TranscodeJob::new(self.target_bitrate(), self.destination.clone());
        self.job = Some(job.clone());
        let handle = job.cancellation_handle();

        if job.destination().is_none() {
            conclude(&job, Err(TranscodeError::MissingDestination), false, &tx);
            return handle;
        }
        job.transition(JobState::Started);

        let engine = MediaRelayEngine::new(
            job.clone(),
            self.descriptor.clone(),
            Arc::clone(&self.source),
            Arc::clone(&self.writers),
            self.options,
        );
        let spawned = {
            let job = job.clone();
            let tx = tx.clone();
            std::thread::Builder::new()
                .name("clipshrink-session".to_string())
                .spawn(move || {
                    let mut observer = ChannelObserver {
                        tx: tx.clone(),
                        wrote_output: false,
                    };
                    let result = engine.run(&mut observer);
                    conclude(&job, result, observer.wrote_output, &tx);
                })
        };
        if let Err(e) = spawned {
            let reason = TranscodeError::Internal(format!("failed to spawn session thread: {}", e));
            conclude(&job, Err(reason), false, &tx);
        }
        handle
    }

    fn fail_to_launch(&mut self, tx: &UnboundedSender<TranscodeEvent>, detail: String) -> CancellationHandle {
        if self.job.is_some() {
            return CancellationHandle::detached();
        }
        let job = TranscodeJob::new(self.target_bitrate(), self.destination.clone());
        conclude(&job, Err(TranscodeError::Internal(detail)), false, tx);
        self.job = Some(job.clone());
        job.cancellation_handle()
    }
}

/// Settle `job` and publish its outcome.
///
/// `wrote_output` is set once the writer has created the destination. A
/// cancelled job removes it, including a file finalized just before the
/// cancel request landed.
fn conclude(
    job: &TranscodeJob,
    result: Result<(), TranscodeError>,
    wrote_output: bool,
    tx: &UnboundedSender<TranscodeEvent>,
) {
    let Some(state) = job.conclude(result) else {
        return;
    };
    if state == JobState::Cancelled && wrote_output {
        if let Some(path) = job.destination() {
            remove_output(path);
        }
    }
    let outcome = match state {
        JobState::Succeeded => match job.destination() {
            Some(path) => TranscodeOutcome::Success(path.to_path_buf()),
            None => TranscodeOutcome::Failure(TranscodeError::MissingDestination),
        },
        JobState::Cancelled => TranscodeOutcome::Cancelled,
        JobState::Failed(reason) => TranscodeOutcome::Failure(reason),
        other => TranscodeOutcome::Failure(TranscodeError::Internal(format!(
            "job concluded in non-terminal state {:?}",
            other
        ))),
    };

    #[cfg(feature = "tracing")]
    tracing::debug!("transcode finished: {:?}", outcome);

    // the receiver may be gone; the job state still records the outcome
    let _ = tx.send(TranscodeEvent::Finished(outcome));
}

fn remove_output(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {
            #[cfg(feature = "tracing")]
            tracing::debug!("removed output of cancelled transcode: {}", path.display());
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!("could not remove {}: {}", path.display(), _e);
        }
    }
}

struct ChannelObserver {
    tx: UnboundedSender<TranscodeEvent>,
    wrote_output: bool,
}

impl RelayObserver for ChannelObserver {
    fn started(&mut self) {
        self.wrote_output = true;
        let _ = self.tx.send(TranscodeEvent::Started);
    }

    fn progress(&mut self, report: ProgressReport) {
        let _ = self.tx.send(TranscodeEvent::Progress(report));
    }
}

/// Forward every event from `rx` to `handler` on `context`.
fn deliver<H>(
    context: &CallbackContext,
    mut rx: UnboundedReceiver<TranscodeEvent>,
    mut handler: H,
) -> std::io::Result<()>
where
    H: FnMut(TranscodeEvent) + Send + 'static,
{
    match context {
        CallbackContext::Dedicated => {
            std::thread::Builder::new()
                .name("clipshrink-callbacks".to_string())
                .spawn(move || {
                    while let Some(event) = rx.blocking_recv() {
                        handler(event);
                    }
                })?;
        }
        CallbackContext::Runtime(runtime) => {
            runtime.spawn(async move {
                while let Some(event) = rx.recv().await {
                    handler(event);
                }
            });
        }
    }
    Ok(())
}
