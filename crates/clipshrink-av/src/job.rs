//! Transcode job: lifecycle state and the cancellation flag.

use crate::error::TranscodeError;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle of one compression attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    NotStarted,
    Started,
    RelayingVideo,
    RelayingAudio,
    Succeeded,
    Cancelled,
    Failed(TranscodeError),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Cancelled | JobState::Failed(_)
        )
    }

    fn can_transition_to(&self, next: &JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (NotStarted, Started) => true,
            (Started, RelayingVideo) => true,
            (RelayingVideo, RelayingAudio) => true,
            (RelayingVideo | RelayingAudio, Succeeded) => true,
            (NotStarted | Started | RelayingVideo | RelayingAudio, Cancelled) => true,
            (NotStarted | Started | RelayingVideo | RelayingAudio, Failed(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug)]
struct JobInner {
    target_bitrate: f64,
    destination: Option<PathBuf>,
    cancel_requested: AtomicBool,
    state: Mutex<JobState>,
}

/// One compression attempt. Single use.
///
/// Cloning yields another handle to the same job.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    inner: Arc<JobInner>,
}

impl TranscodeJob {
    pub fn new(target_bitrate: f64, destination: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(JobInner {
                target_bitrate,
                destination,
                cancel_requested: AtomicBool::new(false),
                state: Mutex::new(JobState::NotStarted),
            }),
        }
    }

    pub fn target_bitrate(&self) -> f64 {
        self.inner.target_bitrate
    }

    pub fn destination(&self) -> Option<&Path> {
        self.inner.destination.as_deref()
    }

    /// Ask the relay to stop. Idempotent; ignored once the job is terminal.
    pub fn request_cancel(&self) {
        let state = self.inner.state.lock();
        if !state.is_terminal() {
            self.inner.cancel_requested.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::SeqCst)
    }

    pub fn current_state(&self) -> JobState {
        self.inner.state.lock().clone()
    }

    /// Move to a non-terminal `next` state. Returns `false` if the transition
    /// is not allowed from the current state.
    pub fn transition(&self, next: JobState) -> bool {
        let mut state = self.inner.state.lock();
        if !state.can_transition_to(&next) {
            return false;
        }
        *state = next;
        true
    }

    /// Settle the job on a terminal state derived from `outcome`.
    ///
    /// A cancellation requested before this call wins over whatever the relay
    /// produced. Returns the terminal state, or `None` if the job had already
    /// concluded.
    pub fn conclude(&self, outcome: Result<(), TranscodeError>) -> Option<JobState> {
        let mut state = self.inner.state.lock();
        if state.is_terminal() {
            return None;
        }
        let next = if self.inner.cancel_requested.load(Ordering::SeqCst) {
            JobState::Cancelled
        } else {
            match outcome {
                Ok(()) => JobState::Succeeded,
                Err(reason) => JobState::Failed(reason),
            }
        };
        if !state.can_transition_to(&next) {
            // e.g. success reported before relay started; treat as internal.
            let reason = TranscodeError::Internal(format!(
                "invalid transition {:?} -> {:?}",
                *state, next
            ));
            *state = JobState::Failed(reason);
        } else {
            *state = next;
        }
        Some(state.clone())
    }

    /// Handle whose only capability is requesting cancellation.
    pub fn cancellation_handle(&self) -> CancellationHandle {
        CancellationHandle {
            job: Some(self.clone()),
        }
    }
}

/// Requests cancellation of a running transcode.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    job: Option<TranscodeJob>,
}

impl CancellationHandle {
    /// A handle not attached to any job; requests are no-ops.
    pub fn detached() -> Self {
        Self { job: None }
    }

    pub fn request_cancel(&self) {
        if let Some(job) = &self.job {
            job.request_cancel();
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.job.as_ref().is_some_and(TranscodeJob::is_cancel_requested)
    }
}
