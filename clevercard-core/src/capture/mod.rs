//! Capture pipeline
//!
//! Turns a photographed class register or a dictated remark into text and
//! structured rows. Both flows share one [`CaptureMachine`]:
//!
//! ```text
//! Idle ──► Capturing (image) ─┐
//!   ▲  ──► Recording (audio) ─┼──► Processing ──► Complete
//!   │                         └──────────────────► Failed
//!   └──────────── cancel / reset from anywhere
//! ```
//!
//! A run starts from `Idle`, `Complete` or `Failed`. Cancelling a run
//! cancels whatever device or recognition call it is waiting on; that call
//! returns [`Error::Cancelled`] and makes no further transitions.

mod audio;
mod device;
mod image;
mod recognition;
pub mod register;
pub mod remarks;

pub use audio::VoiceRecorder;
pub use device::{AudioClip, Camera, ImageFrame, Microphone, Permission};
pub use image::RegisterScanner;
pub use recognition::{RecognizedRegister, RegisterRecognizer, StudentScores, Transcriber, Transcription};

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Transitions kept in [`CaptureMachine::history`]
pub const HISTORY_LIMIT: usize = 64;

/// Phase of the capture state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapturePhase {
    #[default]
    Idle,
    Capturing,
    Recording,
    Processing,
    Complete,
    Failed,
}

impl CapturePhase {
    /// Phases reachable from this one, `Idle` excluded
    pub const fn allowed_next_states(self) -> &'static [Self] {
        match self {
            Self::Idle | Self::Complete | Self::Failed => &[Self::Capturing, Self::Recording],
            Self::Capturing | Self::Recording => &[Self::Processing, Self::Failed],
            Self::Processing => &[Self::Complete, Self::Failed],
        }
    }

    /// Check whether moving to `next` is allowed. `Idle` is always reachable.
    pub fn can_transition_to(self, next: Self) -> bool {
        next == Self::Idle || self.allowed_next_states().contains(&next)
    }

    /// Whether a new run may start from this phase
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Idle | Self::Complete | Self::Failed)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Recording => "recording",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CapturePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded phase change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub from: CapturePhase,
    pub to: CapturePhase,
    pub at: DateTime<Utc>,
}

struct MachineInner {
    phase: CapturePhase,
    run_id: u64,
    token: CancellationToken,
    history: VecDeque<Transition>,
}

impl MachineInner {
    fn record(&mut self, to: CapturePhase) {
        let from = self.phase;
        self.phase = to;
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(Transition {
            from,
            to,
            at: Utc::now(),
        });
        tracing::debug!(%from, %to, run = self.run_id, "Capture transition");
    }
}

/// The capture state machine.
///
/// All phase changes go through here so illegal transitions are rejected
/// in one place. Observers can follow the phase with [`subscribe`](Self::subscribe).
pub struct CaptureMachine {
    inner: Mutex<MachineInner>,
    tx: watch::Sender<CapturePhase>,
}

impl Default for CaptureMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureMachine {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(CapturePhase::Idle);
        Self {
            inner: Mutex::new(MachineInner {
                phase: CapturePhase::Idle,
                run_id: 0,
                token: CancellationToken::new(),
                history: VecDeque::with_capacity(HISTORY_LIMIT),
            }),
            tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MachineInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn phase(&self) -> CapturePhase {
        self.lock().phase
    }

    /// Receiver notified on every phase change
    pub fn subscribe(&self) -> watch::Receiver<CapturePhase> {
        self.tx.subscribe()
    }

    /// Recorded transitions, oldest first
    pub fn history(&self) -> Vec<Transition> {
        self.lock().history.iter().cloned().collect()
    }

    /// Move to `to` outside of any run
    pub fn transition(&self, to: CapturePhase) -> Result<()> {
        let mut inner = self.lock();
        self.apply(&mut inner, to)
    }

    /// Start a new run by entering `Capturing` or `Recording`
    pub fn begin_run(&self, to: CapturePhase) -> Result<CaptureRun> {
        let mut inner = self.lock();
        if !matches!(to, CapturePhase::Capturing | CapturePhase::Recording) {
            return Err(Error::InvalidTransition {
                from: inner.phase,
                to,
            });
        }
        self.apply(&mut inner, to)?;
        inner.run_id += 1;
        inner.token = CancellationToken::new();
        Ok(CaptureRun {
            id: inner.run_id,
            token: inner.token.clone(),
        })
    }

    /// Move `run` forward. Fails with [`Error::Cancelled`] if the run was
    /// cancelled or superseded.
    pub fn advance(&self, run: &CaptureRun, to: CapturePhase) -> Result<()> {
        let mut inner = self.lock();
        if run.token.is_cancelled() || inner.run_id != run.id {
            return Err(Error::Cancelled);
        }
        self.apply(&mut inner, to)
    }

    /// Cancel the current run, if any, and return to `Idle`
    pub fn cancel(&self) {
        let mut inner = self.lock();
        inner.token.cancel();
        if inner.phase != CapturePhase::Idle {
            inner.record(CapturePhase::Idle);
            self.tx.send_replace(CapturePhase::Idle);
        }
    }

    /// Alias of [`cancel`](Self::cancel) for callers clearing a finished run
    pub fn reset(&self) {
        self.cancel();
    }

    fn apply(&self, inner: &mut MachineInner, to: CapturePhase) -> Result<()> {
        if !inner.phase.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: inner.phase,
                to,
            });
        }
        if inner.phase == to {
            return Ok(());
        }
        inner.record(to);
        self.tx.send_replace(to);
        Ok(())
    }
}

/// Token for one capture run
#[derive(Debug, Clone)]
pub struct CaptureRun {
    id: u64,
    token: CancellationToken,
}

impl CaptureRun {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Await `fut` unless the run is cancelled first
    pub async fn guard<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled),
            result = fut => {
                if self.token.is_cancelled() {
                    Err(Error::Cancelled)
                } else {
                    result
                }
            }
        }
    }
}

/// Classify a device error as a capture failure
pub(crate) fn capture_failure(error: Error) -> Error {
    match error {
        Error::CaptureFailure(_) | Error::Cancelled | Error::PermissionDenied { .. } => error,
        other => Error::CaptureFailure(other.to_string()),
    }
}

/// Classify a recognizer or transcriber error as a processing failure
pub(crate) fn processing_failure(error: Error) -> Error {
    match error {
        Error::ProcessingFailure(_) | Error::Cancelled => error,
        other => Error::ProcessingFailure(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [CapturePhase; 6] = [
        CapturePhase::Idle,
        CapturePhase::Capturing,
        CapturePhase::Recording,
        CapturePhase::Processing,
        CapturePhase::Complete,
        CapturePhase::Failed,
    ];

    #[test]
    fn test_processing_only_reachable_from_active_capture() {
        for from in ALL {
            let expected = matches!(from, CapturePhase::Capturing | CapturePhase::Recording);
            assert_eq!(
                from.can_transition_to(CapturePhase::Processing),
                expected,
                "{from} -> processing"
            );
        }
    }

    #[test]
    fn test_idle_reachable_from_everywhere() {
        for from in ALL {
            assert!(from.can_transition_to(CapturePhase::Idle));
        }
    }

    #[test]
    fn test_complete_requires_processing() {
        assert!(CapturePhase::Processing.can_transition_to(CapturePhase::Complete));
        assert!(!CapturePhase::Capturing.can_transition_to(CapturePhase::Complete));
        assert!(!CapturePhase::Complete.can_transition_to(CapturePhase::Processing));
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let machine = CaptureMachine::new();
        let err = machine.transition(CapturePhase::Complete).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid capture transition from idle to complete"
        );
        assert_eq!(machine.phase(), CapturePhase::Idle);
        assert!(machine.history().is_empty());
    }

    #[test]
    fn test_cancelled_run_cannot_advance() {
        let machine = CaptureMachine::new();
        let run = machine.begin_run(CapturePhase::Capturing).unwrap();
        machine.cancel();
        assert!(run.is_cancelled());
        assert!(matches!(
            machine.advance(&run, CapturePhase::Processing),
            Err(Error::Cancelled)
        ));
        assert_eq!(machine.phase(), CapturePhase::Idle);
    }

    #[test]
    fn test_superseded_run_cannot_advance() {
        let machine = CaptureMachine::new();
        let first = machine.begin_run(CapturePhase::Recording).unwrap();
        machine.cancel();
        let second = machine.begin_run(CapturePhase::Recording).unwrap();
        assert!(machine.advance(&first, CapturePhase::Processing).is_err());
        machine.advance(&second, CapturePhase::Processing).unwrap();
    }

    #[test]
    fn test_history_is_bounded() {
        let machine = CaptureMachine::new();
        for _ in 0..HISTORY_LIMIT {
            machine.begin_run(CapturePhase::Capturing).unwrap();
            machine.cancel();
        }
        let history = machine.history();
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history.last().unwrap().to, CapturePhase::Idle);
    }

    #[test]
    fn test_subscribers_see_latest_phase() {
        let machine = CaptureMachine::new();
        let rx = machine.subscribe();
        machine.begin_run(CapturePhase::Recording).unwrap();
        assert_eq!(*rx.borrow(), CapturePhase::Recording);
    }

    #[tokio::test]
    async fn test_guard_returns_cancelled() {
        let machine = CaptureMachine::new();
        let run = machine.begin_run(CapturePhase::Capturing).unwrap();
        machine.cancel();
        let result = run.guard(async { Ok::<_, Error>(1) }).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
