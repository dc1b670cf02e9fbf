//! Recording and transcribing voice remarks

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use super::device::{ensure_microphone_permission, AudioClip, Microphone};
use super::recognition::{Transcriber, Transcription};
use super::{capture_failure, processing_failure, CaptureMachine, CapturePhase, CaptureRun};
use crate::error::{Error, Result};

#[derive(Default)]
struct Take {
    run: Option<CaptureRun>,
    /// The device was asked to start and has not answered yet
    starting: bool,
    started: Option<Instant>,
    /// Recording length once stopped
    length: Option<Duration>,
    clip: Option<AudioClip>,
}

/// Audio capture flow: record, review, transcribe.
///
/// `stop` keeps the machine in `Recording` while holding the finished clip,
/// so it can be previewed before `process` hands it to the transcriber.
#[derive(Clone)]
pub struct VoiceRecorder {
    microphone: Arc<dyn Microphone>,
    transcriber: Arc<dyn Transcriber>,
    machine: Arc<CaptureMachine>,
    take: Arc<Mutex<Take>>,
}

impl VoiceRecorder {
    pub fn new(microphone: Arc<dyn Microphone>, transcriber: Arc<dyn Transcriber>) -> Self {
        Self::with_machine(microphone, transcriber, Arc::new(CaptureMachine::new()))
    }

    pub fn with_machine(
        microphone: Arc<dyn Microphone>,
        transcriber: Arc<dyn Transcriber>,
        machine: Arc<CaptureMachine>,
    ) -> Self {
        Self {
            microphone,
            transcriber,
            machine,
            take: Arc::new(Mutex::new(Take::default())),
        }
    }

    fn take(&self) -> MutexGuard<'_, Take> {
        match self.take.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn machine(&self) -> &CaptureMachine {
        &self.machine
    }

    pub fn phase(&self) -> CapturePhase {
        self.machine.phase()
    }

    /// Whether a finished clip is held
    pub fn has_clip(&self) -> bool {
        self.take().clip.is_some()
    }

    /// Time recorded so far, or the final length once stopped
    pub fn elapsed(&self) -> Duration {
        let take = self.take();
        match (take.length, take.started) {
            (Some(length), _) => length,
            (None, Some(started)) => started.elapsed(),
            (None, None) => Duration::ZERO,
        }
    }

    /// Ask for the microphone and start recording
    pub async fn start(&self) -> Result<()> {
        ensure_microphone_permission(self.microphone.as_ref()).await?;

        let run = self.machine.begin_run(CapturePhase::Recording)?;
        *self.take() = Take {
            run: Some(run.clone()),
            starting: true,
            ..Default::default()
        };

        let started = run.guard(self.microphone.start_recording()).await;
        let current = {
            let mut take = self.take();
            let current = take.run.as_ref().is_some_and(|held| held.id == run.id);
            if current {
                take.starting = false;
                if started.is_ok() {
                    take.started = Some(Instant::now());
                }
            }
            current
        };

        match started {
            Ok(()) if current => {
                tracing::debug!("Recording started");
                Ok(())
            }
            Ok(()) => Err(Error::Cancelled),
            Err(e) => Err(self.fail(&run, capture_failure(e))),
        }
    }

    /// Finish recording and hold the clip
    pub async fn stop(&self) -> Result<()> {
        let run = self.live_run()?;

        match run.guard(self.microphone.stop_recording()).await {
            Ok(clip) => {
                let mut take = self.take();
                take.length = Some(take.started.map(|s| s.elapsed()).unwrap_or(clip.duration));
                tracing::debug!(bytes = clip.data.len(), "Recording stopped");
                take.clip = Some(clip);
                Ok(())
            }
            Err(e) => Err(self.fail(&run, capture_failure(e))),
        }
    }

    /// Play back the held clip
    pub async fn preview(&self) -> Result<()> {
        let clip = self
            .take()
            .clip
            .clone()
            .ok_or_else(|| Error::Validation("No recording to play".to_string()))?;
        self.microphone.play(&clip).await
    }

    pub async fn pause_preview(&self) -> Result<()> {
        self.microphone.pause().await
    }

    /// Transcribe the held clip.
    ///
    /// An empty transcription is a processing failure.
    pub async fn process(&self) -> Result<Transcription> {
        let (run, clip) = {
            let take = self.take();
            match (&take.run, &take.clip) {
                (Some(run), Some(clip)) => (run.clone(), clip.clone()),
                _ => return Err(Error::Validation("No recording to process".to_string())),
            }
        };

        self.machine.advance(&run, CapturePhase::Processing)?;
        let text = match run.guard(self.transcriber.transcribe(&clip)).await {
            Ok(text) if text.trim().is_empty() => Err(Error::ProcessingFailure(
                "Transcription was empty".to_string(),
            )),
            Ok(text) => Ok(text.trim().to_string()),
            Err(e) => Err(processing_failure(e)),
        };

        match text {
            Ok(text) => {
                self.machine.advance(&run, CapturePhase::Complete)?;
                tracing::info!(chars = text.len(), "Recording transcribed");
                Ok(Transcription {
                    text,
                    duration: self.elapsed(),
                })
            }
            Err(e) => Err(self.fail(&run, e)),
        }
    }

    /// Discard the clip and return to idle
    pub async fn restart(&self) {
        self.cancel().await;
    }

    /// Abort the current run. A recording still running or still starting
    /// on the device is stopped and thrown away.
    pub async fn cancel(&self) {
        let live = {
            let mut take = self.take();
            let live = take.starting || (take.started.is_some() && take.length.is_none());
            *take = Take::default();
            live
        };
        self.machine.cancel();
        if live {
            if let Err(e) = self.microphone.stop_recording().await {
                tracing::warn!(error = %e, "Failed to stop discarded recording");
            }
        }
    }

    /// The run of a recording that has started and not yet stopped
    fn live_run(&self) -> Result<CaptureRun> {
        let take = self.take();
        match (&take.run, take.started, take.length) {
            (Some(run), Some(_), None) if self.machine.phase() == CapturePhase::Recording => {
                Ok(run.clone())
            }
            _ => Err(Error::Validation("Not recording".to_string())),
        }
    }

    fn fail(&self, run: &CaptureRun, error: Error) -> Error {
        if matches!(error, Error::Cancelled) {
            return error;
        }
        match self.machine.advance(run, CapturePhase::Failed) {
            Ok(()) => {
                tracing::warn!(error = %error, "Voice capture failed");
                error
            }
            Err(e) => e,
        }
    }
}
