//! Photographing and recognizing a class register

use std::sync::Arc;

use super::device::{ensure_camera_permission, Camera};
use super::recognition::{RecognizedRegister, RegisterRecognizer};
use super::register::parse_register_text;
use super::{capture_failure, processing_failure, CaptureMachine, CapturePhase, CaptureRun};
use crate::error::{Error, Result};

/// Image capture flow: camera frame to recognized register.
///
/// Clones share the same machine, so one clone may [`cancel`](Self::cancel)
/// a scan running on another.
#[derive(Clone)]
pub struct RegisterScanner {
    camera: Arc<dyn Camera>,
    recognizer: Arc<dyn RegisterRecognizer>,
    machine: Arc<CaptureMachine>,
}

impl RegisterScanner {
    pub fn new(camera: Arc<dyn Camera>, recognizer: Arc<dyn RegisterRecognizer>) -> Self {
        Self::with_machine(camera, recognizer, Arc::new(CaptureMachine::new()))
    }

    pub fn with_machine(
        camera: Arc<dyn Camera>,
        recognizer: Arc<dyn RegisterRecognizer>,
        machine: Arc<CaptureMachine>,
    ) -> Self {
        Self {
            camera,
            recognizer,
            machine,
        }
    }

    pub fn machine(&self) -> &CaptureMachine {
        &self.machine
    }

    pub fn phase(&self) -> CapturePhase {
        self.machine.phase()
    }

    /// Take a photo and recognize it.
    ///
    /// Rows missing from the recognizer's answer are parsed out of its text.
    /// An answer with neither text nor rows is a processing failure.
    pub async fn scan(&self) -> Result<RecognizedRegister> {
        ensure_camera_permission(self.camera.as_ref()).await?;

        let run = self.machine.begin_run(CapturePhase::Capturing)?;
        let frame = match run.guard(self.camera.capture_photo()).await {
            Ok(frame) => frame,
            Err(e) => return Err(self.fail(&run, capture_failure(e))),
        };

        self.machine.advance(&run, CapturePhase::Processing)?;
        let recognized = match run.guard(self.recognizer.recognize(&frame)).await {
            Ok(recognized) if recognized.is_empty() => Err(Error::ProcessingFailure(
                "No text recognized in the image".to_string(),
            )),
            Ok(recognized) => Ok(recognized),
            Err(e) => Err(processing_failure(e)),
        };

        match recognized {
            Ok(mut register) => {
                if register.rows.is_empty() {
                    register.rows = parse_register_text(&register.text);
                }
                self.machine.advance(&run, CapturePhase::Complete)?;
                tracing::info!(rows = register.rows.len(), "Register scanned");
                Ok(register)
            }
            Err(e) => Err(self.fail(&run, e)),
        }
    }

    /// Abort the scan in flight, if any, and return to idle
    pub fn cancel(&self) {
        self.machine.cancel();
    }

    /// Settle `run` in `Failed` unless it was cancelled, and hand back the
    /// error to return
    fn fail(&self, run: &CaptureRun, error: Error) -> Error {
        if matches!(error, Error::Cancelled) {
            return error;
        }
        match self.machine.advance(run, CapturePhase::Failed) {
            Ok(()) => {
                tracing::warn!(error = %error, "Register scan failed");
                error
            }
            Err(e) => e,
        }
    }
}
