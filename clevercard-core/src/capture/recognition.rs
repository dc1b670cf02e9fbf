//! Recognition capabilities and their results

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::device::{AudioClip, ImageFrame};
use crate::error::Result;
use crate::types::Scores;

/// Scores read for one student from a register
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentScores {
    pub name: String,
    #[serde(default)]
    pub scores: Scores,
}

/// Text and rows recognized from a register photo
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognizedRegister {
    pub text: String,
    /// In `[0, 1]`, when the recognizer reports one
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub rows: Vec<StudentScores>,
}

impl RecognizedRegister {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.rows.is_empty()
    }
}

/// A processed voice recording
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transcription {
    pub text: String,
    pub duration: Duration,
}

/// Image-to-text engine for class registers
#[async_trait]
pub trait RegisterRecognizer: Send + Sync {
    async fn recognize(&self, frame: &ImageFrame) -> Result<RecognizedRegister>;
}

/// Speech-to-text engine
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String>;
}
