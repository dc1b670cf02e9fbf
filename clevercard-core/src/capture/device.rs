//! Camera and microphone capabilities
//!
//! The core never talks to hardware. Platform layers implement these traits
//! and the pipeline drives them.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{Error, Result};

/// Outcome of a permission check or request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Granted,
    Denied,
    /// Never asked
    Undetermined,
}

impl Permission {
    pub fn is_granted(self) -> bool {
        self == Permission::Granted
    }
}

/// A still image from the camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFrame {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
}

/// A finished microphone recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub duration: Duration,
}

#[async_trait]
pub trait Camera: Send + Sync {
    /// Current permission without prompting
    async fn permission(&self) -> Permission;

    /// Prompt for permission
    async fn request_permission(&self) -> Permission;

    async fn capture_photo(&self) -> Result<ImageFrame>;
}

#[async_trait]
pub trait Microphone: Send + Sync {
    /// Prompt for permission; implementations return `Granted` without
    /// prompting when it was already given
    async fn request_permission(&self) -> Permission;

    async fn start_recording(&self) -> Result<()>;

    async fn stop_recording(&self) -> Result<AudioClip>;

    /// Play back a clip
    async fn play(&self, clip: &AudioClip) -> Result<()>;

    /// Pause playback
    async fn pause(&self) -> Result<()>;
}

pub(crate) async fn ensure_camera_permission(camera: &dyn Camera) -> Result<()> {
    if camera.permission().await.is_granted() {
        return Ok(());
    }
    match camera.request_permission().await {
        Permission::Granted => Ok(()),
        other => {
            tracing::info!(permission = ?other, "Camera permission not granted");
            Err(Error::PermissionDenied {
                device: "camera".to_string(),
            })
        }
    }
}

pub(crate) async fn ensure_microphone_permission(microphone: &dyn Microphone) -> Result<()> {
    match microphone.request_permission().await {
        Permission::Granted => Ok(()),
        other => {
            tracing::info!(permission = ?other, "Microphone permission not granted");
            Err(Error::PermissionDenied {
                device: "microphone".to_string(),
            })
        }
    }
}
