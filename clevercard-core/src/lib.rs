//! # clevercard-core
//!
//! Client core for CleverCard, a report-card assistant for teachers.
//!
//! This library provides:
//! - A session manager that signs teachers in and out and follows
//!   revocations made elsewhere
//! - A state store that keeps classes, students and report cards in step
//!   with the persistence service
//! - A capture pipeline that turns register photos and dictated remarks into
//!   text and structured rows
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! The session manager and the store share one [`AppStateHandle`]. Every
//! write replaces the whole [`AppState`], so a snapshot is never half
//! updated. All service access goes through the [`Backend`] trait
//! ([`RestBackend`] over HTTP, [`MemoryBackend`] in process). The capture
//! pipeline is independent of both and only talks to device and recognition
//! traits.
//!
//! ## Example
//!
//! ```rust,no_run
//! use clevercard_core::{CleverCard, Config};
//!
//! # async fn run() -> clevercard_core::Result<()> {
//! let config = Config::load()?;
//! let app = CleverCard::connect(&config.backend)?;
//!
//! app.session.sign_in("teacher@school.edu", "secret1").await?;
//! app.store.load_classes().await?;
//! println!("{} classes", app.state.snapshot().classes.len());
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use app::CleverCard;
pub use capture::{CaptureMachine, CapturePhase, RegisterScanner, VoiceRecorder};
pub use config::Config;
pub use error::{Error, Result};
pub use remote::{Backend, MemoryBackend, RestBackend};
pub use session::{SessionManager, SessionSubscription};
pub use state::{AppState, AppStateHandle, AuthPhase};
pub use store::Store;
pub use types::*;

// Public modules
pub mod app;
pub mod capture;
pub mod config;
pub mod error;
pub mod logging;
pub mod remote;
pub mod selectors;
pub mod session;
pub mod state;
pub mod store;
pub mod types;
