//! Application state shared by the session manager and the store
//!
//! There is exactly one [`AppState`] value per [`AppStateHandle`]. Writers
//! never mutate it in place: every update builds the next state from the
//! current one and swaps the whole value, so readers holding a snapshot
//! always see a fully-formed state.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::types::{Class, ReportCard, Student, User};

/// Authentication lifecycle as seen by the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPhase {
    /// Nothing checked yet
    #[default]
    Unknown,
    /// Startup session discovery in progress
    Checking,
    Authenticated,
    Anonymous,
}

/// The in-memory projection of the signed-in user's data
#[derive(Debug, Clone, Default, Serialize)]
pub struct AppState {
    pub user: Option<User>,
    pub classes: Vec<Class>,
    pub students: Vec<Student>,
    pub reports: Vec<ReportCard>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub auth_phase: AuthPhase,
    /// Bumped on every sign-out; results of operations started under an
    /// earlier epoch are discarded
    #[serde(skip)]
    pub(crate) epoch: u64,
    /// Bumped whenever the session ends (sign-out or revocation); sign-in and
    /// session discovery started under an earlier value do not set `user`
    #[serde(skip)]
    pub(crate) auth_generation: u64,
    /// Operations currently in flight; `is_loading` mirrors `pending > 0`
    #[serde(skip)]
    pub(crate) pending: u32,
}

impl AppState {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn auth_generation(&self) -> u64 {
        self.auth_generation
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Copy of this state with one in-flight operation retired
    pub(crate) fn settled(&self) -> AppState {
        let pending = self.pending.saturating_sub(1);
        AppState {
            pending,
            is_loading: pending > 0,
            ..self.clone()
        }
    }
}

/// Shared, cloneable handle to the application state.
///
/// Cloning the handle shares the same state. Reads are lock-free snapshots;
/// writes are serialized by the underlying channel.
#[derive(Clone)]
pub struct AppStateHandle {
    tx: Arc<watch::Sender<Arc<AppState>>>,
}

impl Default for AppStateHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AppStateHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(AppState::default()));
        Self { tx: Arc::new(tx) }
    }

    /// Current state snapshot
    pub fn snapshot(&self) -> Arc<AppState> {
        self.tx.borrow().clone()
    }

    /// Receiver that is notified after every update
    pub fn subscribe(&self) -> watch::Receiver<Arc<AppState>> {
        self.tx.subscribe()
    }

    /// Replace the state with `f(current)`.
    ///
    /// `f` runs while the write side is held, so read-modify-write sequences
    /// from different tasks cannot interleave.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&AppState) -> AppState,
    {
        self.tx.send_modify(|current| {
            let next = f(current);
            *current = Arc::new(next);
        });
    }

    /// Like [`update`](Self::update), but `f` may decline by returning `None`.
    ///
    /// Returns whether the state was replaced.
    pub fn update_if<F>(&self, f: F) -> bool
    where
        F: FnOnce(&AppState) -> Option<AppState>,
    {
        self.tx.send_if_modified(|current| match f(current) {
            Some(next) => {
                *current = Arc::new(next);
                true
            }
            None => false,
        })
    }

    /// Mark an operation as started
    pub(crate) fn begin_operation(&self) {
        self.update(|state| AppState {
            pending: state.pending + 1,
            is_loading: true,
            ..state.clone()
        });
    }

    /// Mark an operation as started and clear any previous error
    pub(crate) fn begin_operation_clearing_error(&self) {
        self.update(|state| AppState {
            pending: state.pending + 1,
            is_loading: true,
            error: None,
            ..state.clone()
        });
    }

    /// Mark an operation as settled, recording `error` if it failed
    pub(crate) fn end_operation(&self, error: Option<String>) {
        self.update(|state| AppState {
            error: error.or_else(|| state.error.clone()),
            ..state.settled()
        });
    }

    pub fn set_error(&self, error: Option<String>) {
        self.update(|state| AppState {
            error,
            ..state.clone()
        });
    }
}
