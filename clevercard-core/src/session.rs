//! Session manager
//!
//! Single authority on who is signed in. Drives [`AuthPhase`] and the
//! `user` field of the shared state; entity collections are only touched on
//! sign-out, where they are cleared together with the user.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::remote::Backend;
use crate::state::{AppState, AppStateHandle, AuthPhase};
use crate::types::{NewProfile, Profile, Role, SessionEvent, SignUpOutcome, User};

/// Shortest password accepted at sign-up
pub const MIN_PASSWORD_LEN: usize = 6;

/// Authentication lifecycle on top of a [`Backend`]
#[derive(Clone)]
pub struct SessionManager {
    backend: Arc<dyn Backend>,
    state: AppStateHandle,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn Backend>, state: AppStateHandle) -> Self {
        Self { backend, state }
    }

    pub fn state(&self) -> &AppStateHandle {
        &self.state
    }

    /// Discover an existing session at startup.
    ///
    /// A call made while another discovery is still `Checking` returns
    /// immediately without doing anything.
    pub async fn initialize(&self) -> Result<()> {
        let entered = self.state.update_if(|state| {
            (state.auth_phase != AuthPhase::Checking).then(|| AppState {
                auth_phase: AuthPhase::Checking,
                pending: state.pending + 1,
                is_loading: true,
                ..state.clone()
            })
        });
        if !entered {
            tracing::debug!("Session check already in progress");
            return Ok(());
        }
        let generation = self.state.snapshot().auth_generation;

        let outcome = self.discover().await;
        let message = outcome.as_ref().err().map(ToString::to_string);
        let discovered = outcome.as_ref().ok().cloned().flatten();

        self.state.update(|current| {
            let mut next = current.settled();
            match discovered {
                Some(user) if current.auth_generation == generation => next.user = Some(user),
                Some(user) => {
                    tracing::info!(user_id = %user.id, "Session ended while it was being restored");
                }
                None => {}
            }
            next.auth_phase = if next.user.is_some() {
                AuthPhase::Authenticated
            } else {
                AuthPhase::Anonymous
            };
            if let Some(message) = message {
                next.error = Some(message);
            }
            next
        });

        match outcome {
            Ok(Some(user)) => {
                tracing::info!(user_id = %user.id, "Restored existing session");
                Ok(())
            }
            Ok(None) => {
                tracing::info!("No existing session");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session check failed");
                Err(e)
            }
        }
    }

    /// Exchange credentials for a session and populate `user`
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User> {
        if email.trim().is_empty() || password.is_empty() {
            return self.reject(Error::Validation("Please fill in all fields".to_string()));
        }

        self.state.begin_operation_clearing_error();
        let generation = self.state.snapshot().auth_generation;

        let outcome = match self.backend.sign_in(email.trim(), password).await {
            Ok(session) => {
                let profile = self.load_profile(&session.user.id).await;
                Ok(User::from_session(&session.user, profile))
            }
            Err(e) => Err(e),
        };

        let user = outcome.as_ref().ok().cloned();
        let mut message = outcome.as_ref().err().map(ToString::to_string);
        let ended = Error::Auth("Session ended before sign-in completed".to_string());
        let mut superseded = false;
        self.state.update(|current| {
            let mut next = current.settled();
            match user {
                Some(user) if current.auth_generation == generation => {
                    next.user = Some(user);
                    next.auth_phase = AuthPhase::Authenticated;
                }
                Some(_) => {
                    superseded = true;
                    message = Some(ended.to_string());
                }
                None => {}
            }
            if let Some(message) = message {
                next.error = Some(message);
            }
            next
        });
        let outcome = if superseded { Err(ended) } else { outcome };

        match &outcome {
            Ok(user) => tracing::info!(user_id = %user.id, "Signed in"),
            Err(e) => tracing::warn!(error = %e, "Sign-in failed"),
        }
        outcome
    }

    /// Register an account and write its profile row.
    ///
    /// The new account is not signed in locally; `user` stays as it was
    /// (accounts may need email verification first).
    pub async fn sign_up(&self, email: &str, password: &str, full_name: &str) -> Result<SignUpOutcome> {
        if email.trim().is_empty() || password.is_empty() || full_name.trim().is_empty() {
            return self.reject(Error::Validation("Please fill in all fields".to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return self.reject(Error::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        self.state.begin_operation_clearing_error();

        let outcome = self.backend.sign_up(email.trim(), password).await;
        if let Ok(SignUpOutcome {
            user: Some(account),
            ..
        }) = &outcome
        {
            let profile = NewProfile {
                id: account.id.clone(),
                full_name: full_name.trim().to_string(),
                role: Role::Teacher,
            };
            if let Err(e) = self.backend.insert_profile(&profile).await {
                tracing::warn!(user_id = %account.id, error = %e, "Failed to create profile");
            }
        }

        self.state
            .end_operation(outcome.as_ref().err().map(ToString::to_string));

        match &outcome {
            Ok(result) => tracing::info!(
                verified = result.session.is_some(),
                "Signed up"
            ),
            Err(e) => tracing::warn!(error = %e, "Sign-up failed"),
        }
        outcome
    }

    /// Revoke the session and clear the user and every collection at once.
    ///
    /// The local clear happens even when the service cannot be reached; the
    /// service error is then recorded and returned.
    pub async fn sign_out(&self) -> Result<()> {
        self.state.begin_operation();

        let outcome = self.backend.sign_out().await;
        let message = outcome.as_ref().err().map(ToString::to_string);

        self.state.update(|current| AppState {
            user: None,
            classes: Vec::new(),
            students: Vec::new(),
            reports: Vec::new(),
            auth_phase: AuthPhase::Anonymous,
            epoch: current.epoch + 1,
            auth_generation: current.auth_generation + 1,
            error: message.or_else(|| current.error.clone()),
            ..current.settled()
        });

        match &outcome {
            Ok(()) => tracing::info!("Signed out"),
            Err(e) => tracing::warn!(error = %e, "Remote sign-out failed, local state cleared"),
        }
        outcome
    }

    /// Follow session changes reported by the backend.
    ///
    /// The returned handle keeps the subscription alive; dropping it stops
    /// the background task. Must be called from within a tokio runtime.
    pub fn watch_session_changes(&self) -> SessionSubscription {
        let mut events = self.backend.session_events();
        let backend = Arc::clone(&self.backend);
        let state = self.state.clone();
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => apply_session_event(&state, &event),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Missed session events, re-checking session");
                            if let Ok(None) = backend.get_session().await {
                                clear_user(&state);
                            }
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!("Session subscription ended");
        });

        SessionSubscription {
            token,
            task: Some(task),
        }
    }

    async fn discover(&self) -> Result<Option<User>> {
        let Some(session) = self.backend.get_session().await? else {
            return Ok(None);
        };
        let profile = self.load_profile(&session.user.id).await;
        Ok(Some(User::from_session(&session.user, profile)))
    }

    /// Profile for a user; read failures fall back to defaults
    async fn load_profile(&self, user_id: &str) -> Option<Profile> {
        match self.backend.fetch_profile(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to load profile, using defaults");
                None
            }
        }
    }

    fn reject<T>(&self, error: Error) -> Result<T> {
        self.state.set_error(Some(error.to_string()));
        Err(error)
    }
}

fn apply_session_event(state: &AppStateHandle, event: &SessionEvent) {
    if event.invalidates_user() {
        clear_user(state);
    } else {
        tracing::debug!(event = ?event.event, "Session event");
    }
}

/// Drop the local user after the session ended elsewhere.
///
/// The generation moves even when nobody is signed in yet, so a sign-in or
/// session check still waiting on the service cannot bring the user back.
fn clear_user(state: &AppStateHandle) {
    let mut had_user = false;
    state.update(|current| {
        had_user = current.user.is_some();
        let auth_phase = match current.auth_phase {
            AuthPhase::Checking => AuthPhase::Checking,
            _ => AuthPhase::Anonymous,
        };
        AppState {
            user: None,
            auth_phase,
            auth_generation: current.auth_generation + 1,
            ..current.clone()
        }
    });
    if had_user {
        tracing::info!("Session ended outside this client, user cleared");
    } else {
        tracing::debug!("Session ended outside this client");
    }
}

/// Handle for a running session-change subscription.
///
/// Dropping the handle unsubscribes.
pub struct SessionSubscription {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SessionSubscription {
    /// Stop following session changes and wait for the task to finish
    pub async fn unsubscribe(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_active(&self) -> bool {
        self.task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for SessionSubscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
