//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clevercard_core::remote::{Backend, Filter, MemoryBackend, Table};
use clevercard_core::{
    AppStateHandle, NewProfile, Profile, Result, Role, Session, SessionEvent, SessionManager,
    SignUpOutcome, Store,
};
use serde_json::{json, Value};
use tokio::sync::{broadcast, oneshot, watch};

pub const EMAIL: &str = "t@school.edu";
pub const PASSWORD: &str = "secret1";

/// Memory backend with the teacher account `u1` and the "Ms. T" profile
pub fn teacher_backend() -> MemoryBackend {
    MemoryBackend::new()
        .with_account("u1", EMAIL, PASSWORD)
        .with_profile(Profile {
            id: "u1".to_string(),
            full_name: Some("Ms. T".to_string()),
            role: Some(Role::Teacher),
            school_id: Some("s1".to_string()),
            avatar_url: None,
        })
}

pub fn class_row(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "teacher_id": "u1",
        "name": name,
        "subject": "Mathematics",
        "academic_year": "2024/2025",
        "created_at": "2024-09-01T08:00:00Z"
    })
}

pub fn student_row(id: &str, class_id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "class_id": class_id,
        "full_name": name,
        "registration_number": format!("REG-{id}"),
        "created_at": "2024-09-01T08:00:00Z"
    })
}

/// Session manager and store over one backend and one state
pub fn wire(backend: Arc<dyn Backend>) -> (SessionManager, Store) {
    clevercard_core::logging::init_test();
    let state = AppStateHandle::new();
    (
        SessionManager::new(Arc::clone(&backend), state.clone()),
        Store::new(backend, state),
    )
}

type Release = std::result::Result<Vec<Value>, String>;

/// Holds calls to one backend method until the test lets them through.
///
/// Each call takes the oldest held gate; calls without one pass straight on.
pub struct CallGate {
    held: Mutex<VecDeque<oneshot::Receiver<()>>>,
    calls: watch::Sender<usize>,
}

impl CallGate {
    fn new() -> Self {
        let (calls, _) = watch::channel(0);
        Self {
            held: Mutex::new(VecDeque::new()),
            calls,
        }
    }

    /// Hold the next call; send (or drop) the returned sender to release it
    pub fn hold(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.held.lock().unwrap().push_back(rx);
        tx
    }

    pub fn calls(&self) -> usize {
        *self.calls.borrow()
    }

    /// Wait until `n` calls have arrived
    pub async fn wait_for_calls(&self, n: usize) {
        let mut rx = self.calls.subscribe();
        rx.wait_for(|calls| *calls >= n).await.unwrap();
    }

    async fn pass(&self) {
        let gate = self.held.lock().unwrap().pop_front();
        self.calls.send_modify(|calls| *calls += 1);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
    }
}

/// Backend whose table reads wait until the test releases them.
///
/// Each `select` takes the oldest queued gate; reads without a gate go
/// straight to the memory backend. Session lookups and profile reads can be
/// held the same way through `sessions` and `profiles`.
pub struct GatedBackend {
    pub inner: MemoryBackend,
    pub sessions: CallGate,
    pub profiles: CallGate,
    gates: Mutex<VecDeque<oneshot::Receiver<Release>>>,
    calls: watch::Sender<usize>,
}

impl GatedBackend {
    pub fn new(inner: MemoryBackend) -> Self {
        let (calls, _) = watch::channel(0);
        Self {
            inner,
            sessions: CallGate::new(),
            profiles: CallGate::new(),
            gates: Mutex::new(VecDeque::new()),
            calls,
        }
    }

    /// Queue a gate for the next read; send rows (or an error message) to
    /// release it
    pub fn gate(&self) -> oneshot::Sender<Release> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().push_back(rx);
        tx
    }

    /// Wait until `n` reads have reached the backend
    pub async fn wait_for_reads(&self, n: usize) {
        let mut rx = self.calls.subscribe();
        rx.wait_for(|calls| *calls >= n).await.unwrap();
    }
}

#[async_trait]
impl Backend for GatedBackend {
    async fn get_session(&self) -> Result<Option<Session>> {
        self.sessions.pass().await;
        self.inner.get_session().await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        self.inner.sign_in(email, password).await
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome> {
        self.inner.sign_up(email, password).await
    }

    async fn sign_out(&self) -> Result<()> {
        self.inner.sign_out().await
    }

    fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.session_events()
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        self.profiles.pass().await;
        self.inner.fetch_profile(user_id).await
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<()> {
        self.inner.insert_profile(profile).await
    }

    async fn select(&self, table: Table, filter: Option<&Filter>) -> Result<Vec<Value>> {
        let gate = self.gates.lock().unwrap().pop_front();
        self.calls.send_modify(|calls| *calls += 1);
        match gate {
            Some(gate) => match gate.await {
                Ok(Ok(rows)) => Ok(rows),
                Ok(Err(message)) => Err(clevercard_core::Error::Network(message)),
                Err(_) => Err(clevercard_core::Error::Network("gate dropped".to_string())),
            },
            None => self.inner.select(table, filter).await,
        }
    }

    async fn insert(&self, table: Table, record: Value) -> Result<Value> {
        self.inner.insert(table, record).await
    }
}
