//! In-process persistence service
//!
//! Behaves like the HTTP service from the store's point of view: inserts
//! echo the record back with a generated `id` and timestamps, reads honour
//! equality filters, and sessions change with sign-in, sign-out and
//! [`MemoryBackend::revoke_session`]. Failures can be injected per table or
//! for auth calls.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::types::{
    AuthEvent, NewProfile, Profile, Session, SessionEvent, SessionUser, SignUpOutcome,
};

use super::{Backend, Filter, Table, SESSION_EVENT_CAPACITY};

struct Account {
    id: String,
    password: String,
}

#[derive(Default)]
struct MemoryInner {
    accounts: HashMap<String, Account>,
    profiles: HashMap<String, Profile>,
    tables: HashMap<Table, Vec<Value>>,
    session: Option<Session>,
    table_failures: HashMap<Table, String>,
    auth_failure: Option<String>,
    profile_failure: Option<String>,
    auto_confirm: bool,
}

/// Persistence service held entirely in memory
pub struct MemoryBackend {
    inner: Mutex<MemoryInner>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self {
            inner: Mutex::new(MemoryInner::default()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn announce(&self, event: AuthEvent, session: Option<Session>) {
        let _ = self.events.send(SessionEvent { event, session });
    }

    /// Register an account that can sign in
    pub fn with_account(self, id: &str, email: &str, password: &str) -> Self {
        self.lock().accounts.insert(
            email.to_string(),
            Account {
                id: id.to_string(),
                password: password.to_string(),
            },
        );
        self
    }

    /// Seed a profile row
    pub fn with_profile(self, profile: Profile) -> Self {
        self.lock().profiles.insert(profile.id.clone(), profile);
        self
    }

    /// Seed table rows
    pub fn with_rows(self, table: Table, rows: Vec<Value>) -> Self {
        self.lock().tables.entry(table).or_default().extend(rows);
        self
    }

    /// Start with a session already held for `email`, as if restored from an
    /// earlier run
    pub fn with_existing_session(self, email: &str) -> Self {
        {
            let mut inner = self.lock();
            let session = inner
                .accounts
                .get(email)
                .map(|account| issue_session(&account.id, email));
            inner.session = session;
        }
        self
    }

    /// Issue sessions on sign-up instead of waiting for email verification
    pub fn with_auto_confirm(self) -> Self {
        self.lock().auto_confirm = true;
        self
    }

    /// Make every read and insert against `table` fail with `message`
    pub fn fail_table(&self, table: Table, message: &str) {
        self.lock()
            .table_failures
            .insert(table, message.to_string());
    }

    /// Make auth calls fail as if the service were unreachable
    pub fn fail_auth(&self, message: &str) {
        self.lock().auth_failure = Some(message.to_string());
    }

    /// Make profile reads and writes fail
    pub fn fail_profiles(&self, message: &str) {
        self.lock().profile_failure = Some(message.to_string());
    }

    pub fn clear_failures(&self) {
        let mut inner = self.lock();
        inner.table_failures.clear();
        inner.auth_failure = None;
        inner.profile_failure = None;
    }

    /// Drop the held session without the client asking, and announce it
    pub fn revoke_session(&self) {
        self.lock().session = None;
        self.announce(AuthEvent::SignedOut, None);
    }

    /// Snapshot of a table's rows
    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.lock().tables.get(&table).cloned().unwrap_or_default()
    }

    /// Stored profile for a user
    pub fn profile(&self, user_id: &str) -> Option<Profile> {
        self.lock().profiles.get(user_id).cloned()
    }

    fn check_auth(&self) -> Result<()> {
        match &self.lock().auth_failure {
            Some(message) => Err(Error::Network(message.clone())),
            None => Ok(()),
        }
    }

    fn check_table(&self, table: Table) -> Result<()> {
        match self.lock().table_failures.get(&table) {
            Some(message) => Err(Error::Network(message.clone())),
            None => Ok(()),
        }
    }

    fn check_profiles(&self) -> Result<()> {
        match &self.lock().profile_failure {
            Some(message) => Err(Error::Network(message.clone())),
            None => Ok(()),
        }
    }
}

fn issue_session(user_id: &str, email: &str) -> Session {
    Session {
        access_token: format!("mem-{}", uuid::Uuid::new_v4()),
        refresh_token: Some(format!("mem-refresh-{}", uuid::Uuid::new_v4())),
        expires_at: Some(Utc::now().timestamp() + 3600),
        user: SessionUser {
            id: user_id.to_string(),
            email: email.to_string(),
        },
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get_session(&self) -> Result<Option<Session>> {
        self.check_auth()?;
        Ok(self.lock().session.clone())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        self.check_auth()?;
        let session = {
            let mut inner = self.lock();
            let account = inner
                .accounts
                .get(email)
                .filter(|account| account.password == password)
                .ok_or_else(|| Error::Auth("Invalid login credentials".to_string()))?;
            let session = issue_session(&account.id, email);
            inner.session = Some(session.clone());
            session
        };
        self.announce(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome> {
        self.check_auth()?;
        let outcome = {
            let mut inner = self.lock();
            if inner.accounts.contains_key(email) {
                return Err(Error::Auth("User already registered".to_string()));
            }
            let id = uuid::Uuid::new_v4().to_string();
            inner.accounts.insert(
                email.to_string(),
                Account {
                    id: id.clone(),
                    password: password.to_string(),
                },
            );
            let user = SessionUser {
                id: id.clone(),
                email: email.to_string(),
            };
            let session = inner.auto_confirm.then(|| issue_session(&id, email));
            if session.is_some() {
                inner.session = session.clone();
            }
            SignUpOutcome {
                user: Some(user),
                session,
            }
        };
        if let Some(session) = &outcome.session {
            self.announce(AuthEvent::SignedIn, Some(session.clone()));
        }
        Ok(outcome)
    }

    async fn sign_out(&self) -> Result<()> {
        self.check_auth()?;
        let had_session = self.lock().session.take().is_some();
        if had_session {
            self.announce(AuthEvent::SignedOut, None);
        }
        Ok(())
    }

    fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        self.check_profiles()?;
        Ok(self.lock().profiles.get(user_id).cloned())
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<()> {
        self.check_profiles()?;
        self.lock().profiles.insert(
            profile.id.clone(),
            Profile {
                id: profile.id.clone(),
                full_name: Some(profile.full_name.clone()),
                role: Some(profile.role),
                school_id: None,
                avatar_url: None,
            },
        );
        Ok(())
    }

    async fn select(&self, table: Table, filter: Option<&Filter>) -> Result<Vec<Value>> {
        self.check_table(table)?;
        let rows = self.rows(table);
        Ok(match filter {
            Some(filter) => rows.into_iter().filter(|row| filter.matches(row)).collect(),
            None => rows,
        })
    }

    async fn insert(&self, table: Table, mut record: Value) -> Result<Value> {
        self.check_table(table)?;
        let object = record
            .as_object_mut()
            .ok_or_else(|| Error::Validation(format!("{} rows must be JSON objects", table)))?;

        let now = Utc::now().to_rfc3339();
        object
            .entry("id")
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
        object
            .entry("created_at")
            .or_insert_with(|| Value::String(now.clone()));
        if table == Table::ReportCards {
            object
                .entry("updated_at")
                .or_insert_with(|| Value::String(now));
        }

        self.lock()
            .tables
            .entry(table)
            .or_default()
            .push(record.clone());
        Ok(record)
    }
}
