//! Persistence service contract
//!
//! All auth and table access goes through the [`Backend`] trait so the
//! session manager and store never depend on a concrete transport.
//!
//! Two implementations ship with the crate:
//! - [`RestBackend`]: HTTP client for a Supabase-compatible service
//!   (GoTrue auth endpoints + PostgREST tables)
//! - [`MemoryBackend`]: in-process tables for tests and offline previews

mod memory;
mod rest;

pub use memory::MemoryBackend;
pub use rest::RestBackend;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::types::{NewProfile, Profile, Session, SessionEvent, SignUpOutcome};

/// Capacity of the session event channel each backend exposes
pub const SESSION_EVENT_CAPACITY: usize = 16;

/// Entity tables the core reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Classes,
    Students,
    ReportCards,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Classes => "classes",
            Table::Students => "students",
            Table::ReportCards => "report_cards",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Equality filter applied to a table read (`select … eq(field, value)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub field: &'static str,
    pub value: String,
}

impl Filter {
    pub fn eq(field: &'static str, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }

    /// Whether a JSON row satisfies this filter
    pub fn matches(&self, row: &Value) -> bool {
        match row.get(self.field) {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Number(n)) => n.to_string() == self.value,
            Some(Value::Bool(b)) => b.to_string() == self.value,
            _ => false,
        }
    }
}

/// Trait implemented by every persistence service client.
///
/// Implementations own the session: they refresh it, persist it if they want
/// to, and announce changes on [`Backend::session_events`]. Timeouts are the
/// implementation's business; callers impose none.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Session currently held by the backend, if any
    async fn get_session(&self) -> Result<Option<Session>>;

    /// Exchange credentials for a session
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session>;

    /// Register a new account
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome>;

    /// Revoke the held session
    async fn sign_out(&self) -> Result<()>;

    /// Subscribe to session changes, including revocations that did not
    /// originate from this process
    fn session_events(&self) -> broadcast::Receiver<SessionEvent>;

    /// Profile row for a user, `None` when it does not exist
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>>;

    /// Write a profile row
    async fn insert_profile(&self, profile: &NewProfile) -> Result<()>;

    /// Read all rows of a table, optionally filtered
    async fn select(&self, table: Table, filter: Option<&Filter>) -> Result<Vec<Value>>;

    /// Insert a row and return the canonical record the service stored
    async fn insert(&self, table: Table, record: Value) -> Result<Value>;
}
