//! HTTP client for a Supabase-compatible persistence service
//!
//! Auth goes through the GoTrue endpoints under `/auth/v1`, table access
//! through PostgREST under `/rest/v1`. The backend holds the session in
//! memory, refreshes it once when a data request comes back 401, and
//! broadcasts `SignedOut` when the service no longer honours it. Refreshes
//! are serialized: requests refused together share one refresh.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::types::{
    AuthEvent, NewProfile, Profile, Session, SessionEvent, SessionUser, SignUpOutcome,
};

use super::{Backend, Filter, Table, SESSION_EVENT_CAPACITY};

const PROFILES_TABLE: &str = "profiles";

/// Response from the GoTrue token and signup endpoints
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: SessionUser,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self.expires_at.or_else(|| {
            self.expires_in
                .map(|secs| chrono::Utc::now().timestamp() + secs)
        });
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// Request body for password grant and signup
#[derive(Serialize)]
struct CredentialsRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Request body for the refresh-token grant
#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Next step after a data request was refused with 401
#[derive(Debug, PartialEq, Eq)]
enum Recovery {
    /// The session was renewed after the request went out; retry with it
    Retry(String),
    Refresh,
    /// The session was dropped in the meantime
    Revoked,
}

fn recovery_for(sent_token: &str, current: Option<&Session>) -> Recovery {
    match current {
        None => Recovery::Revoked,
        Some(session) if session.access_token != sent_token => {
            Recovery::Retry(session.access_token.clone())
        }
        Some(_) => Recovery::Refresh,
    }
}

/// HTTP client for the persistence service
pub struct RestBackend {
    http_client: reqwest::Client,
    base_url: String,
    anon_key: String,
    session: Mutex<Option<Session>>,
    /// Held while a refresh is decided and performed
    refresh_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

impl RestBackend {
    /// Create a new backend client from configuration
    ///
    /// Returns an error if the configuration is invalid or missing required fields.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config
            .url
            .clone()
            .ok_or_else(|| Error::Config("backend.url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();
        let anon_key = config
            .resolve_anon_key()
            .ok_or_else(|| Error::Config("backend.anon_key is required".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "apikey",
            HeaderValue::from_str(&anon_key)
                .map_err(|e| Error::Config(format!("invalid anon_key: {}", e)))?,
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);

        Ok(Self {
            http_client,
            base_url,
            anon_key,
            session: Mutex::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            events,
        })
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    /// PostgREST URL for reading a table
    fn select_url(&self, table: &str, columns: &str, filter: Option<&Filter>) -> String {
        let mut url = format!(
            "{}/rest/v1/{}?select={}",
            self.base_url,
            table,
            urlencoding::encode(columns)
        );
        if let Some(filter) = filter {
            url.push_str(&format!(
                "&{}=eq.{}",
                filter.field,
                urlencoding::encode(&filter.value)
            ));
        }
        url
    }

    fn insert_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn current_session(&self) -> Option<Session> {
        match self.session.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn store_session(&self, session: Option<Session>) {
        match self.session.lock() {
            Ok(mut guard) => *guard = session,
            Err(poisoned) => *poisoned.into_inner() = session,
        }
    }

    fn announce(&self, event: AuthEvent, session: Option<Session>) {
        // No receivers is fine; nobody is listening yet.
        let _ = self.events.send(SessionEvent { event, session });
    }

    /// Bearer token for data requests: the session token, or the anon key
    fn bearer(&self) -> String {
        self.current_session()
            .map(|s| s.access_token)
            .unwrap_or_else(|| self.anon_key.clone())
    }

    async fn password_grant(&self, email: &str, password: &str) -> Result<Session> {
        let response = self
            .http_client
            .post(self.auth_url("token?grant_type=password"))
            .json(&CredentialsRequest { email, password })
            .send()
            .await
            .map_err(|e| Error::Network(format!("HTTP request failed: {}", e)))?;

        let token: TokenResponse = parse_auth_response(response).await?;
        Ok(token.into_session())
    }

    /// Exchange the held refresh token for a new session
    async fn refresh(&self) -> Result<Session> {
        let refresh_token = self
            .current_session()
            .and_then(|s| s.refresh_token)
            .ok_or_else(|| Error::Auth("session expired".to_string()))?;

        let response = self
            .http_client
            .post(self.auth_url("token?grant_type=refresh_token"))
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .send()
            .await
            .map_err(|e| Error::Network(format!("HTTP request failed: {}", e)))?;

        let session = parse_auth_response::<TokenResponse>(response)
            .await?
            .into_session();
        self.store_session(Some(session.clone()));
        self.announce(AuthEvent::TokenRefreshed, Some(session.clone()));
        tracing::debug!(user_id = %session.user.id, "Refreshed session");
        Ok(session)
    }

    /// Token to retry a refused request with.
    ///
    /// Only one caller refreshes at a time; a caller that was refused with
    /// a token that has since been replaced reuses the replacement.
    async fn recover(&self, sent_token: &str) -> Result<String> {
        let _refreshing = self.refresh_lock.lock().await;
        match recovery_for(sent_token, self.current_session().as_ref()) {
            Recovery::Retry(token) => {
                tracing::debug!("Session already refreshed, retrying");
                Ok(token)
            }
            Recovery::Revoked => Err(Error::Auth("session revoked".to_string())),
            Recovery::Refresh => match self.refresh().await {
                Ok(session) => Ok(session.access_token),
                Err(e) => {
                    tracing::warn!(error = %e, "Session refresh failed, dropping session");
                    self.store_session(None);
                    self.announce(AuthEvent::SignedOut, None);
                    Err(Error::Auth(format!("session revoked: {}", e)))
                }
            },
        }
    }

    /// Send a data request, refreshing the session once on 401
    async fn send_data<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&str) -> RequestBuilder + Send + Sync,
    {
        let sent_token = self.bearer();
        let response = build(&sent_token)
            .send()
            .await
            .map_err(|e| Error::Network(format!("HTTP request failed: {}", e)))?;

        if response.status() != StatusCode::UNAUTHORIZED || self.current_session().is_none() {
            return check_data_status(response).await;
        }

        let token = self.recover(&sent_token).await?;
        let retried = build(&token)
            .send()
            .await
            .map_err(|e| Error::Network(format!("HTTP request failed: {}", e)))?;

        if retried.status() == StatusCode::UNAUTHORIZED {
            self.store_session(None);
            self.announce(AuthEvent::SignedOut, None);
        }
        check_data_status(retried).await
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn get_session(&self) -> Result<Option<Session>> {
        Ok(self.current_session())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let session = self.password_grant(email, password).await?;
        self.store_session(Some(session.clone()));
        self.announce(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome> {
        let response = self
            .http_client
            .post(self.auth_url("signup"))
            .json(&CredentialsRequest { email, password })
            .send()
            .await
            .map_err(|e| Error::Network(format!("HTTP request failed: {}", e)))?;

        let body: Value = parse_auth_response(response).await?;
        let outcome = signup_outcome(body)?;
        if let Some(session) = &outcome.session {
            self.store_session(Some(session.clone()));
            self.announce(AuthEvent::SignedIn, Some(session.clone()));
        }
        Ok(outcome)
    }

    async fn sign_out(&self) -> Result<()> {
        let Some(session) = self.current_session() else {
            return Ok(());
        };

        // The local session is gone whatever the service answers.
        self.store_session(None);
        self.announce(AuthEvent::SignedOut, None);

        let response = self
            .http_client
            .post(self.auth_url("logout"))
            .header(AUTHORIZATION, format!("Bearer {}", session.access_token))
            .send()
            .await
            .map_err(|e| Error::Network(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND
        {
            Ok(())
        } else {
            Err(Error::Network(format!(
                "API error ({}): {}",
                status,
                error_message(response).await
            )))
        }
    }

    fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let filter = Filter::eq("id", user_id);
        let url = self.select_url(PROFILES_TABLE, "*", Some(&filter));
        let response = self
            .send_data(|token| self.http_client.get(&url).bearer_auth(token))
            .await?;

        let rows: Vec<Profile> = response
            .json()
            .await
            .map_err(|e| Error::Network(format!("failed to parse response: {}", e)))?;
        Ok(rows.into_iter().next())
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<()> {
        let url = self.insert_url(PROFILES_TABLE);
        self.send_data(|token| {
            self.http_client
                .post(&url)
                .bearer_auth(token)
                .header("Prefer", "return=minimal")
                .json(profile)
        })
        .await?;
        Ok(())
    }

    async fn select(&self, table: Table, filter: Option<&Filter>) -> Result<Vec<Value>> {
        let columns = match table {
            Table::Classes => "*,students(count)",
            Table::Students | Table::ReportCards => "*",
        };
        let url = self.select_url(table.as_str(), columns, filter);
        let response = self
            .send_data(|token| self.http_client.get(&url).bearer_auth(token))
            .await?;

        let mut rows: Vec<Value> = response
            .json()
            .await
            .map_err(|e| Error::Network(format!("failed to parse response: {}", e)))?;
        if table == Table::Classes {
            rows.iter_mut().for_each(flatten_student_count);
        }
        Ok(rows)
    }

    async fn insert(&self, table: Table, record: Value) -> Result<Value> {
        let url = self.insert_url(table.as_str());
        let response = self
            .send_data(|token| {
                self.http_client
                    .post(&url)
                    .bearer_auth(token)
                    .header("Prefer", "return=representation")
                    .json(&record)
            })
            .await?;

        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|e| Error::Network(format!("failed to parse response: {}", e)))?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::Network(format!("insert into {} returned no rows", table)))
    }
}

/// Decode an auth endpoint response, mapping client errors to [`Error::Auth`]
async fn parse_auth_response<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| Error::Network(format!("failed to parse response: {}", e)));
    }

    let message = error_message(response).await;
    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        Err(Error::Auth(message))
    } else {
        Err(Error::Network(format!("API error ({}): {}", status, message)))
    }
}

/// Pass successful data responses through; 401 is auth, everything else network
async fn check_data_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = error_message(response).await;
    if status == StatusCode::UNAUTHORIZED {
        Err(Error::Auth(message))
    } else {
        Err(Error::Network(format!("API error ({}): {}", status, message)))
    }
}

/// Best human-readable message from an error response body
async fn error_message(response: Response) -> String {
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown".to_string());
    message_from_body(&text)
}

fn message_from_body(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|body| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|key| body.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| {
            if text.trim().is_empty() {
                "unknown".to_string()
            } else {
                text.trim().to_string()
            }
        })
}

/// Signup answers with a full token response when accounts are auto-confirmed,
/// and with the bare user object when email verification is pending.
fn signup_outcome(body: Value) -> Result<SignUpOutcome> {
    if body.get("access_token").is_some() {
        let session = serde_json::from_value::<TokenResponse>(body)?.into_session();
        return Ok(SignUpOutcome {
            user: Some(session.user.clone()),
            session: Some(session),
        });
    }

    let user_value = body.get("user").cloned().unwrap_or(body);
    let user = if user_value.get("id").is_some() {
        Some(serde_json::from_value::<SessionUser>(user_value)?)
    } else {
        None
    };
    Ok(SignUpOutcome {
        user,
        session: None,
    })
}

/// Replace the embedded `students: [{count: n}]` aggregate with `student_count`
fn flatten_student_count(row: &mut Value) {
    let Some(object) = row.as_object_mut() else {
        return;
    };
    let count = object
        .remove("students")
        .and_then(|embedded| embedded.get(0).and_then(|agg| agg.get("count")).cloned());
    if let Some(count) = count {
        object.insert("student_count".to_string(), count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config() -> BackendConfig {
        BackendConfig {
            url: Some("https://school.example.com/".to_string()),
            anon_key: Some("anon-test".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_backend_requires_valid_config() {
        assert!(RestBackend::new(&BackendConfig::default()).is_err());
    }

    #[test]
    fn test_select_url_with_filter() {
        let backend = RestBackend::new(&test_config()).unwrap();
        let filter = Filter::eq("teacher_id", "u 1");
        assert_eq!(
            backend.select_url("classes", "*,students(count)", Some(&filter)),
            "https://school.example.com/rest/v1/classes?select=%2A%2Cstudents%28count%29&teacher_id=eq.u%201"
        );
        assert_eq!(
            backend.select_url("students", "*", None),
            "https://school.example.com/rest/v1/students?select=%2A"
        );
    }

    #[test]
    fn test_auth_url_trims_trailing_slash() {
        let backend = RestBackend::new(&test_config()).unwrap();
        assert_eq!(
            backend.auth_url("logout"),
            "https://school.example.com/auth/v1/logout"
        );
    }

    #[test]
    fn test_bearer_falls_back_to_anon_key() {
        let backend = RestBackend::new(&test_config()).unwrap();
        assert_eq!(backend.bearer(), "anon-test");
    }

    fn session_with(token: &str) -> Session {
        Session {
            access_token: token.to_string(),
            refresh_token: Some("ref".to_string()),
            expires_at: None,
            user: SessionUser {
                id: "u1".to_string(),
                email: "t@school.edu".to_string(),
            },
        }
    }

    #[test]
    fn test_refused_request_reuses_renewed_session() {
        let renewed = session_with("tok-2");
        assert_eq!(
            recovery_for("tok-1", Some(&renewed)),
            Recovery::Retry("tok-2".to_string())
        );
    }

    #[test]
    fn test_refused_request_refreshes_current_session() {
        let current = session_with("tok-1");
        assert_eq!(recovery_for("tok-1", Some(&current)), Recovery::Refresh);
        assert_eq!(recovery_for("tok-1", None), Recovery::Revoked);
    }

    #[tokio::test]
    async fn test_recover_retries_with_renewed_token_without_refreshing() {
        let backend = RestBackend::new(&test_config()).unwrap();
        backend.store_session(Some(session_with("tok-2")));
        let mut events = backend.session_events();

        assert_eq!(backend.recover("tok-1").await.unwrap(), "tok-2");
        assert!(events.try_recv().is_err());
        assert!(backend.current_session().is_some());
    }

    #[tokio::test]
    async fn test_recover_after_session_dropped() {
        let backend = RestBackend::new(&test_config()).unwrap();
        let err = backend.recover("tok-1").await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn test_message_from_body() {
        assert_eq!(
            message_from_body(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
            "Invalid login credentials"
        );
        assert_eq!(message_from_body(r#"{"msg":"User already registered"}"#), "User already registered");
        assert_eq!(message_from_body("Bad Gateway"), "Bad Gateway");
        assert_eq!(message_from_body(""), "unknown");
    }

    #[test]
    fn test_signup_outcome_without_session() {
        let outcome = signup_outcome(json!({"id": "u1", "email": "t@school.edu"})).unwrap();
        assert_eq!(outcome.user.unwrap().id, "u1");
        assert!(outcome.session.is_none());
    }

    #[test]
    fn test_signup_outcome_with_session() {
        let outcome = signup_outcome(json!({
            "access_token": "tok",
            "refresh_token": "ref",
            "expires_in": 3600,
            "user": {"id": "u1", "email": "t@school.edu"}
        }))
        .unwrap();
        let session = outcome.session.unwrap();
        assert_eq!(session.user.id, "u1");
        assert!(session.expires_at.is_some());
    }

    #[test]
    fn test_flatten_student_count() {
        let mut row = json!({"id": "c1", "students": [{"count": 12}]});
        flatten_student_count(&mut row);
        assert_eq!(row, json!({"id": "c1", "student_count": 12}));

        let mut row = json!({"id": "c2", "students": []});
        flatten_student_count(&mut row);
        assert_eq!(row, json!({"id": "c2"}));
    }
}
