//! Core domain types for clevercard
//!
//! These types mirror the rows held by the persistence service and the
//! in-memory projection built from them.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Session** | Proof of authenticated identity issued by the persistence service |
//! | **User** | Session identity joined with its profile row |
//! | **Class** | A teaching group owned by one teacher |
//! | **Student** | A pupil enrolled in exactly one Class |
//! | **ReportCard** | Per-term scores and remarks for one Student |
//! | **Draft** | The partial record handed to a create call; the service fills in ids and timestamps |

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================
// Session & User
// ============================================

/// Identity carried by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    #[serde(default)]
    pub email: String,
}

/// An authenticated session issued by the persistence service.
///
/// The tokens are opaque to the core; they are only ever handed back to the
/// backend that issued them.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: SessionUser,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// Result of a sign-up call.
///
/// Services that gate accounts behind email verification report the new
/// user without issuing a session.
#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub user: Option<SessionUser>,
    pub session: Option<Session>,
}

/// Kind of out-of-band session notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// Notification delivered by a backend when its session changes.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

impl SessionEvent {
    /// Whether this notification means the signed-in identity is gone
    pub fn invalidates_user(&self) -> bool {
        self.event == AuthEvent::SignedOut || self.session.is_none()
    }
}

/// Role of an application user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Profile row keyed by the session user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub school_id: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Profile row written on sign-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewProfile {
    pub id: String,
    pub full_name: String,
    pub role: Role,
}

/// The signed-in user as seen by the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub school_id: Option<String>,
    pub avatar_url: Option<String>,
}

impl User {
    /// Join a session identity with its (possibly missing) profile.
    ///
    /// Missing profile fields default to an empty name and the teacher role.
    pub fn from_session(user: &SessionUser, profile: Option<Profile>) -> Self {
        let profile = profile.unwrap_or(Profile {
            id: user.id.clone(),
            full_name: None,
            role: None,
            school_id: None,
            avatar_url: None,
        });
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            full_name: profile.full_name.unwrap_or_default(),
            role: profile.role.unwrap_or_default(),
            school_id: profile.school_id,
            avatar_url: profile.avatar_url,
        }
    }
}

/// Read a nullable column into a plain field, treating `null` like absence
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================
// Class
// ============================================

/// A class owned by a teacher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Class {
    pub id: String,
    #[serde(default)]
    pub school_id: Option<String>,
    pub teacher_id: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub subject: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub academic_year: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_count: Option<u32>,
}

/// Fields a caller supplies when creating a class.
///
/// `teacher_id` is injected from the signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewClass {
    pub name: String,
    pub subject: String,
    pub academic_year: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_id: Option<String>,
}

// ============================================
// Student
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

/// A student enrolled in one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub class_id: String,
    pub full_name: String,
    pub registration_number: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub parent_contact: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields a caller supplies when enrolling a student.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStudent {
    pub class_id: String,
    pub full_name: String,
    pub registration_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

// ============================================
// Report cards
// ============================================

/// Category of a generated insight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Strength,
    Weakness,
    Recommendation,
    Improvement,
}

/// Machine-generated observation attached to a report card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiInsight {
    #[serde(rename = "type")]
    pub kind: InsightKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub message: String,
    /// In `[0, 1]`
    pub confidence: f64,
}

/// Subject name to score.
pub type Scores = BTreeMap<String, f64>;

/// A term report for one student.
///
/// `total_score` and `grade` are derived from `scores` by the grading
/// service; the core stores and transports the pair as given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportCard {
    pub id: String,
    pub student_id: String,
    pub term: String,
    pub academic_year: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub scores: Scores,
    #[serde(default, deserialize_with = "null_as_default")]
    pub teacher_remarks: String,
    #[serde(default)]
    pub ai_insights: Option<Vec<AiInsight>>,
    pub total_score: f64,
    pub grade: String,
    #[serde(default)]
    pub position: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReportCard {
    pub fn has_insights(&self) -> bool {
        self.ai_insights
            .as_ref()
            .map(|insights| !insights.is_empty())
            .unwrap_or(false)
    }
}

/// Fields a caller supplies when filing a report card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewReportCard {
    pub student_id: String,
    pub term: String,
    pub academic_year: String,
    pub scores: Scores,
    pub teacher_remarks: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_insights: Option<Vec<AiInsight>>,
    pub total_score: f64,
    pub grade: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}
