//! Entity store
//!
//! Keeps the local `classes`, `students` and `reports` collections in step
//! with the persistence service.
//!
//! - `load_*` replaces a whole collection with the service's answer. A failed
//!   load leaves the previous collection untouched.
//! - `create_*` appends the canonical record only after the service has
//!   confirmed the insert. Nothing is written locally before that, so a
//!   failure needs no rollback.
//!
//! Both record failures in the shared `error` field and also return them.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::remote::{Backend, Filter, Table};
use crate::state::{AppState, AppStateHandle};
use crate::types::{Class, NewClass, NewReportCard, NewStudent, ReportCard, Student};

/// A row type with its own collection in [`AppState`]
pub(crate) trait Entity: DeserializeOwned + Clone + Send + Sync + 'static {
    const TABLE: Table;

    fn collection_mut(state: &mut AppState) -> &mut Vec<Self>;
}

impl Entity for Class {
    const TABLE: Table = Table::Classes;

    fn collection_mut(state: &mut AppState) -> &mut Vec<Self> {
        &mut state.classes
    }
}

impl Entity for Student {
    const TABLE: Table = Table::Students;

    fn collection_mut(state: &mut AppState) -> &mut Vec<Self> {
        &mut state.students
    }
}

impl Entity for ReportCard {
    const TABLE: Table = Table::ReportCards;

    fn collection_mut(state: &mut AppState) -> &mut Vec<Self> {
        &mut state.reports
    }
}

/// CRUD access to the entity collections
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn Backend>,
    state: AppStateHandle,
}

impl Store {
    pub fn new(backend: Arc<dyn Backend>, state: AppStateHandle) -> Self {
        Self { backend, state }
    }

    pub fn state(&self) -> &AppStateHandle {
        &self.state
    }

    /// Load the signed-in teacher's classes.
    ///
    /// Does nothing when nobody is signed in.
    pub async fn load_classes(&self) -> Result<()> {
        let Some(user) = self.state.snapshot().user.clone() else {
            tracing::debug!("Skipping class load, no signed-in user");
            return Ok(());
        };
        self.load::<Class>(Some(Filter::eq("teacher_id", user.id)))
            .await
    }

    /// Load students, optionally only those of one class
    pub async fn load_students(&self, class_id: Option<&str>) -> Result<()> {
        self.load::<Student>(class_id.map(|id| Filter::eq("class_id", id)))
            .await
    }

    /// Load report cards, optionally only those of one student
    pub async fn load_reports(&self, student_id: Option<&str>) -> Result<()> {
        self.load::<ReportCard>(student_id.map(|id| Filter::eq("student_id", id)))
            .await
    }

    /// Create a class owned by the signed-in teacher
    pub async fn create_class(&self, draft: NewClass) -> Result<Class> {
        let Some(user) = self.state.snapshot().user.clone() else {
            return self.reject(Error::NotAuthenticated);
        };
        if draft.name.trim().is_empty() {
            return self.reject(Error::Validation("Class name is required".to_string()));
        }

        let mut record = serde_json::to_value(&draft)?;
        if let Some(object) = record.as_object_mut() {
            object.insert("teacher_id".to_string(), Value::String(user.id.clone()));
            if draft.school_id.is_none() {
                if let Some(school_id) = &user.school_id {
                    object.insert("school_id".to_string(), Value::String(school_id.clone()));
                }
            }
        }
        self.create::<Class>(record).await
    }

    /// Enroll a student
    pub async fn create_student(&self, draft: NewStudent) -> Result<Student> {
        let missing: Vec<&str> = [
            ("full_name", &draft.full_name),
            ("registration_number", &draft.registration_number),
            ("class_id", &draft.class_id),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            return self.reject(Error::Validation(format!(
                "Please fill in all required fields: {}",
                missing.join(", ")
            )));
        }

        let record = serde_json::to_value(&draft)?;
        self.create::<Student>(record).await
    }

    /// File a report card
    pub async fn create_report(&self, draft: NewReportCard) -> Result<ReportCard> {
        if draft.student_id.trim().is_empty() {
            return self.reject(Error::Validation("student_id is required".to_string()));
        }
        let record = serde_json::to_value(&draft)?;
        self.create::<ReportCard>(record).await
    }

    pub fn set_error(&self, error: Option<String>) {
        self.state.set_error(error);
    }

    pub fn clear_error(&self) {
        self.state.set_error(None);
    }

    /// Record an error raised before reaching the service and return it
    fn reject<T>(&self, error: Error) -> Result<T> {
        tracing::debug!(error = %error, "Rejected store operation");
        self.state.set_error(Some(error.to_string()));
        Err(error)
    }

    async fn fetch<E: Entity>(&self, filter: Option<&Filter>) -> Result<Vec<E>> {
        let rows = self.backend.select(E::TABLE, filter).await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(Error::from))
            .collect()
    }

    async fn load<E: Entity>(&self, filter: Option<Filter>) -> Result<()> {
        let epoch = self.state.snapshot().epoch();
        self.state.begin_operation();

        let outcome = self.fetch::<E>(filter.as_ref()).await;
        let (items, error) = match outcome {
            Ok(items) => (Some(items), None),
            Err(e) => (None, Some(e)),
        };
        let message = error.as_ref().map(ToString::to_string);
        let count = items.as_ref().map(Vec::len);

        let mut stale = false;
        self.state.update(|current| {
            let mut next = current.settled();
            if current.epoch != epoch {
                stale = true;
                return next;
            }
            if let Some(items) = items {
                *E::collection_mut(&mut next) = items;
            }
            if let Some(message) = message {
                next.error = Some(message);
            }
            next
        });

        match error {
            Some(e) => {
                tracing::warn!(table = %E::TABLE, error = %e, "Load failed");
                Err(e)
            }
            None => {
                if stale {
                    tracing::debug!(table = %E::TABLE, "Discarded load from an ended session");
                } else {
                    tracing::debug!(table = %E::TABLE, rows = count.unwrap_or(0), "Loaded collection");
                }
                Ok(())
            }
        }
    }

    async fn create<E: Entity>(&self, record: Value) -> Result<E> {
        let epoch = self.state.snapshot().epoch();
        self.state.begin_operation_clearing_error();

        let outcome: Result<E> = match self.backend.insert(E::TABLE, record).await {
            Ok(row) => serde_json::from_value(row).map_err(Error::from),
            Err(e) => Err(e),
        };
        let created = outcome.as_ref().ok().cloned();
        let message = outcome.as_ref().err().map(ToString::to_string);

        self.state.update(|current| {
            let mut next = current.settled();
            if current.epoch != epoch {
                return next;
            }
            if let Some(item) = created {
                E::collection_mut(&mut next).push(item);
            }
            if let Some(message) = message {
                next.error = Some(message);
            }
            next
        });

        match &outcome {
            Ok(_) => tracing::debug!(table = %E::TABLE, "Created record"),
            Err(e) => tracing::warn!(table = %E::TABLE, error = %e, "Create failed"),
        }
        outcome
    }
}
