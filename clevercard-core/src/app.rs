//! Wiring of the session manager and store around one shared state

use std::sync::Arc;

use crate::config::BackendConfig;
use crate::error::Result;
use crate::remote::{Backend, RestBackend};
use crate::selectors::DashboardStats;
use crate::session::SessionManager;
use crate::state::AppStateHandle;
use crate::store::Store;

/// Everything a client needs, sharing one [`AppStateHandle`].
#[derive(Clone)]
pub struct CleverCard {
    pub state: AppStateHandle,
    pub session: SessionManager,
    pub store: Store,
}

impl CleverCard {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let state = AppStateHandle::new();
        Self {
            session: SessionManager::new(Arc::clone(&backend), state.clone()),
            store: Store::new(backend, state.clone()),
            state,
        }
    }

    /// Connect to the configured HTTP persistence service
    pub fn connect(config: &BackendConfig) -> Result<Self> {
        let backend = RestBackend::new(config)?;
        Ok(Self::new(Arc::new(backend)))
    }

    /// Load classes, students and reports for the signed-in teacher.
    ///
    /// Stops at the first failure; earlier collections stay loaded.
    pub async fn load_all(&self) -> Result<()> {
        self.store.load_classes().await?;
        self.store.load_students(None).await?;
        self.store.load_reports(None).await
    }

    pub fn dashboard(&self) -> DashboardStats {
        DashboardStats::from_state(&self.state.snapshot())
    }
}
