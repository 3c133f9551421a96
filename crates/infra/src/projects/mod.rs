//! Read access to projects, their expense lines and the owner's company.
//!
//! Project CRUD lives elsewhere; the pipeline only reads a snapshot at
//! generation time.

mod postgres;

pub use postgres::PostgresProjectDirectory;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use projectdesk_offers::{ProjectId, ProjectSnapshot};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProjectLookupError {
    #[error("project not found: {0}")]
    NotFound(ProjectId),
    /// Stored data cannot form a valid snapshot (e.g. negative price).
    #[error("invalid project data: {0}")]
    Invalid(String),
    /// Backend could not be reached; a later attempt may succeed.
    #[error("project directory unavailable: {0}")]
    Unavailable(String),
}

impl ProjectLookupError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProjectLookupError::Unavailable(_))
    }
}

pub trait ProjectDirectory: Send + Sync {
    /// Load the project with its expense lines (in entry order) and company.
    fn snapshot(&self, project_id: ProjectId) -> Result<ProjectSnapshot, ProjectLookupError>;
}

impl<D: ProjectDirectory + ?Sized> ProjectDirectory for Arc<D> {
    fn snapshot(&self, project_id: ProjectId) -> Result<ProjectSnapshot, ProjectLookupError> {
        (**self).snapshot(project_id)
    }
}

/// In-memory project directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryProjectDirectory {
    projects: RwLock<HashMap<ProjectId, ProjectSnapshot>>,
}

impl InMemoryProjectDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a project snapshot.
    pub fn upsert(&self, snapshot: ProjectSnapshot) {
        let mut projects = self
            .projects
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        projects.insert(snapshot.project.id, snapshot);
    }

    pub fn remove(&self, project_id: ProjectId) -> Option<ProjectSnapshot> {
        self.projects
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&project_id)
    }
}

impl ProjectDirectory for InMemoryProjectDirectory {
    fn snapshot(&self, project_id: ProjectId) -> Result<ProjectSnapshot, ProjectLookupError> {
        self.projects
            .read()
            .map_err(|_| ProjectLookupError::Unavailable("project directory lock poisoned".into()))?
            .get(&project_id)
            .cloned()
            .ok_or(ProjectLookupError::NotFound(project_id))
    }
}
