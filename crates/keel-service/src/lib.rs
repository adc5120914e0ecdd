//! Request level operations on top of the store: path parameter checks,
//! metadata bookkeeping, query scoping and the RBAC refresh that follows
//! every role or binding mutation.

mod project;
mod resource;

pub use project::ProjectService;
pub use resource::ResourceService;

use keel_store::StoreError;

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ServiceError {
    pub fn is_bad_request(&self) -> bool {
        matches!(self, ServiceError::BadRequest(_))
    }

    pub fn store(&self) -> Option<&StoreError> {
        match self {
            ServiceError::Store(err) => Some(err),
            ServiceError::BadRequest(_) => None,
        }
    }
}

/// Identity taken from the request path. `project` is absent for global kinds
/// and for listings across every project.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Parameters {
    pub project: Option<String>,
    pub name: String,
}

impl Parameters {
    pub fn global(name: impl Into<String>) -> Self {
        Self {
            project: None,
            name: name.into(),
        }
    }

    pub fn scoped(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project: Some(project.into()),
            name: name.into(),
        }
    }

    /// Parameters of a listing restricted to one project.
    pub fn in_project(project: impl Into<String>) -> Self {
        Self {
            project: Some(project.into()),
            name: String::new(),
        }
    }

    fn project(&self) -> Option<&str> {
        self.project.as_deref().filter(|p| !p.is_empty())
    }
}
