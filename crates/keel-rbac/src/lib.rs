//! Role based access control: permission snapshots built from the stored
//! roles and bindings, and the coordinator that keeps them fresh after every
//! RBAC mutation.

mod coordinator;
mod snapshot;

pub use coordinator::{Mutation, RbacCoordinator, RefreshFailure};
pub use snapshot::PermissionSnapshot;

use keel_model::{Action, Kind};
use keel_store::{Store, StoreError};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("unable to load roles and bindings: {0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Other(String),
}

/// Permission cache consulted by every authorization check.
pub trait Authorization: Send + Sync {
    fn refresh_permissions(&self) -> Result<(), RefreshError>;

    /// `project` is `None` for global kinds; only global bindings apply then.
    fn has_permission(&self, user: &str, action: Action, project: Option<&str>, scope: Kind)
        -> bool;
}

/// Permissions computed from the store. Checks read an immutable snapshot;
/// a refresh builds a new one and swaps it in.
///
/// Refreshes are serialized: a refresh that started earlier can never
/// replace the snapshot of one that read the store later.
pub struct NativeAuthorization {
    store: Store,
    case_sensitive: bool,
    refresh: Mutex<()>,
    snapshot: RwLock<Arc<PermissionSnapshot>>,
}

impl NativeAuthorization {
    /// Starts with an empty snapshot; nothing is granted until the first refresh.
    pub fn new(store: Store) -> Self {
        Self {
            case_sensitive: store.is_case_sensitive(),
            store,
            refresh: Mutex::new(()),
            snapshot: RwLock::new(Arc::new(PermissionSnapshot::default())),
        }
    }

    pub fn load(store: Store) -> Result<Self, RefreshError> {
        let authz = Self::new(store);
        authz.refresh_permissions()?;
        Ok(authz)
    }

    pub fn snapshot(&self) -> Arc<PermissionSnapshot> {
        self.snapshot.read().clone()
    }
}

impl Authorization for NativeAuthorization {
    fn refresh_permissions(&self) -> Result<(), RefreshError> {
        let _serial = self.refresh.lock();
        let next = PermissionSnapshot::load(&self.store)?;
        tracing::debug!(users = next.user_count(), "permission snapshot rebuilt");
        *self.snapshot.write() = Arc::new(next);
        Ok(())
    }

    fn has_permission(
        &self,
        user: &str,
        action: Action,
        project: Option<&str>,
        scope: Kind,
    ) -> bool {
        // Projects are stored lower-cased when the store ignores case.
        match project {
            Some(project) if !self.case_sensitive => {
                let project = project.to_lowercase();
                self.snapshot().allows(user, action, Some(&project), scope)
            }
            _ => self.snapshot().allows(user, action, project, scope),
        }
    }
}

/// Used when authentication is turned off: everything is allowed.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledAuthorization;

impl Authorization for DisabledAuthorization {
    fn refresh_permissions(&self) -> Result<(), RefreshError> {
        Ok(())
    }

    fn has_permission(&self, _: &str, _: Action, _: Option<&str>, _: Kind) -> bool {
        true
    }
}
