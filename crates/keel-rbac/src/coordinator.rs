use crate::{Authorization, RefreshError};
use keel_model::Kind;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mutation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mutation::Create => "create",
            Mutation::Update => "update",
            Mutation::Delete => "delete",
        })
    }
}

/// A permission refresh that failed after the mutation it followed had
/// already been committed.
#[derive(Debug, thiserror::Error)]
#[error("permission refresh after {mutation} of {kind} failed: {source}")]
pub struct RefreshFailure {
    pub kind: Kind,
    pub mutation: Mutation,
    #[source]
    pub source: RefreshError,
}

/// Refreshes the permission cache after role and binding mutations.
///
/// The refresh runs on the caller's thread, so a mutation is only
/// acknowledged once the new permissions are visible. A failed refresh is
/// logged and counted but never turned into an error for the caller: the
/// mutation is already in the store.
#[derive(Clone)]
pub struct RbacCoordinator {
    authz: Arc<dyn Authorization>,
    failures: Arc<AtomicU64>,
}

impl RbacCoordinator {
    pub fn new(authz: Arc<dyn Authorization>) -> Self {
        Self {
            authz,
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn authorization(&self) -> &Arc<dyn Authorization> {
        &self.authz
    }

    /// No-op unless `kind` is one of the RBAC kinds.
    #[must_use]
    pub fn after_mutation(&self, kind: Kind, mutation: Mutation) -> Option<RefreshFailure> {
        if !kind.is_rbac() {
            return None;
        }
        self.refresh(kind, mutation)
    }

    /// Unconditional refresh, for mutations that touch RBAC documents
    /// indirectly (a project delete removes its roles and bindings).
    #[must_use]
    pub fn refresh(&self, kind: Kind, mutation: Mutation) -> Option<RefreshFailure> {
        match self.authz.refresh_permissions() {
            Ok(()) => {
                tracing::debug!(%kind, %mutation, "permissions refreshed");
                None
            }
            Err(source) => {
                let failure = RefreshFailure {
                    kind,
                    mutation,
                    source,
                };
                self.failures.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                metrics::counter!("keel_rbac_refresh_failures_total").increment(1);
                tracing::error!(%kind, %mutation, error = %failure, "unable to refresh permissions");
                Some(failure)
            }
        }
    }

    pub fn refresh_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for RbacCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RbacCoordinator")
            .field("refresh_failures", &self.refresh_failures())
            .finish()
    }
}
