use anyhow::{Context as _, Result};
use keel_config::Config;
use keel_model::{
    Entity, GlobalRole, GlobalRoleBinding, Kind, Metadata, ProjectMetadata, Resource,
    ResourceKey, ResourceMetadata, Role, RoleBinding,
};
use keel_rbac::{Authorization, DisabledAuthorization, NativeAuthorization, RbacCoordinator};
use keel_service::{Parameters, ProjectService, ResourceService, ServiceError};
use keel_store::{table_for, Query, Store, StoreError, StoreOptions};
use serde_json::Value;
use std::sync::Arc;

/// Runs a generic operation with the service type matching `kind`. RBAC kinds
/// get their typed specs; everything else keeps its spec as plain JSON.
macro_rules! dispatch {
    ($ctx:expr, $kind:expr, $op:ident ( $($arg:expr),* )) => {{
        let ctx = $ctx;
        match $kind {
            Kind::Role => $op(&ctx.service::<Role>(Kind::Role) $(, $arg)*),
            Kind::RoleBinding => $op(&ctx.service::<RoleBinding>(Kind::RoleBinding) $(, $arg)*),
            Kind::GlobalRole => $op(&ctx.service::<GlobalRole>(Kind::GlobalRole) $(, $arg)*),
            Kind::GlobalRoleBinding => {
                $op(&ctx.service::<GlobalRoleBinding>(Kind::GlobalRoleBinding) $(, $arg)*)
            }
            kind if table_for(kind).is_project_scoped() => {
                $op(&ctx.service::<Resource<ProjectMetadata>>(kind) $(, $arg)*)
            }
            kind => $op(&ctx.service::<Resource<Metadata>>(kind) $(, $arg)*),
        }
    }};
}

pub fn open_store(cfg: &Config) -> Result<Store> {
    Store::open(StoreOptions::from(&cfg.database))
        .with_context(|| format!("opening {}", cfg.database.path.display()))
}

pub struct Context {
    pub store: Store,
    pub rbac: RbacCoordinator,
}

impl Context {
    /// Opens the store, makes sure the tables exist and loads permissions.
    pub fn open(cfg: &Config) -> Result<Self> {
        let store = open_store(cfg)?;
        store.init().context("initializing tables")?;
        let authz: Arc<dyn Authorization> = if cfg.security.enable_auth {
            Arc::new(NativeAuthorization::load(store.clone()).context("loading permissions")?)
        } else {
            Arc::new(DisabledAuthorization)
        };
        Ok(Self {
            store,
            rbac: RbacCoordinator::new(authz),
        })
    }

    fn service<E: Entity>(&self, kind: Kind) -> ResourceService<E> {
        ResourceService::new(self.store.clone(), kind, self.rbac.clone())
    }

    pub fn apply(&self, doc: Value) -> Result<Value> {
        let kind: Kind = doc
            .get("kind")
            .and_then(Value::as_str)
            .context("document has no kind")?
            .parse()?;
        dispatch!(self, kind, apply(doc))
    }

    pub fn get(&self, kind: Kind, params: Parameters) -> Result<Value> {
        dispatch!(self, kind, get(&params))
    }

    pub fn list(&self, query: Query, params: Parameters) -> Result<Value> {
        dispatch!(self, query.kind(), list(query, &params))
    }

    pub fn delete(&self, kind: Kind, params: Parameters) -> Result<()> {
        if kind == Kind::Project {
            ProjectService::new(self.store.clone(), self.rbac.clone()).delete(&params)?;
            return Ok(());
        }
        dispatch!(self, kind, delete(&params))
    }
}

pub fn parameters(project: Option<String>, name: String) -> Parameters {
    Parameters { project, name }
}

fn parameters_of<M: ResourceMetadata>(metadata: &M) -> Parameters {
    match metadata.key() {
        ResourceKey::Global { name } => Parameters::global(name),
        ResourceKey::Scoped { project, name } => Parameters::scoped(project, name),
    }
}

/// Creates the resource, or updates it when it already exists.
fn apply<E: Entity>(svc: &ResourceService<E>, doc: Value) -> Result<Value> {
    let entity: E = serde_json::from_value(doc)
        .with_context(|| format!("decoding {} document", svc.kind()))?;
    let params = parameters_of(entity.metadata());
    let stored = match svc.create(entity.clone()) {
        Err(ServiceError::Store(StoreError::Conflict { id })) => {
            tracing::debug!(%id, "already exists, updating");
            svc.update(entity, &params)?
        }
        other => other?,
    };
    Ok(serde_json::to_value(stored)?)
}

fn get<E: Entity>(svc: &ResourceService<E>, params: &Parameters) -> Result<Value> {
    Ok(serde_json::to_value(svc.get(params)?)?)
}

fn list<E: Entity>(svc: &ResourceService<E>, query: Query, params: &Parameters) -> Result<Value> {
    if query.metadata_only {
        return Ok(serde_json::to_value(svc.list_headers(query, params)?)?);
    }
    Ok(serde_json::to_value(svc.list(query, params)?)?)
}

fn delete<E: Entity>(svc: &ResourceService<E>, params: &Parameters) -> Result<()> {
    svc.delete(params)?;
    Ok(())
}
