use crate::{Parameters, Result, ServiceError};
use keel_model::{Entity, Kind, MetadataShape, ResourceHeader, ResourceKey, ResourceMetadata};
use keel_rbac::{Mutation, RbacCoordinator};
use keel_store::{Query, RawDocument, Store};
use std::fmt;
use std::marker::PhantomData;

/// CRUD service for one kind.
pub struct ResourceService<E> {
    store: Store,
    kind: Kind,
    rbac: RbacCoordinator,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for ResourceService<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            kind: self.kind,
            rbac: self.rbac.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> fmt::Debug for ResourceService<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceService")
            .field("kind", &self.kind)
            .finish()
    }
}

impl<E: Entity> ResourceService<E> {
    pub fn new(store: Store, kind: Kind, rbac: RbacCoordinator) -> Self {
        Self {
            store,
            kind,
            rbac,
            _entity: PhantomData,
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn create(&self, mut entity: E) -> Result<E> {
        self.check_kind(entity.kind())?;
        entity.metadata_mut().create_now();
        let created = self.store.create(entity)?;
        self.settle(Mutation::Create, created.metadata().name());
        Ok(created)
    }

    /// Replaces the stored document. The body must name the same resource
    /// as the path; an empty body project is taken from the path.
    pub fn update(&self, mut entity: E, params: &Parameters) -> Result<E> {
        self.check_kind(entity.kind())?;
        if entity.metadata().name() != params.name {
            tracing::debug!(
                body = entity.metadata().name(),
                path = %params.name,
                "name in the body and in the path don't match"
            );
            return Err(ServiceError::BadRequest(
                "metadata.name and the name in the request path don't match".into(),
            ));
        }
        if E::Metadata::SHAPE == MetadataShape::Scoped {
            let body_project = entity.metadata().project().unwrap_or_default().to_string();
            match params.project() {
                Some(path) if body_project.is_empty() => entity.metadata_mut().set_project(path),
                Some(path) if body_project == path => {}
                path => {
                    tracing::debug!(
                        body = %body_project,
                        path = path.unwrap_or_default(),
                        "project in the body and in the path don't match"
                    );
                    return Err(ServiceError::BadRequest(
                        "metadata.project and the project in the request path don't match".into(),
                    ));
                }
            }
        }

        let previous: E = self.store.get(self.kind, &entity.metadata().key())?;
        entity.metadata_mut().update_from(previous.metadata());
        let updated = self.store.upsert(entity).inspect_err(|err| {
            tracing::error!(kind = %self.kind, name = %params.name, error = %err, "unable to update the resource")
        })?;
        self.settle(Mutation::Update, &params.name);
        Ok(updated)
    }

    pub fn delete(&self, params: &Parameters) -> Result<()> {
        let key = self.key(params)?;
        self.store.delete(self.kind, &key)?;
        self.settle(Mutation::Delete, &params.name);
        Ok(())
    }

    /// The mutation is already committed, so a failed refresh is reported
    /// but not returned.
    fn settle(&self, mutation: Mutation, name: &str) {
        if let Some(failure) = self.rbac.after_mutation(self.kind, mutation) {
            tracing::warn!(
                kind = %self.kind,
                name,
                error = %failure,
                "resource saved but permissions are stale until the next refresh"
            );
        }
    }

    pub fn get(&self, params: &Parameters) -> Result<E> {
        Ok(self.store.get(self.kind, &self.key(params)?)?)
    }

    /// Full documents. Use [`ResourceService::list_headers`] for metadata only.
    pub fn list(&self, query: Query, params: &Parameters) -> Result<Vec<E>> {
        let query = self.scope(query, params)?;
        if query.metadata_only {
            return Err(ServiceError::BadRequest(
                "metadata only listings return headers, not full resources".into(),
            ));
        }
        Ok(self.store.list(&query)?)
    }

    pub fn raw_list(&self, query: Query, params: &Parameters) -> Result<Vec<RawDocument>> {
        Ok(self.store.raw_list(&self.scope(query, params)?)?)
    }

    pub fn list_headers(
        &self,
        query: Query,
        params: &Parameters,
    ) -> Result<Vec<ResourceHeader<E::Metadata>>> {
        let query = self.scope(query, params)?.metadata_only();
        Ok(self.store.list(&query)?)
    }

    pub fn raw_metadata_list(&self, query: Query, params: &Parameters) -> Result<Vec<RawDocument>> {
        let query = self.scope(query, params)?.metadata_only();
        Ok(self.store.raw_list(&query)?)
    }

    fn scope(&self, query: Query, params: &Parameters) -> Result<Query> {
        self.check_kind(query.kind())?;
        Ok(query.with_default_project(params.project()))
    }

    fn key(&self, params: &Parameters) -> Result<ResourceKey> {
        match (E::Metadata::SHAPE, params.project()) {
            (MetadataShape::Simple, _) => Ok(ResourceKey::global(params.name.clone())),
            (MetadataShape::Scoped, Some(project)) => {
                Ok(ResourceKey::scoped(project, params.name.clone()))
            }
            (MetadataShape::Scoped, None) => Err(ServiceError::BadRequest(format!(
                "{} requires a project",
                self.kind
            ))),
        }
    }

    fn check_kind(&self, kind: Kind) -> Result<()> {
        if kind != self.kind {
            return Err(ServiceError::BadRequest(format!(
                "expected a {} but got a {kind}",
                self.kind
            )));
        }
        Ok(())
    }
}
