use crate::{Parameters, Result, ResourceService};
use keel_model::{Kind, Project, ResourceKey};
use keel_rbac::{Mutation, RbacCoordinator};
use keel_store::{catalog, Query, Store};

/// Projects own every project scoped resource; deleting one removes them too.
#[derive(Clone, Debug)]
pub struct ProjectService {
    projects: ResourceService<Project>,
    rbac: RbacCoordinator,
}

impl ProjectService {
    pub fn new(store: Store, rbac: RbacCoordinator) -> Self {
        Self {
            projects: ResourceService::new(store, Kind::Project, rbac.clone()),
            rbac,
        }
    }

    pub fn create(&self, project: Project) -> Result<Project> {
        self.projects.create(project)
    }

    pub fn update(&self, project: Project, params: &Parameters) -> Result<Project> {
        self.projects.update(project, params)
    }

    pub fn get(&self, params: &Parameters) -> Result<Project> {
        self.projects.get(params)
    }

    pub fn list(&self, query: Query) -> Result<Vec<Project>> {
        self.projects.list(query, &Parameters::default())
    }

    /// Removes the project's resources kind by kind, then the project, then
    /// refreshes permissions since its roles and bindings are gone. Not
    /// atomic: a failure part way leaves the remaining kinds in place and the
    /// call can be retried.
    pub fn delete(&self, params: &Parameters) -> Result<()> {
        let store = self.projects.store();
        let key = ResourceKey::global(params.name.clone());
        // Fail fast on a missing project before touching its resources.
        store.get::<Project>(Kind::Project, &key)?;
        for kind in catalog::project_scoped_kinds() {
            store.delete_by_query(&Query::new(kind).with_project(params.name.clone()))?;
        }
        store.delete(Kind::Project, &key)?;
        tracing::info!(project = %params.name, "project and its resources deleted");
        if let Some(failure) = self.rbac.refresh(Kind::Project, Mutation::Delete) {
            tracing::warn!(
                project = %params.name,
                error = %failure,
                "project deleted but permissions are stale until the next refresh"
            );
        }
        Ok(())
    }
}
