use crate::kind::Kind;
use crate::metadata::{Metadata, ProjectMetadata, ResourceMetadata};
use crate::rbac::{RoleBindingSpec, RoleSpec};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A persisted resource as stored verbatim in the `doc` column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resource<M, S = Value> {
    pub kind: Kind,
    pub metadata: M,
    pub spec: S,
}

impl<M, S> Resource<M, S> {
    pub fn new(kind: Kind, metadata: M, spec: S) -> Self {
        Self {
            kind,
            metadata,
            spec,
        }
    }
}

/// A resource with its `spec` stripped, as returned by metadata-only listings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceHeader<M> {
    pub kind: Kind,
    pub metadata: M,
}

/// Anything the store can persist under a kind and an identity.
pub trait Entity: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static {
    type Metadata: ResourceMetadata;

    fn kind(&self) -> Kind;
    fn metadata(&self) -> &Self::Metadata;
    fn metadata_mut(&mut self) -> &mut Self::Metadata;
}

impl<M, S> Entity for Resource<M, S>
where
    M: ResourceMetadata,
    S: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static,
{
    type Metadata = M;

    fn kind(&self) -> Kind {
        self.kind
    }

    fn metadata(&self) -> &M {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut M {
        &mut self.metadata
    }
}

pub type Dashboard = Resource<ProjectMetadata>;
pub type Datasource = Resource<ProjectMetadata>;
pub type EphemeralDashboard = Resource<ProjectMetadata>;
pub type Folder = Resource<ProjectMetadata>;
pub type Secret = Resource<ProjectMetadata>;
pub type Variable = Resource<ProjectMetadata>;
pub type Role = Resource<ProjectMetadata, RoleSpec>;
pub type RoleBinding = Resource<ProjectMetadata, RoleBindingSpec>;

pub type GlobalDatasource = Resource<Metadata>;
pub type GlobalSecret = Resource<Metadata>;
pub type GlobalVariable = Resource<Metadata>;
pub type Project = Resource<Metadata>;
pub type User = Resource<Metadata>;
pub type GlobalRole = Resource<Metadata, RoleSpec>;
pub type GlobalRoleBinding = Resource<Metadata, RoleBindingSpec>;
