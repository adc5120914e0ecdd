//! Resource model shared by the store, the RBAC layer and the services.
//!
//! Every persisted resource is a [`Resource`] document identified by its
//! [`Kind`] and either a global [`Metadata`] or a project-scoped
//! [`ProjectMetadata`].

mod kind;
mod metadata;
mod rbac;
mod resource;

pub use kind::{Kind, KindParseError};
pub use metadata::{Metadata, MetadataShape, ProjectMetadata, ResourceKey, ResourceMetadata};
pub use rbac::{Action, Permission, RoleBindingSpec, RoleSpec, Scope, Subject, SubjectKind};
pub use resource::{
    Dashboard, Datasource, EphemeralDashboard, Entity, Folder, GlobalDatasource, GlobalRole,
    GlobalRoleBinding, GlobalSecret, GlobalVariable, Project, Resource, ResourceHeader, Role,
    RoleBinding, Secret, User, Variable,
};
