use keel_model::{
    Action, GlobalRole, GlobalRoleBinding, Kind, Permission, Role, RoleBinding, SubjectKind,
};
use keel_store::{Query, Store, StoreError};
use std::collections::HashMap;

/// Effective permissions per user, resolved from roles and their bindings.
#[derive(Clone, Debug, Default)]
pub struct PermissionSnapshot {
    global: HashMap<String, Vec<Permission>>,
    // user -> project -> permissions
    projects: HashMap<String, HashMap<String, Vec<Permission>>>,
}

impl PermissionSnapshot {
    pub fn load(store: &Store) -> Result<Self, StoreError> {
        let global_roles: Vec<GlobalRole> = store.list(&Query::new(Kind::GlobalRole))?;
        let global_bindings: Vec<GlobalRoleBinding> =
            store.list(&Query::new(Kind::GlobalRoleBinding))?;
        let roles: Vec<Role> = store.list(&Query::new(Kind::Role))?;
        let bindings: Vec<RoleBinding> = store.list(&Query::new(Kind::RoleBinding))?;
        Ok(Self::build(&global_roles, &global_bindings, &roles, &bindings))
    }

    pub fn build(
        global_roles: &[GlobalRole],
        global_bindings: &[GlobalRoleBinding],
        roles: &[Role],
        bindings: &[RoleBinding],
    ) -> Self {
        let mut snapshot = Self::default();

        let by_name: HashMap<&str, &GlobalRole> = global_roles
            .iter()
            .map(|role| (role.metadata.name.as_str(), role))
            .collect();
        for binding in global_bindings {
            let Some(role) = lookup(&by_name, &binding.spec.role) else {
                tracing::warn!(
                    binding = %binding.metadata.name,
                    role = %binding.spec.role,
                    "global role binding refers to a missing global role"
                );
                continue;
            };
            for user in users(&binding.spec.subjects) {
                snapshot
                    .global
                    .entry(user.to_string())
                    .or_default()
                    .extend(role.spec.permissions.iter().cloned());
            }
        }

        let by_key: HashMap<(&str, &str), &Role> = roles
            .iter()
            .map(|role| {
                (
                    (role.metadata.project.as_str(), role.metadata.metadata.name.as_str()),
                    role,
                )
            })
            .collect();
        for binding in bindings {
            let project = binding.metadata.project.as_str();
            let lowered = binding.spec.role.to_lowercase();
            let role = by_key
                .get(&(project, binding.spec.role.as_str()))
                .or_else(|| by_key.get(&(project, lowered.as_str())));
            let Some(role) = role else {
                tracing::warn!(
                    project,
                    binding = %binding.metadata.metadata.name,
                    role = %binding.spec.role,
                    "role binding refers to a missing role"
                );
                continue;
            };
            for user in users(&binding.spec.subjects) {
                snapshot
                    .projects
                    .entry(user.to_string())
                    .or_default()
                    .entry(project.to_string())
                    .or_default()
                    .extend(role.spec.permissions.iter().cloned());
            }
        }
        snapshot
    }

    pub fn allows(&self, user: &str, action: Action, project: Option<&str>, scope: Kind) -> bool {
        let grants = |perms: &Vec<Permission>| perms.iter().any(|p| p.grants(action, scope));
        if self.global.get(user).is_some_and(grants) {
            return true;
        }
        match project {
            Some(project) => self
                .projects
                .get(user)
                .and_then(|by_project| by_project.get(project))
                .is_some_and(grants),
            None => false,
        }
    }

    /// Number of distinct users holding at least one binding.
    pub fn user_count(&self) -> usize {
        let scoped_only = self
            .projects
            .keys()
            .filter(|user| !self.global.contains_key(*user))
            .count();
        self.global.len() + scoped_only
    }
}

fn lookup<'a>(
    by_name: &HashMap<&str, &'a GlobalRole>,
    name: &str,
) -> Option<&'a GlobalRole> {
    let lowered = name.to_lowercase();
    by_name
        .get(name)
        .or_else(|| by_name.get(lowered.as_str()))
        .copied()
}

fn users(subjects: &[keel_model::Subject]) -> impl Iterator<Item = &str> {
    subjects
        .iter()
        .filter(|s| s.kind == SubjectKind::User)
        .map(|s| s.name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_model::{
        Metadata, ProjectMetadata, Resource, RoleBindingSpec, RoleSpec, Scope, Subject,
    };

    fn perm(action: Action, scope: Scope) -> Permission {
        Permission::new(vec![action], vec![scope])
    }

    fn role(project: &str, name: &str, perms: Vec<Permission>) -> Role {
        Resource::new(
            Kind::Role,
            ProjectMetadata::new(project, name),
            RoleSpec { permissions: perms },
        )
    }

    fn binding(project: &str, role: &str, user: &str) -> RoleBinding {
        Resource::new(
            Kind::RoleBinding,
            ProjectMetadata::new(project, format!("{role}-{user}")),
            RoleBindingSpec {
                role: role.into(),
                subjects: vec![Subject::user(user)],
            },
        )
    }

    #[test]
    fn project_binding_is_limited_to_its_project() {
        let snap = PermissionSnapshot::build(
            &[],
            &[],
            &[role("p1", "viewer", vec![perm(Action::Read, Scope::Kind(Kind::Dashboard))])],
            &[binding("p1", "viewer", "alice")],
        );
        assert!(snap.allows("alice", Action::Read, Some("p1"), Kind::Dashboard));
        assert!(!snap.allows("alice", Action::Read, Some("p2"), Kind::Dashboard));
        assert!(!snap.allows("alice", Action::Update, Some("p1"), Kind::Dashboard));
        assert!(!snap.allows("alice", Action::Read, None, Kind::Project));
        assert!(!snap.allows("bob", Action::Read, Some("p1"), Kind::Dashboard));
    }

    #[test]
    fn global_binding_applies_everywhere() {
        let admin: GlobalRole = Resource::new(
            Kind::GlobalRole,
            Metadata::new("admin"),
            RoleSpec {
                permissions: vec![perm(Action::Wildcard, Scope::Wildcard)],
            },
        );
        let bound: GlobalRoleBinding = Resource::new(
            Kind::GlobalRoleBinding,
            Metadata::new("admins"),
            RoleBindingSpec {
                role: "admin".into(),
                subjects: vec![Subject::user("root")],
            },
        );
        let snap = PermissionSnapshot::build(&[admin], &[bound], &[], &[]);
        assert!(snap.allows("root", Action::Delete, Some("any"), Kind::Secret));
        assert!(snap.allows("root", Action::Create, None, Kind::Project));
        assert_eq!(snap.user_count(), 1);
    }

    #[test]
    fn binding_to_missing_role_is_skipped() {
        let snap = PermissionSnapshot::build(&[], &[], &[], &[binding("p1", "ghost", "alice")]);
        assert!(!snap.allows("alice", Action::Read, Some("p1"), Kind::Dashboard));
        assert_eq!(snap.user_count(), 0);
    }

    #[test]
    fn binding_role_name_falls_back_to_lower_case() {
        let admin: GlobalRole = Resource::new(
            Kind::GlobalRole,
            Metadata::new("admin"),
            RoleSpec {
                permissions: vec![perm(Action::Read, Scope::Kind(Kind::User))],
            },
        );
        let bound: GlobalRoleBinding = Resource::new(
            Kind::GlobalRoleBinding,
            Metadata::new("admins"),
            RoleBindingSpec {
                role: "Admin".into(),
                subjects: vec![Subject::user("root")],
            },
        );
        let snap = PermissionSnapshot::build(
            &[admin],
            &[bound],
            &[role("p1", "viewer", vec![perm(Action::Read, Scope::Kind(Kind::Dashboard))])],
            &[binding("p1", "Viewer", "alice")],
        );
        assert!(snap.allows("root", Action::Read, None, Kind::User));
        assert!(snap.allows("alice", Action::Read, Some("p1"), Kind::Dashboard));
        assert_eq!(snap.user_count(), 2);
    }

    #[test]
    fn role_of_another_project_is_not_borrowed() {
        let snap = PermissionSnapshot::build(
            &[],
            &[],
            &[role("p1", "editor", vec![perm(Action::Wildcard, Scope::Wildcard)])],
            &[binding("p2", "editor", "alice")],
        );
        assert!(!snap.allows("alice", Action::Read, Some("p2"), Kind::Dashboard));
        assert!(!snap.allows("alice", Action::Read, Some("p1"), Kind::Dashboard));
    }
}
