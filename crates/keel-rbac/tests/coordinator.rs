use keel_model::{
    Action, Kind, Metadata, Permission, ProjectMetadata, Resource, Role, RoleBinding,
    RoleBindingSpec, RoleSpec, Scope, Subject,
};
use keel_rbac::{
    Authorization, Mutation, NativeAuthorization, RbacCoordinator, RefreshError,
};
use keel_store::{Store, StoreOptions};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn store(dir: &tempfile::TempDir) -> Store {
    let store = Store::open(StoreOptions::new(dir.path().join("rbac.sqlite"))).unwrap();
    store.init().unwrap();
    store
}

fn editor(actions: Vec<Action>) -> Role {
    Resource::new(
        Kind::Role,
        ProjectMetadata::new("p1", "editor"),
        RoleSpec {
            permissions: vec![Permission::new(actions, vec![Scope::Kind(Kind::Dashboard)])],
        },
    )
}

fn bind_alice() -> RoleBinding {
    Resource::new(
        Kind::RoleBinding,
        ProjectMetadata::new("p1", "editor-alice"),
        RoleBindingSpec {
            role: "editor".into(),
            subjects: vec![Subject::user("alice")],
        },
    )
}

/// Delays every refresh so a test can see whether callers wait for it.
struct Slow {
    inner: NativeAuthorization,
    delay: Duration,
}

impl Authorization for Slow {
    fn refresh_permissions(&self) -> Result<(), RefreshError> {
        std::thread::sleep(self.delay);
        self.inner.refresh_permissions()
    }

    fn has_permission(&self, user: &str, action: Action, project: Option<&str>, scope: Kind) -> bool {
        self.inner.has_permission(user, action, project, scope)
    }
}

#[test]
fn snapshot_follows_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    store.create(editor(vec![Action::Read, Action::Update])).unwrap();
    store.create(bind_alice()).unwrap();

    let authz = Arc::new(NativeAuthorization::load(store.clone()).unwrap());
    assert!(authz.has_permission("alice", Action::Update, Some("p1"), Kind::Dashboard));

    let coordinator = RbacCoordinator::new(authz.clone());
    store.upsert(editor(vec![Action::Read])).unwrap();
    assert!(coordinator.after_mutation(Kind::Role, Mutation::Update).is_none());

    assert!(authz.has_permission("alice", Action::Read, Some("p1"), Kind::Dashboard));
    assert!(!authz.has_permission("alice", Action::Update, Some("p1"), Kind::Dashboard));
}

#[test]
fn slow_refresh_completes_before_returning() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    store.create(editor(vec![Action::Read, Action::Update])).unwrap();
    store.create(bind_alice()).unwrap();

    let delay = Duration::from_millis(150);
    let authz = Arc::new(Slow {
        inner: NativeAuthorization::load(store.clone()).unwrap(),
        delay,
    });
    let coordinator = RbacCoordinator::new(authz.clone());

    store
        .delete(Kind::RoleBinding, &keel_model::ResourceKey::scoped("p1", "editor-alice"))
        .unwrap();
    let started = Instant::now();
    assert!(coordinator
        .after_mutation(Kind::RoleBinding, Mutation::Delete)
        .is_none());
    assert!(started.elapsed() >= delay);
    assert!(!authz.has_permission("alice", Action::Read, Some("p1"), Kind::Dashboard));
}

#[test]
fn global_binding_survives_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    store
        .create(Resource::new(
            Kind::GlobalRole,
            Metadata::new("admin"),
            RoleSpec {
                permissions: vec![Permission::new(vec![Action::Wildcard], vec![Scope::Wildcard])],
            },
        ))
        .unwrap();
    store
        .create(Resource::new(
            Kind::GlobalRoleBinding,
            Metadata::new("admins"),
            RoleBindingSpec {
                role: "admin".into(),
                subjects: vec![Subject::user("root")],
            },
        ))
        .unwrap();

    let authz = Arc::new(NativeAuthorization::new(store));
    let coordinator = RbacCoordinator::new(authz.clone());
    assert!(!authz.has_permission("root", Action::Delete, None, Kind::User));
    assert!(coordinator
        .after_mutation(Kind::GlobalRoleBinding, Mutation::Create)
        .is_none());
    assert!(authz.has_permission("root", Action::Delete, None, Kind::User));
    assert!(authz.has_permission("root", Action::Read, Some("p7"), Kind::Secret));
}

#[test]
fn refresh_against_a_closed_store_is_counted_not_raised() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    let authz = Arc::new(NativeAuthorization::load(store.clone()).unwrap());
    let coordinator = RbacCoordinator::new(authz);
    store.close().unwrap();

    let failure = coordinator.after_mutation(Kind::GlobalRole, Mutation::Create);
    assert!(matches!(
        failure.map(|f| f.source),
        Some(RefreshError::Store(keel_store::StoreError::Closed))
    ));
    assert_eq!(coordinator.refresh_failures(), 1);
}

#[test]
fn project_lookup_ignores_case_when_the_store_does() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    assert!(!store.is_case_sensitive());
    store
        .create(Resource::new(
            Kind::Role,
            ProjectMetadata::new("Team", "editor"),
            RoleSpec {
                permissions: vec![Permission::new(
                    vec![Action::Update],
                    vec![Scope::Kind(Kind::Dashboard)],
                )],
            },
        ))
        .unwrap();
    store
        .create(Resource::new(
            Kind::RoleBinding,
            ProjectMetadata::new("Team", "editor-alice"),
            RoleBindingSpec {
                role: "editor".into(),
                subjects: vec![Subject::user("alice")],
            },
        ))
        .unwrap();

    let authz = NativeAuthorization::load(store).unwrap();
    assert!(authz.has_permission("alice", Action::Update, Some("Team"), Kind::Dashboard));
    assert!(authz.has_permission("alice", Action::Update, Some("team"), Kind::Dashboard));
    assert!(!authz.has_permission("alice", Action::Update, Some("other"), Kind::Dashboard));
}

#[test]
fn project_lookup_is_exact_when_the_store_is_case_sensitive() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(
        StoreOptions::new(dir.path().join("exact.sqlite")).case_sensitive(true),
    )
    .unwrap();
    store.init().unwrap();
    store
        .create(Resource::new(
            Kind::Role,
            ProjectMetadata::new("Team", "editor"),
            RoleSpec {
                permissions: vec![Permission::new(
                    vec![Action::Update],
                    vec![Scope::Kind(Kind::Dashboard)],
                )],
            },
        ))
        .unwrap();
    store
        .create(Resource::new(
            Kind::RoleBinding,
            ProjectMetadata::new("Team", "editor-alice"),
            RoleBindingSpec {
                role: "editor".into(),
                subjects: vec![Subject::user("alice")],
            },
        ))
        .unwrap();

    let authz = NativeAuthorization::load(store).unwrap();
    assert!(authz.has_permission("alice", Action::Update, Some("Team"), Kind::Dashboard));
    assert!(!authz.has_permission("alice", Action::Update, Some("team"), Kind::Dashboard));
}
