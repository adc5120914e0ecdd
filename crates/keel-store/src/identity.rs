//! Storage identifiers and the table they live in.

use crate::catalog::{table_for, Table};
use crate::error::{Result, StoreError};
use keel_model::{Kind, ResourceKey};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub table: Table,
}

/// `project|name` for scoped keys, `name` for global ones.
pub fn generate_id(key: &ResourceKey) -> String {
    match key {
        ResourceKey::Global { name } => name.clone(),
        ResourceKey::Scoped { project, name } => format!("{project}|{name}"),
    }
}

/// Pure and deterministic: the table comes from the catalog and the key must
/// have the shape that table stores.
pub fn resolve(kind: Kind, key: &ResourceKey) -> Result<Identity> {
    let table = table_for(kind);
    if key.shape() != table.shape {
        return Err(StoreError::UnsupportedMetadataShape {
            kind,
            expected: table.shape,
            actual: key.shape(),
        });
    }
    Ok(Identity {
        id: generate_id(key),
        table,
    })
}

/// Same as [`resolve`] for a kind given by name, e.g. from a URL path.
pub fn resolve_named(kind: &str, key: &ResourceKey) -> Result<Identity> {
    resolve(kind.parse::<Kind>()?, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_model::MetadataShape;

    #[test]
    fn simple_id_is_the_name() {
        let ident = resolve(Kind::GlobalRole, &ResourceKey::global("admin")).unwrap();
        assert_eq!(ident.id, "admin");
        assert_eq!(ident.table.name, "globalrole");
    }

    #[test]
    fn scoped_id_joins_project_and_name() {
        let ident = resolve(Kind::Dashboard, &ResourceKey::scoped("p1", "d1")).unwrap();
        assert_eq!(ident.id, "p1|d1");
        assert_eq!(ident.table.name, "dashboard");
    }

    #[test]
    fn same_key_different_kinds_never_share_a_table() {
        let key = ResourceKey::scoped("p1", "shared");
        let dash = resolve(Kind::Dashboard, &key).unwrap();
        let var = resolve(Kind::Variable, &key).unwrap();
        assert_eq!(dash.id, var.id);
        assert_ne!(dash.table, var.table);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let err = resolve(Kind::Dashboard, &ResourceKey::global("d1")).unwrap_err();
        match err {
            StoreError::UnsupportedMetadataShape {
                kind,
                expected,
                actual,
            } => {
                assert_eq!(kind, Kind::Dashboard);
                assert_eq!(expected, MetadataShape::Scoped);
                assert_eq!(actual, MetadataShape::Simple);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_name_is_unsupported() {
        let err = resolve_named("Plugin", &ResourceKey::global("x")).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedKind(name) if name == "Plugin"));
        assert!(resolve_named("project", &ResourceKey::global("x")).is_ok());
    }
}
