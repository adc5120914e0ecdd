use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of resource kinds the backend knows how to persist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    Dashboard,
    Datasource,
    EphemeralDashboard,
    Folder,
    GlobalDatasource,
    GlobalRole,
    GlobalRoleBinding,
    GlobalSecret,
    GlobalVariable,
    Project,
    Role,
    RoleBinding,
    Secret,
    User,
    Variable,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown kind {0:?}")]
pub struct KindParseError(pub String);

impl Kind {
    pub const ALL: [Kind; 15] = [
        Kind::Dashboard,
        Kind::Datasource,
        Kind::EphemeralDashboard,
        Kind::Folder,
        Kind::GlobalDatasource,
        Kind::GlobalRole,
        Kind::GlobalRoleBinding,
        Kind::GlobalSecret,
        Kind::GlobalVariable,
        Kind::Project,
        Kind::Role,
        Kind::RoleBinding,
        Kind::Secret,
        Kind::User,
        Kind::Variable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Dashboard => "Dashboard",
            Kind::Datasource => "Datasource",
            Kind::EphemeralDashboard => "EphemeralDashboard",
            Kind::Folder => "Folder",
            Kind::GlobalDatasource => "GlobalDatasource",
            Kind::GlobalRole => "GlobalRole",
            Kind::GlobalRoleBinding => "GlobalRoleBinding",
            Kind::GlobalSecret => "GlobalSecret",
            Kind::GlobalVariable => "GlobalVariable",
            Kind::Project => "Project",
            Kind::Role => "Role",
            Kind::RoleBinding => "RoleBinding",
            Kind::Secret => "Secret",
            Kind::User => "User",
            Kind::Variable => "Variable",
        }
    }

    /// Kinds whose mutation changes the permissions granted to users.
    pub fn is_rbac(&self) -> bool {
        matches!(
            self,
            Kind::Role | Kind::RoleBinding | Kind::GlobalRole | Kind::GlobalRoleBinding
        )
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = KindParseError;

    /// Accepts the canonical name in any letter case (`dashboard`, `GlobalRole`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Kind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| KindParseError(s.to_string()))
    }
}
