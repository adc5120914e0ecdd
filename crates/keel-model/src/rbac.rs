use crate::kind::Kind;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[serde(rename = "*")]
    Wildcard,
    Read,
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn allows(&self, requested: Action) -> bool {
        *self == Action::Wildcard || *self == requested
    }
}

/// Resource kind a permission applies to; `*` covers every kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    Wildcard,
    Kind(Kind),
}

impl Scope {
    pub fn covers(&self, kind: Kind) -> bool {
        match self {
            Scope::Wildcard => true,
            Scope::Kind(scoped) => *scoped == kind,
        }
    }
}

impl TryFrom<String> for Scope {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "*" {
            return Ok(Scope::Wildcard);
        }
        value
            .parse::<Kind>()
            .map(Scope::Kind)
            .map_err(|err| err.to_string())
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Wildcard => f.write_str("*"),
            Scope::Kind(kind) => f.write_str(kind.as_str()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub actions: Vec<Action>,
    pub scopes: Vec<Scope>,
}

impl Permission {
    pub fn new(actions: Vec<Action>, scopes: Vec<Scope>) -> Self {
        Self { actions, scopes }
    }

    pub fn grants(&self, action: Action, kind: Kind) -> bool {
        self.actions.iter().any(|a| a.allows(action)) && self.scopes.iter().any(|s| s.covers(kind))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectKind {
    User,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub kind: SubjectKind,
    pub name: String,
}

impl Subject {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::User,
            name: name.into(),
        }
    }
}

/// Grants the permissions of `role` to every subject.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBindingSpec {
    pub role: String,
    #[serde(default)]
    pub subjects: Vec<Subject>,
}
