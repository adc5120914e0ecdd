use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity fields shared by every resource.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: u64,
}

impl Metadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn create_now(&mut self) {
        let now = Utc::now();
        self.created_at = Some(now);
        self.updated_at = Some(now);
        self.version = 0;
    }

    /// Carries the creation time over from the stored version and bumps the revision.
    pub fn update_from(&mut self, previous: &Metadata) {
        self.created_at = previous.created_at;
        self.updated_at = Some(Utc::now());
        self.version = previous.version + 1;
    }
}

/// Metadata of a resource living inside a project.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    #[serde(flatten)]
    pub metadata: Metadata,
    pub project: String,
}

impl ProjectMetadata {
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: Metadata::new(name),
            project: project.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetadataShape {
    /// `{name}`, used by global kinds.
    Simple,
    /// `{project, name}`, used by project kinds.
    Scoped,
}

impl fmt::Display for MetadataShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataShape::Simple => f.write_str("simple"),
            MetadataShape::Scoped => f.write_str("scoped"),
        }
    }
}

/// The part of the metadata that identifies a resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Global { name: String },
    Scoped { project: String, name: String },
}

impl ResourceKey {
    pub fn global(name: impl Into<String>) -> Self {
        ResourceKey::Global { name: name.into() }
    }

    pub fn scoped(project: impl Into<String>, name: impl Into<String>) -> Self {
        ResourceKey::Scoped {
            project: project.into(),
            name: name.into(),
        }
    }

    pub fn shape(&self) -> MetadataShape {
        match self {
            ResourceKey::Global { .. } => MetadataShape::Simple,
            ResourceKey::Scoped { .. } => MetadataShape::Scoped,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ResourceKey::Global { name } | ResourceKey::Scoped { name, .. } => name,
        }
    }

    pub fn project(&self) -> Option<&str> {
        match self {
            ResourceKey::Global { .. } => None,
            ResourceKey::Scoped { project, .. } => Some(project),
        }
    }

    /// Lower-cases the identifying fields when names are case-insensitive.
    pub fn flatten(self, case_sensitive: bool) -> Self {
        if case_sensitive {
            return self;
        }
        match self {
            ResourceKey::Global { name } => ResourceKey::Global {
                name: name.to_lowercase(),
            },
            ResourceKey::Scoped { project, name } => ResourceKey::Scoped {
                project: project.to_lowercase(),
                name: name.to_lowercase(),
            },
        }
    }
}

/// Behaviour shared by [`Metadata`] and [`ProjectMetadata`].
pub trait ResourceMetadata:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    const SHAPE: MetadataShape;

    fn base(&self) -> &Metadata;
    fn base_mut(&mut self) -> &mut Metadata;
    fn key(&self) -> ResourceKey;
    fn flatten(&mut self, case_sensitive: bool);

    fn project(&self) -> Option<&str> {
        None
    }

    /// Sets the project of scoped metadata; simple metadata ignores it.
    fn set_project(&mut self, _project: &str) {}

    fn name(&self) -> &str {
        &self.base().name
    }

    fn create_now(&mut self) {
        self.base_mut().create_now();
    }

    fn update_from(&mut self, previous: &Self) {
        self.base_mut().update_from(previous.base());
    }
}

impl ResourceMetadata for Metadata {
    const SHAPE: MetadataShape = MetadataShape::Simple;

    fn base(&self) -> &Metadata {
        self
    }

    fn base_mut(&mut self) -> &mut Metadata {
        self
    }

    fn key(&self) -> ResourceKey {
        ResourceKey::global(self.name.clone())
    }

    fn flatten(&mut self, case_sensitive: bool) {
        if !case_sensitive {
            self.name = self.name.to_lowercase();
        }
    }
}

impl ResourceMetadata for ProjectMetadata {
    const SHAPE: MetadataShape = MetadataShape::Scoped;

    fn base(&self) -> &Metadata {
        &self.metadata
    }

    fn base_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    fn key(&self) -> ResourceKey {
        ResourceKey::scoped(self.project.clone(), self.metadata.name.clone())
    }

    fn flatten(&mut self, case_sensitive: bool) {
        self.metadata.flatten(case_sensitive);
        if !case_sensitive {
            self.project = self.project.to_lowercase();
        }
    }

    fn project(&self) -> Option<&str> {
        Some(&self.project)
    }

    fn set_project(&mut self, project: &str) {
        self.project = project.to_string();
    }
}
