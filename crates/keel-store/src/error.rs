use keel_model::{Kind, KindParseError, MetadataShape};

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0:?} has no associated table")]
    UnsupportedKind(String),
    #[error("{kind} stores {expected} metadata, got {actual} metadata")]
    UnsupportedMetadataShape {
        kind: Kind,
        expected: MetadataShape,
        actual: MetadataShape,
    },
    #[error("document {id:?} already exists")]
    Conflict { id: String },
    #[error("document {id:?} does not exist")]
    NotFound { id: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("stored document {id:?} cannot be decoded: {source}")]
    CorruptData {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("document {id:?} cannot be encoded: {source}")]
    Encode {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] rusqlite::Error),
    #[error("store is closed")]
    Closed,
    #[error("blocking task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// Storage identifier the failure refers to, when there is one.
    pub fn id(&self) -> Option<&str> {
        match self {
            StoreError::Conflict { id }
            | StoreError::NotFound { id }
            | StoreError::CorruptData { id, .. }
            | StoreError::Encode { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Transport level failures callers may retry with backoff. The store never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::StorageUnavailable(_))
    }
}

impl From<KindParseError> for StoreError {
    fn from(err: KindParseError) -> Self {
        StoreError::UnsupportedKind(err.0)
    }
}
