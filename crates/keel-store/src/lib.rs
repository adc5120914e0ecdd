//! SQLite backed persistence for every resource kind.
//!
//! Each kind maps to one table holding the serialized document next to the
//! columns used for lookup (`id`, `name` and, for project scoped kinds,
//! `project`). The [`Store`] is the single entry point; the remaining modules
//! are exposed for callers that need the lower level pieces.

pub mod catalog;
pub mod error;
pub mod identity;
pub mod materialize;
pub mod query;
pub mod store;

pub use catalog::{table_for, Table, MAIN_SCHEMA};
pub use error::{Result, StoreError};
pub use identity::{resolve, Identity};
pub use materialize::RawDocument;
pub use query::{Pagination, Query};
pub use store::{Store, StoreOptions};
