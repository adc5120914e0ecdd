//! Turns stored `(id, doc)` rows into caller-chosen shapes.
//!
//! The target type is a type parameter, so a mismatched output container is a
//! compile error instead of a runtime check. A document that fails to decode
//! aborts the whole operation with [`StoreError::CorruptData`].

use crate::error::{Result, StoreError};
use serde::de::DeserializeOwned;
use serde_json::value::RawValue;
use serde_json::Value;

/// Stored document passed through without decoding.
pub type RawDocument = Box<RawValue>;

/// One row as read from a resource table.
#[derive(Clone, Debug)]
pub struct StoredRow {
    pub id: String,
    pub doc: String,
}

fn corrupt(id: &str, source: serde_json::Error) -> StoreError {
    tracing::error!(id = %id, error = %source, "stored document is corrupted");
    #[cfg(feature = "metrics")]
    metrics::counter!("keel_store_corrupt_documents_total").increment(1);
    StoreError::CorruptData {
        id: id.to_string(),
        source,
    }
}

pub fn decode<T: DeserializeOwned>(row: &StoredRow) -> Result<T> {
    serde_json::from_str(&row.doc).map_err(|err| corrupt(&row.id, err))
}

pub fn raw(row: StoredRow) -> Result<RawDocument> {
    let StoredRow { id, doc } = row;
    RawValue::from_string(doc).map_err(|err| corrupt(&id, err))
}

/// Removes the `spec` body, keeping `kind` and `metadata`.
pub fn strip_spec(row: StoredRow) -> Result<StoredRow> {
    let mut value: Value = serde_json::from_str(&row.doc).map_err(|err| corrupt(&row.id, err))?;
    match value.as_object_mut() {
        Some(object) => {
            object.remove("spec");
        }
        None => {
            let err = <serde_json::Error as serde::de::Error>::custom("document is not an object");
            return Err(corrupt(&row.id, err));
        }
    }
    let doc = serde_json::to_string(&value).map_err(|err| corrupt(&row.id, err))?;
    Ok(StoredRow { id: row.id, doc })
}

/// Decodes every row with `decoder`. Zero rows give an empty vector.
pub fn decode_all_with<T, F>(rows: Vec<StoredRow>, mut decoder: F) -> Result<Vec<T>>
where
    F: FnMut(&RawValue) -> serde_json::Result<T>,
{
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let id = row.id.clone();
        let doc = raw(row)?;
        out.push(decoder(doc.as_ref()).map_err(|err| corrupt(&id, err))?);
    }
    Ok(out)
}

pub fn decode_all<T: DeserializeOwned>(rows: Vec<StoredRow>) -> Result<Vec<T>> {
    rows.iter().map(decode::<T>).collect()
}

pub fn raw_all(rows: Vec<StoredRow>) -> Result<Vec<RawDocument>> {
    rows.into_iter().map(raw).collect()
}
