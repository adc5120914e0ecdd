use crate::catalog::{self, table_for, Table, MAIN_SCHEMA, UPDATES_TABLE};
use crate::error::{Result, StoreError};
use crate::identity::{self, Identity};
use crate::materialize::{self, RawDocument, StoredRow};
use crate::query::{Query, QueryBuilder, Statement};
use chrono::{DateTime, Utc};
use keel_config::DatabaseConfig;
use keel_model::{Entity, Kind, ResourceKey, ResourceMetadata};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde_json::value::RawValue;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct StoreOptions {
    pub path: PathBuf,
    pub schema: String,
    pub case_sensitive: bool,
    pub busy_timeout: Duration,
}

impl StoreOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::from(&DatabaseConfig {
            path: path.into(),
            ..DatabaseConfig::default()
        })
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }
}

impl From<&DatabaseConfig> for StoreOptions {
    fn from(cfg: &DatabaseConfig) -> Self {
        Self {
            path: cfg.path.clone(),
            schema: cfg.schema.clone(),
            case_sensitive: cfg.case_sensitive,
            busy_timeout: Duration::from_millis(cfg.busy_timeout_ms),
        }
    }
}

/// Generic data access object for every resource kind.
///
/// Cheap to clone. Every operation opens its own connection, so clones can be
/// used from any thread. All methods block on SQLite; the `*_async` variants
/// move that work onto tokio's blocking pool.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    schema: String,
    case_sensitive: bool,
    busy_timeout: Duration,
    closed: AtomicBool,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("schema", &self.inner.schema)
            .field("case_sensitive", &self.inner.case_sensitive)
            .finish()
    }
}

impl Store {
    /// Validates the options and opens a first connection so that a bad path
    /// fails here rather than on the first request.
    pub fn open(opts: StoreOptions) -> Result<Self> {
        if !catalog::is_valid_identifier(&opts.schema) {
            return Err(StoreError::InvalidArgument(format!(
                "schema name {:?} is not a plain identifier",
                opts.schema
            )));
        }
        let store = Self {
            inner: Arc::new(Inner {
                path: opts.path,
                schema: opts.schema,
                case_sensitive: opts.case_sensitive,
                busy_timeout: opts.busy_timeout,
                closed: AtomicBool::new(false),
            }),
        };
        store.conn()?;
        tracing::info!(
            path = %store.inner.path.display(),
            schema = %store.inner.schema,
            case_sensitive = store.inner.case_sensitive,
            "store opened"
        );
        Ok(store)
    }

    pub fn schema(&self) -> &str {
        &self.inner.schema
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.inner.case_sensitive
    }

    fn builder(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(&self.inner.schema, self.inner.case_sensitive)
    }

    /// Creates the bookkeeping table, then every resource table with its
    /// triggers. Not transactional: a failure leaves earlier tables in place,
    /// and a retry skips them thanks to `IF NOT EXISTS`.
    pub fn init(&self) -> Result<()> {
        let conn = self.conn()?;
        let schema = self.schema();
        conn.execute_batch(&catalog::create_updates_table_sql(schema))?;
        for kind in Kind::ALL {
            let table = table_for(kind);
            conn.execute_batch(&catalog::create_table_sql(schema, table))
                .inspect_err(|err| {
                    tracing::error!(table = table.name, error = %err, "unable to create table")
                })?;
            conn.execute_batch(&catalog::touch_triggers_sql(schema, table))?;
        }
        tracing::info!(schema, tables = Kind::ALL.len(), "store schema ready");
        Ok(())
    }

    /// Later calls fail with [`StoreError::Closed`]. Connections already
    /// handed to running operations finish normally.
    pub fn close(&self) -> Result<()> {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            tracing::info!(schema = %self.inner.schema, "store closed");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Fresh connection for one operation. A schema other than `main` keeps
    /// the primary database in memory and reaches the file only through the
    /// attached schema name.
    fn conn(&self) -> Result<Connection> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        let schema = self.inner.schema.as_str();
        let conn = if schema == MAIN_SCHEMA {
            Connection::open(&self.inner.path)?
        } else {
            let conn = Connection::open_in_memory()?;
            conn.execute(
                &format!("ATTACH DATABASE ?1 AS \"{schema}\""),
                [self.inner.path.to_string_lossy().into_owned()],
            )?;
            conn
        };
        conn.busy_timeout(self.inner.busy_timeout)?;
        conn.query_row(
            &format!("PRAGMA \"{schema}\".journal_mode = WAL"),
            [],
            |_| Ok(()),
        )?;
        conn.execute_batch(&format!("PRAGMA \"{schema}\".synchronous = NORMAL"))?;
        Ok(conn)
    }

    /// Inserts a new document. The existence probe yields `Conflict`; a writer
    /// that slips in between probe and insert trips the primary key, which is
    /// reported as the same `Conflict`.
    pub fn create<E: Entity>(&self, mut entity: E) -> Result<E> {
        let (ident, key, doc) = self.prepare(&mut entity)?;
        let conn = self.conn()?;
        if self.exists(&conn, &ident)? {
            return Err(StoreError::Conflict { id: ident.id });
        }
        let stmt = self.builder().insert(ident.table, &ident.id, &key, doc);
        match execute(&conn, &stmt) {
            Ok(_) => {}
            Err(err) if is_primary_key_violation(&err) => {
                tracing::debug!(id = %ident.id, table = ident.table.name, "create lost the insert race");
                return Err(StoreError::Conflict { id: ident.id });
            }
            Err(err) => return Err(err.into()),
        }
        tracing::debug!(id = %ident.id, table = ident.table.name, "document created");
        Ok(entity)
    }

    /// Inserts or replaces the whole document. There is no field level merge.
    pub fn upsert<E: Entity>(&self, mut entity: E) -> Result<E> {
        let (ident, key, doc) = self.prepare(&mut entity)?;
        let conn = self.conn()?;
        let builder = self.builder();
        if self.exists(&conn, &ident)? {
            execute(&conn, &builder.update(ident.table, &ident.id, &key, doc))?;
        } else {
            match execute(&conn, &builder.insert(ident.table, &ident.id, &key, doc.clone())) {
                Ok(_) => {}
                Err(err) if is_primary_key_violation(&err) => {
                    execute(&conn, &builder.update(ident.table, &ident.id, &key, doc))?;
                }
                Err(err) => return Err(err.into()),
            }
        }
        tracing::debug!(id = %ident.id, table = ident.table.name, "document upserted");
        Ok(entity)
    }

    pub fn get<T: DeserializeOwned>(&self, kind: Kind, key: &ResourceKey) -> Result<T> {
        let ident = self.resolve(kind, key)?;
        let conn = self.conn()?;
        let rows = fetch(&conn, &self.builder().select_by_id(ident.table, &ident.id))?;
        match rows.first() {
            Some(row) => materialize::decode(row),
            None => Err(StoreError::NotFound { id: ident.id }),
        }
    }

    /// Decodes into an existing value; `out` is untouched on error.
    pub fn get_into<T: DeserializeOwned>(
        &self,
        kind: Kind,
        key: &ResourceKey,
        out: &mut T,
    ) -> Result<()> {
        *out = self.get(kind, key)?;
        Ok(())
    }

    /// Decodes every matching document into `T` in backend row order. With
    /// `metadata_only` the `spec` body is stripped first.
    pub fn list<T: DeserializeOwned>(&self, query: &Query) -> Result<Vec<T>> {
        materialize::decode_all(self.rows(query)?)
    }

    /// Like [`Store::list`] but with a caller supplied decoder.
    pub fn list_with<T, F>(&self, query: &Query, decoder: F) -> Result<Vec<T>>
    where
        F: FnMut(&RawValue) -> serde_json::Result<T>,
    {
        materialize::decode_all_with(self.rows(query)?, decoder)
    }

    pub fn raw_list(&self, query: &Query) -> Result<Vec<RawDocument>> {
        materialize::raw_all(self.rows(query)?)
    }

    pub fn delete(&self, kind: Kind, key: &ResourceKey) -> Result<()> {
        let ident = self.resolve(kind, key)?;
        let conn = self.conn()?;
        if !self.exists(&conn, &ident)? {
            return Err(StoreError::NotFound { id: ident.id });
        }
        let removed = execute(&conn, &self.builder().delete_by_id(ident.table, &ident.id))?;
        if removed == 0 {
            // Someone else removed it after the probe.
            return Err(StoreError::NotFound { id: ident.id });
        }
        tracing::debug!(id = %ident.id, table = ident.table.name, "document deleted");
        Ok(())
    }

    /// Bulk delete of everything the query matches. No probe, and the number
    /// of removed rows is only logged.
    pub fn delete_by_query(&self, query: &Query) -> Result<()> {
        let stmt = self.builder().delete(query)?;
        let conn = self.conn()?;
        let removed = execute(&conn, &stmt)?;
        tracing::debug!(kind = %query.kind(), removed, "documents deleted by query");
        Ok(())
    }

    /// Liveness probe. Never fails loudly: errors are logged and reported as `false`.
    pub fn health_check(&self) -> bool {
        let ping = self.conn().and_then(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(StoreError::from)
        });
        match ping {
            Ok(_) => true,
            Err(err) => {
                tracing::error!(error = %err, "unable to ping the database");
                false
            }
        }
    }

    /// Most recent write to any table backing `kinds`.
    pub fn latest_update_time(&self, kinds: &[Kind]) -> Result<DateTime<Utc>> {
        let mut tables: Vec<Table> = Vec::with_capacity(kinds.len());
        for table in kinds.iter().map(|kind| table_for(*kind)) {
            if !tables.contains(&table) {
                tables.push(table);
            }
        }
        if tables.is_empty() {
            return Err(StoreError::InvalidArgument(
                "at least one kind is required".into(),
            ));
        }
        let stmt = self.builder().latest_update(&tables);
        let conn = self.conn()?;
        let stamp: Option<String> = conn
            .prepare_cached(&stmt.sql)?
            .query_row(params_from_iter(stmt.params.iter()), |row| row.get(0))
            .optional()?;
        let Some(stamp) = stamp else {
            let names: Vec<&str> = tables.iter().map(|t| t.name).collect();
            return Err(StoreError::NotFound {
                id: names.join(","),
            });
        };
        serde_json::from_value(serde_json::Value::String(stamp)).map_err(|source| {
            StoreError::CorruptData {
                id: UPDATES_TABLE.to_string(),
                source,
            }
        })
    }

    fn resolve(&self, kind: Kind, key: &ResourceKey) -> Result<Identity> {
        let key = key.clone().flatten(self.inner.case_sensitive);
        identity::resolve(kind, &key)
    }

    fn prepare<E: Entity>(&self, entity: &mut E) -> Result<(Identity, ResourceKey, String)> {
        entity.metadata_mut().flatten(self.inner.case_sensitive);
        let key = entity.metadata().key();
        let ident = identity::resolve(entity.kind(), &key)?;
        let doc = serde_json::to_string(entity).map_err(|source| StoreError::Encode {
            id: ident.id.clone(),
            source,
        })?;
        Ok((ident, key, doc))
    }

    fn exists(&self, conn: &Connection, ident: &Identity) -> Result<bool> {
        let stmt = self.builder().select_by_id(ident.table, &ident.id);
        let found = conn
            .prepare_cached(&stmt.sql)?
            .exists(params_from_iter(stmt.params.iter()))?;
        Ok(found)
    }

    fn rows(&self, query: &Query) -> Result<Vec<StoredRow>> {
        let stmt = self.builder().select(query)?;
        let conn = self.conn()?;
        let rows = fetch(&conn, &stmt)?;
        if query.metadata_only {
            return rows.into_iter().map(materialize::strip_spec).collect();
        }
        Ok(rows)
    }
}

fn fetch(conn: &Connection, stmt: &Statement) -> Result<Vec<StoredRow>> {
    #[cfg(feature = "metrics")]
    metrics::counter!("keel_store_statements_total", "op" => "select").increment(1);
    let mut prepared = conn.prepare_cached(&stmt.sql)?;
    let rows = prepared
        .query_map(params_from_iter(stmt.params.iter()), |row| {
            Ok(StoredRow {
                id: row.get(0)?,
                doc: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn execute(conn: &Connection, stmt: &Statement) -> rusqlite::Result<usize> {
    #[cfg(feature = "metrics")]
    metrics::counter!("keel_store_statements_total", "op" => "write").increment(1);
    conn.prepare_cached(&stmt.sql)?
        .execute(params_from_iter(stmt.params.iter()))
}

fn is_primary_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

// ---------------- Async wrappers (spawn_blocking) ----------------
// These helpers offload rusqlite work from async executors.

impl Store {
    async fn blocking<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(Store) -> Result<R> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(store))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    pub async fn init_async(&self) -> Result<()> {
        self.blocking(|s| s.init()).await
    }

    pub async fn create_async<E: Entity>(&self, entity: E) -> Result<E> {
        self.blocking(move |s| s.create(entity)).await
    }

    pub async fn upsert_async<E: Entity>(&self, entity: E) -> Result<E> {
        self.blocking(move |s| s.upsert(entity)).await
    }

    pub async fn get_async<T>(&self, kind: Kind, key: ResourceKey) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.blocking(move |s| s.get(kind, &key)).await
    }

    pub async fn list_async<T>(&self, query: Query) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.blocking(move |s| s.list(&query)).await
    }

    pub async fn raw_list_async(&self, query: Query) -> Result<Vec<RawDocument>> {
        self.blocking(move |s| s.raw_list(&query)).await
    }

    pub async fn delete_async(&self, kind: Kind, key: ResourceKey) -> Result<()> {
        self.blocking(move |s| s.delete(kind, &key)).await
    }

    pub async fn delete_by_query_async(&self, query: Query) -> Result<()> {
        self.blocking(move |s| s.delete_by_query(&query)).await
    }

    pub async fn health_check_async(&self) -> bool {
        settle_health(self.blocking(|s| Ok(s.health_check())).await)
    }

    pub async fn latest_update_time_async(&self, kinds: Vec<Kind>) -> Result<DateTime<Utc>> {
        self.blocking(move |s| s.latest_update_time(&kinds)).await
    }
}

/// A health check whose task died counts as unhealthy.
fn settle_health(outcome: Result<bool>) -> bool {
    match outcome {
        Ok(healthy) => healthy,
        Err(err) => {
            tracing::error!(error = %err, "health check task failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_model::{Dashboard, ProjectMetadata, Resource};
    use serde_json::json;

    fn open(dir: &tempfile::TempDir) -> Store {
        let store = Store::open(StoreOptions::new(dir.path().join("unit.sqlite"))).unwrap();
        store.init().unwrap();
        store
    }

    #[test]
    fn rejects_schema_that_is_not_an_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let err = Store::open(StoreOptions::new(dir.path().join("x.sqlite")).schema("a.b"))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[test]
    fn init_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        store.init().unwrap();
    }

    #[test]
    fn create_returns_the_normalized_entity() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        let dash: Dashboard = Resource::new(
            Kind::Dashboard,
            ProjectMetadata::new("Ops", "CPU"),
            json!({}),
        );
        let stored = store.create(dash).unwrap();
        assert_eq!(stored.metadata.project, "ops");
        assert_eq!(stored.metadata.metadata.name, "cpu");
    }

    #[test]
    fn shape_mismatch_fails_before_touching_storage() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        let err = store
            .get::<Dashboard>(Kind::Dashboard, &ResourceKey::global("d"))
            .unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedMetadataShape { .. }));
    }

    #[test]
    fn attached_schema_runs_in_wal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            Store::open(StoreOptions::new(dir.path().join("tenant.sqlite")).schema("tenant"))
                .unwrap();
        let conn = store.conn().unwrap();
        let mode: String = conn
            .query_row("PRAGMA \"tenant\".journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
        let main_file: String = conn
            .query_row("PRAGMA database_list", [], |row| row.get(2))
            .unwrap();
        assert!(main_file.is_empty(), "main should stay in memory, got {main_file}");
    }

    #[test]
    fn each_operation_gets_its_own_connection() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        let first = store.conn().unwrap();
        let second = store.conn().unwrap();
        first.execute_batch("BEGIN IMMEDIATE").unwrap();
        let visible: i64 = second
            .query_row("SELECT COUNT(*) FROM \"main\".\"dashboard\"", [], |row| row.get(0))
            .unwrap();
        assert_eq!(visible, 0);
        first.execute_batch("ROLLBACK").unwrap();
    }

    #[test]
    fn closed_store_refuses_new_connections() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        let clone = store.clone();
        store.close().unwrap();
        store.close().unwrap();
        assert!(clone.is_closed());
        assert!(matches!(clone.conn(), Err(StoreError::Closed)));
        assert!(!clone.health_check());
    }

    #[tokio::test]
    async fn async_health_check_reports_closed_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        assert!(store.health_check_async().await);
        store.close().unwrap();
        assert!(!store.health_check_async().await);
    }

    #[tokio::test]
    async fn failed_health_task_is_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        let outcome = store
            .blocking(|_| -> Result<bool> { panic!("worker died") })
            .await;
        assert!(matches!(outcome, Err(StoreError::Task(_))));
        assert!(!settle_health(outcome));
        assert!(settle_health(Ok(true)));
    }

    #[test]
    fn primary_key_violation_detection() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id TEXT PRIMARY KEY)").unwrap();
        conn.execute("INSERT INTO t VALUES ('a')", []).unwrap();
        let err = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err();
        assert!(is_primary_key_violation(&err));
    }
}
