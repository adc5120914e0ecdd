//! Kind-agnostic filters and their translation into parameterised SQL.
//!
//! Only catalog constants and the validated schema name ever reach the SQL
//! text. Names, projects and prefixes are always bound parameters.

use crate::catalog::{qualified, table_for, Table, COL_DOC, COL_ID, COL_NAME, COL_PROJECT, UPDATES_TABLE};
use crate::error::{Result, StoreError};
use keel_model::{Kind, MetadataShape, ResourceKey};
use rusqlite::types::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

/// Filter applied to the table backing one kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    kind: Kind,
    pub project: Option<String>,
    pub name_prefix: Option<String>,
    pub metadata_only: bool,
    pub pagination: Option<Pagination>,
}

impl Query {
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            project: None,
            name_prefix: None,
            metadata_only: false,
            pagination: None,
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    pub fn metadata_only(mut self) -> Self {
        self.metadata_only = true;
        self
    }

    pub fn paginate(mut self, offset: u64, limit: u64) -> Self {
        self.pagination = Some(Pagination { offset, limit });
        self
    }

    /// Fills the project scope when the query carries none. This is the only
    /// place a query changes after construction; it returns a new value.
    pub fn with_default_project(mut self, project: Option<&str>) -> Self {
        if self.project.as_deref().map_or(true, str::is_empty) {
            self.project = project.filter(|p| !p.is_empty()).map(str::to_string);
        }
        self
    }

    fn project_filter(&self) -> Option<&str> {
        self.project.as_deref().filter(|p| !p.is_empty())
    }

    fn prefix_filter(&self) -> Option<&str> {
        self.name_prefix.as_deref().filter(|p| !p.is_empty())
    }
}

/// SQL text plus the values bound to its `?` placeholders, in order.
#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Clone, Copy, Debug)]
pub struct QueryBuilder<'a> {
    schema: &'a str,
    case_sensitive: bool,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(schema: &'a str, case_sensitive: bool) -> Self {
        Self {
            schema,
            case_sensitive,
        }
    }

    /// `SELECT id, doc` for the query. Metadata-only queries use the same
    /// statement; stripping the body is left to the materializer.
    pub fn select(&self, query: &Query) -> Result<Statement> {
        let table = table_for(query.kind());
        let (mut sql, mut params) = self.filtered(
            format!(
                "SELECT {COL_ID}, {COL_DOC} FROM {}",
                qualified(self.schema, table.name)
            ),
            query,
            table,
        );
        if let Some(page) = query.pagination {
            if page.limit == 0 {
                return Err(StoreError::InvalidArgument(
                    "pagination limit must be greater than zero".into(),
                ));
            }
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(Value::Integer(to_sql_int(page.limit, "limit")?));
            params.push(Value::Integer(to_sql_int(page.offset, "offset")?));
        }
        Ok(Statement { sql, params })
    }

    pub fn delete(&self, query: &Query) -> Result<Statement> {
        if query.pagination.is_some() {
            return Err(StoreError::InvalidArgument(
                "pagination is not supported for delete queries".into(),
            ));
        }
        let table = table_for(query.kind());
        let (sql, params) = self.filtered(
            format!("DELETE FROM {}", qualified(self.schema, table.name)),
            query,
            table,
        );
        Ok(Statement { sql, params })
    }

    pub fn select_by_id(&self, table: Table, id: &str) -> Statement {
        Statement {
            sql: format!(
                "SELECT {COL_ID}, {COL_DOC} FROM {} WHERE {COL_ID} = ?",
                qualified(self.schema, table.name)
            ),
            params: vec![Value::Text(id.to_string())],
        }
    }

    pub fn delete_by_id(&self, table: Table, id: &str) -> Statement {
        Statement {
            sql: format!(
                "DELETE FROM {} WHERE {COL_ID} = ?",
                qualified(self.schema, table.name)
            ),
            params: vec![Value::Text(id.to_string())],
        }
    }

    pub fn insert(&self, table: Table, id: &str, key: &ResourceKey, doc: String) -> Statement {
        let full = qualified(self.schema, table.name);
        match (table.shape, key.project()) {
            (MetadataShape::Scoped, Some(project)) => Statement {
                sql: format!(
                    "INSERT INTO {full} ({COL_ID}, {COL_NAME}, {COL_PROJECT}, {COL_DOC}) VALUES (?, ?, ?, ?)"
                ),
                params: vec![
                    Value::Text(id.to_string()),
                    Value::Text(key.name().to_string()),
                    Value::Text(project.to_string()),
                    Value::Text(doc),
                ],
            },
            _ => Statement {
                sql: format!(
                    "INSERT INTO {full} ({COL_ID}, {COL_NAME}, {COL_DOC}) VALUES (?, ?, ?)"
                ),
                params: vec![
                    Value::Text(id.to_string()),
                    Value::Text(key.name().to_string()),
                    Value::Text(doc),
                ],
            },
        }
    }

    /// Replaces the whole document; the id never changes on its own.
    pub fn update(&self, table: Table, id: &str, key: &ResourceKey, doc: String) -> Statement {
        let full = qualified(self.schema, table.name);
        match (table.shape, key.project()) {
            (MetadataShape::Scoped, Some(project)) => Statement {
                sql: format!(
                    "UPDATE {full} SET {COL_NAME} = ?, {COL_PROJECT} = ?, {COL_DOC} = ? WHERE {COL_ID} = ?"
                ),
                params: vec![
                    Value::Text(key.name().to_string()),
                    Value::Text(project.to_string()),
                    Value::Text(doc),
                    Value::Text(id.to_string()),
                ],
            },
            _ => Statement {
                sql: format!("UPDATE {full} SET {COL_NAME} = ?, {COL_DOC} = ? WHERE {COL_ID} = ?"),
                params: vec![
                    Value::Text(key.name().to_string()),
                    Value::Text(doc),
                    Value::Text(id.to_string()),
                ],
            },
        }
    }

    /// Newest stamp among `tables` in the bookkeeping table.
    pub fn latest_update(&self, tables: &[Table]) -> Statement {
        let placeholders = vec!["?"; tables.len()].join(", ");
        Statement {
            sql: format!(
                "SELECT updated_at FROM {} WHERE table_name IN ({placeholders}) \
                 ORDER BY updated_at DESC LIMIT 1",
                qualified(self.schema, UPDATES_TABLE)
            ),
            params: tables
                .iter()
                .map(|t| Value::Text(t.name.to_string()))
                .collect(),
        }
    }

    fn filtered(&self, head: String, query: &Query, table: Table) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        if table.is_project_scoped() {
            if let Some(project) = query.project_filter() {
                clauses.push(format!("{COL_PROJECT} = ?"));
                params.push(Value::Text(self.normalize(project)));
            }
        }
        if let Some(prefix) = query.prefix_filter() {
            if self.case_sensitive {
                clauses.push(format!("{COL_NAME} GLOB ?"));
                params.push(Value::Text(format!("{}*", escape_glob(prefix))));
            } else {
                clauses.push(format!("{COL_NAME} LIKE ? ESCAPE '\\'"));
                params.push(Value::Text(format!(
                    "{}%",
                    escape_like(&prefix.to_lowercase())
                )));
            }
        }
        let mut sql = head;
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        (sql, params)
    }

    fn normalize(&self, value: &str) -> String {
        if self.case_sensitive {
            value.to_string()
        } else {
            value.to_lowercase()
        }
    }
}

fn to_sql_int(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| StoreError::InvalidArgument(format!("pagination {what} {value} is too large")))
}

/// Escapes `%`, `_` and the escape character itself for `LIKE ... ESCAPE '\'`.
pub(crate) fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// GLOB has no escape character; metacharacters are wrapped in a one-char class.
pub(crate) fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '*' | '?' | '[' => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[test]
    fn unfiltered_select_reads_whole_table() {
        let stmt = QueryBuilder::new("main", true)
            .select(&Query::new(Kind::Dashboard))
            .unwrap();
        assert_eq!(stmt.sql, "SELECT id, doc FROM \"main\".\"dashboard\"");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn project_and_prefix_are_bound() {
        let query = Query::new(Kind::Dashboard)
            .with_project("p1")
            .with_name_prefix("cpu");
        let stmt = QueryBuilder::new("main", true).select(&query).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT id, doc FROM \"main\".\"dashboard\" WHERE project = ? AND name GLOB ?"
        );
        assert_eq!(stmt.params, vec![text("p1"), text("cpu*")]);
    }

    #[test]
    fn insensitive_prefix_uses_like_and_lowercases() {
        let query = Query::new(Kind::Variable)
            .with_project("Team")
            .with_name_prefix("Disk_");
        let stmt = QueryBuilder::new("main", false).select(&query).unwrap();
        assert!(stmt.sql.ends_with("WHERE project = ? AND name LIKE ? ESCAPE '\\'"));
        assert_eq!(stmt.params, vec![text("team"), text("disk\\_%")]);
    }

    #[test]
    fn project_filter_is_ignored_for_global_tables() {
        let query = Query::new(Kind::GlobalRole).with_project("p1");
        let stmt = QueryBuilder::new("main", true).select(&query).unwrap();
        assert!(!stmt.sql.contains("WHERE"));
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn pagination_only_when_requested() {
        let query = Query::new(Kind::User).paginate(20, 10);
        let stmt = QueryBuilder::new("main", true).select(&query).unwrap();
        assert!(stmt.sql.ends_with("LIMIT ? OFFSET ?"));
        assert_eq!(stmt.params, vec![Value::Integer(10), Value::Integer(20)]);

        let err = QueryBuilder::new("main", true)
            .select(&Query::new(Kind::User).paginate(0, 0))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[test]
    fn hostile_input_never_reaches_sql_text() {
        let hostile = "x' OR '1'='1\"; DROP TABLE dashboard; --";
        let query = Query::new(Kind::Dashboard)
            .with_project(hostile)
            .with_name_prefix(hostile);
        for case_sensitive in [true, false] {
            let builder = QueryBuilder::new("main", case_sensitive);
            for stmt in [builder.select(&query).unwrap(), builder.delete(&query).unwrap()] {
                assert!(!stmt.sql.contains("DROP"), "{}", stmt.sql);
                assert!(!stmt.sql.contains("OR '1'"), "{}", stmt.sql);
                assert_eq!(stmt.params.len(), 2);
            }
        }
    }

    #[test]
    fn delete_rejects_pagination() {
        let builder = QueryBuilder::new("main", true);
        let stmt = builder
            .delete(&Query::new(Kind::Secret).with_project("p1"))
            .unwrap();
        assert_eq!(stmt.sql, "DELETE FROM \"main\".\"secret\" WHERE project = ?");
        assert!(builder
            .delete(&Query::new(Kind::Secret).paginate(0, 5))
            .is_err());
    }

    #[test]
    fn escaping() {
        assert_eq!(escape_like("50%_a\\b"), "50\\%\\_a\\\\b");
        assert_eq!(escape_glob("a*b?c[d]"), "a[*]b[?]c[[]d]");
    }

    #[test]
    fn default_project_only_fills_gaps() {
        let q = Query::new(Kind::Role).with_default_project(Some("p1"));
        assert_eq!(q.project.as_deref(), Some("p1"));
        let q = Query::new(Kind::Role)
            .with_project("p2")
            .with_default_project(Some("p1"));
        assert_eq!(q.project.as_deref(), Some("p2"));
        let q = Query::new(Kind::Role).with_default_project(Some(""));
        assert_eq!(q.project, None);
    }

    #[test]
    fn latest_update_binds_every_table() {
        let stmt = QueryBuilder::new("main", true)
            .latest_update(&[table_for(Kind::Dashboard), table_for(Kind::Role)]);
        assert!(stmt.sql.contains("IN (?, ?)"));
        assert_eq!(stmt.params, vec![text("dashboard"), text("role")]);
    }
}
