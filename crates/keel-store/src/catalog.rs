//! Static kind to table mapping and the DDL for both table shapes.

use keel_model::{Kind, MetadataShape};

pub const COL_ID: &str = "id";
pub const COL_NAME: &str = "name";
pub const COL_PROJECT: &str = "project";
pub const COL_DOC: &str = "doc";

/// Schema name that opens the database file directly instead of attaching it.
pub const MAIN_SCHEMA: &str = "main";

/// Bookkeeping table stamped by triggers on every row change.
pub const UPDATES_TABLE: &str = "_keel_table_updates";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Table {
    pub name: &'static str,
    pub shape: MetadataShape,
}

impl Table {
    const fn global(name: &'static str) -> Self {
        Self {
            name,
            shape: MetadataShape::Simple,
        }
    }

    const fn project(name: &'static str) -> Self {
        Self {
            name,
            shape: MetadataShape::Scoped,
        }
    }

    pub fn is_project_scoped(&self) -> bool {
        self.shape == MetadataShape::Scoped
    }
}

pub fn table_for(kind: Kind) -> Table {
    match kind {
        Kind::Dashboard => Table::project("dashboard"),
        Kind::Datasource => Table::project("datasource"),
        Kind::EphemeralDashboard => Table::project("ephemeraldashboard"),
        Kind::Folder => Table::project("folder"),
        Kind::GlobalDatasource => Table::global("globaldatasource"),
        Kind::GlobalRole => Table::global("globalrole"),
        Kind::GlobalRoleBinding => Table::global("globalrolebinding"),
        Kind::GlobalSecret => Table::global("globalsecret"),
        Kind::GlobalVariable => Table::global("globalvariable"),
        Kind::Project => Table::global("project"),
        Kind::Role => Table::project("role"),
        Kind::RoleBinding => Table::project("rolebinding"),
        Kind::Secret => Table::project("secret"),
        Kind::User => Table::global("user"),
        Kind::Variable => Table::project("variable"),
    }
}

/// Kinds whose identity includes a project.
pub fn project_scoped_kinds() -> impl Iterator<Item = Kind> {
    Kind::ALL
        .into_iter()
        .filter(|kind| table_for(*kind).is_project_scoped())
}

/// Schema names are spliced into SQL text, so only plain identifiers are accepted.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 64 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `"schema"."table"`; every FROM/INTO/UPDATE clause goes through this.
pub fn qualified(schema: &str, table: &str) -> String {
    format!("\"{schema}\".\"{table}\"")
}

pub fn create_table_sql(schema: &str, table: Table) -> String {
    let full = qualified(schema, table.name);
    match table.shape {
        MetadataShape::Simple => format!(
            "CREATE TABLE IF NOT EXISTS {full} (\
             {COL_ID} VARCHAR(128) NOT NULL PRIMARY KEY, \
             {COL_NAME} VARCHAR(128) NOT NULL, \
             {COL_DOC} JSON NOT NULL)"
        ),
        MetadataShape::Scoped => format!(
            "CREATE TABLE IF NOT EXISTS {full} (\
             {COL_ID} VARCHAR(256) NOT NULL PRIMARY KEY, \
             {COL_NAME} VARCHAR(128) NOT NULL, \
             {COL_PROJECT} VARCHAR(128) NOT NULL, \
             {COL_DOC} JSON NOT NULL)"
        ),
    }
}

pub fn create_updates_table_sql(schema: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         table_name VARCHAR(128) NOT NULL PRIMARY KEY, \
         updated_at TEXT NOT NULL)",
        qualified(schema, UPDATES_TABLE)
    )
}

/// One trigger per write event. Trigger bodies cannot use qualified names;
/// they resolve inside the trigger's own schema.
pub fn touch_triggers_sql(schema: &str, table: Table) -> String {
    ["INSERT", "UPDATE", "DELETE"]
        .iter()
        .map(|event| {
            let trigger = format!("{}_touch_{}", table.name, event.to_ascii_lowercase());
            format!(
                "CREATE TRIGGER IF NOT EXISTS {} AFTER {event} ON \"{}\" BEGIN \
                 INSERT OR REPLACE INTO \"{UPDATES_TABLE}\"(table_name, updated_at) \
                 VALUES ('{}', strftime('%Y-%m-%dT%H:%M:%fZ', 'now')); \
                 END;",
                qualified(schema, &trigger),
                table.name,
                table.name,
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
