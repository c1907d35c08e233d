//! Table descriptors shared by the extractor, transformer and loader.
//!
//! Every entity the pipeline knows about is described by data here rather than by
//! its own load routine, the loader is generic over a [`TableSchema`].

mod entities;

use std::{collections::HashSet, fmt};

pub use entities::{CleanRule, ColumnRules, EntityDefinition, EntityKind, ParseEntityKindError};

/// Provenance column stamped onto every row of a load.
pub const LOAD_TS_COLUMN: &str = "LOAD_TS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Varchar(Option<u32>),
    Numeric { precision: u32, scale: u32 },
    Date,
    Timestamp,
}

impl ColumnType {
    pub fn money() -> Self {
        ColumnType::Numeric { precision: 12, scale: 2 }
    }

    pub fn to_sql_type(&self) -> String {
        match self {
            ColumnType::Varchar(Some(length)) => format!("VARCHAR({})", length),
            ColumnType::Varchar(None) => "VARCHAR".to_string(),
            ColumnType::Numeric { precision, scale } => format!("NUMERIC({},{})", precision, scale),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_sql_type())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl ColumnDefinition {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self { name: name.to_string(), column_type, nullable: true }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SchemaBuildError {
    #[error("Table {0} must declare at least one column")]
    NoColumns(String),

    #[error("Column {1} is declared more than once on table {0}")]
    DuplicateColumn(String, String),

    #[error("Merge key {1} is not a declared column of table {0}")]
    MergeKeyNotDeclared(String, String),

    #[error("Table {0} has no merge key")]
    MissingMergeKey(String),

    #[error("Column name {0} is reserved for the load timestamp")]
    ReservedColumn(String),
}

/// Ordered column list plus the natural key used to match incoming rows to target rows.
///
/// The `LOAD_TS` column is not part of `columns`, it is appended by [`TableSchema::all_columns`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    table: String,
    columns: Vec<ColumnDefinition>,
    merge_key: String,
}

impl TableSchema {
    pub fn builder(table: &str) -> TableSchemaBuilder {
        TableSchemaBuilder { table: table.to_string(), columns: Vec::new(), merge_key: None }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn merge_key(&self) -> &str {
        &self.merge_key
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Declared columns followed by the load timestamp.
    pub fn all_columns(&self) -> Vec<ColumnDefinition> {
        let mut columns = self.columns.clone();
        columns.push(ColumnDefinition {
            name: LOAD_TS_COLUMN.to_string(),
            column_type: ColumnType::Timestamp,
            nullable: false,
        });
        columns
    }

    /// Same schema pointed at another table, used when a manifest overrides the target name.
    pub fn with_table(&self, table: &str) -> Self {
        Self { table: table.to_string(), ..self.clone() }
    }
}

pub struct TableSchemaBuilder {
    table: String,
    columns: Vec<ColumnDefinition>,
    merge_key: Option<String>,
}

impl TableSchemaBuilder {
    pub fn column(mut self, name: &str, column_type: ColumnType) -> Self {
        self.columns.push(ColumnDefinition::new(name, column_type));
        self
    }

    pub fn merge_key(mut self, name: &str) -> Self {
        self.merge_key = Some(name.to_string());
        self
    }

    pub fn build(self) -> Result<TableSchema, SchemaBuildError> {
        if self.columns.is_empty() {
            return Err(SchemaBuildError::NoColumns(self.table));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.eq_ignore_ascii_case(LOAD_TS_COLUMN) {
                return Err(SchemaBuildError::ReservedColumn(column.name.clone()));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaBuildError::DuplicateColumn(self.table, column.name.clone()));
            }
        }

        let merge_key = self.merge_key.ok_or_else(|| SchemaBuildError::MissingMergeKey(self.table.clone()))?;
        if !seen.contains(merge_key.as_str()) {
            return Err(SchemaBuildError::MergeKeyNotDeclared(self.table, merge_key));
        }

        let columns = self
            .columns
            .into_iter()
            .map(|mut column| {
                if column.name == merge_key {
                    column.nullable = false;
                }
                column
            })
            .collect();

        Ok(TableSchema { table: self.table, columns, merge_key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_marks_merge_key_not_null() {
        let schema = TableSchema::builder("raw_things")
            .column("THING_ID", ColumnType::Varchar(Some(10)))
            .column("AMOUNT", ColumnType::money())
            .merge_key("THING_ID")
            .build()
            .unwrap();

        assert_eq!(schema.merge_key(), "THING_ID");
        assert!(!schema.column("THING_ID").unwrap().nullable);
        assert!(schema.column("AMOUNT").unwrap().nullable);
    }

    #[test]
    fn test_all_columns_appends_load_ts() {
        let schema = TableSchema::builder("raw_things")
            .column("THING_ID", ColumnType::Varchar(None))
            .merge_key("THING_ID")
            .build()
            .unwrap();

        let names: Vec<String> = schema.all_columns().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["THING_ID".to_string(), LOAD_TS_COLUMN.to_string()]);
    }

    #[test]
    fn test_builder_rejects_unknown_merge_key() {
        let err = TableSchema::builder("raw_things")
            .column("THING_ID", ColumnType::Varchar(None))
            .merge_key("OTHER_ID")
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            SchemaBuildError::MergeKeyNotDeclared("raw_things".to_string(), "OTHER_ID".to_string())
        );
    }

    #[test]
    fn test_builder_rejects_duplicates_and_reserved_names() {
        let duplicate = TableSchema::builder("t")
            .column("A", ColumnType::Date)
            .column("A", ColumnType::Date)
            .merge_key("A")
            .build();
        assert!(matches!(duplicate, Err(SchemaBuildError::DuplicateColumn(_, _))));

        let reserved = TableSchema::builder("t")
            .column("A", ColumnType::Date)
            .column("load_ts", ColumnType::Timestamp)
            .merge_key("A")
            .build();
        assert!(matches!(reserved, Err(SchemaBuildError::ReservedColumn(_))));
    }

    #[test]
    fn test_column_type_sql() {
        assert_eq!(ColumnType::Varchar(Some(25)).to_sql_type(), "VARCHAR(25)");
        assert_eq!(ColumnType::money().to_sql_type(), "NUMERIC(12,2)");
        assert_eq!(ColumnType::Timestamp.to_string(), "TIMESTAMP");
    }
}
