//! SQL text for the staged upsert protocol.
//!
//! Every identifier is quoted as the target columns are upper case.

use crate::schema::{ColumnDefinition, TableSchema, LOAD_TS_COLUMN};

/// Wraps an identifier in double quotes, doubling any embedded quote.
#[inline]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn format_table_name(schema_name: &str, table_name: &str) -> String {
    format!("{}.{}", quote_identifier(schema_name), quote_identifier(table_name))
}

/// Temporary tables live in the session's own `pg_temp` schema.
pub fn format_staging_table_name(staging_table: &str) -> String {
    format!("pg_temp.{}", quote_identifier(staging_table))
}

pub fn generate_column_names_sql(column_names: &[&str]) -> String {
    column_names.iter().map(|name| quote_identifier(name)).collect::<Vec<_>>().join(", ")
}

fn generate_column_definition_sql(column: &ColumnDefinition, merge_key: &str) -> String {
    let mut definition = format!("{} {}", quote_identifier(&column.name), column.column_type);
    if column.name == merge_key {
        definition.push_str(" NOT NULL PRIMARY KEY");
    } else if column.name == LOAD_TS_COLUMN {
        definition.push_str(" NOT NULL DEFAULT CURRENT_TIMESTAMP");
    } else if !column.nullable {
        definition.push_str(" NOT NULL");
    }
    definition
}

pub fn create_target_table_sql(schema_name: &str, schema: &TableSchema) -> String {
    let columns = schema
        .all_columns()
        .iter()
        .map(|column| generate_column_definition_sql(column, schema.merge_key()))
        .collect::<Vec<_>>()
        .join(",\n    ");

    let create_table = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
        format_table_name(schema_name, schema.table()),
        columns
    );

    if schema_name == "public" {
        create_table
    } else {
        format!("CREATE SCHEMA IF NOT EXISTS {};\n{}", quote_identifier(schema_name), create_table)
    }
}

pub fn drop_staging_table_sql(staging_table: &str) -> String {
    format!("DROP TABLE IF EXISTS {};", format_staging_table_name(staging_table))
}

/// Drops any leftover staging table from an aborted run before recreating it empty.
pub fn create_staging_table_sql(
    schema_name: &str,
    schema: &TableSchema,
    staging_table: &str,
) -> String {
    format!(
        "{}\nCREATE TEMP TABLE {} (LIKE {} INCLUDING DEFAULTS);",
        drop_staging_table_sql(staging_table),
        quote_identifier(staging_table),
        format_table_name(schema_name, schema.table())
    )
}

pub fn copy_into_sql(formatted_table_name: &str, column_names: &[&str]) -> String {
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT binary)",
        formatted_table_name,
        generate_column_names_sql(column_names)
    )
}

/// One statement that upserts the whole staging table and reports how many rows were inserted
/// versus updated, `xmax` is zero only for freshly inserted tuples.
pub fn merge_staging_sql(
    schema_name: &str,
    schema: &TableSchema,
    staging_table: &str,
    columns: &[ColumnDefinition],
) -> String {
    let merge_key = schema.merge_key();
    let column_names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    let formatted_columns = generate_column_names_sql(&column_names);

    let update_clauses = column_names
        .iter()
        .filter(|name| **name != merge_key)
        .map(|name| format!("{} = EXCLUDED.{}", quote_identifier(name), quote_identifier(name)))
        .collect::<Vec<_>>();

    let conflict_action = if update_clauses.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", update_clauses.join(", "))
    };

    format!(
        "WITH merged AS (
    INSERT INTO {} ({})
    SELECT {}
    FROM {}
    ON CONFLICT ({}) {}
    RETURNING (xmax = 0) AS inserted
)
SELECT
    COUNT(*) FILTER (WHERE inserted) AS inserted,
    COUNT(*) FILTER (WHERE NOT inserted) AS updated
FROM merged",
        format_table_name(schema_name, schema.table()),
        formatted_columns,
        formatted_columns,
        format_staging_table_name(staging_table),
        quote_identifier(merge_key),
        conflict_action
    )
}
