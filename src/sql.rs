//! SQL text for the statements the load planner issues.
//!
//! Identifiers are always double-quoted so normalized names that collide with
//! keywords (`order`, `group`, `desc`) stay valid.

use itertools::Itertools;

use crate::{
    data::{Properties, Scalar},
    metadata::{ColumnSpec, ColumnType, PRIMARY_KEY_COLUMN, TableSchema},
};

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quoted string literal. NUL bytes are dropped; PostgreSQL text cannot hold them.
pub fn literal(value: &str) -> String {
    let escaped: String = value
        .chars()
        .filter(|c| *c != '\0')
        .map(|c| if c == '\'' { "''".to_string() } else { c.to_string() })
        .collect();
    format!("'{escaped}'")
}

pub fn drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}

pub fn create_table(table: &str, schema: &TableSchema) -> String {
    let columns = std::iter::once(format!(
        "{} serial PRIMARY KEY",
        quote_ident(PRIMARY_KEY_COLUMN)
    ))
    .chain(
        schema
            .columns
            .iter()
            .map(|column| format!("{} {}", quote_ident(&column.name), column.data_type.sql_name())),
    )
    .join(", ");
    format!("CREATE TABLE {} ({columns})", quote_ident(table))
}

pub fn add_geometry_column(table: &str, column: &str, srid: u32, postgis_type: &str) -> String {
    format!(
        "SELECT AddGeometryColumn({}, {}, {srid}, {}, 2)",
        literal(table),
        literal(column),
        literal(postgis_type)
    )
}

/// Insert for one feature: every schema column plus the geometry column.
///
/// `geometry_sql` is the already rendered constructor expression.
pub fn insert(
    table: &str,
    schema: &TableSchema,
    properties: &Properties,
    geometry_column: &str,
    geometry_sql: &str,
) -> String {
    let names = schema
        .columns
        .iter()
        .map(|column| quote_ident(&column.name))
        .chain(std::iter::once(quote_ident(geometry_column)))
        .join(", ");
    let values = schema
        .columns
        .iter()
        .map(|column| render_value(column, properties.get(&column.source)))
        .chain(std::iter::once(geometry_sql.to_string()))
        .join(", ");
    format!("INSERT INTO {} ({names}) VALUES ({values})", quote_ident(table))
}

pub fn rename_column(table: &str, from: &str, to: &str) -> String {
    format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        quote_ident(table),
        quote_ident(from),
        quote_ident(to)
    )
}

pub fn create_spatial_index(table: &str, column: &str) -> String {
    format!(
        "CREATE INDEX {} ON {} USING GIST ({})",
        quote_ident(&format!("{table}_{column}_gix")),
        quote_ident(table),
        quote_ident(column)
    )
}

pub fn analyze(table: &str) -> String {
    format!("ANALYZE {}", quote_ident(table))
}

/// Renders a property value for its column; absent or unconvertible values become `NULL`.
pub fn render_value(column: &ColumnSpec, value: Option<&Scalar>) -> String {
    let Some(value) = value else {
        return "NULL".to_string();
    };
    let rendered = match column.data_type {
        ColumnType::Integer => integer_value(value).map(|i| i.to_string()),
        ColumnType::Real => real_value(value).map(|f| f.to_string()),
        ColumnType::Text => match value {
            Scalar::Null => None,
            other => Some(literal(&other.as_display())),
        },
    };
    rendered.unwrap_or_else(|| "NULL".to_string())
}

fn integer_value(value: &Scalar) -> Option<i64> {
    match value {
        Scalar::Integer(i) => Some(*i),
        Scalar::Real(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            Some(*f as i64)
        }
        Scalar::Text(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn real_value(value: &Scalar) -> Option<f64> {
    match value {
        Scalar::Integer(i) => Some(*i as f64),
        Scalar::Real(f) => Some(*f),
        Scalar::Text(text) => text.trim().parse().ok(),
        _ => None,
    }
    .filter(|f: &f64| f.is_finite())
}
