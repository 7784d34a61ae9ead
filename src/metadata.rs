//! Column typing for destination tables.
//!
//! Types are decided from the first feature of a dataset only. A column whose
//! first value looks numeric keeps that type for the rest of the run, even if
//! later values do not fit; those values are written as `NULL`.

use serde::Serialize;

use crate::{
    data::{Properties, Scalar},
    naming::IdentifierSet,
};

/// Catalog codes that look numeric but must keep leading zeros.
pub const TEXT_COLUMNS: &[&str] = &["cve_ent", "cve_mun", "cve_loc", "cvegeo"];

/// Properties that never become columns.
pub const SKIP_COLUMNS: &[&str] = &["styleUrl", "#styleUrl"];

pub const PRIMARY_KEY_COLUMN: &str = "gid";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    pub fn sql_name(self) -> &'static str {
        match self {
            ColumnType::Integer => "bigint",
            ColumnType::Real => "real",
            ColumnType::Text => "text",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ColumnSpec {
    /// Normalized identifier used in the destination table.
    pub name: String,
    /// Raw property key the values are read from.
    pub source: String,
    pub data_type: ColumnType,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    /// Derives the column list from the properties of the first feature.
    ///
    /// `reserved` names (surrogate key, geometry columns) are never handed out
    /// to properties.
    pub fn infer(properties: &Properties, reserved: &[&str]) -> Self {
        let mut names = IdentifierSet::with_reserved(reserved.iter().copied());
        let columns = properties
            .iter()
            .filter(|(key, _)| !SKIP_COLUMNS.contains(key))
            .enumerate()
            .map(|(position, (key, value))| {
                let name = names.claim(key, position);
                let data_type = if is_text_column(&name) {
                    ColumnType::Text
                } else {
                    infer_type(value)
                };
                ColumnSpec {
                    name,
                    source: key.to_string(),
                    data_type,
                }
            })
            .collect();
        TableSchema { columns }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

fn is_text_column(name: &str) -> bool {
    TEXT_COLUMNS.contains(&name)
}

/// Classifies a value by attempting an integer parse, then a real parse.
pub fn infer_type(value: &Scalar) -> ColumnType {
    match value {
        Scalar::Integer(_) => ColumnType::Integer,
        Scalar::Real(f) if f.is_finite() => ColumnType::Real,
        Scalar::Text(text) => {
            let trimmed = text.trim();
            if trimmed.parse::<i64>().is_ok() {
                ColumnType::Integer
            } else if trimmed.parse::<f64>().is_ok_and(f64::is_finite) {
                ColumnType::Real
            } else {
                ColumnType::Text
            }
        }
        _ => ColumnType::Text,
    }
}
