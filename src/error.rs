//! Failure taxonomy for an ingestion run.
//!
//! Each category maps to one continue-or-abort decision:
//!
//! - [`InputError`]: the file cannot be ingested at all; nothing is sent to the store.
//! - [`ParseError`]: the dataset (or archive member) is skipped; siblings continue.
//! - [`SchemaError`]: table or geometry column creation was rejected; the dataset stops.
//! - [`RowError`]: one feature could not be inserted; the stream continues.
//! - [`PostProcessingError`]: rename, index or analyze failed; rows are unaffected.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that end the ingestion of one dataset.
///
/// Row and post-processing failures never surface here; the planner reports and
/// counts them instead.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl IngestError {
    /// Short category label used in diagnostics.
    pub fn category(&self) -> &'static str {
        match self {
            IngestError::Input(_) => "input",
            IngestError::Parse(_) => "parse",
            IngestError::Schema(_) => "schema",
        }
    }
}

#[derive(Debug, Error)]
pub enum InputError {
    #[error("Input file {path:?} does not exist")]
    Missing { path: PathBuf },

    #[error("Input file {path:?} is empty ({size} bytes)")]
    Empty { path: PathBuf, size: u64 },

    #[error("Unsupported file format '{extension}'")]
    Unsupported { extension: String },

    #[error("'{raw}' does not yield a usable table name")]
    InvalidTableName { raw: String },

    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Unable to decode text as {tried}")]
    Encoding { tried: String },

    #[error("Malformed delimited text at line {line}: {message}")]
    Delimited { line: u64, message: String },

    #[error("Malformed JSON: {message}")]
    Json { message: String },

    #[error("Malformed GeoJSON: {message}")]
    GeoJson { message: String },

    #[error("Malformed markup: {message}")]
    Markup { message: String },

    #[error("Malformed archive: {message}")]
    Archive { message: String },

    #[error("No geographic information found in columns [{columns}]")]
    NoGeographicFields { columns: String },

    #[error("External tool `{tool}` failed: {message}")]
    Converter { tool: String, message: String },
}

/// Error reported by the persistence collaborator for a single statement.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StatementError {
    pub message: String,
}

impl StatementError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
#[error("Failed to create schema for table '{table}': {source} (statement: {statement})")]
pub struct SchemaError {
    pub table: String,
    pub statement: String,
    #[source]
    pub source: StatementError,
}

#[derive(Debug, Error)]
pub enum RowError {
    #[error("Ordinate '{value}' is not numeric")]
    InvalidOrdinate { value: String },

    #[error("Insert rejected: {source} (statement: {statement})")]
    Rejected {
        statement: String,
        #[source]
        source: StatementError,
    },
}

#[derive(Debug, Error)]
#[error("{operation} failed on table '{table}': {source} (statement: {statement})")]
pub struct PostProcessingError {
    pub operation: &'static str,
    pub table: String,
    pub statement: String,
    #[source]
    pub source: StatementError,
}
