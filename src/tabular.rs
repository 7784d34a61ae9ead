//! Delimited-text loader.
//!
//! The whole file is decoded up front (UTF-8, then Latin-1) so an undecodable
//! file fails before any record is produced. Records are then read lazily in a
//! single pass. Every cell stays text; typing happens in the planner.

use std::{io::Cursor, path::Path};

use log::warn;

use crate::{
    data::{Properties, Scalar},
    error::{IngestError, ParseError},
    feature::{self, FeatureStream},
    geo_fields, io_utils,
};

pub struct TabularRecords {
    headers: Vec<String>,
    records: csv::StringRecordsIntoIter<Cursor<String>>,
    skipped: usize,
}

/// Opens a delimited file and captures its header line verbatim.
pub fn load_tabular(path: &Path, delimiter: u8) -> Result<TabularRecords, IngestError> {
    let bytes = io_utils::read_source(path)?;
    Ok(TabularRecords::from_bytes(&bytes, delimiter)?)
}

impl TabularRecords {
    pub fn from_bytes(bytes: &[u8], delimiter: u8) -> Result<Self, ParseError> {
        let text = io_utils::decode_with_fallback(bytes)?;
        let mut reader = io_utils::open_csv_reader(Cursor::new(text), delimiter);
        let headers = reader
            .headers()
            .map_err(delimited_error)?
            .iter()
            .map(str::to_string)
            .collect();
        Ok(Self {
            headers,
            records: reader.into_records(),
            skipped: 0,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Rows dropped so far because they carried more cells than the header.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Detects the coordinate columns once and converts every row into a point feature.
    pub fn into_features<'a>(self) -> Result<FeatureStream<'a>, ParseError> {
        let fields = geo_fields::require_geo_fields(self.headers.iter().map(String::as_str))?;
        Ok(feature::point_features(fields, self))
    }
}

impl Iterator for TabularRecords {
    type Item = Result<Properties, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = match self.records.next()? {
                Ok(record) => record,
                Err(err) => return Some(Err(delimited_error(err))),
            };
            if record.len() > self.headers.len() {
                let line = record.position().map(|p| p.line()).unwrap_or_default();
                warn!(
                    "Skipping line {line}: {} fields, expected {}",
                    record.len(),
                    self.headers.len()
                );
                self.skipped += 1;
                continue;
            }
            let properties = self
                .headers
                .iter()
                .enumerate()
                .map(|(idx, header)| {
                    let value = record.get(idx).unwrap_or_default();
                    (header.clone(), Scalar::Text(value.to_string()))
                })
                .collect();
            return Some(Ok(properties));
        }
    }
}

fn delimited_error(err: csv::Error) -> ParseError {
    ParseError::Delimited {
        line: err.position().map(|p| p.line()).unwrap_or_default(),
        message: err.to_string(),
    }
}
