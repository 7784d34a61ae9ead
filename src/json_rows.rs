//! Loader for plain JSON documents holding an array of flat objects with
//! latitude/longitude members.

use std::path::Path;

use serde_json::Value as JsonValue;

use crate::{
    data::Properties,
    error::{IngestError, ParseError},
    feature::{self, FeatureStream},
    geo_fields, io_utils,
};

pub fn load_json_rows<'a>(path: &Path) -> Result<FeatureStream<'a>, IngestError> {
    let bytes = io_utils::read_source(path)?;
    Ok(json_rows_from_bytes(&bytes)?)
}

pub fn json_rows_from_bytes<'a>(bytes: &[u8]) -> Result<FeatureStream<'a>, ParseError> {
    let document: JsonValue = serde_json::from_slice(bytes).map_err(|err| ParseError::Json {
        message: err.to_string(),
    })?;
    let JsonValue::Array(rows) = document else {
        return Err(ParseError::Json {
            message: "expected a top-level array of objects".to_string(),
        });
    };
    let Some(first) = rows.first() else {
        return Ok(Box::new(std::iter::empty()));
    };
    let first = as_object(first, 0)?;
    let fields = geo_fields::require_geo_fields(first.keys().map(String::as_str))?;

    let records = rows
        .into_iter()
        .enumerate()
        .map(|(idx, row)| as_object(&row, idx).map(Properties::from_json_object));
    Ok(feature::point_features(fields, records))
}

fn as_object(row: &JsonValue, idx: usize) -> Result<&serde_json::Map<String, JsonValue>, ParseError> {
    row.as_object().ok_or_else(|| ParseError::Json {
        message: format!("element {idx} is not an object"),
    })
}
