use std::path::Path;

use geojson::GeoJson;
use log::warn;

use crate::{
    data::Properties,
    error::{IngestError, ParseError},
    feature::{self, CanonicalFeature, FeatureStream},
    geometry::Geometry,
    io_utils,
};

pub fn load_geojson<'a>(path: &Path) -> Result<FeatureStream<'a>, IngestError> {
    let bytes = io_utils::read_source(path)?;
    Ok(geojson_from_bytes(&bytes)?)
}

/// Parses a GeoJSON document into canonical features.
///
/// Features without a geometry, or whose geometry cannot be converted, are
/// dropped with a warning.
pub fn geojson_from_bytes<'a>(bytes: &[u8]) -> Result<FeatureStream<'a>, ParseError> {
    let text = io_utils::decode_with_fallback(bytes)?;
    let document = text.parse::<GeoJson>().map_err(|err| ParseError::GeoJson {
        message: err.to_string(),
    })?;
    let features = match document {
        GeoJson::FeatureCollection(collection) => collection.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(geometry) => vec![geojson::Feature {
            bbox: None,
            geometry: Some(geometry),
            id: None,
            properties: None,
            foreign_members: None,
        }],
    };
    Ok(Box::new(
        features
            .into_iter()
            .enumerate()
            .flat_map(|(idx, feature)| convert_feature(idx, feature))
            .map(Ok),
    ))
}

fn convert_feature(idx: usize, feature: geojson::Feature) -> Vec<CanonicalFeature> {
    let Some(geometry) = feature.geometry.as_ref() else {
        warn!("Dropping feature {idx}: no geometry");
        return Vec::new();
    };
    let geometry = match Geometry::try_from(geometry) {
        Ok(geometry) => geometry,
        Err(err) => {
            warn!("Dropping feature {idx}: {err}");
            return Vec::new();
        }
    };
    let properties = feature
        .properties
        .as_ref()
        .map(Properties::from_json_object)
        .unwrap_or_default();
    feature::build(properties, geometry)
}
