use serde::Serialize;

use crate::{data::Properties, error::ParseError, geo_fields::GeoFields, geometry::Geometry};

/// One row-to-be: a non-collection geometry plus raw-keyed properties.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalFeature {
    pub geometry: Geometry,
    pub properties: Properties,
}

/// Boxed single-pass stream of features handed to the load planner.
pub type FeatureStream<'a> = Box<dyn Iterator<Item = Result<CanonicalFeature, ParseError>> + 'a>;

/// Assembles canonical features from a record and its geometry.
///
/// A geometry collection with N members produces N features, every one of them
/// carrying a copy of the same properties. One source record therefore becomes
/// N destination rows that share attribute values.
pub fn build(properties: Properties, geometry: Geometry) -> Vec<CanonicalFeature> {
    match geometry {
        Geometry::GeometryCollection(_) => geometry
            .flatten()
            .into_iter()
            .map(|child| CanonicalFeature {
                geometry: child,
                properties: properties.clone(),
            })
            .collect(),
        single => vec![CanonicalFeature {
            geometry: single,
            properties,
        }],
    }
}

/// Turns tabular records into point features using the detected coordinate fields.
///
/// Each record loses its two coordinate fields; the remaining ones become the
/// feature properties.
pub fn point_features<'a, I>(fields: GeoFields, records: I) -> FeatureStream<'a>
where
    I: Iterator<Item = Result<Properties, ParseError>> + 'a,
{
    Box::new(records.map(move |record| {
        let mut properties = record?;
        let geometry = fields.take_point(&mut properties);
        Ok(CanonicalFeature {
            geometry,
            properties,
        })
    }))
}
