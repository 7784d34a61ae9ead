use std::sync::LazyLock;

use itertools::Itertools;
use regex::Regex;

use crate::{
    data::Properties,
    error::ParseError,
    geometry::{Coord, Geometry, Ordinate},
};

static LATITUDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("(?i)^(latitude|latitud|lat)").expect("latitude pattern"));
static LONGITUDE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("(?i)^(longitude|longitud|lon|lng|long)").expect("longitude pattern")
});

/// The pair of fields holding point coordinates in a tabular source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoFields {
    pub latitude: String,
    pub longitude: String,
}

/// Finds latitude and longitude fields among the column names.
///
/// Names are matched at their start, ignoring case; the first match per category
/// wins and a name taken as latitude is not considered for longitude.
pub fn detect_geo_fields<'a, I>(field_names: I) -> Option<GeoFields>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut latitude = None;
    let mut longitude = None;
    for name in field_names {
        if LATITUDE.is_match(name) {
            latitude.get_or_insert_with(|| name.to_string());
        } else if LONGITUDE.is_match(name) {
            longitude.get_or_insert_with(|| name.to_string());
        }
    }
    Some(GeoFields {
        latitude: latitude?,
        longitude: longitude?,
    })
}

/// Like [`detect_geo_fields`], but reports the column set when nothing was found.
pub fn require_geo_fields<'a, I>(field_names: I) -> Result<GeoFields, ParseError>
where
    I: IntoIterator<Item = &'a str> + Clone,
{
    detect_geo_fields(field_names.clone()).ok_or_else(|| ParseError::NoGeographicFields {
        columns: field_names.into_iter().join(", "),
    })
}

impl GeoFields {
    /// Removes both coordinate fields from the record and returns `Point(lon, lat)`.
    ///
    /// Values are not validated here; a non-numeric ordinate travels with the
    /// feature and is rejected when its insert is rendered.
    pub fn take_point(&self, properties: &mut Properties) -> Geometry {
        let longitude = properties
            .remove(&self.longitude)
            .map(|value| Ordinate::from_scalar(&value))
            .unwrap_or_else(|| Ordinate::Raw(String::new()));
        let latitude = properties
            .remove(&self.latitude)
            .map(|value| Ordinate::from_scalar(&value))
            .unwrap_or_else(|| Ordinate::Raw(String::new()));
        Geometry::Point(Coord {
            x: longitude,
            y: latitude,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Scalar;

    #[test]
    fn detects_common_synonyms_case_insensitively() {
        let fields = detect_geo_fields(["Nombre", "LATITUD", "Longitud"]).unwrap();
        assert_eq!(fields.latitude, "LATITUD");
        assert_eq!(fields.longitude, "Longitud");

        let fields = detect_geo_fields(["lng", "lat", "name"]).unwrap();
        assert_eq!(fields.latitude, "lat");
        assert_eq!(fields.longitude, "lng");
    }

    #[test]
    fn first_match_wins_per_category() {
        let fields = detect_geo_fields(["lat", "latitude", "lon", "long"]).unwrap();
        assert_eq!(fields.latitude, "lat");
        assert_eq!(fields.longitude, "lon");
    }

    #[test]
    fn missing_pair_is_reported_once_for_the_column_set() {
        assert!(detect_geo_fields(["lat", "name"]).is_none());
        let err = require_geo_fields(["x", "y"]).unwrap_err();
        assert!(err.to_string().contains("x, y"));
    }

    #[test]
    fn take_point_consumes_fields_in_lon_lat_order() {
        let mut props: Properties = [
            ("lat".to_string(), Scalar::from("19.4")),
            ("lon".to_string(), Scalar::from("-99.1")),
            ("name".to_string(), Scalar::from("A")),
        ]
        .into_iter()
        .collect();
        let fields = detect_geo_fields(props.keys().collect::<Vec<_>>()).unwrap();
        let point = fields.take_point(&mut props);
        assert_eq!(point, Geometry::Point(Coord::new(-99.1, 19.4)));
        assert_eq!(props.keys().collect::<Vec<_>>(), vec!["name"]);
    }
}
