//! Two-dimensional geometry model shared by every loader.
//!
//! Sources may carry altitude or measure components; only the first two
//! ordinates of each position are kept. Ordinates that fail to parse as numbers
//! are carried as raw text and rejected when the insert statement is rendered.

use std::fmt::Write as _;

use itertools::Itertools;
use serde::Serialize;

use crate::{
    data::Scalar,
    error::{ParseError, RowError},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Ordinate {
    Number(f64),
    Raw(String),
}

impl Ordinate {
    pub fn parse(text: &str) -> Self {
        match text.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => Ordinate::Number(value),
            _ => Ordinate::Raw(text.to_string()),
        }
    }

    pub fn from_scalar(value: &Scalar) -> Self {
        match value {
            Scalar::Integer(i) => Ordinate::Number(*i as f64),
            Scalar::Real(f) if f.is_finite() => Ordinate::Number(*f),
            Scalar::Text(text) => Ordinate::parse(text),
            other => Ordinate::Raw(other.as_display()),
        }
    }

    pub fn to_number(&self) -> Result<f64, RowError> {
        match self {
            Ordinate::Number(value) => Ok(*value),
            Ordinate::Raw(text) => Err(RowError::InvalidOrdinate {
                value: text.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coord {
    pub x: Ordinate,
    pub y: Ordinate,
}

impl Coord {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x: Ordinate::Number(x),
            y: Ordinate::Number(y),
        }
    }

    /// Builds a coordinate from a source position, discarding any component past `y`.
    pub fn from_position(position: &[f64]) -> Option<Self> {
        match position {
            [x, y, ..] => Some(Coord::new(*x, *y)),
            _ => None,
        }
    }

    fn write_wkt(&self, out: &mut String) -> Result<(), RowError> {
        let x = self.x.to_number()?;
        let y = self.y.to_number()?;
        let _ = write!(out, "{x} {y}");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GeometryType {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
}

impl GeometryType {
    pub const ALL: [GeometryType; 7] = [
        GeometryType::Point,
        GeometryType::LineString,
        GeometryType::Polygon,
        GeometryType::MultiPoint,
        GeometryType::MultiLineString,
        GeometryType::MultiPolygon,
        GeometryType::GeometryCollection,
    ];

    pub fn name(self) -> &'static str {
        match self {
            GeometryType::Point => "Point",
            GeometryType::LineString => "LineString",
            GeometryType::Polygon => "Polygon",
            GeometryType::MultiPoint => "MultiPoint",
            GeometryType::MultiLineString => "MultiLineString",
            GeometryType::MultiPolygon => "MultiPolygon",
            GeometryType::GeometryCollection => "GeometryCollection",
        }
    }

    /// Lowercase suffix appended to the default geometry column name.
    pub fn column_suffix(self) -> String {
        self.name().to_ascii_lowercase()
    }

    /// Type name as expected by `AddGeometryColumn`.
    pub fn postgis_name(self) -> String {
        self.name().to_ascii_uppercase()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Geometry {
    Point(Coord),
    LineString(Vec<Coord>),
    Polygon(Vec<Vec<Coord>>),
    MultiPoint(Vec<Coord>),
    MultiLineString(Vec<Vec<Coord>>),
    MultiPolygon(Vec<Vec<Vec<Coord>>>),
    GeometryCollection(Vec<Geometry>),
}

impl Geometry {
    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Geometry::Point(_) => GeometryType::Point,
            Geometry::LineString(_) => GeometryType::LineString,
            Geometry::Polygon(_) => GeometryType::Polygon,
            Geometry::MultiPoint(_) => GeometryType::MultiPoint,
            Geometry::MultiLineString(_) => GeometryType::MultiLineString,
            Geometry::MultiPolygon(_) => GeometryType::MultiPolygon,
            Geometry::GeometryCollection(_) => GeometryType::GeometryCollection,
        }
    }

    /// Splits collections into their members, recursively; other geometries yield themselves.
    pub fn flatten(self) -> Vec<Geometry> {
        match self {
            Geometry::GeometryCollection(children) => {
                children.into_iter().flat_map(Geometry::flatten).collect()
            }
            other => vec![other],
        }
    }

    pub fn to_wkt(&self) -> Result<String, RowError> {
        let mut out = String::new();
        self.write_wkt(&mut out)?;
        Ok(out)
    }

    /// Renders a PostGIS constructor expression built from literal coordinates.
    pub fn to_sql(&self, srid: u32) -> Result<String, RowError> {
        match self {
            Geometry::Point(coord) => Ok(format!(
                "ST_SetSRID(ST_MakePoint({},{}),{srid})",
                coord.x.to_number()?,
                coord.y.to_number()?
            )),
            other => Ok(format!("ST_GeomFromText('{}',{srid})", other.to_wkt()?)),
        }
    }

    fn write_wkt(&self, out: &mut String) -> Result<(), RowError> {
        out.push_str(&self.geometry_type().postgis_name());
        match self {
            Geometry::Point(coord) => {
                out.push('(');
                coord.write_wkt(out)?;
                out.push(')');
            }
            Geometry::LineString(coords) => write_coord_list(out, coords)?,
            Geometry::Polygon(rings) => write_ring_list(out, rings)?,
            Geometry::MultiPoint(coords) => {
                if coords.is_empty() {
                    out.push_str(" EMPTY");
                    return Ok(());
                }
                out.push('(');
                for (idx, coord) in coords.iter().enumerate() {
                    if idx > 0 {
                        out.push(',');
                    }
                    out.push('(');
                    coord.write_wkt(out)?;
                    out.push(')');
                }
                out.push(')');
            }
            Geometry::MultiLineString(lines) => write_ring_list(out, lines)?,
            Geometry::MultiPolygon(polygons) => {
                if polygons.is_empty() {
                    out.push_str(" EMPTY");
                    return Ok(());
                }
                out.push('(');
                for (idx, rings) in polygons.iter().enumerate() {
                    if idx > 0 {
                        out.push(',');
                    }
                    write_ring_list(out, rings)?;
                }
                out.push(')');
            }
            Geometry::GeometryCollection(children) => {
                if children.is_empty() {
                    out.push_str(" EMPTY");
                    return Ok(());
                }
                let rendered = children
                    .iter()
                    .map(Geometry::to_wkt)
                    .collect::<Result<Vec<_>, _>>()?;
                let _ = write!(out, "({})", rendered.iter().join(","));
            }
        }
        Ok(())
    }
}

fn write_coord_list(out: &mut String, coords: &[Coord]) -> Result<(), RowError> {
    if coords.is_empty() {
        out.push_str(" EMPTY");
        return Ok(());
    }
    out.push('(');
    for (idx, coord) in coords.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        coord.write_wkt(out)?;
    }
    out.push(')');
    Ok(())
}

fn write_ring_list(out: &mut String, rings: &[Vec<Coord>]) -> Result<(), RowError> {
    if rings.is_empty() {
        out.push_str(" EMPTY");
        return Ok(());
    }
    out.push('(');
    for (idx, ring) in rings.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        write_coord_list(out, ring)?;
    }
    out.push(')');
    Ok(())
}

fn positions(list: &[Vec<f64>]) -> Result<Vec<Coord>, ParseError> {
    list.iter()
        .map(|position| {
            Coord::from_position(position).ok_or_else(|| ParseError::GeoJson {
                message: format!("position {position:?} has fewer than two components"),
            })
        })
        .collect()
}

fn rings(list: &[Vec<Vec<f64>>]) -> Result<Vec<Vec<Coord>>, ParseError> {
    list.iter().map(|ring| positions(ring)).collect()
}

impl TryFrom<&geojson::Geometry> for Geometry {
    type Error = ParseError;

    fn try_from(geometry: &geojson::Geometry) -> Result<Self, Self::Error> {
        Geometry::try_from(&geometry.value)
    }
}

impl TryFrom<&geojson::Value> for Geometry {
    type Error = ParseError;

    fn try_from(value: &geojson::Value) -> Result<Self, Self::Error> {
        use geojson::Value;
        let geometry = match value {
            Value::Point(position) => {
                Geometry::Point(Coord::from_position(position).ok_or_else(|| {
                    ParseError::GeoJson {
                        message: format!("point {position:?} has fewer than two components"),
                    }
                })?)
            }
            Value::MultiPoint(list) => Geometry::MultiPoint(positions(list)?),
            Value::LineString(list) => Geometry::LineString(positions(list)?),
            Value::MultiLineString(lines) => Geometry::MultiLineString(rings(lines)?),
            Value::Polygon(polygon) => Geometry::Polygon(rings(polygon)?),
            Value::MultiPolygon(polygons) => Geometry::MultiPolygon(
                polygons
                    .iter()
                    .map(|polygon| rings(polygon))
                    .collect::<Result<_, _>>()?,
            ),
            Value::GeometryCollection(children) => Geometry::GeometryCollection(
                children
                    .iter()
                    .map(Geometry::try_from)
                    .collect::<Result<_, _>>()?,
            ),
        };
        Ok(geometry)
    }
}
