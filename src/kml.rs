//! KML loader.
//!
//! Placemarks anywhere in the document become canonical features. Only Point,
//! LineString and Polygon geometries are read; a MultiGeometry of those becomes
//! a geometry collection, and MultiGeometry nested inside another one is not
//! descended into.
//!
//! Two recovery steps run on top of the markup parser:
//!
//! - A root `<kml>` tag whose attributes break parsing is rewritten to the
//!   canonical opening tag and the document is parsed exactly once more.
//! - Property values carrying an HTML `<table>` are unpacked into one property
//!   per two-cell row.

use std::{borrow::Cow, path::Path, sync::LazyLock};

use log::{debug, warn};
use quick_xml::{
    Reader,
    escape::{resolve_html5_entity, unescape_with},
    events::{BytesStart, Event},
};
use regex::Regex;

use crate::{
    data::{Properties, Scalar},
    error::{IngestError, ParseError},
    feature::{self, CanonicalFeature, FeatureStream},
    geometry::{Coord, Geometry, Ordinate},
    io_utils, naming,
};

pub const KML_NAMESPACE: &str = "http://www.opengis.net/kml/2.2";

/// Property that references a shared style and never becomes a column.
const STYLE_PROPERTY: &str = "styleUrl";
/// Simple Placemark children kept as properties; other leaves are presentation only.
const PLACEMARK_FIELDS: &[&str] = &["name", "address", "description", STYLE_PROPERTY];

static ROOT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<kml\b[^>]*>").expect("root tag pattern"));
static COORD_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*,\s*").expect("coordinate separator pattern"));
static TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<table\b[^>]*>(.*?)</table\s*>").expect("table pattern"));
static ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr\s*>").expect("row pattern"));
static CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<td\b[^>]*>(.*?)</td\s*>").expect("cell pattern"));
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern"));

pub fn load_kml<'a>(path: &Path) -> Result<FeatureStream<'a>, IngestError> {
    let bytes = io_utils::read_source(path)?;
    let features = kml_from_bytes(&bytes)?;
    Ok(Box::new(features.into_iter().map(Ok)))
}

pub fn kml_from_bytes(bytes: &[u8]) -> Result<Vec<CanonicalFeature>, ParseError> {
    let text = io_utils::decode_with_fallback(bytes)?;
    let placemarks = parse_with_recovery(&text)?;
    Ok(placemarks
        .into_iter()
        .flat_map(|placemark| {
            feature::build(unpack_properties(placemark.properties), placemark.geometry)
        })
        .collect())
}

/// Parses the document, retrying once with a sanitized root tag.
fn parse_with_recovery(text: &str) -> Result<Vec<Placemark>, ParseError> {
    let mut source = Cow::Borrowed(text);
    let mut sanitized = false;
    loop {
        match parse_placemarks(&source) {
            Ok(placemarks) => return Ok(placemarks),
            Err(err) if !sanitized => {
                warn!("Markup rejected ({err}); retrying with a sanitized <kml> tag");
                source = Cow::Owned(sanitize_root(&source));
                sanitized = true;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Rewrites the first `<kml ...>` opening tag to its canonical form.
pub fn sanitize_root(text: &str) -> String {
    let canonical = format!("<kml xmlns=\"{KML_NAMESPACE}\">");
    ROOT_TAG
        .replace(text, regex::NoExpand(&canonical))
        .into_owned()
}

#[derive(Debug)]
struct Placemark {
    properties: Properties,
    geometry: Geometry,
}

#[derive(Debug)]
enum GeometryFrame {
    Point(Option<Coord>),
    LineString(Vec<Coord>),
    Polygon {
        outer: Vec<Coord>,
        inner: Vec<Vec<Coord>>,
    },
    Multi(Vec<Geometry>),
}

impl GeometryFrame {
    fn open(name: &str) -> Option<Self> {
        match name {
            "Point" => Some(GeometryFrame::Point(None)),
            "LineString" => Some(GeometryFrame::LineString(Vec::new())),
            "Polygon" => Some(GeometryFrame::Polygon {
                outer: Vec::new(),
                inner: Vec::new(),
            }),
            "MultiGeometry" => Some(GeometryFrame::Multi(Vec::new())),
            _ => None,
        }
    }

    fn finish(self) -> Option<Geometry> {
        match self {
            GeometryFrame::Point(coord) => coord.map(Geometry::Point),
            GeometryFrame::LineString(coords) => Some(Geometry::LineString(coords)),
            GeometryFrame::Polygon { outer, inner } => {
                let mut rings = vec![outer];
                rings.extend(inner);
                Some(Geometry::Polygon(rings))
            }
            GeometryFrame::Multi(children) => Some(Geometry::GeometryCollection(children)),
        }
    }
}

#[derive(Debug)]
struct PlacemarkDraft {
    depth: usize,
    properties: Properties,
    geometries: Vec<Geometry>,
    frames: Vec<GeometryFrame>,
    skip_depth: Option<usize>,
    data_name: Option<String>,
}

impl PlacemarkDraft {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            properties: Properties::new(),
            geometries: Vec::new(),
            frames: Vec::new(),
            skip_depth: None,
            data_name: None,
        }
    }

    fn finish(self) -> Option<Placemark> {
        let mut geometries = self.geometries;
        let geometry = match geometries.len() {
            0 => return None,
            1 => geometries.pop()?,
            _ => Geometry::GeometryCollection(geometries),
        };
        Some(Placemark {
            properties: self.properties,
            geometry,
        })
    }
}

#[derive(Debug)]
struct OpenElement {
    name: String,
    has_children: bool,
}

#[derive(Debug, Default)]
struct KmlState {
    stack: Vec<OpenElement>,
    text: String,
    draft: Option<PlacemarkDraft>,
    placemarks: Vec<Placemark>,
    dropped: usize,
}

impl KmlState {
    fn open(&mut self, element: &BytesStart<'_>) -> Result<(), ParseError> {
        let name = local_name(element);
        if let Some(parent) = self.stack.last_mut() {
            parent.has_children = true;
        }
        self.stack.push(OpenElement {
            name: name.clone(),
            has_children: false,
        });
        self.text.clear();
        let depth = self.stack.len();

        let Some(draft) = self.draft.as_mut() else {
            if name == "Placemark" {
                self.draft = Some(PlacemarkDraft::new(depth));
            }
            return Ok(());
        };
        if draft.skip_depth.is_some() {
            return Ok(());
        }
        match name.as_str() {
            "Point" | "LineString" | "Polygon" | "MultiGeometry" => {
                let nested_multi = name == "MultiGeometry"
                    && matches!(draft.frames.last(), Some(GeometryFrame::Multi(_)));
                let inside_simple = matches!(
                    draft.frames.last(),
                    Some(frame) if !matches!(frame, GeometryFrame::Multi(_))
                );
                if nested_multi || inside_simple {
                    debug!("Skipping nested <{name}>");
                    draft.skip_depth = Some(depth);
                } else if let Some(frame) = GeometryFrame::open(&name) {
                    draft.frames.push(frame);
                }
            }
            "Data" | "SimpleData" => {
                draft.data_name = attribute(element, "name")?;
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), ParseError> {
        let text = std::mem::take(&mut self.text);
        let depth = self.stack.len();
        let Some(element) = self.stack.pop() else {
            return Err(markup_error("closing tag without matching opening tag"));
        };
        let in_inner_ring = self.stack.iter().any(|open| open.name == "innerBoundaryIs");
        let parent = self.stack.last().map(|open| open.name.clone()).unwrap_or_default();
        let Some(draft) = self.draft.as_mut() else {
            return Ok(());
        };

        if let Some(skip) = draft.skip_depth {
            if skip == depth {
                draft.skip_depth = None;
            }
            return Ok(());
        }

        if depth == draft.depth {
            if let Some(draft) = self.draft.take() {
                match draft.finish() {
                    Some(placemark) => self.placemarks.push(placemark),
                    None => {
                        self.dropped += 1;
                        warn!("Dropping placemark without a supported geometry");
                    }
                }
            }
            return Ok(());
        }

        match element.name.as_str() {
            "coordinates" => {
                let coords = parse_coordinates(&text);
                match draft.frames.last_mut() {
                    Some(GeometryFrame::Point(point)) => *point = coords.into_iter().next(),
                    Some(GeometryFrame::LineString(line)) => line.extend(coords),
                    Some(GeometryFrame::Polygon { outer, inner }) => {
                        if in_inner_ring {
                            inner.push(coords);
                        } else {
                            *outer = coords;
                        }
                    }
                    _ => {}
                }
            }
            "Point" | "LineString" | "Polygon" | "MultiGeometry" => {
                if let Some(geometry) = draft.frames.pop().and_then(GeometryFrame::finish) {
                    match draft.frames.last_mut() {
                        Some(GeometryFrame::Multi(children)) => children.push(geometry),
                        _ => draft.geometries.push(geometry),
                    }
                }
            }
            "value" => {
                if let Some(name) = draft.data_name.clone() {
                    draft.properties.insert(name, Scalar::Text(text));
                }
            }
            "SimpleData" => {
                if let Some(name) = draft.data_name.take() {
                    draft.properties.insert(name, Scalar::Text(text));
                }
            }
            "Data" => draft.data_name = None,
            name if depth == draft.depth + 1
                && !element.has_children
                && PLACEMARK_FIELDS.contains(&name) =>
            {
                draft.properties.insert(name, Scalar::Text(text));
            }
            "when" if parent == "TimeStamp" => {
                draft.properties.insert("timestamp", Scalar::Text(text));
            }
            name @ ("begin" | "end") if parent == "TimeSpan" => {
                draft.properties.insert(name, Scalar::Text(text));
            }
            _ => {}
        }
        Ok(())
    }
}

fn parse_placemarks(text: &str) -> Result<Vec<Placemark>, ParseError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);
    let mut state = KmlState::default();
    let mut seen_root = false;

    loop {
        match reader.read_event().map_err(markup_error)? {
            Event::Start(element) => {
                if !seen_root {
                    check_root(&element)?;
                    seen_root = true;
                }
                state.open(&element)?;
            }
            Event::Empty(element) => {
                if !seen_root {
                    check_root(&element)?;
                    seen_root = true;
                }
                state.open(&element)?;
                state.close()?;
            }
            Event::End(_) => state.close()?,
            Event::Text(content) => {
                let decoded = content
                    .unescape()
                    .map(Cow::into_owned)
                    .unwrap_or_else(|_| String::from_utf8_lossy(&content).into_owned());
                state.text.push_str(&decoded);
            }
            Event::CData(content) => state.text.push_str(&String::from_utf8_lossy(&content)),
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(markup_error("document has no root element"));
    }
    if !state.stack.is_empty() {
        return Err(markup_error(format!(
            "unexpected end of document inside <{}>",
            state.stack.last().map(|open| open.name.as_str()).unwrap_or_default()
        )));
    }
    if state.dropped > 0 {
        debug!("{} placemark(s) had no supported geometry", state.dropped);
    }
    Ok(state.placemarks)
}

/// Validates the root element's attributes, including namespace prefix declarations.
fn check_root(element: &BytesStart<'_>) -> Result<(), ParseError> {
    let mut declared = Vec::new();
    let mut used = Vec::new();
    if let Some(prefix) = element.name().prefix() {
        used.push(String::from_utf8_lossy(prefix.as_ref()).into_owned());
    }
    for attribute in element.attributes() {
        let attribute = attribute.map_err(markup_error)?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        match key.split_once(':') {
            Some(("xmlns", prefix)) => declared.push(prefix.to_string()),
            Some(("xml", _)) => {}
            Some((prefix, _)) => used.push(prefix.to_string()),
            None => {}
        }
    }
    match used.iter().find(|prefix| !declared.contains(prefix)) {
        Some(prefix) => Err(markup_error(format!(
            "root element uses undeclared namespace prefix '{prefix}'"
        ))),
        None => Ok(()),
    }
}

fn local_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

fn attribute(element: &BytesStart<'_>, name: &str) -> Result<Option<String>, ParseError> {
    for attribute in element.attributes() {
        let attribute = attribute.map_err(markup_error)?;
        if attribute.key.local_name().as_ref() == name.as_bytes() {
            let value = attribute.unescape_value().map_err(markup_error)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn markup_error(err: impl std::fmt::Display) -> ParseError {
    ParseError::Markup {
        message: err.to_string(),
    }
}

/// Parses `lon,lat[,alt]` tuples separated by whitespace, keeping two components.
pub fn parse_coordinates(text: &str) -> Vec<Coord> {
    let compact = COORD_SEPARATOR.replace_all(text.trim(), ",");
    compact
        .split_whitespace()
        .filter_map(|tuple| {
            let mut parts = tuple.split(',');
            match (parts.next(), parts.next()) {
                (Some(x), Some(y)) => Some(Coord {
                    x: Ordinate::parse(x),
                    y: Ordinate::parse(y),
                }),
                _ => {
                    debug!("Ignoring coordinate tuple '{tuple}'");
                    None
                }
            }
        })
        .collect()
}

/// Drops the style reference and expands embedded two-column HTML tables.
fn unpack_properties(properties: Properties) -> Properties {
    let mut unpacked = Properties::new();
    for (key, value) in properties {
        if key == STYLE_PROPERTY {
            continue;
        }
        match &value {
            Scalar::Text(text) if TABLE.is_match(text) => {
                for (name, cell) in table_rows(text) {
                    unpacked.insert(name, Scalar::Text(cell));
                }
            }
            _ => unpacked.insert(key, value),
        }
    }
    unpacked
}

/// Rows of exactly two cells from the first table, as `(normalized name, text)`.
pub fn table_rows(html: &str) -> Vec<(String, String)> {
    let Some(table) = TABLE.captures(html).and_then(|caps| caps.get(1)) else {
        return Vec::new();
    };
    ROW.captures_iter(table.as_str())
        .filter_map(|row| {
            let body = row.get(1)?.as_str();
            let cells: Vec<String> = CELL
                .captures_iter(body)
                .filter_map(|cell| cell.get(1).map(|m| cell_text(m.as_str())))
                .collect();
            match cells.as_slice() {
                [name, value] => Some((naming::normalize(name), value.clone())),
                _ => None,
            }
        })
        .collect()
}

/// Cell markup stripped, then numeric and HTML named entities resolved.
///
/// A cell with a malformed reference, such as a bare `&`, is kept as written.
fn cell_text(html: &str) -> String {
    let stripped = TAG.replace_all(html, "");
    let stripped = stripped.trim();
    match unescape_with(stripped, resolve_html5_entity) {
        Ok(text) => text.trim().to_string(),
        Err(err) => {
            debug!("Keeping cell text with unresolved entity: {err}");
            stripped.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeometryType;

    const DOCUMENT: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <Folder>
      <Placemark>
        <name>Escuela</name>
        <styleUrl>#icon-1</styleUrl>
        <ExtendedData>
          <Data name="turno"><value>Matutino</value></Data>
        </ExtendedData>
        <Point><coordinates>-99.1,19.4,2240</coordinates></Point>
      </Placemark>
      <Placemark>
        <name>Ruta</name>
        <LineString><coordinates>
          -99.1,19.4,0 -99.2,19.5,0
        </coordinates></LineString>
      </Placemark>
      <Placemark>
        <name>Sin geometria</name>
      </Placemark>
    </Folder>
  </Document>
</kml>"##;

    #[test]
    fn placemarks_become_features_with_truncated_coordinates() {
        let features = kml_from_bytes(DOCUMENT.as_bytes()).unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].geometry, Geometry::Point(Coord::new(-99.1, 19.4)));
        assert_eq!(
            features[0].properties.keys().collect::<Vec<_>>(),
            vec!["name", "turno"]
        );
        assert_eq!(
            features[1].geometry,
            Geometry::LineString(vec![Coord::new(-99.1, 19.4), Coord::new(-99.2, 19.5)])
        );
    }

    #[test]
    fn polygons_keep_outer_then_inner_rings() {
        let document = r#"<kml xmlns="http://www.opengis.net/kml/2.2"><Placemark>
            <Polygon>
              <outerBoundaryIs><LinearRing><coordinates>0,0,5 4,0,5 4,4,5 0,0,5</coordinates></LinearRing></outerBoundaryIs>
              <innerBoundaryIs><LinearRing><coordinates>1,1 2,1 2,2 1,1</coordinates></LinearRing></innerBoundaryIs>
            </Polygon>
        </Placemark></kml>"#;
        let features = kml_from_bytes(document.as_bytes()).unwrap();
        match &features[0].geometry {
            Geometry::Polygon(rings) => {
                assert_eq!(rings.len(), 2);
                assert_eq!(rings[0][1], Coord::new(4.0, 0.0));
                assert_eq!(rings[1][0], Coord::new(1.0, 1.0));
            }
            other => panic!("expected polygon, got {other:?}"),
        }
    }

    #[test]
    fn multigeometry_explodes_and_nested_multigeometry_is_ignored() {
        let document = r#"<kml xmlns="http://www.opengis.net/kml/2.2"><Placemark>
            <name>Parque</name>
            <MultiGeometry>
              <Point><coordinates>1,2</coordinates></Point>
              <LineString><coordinates>0,0 1,1</coordinates></LineString>
              <MultiGeometry><Point><coordinates>9,9</coordinates></Point></MultiGeometry>
            </MultiGeometry>
        </Placemark></kml>"#;
        let features = kml_from_bytes(document.as_bytes()).unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].geometry.geometry_type(), GeometryType::Point);
        assert_eq!(features[1].geometry.geometry_type(), GeometryType::LineString);
        assert_eq!(features[0].properties, features[1].properties);
    }

    #[test]
    fn malformed_root_tag_is_sanitized_once() {
        let document = r#"<kml xmlns="http://www.opengis.net/kml/2.2" xsi:schemaLocation="http://x http://y">
            <Placemark><name>A</name><Point><coordinates>1,2</coordinates></Point></Placemark>
        </kml>"#;
        assert!(parse_placemarks(document).is_err());
        let features = kml_from_bytes(document.as_bytes()).unwrap();
        assert_eq!(features.len(), 1);
    }

    #[test]
    fn broken_body_still_fails_after_sanitizing() {
        let document = r#"<kml><Placemark><name>A</nombre></Placemark></kml>"#;
        assert!(matches!(
            kml_from_bytes(document.as_bytes()),
            Err(ParseError::Markup { .. })
        ));
    }

    #[test]
    fn embedded_tables_are_unpacked() {
        let document = r#"<kml xmlns="http://www.opengis.net/kml/2.2"><Placemark>
            <name>A</name>
            <description><![CDATA[<html><body><table>
              <tr><td>Clave Escuela</td><td>09DPR0001X</td></tr>
              <tr><td>Población</td><td>1&amp;2</td></tr>
              <tr><td>solo una celda</td></tr>
            </table></body></html>]]></description>
            <Point><coordinates>1,2</coordinates></Point>
        </Placemark></kml>"#;
        let features = kml_from_bytes(document.as_bytes()).unwrap();
        let props = &features[0].properties;
        assert_eq!(
            props.keys().collect::<Vec<_>>(),
            vec!["name", "clave_escuela", "poblacion"]
        );
        assert_eq!(props.get("clave_escuela"), Some(&Scalar::from("09DPR0001X")));
        assert_eq!(props.get("poblacion"), Some(&Scalar::from("1&2")));
    }

    #[test]
    fn table_cells_resolve_numeric_and_named_entities() {
        let rows = table_rows(
            "<table><tr><td>Poblaci&#243;n</td><td>Ju&aacute;rez&nbsp;</td></tr>\
             <tr><td>Colonia</td><td>Roma &#x26; Condesa</td></tr>\
             <tr><td>Nota</td><td>A & B</td></tr></table>",
        );
        assert_eq!(
            rows,
            vec![
                ("poblacion".to_string(), "Juárez".to_string()),
                ("colonia".to_string(), "Roma & Condesa".to_string()),
                ("nota".to_string(), "A & B".to_string()),
            ]
        );
    }

    #[test]
    fn only_descriptive_placemark_children_become_properties() {
        let document = r#"<kml xmlns="http://www.opengis.net/kml/2.2"><Placemark>
            <name>Kiosco</name>
            <visibility>1</visibility>
            <open>0</open>
            <Snippet maxLines="2">resumen</Snippet>
            <phoneNumber>5512345678</phoneNumber>
            <address>Av. Juárez 1</address>
            <TimeStamp><when>2020-05-01</when></TimeStamp>
            <TimeSpan><begin>2020-01-01</begin><end>2020-12-31</end></TimeSpan>
            <Point><coordinates>1,2</coordinates></Point>
        </Placemark></kml>"#;
        let features = kml_from_bytes(document.as_bytes()).unwrap();
        let props = &features[0].properties;
        assert_eq!(
            props.keys().collect::<Vec<_>>(),
            vec!["name", "address", "timestamp", "begin", "end"]
        );
        assert_eq!(props.get("timestamp"), Some(&Scalar::from("2020-05-01")));
    }

    #[test]
    fn coordinates_tolerate_spaces_after_commas() {
        let coords = parse_coordinates(" -99.1, 19.4, 10\n-99.2,19.5 ");
        assert_eq!(coords, vec![Coord::new(-99.1, 19.4), Coord::new(-99.2, 19.5)]);
    }
}
