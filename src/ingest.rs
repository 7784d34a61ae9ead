//! Per-file dispatch: validates the input, picks a loader by extension and
//! hands the resulting feature stream to the planner.
//!
//! Nothing fails past this point. Every error is classified, logged with the
//! dataset it belongs to, and returned as a [`DatasetOutcome`].

use std::{fs, path::Path};

use log::{error, info};
use serde::Serialize;

use crate::{
    config::LoadSettings,
    error::{IngestError, InputError},
    feature::FeatureStream,
    geojson_source, io_utils, json_rows, kml, kmz,
    naming,
    persistence::Persistence,
    planner::{self, LoadReport},
    shapefile, tabular,
};

/// Input formats recognised by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceKind {
    Csv,
    Json,
    GeoJson,
    Kml,
    Kmz,
    Shapefile,
}

pub const SUPPORTED_EXTENSIONS: &[&str] = &["shp", "csv", "kml", "kmz", "geojson", "json"];

impl SourceKind {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "csv" => Some(SourceKind::Csv),
            "json" => Some(SourceKind::Json),
            "geojson" => Some(SourceKind::GeoJson),
            "kml" => Some(SourceKind::Kml),
            "kmz" => Some(SourceKind::Kmz),
            "shp" => Some(SourceKind::Shapefile),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, InputError> {
        let extension = io_utils::file_type(path);
        Self::from_extension(&extension).ok_or(InputError::Unsupported { extension })
    }
}

/// Result of loading one dataset: a whole file, or one member of a KMZ archive.
#[derive(Debug)]
pub struct DatasetOutcome {
    pub source: String,
    pub table: String,
    pub result: Result<LoadReport, IngestError>,
}

impl DatasetOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn summary(&self) -> DatasetSummary {
        match &self.result {
            Ok(report) => DatasetSummary {
                source: self.source.clone(),
                table: self.table.clone(),
                status: "loaded",
                error_category: None,
                error: None,
                report: Some(report.clone()),
            },
            Err(err) => DatasetSummary {
                source: self.source.clone(),
                table: self.table.clone(),
                status: "failed",
                error_category: Some(err.category()),
                error: Some(err.to_string()),
                report: None,
            },
        }
    }
}

/// Serializable view of a [`DatasetOutcome`] for run reports.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub source: String,
    pub table: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<LoadReport>,
}

/// Store handle and settings shared by every dataset of a run.
pub struct IngestionContext<P: Persistence> {
    store: P,
    settings: LoadSettings,
}

impl<P: Persistence> IngestionContext<P> {
    pub fn new(store: P, settings: LoadSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    pub fn settings(&self) -> &LoadSettings {
        &self.settings
    }

    pub fn into_store(self) -> P {
        self.store
    }

    /// Loads `path` into the table named `table` (normalized here).
    ///
    /// A KMZ archive yields one outcome per KML member; every other format
    /// yields exactly one.
    pub fn ingest_file(&mut self, path: &Path, table: &str) -> Vec<DatasetOutcome> {
        let source = path.display().to_string();
        let (kind, table) = match self.validate(path, table) {
            Ok(valid) => valid,
            Err(err) => {
                return vec![finish(source, table.to_string(), Err(err.into()))];
            }
        };
        info!("Loading {source} ({kind:?}) into '{table}'");

        if kind == SourceKind::Kmz {
            return self.ingest_kmz(path, &source, &table);
        }
        let result = self.load(kind, path, &table);
        vec![finish(source, table, result)]
    }

    fn validate(&self, path: &Path, raw_table: &str) -> Result<(SourceKind, String), InputError> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(InputError::Missing {
                    path: path.to_path_buf(),
                });
            }
            Err(source) => {
                return Err(InputError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        if metadata.len() < self.settings.min_file_size {
            return Err(InputError::Empty {
                path: path.to_path_buf(),
                size: metadata.len(),
            });
        }
        let kind = SourceKind::from_path(path)?;
        let table = naming::table_name(raw_table)?;
        Ok((kind, table))
    }

    fn load(&mut self, kind: SourceKind, path: &Path, table: &str) -> Result<LoadReport, IngestError> {
        let features: FeatureStream<'_> = match kind {
            SourceKind::Csv => tabular::load_tabular(path, self.settings.delimiter)?.into_features()?,
            SourceKind::Json => json_rows::load_json_rows(path)?,
            SourceKind::GeoJson => geojson_source::load_geojson(path)?,
            SourceKind::Kml => kml::load_kml(path)?,
            SourceKind::Shapefile => {
                return shapefile::load_shapefile(&mut self.store, &self.settings, path, table);
            }
            // Archives fan out per member in `ingest_kmz`.
            SourceKind::Kmz => {
                return Err(InputError::Unsupported {
                    extension: "kmz".to_string(),
                }
                .into());
            }
        };
        planner::load_features(&mut self.store, &self.settings, table, features)
    }

    fn ingest_kmz(&mut self, path: &Path, source: &str, table: &str) -> Vec<DatasetOutcome> {
        let members = match kmz::read_kmz_path(path) {
            Ok(members) => members,
            Err(err) => return vec![finish(source.to_string(), table.to_string(), Err(err))],
        };
        if members.is_empty() {
            info!("{source} contains no KML documents");
        }
        members
            .into_iter()
            .map(|member| {
                let member_table = member.table_name(table);
                let member_source = format!("{source}!{}", member.name);
                let result = member
                    .contents
                    .and_then(|bytes| kml::kml_from_bytes(&bytes))
                    .map_err(IngestError::from)
                    .and_then(|features| {
                        let stream: FeatureStream<'_> = Box::new(features.into_iter().map(Ok));
                        planner::load_features(&mut self.store, &self.settings, &member_table, stream)
                    });
                finish(member_source, member_table, result)
            })
            .collect()
    }
}

fn finish(source: String, table: String, result: Result<LoadReport, IngestError>) -> DatasetOutcome {
    match &result {
        Ok(report) => info!(
            "Loaded {source} into '{table}' ({} rows, {} skipped)",
            report.rows_inserted, report.rows_skipped
        ),
        Err(err) => error!("[{}] {source} -> '{table}': {err}", err.category()),
    }
    DatasetOutcome {
        source,
        table,
        result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use std::io::Write;
    use tempfile::tempdir;

    fn context() -> IngestionContext<MemoryStore> {
        IngestionContext::new(MemoryStore::new(), LoadSettings::default())
    }

    #[test]
    fn extensions_map_case_insensitively() {
        assert_eq!(SourceKind::from_extension("CSV"), Some(SourceKind::Csv));
        assert_eq!(SourceKind::from_extension("GeoJSON"), Some(SourceKind::GeoJson));
        assert_eq!(SourceKind::from_extension("xlsx"), None);
        assert_eq!(
            SourceKind::from_path(Path::new("datos/mapa.KMZ?dl=1")).unwrap(),
            SourceKind::Kmz
        );
    }

    #[test]
    fn tiny_file_is_empty_input_and_issues_nothing() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("vacio.csv");
        std::fs::write(&path, b"a,b\n").expect("write file");
        let mut ctx = context();
        let outcomes = ctx.ingest_file(&path, "vacio");
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            outcomes[0].result,
            Err(IngestError::Input(InputError::Empty { size: 4, .. }))
        ));
        assert!(ctx.store().statements().is_empty());
    }

    #[test]
    fn missing_and_unsupported_inputs() {
        let dir = tempdir().expect("temp dir");
        let mut ctx = context();
        let outcomes = ctx.ingest_file(&dir.path().join("nada.csv"), "nada");
        assert!(matches!(
            outcomes[0].result,
            Err(IngestError::Input(InputError::Missing { .. }))
        ));

        let path = dir.path().join("hoja.xlsx");
        std::fs::write(&path, b"not really a workbook").expect("write file");
        let outcomes = ctx.ingest_file(&path, "hoja");
        assert_eq!(outcomes[0].summary().error_category, Some("input"));
        assert!(ctx.store().statements().is_empty());
    }

    #[test]
    fn unusable_table_name_is_rejected_before_schema_work() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("puntos.csv");
        std::fs::write(&path, "lat,lon\n1,2\n").expect("write file");
        let mut ctx = context();
        let outcomes = ctx.ingest_file(&path, "%%%");
        assert!(matches!(
            outcomes[0].result,
            Err(IngestError::Input(InputError::InvalidTableName { .. }))
        ));
        assert!(ctx.store().statements().is_empty());
    }

    #[test]
    fn csv_without_coordinates_is_a_parse_error() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("sin_geo.csv");
        std::fs::write(&path, "nombre,valor\nA,1\n").expect("write file");
        let mut ctx = context();
        let outcomes = ctx.ingest_file(&path, "sin_geo");
        assert_eq!(outcomes[0].summary().error_category, Some("parse"));
        assert!(ctx.store().statements().is_empty());
    }

    #[test]
    fn kmz_members_load_independently() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("capas.kmz");
        let good = r#"<kml xmlns="http://www.opengis.net/kml/2.2"><Document>
            <Placemark><name>A</name><Point><coordinates>-99.1,19.4,0</coordinates></Point></Placemark>
        </Document></kml>"#;
        let mut writer = zip::ZipWriter::new(std::fs::File::create(&path).expect("create kmz"));
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("buena.kml", options).expect("entry");
        writer.write_all(good.as_bytes()).expect("write entry");
        writer.start_file("rota.kml", options).expect("entry");
        writer.write_all(b"<kml><Document><Placemark>").expect("write entry");
        writer.finish().expect("finish archive");

        let mut ctx = context();
        let outcomes = ctx.ingest_file(&path, "capas");
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].table, "capas_buena");
        assert!(outcomes[0].is_success());
        assert_eq!(outcomes[1].table, "capas_rota");
        assert!(!outcomes[1].is_success());
        assert_eq!(ctx.store().inserts().count(), 1);
    }
}
