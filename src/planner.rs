//! Turns a feature stream into the statements that build one destination table.
//!
//! The table schema comes from the first feature. Geometry columns are added
//! lazily, one per geometry type seen (`<default>_<type>`), so a dataset mixing
//! points and polygons keeps both. When the stream ends with a single geometry
//! column it is renamed to the default name.

use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    config::LoadSettings,
    data::Properties,
    error::{IngestError, PostProcessingError, RowError, SchemaError, StatementError},
    feature::{CanonicalFeature, FeatureStream},
    geometry::GeometryType,
    metadata::{PRIMARY_KEY_COLUMN, TableSchema},
    persistence::Persistence,
    sql,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlannerState {
    Empty,
    SchemaCreated,
    Loading,
    Finalized,
}

/// Outcome of loading one dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub table: String,
    pub rows_inserted: usize,
    pub rows_skipped: usize,
    /// Final names of the geometry columns, in the order they were added.
    pub geometry_columns: Vec<String>,
    pub renamed: bool,
    pub post_processing_failures: usize,
}

pub struct LoadPlanner<'a, P: Persistence + ?Sized> {
    store: &'a mut P,
    settings: &'a LoadSettings,
    table: String,
    state: PlannerState,
    schema: TableSchema,
    geometry_columns: Vec<(GeometryType, String)>,
    report: LoadReport,
}

impl<'a, P: Persistence + ?Sized> LoadPlanner<'a, P> {
    /// `table` must already be a normalized identifier.
    pub fn new(store: &'a mut P, settings: &'a LoadSettings, table: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            store,
            settings,
            report: LoadReport {
                table: table.clone(),
                ..LoadReport::default()
            },
            table,
            state: PlannerState::Empty,
            schema: TableSchema::default(),
            geometry_columns: Vec::new(),
        }
    }

    pub fn state(&self) -> PlannerState {
        self.state
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Names no property column may take: the surrogate key and every geometry column.
    fn reserved_names(&self) -> Vec<String> {
        let mut names = vec![
            PRIMARY_KEY_COLUMN.to_string(),
            self.settings.geometry_column.clone(),
        ];
        names.extend(
            GeometryType::ALL
                .iter()
                .map(|kind| self.settings.typed_geometry_column(&kind.column_suffix())),
        );
        names
    }

    fn create_schema(&mut self, first: &Properties) -> Result<(), SchemaError> {
        let reserved = self.reserved_names();
        let reserved: Vec<&str> = reserved.iter().map(String::as_str).collect();
        self.schema = TableSchema::infer(first, &reserved);
        debug!(
            "Table '{}' columns: {:?}",
            self.table,
            self.schema.columns.iter().map(|c| &c.name).collect::<Vec<_>>()
        );
        self.execute_schema(sql::drop_table(&self.table))?;
        self.execute_schema(sql::create_table(&self.table, &self.schema))?;
        self.state = PlannerState::SchemaCreated;
        Ok(())
    }

    fn execute_schema(&mut self, statement: String) -> Result<(), SchemaError> {
        self.store
            .execute(&statement)
            .map_err(|source| SchemaError {
                table: self.table.clone(),
                statement,
                source,
            })
    }

    fn geometry_column(&mut self, kind: GeometryType) -> Result<String, SchemaError> {
        if let Some((_, column)) = self.geometry_columns.iter().find(|(k, _)| *k == kind) {
            return Ok(column.clone());
        }
        let column = self.settings.typed_geometry_column(&kind.column_suffix());
        self.execute_schema(sql::add_geometry_column(
            &self.table,
            &column,
            self.settings.srid,
            &kind.postgis_name(),
        ))?;
        debug!("Added geometry column {column} to '{}'", self.table);
        self.geometry_columns.push((kind, column.clone()));
        Ok(column)
    }

    /// Loads one feature.
    ///
    /// Schema failures stop the dataset. A feature that cannot be inserted is
    /// logged and counted, and loading continues with the next one.
    pub fn push(&mut self, feature: &CanonicalFeature) -> Result<(), SchemaError> {
        if self.state == PlannerState::Empty {
            self.create_schema(&feature.properties)?;
        }
        let column = self.geometry_column(feature.geometry.geometry_type())?;
        self.state = PlannerState::Loading;
        match self.insert(feature, &column) {
            Ok(()) => self.report.rows_inserted += 1,
            Err(err) => {
                self.report.rows_skipped += 1;
                warn!("Skipping feature in '{}': {err}", self.table);
            }
        }
        Ok(())
    }

    fn insert(&mut self, feature: &CanonicalFeature, column: &str) -> Result<(), RowError> {
        let geometry = feature.geometry.to_sql(self.settings.srid)?;
        let statement = sql::insert(
            &self.table,
            &self.schema,
            &feature.properties,
            column,
            &geometry,
        );
        self.store
            .execute(&statement)
            .map_err(|source| RowError::Rejected { statement, source })
    }

    /// Renames, indexes and analyzes the table, then returns the report.
    ///
    /// An empty stream still creates a table holding only the surrogate key.
    pub fn finish(mut self) -> Result<LoadReport, SchemaError> {
        if self.state == PlannerState::Empty {
            self.create_schema(&Properties::new())?;
        }

        let mut columns: Vec<String> = self
            .geometry_columns
            .iter()
            .map(|(_, column)| column.clone())
            .collect();
        if let [only] = columns.as_mut_slice() {
            let target = self.settings.geometry_column.clone();
            let statement = sql::rename_column(&self.table, only, &target);
            if self.post_process("Rename", statement) {
                *only = target;
                self.report.renamed = true;
            }
        }
        for column in &columns {
            let statement = sql::create_spatial_index(&self.table, column);
            self.post_process("Spatial index", statement);
        }
        let statement = sql::analyze(&self.table);
        self.post_process("Analyze", statement);

        self.state = PlannerState::Finalized;
        self.report.geometry_columns = columns;
        info!(
            "Table '{}': {} rows inserted, {} skipped",
            self.table, self.report.rows_inserted, self.report.rows_skipped
        );
        Ok(self.report)
    }

    fn post_process(&mut self, operation: &'static str, statement: String) -> bool {
        match self.store.execute(&statement) {
            Ok(()) => true,
            Err(source) => {
                self.report.post_processing_failures += 1;
                let err = post_processing_error(operation, &self.table, statement, source);
                warn!("{err}");
                false
            }
        }
    }
}

fn post_processing_error(
    operation: &'static str,
    table: &str,
    statement: String,
    source: StatementError,
) -> PostProcessingError {
    PostProcessingError {
        operation,
        table: table.to_string(),
        statement,
        source,
    }
}

/// Drives a whole feature stream into `table`.
///
/// A parse error part-way through stops the dataset; rows inserted before it
/// stay in the table, which is then left unindexed.
pub fn load_features<P: Persistence + ?Sized>(
    store: &mut P,
    settings: &LoadSettings,
    table: &str,
    features: FeatureStream<'_>,
) -> Result<LoadReport, IngestError> {
    let mut planner = LoadPlanner::new(store, settings, table);
    for feature in features {
        planner.push(&feature?)?;
    }
    Ok(planner.finish()?)
}
