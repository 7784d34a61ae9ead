//! Shapefile bridge.
//!
//! Shapefiles are not parsed in-process. `shp2pgsql` renders them as an SQL
//! script which is replayed statement by statement through the store. Sources
//! whose header extent is not in longitude/latitude degrees are reprojected
//! with `ogr2ogr` first.

use std::{
    ffi::OsStr,
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use log::{debug, info, warn};

use crate::{
    config::LoadSettings,
    error::{IngestError, InputError, ParseError, SchemaError},
    io_utils,
    persistence::Persistence,
    planner::LoadReport,
    sql,
};

const SHP_FILE_CODE: i32 = 9994;
const SHP_HEADER_LEN: usize = 100;

/// Extent stored in bytes 36..68 of a `.shp` header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl BoundingBox {
    pub fn from_header(header: &[u8]) -> Option<Self> {
        if header.len() < SHP_HEADER_LEN {
            return None;
        }
        let code = i32::from_be_bytes(header[0..4].try_into().ok()?);
        if code != SHP_FILE_CODE {
            return None;
        }
        let read = |offset: usize| -> Option<f64> {
            Some(f64::from_le_bytes(header[offset..offset + 8].try_into().ok()?))
        };
        Some(Self {
            xmin: read(36)?,
            ymin: read(44)?,
            xmax: read(52)?,
            ymax: read(60)?,
        })
    }

    pub fn read(path: &Path) -> Result<Option<Self>, InputError> {
        let mut header = Vec::with_capacity(SHP_HEADER_LEN);
        File::open(path)
            .and_then(|file| file.take(SHP_HEADER_LEN as u64).read_to_end(&mut header))
            .map_err(|source| InputError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_header(&header))
    }

    /// Whether every corner lies within −180..180 / −90..90.
    pub fn is_geographic(&self) -> bool {
        let lon = -180.0..=180.0;
        let lat = -90.0..=90.0;
        lon.contains(&self.xmin)
            && lon.contains(&self.xmax)
            && lat.contains(&self.ymin)
            && lat.contains(&self.ymax)
    }
}

/// Splits converter output into statements.
///
/// Physical lines are accumulated until one ends with `;`. A trailing fragment
/// without a terminator is still returned.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    for line in script.lines() {
        if current.is_empty() && line.trim().is_empty() {
            continue;
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
        if line.trim_end().ends_with(';') {
            statements.push(std::mem::take(&mut current));
        }
    }
    if !current.trim().is_empty() {
        statements.push(current);
    }
    statements
}

/// Whether `statement` opens or closes a transaction.
///
/// The converter wraps its script in `BEGIN`/`COMMIT`; replaying those would
/// let one rejected row abort every statement after it.
pub fn is_transaction_control(statement: &str) -> bool {
    let keyword = statement
        .trim()
        .trim_end_matches(';')
        .split_whitespace()
        .next()
        .unwrap_or_default();
    ["BEGIN", "COMMIT", "END", "ROLLBACK", "START"]
        .iter()
        .any(|control| keyword.eq_ignore_ascii_case(control))
}

/// Loads `path` into `table` through the external converters.
///
/// Each statement runs on its own, outside any converter transaction.
/// Statements rejected during replay are logged and counted as skipped; the
/// converter's own `CREATE TABLE` failing is not distinguishable from a row
/// failure at this level.
pub fn load_shapefile<P: Persistence + ?Sized>(
    store: &mut P,
    settings: &LoadSettings,
    path: &Path,
    table: &str,
) -> Result<LoadReport, IngestError> {
    let workspace = tempfile::tempdir().map_err(|source| InputError::Io {
        path: std::env::temp_dir(),
        source,
    })?;
    let source = match BoundingBox::read(path)? {
        Some(bbox) if !bbox.is_geographic() => {
            info!(
                "Reprojecting {path:?} to EPSG:{} (extent {bbox:?})",
                settings.srid
            );
            reproject(settings, path, workspace.path())?
        }
        Some(_) => path.to_path_buf(),
        None => {
            warn!("Unreadable shapefile header in {path:?}; converting without reprojection");
            path.to_path_buf()
        }
    };

    let script = convert(settings, &source, table)?;

    let drop = sql::drop_table(table);
    store.execute(&drop).map_err(|source| SchemaError {
        table: table.to_string(),
        statement: drop.clone(),
        source,
    })?;

    let mut report = LoadReport {
        table: table.to_string(),
        geometry_columns: vec![settings.geometry_column.clone()],
        ..LoadReport::default()
    };
    for statement in split_statements(&script) {
        if is_transaction_control(&statement) {
            debug!("Dropping converter transaction statement {statement:?}");
            continue;
        }
        let is_insert = statement.trim_start().starts_with("INSERT");
        match store.execute(&statement) {
            Ok(()) if is_insert => report.rows_inserted += 1,
            Ok(()) => {}
            Err(err) => {
                report.rows_skipped += 1;
                warn!("Statement rejected while loading '{table}': {err} (statement: {statement})");
            }
        }
    }
    info!(
        "Table '{table}': {} rows inserted, {} skipped",
        report.rows_inserted, report.rows_skipped
    );
    Ok(report)
}

fn reproject(settings: &LoadSettings, path: &Path, workspace: &Path) -> Result<PathBuf, ParseError> {
    let file_name = path
        .file_name()
        .unwrap_or_else(|| OsStr::new("reprojected.shp"));
    let target = workspace.join(file_name);
    let mut command = Command::new(&settings.ogr2ogr);
    command
        .arg("-t_srs")
        .arg(format!("EPSG:{}", settings.srid))
        .arg(&target)
        .arg(path)
        .stdout(Stdio::null());
    run(&mut command, &settings.ogr2ogr)?;
    Ok(target)
}

/// Runs `shp2pgsql` with its output captured in a temporary file and returns the script text.
fn convert(settings: &LoadSettings, path: &Path, table: &str) -> Result<String, ParseError> {
    let tool = settings.shp2pgsql.as_str();
    let mut output = tempfile::tempfile().map_err(|err| converter_error(tool, err))?;
    let stdout = output.try_clone().map_err(|err| converter_error(tool, err))?;
    let mut command = Command::new(tool);
    command
        .arg("-c")
        .arg("-s")
        .arg(settings.srid.to_string())
        .arg("-g")
        .arg(&settings.geometry_column)
        .arg("-I")
        .arg(path)
        .arg(format!("public.{table}"))
        .stdout(Stdio::from(stdout));
    run(&mut command, tool)?;

    let mut bytes = Vec::new();
    output
        .seek(SeekFrom::Start(0))
        .and_then(|_| output.read_to_end(&mut bytes))
        .map_err(|err| converter_error(tool, err))?;
    debug!("{tool} produced {} bytes for {path:?}", bytes.len());
    io_utils::decode_with_fallback(&bytes)
}

fn run(command: &mut Command, tool: &str) -> Result<(), ParseError> {
    let output = command
        .stderr(Stdio::piped())
        .output()
        .map_err(|err| converter_error(tool, format!("failed to spawn: {err}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(converter_error(
            tool,
            format!("exited with status {} {}", output.status, stderr.trim()),
        ));
    }
    Ok(())
}

fn converter_error(tool: &str, message: impl ToString) -> ParseError {
    ParseError::Converter {
        tool: tool.to_string(),
        message: message.to_string(),
    }
}
