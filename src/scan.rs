//! Directory scan: every supported file under a root is loaded into a table
//! named after its file stem. A ledger of handled files lets repeated scans
//! pick up only new arrivals.

use std::{
    collections::HashSet,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{debug, info};

use crate::{
    ingest::{DatasetOutcome, IngestionContext, SourceKind},
    persistence::Persistence,
};

pub const DEFAULT_LEDGER: &str = "processed_files";

/// Newline-separated list of files already handled, keyed by path relative to the scan root.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    entries: HashSet<String>,
    writable: bool,
}

impl Ledger {
    /// Loads the ledger; a missing file is an empty ledger.
    ///
    /// A read-only ledger still filters files but never records new ones.
    pub fn open(path: &Path, writable: bool) -> Result<Self> {
        let entries = match fs::read_to_string(path) {
            Ok(contents) => contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(err) => {
                return Err(err).with_context(|| format!("Reading ledger {path:?}"));
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
            writable,
        })
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.contains(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn record(&mut self, entry: &str) -> Result<()> {
        if !self.entries.insert(entry.to_string()) || !self.writable {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Opening ledger {:?}", self.path))?;
        writeln!(file, "{entry}").with_context(|| format!("Appending to ledger {:?}", self.path))
    }
}

/// Supported files under `root`, recursively, in sorted path order.
pub fn collect_candidates(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).with_context(|| format!("Listing directory {dir:?}"))?;
        for entry in entries {
            let path = entry.with_context(|| format!("Listing directory {dir:?}"))?.path();
            if path.is_dir() {
                pending.push(path);
            } else if SourceKind::from_path(&path).is_ok() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Ledger key for `path`: its path relative to `root`, with `/` separators.
pub fn ledger_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn table_for(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Ingests every candidate under `root` that the ledger does not list yet.
pub fn scan<P: Persistence>(
    context: &mut IngestionContext<P>,
    root: &Path,
    ledger: &mut Ledger,
) -> Result<Vec<DatasetOutcome>> {
    let candidates = collect_candidates(root)?;
    info!(
        "Found {} supported file(s) under {root:?}; ledger lists {}",
        candidates.len(),
        ledger.len()
    );
    let mut outcomes = Vec::new();
    for path in candidates {
        let key = ledger_key(root, &path);
        if ledger.contains(&key) {
            debug!("Skipping {key}: already processed");
            continue;
        }
        outcomes.extend(context.ingest_file(&path, &table_for(&path)));
        ledger.record(&key)?;
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn candidates_are_found_recursively_and_sorted() {
        let dir = tempdir().expect("temp dir");
        let nested = dir.path().join("estados").join("cdmx");
        fs::create_dir_all(&nested).expect("create dirs");
        fs::write(dir.path().join("b.csv"), "x").expect("write");
        fs::write(dir.path().join("a.GeoJSON"), "x").expect("write");
        fs::write(dir.path().join("notas.txt"), "x").expect("write");
        fs::write(dir.path().join("capa.dbf"), "x").expect("write");
        fs::write(nested.join("escuelas.kmz"), "x").expect("write");

        let keys: Vec<_> = collect_candidates(dir.path())
            .unwrap()
            .iter()
            .map(|path| ledger_key(dir.path(), path))
            .collect();
        assert_eq!(keys, vec!["a.GeoJSON", "b.csv", "estados/cdmx/escuelas.kmz"]);
    }

    #[test]
    fn ledger_round_trips_through_its_file() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join(DEFAULT_LEDGER);
        let mut ledger = Ledger::open(&path, true).unwrap();
        assert!(ledger.is_empty());
        ledger.record("a.csv").unwrap();
        ledger.record("a.csv").unwrap();
        ledger.record("b/c.kml").unwrap();

        let reopened = Ledger::open(&path, true).unwrap();
        assert!(reopened.contains("a.csv"));
        assert!(reopened.contains("b/c.kml"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "a.csv\nb/c.kml\n");
    }

    #[test]
    fn read_only_ledger_does_not_touch_disk() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join(DEFAULT_LEDGER);
        let mut ledger = Ledger::open(&path, false).unwrap();
        ledger.record("a.csv").unwrap();
        assert!(ledger.contains("a.csv"));
        assert!(!path.exists());
    }

    #[test]
    fn table_is_file_stem() {
        assert_eq!(table_for(Path::new("datos/Escuelas 2020.csv")), "Escuelas 2020");
    }
}
