use std::{
    io::{Cursor, Read},
    path::Path,
};

use zip::ZipArchive;

use crate::{
    error::{IngestError, ParseError},
    io_utils, naming,
};

/// One `.kml` document found inside a KMZ archive.
#[derive(Debug)]
pub struct KmzMember {
    pub name: String,
    pub contents: Result<Vec<u8>, ParseError>,
}

impl KmzMember {
    /// Destination table for this member: `<table>_<normalized member stem>`.
    pub fn table_name(&self, table: &str) -> String {
        let file_name = self.name.rsplit('/').next().unwrap_or(&self.name);
        let stem = file_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(file_name);
        format!("{table}_{}", naming::normalize(stem))
    }
}

/// Lists the KML members of an archive in archive order.
///
/// A corrupt archive fails as a whole; a member that cannot be read carries its
/// own error so its siblings can still be loaded.
pub fn read_kmz(bytes: &[u8]) -> Result<Vec<KmzMember>, ParseError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(archive_error)?;
    let mut members = Vec::new();
    for idx in 0..archive.len() {
        let mut file = match archive.by_index(idx) {
            Ok(file) => file,
            Err(err) => {
                members.push(KmzMember {
                    name: format!("#{idx}"),
                    contents: Err(archive_error(err)),
                });
                continue;
            }
        };
        let name = file.name().to_string();
        if !name.to_ascii_lowercase().ends_with(".kml") {
            continue;
        }
        let mut contents = Vec::new();
        let contents = match file.read_to_end(&mut contents) {
            Ok(_) => Ok(contents),
            Err(err) => Err(archive_error(err)),
        };
        members.push(KmzMember { name, contents });
    }
    Ok(members)
}

pub fn read_kmz_path(path: &Path) -> Result<Vec<KmzMember>, IngestError> {
    let bytes = io_utils::read_source(path)?;
    Ok(read_kmz(&bytes)?)
}

fn archive_error(err: impl std::fmt::Display) -> ParseError {
    ParseError::Archive {
        message: err.to_string(),
    }
}
