//! I/O helpers shared by the loaders: byte reading, text decoding with a single
//! Latin-1 fallback, and delimited-text reader construction.
//!
//! `encoding_rs` assigns a character to every windows-1252 byte, so with the
//! current [`DECODE_ATTEMPTS`] the fallback always succeeds and
//! [`ParseError::Encoding`] is only returned if a strict encoding is tried last.

use std::{fs, io::Read, path::Path};

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use log::{debug, warn};

use crate::error::{InputError, ParseError};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';

/// Encodings tried in order when decoding source text.
///
/// `encoding_rs` maps the `latin1` label to windows-1252, a superset of ISO-8859-1.
pub static DECODE_ATTEMPTS: [&Encoding; 2] = [UTF_8, WINDOWS_1252];

pub fn read_source(path: &Path) -> Result<Vec<u8>, InputError> {
    fs::read(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Option<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        None
    } else {
        Some(text.into_owned())
    }
}

/// Decodes as UTF-8 and retries once with the Latin-1 fallback.
///
/// The fallback never reports errors, so invalid UTF-8 is always decoded
/// rather than rejected.
pub fn decode_with_fallback(bytes: &[u8]) -> Result<String, ParseError> {
    for (attempt, encoding) in DECODE_ATTEMPTS.iter().copied().enumerate() {
        if let Some(text) = decode_bytes(bytes, encoding) {
            if attempt > 0 {
                warn!("Input is not valid UTF-8; decoded as {}", encoding.name());
            } else {
                debug!("Input decoded as {}", encoding.name());
            }
            return Ok(text);
        }
    }
    Err(ParseError::Encoding {
        tried: DECODE_ATTEMPTS
            .iter()
            .map(|encoding| encoding.name())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

/// File type derived from the path extension, ignoring any `?query` suffix.
pub fn file_type(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = name.rsplit('.').next().unwrap_or_default();
    extension
        .split('?')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
