use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::scan::DEFAULT_LEDGER;

#[derive(Debug, Parser)]
#[command(author, version, about = "Load geospatial files into PostGIS tables", long_about = None)]
pub struct Cli {
    /// File that receives a copy of every log line ('-' disables it)
    #[arg(long = "log-file", global = true, default_value = "geo_ingest.log")]
    pub log_file: String,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load one file (csv, json, geojson, kml, kmz, shp) into a table
    Load(LoadArgs),
    /// Load every supported file under a directory, skipping files already in the ledger
    Scan(ScanArgs),
}

/// Options shared by every command that writes to the store.
#[derive(Debug, Args)]
pub struct OutputArgs {
    /// Print the SQL script to stdout instead of executing it
    #[arg(long)]
    pub dry_run: bool,
    /// Write a JSON report of every dataset to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Input file; the format is taken from its extension
    pub input: PathBuf,
    /// Destination table (normalized before use)
    pub table: String,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Directory to walk recursively
    pub dir: PathBuf,
    /// Ledger of already processed files
    #[arg(long, default_value = DEFAULT_LEDGER)]
    pub ledger: PathBuf,
    #[command(flatten)]
    pub output: OutputArgs,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
