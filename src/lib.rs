pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod feature;
pub mod geo_fields;
pub mod geojson_source;
pub mod geometry;
pub mod ingest;
pub mod io_utils;
pub mod json_rows;
pub mod kml;
pub mod kmz;
pub mod metadata;
pub mod naming;
pub mod persistence;
pub mod planner;
pub mod scan;
pub mod shapefile;
pub mod sql;
pub mod tabular;

use std::{
    env,
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
    sync::OnceLock,
};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, info};

use crate::{
    cli::{Cli, Commands, LoadArgs, OutputArgs, ScanArgs},
    config::{ConnectionConfig, LoadSettings},
    ingest::{DatasetOutcome, IngestionContext},
    persistence::{Persistence, PostgresStore, SqlScript},
    scan::Ledger,
};

static LOGGER: OnceLock<()> = OnceLock::new();

/// Log sink that copies every line to stderr and to the persistent log file.
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn init_logging(log_file: Option<File>) {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("geo_ingest", LevelFilter::Info);
        }
        if let Some(file) = log_file {
            builder.target(env_logger::Target::Pipe(Box::new(TeeWriter { file })));
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

fn open_log_file(target: &str) -> Result<Option<File>> {
    if target == "-" {
        return Ok(None);
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(target)
        .with_context(|| format!("Opening log file {target:?}"))?;
    Ok(Some(file))
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(open_log_file(&cli.log_file)?);
    match cli.command {
        Commands::Load(args) => handle_load(&args),
        Commands::Scan(args) => handle_scan(&args),
    }
}

fn handle_load(args: &LoadArgs) -> Result<()> {
    let mut context = build_context(&args.output)?;
    let outcomes = context.ingest_file(&args.input, &args.table);
    conclude(&args.output, &outcomes)
}

fn handle_scan(args: &ScanArgs) -> Result<()> {
    if !args.dir.is_dir() {
        return Err(anyhow!("{:?} is not a directory", args.dir));
    }
    let mut ledger = Ledger::open(&args.ledger, !args.output.dry_run)?;
    let mut context = build_context(&args.output)?;
    let outcomes = scan::scan(&mut context, &args.dir, &mut ledger)?;
    info!("Scan of {:?} handled {} dataset(s)", args.dir, outcomes.len());
    conclude(&args.output, &outcomes)
}

fn build_context(output: &OutputArgs) -> Result<IngestionContext<Box<dyn Persistence>>> {
    let mut settings = LoadSettings::from_env();
    if let Some(delimiter) = output.delimiter {
        settings.delimiter = delimiter;
    }
    let store: Box<dyn Persistence> = if output.dry_run {
        info!("Dry run: writing SQL to stdout");
        Box::new(SqlScript::new(io::stdout()))
    } else {
        let config = ConnectionConfig::from_env()?;
        info!("Connecting to {}", config.describe());
        Box::new(PostgresStore::connect(&config)?)
    };
    Ok(IngestionContext::new(store, settings))
}

/// Writes the optional report and turns failed datasets into a non-zero exit.
fn conclude(output: &OutputArgs, outcomes: &[DatasetOutcome]) -> Result<()> {
    if let Some(path) = &output.report {
        write_report(path, outcomes)?;
    }
    let failed = outcomes.iter().filter(|outcome| !outcome.is_success()).count();
    if failed > 0 {
        return Err(anyhow!(
            "{failed} of {} dataset(s) failed to load",
            outcomes.len()
        ));
    }
    Ok(())
}

fn write_report(path: &Path, outcomes: &[DatasetOutcome]) -> Result<()> {
    let summaries: Vec<_> = outcomes.iter().map(DatasetOutcome::summary).collect();
    let file = File::create(path).with_context(|| format!("Creating report {path:?}"))?;
    serde_json::to_writer_pretty(file, &summaries)
        .with_context(|| format!("Writing report {path:?}"))?;
    info!("Report written to {path:?}");
    Ok(())
}
