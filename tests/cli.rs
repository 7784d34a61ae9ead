mod common;

use std::fs;

use assert_cmd::Command;
use common::{TestWorkspace, fixture_path};
use predicates::prelude::*;
use predicates::str::contains;

fn geo_ingest(workspace: &TestWorkspace) -> Command {
    let mut cmd = Command::cargo_bin("geo-ingest").expect("binary exists");
    cmd.current_dir(workspace.path()).env_remove("RUST_LOG");
    cmd
}

#[test]
fn dry_run_prints_sql_script() {
    let workspace = TestWorkspace::new();
    let input = fixture_path("escuelas.csv");
    geo_ingest(&workspace)
        .args(["load", input.to_str().unwrap(), "Escuelas", "--dry-run"])
        .assert()
        .success()
        .stdout(contains("DROP TABLE IF EXISTS \"escuelas\";"))
        .stdout(contains(
            "SELECT AddGeometryColumn('escuelas', 'the_geom_point', 4326, 'POINT', 2);",
        ))
        .stdout(contains("ALTER TABLE \"escuelas\" RENAME COLUMN \"the_geom_point\" TO \"the_geom\";"))
        .stdout(contains("ANALYZE \"escuelas\";"))
        .stderr(contains("not numeric"));
}

#[test]
fn log_lines_are_copied_to_log_file() {
    let workspace = TestWorkspace::new();
    let input = workspace.copy_fixture("rutas.kml");
    let log_path = workspace.path().join("carga.log");
    geo_ingest(&workspace)
        .args([
            "--log-file",
            log_path.to_str().unwrap(),
            "load",
            input.to_str().unwrap(),
            "rutas",
            "--dry-run",
        ])
        .assert()
        .success();

    let log = fs::read_to_string(&log_path).expect("read log");
    assert!(log.contains("into 'rutas'"));
    assert!(log.contains("2 rows inserted"));
}

#[test]
fn default_log_file_lands_in_working_directory() {
    let workspace = TestWorkspace::new();
    let input = fixture_path("sitios.geojson");
    geo_ingest(&workspace)
        .args(["load", input.to_str().unwrap(), "sitios", "--dry-run"])
        .assert()
        .success();
    assert!(workspace.path().join("geo_ingest.log").exists());
}

#[test]
fn missing_input_fails_without_sql() {
    let workspace = TestWorkspace::new();
    geo_ingest(&workspace)
        .args(["--log-file", "-", "load", "no_existe.csv", "t", "--dry-run"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(contains("does not exist"))
        .stderr(contains("error: 1 of 1 dataset(s) failed to load"));
    assert!(!workspace.path().join("geo_ingest.log").exists());
}

#[test]
fn unsupported_extension_is_reported() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("tabla.xlsx", "not a workbook at all");
    geo_ingest(&workspace)
        .args(["--log-file", "-", "load", input.to_str().unwrap(), "t", "--dry-run"])
        .assert()
        .failure()
        .stderr(contains("Unsupported file format 'xlsx'"));
}

#[test]
fn report_is_written_as_json() {
    let workspace = TestWorkspace::new();
    let input = fixture_path("escuelas.csv");
    let report_path = workspace.path().join("reporte.json");
    geo_ingest(&workspace)
        .args([
            "--log-file",
            "-",
            "load",
            input.to_str().unwrap(),
            "escuelas",
            "--dry-run",
            "--report",
            report_path.to_str().unwrap(),
        ])
        .assert()
        .success();

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report_path).expect("read report"))
            .expect("parse report");
    let entry = &report[0];
    assert_eq!(entry["status"], "loaded");
    assert_eq!(entry["table"], "escuelas");
    assert_eq!(entry["report"]["rows_inserted"], 2);
    assert_eq!(entry["report"]["rows_skipped"], 1);
    assert_eq!(entry["report"]["geometry_columns"][0], "the_geom");
}

#[test]
fn custom_delimiter_is_honoured() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("puntos.csv", "nombre;lat;lon\nA;19.4;-99.1\n");
    geo_ingest(&workspace)
        .args([
            "--log-file",
            "-",
            "load",
            input.to_str().unwrap(),
            "puntos",
            "--dry-run",
            "--delimiter",
            ";",
        ])
        .assert()
        .success()
        .stdout(contains("ST_SetSRID(ST_MakePoint(-99.1,19.4),4326)"));
}

#[test]
fn scan_dry_run_loads_each_file_and_leaves_ledger_untouched() {
    let workspace = TestWorkspace::new();
    workspace.write("datos/puntos.csv", "nombre,lat,lon\nA,19.4,-99.1\n");
    workspace.write("datos/sub/sitios.geojson", &fs::read_to_string(fixture_path("sitios.geojson")).expect("fixture"));
    workspace.write("datos/notas.txt", "ignored entirely");
    geo_ingest(&workspace)
        .args(["--log-file", "-", "scan", "datos", "--dry-run"])
        .assert()
        .success()
        .stdout(contains("CREATE TABLE \"puntos\""))
        .stdout(contains("CREATE TABLE \"sitios\""))
        .stdout(contains("notas").not());
    assert!(!workspace.path().join("processed_files").exists());
}

#[test]
fn scan_skips_files_listed_in_ledger() {
    let workspace = TestWorkspace::new();
    workspace.write("datos/puntos.csv", "nombre,lat,lon\nA,19.4,-99.1\n");
    workspace.write("datos/otros.csv", "nombre,lat,lon\nB,19.5,-99.2\n");
    let ledger = workspace.write("ya_cargados", "puntos.csv\n");
    geo_ingest(&workspace)
        .args([
            "--log-file",
            "-",
            "scan",
            "datos",
            "--dry-run",
            "--ledger",
            ledger.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(contains("CREATE TABLE \"otros\""))
        .stdout(contains("\"puntos\"").not());
}

#[test]
fn load_requires_table_argument() {
    let workspace = TestWorkspace::new();
    geo_ingest(&workspace)
        .args(["load", "solo_entrada.csv"])
        .assert()
        .failure()
        .stderr(contains("<TABLE>"));
}
