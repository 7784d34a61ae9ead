use anyhow::{Context, Result};
use serde::Serialize;

use crate::io_utils::DEFAULT_CSV_DELIMITER;

pub const DEFAULT_GEOMETRY_COLUMN: &str = "the_geom";
pub const DEFAULT_SRID: u32 = 4326;
/// Files smaller than this are treated as empty.
pub const MIN_FILE_SIZE: u64 = 5;

/// Connection parameters for the destination database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
}

impl ConnectionConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads `POSTGRES_*` keys through `lookup`, falling back to defaults for absent keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let port = match lookup("POSTGRES_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("Parsing POSTGRES_PORT value '{raw}'"))?,
            None => 5432,
        };
        Ok(Self {
            host: value("POSTGRES_HOST", "172.17.0.1"),
            port,
            dbname: value("POSTGRES_DBNAME", "hamelin"),
            user: value("POSTGRES_USER", "postgres"),
            password: value("POSTGRES_PASSWORD", ""),
        })
    }

    pub fn to_pg_config(&self) -> postgres::Config {
        let mut config = postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.dbname)
            .user(&self.user);
        if !self.password.is_empty() {
            config.password(&self.password);
        }
        config
    }

    /// `user@host:port/dbname`, never including the password.
    pub fn describe(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.dbname)
    }
}

/// Per-run constants shared by every dataset.
#[derive(Debug, Clone, Serialize)]
pub struct LoadSettings {
    pub geometry_column: String,
    pub srid: u32,
    pub delimiter: u8,
    pub min_file_size: u64,
    pub shp2pgsql: String,
    pub ogr2ogr: String,
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            geometry_column: DEFAULT_GEOMETRY_COLUMN.to_string(),
            srid: DEFAULT_SRID,
            delimiter: DEFAULT_CSV_DELIMITER,
            min_file_size: MIN_FILE_SIZE,
            shp2pgsql: "shp2pgsql".to_string(),
            ogr2ogr: "ogr2ogr".to_string(),
        }
    }
}

impl LoadSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults with the converter executables overridable via `SHP2PGSQL` and `OGR2OGR`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        if let Some(tool) = lookup("SHP2PGSQL").filter(|v| !v.trim().is_empty()) {
            settings.shp2pgsql = tool;
        }
        if let Some(tool) = lookup("OGR2OGR").filter(|v| !v.trim().is_empty()) {
            settings.ogr2ogr = tool;
        }
        settings
    }

    /// Column that holds geometries of `suffix` while more than one type may appear.
    pub fn typed_geometry_column(&self, suffix: &str) -> String {
        format!("{}_{suffix}", self.geometry_column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn connection_defaults_apply_when_unset() {
        let config = ConnectionConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.host, "172.17.0.1");
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "hamelin");
        assert_eq!(config.user, "postgres");
        assert_eq!(config.password, "");
        assert_eq!(config.describe(), "postgres@172.17.0.1:5432/hamelin");
    }

    #[test]
    fn connection_values_are_overridden() {
        let config = ConnectionConfig::from_lookup(lookup(&[
            ("POSTGRES_HOST", "db"),
            ("POSTGRES_PORT", "6543"),
            ("POSTGRES_PASSWORD", "secret"),
        ]))
        .unwrap();
        assert_eq!(config.host, "db");
        assert_eq!(config.port, 6543);
        assert!(!config.describe().contains("secret"));
    }

    #[test]
    fn invalid_port_is_reported() {
        let err = ConnectionConfig::from_lookup(lookup(&[("POSTGRES_PORT", "abc")])).unwrap_err();
        assert!(err.to_string().contains("POSTGRES_PORT"));
    }

    #[test]
    fn converter_tools_can_be_overridden() {
        let settings = LoadSettings::from_lookup(lookup(&[("SHP2PGSQL", "/opt/postgis/shp2pgsql")]));
        assert_eq!(settings.shp2pgsql, "/opt/postgis/shp2pgsql");
        assert_eq!(settings.ogr2ogr, "ogr2ogr");
        assert_eq!(settings.typed_geometry_column("point"), "the_geom_point");
        assert_eq!(settings.min_file_size, 5);
    }
}
