//! Statement sinks.
//!
//! Every statement is executed on its own; there is no transaction around a
//! dataset, so a failure part-way through leaves the rows issued so far.

use std::io::Write;

use anyhow::{Context, Result};
use log::debug;
use postgres::{Client, NoTls};
use regex::Regex;

use crate::{config::ConnectionConfig, error::StatementError};

pub trait Persistence {
    fn execute(&mut self, statement: &str) -> Result<(), StatementError>;
}

impl<P: Persistence + ?Sized> Persistence for &mut P {
    fn execute(&mut self, statement: &str) -> Result<(), StatementError> {
        (**self).execute(statement)
    }
}

impl<P: Persistence + ?Sized> Persistence for Box<P> {
    fn execute(&mut self, statement: &str) -> Result<(), StatementError> {
        (**self).execute(statement)
    }
}

/// PostGIS-enabled PostgreSQL database in auto-commit mode.
pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        let client = config
            .to_pg_config()
            .connect(NoTls)
            .with_context(|| format!("Connecting to PostgreSQL at {}", config.describe()))?;
        Ok(Self { client })
    }
}

impl Persistence for PostgresStore {
    fn execute(&mut self, statement: &str) -> Result<(), StatementError> {
        debug!("Executing: {statement}");
        self.client.batch_execute(statement).map_err(|err| {
            let message = err
                .as_db_error()
                .map(|db| db.message().to_string())
                .unwrap_or_else(|| err.to_string());
            StatementError::new(message)
        })
    }
}

/// Writes statements as an SQL script instead of executing them.
pub struct SqlScript<W: Write> {
    out: W,
}

impl<W: Write> SqlScript<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Persistence for SqlScript<W> {
    fn execute(&mut self, statement: &str) -> Result<(), StatementError> {
        let terminated = statement.trim_end().ends_with(';');
        let result = if terminated {
            writeln!(self.out, "{statement}")
        } else {
            writeln!(self.out, "{statement};")
        };
        result.map_err(|err| StatementError::new(err.to_string()))
    }
}

/// Keeps executed statements in memory; statements matching a rejection rule fail.
#[derive(Debug, Default)]
pub struct MemoryStore {
    statements: Vec<String>,
    rejected: Vec<String>,
    rules: Vec<Regex>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule: any statement matching `pattern` is rejected.
    pub fn reject_matching(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.rules.push(Regex::new(pattern)?);
        Ok(self)
    }

    /// Statements that were accepted, in execution order.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn rejected(&self) -> &[String] {
        &self.rejected
    }

    pub fn inserts(&self) -> impl Iterator<Item = &str> {
        self.statements
            .iter()
            .map(String::as_str)
            .filter(|statement| statement.starts_with("INSERT"))
    }
}

impl Persistence for MemoryStore {
    fn execute(&mut self, statement: &str) -> Result<(), StatementError> {
        if let Some(rule) = self.rules.iter().find(|rule| rule.is_match(statement)) {
            self.rejected.push(statement.to_string());
            return Err(StatementError::new(format!(
                "statement rejected by rule '{}'",
                rule.as_str()
            )));
        }
        self.statements.push(statement.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_terminates_statements() {
        let mut script = SqlScript::new(Vec::new());
        script.execute("ANALYZE t").unwrap();
        script.execute("SET client_encoding = 'UTF8';").unwrap();
        let text = String::from_utf8(script.into_inner()).unwrap();
        assert_eq!(text, "ANALYZE t;\nSET client_encoding = 'UTF8';\n");
    }

    #[test]
    fn memory_store_applies_rejection_rules() {
        let mut store = MemoryStore::new().reject_matching("^CREATE INDEX").unwrap();
        assert!(store.execute("CREATE INDEX x ON t USING GIST (g)").is_err());
        assert!(store.execute("INSERT INTO t VALUES (1)").is_ok());
        assert_eq!(store.statements().len(), 1);
        assert_eq!(store.rejected().len(), 1);
        assert_eq!(store.inserts().count(), 1);
    }
}
