//! SQLite-backed observation store
//!
//! Ingestion switches the database to WAL so a reader's snapshot never
//! blocks appends and appends never block a reader. Each window is read by a
//! single SELECT, which sees one consistent snapshot.

use chrono::{DateTime, Utc};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::{ObservationStore, RawRecord, RawValue, StoreOpener};
use crate::config::StoreConfig;
use crate::error::{AegisError, Result};

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl From<ValueRef<'_>> for RawValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => RawValue::Null,
            ValueRef::Integer(v) => RawValue::Integer(v),
            ValueRef::Real(v) => RawValue::Real(v),
            ValueRef::Text(bytes) => RawValue::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => RawValue::Text(format!("<blob {} bytes>", bytes.len())),
        }
    }
}

impl From<&RawValue> for Value {
    fn from(value: &RawValue) -> Self {
        match value {
            RawValue::Null => Value::Null,
            RawValue::Integer(v) => Value::Integer(*v),
            RawValue::Real(v) => Value::Real(*v),
            RawValue::Text(v) => Value::Text(v.clone()),
        }
    }
}

/// Read-only handle on the predictions table
pub struct SqliteStore {
    conn: Connection,
    table: String,
    timestamp_column: String,
    columns: Vec<String>,
}

impl SqliteStore {
    /// Open read-only; a locked database is retried for at most `busy_timeout`
    pub fn open_read_only(
        path: &Path,
        table: &str,
        timestamp_column: &str,
        busy_timeout: Duration,
    ) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| AegisError::Store(format!("cannot open {}: {}", path.display(), e)))?;
        conn.busy_timeout(busy_timeout)?;

        let columns = table_columns(&conn, table)?;
        if columns.is_empty() {
            return Err(AegisError::Store(format!(
                "table '{}' not found in {}",
                table,
                path.display()
            )));
        }
        if !columns.iter().any(|c| c == timestamp_column) {
            return Err(AegisError::SchemaMismatch(format!(
                "table '{}' has no timestamp column '{}'",
                table, timestamp_column
            )));
        }

        Ok(Self {
            conn,
            table: table.to_string(),
            timestamp_column: timestamp_column.to_string(),
            columns,
        })
    }
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}

impl ObservationStore for SqliteStore {
    fn columns(&self) -> Result<Vec<String>> {
        Ok(self.columns.clone())
    }

    fn count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(&self.table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    fn latest(&self, limit: usize) -> Result<Vec<RawRecord>> {
        let data_columns: Vec<&String> = self
            .columns
            .iter()
            .filter(|c| **c != self.timestamp_column)
            .collect();

        let mut select = vec!["rowid".to_string(), quote_ident(&self.timestamp_column)];
        select.extend(data_columns.iter().map(|c| quote_ident(c)));

        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid DESC LIMIT ?1",
            select.join(", "),
            quote_ident(&self.table)
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = stmt
            .query_map([limit], |row| {
                let sequence: i64 = row.get(0)?;
                let timestamp = RawValue::from(row.get_ref(1)?);
                let mut values = Vec::with_capacity(data_columns.len());
                for (offset, column) in data_columns.iter().enumerate() {
                    values.push(((*column).clone(), RawValue::from(row.get_ref(offset + 2)?)));
                }
                Ok(RawRecord {
                    sequence,
                    timestamp,
                    values,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        debug!(table = %self.table, limit, rows = records.len(), "Read window from store");
        Ok(records)
    }
}

/// Opens a fresh [`SqliteStore`] for every cycle
#[derive(Debug, Clone)]
pub struct SqliteOpener {
    pub path: PathBuf,
    pub table: String,
    pub timestamp_column: String,
    pub busy_timeout: Duration,
}

impl SqliteOpener {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            path: config.path.clone(),
            table: config.table.clone(),
            timestamp_column: config.timestamp_column.clone(),
            busy_timeout: config.busy_timeout(),
        }
    }
}

impl StoreOpener for SqliteOpener {
    fn open(&self) -> Result<Box<dyn ObservationStore>> {
        let store = SqliteStore::open_read_only(
            &self.path,
            &self.table,
            &self.timestamp_column,
            self.busy_timeout,
        )?;
        Ok(Box::new(store))
    }

    fn describe(&self) -> String {
        format!("sqlite://{}#{}", self.path.display(), self.table)
    }
}

/// Declared SQL type of an ingested column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Real,
    Integer,
    Text,
}

impl ColumnType {
    fn sql(&self) -> &'static str {
        match self {
            ColumnType::Real => "REAL",
            ColumnType::Integer => "INTEGER",
            ColumnType::Text => "TEXT",
        }
    }
}

/// Ingestion-side writer: one row per prediction event
pub struct SqliteIngestor {
    conn: Connection,
    insert_sql: String,
    columns: Vec<String>,
}

impl SqliteIngestor {
    /// Create the table if needed and enable WAL for concurrent readers
    pub fn create(
        path: &Path,
        table: &str,
        timestamp_column: &str,
        columns: &[(String, ColumnType)],
    ) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let mut ddl = vec![format!("{} TEXT NOT NULL", quote_ident(timestamp_column))];
        ddl.extend(
            columns
                .iter()
                .map(|(name, ty)| format!("{} {}", quote_ident(name), ty.sql())),
        );
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                quote_ident(table),
                ddl.join(", ")
            ),
            [],
        )?;

        let mut names = vec![quote_ident(timestamp_column)];
        names.extend(columns.iter().map(|(name, _)| quote_ident(name)));
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            names.join(", "),
            placeholders.join(", ")
        );

        Ok(Self {
            conn,
            insert_sql,
            columns: columns.iter().map(|(name, _)| name.clone()).collect(),
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Append one observation; `values` follow the column order given at creation
    pub fn append(&self, timestamp: DateTime<Utc>, values: &[RawValue]) -> Result<i64> {
        if values.len() != self.columns.len() {
            return Err(AegisError::Store(format!(
                "expected {} values, got {}",
                self.columns.len(),
                values.len()
            )));
        }
        let mut params: Vec<Value> = Vec::with_capacity(values.len() + 1);
        params.push(Value::Text(timestamp.to_rfc3339()));
        params.extend(values.iter().map(Value::from));

        self.conn.execute(&self.insert_sql, params_from_iter(params))?;
        Ok(self.conn.last_insert_rowid())
    }
}
