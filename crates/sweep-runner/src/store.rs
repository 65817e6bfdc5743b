use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{IngestError, IngestResult};
use crate::parser::{Record, FILE_COLUMN};

pub const RESULTS_DB_FILE: &str = "_results.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_directory(directory: &Path) -> Self {
        Self::new(directory.join(RESULTS_DB_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn acquire(&self) -> IngestResult<StoreSession> {
        let conn = Connection::open(&self.path).map_err(|source| IngestError::StoreOpen {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), "opened results store");
        Ok(StoreSession {
            conn,
            path: self.path.clone(),
            released: false,
        })
    }

    pub fn with_session<T>(
        &self,
        body: impl FnOnce(&mut Connection) -> IngestResult<T>,
    ) -> IngestResult<T> {
        let mut session = self.acquire()?;
        let out = body(session.connection_mut())?;
        session.close()?;
        Ok(out)
    }
}

// Dropping a session commits any pending transaction before the connection closes.
pub struct StoreSession {
    conn: Connection,
    path: PathBuf,
    released: bool,
}

impl StoreSession {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn close(mut self) -> IngestResult<()> {
        self.released = true;
        commit_pending(&self.conn)?;
        debug!(path = %self.path.display(), "closed results store");
        Ok(())
    }
}

impl std::ops::Deref for StoreSession {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for StoreSession {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = commit_pending(&self.conn) {
            warn!(path = %self.path.display(), error = %err, "commit on release failed");
        }
    }
}

fn commit_pending(conn: &Connection) -> rusqlite::Result<()> {
    if !conn.is_autocommit() {
        conn.execute_batch("COMMIT")?;
    }
    Ok(())
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        nested => SqlValue::Text(nested.to_string()),
    }
}

pub(crate) fn collect_columns(records: &[Record]) -> Vec<String> {
    let mut columns = vec![FILE_COLUMN.to_string()];
    for record in records {
        for key in record.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn column_affinity(records: &[Record], column: &str) -> &'static str {
    let mut saw_float = false;
    let mut saw_any = false;
    for value in records.iter().filter_map(|r| r.get(column)) {
        match value {
            Value::Null => continue,
            Value::Bool(_) => {}
            Value::Number(n) if n.is_i64() => {}
            Value::Number(_) => saw_float = true,
            _ => return "TEXT",
        }
        saw_any = true;
    }
    match (saw_any, saw_float) {
        (false, _) => "TEXT",
        (true, true) => "REAL",
        (true, false) => "INTEGER",
    }
}

pub(crate) fn replace_table(
    conn: &Connection,
    table: &str,
    records: &[Record],
    primary_key: Option<&str>,
) -> IngestResult<()> {
    let columns = collect_columns(records);
    let defs: Vec<String> = columns
        .iter()
        .map(|col| {
            if Some(col.as_str()) == primary_key {
                format!("{} INTEGER PRIMARY KEY", quote_ident(col))
            } else {
                format!("{} {}", quote_ident(col), column_affinity(records, col))
            }
        })
        .collect();
    conn.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)), [])?;
    conn.execute(
        &format!("CREATE TABLE {} ({})", quote_ident(table), defs.join(", ")),
        [],
    )?;
    insert_records(conn, table, &columns, records)
}

/// Insert records into an existing table; absent columns are stored as NULL.
pub(crate) fn insert_records(
    conn: &Connection,
    table: &str,
    columns: &[String],
    records: &[Record],
) -> IngestResult<()> {
    if records.is_empty() {
        return Ok(());
    }
    let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let slots: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        names.join(", "),
        slots.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    for record in records {
        let values = columns
            .iter()
            .map(|c| record.get(c).map(to_sql_value).unwrap_or(SqlValue::Null));
        stmt.execute(params_from_iter(values))?;
    }
    debug!(table, rows = records.len(), "inserted records");
    Ok(())
}
