//! Generic JSON access to the public tables.
//!
//! Column names are checked against `Table::columns()` before they are
//! spliced into SQL; values always go through bound parameters.

use anyhow::{Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params_from_iter};
use serde_json::{Map, Number, Value};
use uuid::Uuid;

use chatgenius_types::query::{Query, Table};

use crate::{Database, format_timestamp};

impl Database {
    /// Run a read query and return each row as a JSON object.
    pub fn select(&self, query: &Query) -> Result<Vec<Value>> {
        self.with_conn(|conn| query_select(conn, query))
    }

    /// Insert a record, filling `id` and `created_at` when absent.
    /// Returns the stored row.
    pub fn insert(&self, table: Table, record: &Map<String, Value>) -> Result<Value> {
        self.with_conn(|conn| query_insert(conn, table, record))
    }

    /// Insert a record and hand the stored row to `on_commit` before the
    /// connection is released. Callbacks therefore run in commit order.
    pub fn insert_with<F>(&self, table: Table, record: &Map<String, Value>, on_commit: F) -> Result<Value>
    where
        F: FnOnce(&Value),
    {
        self.with_conn(|conn| {
            let row = query_insert(conn, table, record)?;
            on_commit(&row);
            Ok(row)
        })
    }
}

fn column_list(table: Table) -> String {
    table.columns().join(", ")
}

fn checked_column<'a>(table: Table, column: &'a str) -> Result<&'a str> {
    if table.has_column(column) {
        Ok(column)
    } else {
        bail!("Unknown column `{}` on table `{}`", column, table)
    }
}

fn query_select(conn: &Connection, query: &Query) -> Result<Vec<Value>> {
    let table = query.table;
    let mut sql = format!("SELECT {} FROM {}", column_list(table), table);

    let mut params = Vec::with_capacity(query.filters.len());
    for (i, filter) in query.filters.iter().enumerate() {
        let column = checked_column(table, &filter.column)?;
        sql.push_str(if i == 0 { " WHERE " } else { " AND " });
        sql.push_str(&format!("{} = ?{}", column, i + 1));
        params.push(json_to_sql(&filter.value)?);
    }

    if let Some(order) = &query.order {
        let column = checked_column(table, &order.column)?;
        let dir = if order.ascending { "ASC" } else { "DESC" };
        // rowid keeps rows with equal keys in insertion order
        sql.push_str(&format!(" ORDER BY {} {}, rowid {}", column, dir, dir));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params), |row| row_to_json(table, row))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_insert(conn: &Connection, table: Table, record: &Map<String, Value>) -> Result<Value> {
    let mut record = record.clone();
    let id = match record.get("id") {
        Some(Value::String(id)) => Uuid::parse_str(id)
            .map_err(|e| anyhow!("`id` must be a UUID, got {:?}: {}", id, e))?
            .to_string(),
        Some(other) => bail!("`id` must be a string, got {}", other),
        None => Uuid::new_v4().to_string(),
    };
    record.insert("id".into(), Value::String(id.clone()));

    // normalized so that text order stays chronological
    let created_at = match record.get("created_at") {
        Some(Value::String(ts)) => DateTime::parse_from_rfc3339(ts)
            .map_err(|e| anyhow!("`created_at` must be RFC 3339, got {:?}: {}", ts, e))?
            .with_timezone(&Utc),
        Some(other) => bail!("`created_at` must be a string, got {}", other),
        None => Utc::now(),
    };
    record.insert("created_at".into(), Value::String(format_timestamp(created_at)));

    let mut columns = Vec::with_capacity(record.len());
    let mut params = Vec::with_capacity(record.len());
    for (column, value) in &record {
        columns.push(checked_column(table, column)?);
        params.push(json_to_sql(value)?);
    }
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    );
    conn.execute(&sql, params_from_iter(params))?;

    query_row_by_id(conn, table, &id)?
        .ok_or_else(|| anyhow!("Row vanished after insert: {}.{}", table, id))
}

pub(crate) fn query_row_by_id(conn: &Connection, table: Table, id: &str) -> Result<Option<Value>> {
    let sql = format!("SELECT {} FROM {} WHERE id = ?1", column_list(table), table);
    let row = conn
        .query_row(&sql, [id], |row| row_to_json(table, row))
        .optional()?;
    Ok(row)
}

fn row_to_json(table: Table, row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    let mut obj = Map::new();
    for (i, column) in table.columns().iter().enumerate() {
        let value = match row.get::<_, SqlValue>(i)? {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(n) => Value::Number(n.into()),
            SqlValue::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
            SqlValue::Text(s) => Value::String(s),
            SqlValue::Blob(b) => Value::String(B64.encode(b)),
        };
        obj.insert((*column).to_string(), value);
    }
    Ok(Value::Object(obj))
}

fn json_to_sql(value: &Value) -> Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => bail!("Nested values are not supported: {}", value),
    })
}
