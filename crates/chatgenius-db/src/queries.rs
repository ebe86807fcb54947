use crate::models::CredentialRow;
use crate::{Database, format_timestamp};
use anyhow::{Result, anyhow};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;

use chatgenius_types::query::Table;

impl Database {
    // -- Users --

    /// Create a user and its credential in one transaction.
    /// Returns the public `users` row.
    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<Value> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)",
                (id, username, format_timestamp(Utc::now())),
            )?;
            tx.execute(
                "INSERT INTO credentials (user_id, password) VALUES (?1, ?2)",
                (id, password_hash),
            )?;
            let row = crate::table::query_row_by_id(&tx, Table::Users, id)?
                .ok_or_else(|| anyhow!("User vanished after insert: {}", id))?;
            tx.commit()?;
            Ok(row)
        })
    }

    pub fn get_credentials_by_username(&self, username: &str) -> Result<Option<CredentialRow>> {
        self.with_conn(|conn| query_credentials_by_username(conn, username))
    }

    pub fn get_username_by_id(&self, id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let name = conn
                .query_row("SELECT username FROM users WHERE id = ?1", [id], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(name)
        })
    }
}

fn query_credentials_by_username(conn: &Connection, username: &str) -> Result<Option<CredentialRow>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.username, c.password
         FROM users u
         JOIN credentials c ON c.user_id = u.id
         WHERE u.username = ?1",
    )?;

    let row = stmt
        .query_row([username], |row| {
            Ok(CredentialRow {
                user_id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
            })
        })
        .optional()?;

    Ok(row)
}
