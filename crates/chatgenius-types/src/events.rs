use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::Session;
use crate::query::Table;

/// Kind of row change reported by the realtime feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Which change kinds a subscription wants to hear about. `All` is the `*` filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventFilter {
    #[default]
    All,
    Only(ChangeKind),
}

impl EventFilter {
    pub fn matches(&self, kind: ChangeKind) -> bool {
        match self {
            Self::All => true,
            Self::Only(k) => *k == kind,
        }
    }
}

/// A row change published for a table.
///
/// `new` carries the row after the change (absent for deletes), `old` the row
/// before it (absent for inserts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub new: Option<Value>,
    pub old: Option<Value>,
    pub commit_timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn insert(table: Table, row: Value) -> Self {
        Self {
            table,
            kind: ChangeKind::Insert,
            new: Some(row),
            old: None,
            commit_timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
}

/// Auth-state notification: what happened and the session that resulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

/// Callback invoked for each matching row change.
pub type ChangeHandler = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Callback invoked for each auth-state change.
pub type AuthHandler = Arc<dyn Fn(AuthChange) + Send + Sync>;

/// Opaque handle for a live subscription (change feed or auth state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(Uuid);

impl SubscriptionHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for SubscriptionHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matching() {
        assert!(EventFilter::All.matches(ChangeKind::Delete));
        assert!(EventFilter::Only(ChangeKind::Insert).matches(ChangeKind::Insert));
        assert!(!EventFilter::Only(ChangeKind::Insert).matches(ChangeKind::Update));
    }

    #[test]
    fn change_kind_wire_names() {
        let json = serde_json::to_string(&ChangeKind::Insert).unwrap();
        assert_eq!(json, "\"INSERT\"");
        let json = serde_json::to_string(&AuthEvent::SignedOut).unwrap();
        assert_eq!(json, "\"SIGNED_OUT\"");
    }
}
