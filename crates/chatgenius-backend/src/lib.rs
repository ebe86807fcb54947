//! The backend collaborator the chat view talks to: auth, table reads and
//! writes, and realtime change subscriptions.
//!
//! `Backend` is the seam; `LocalBackend` is a self-hosted implementation on
//! SQLite with an in-process realtime dispatcher.

pub mod auth;
pub mod local;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use chatgenius_types::events::{AuthHandler, ChangeHandler, EventFilter, SubscriptionHandle};
use chatgenius_types::models::{Session, User};
use chatgenius_types::query::{Query, Table};

pub use local::LocalBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("not signed in")]
    NotAuthenticated,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("username `{0}` is already taken")]
    UsernameTaken(String),

    #[error("sign-up rejected: {0}")]
    InvalidSignUp(&'static str),

    #[error("insert into `{table}` rejected: {reason}")]
    Rejected { table: Table, reason: String },

    #[error("query on `{table}` failed: {reason}")]
    Query { table: Table, reason: String },

    #[error("malformed `{table}` row: {source}")]
    MalformedRow {
        table: Table,
        #[source]
        source: serde_json::Error,
    },

    #[error("subscription failed: {0}")]
    Subscription(String),

    #[error("auth module error: {0}")]
    Auth(String),
}

/// Everything the chat front-end needs from its hosted backend.
#[async_trait]
pub trait Backend: Send + Sync {
    // -- Auth --

    /// Current session, or `None` when signed out or the token no longer verifies.
    async fn get_session(&self) -> Result<Option<Session>, BackendError>;

    /// Register for auth-state changes until `unsubscribe` is called.
    fn on_auth_state_change(&self, handler: AuthHandler) -> Result<SubscriptionHandle, BackendError>;

    /// The user behind the current session.
    async fn get_current_user(&self) -> Result<User, BackendError>;

    async fn sign_up(&self, username: &str, password: &str) -> Result<Session, BackendError>;

    async fn sign_in_with_password(&self, username: &str, password: &str) -> Result<Session, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;

    // -- Tables --

    async fn select(&self, query: Query) -> Result<Vec<Value>, BackendError>;

    /// Insert one row. `id` and `created_at` are assigned by the backend.
    async fn insert(&self, table: Table, record: Value) -> Result<(), BackendError>;

    // -- Realtime --

    /// Deliver every change on `table` passing `filter` to `handler`, in
    /// commit order. Not filtered by row content.
    fn subscribe_to_changes(
        &self,
        table: Table,
        filter: EventFilter,
        handler: ChangeHandler,
    ) -> Result<SubscriptionHandle, BackendError>;

    /// Release a change or auth subscription. Unknown handles are ignored.
    fn unsubscribe(&self, handle: SubscriptionHandle);
}

/// Decode JSON rows returned by `select` into typed models.
pub fn decode_rows<T: DeserializeOwned>(table: Table, rows: Vec<Value>) -> Result<Vec<T>, BackendError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(|source| BackendError::MalformedRow { table, source }))
        .collect()
}
