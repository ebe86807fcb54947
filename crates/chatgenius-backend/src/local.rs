use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use chatgenius_db::Database;
use chatgenius_realtime::Dispatcher;
use chatgenius_types::events::{
    AuthChange, AuthEvent, AuthHandler, ChangeEvent, ChangeHandler, EventFilter, SubscriptionHandle,
};
use chatgenius_types::models::{Session, User};
use chatgenius_types::query::{Query, Table};

use crate::auth;
use crate::{Backend, BackendError};

/// Self-hosted backend: SQLite tables, password auth with JWT sessions, and
/// an in-process realtime dispatcher that publishes every committed insert.
pub struct LocalBackend {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    jwt_secret: String,
    session_ttl: Duration,
    session: RwLock<Option<Session>>,
}

impl LocalBackend {
    pub fn new(db: Database, jwt_secret: impl Into<String>, session_ttl: Duration) -> Self {
        Self {
            db: Arc::new(db),
            dispatcher: Dispatcher::new(),
            jwt_secret: jwt_secret.into(),
            session_ttl,
            session: RwLock::new(None),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run blocking DB work off the async runtime.
    async fn run_db<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?
    }

    /// Claims of the current session, if its token still verifies.
    async fn current_claims(&self) -> Result<auth::Claims, BackendError> {
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(BackendError::NotAuthenticated)?;
        auth::verify_token(&self.jwt_secret, &session.access_token)
            .map_err(|_| BackendError::NotAuthenticated)
    }

    async fn start_session(&self, user: User) -> Result<Session, BackendError> {
        let (access_token, expires_at) =
            auth::create_token(&self.jwt_secret, user.id, &user.username, self.session_ttl)
                .map_err(|e| BackendError::Auth(e.to_string()))?;
        let session = Session {
            access_token,
            user,
            expires_at,
        };

        *self.session.write().await = Some(session.clone());
        info!("{} ({}) signed in", session.user.username, session.user.id);
        self.dispatcher.publish_auth(AuthChange {
            event: AuthEvent::SignedIn,
            session: Some(session.clone()),
        });
        Ok(session)
    }

    async fn end_session(&self) {
        let previous = self.session.write().await.take();
        if let Some(session) = previous {
            info!("{} ({}) signed out", session.user.username, session.user.id);
            self.dispatcher.publish_auth(AuthChange {
                event: AuthEvent::SignedOut,
                session: None,
            });
        }
    }
}

/// Column that names the row's owner; writes must match the signed-in user.
fn owner_column(table: Table) -> Option<&'static str> {
    match table {
        Table::Channels => Some("created_by"),
        Table::Messages => Some("user_id"),
        Table::Users => None,
    }
}

/// Filled in by storage on every insert.
const SERVER_COLUMNS: [&str; 2] = ["id", "created_at"];

#[async_trait]
impl Backend for LocalBackend {
    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        let valid = {
            let guard = self.session.read().await;
            match guard.as_ref() {
                None => return Ok(None),
                Some(session) => auth::verify_token(&self.jwt_secret, &session.access_token)
                    .is_ok()
                    .then(|| session.clone()),
            }
        };

        if valid.is_none() {
            warn!("Session token no longer verifies, dropping session");
            self.end_session().await;
        }
        Ok(valid)
    }

    fn on_auth_state_change(&self, handler: AuthHandler) -> Result<SubscriptionHandle, BackendError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(BackendError::Subscription("no async runtime".into()));
        }
        Ok(self.dispatcher.subscribe_auth(handler))
    }

    async fn get_current_user(&self) -> Result<User, BackendError> {
        let claims = self.current_claims().await?;
        let id = claims.sub.to_string();
        let username = self
            .run_db(move |db| db.get_username_by_id(&id))
            .await
            .map_err(|e| BackendError::Auth(e.to_string()))?
            .ok_or(BackendError::NotAuthenticated)?;
        Ok(User {
            id: claims.sub,
            username,
        })
    }

    async fn sign_up(&self, username: &str, password: &str) -> Result<Session, BackendError> {
        auth::validate_sign_up(username, password)?;

        let name = username.to_string();
        let existing = self
            .run_db(move |db| db.get_credentials_by_username(&name))
            .await
            .map_err(|e| BackendError::Auth(e.to_string()))?;
        if existing.is_some() {
            return Err(BackendError::UsernameTaken(username.to_string()));
        }

        let pass = password.to_string();
        let hash = tokio::task::spawn_blocking(move || auth::hash_password(&pass))
            .await
            .map_err(|e| BackendError::Auth(e.to_string()))?
            .map_err(|e| BackendError::Auth(e.to_string()))?;

        let user_id = Uuid::new_v4();
        let (id, name) = (user_id.to_string(), username.to_string());
        let row = self
            .run_db(move |db| db.create_user(&id, &name, &hash))
            .await
            .map_err(|e| BackendError::Rejected {
                table: Table::Users,
                reason: e.to_string(),
            })?;
        self.dispatcher.publish_change(ChangeEvent::insert(Table::Users, row));

        self.start_session(User {
            id: user_id,
            username: username.to_string(),
        })
        .await
    }

    async fn sign_in_with_password(&self, username: &str, password: &str) -> Result<Session, BackendError> {
        let name = username.to_string();
        let cred = self
            .run_db(move |db| db.get_credentials_by_username(&name))
            .await
            .map_err(|e| BackendError::Auth(e.to_string()))?
            .ok_or(BackendError::InvalidCredentials)?;

        let pass = password.to_string();
        let hash = cred.password.clone();
        let verified = tokio::task::spawn_blocking(move || auth::verify_password(&pass, &hash))
            .await
            .map_err(|e| BackendError::Auth(e.to_string()))?;
        if !verified {
            return Err(BackendError::InvalidCredentials);
        }

        let id: Uuid = cred
            .user_id
            .parse()
            .map_err(|e| BackendError::Auth(format!("corrupt user id '{}': {}", cred.user_id, e)))?;
        self.start_session(User {
            id,
            username: cred.username,
        })
        .await
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.end_session().await;
        Ok(())
    }

    async fn select(&self, query: Query) -> Result<Vec<Value>, BackendError> {
        let table = query.table;
        self.run_db(move |db| db.select(&query))
            .await
            .map_err(|e| {
                error!("select on {} failed: {}", table, e);
                BackendError::Query {
                    table,
                    reason: e.to_string(),
                }
            })
    }

    async fn insert(&self, table: Table, record: Value) -> Result<(), BackendError> {
        let claims = self.current_claims().await?;
        let reject = |reason: &str| BackendError::Rejected {
            table,
            reason: reason.to_string(),
        };

        let Value::Object(record) = record else {
            return Err(reject("record must be a JSON object"));
        };
        let Some(owner) = owner_column(table) else {
            return Err(reject("users are created through sign-up"));
        };
        if let Some(column) = SERVER_COLUMNS.iter().find(|c| record.contains_key(**c)) {
            return Err(reject(&format!("`{}` is assigned by the server", column)));
        }
        let owned = record
            .get(owner)
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<Uuid>().ok())
            .is_some_and(|id| id == claims.sub);
        if !owned {
            return Err(reject("row violates ownership policy"));
        }

        // published under the connection lock so subscribers see commit order
        let dispatcher = self.dispatcher.clone();
        let row = self
            .run_db(move |db| {
                db.insert_with(table, &record, |row| {
                    dispatcher.publish_change(ChangeEvent::insert(table, row.clone()))
                })
            })
            .await
            .map_err(|e| reject(&e.to_string()))?;
        debug!("Inserted into {}: {}", table, row["id"]);
        Ok(())
    }

    fn subscribe_to_changes(
        &self,
        table: Table,
        filter: EventFilter,
        handler: ChangeHandler,
    ) -> Result<SubscriptionHandle, BackendError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(BackendError::Subscription("no async runtime".into()));
        }
        Ok(self.dispatcher.subscribe_changes(table, filter, handler))
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        if !self.dispatcher.unsubscribe(handle) {
            debug!("Subscription {} was already released", handle.id());
        }
    }
}
