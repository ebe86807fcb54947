//! In-process backend with scripted data, call recording and manual event
//! emission.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

use chatgenius_backend::{Backend, BackendError};
use chatgenius_client::{ClientError, ViewHandle, ViewState};
use chatgenius_types::events::{
    AuthChange, AuthEvent, AuthHandler, ChangeEvent, ChangeHandler, EventFilter, SubscriptionHandle,
};
use chatgenius_types::models::{Channel, Message, Session, User};
use chatgenius_types::query::{Query, Table};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetSession,
    GetCurrentUser,
    SignUp,
    SignIn,
    SignOut,
    Select(Query),
    Insert(Table, Value),
    SubscribeAuth(SubscriptionHandle),
    SubscribeChanges(SubscriptionHandle),
    Unsubscribe(SubscriptionHandle),
    HistoryServed(Uuid),
}

pub struct ScriptedBackend {
    pub user: User,
    session: Mutex<Option<Session>>,
    channels: Mutex<Vec<Channel>>,
    users: Mutex<Vec<User>>,
    history: Mutex<HashMap<Uuid, Vec<Message>>>,
    history_open: watch::Sender<bool>,
    fail_history: AtomicBool,
    fail_insert: AtomicBool,
    calls: Mutex<Vec<Call>>,
    auth_handlers: Mutex<HashMap<SubscriptionHandle, AuthHandler>>,
    change_handlers: Mutex<HashMap<SubscriptionHandle, ChangeHandler>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".into(),
        };
        Self {
            users: Mutex::new(vec![user.clone()]),
            user,
            session: Mutex::new(None),
            channels: Mutex::new(Vec::new()),
            history: Mutex::new(HashMap::new()),
            history_open: watch::Sender::new(true),
            fail_history: AtomicBool::new(false),
            fail_insert: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            auth_handlers: Mutex::new(HashMap::new()),
            change_handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Start with a signed-in session.
    pub fn signed_in() -> Self {
        let backend = Self::new();
        *backend.session.lock().unwrap() = Some(backend.session_for_user());
        backend
    }

    fn session_for_user(&self) -> Session {
        Session {
            access_token: "scripted-token".into(),
            user: self.user.clone(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }
    }

    pub fn add_channel(&self, name: &str, minute: u32) -> Channel {
        let channel = Channel {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            created_at: at(minute, 0),
            created_by: self.user.id,
        };
        self.channels.lock().unwrap().push(channel.clone());
        channel
    }

    pub fn set_history(&self, channel_id: Uuid, messages: Vec<Message>) {
        self.history.lock().unwrap().insert(channel_id, messages);
    }

    /// Hold every history fetch until `release_history`.
    pub fn hold_history(&self) {
        self.history_open.send_replace(false);
    }

    pub fn release_history(&self) {
        self.history_open.send_replace(true);
    }

    pub fn fail_history(&self, fail: bool) {
        self.fail_history.store(fail, Ordering::SeqCst);
    }

    pub fn fail_insert(&self, fail: bool) {
        self.fail_insert.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| matches(c)).count()
    }

    pub fn selects_on(&self, table: Table) -> usize {
        self.count(|c| matches!(c, Call::Select(q) if q.table == table))
    }

    pub fn inserts(&self) -> Vec<(Table, Value)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                Call::Insert(table, record) => Some((*table, record.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn auth_subscriptions(&self) -> usize {
        self.auth_handlers.lock().unwrap().len()
    }

    pub fn change_subscriptions(&self) -> Vec<SubscriptionHandle> {
        self.change_handlers.lock().unwrap().keys().copied().collect()
    }

    /// Handlers registered right now, for delivering after they are released.
    pub fn change_handlers(&self) -> Vec<ChangeHandler> {
        self.change_handlers.lock().unwrap().values().cloned().collect()
    }

    /// Deliver `event` to every change subscriber, as the realtime feed would.
    pub fn emit(&self, event: ChangeEvent) {
        let handlers: Vec<ChangeHandler> = self.change_handlers.lock().unwrap().values().cloned().collect();
        for handler in handlers {
            handler(event.clone());
        }
    }

    pub fn emit_message(&self, message: &Message) {
        self.emit(ChangeEvent::insert(
            Table::Messages,
            serde_json::to_value(message).unwrap(),
        ));
    }

    fn notify_auth(&self, change: AuthChange) {
        let handlers: Vec<AuthHandler> = self.auth_handlers.lock().unwrap().values().cloned().collect();
        for handler in handlers {
            handler(change.clone());
        }
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        self.record(Call::GetSession);
        Ok(self.session.lock().unwrap().clone())
    }

    fn on_auth_state_change(&self, handler: AuthHandler) -> Result<SubscriptionHandle, BackendError> {
        let handle = SubscriptionHandle::new();
        self.auth_handlers.lock().unwrap().insert(handle, handler);
        self.record(Call::SubscribeAuth(handle));
        Ok(handle)
    }

    async fn get_current_user(&self) -> Result<User, BackendError> {
        self.record(Call::GetCurrentUser);
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.user.clone())
            .ok_or(BackendError::NotAuthenticated)
    }

    async fn sign_up(&self, _username: &str, _password: &str) -> Result<Session, BackendError> {
        self.record(Call::SignUp);
        Err(BackendError::UsernameTaken("alice".into()))
    }

    async fn sign_in_with_password(&self, username: &str, password: &str) -> Result<Session, BackendError> {
        self.record(Call::SignIn);
        if username != self.user.username || password != "password1" {
            return Err(BackendError::InvalidCredentials);
        }
        let session = self.session_for_user();
        *self.session.lock().unwrap() = Some(session.clone());
        self.notify_auth(AuthChange {
            event: AuthEvent::SignedIn,
            session: Some(session.clone()),
        });
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.record(Call::SignOut);
        *self.session.lock().unwrap() = None;
        self.notify_auth(AuthChange {
            event: AuthEvent::SignedOut,
            session: None,
        });
        Ok(())
    }

    async fn select(&self, query: Query) -> Result<Vec<Value>, BackendError> {
        self.record(Call::Select(query.clone()));
        match query.table {
            Table::Channels => Ok(to_rows(&self.channels.lock().unwrap())),
            Table::Users => Ok(to_rows(&self.users.lock().unwrap())),
            Table::Messages => {
                let channel_id = query
                    .filters
                    .iter()
                    .find(|f| f.column == "channel_id")
                    .and_then(|f| f.value.as_str())
                    .and_then(|s| s.parse::<Uuid>().ok())
                    .ok_or_else(|| BackendError::Query {
                        table: Table::Messages,
                        reason: "missing channel_id filter".into(),
                    })?;

                let mut open = self.history_open.subscribe();
                let _ = open.wait_for(|open| *open).await;

                self.record(Call::HistoryServed(channel_id));
                if self.fail_history.load(Ordering::SeqCst) {
                    return Err(BackendError::Query {
                        table: Table::Messages,
                        reason: "scripted failure".into(),
                    });
                }
                let history = self.history.lock().unwrap().get(&channel_id).cloned();
                Ok(to_rows(&history.unwrap_or_default()))
            }
        }
    }

    async fn insert(&self, table: Table, record: Value) -> Result<(), BackendError> {
        self.record(Call::Insert(table, record.clone()));
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected {
                table,
                reason: "scripted failure".into(),
            });
        }
        if table == Table::Channels {
            let channel = Channel {
                id: Uuid::new_v4(),
                name: record["name"].as_str().unwrap_or_default().into(),
                description: record["description"].as_str().map(Into::into),
                created_at: Utc::now(),
                created_by: record["created_by"]
                    .as_str()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_default(),
            };
            self.channels.lock().unwrap().push(channel);
        }
        Ok(())
    }

    fn subscribe_to_changes(
        &self,
        table: Table,
        _filter: EventFilter,
        handler: ChangeHandler,
    ) -> Result<SubscriptionHandle, BackendError> {
        assert_eq!(table, Table::Messages);
        let handle = SubscriptionHandle::new();
        self.change_handlers.lock().unwrap().insert(handle, handler);
        self.record(Call::SubscribeChanges(handle));
        Ok(handle)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.auth_handlers.lock().unwrap().remove(&handle);
        self.change_handlers.lock().unwrap().remove(&handle);
        self.record(Call::Unsubscribe(handle));
    }
}

fn to_rows<T: serde::Serialize>(items: &[T]) -> Vec<Value> {
    items
        .iter()
        .map(|item| serde_json::to_value(item).unwrap())
        .collect()
}

/// Fixed timestamps so ordering in tests is explicit.
pub fn at(minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, minute, second).unwrap()
}

pub fn message(channel_id: Uuid, content: &str, second: u32) -> Message {
    Message {
        id: Uuid::new_v4(),
        channel_id,
        content: content.into(),
        created_at: at(30, second),
        user_id: Uuid::new_v4(),
    }
}

/// Wait for the view to publish a state matching `predicate`.
pub async fn settle(handle: &ViewHandle, predicate: impl FnMut(&ViewState) -> bool) -> ViewState {
    tokio::time::timeout(Duration::from_secs(2), handle.wait_for(predicate))
        .await
        .expect("view did not reach the expected state")
        .expect("view closed")
}

pub fn contents(state: &ViewState) -> Vec<&str> {
    state.messages.iter().map(|m| m.content.as_str()).collect()
}

pub fn is_validation(result: &Result<(), ClientError>) -> bool {
    matches!(result, Err(ClientError::Validation(_)))
}
