use std::collections::HashSet;

use serde_json::json;
use tracing::{debug, error, warn};
use uuid::Uuid;

use chatgenius_backend::{Backend, BackendError, decode_rows};
use chatgenius_types::events::{ChangeEvent, SubscriptionHandle};
use chatgenius_types::models::Message;
use chatgenius_types::query::{Query, Table};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedPhase {
    /// No channel selected.
    #[default]
    Idle,
    /// History fetch in flight for the current selection.
    Loading,
    /// History settled; live events append directly.
    Live,
}

/// Identifies one channel selection. Fetch results and change events tagged
/// with an older ticket are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LoadTicket(u64);

/// What `apply_change` did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    Appended,
    Buffered,
    Ignored,
}

/// Message list for the active channel, kept in sync with a live feed.
#[derive(Debug, Default)]
pub struct MessageFeed {
    phase: FeedPhase,
    ticket: LoadTicket,
    messages: Vec<Message>,
    // live rows that arrived while the history was loading
    pending: Vec<Message>,
    subscription: Option<SubscriptionHandle>,
}

impl MessageFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> FeedPhase {
        self.phase
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Start loading a new selection. Clears the list and returns the
    /// selection's ticket. The previous subscription must already be detached.
    pub fn begin(&mut self) -> LoadTicket {
        debug_assert!(self.subscription.is_none(), "previous subscription still attached");
        self.ticket = LoadTicket(self.ticket.0 + 1);
        self.phase = FeedPhase::Loading;
        self.messages.clear();
        self.pending.clear();
        self.ticket
    }

    pub fn attach(&mut self, handle: SubscriptionHandle) {
        self.subscription = Some(handle);
    }

    pub fn detach(&mut self) -> Option<SubscriptionHandle> {
        self.subscription.take()
    }

    /// Merge a live event. `active` is the channel selected right now; rows
    /// for any other channel are dropped.
    pub fn apply_change(&mut self, ticket: LoadTicket, active: Option<Uuid>, event: &ChangeEvent) -> Merge {
        if ticket != self.ticket || self.phase == FeedPhase::Idle {
            return Merge::Ignored;
        }
        let Some(row) = &event.new else {
            return Merge::Ignored;
        };
        let message: Message = match serde_json::from_value(row.clone()) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping undecodable {:?} event on {}: {}", event.kind, event.table, e);
                return Merge::Ignored;
            }
        };
        if active != Some(message.channel_id) {
            return Merge::Ignored;
        }

        match self.phase {
            FeedPhase::Loading => {
                self.pending.push(message);
                Merge::Buffered
            }
            FeedPhase::Live => {
                self.messages.push(message);
                Merge::Appended
            }
            FeedPhase::Idle => Merge::Ignored,
        }
    }

    /// Settle the history fetch for `ticket`. Returns false for a stale result.
    ///
    /// Buffered live rows follow the history, minus any the history already
    /// contains. A failed fetch leaves the list empty.
    pub fn apply_history(&mut self, ticket: LoadTicket, result: Result<Vec<Message>, BackendError>) -> bool {
        if ticket != self.ticket || self.phase != FeedPhase::Loading {
            return false;
        }

        let pending = std::mem::take(&mut self.pending);
        match result {
            Ok(history) => {
                let seen: HashSet<Uuid> = history.iter().map(|m| m.id).collect();
                self.messages = history;
                self.messages
                    .extend(pending.into_iter().filter(|m| !seen.contains(&m.id)));
            }
            Err(e) => {
                error!("Failed to load message history: {}", e);
                self.messages.clear();
            }
        }
        self.phase = FeedPhase::Live;
        true
    }

    /// Back to Idle. Returns the subscription to release, if any.
    pub fn reset(&mut self) -> Option<SubscriptionHandle> {
        let handle = self.subscription.take();
        self.ticket = LoadTicket(self.ticket.0 + 1);
        self.phase = FeedPhase::Idle;
        self.messages.clear();
        self.pending.clear();
        handle
    }
}

/// A validated outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    channel_id: Uuid,
    content: String,
}

impl NewMessage {
    pub fn new(active: Option<Uuid>, content: &str) -> Result<Self, ValidationError> {
        let channel_id = active.ok_or(ValidationError::NoActiveChannel)?;
        if content.trim().is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        Ok(Self {
            channel_id,
            content: content.to_string(),
        })
    }
}

/// History for one channel, oldest first.
pub async fn fetch_history(backend: &dyn Backend, channel_id: Uuid) -> Result<Vec<Message>, BackendError> {
    let rows = backend
        .select(
            Query::from(Table::Messages)
                .eq("channel_id", channel_id.to_string())
                .order("created_at", true),
        )
        .await?;
    decode_rows(Table::Messages, rows)
}

/// Insert a message as the current user. It shows up once the live feed
/// delivers it.
pub async fn send_message(backend: &dyn Backend, message: NewMessage) -> Result<(), BackendError> {
    let user = backend.get_current_user().await?;
    debug!("Sending message to channel {}", message.channel_id);
    backend
        .insert(
            Table::Messages,
            json!({
                "channel_id": message.channel_id,
                "content": message.content,
                "user_id": user.id,
            }),
        )
        .await
}
