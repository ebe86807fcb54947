use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: Uuid,
}

/// Messages are immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub user_id: Uuid,
}

/// Credential bundle issued by the backend's auth module.
/// The view only reads it to decide which screen to render.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub user: User,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("user", &self.user)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_debug_hides_token() {
        let session = Session {
            access_token: "very-secret-token".into(),
            user: User {
                id: Uuid::nil(),
                username: "alice".into(),
            },
            expires_at: Utc::now(),
        };
        let printed = format!("{:?}", session);
        assert!(!printed.contains("very-secret-token"));
        assert!(printed.contains("alice"));
    }

    #[test]
    fn channel_row_without_description_decodes() {
        let row = serde_json::json!({
            "id": "00000000-0000-0000-0000-000000000001",
            "name": "general",
            "created_at": "2024-01-01T00:00:00.000000Z",
            "created_by": "00000000-0000-0000-0000-000000000002",
        });
        let channel: Channel = serde_json::from_value(row).unwrap();
        assert_eq!(channel.name, "general");
        assert!(channel.description.is_none());
    }
}
