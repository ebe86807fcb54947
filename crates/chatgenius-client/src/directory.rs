use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use chatgenius_backend::{Backend, BackendError, decode_rows};
use chatgenius_types::models::{Channel, User};
use chatgenius_types::query::{Query, Table};

use crate::error::ValidationError;

/// The "new channel" form. `visible` is the "+" toggle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelForm {
    pub name: String,
    pub description: String,
    pub visible: bool,
}

impl ChannelForm {
    pub fn clear(&mut self) {
        self.name.clear();
        self.description.clear();
        self.visible = false;
    }
}

/// A validated channel creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChannel {
    name: String,
    description: Option<String>,
}

impl NewChannel {
    pub fn new(name: &str, description: Option<&str>) -> Result<Self, ValidationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyChannelName);
        }
        let description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        Ok(Self {
            name: name.to_string(),
            description,
        })
    }

    pub fn from_form(form: &ChannelForm) -> Result<Self, ValidationError> {
        Self::new(&form.name, Some(&form.description))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Channels and users known to the chat view, plus the active selection.
#[derive(Debug, Default)]
pub struct ChannelDirectory {
    channels: Vec<Channel>,
    users: Vec<User>,
    active: Option<Channel>,
    form: ChannelForm,
}

impl ChannelDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn active(&self) -> Option<&Channel> {
        self.active.as_ref()
    }

    pub fn active_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|c| c.id)
    }

    pub fn form(&self) -> &ChannelForm {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut ChannelForm {
        &mut self.form
    }

    pub fn set_channels(&mut self, channels: Vec<Channel>) {
        debug!("Channel list now has {} entries", channels.len());
        self.channels = channels;
    }

    pub fn set_users(&mut self, users: Vec<User>) {
        self.users = users;
    }

    pub fn find(&self, id: Uuid) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    /// Make `id` the active channel. It must be in the loaded list.
    pub fn select(&mut self, id: Uuid) -> Result<&Channel, ValidationError> {
        let channel = self.find(id).cloned().ok_or(ValidationError::UnknownChannel(id))?;
        Ok(self.active.insert(channel))
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// All channels, oldest first.
pub async fn list_channels(backend: &dyn Backend) -> Result<Vec<Channel>, BackendError> {
    let rows = backend
        .select(Query::from(Table::Channels).order("created_at", true))
        .await?;
    decode_rows(Table::Channels, rows)
}

pub async fn list_users(backend: &dyn Backend) -> Result<Vec<User>, BackendError> {
    let rows = backend
        .select(Query::from(Table::Users).order("username", true))
        .await?;
    decode_rows(Table::Users, rows)
}

/// Insert a channel owned by the current user.
pub async fn create_channel(backend: &dyn Backend, channel: NewChannel) -> Result<(), BackendError> {
    let user = backend.get_current_user().await?;
    backend
        .insert(
            Table::Channels,
            json!({
                "name": channel.name,
                "description": channel.description,
                "created_by": user.id,
            }),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn channel(name: &str) -> Channel {
        Channel {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            created_at: Utc::now(),
            created_by: Uuid::new_v4(),
        }
    }

    #[test]
    fn new_channel_requires_name() {
        assert_eq!(NewChannel::new("", None), Err(ValidationError::EmptyChannelName));
        assert_eq!(NewChannel::new("   ", Some("x")), Err(ValidationError::EmptyChannelName));

        let ok = NewChannel::new(" general ", Some("")).unwrap();
        assert_eq!(ok.name(), "general");
        assert_eq!(ok.description, None);
    }

    #[test]
    fn clear_empties_and_hides_form() {
        let mut form = ChannelForm {
            name: "general".into(),
            description: "talk".into(),
            visible: true,
        };
        form.clear();
        assert_eq!(form, ChannelForm::default());
    }

    #[test]
    fn select_requires_known_channel() {
        let mut dir = ChannelDirectory::new();
        let general = channel("general");
        dir.set_channels(vec![general.clone()]);

        let missing = Uuid::new_v4();
        assert_eq!(dir.select(missing).unwrap_err(), ValidationError::UnknownChannel(missing));
        assert!(dir.active().is_none());

        dir.select(general.id).unwrap();
        assert_eq!(dir.active_id(), Some(general.id));
    }
}
