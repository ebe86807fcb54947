use chatgenius_client::{FeedPhase, Screen, ViewState};
use chatgenius_types::models::Message;

/// Turns successive view states into terminal lines, printing only what
/// changed since the previous state.
#[derive(Debug, Default)]
pub struct Renderer {
    last: ViewState,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, next: &ViewState) -> Vec<String> {
        let last = &self.last;
        let mut lines = Vec::new();

        if next.screen != last.screen || next.user != last.user {
            match (&next.screen, &next.user) {
                (Screen::Chat, Some(user)) => {
                    lines.push(format!("Signed in as {}. Type /help for commands.", user.username))
                }
                _ => lines.push("Signed out. Use /login or /signup.".to_string()),
            }
        }

        if next.channels != last.channels && !next.channels.is_empty() {
            lines.push(channel_list(next));
        }

        if next.users != last.users && !next.users.is_empty() {
            lines.push(user_list(next));
        }

        let switched = next.active_channel.as_ref().map(|c| c.id) != last.active_channel.as_ref().map(|c| c.id);
        if let (true, Some(channel)) = (switched, &next.active_channel) {
            match &channel.description {
                Some(description) => lines.push(format!("-- #{}: {}", channel.name, description)),
                None => lines.push(format!("-- #{}", channel.name)),
            }
        }

        if next.phase == FeedPhase::Live {
            // history landing or a reset means the whole list is new
            let fresh = switched || last.phase != FeedPhase::Live || !next.messages.starts_with(&last.messages);
            let start = if fresh { 0 } else { last.messages.len() };
            lines.extend(next.messages[start..].iter().map(|m| message_line(next, m)));
        }

        self.last = next.clone();
        lines
    }
}

pub fn message_line(state: &ViewState, message: &Message) -> String {
    let author = state.username(message.user_id).unwrap_or("unknown");
    format!(
        "[{}] {}: {}",
        message.created_at.format("%H:%M"),
        author,
        message.content
    )
}

pub fn channel_list(state: &ViewState) -> String {
    if state.channels.is_empty() {
        return "No channels yet. Create one with /new <name>.".to_string();
    }
    let active = state.active_channel.as_ref().map(|c| c.id);
    let names: Vec<String> = state
        .channels
        .iter()
        .map(|c| {
            if Some(c.id) == active {
                format!("*#{}", c.name)
            } else {
                format!("#{}", c.name)
            }
        })
        .collect();
    format!("Channels: {}", names.join(" "))
}

pub fn user_list(state: &ViewState) -> String {
    let names: Vec<&str> = state.users.iter().map(|u| u.username.as_str()).collect();
    format!("Users: {}", names.join(", "))
}
