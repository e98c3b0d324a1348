//! Terminal rendering of session events.

use colored::*;

use crate::engine::SessionEvent;
use crate::error::ChatError;
use crate::presence::PresenceSnapshot;
use crate::timeline::{Message, MessageKind};
use crate::transport::ChannelState;

/// Prints entries under the line numbers the session assigned them, so `#N`
/// targets name exactly what the user sees.
#[derive(Debug)]
pub struct Renderer {
    own_name: String,
}

impl Renderer {
    pub fn new(own_name: impl Into<String>) -> Self {
        Self {
            own_name: own_name.into(),
        }
    }

    /// Lines to print for one event.
    pub fn render(&self, event: &SessionEvent) -> Vec<String> {
        match event {
            SessionEvent::Appended { first, entries } => numbered(*first, entries, &self.own_name),
            SessionEvent::HistoryMerged(all) => {
                let mut lines = vec![format!("{}", "── history ──".dimmed())];
                lines.extend(numbered(1, all, &self.own_name));
                lines
            }
            SessionEvent::Presence(p) => vec![presence_line(p)],
            SessionEvent::Removed(id) => {
                vec![format!("{}", format!("message {id} deleted").dimmed())]
            }
            SessionEvent::Updated { id, text } => {
                vec![format!("{} {}", format!("message {id} edited:").dimmed(), text)]
            }
            SessionEvent::Channel(state) => channel_line(*state).into_iter().collect(),
            SessionEvent::Failed(err) => failure_lines(err),
        }
    }
}

fn numbered(first: usize, entries: &[Message], own_name: &str) -> Vec<String> {
    entries
        .iter()
        .enumerate()
        .map(|(i, m)| format!("{} {}", format!("{:>3}", first + i).dimmed(), message_line(m, own_name)))
        .collect()
}

pub fn message_line(message: &Message, own_name: &str) -> String {
    match message.kind {
        MessageKind::DateSeparator => format!("{}", format!("──── {} ────", message.timestamp).bright_blue()),
        MessageKind::System => format!(
            "[{}] {}",
            message.timestamp.dimmed(),
            message.text.as_deref().unwrap_or_default().yellow().italic()
        ),
        MessageKind::Chat => {
            let sender = if message.sender == own_name {
                message.sender.bright_cyan().bold()
            } else {
                message.sender.bright_green()
            };
            let id = message
                .id
                .as_ref()
                .map(|id| format!(" {}", format!("({id})").dimmed()))
                .unwrap_or_default();
            format!(
                "[{}] {}{}: {}",
                message.timestamp.dimmed(),
                sender,
                id,
                message.text.as_deref().unwrap_or_default()
            )
        }
    }
}

pub fn presence_line(snapshot: &PresenceSnapshot) -> String {
    let names: Vec<&str> = snapshot.users.iter().map(String::as_str).collect();
    if names.is_empty() {
        format!("{} online", snapshot.count.to_string().bright_white().bold())
    } else {
        format!(
            "{} online: {}",
            snapshot.count.to_string().bright_white().bold(),
            names.join(", ")
        )
    }
}

fn channel_line(state: ChannelState) -> Option<String> {
    match state {
        ChannelState::Open => Some(format!("{}", "live updates on".dimmed())),
        ChannelState::Closed | ChannelState::Errored => {
            Some(format!("{}", "live updates stopped; restart chat to resume".yellow()))
        }
        ChannelState::Connecting | ChannelState::Closing => None,
    }
}

pub fn failure_lines(err: &ChatError) -> Vec<String> {
    let mut lines = vec![format!("{} {}", "error:".bright_red().bold(), err)];
    if let ChatError::SendFailure { text, .. } = err {
        lines.push(format!("{} {}", "unsent:".yellow(), text));
    }
    if err.is_rate_limited() {
        lines.push(format!("{}", "slow down and try again shortly".yellow()));
    } else if err.requires_reauth() {
        lines.push(format!("{}", "run `chatline sign-in` again".yellow()));
    }
    lines
}
