//! The timeline view model: ordered, deduplicated chat entries with date
//! separators.
//!
//! ## Invariants
//! - Entries are only appended, removed, or mutated in place; nothing is
//!   ever reordered after insertion.
//! - At most one date separator per calendar day per session, enforced by
//!   [`DateSeparatorMemo`], the single structure shared between the history
//!   replay and the live feed.
//! - No two entries carry the same server identifier.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::calendar::{day_key, Calendar};

/// Sender recorded on system notices (join/leave announcements).
pub const SYSTEM_SENDER: &str = "<System>";

/// Sender recorded on synthetic date separators.
pub const DATE_SENDER: &str = "<Date>";

// ---------------------------------------------------------------------------
// MessageId
// ---------------------------------------------------------------------------

/// Opaque server-assigned message identifier.
///
/// The server issues integers; the client accepts integers or strings and
/// writes numeric identifiers back as JSON numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for MessageId {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.parse::<i64>() {
            Ok(n) => serializer.serialize_i64(n),
            Err(_) => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Str(String),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Int(n) => MessageId::from(n),
            Raw::Str(s) => MessageId(s),
        })
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Chat,
    System,
    DateSeparator,
}

/// One displayable timeline entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Absent for unacknowledged and synthetic entries.
    pub id: Option<MessageId>,
    pub text: Option<String>,
    pub sender: String,
    /// Display-ready: time of day for chat/system, the label for separators.
    pub timestamp: String,
    pub kind: MessageKind,
    /// Calendar day key, set only on date separators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
}

impl Message {
    pub fn chat(
        id: Option<MessageId>,
        text: impl Into<String>,
        sender: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            id,
            text: Some(text.into()),
            sender: sender.into(),
            timestamp: timestamp.into(),
            kind: MessageKind::Chat,
            day: None,
        }
    }

    pub fn system(text: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            id: None,
            text: Some(text.into()),
            sender: SYSTEM_SENDER.to_string(),
            timestamp: timestamp.into(),
            kind: MessageKind::System,
            day: None,
        }
    }

    pub fn date_separator(day: NaiveDate, label: impl Into<String>) -> Self {
        Self {
            id: None,
            text: None,
            sender: DATE_SENDER.to_string(),
            timestamp: label.into(),
            kind: MessageKind::DateSeparator,
            day: Some(day_key(day)),
        }
    }

    /// A chat-shaped record from the server; system-authored records become
    /// system notices.
    pub fn from_wire(
        id: Option<MessageId>,
        content: Option<String>,
        created_by: String,
        timestamp: String,
    ) -> Self {
        let kind = if created_by == SYSTEM_SENDER {
            MessageKind::System
        } else {
            MessageKind::Chat
        };
        Self {
            id,
            text: content,
            sender: created_by,
            timestamp,
            kind,
            day: None,
        }
    }

    pub fn is_separator(&self) -> bool {
        self.kind == MessageKind::DateSeparator
    }
}

// ---------------------------------------------------------------------------
// DateSeparatorMemo
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoState {
    emitted: HashSet<String>,
    last_day: Option<String>,
}

/// Days for which a separator has already been emitted in this session.
///
/// Cloning yields another handle onto the same memo. [`claim`](Self::claim)
/// checks and records under one lock so the history replay and the live feed
/// can never both emit a separator for the same day.
#[derive(Debug, Clone, Default)]
pub struct DateSeparatorMemo {
    inner: Arc<Mutex<MemoState>>,
}

impl DateSeparatorMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `day` and return `true` if a separator for it is due: it
    /// differs from the last recorded day and has never been emitted.
    pub fn claim(&self, day: NaiveDate) -> bool {
        let key = day_key(day);
        let Ok(mut state) = self.inner.lock() else {
            return false;
        };
        if state.last_day.as_deref() == Some(key.as_str()) || state.emitted.contains(&key) {
            state.last_day = Some(key);
            return false;
        }
        state.emitted.insert(key.clone());
        state.last_day = Some(key);
        true
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.inner
            .lock()
            .map(|s| s.emitted.contains(&day_key(day)))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|s| s.emitted.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A separator for `day` if the memo grants one. Shared by the history
/// replay and the live dispatcher.
pub(crate) fn separator_if_due(
    memo: &DateSeparatorMemo,
    calendar: &Calendar,
    day: NaiveDate,
) -> Option<Message> {
    memo.claim(day)
        .then(|| Message::date_separator(day, calendar.day_label(day)))
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

/// Ordered entries shown to the user.
#[derive(Debug, Default)]
pub struct Timeline {
    entries: Vec<Message>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Message] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_id(&self, id: &MessageId) -> bool {
        self.entries.iter().any(|m| m.id.as_ref() == Some(id))
    }

    /// Append one entry. Returns `false` (and drops it) if an entry with the
    /// same identifier is already present.
    pub fn push(&mut self, message: Message) -> bool {
        if let Some(id) = &message.id {
            if self.contains_id(id) {
                return false;
            }
        }
        self.entries.push(message);
        true
    }

    /// Append a batch in order; returns how many were kept.
    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        let mut kept = 0;
        for message in messages {
            if self.push(message) {
                kept += 1;
            }
        }
        kept
    }

    /// Place a history snapshot ahead of any live entries that arrived before
    /// it finished loading. Snapshot entries whose id is already present are
    /// skipped. Returns how many were inserted.
    pub fn merge_history(&mut self, history: Vec<Message>) -> usize {
        let mut seen: HashSet<MessageId> =
            self.entries.iter().filter_map(|m| m.id.clone()).collect();
        let mut merged: Vec<Message> = Vec::with_capacity(history.len() + self.entries.len());
        for message in history {
            if let Some(id) = &message.id {
                if !seen.insert(id.clone()) {
                    continue;
                }
            }
            merged.push(message);
        }
        let inserted = merged.len();
        merged.append(&mut self.entries);
        self.entries = merged;
        inserted
    }

    /// Strict removal by id. Returns the removed entry.
    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let pos = self.entries.iter().position(|m| m.id.as_ref() == Some(id))?;
        Some(self.entries.remove(pos))
    }

    /// Replace the text of the entry with `id`. Returns `false` if absent.
    pub fn update_text(&mut self, id: &MessageId, text: impl Into<String>) -> bool {
        match self.entries.iter_mut().find(|m| m.id.as_ref() == Some(id)) {
            Some(m) => {
                m.text = Some(text.into());
                true
            }
            None => false,
        }
    }

    pub fn separators(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().filter(|m| m.is_separator())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
