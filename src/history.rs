//! One-shot history fetch on mount.
//!
//! Walks the server's records in arrival order with a last-day cursor and
//! emits a date separator ahead of the first message of each new day, unless
//! the shared memo says that day's separator is already on screen.

use tracing::{info, warn};

use crate::api::{MessageApi, MessageRecord};
use crate::calendar::Calendar;
use crate::error::{ChatError, Result};
use crate::timeline::{separator_if_due, DateSeparatorMemo, Message};

#[derive(Debug, Clone)]
pub struct HistoryLoader {
    memo: DateSeparatorMemo,
    calendar: Calendar,
}

impl HistoryLoader {
    pub fn new(memo: DateSeparatorMemo, calendar: Calendar) -> Self {
        Self { memo, calendar }
    }

    /// Fetch the full history and shape it into timeline entries.
    ///
    /// # Errors
    /// Any failure comes back as [`ChatError::HistoryLoad`]; the caller is
    /// expected to log it and keep the timeline empty.
    pub async fn load<A: MessageApi>(&self, api: &A) -> Result<Vec<Message>> {
        let records = api.fetch_messages().await.map_err(|e| {
            warn!(error = %e, "history fetch failed");
            match e {
                ChatError::HistoryLoad(_) => e,
                other => ChatError::HistoryLoad(other.to_string()),
            }
        })?;
        let entries = self.shape(records);
        info!(entries = entries.len(), "history loaded");
        Ok(entries)
    }

    /// Map records to messages and interleave date separators.
    pub fn shape(&self, records: Vec<MessageRecord>) -> Vec<Message> {
        let mut out = Vec::with_capacity(records.len() + 4);
        let mut cursor = None;

        for record in records {
            let raw_ts = record.created_at.unwrap_or_default();
            if let Some(day) = self.calendar.day_of(&raw_ts) {
                if cursor != Some(day) {
                    out.extend(separator_if_due(&self.memo, &self.calendar, day));
                    cursor = Some(day);
                }
            }
            out.push(Message::from_wire(
                record.id,
                record.content,
                record.created_by,
                self.calendar.time_of_day(&raw_ts),
            ));
        }
        out
    }
}
