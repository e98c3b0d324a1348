//! Inbound frame classification.
//!
//! First match wins: presence, then the echo of this client's own announce,
//! then chat. Chat frames may be preceded by a synthetic date separator.

use crate::calendar::Calendar;
use crate::presence::PresenceSnapshot;
use crate::protocol::{ChatPayload, InboundFrame};
use crate::timeline::{separator_if_due, DateSeparatorMemo, Message, Timeline};

/// What one inbound frame turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Goes to the presence tracker, never to the timeline.
    Presence(PresenceSnapshot),
    /// Our own announce bounced back; nothing to render.
    Echo,
    /// Entries to append, in order (optional separator, then the message).
    Entries(Vec<Message>),
    /// Not a frame we understand.
    Ignored,
}

/// Classifies frames for one mounted session.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    announce_correlation: String,
    memo: DateSeparatorMemo,
    calendar: Calendar,
}

impl Dispatcher {
    /// `announce_correlation` is the id attached to this client's own
    /// "entered the chat" frame.
    pub fn new(
        announce_correlation: impl Into<String>,
        memo: DateSeparatorMemo,
        calendar: Calendar,
    ) -> Self {
        Self {
            announce_correlation: announce_correlation.into(),
            memo,
            calendar,
        }
    }

    pub fn announce_correlation(&self) -> &str {
        &self.announce_correlation
    }

    /// Classify one raw text frame.
    pub fn classify(&self, raw: &str) -> Dispatch {
        match InboundFrame::decode(raw) {
            Some(InboundFrame::Presence(p)) => Dispatch::Presence(p.into_snapshot()),
            Some(InboundFrame::Chat(c)) => self.classify_chat(c),
            None => Dispatch::Ignored,
        }
    }

    fn classify_chat(&self, chat: ChatPayload) -> Dispatch {
        if chat.correlation_id.as_deref() == Some(self.announce_correlation.as_str()) {
            return Dispatch::Echo;
        }

        let raw_ts = chat.created_at.unwrap_or_default();
        let mut out = Vec::with_capacity(2);
        if let Some(day) = self.calendar.day_of(&raw_ts) {
            out.extend(separator_if_due(&self.memo, &self.calendar, day));
        }
        out.push(Message::from_wire(
            chat.id,
            chat.content,
            chat.created_by.unwrap_or_default(),
            self.calendar.time_of_day(&raw_ts),
        ));
        Dispatch::Entries(out)
    }

    /// Classify and apply a frame to `timeline`, returning the dispatch so
    /// the caller can route presence. A chat frame whose id is already in the
    /// timeline is dropped before the memo is consulted.
    pub fn dispatch_into(&self, raw: &str, timeline: &mut Timeline) -> Dispatch {
        if let Some(InboundFrame::Chat(ChatPayload { id: Some(id), .. })) = InboundFrame::decode(raw) {
            if timeline.contains_id(&id) {
                tracing::debug!(id = %id, "dropping live copy of a message already shown");
                return Dispatch::Ignored;
            }
        }
        let dispatch = self.classify(raw);
        if let Dispatch::Entries(entries) = &dispatch {
            timeline.extend(entries.iter().cloned());
        }
        dispatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{MessageId, MessageKind};
    use chrono::NaiveDate;

    fn dispatcher() -> Dispatcher {
        let cal = Calendar::with_offset_minutes(0)
            .pinned(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        Dispatcher::new("corr-me", DateSeparatorMemo::new(), cal)
    }

    #[test]
    fn test_presence_frame_routes_to_presence() {
        let d = dispatcher();
        let out = d.classify(r#"{"userlist":{"alice":{},"bob":{}},"count":7}"#);
        match out {
            Dispatch::Presence(s) => assert_eq!(s.count, 2),
            other => panic!("expected presence, got {other:?}"),
        }
    }

    #[test]
    fn test_presence_never_touches_timeline() {
        let d = dispatcher();
        let mut t = Timeline::new();
        d.dispatch_into(r#"{"count":3}"#, &mut t);
        assert!(t.is_empty());
    }

    #[test]
    fn test_own_announce_echo_is_suppressed() {
        let d = dispatcher();
        let out = d.classify(
            r#"{"content":"User me entered the chat","created_at":"2024-01-01T10:00:00Z","created_by":"<System>","correlation_id":"corr-me"}"#,
        );
        assert_eq!(out, Dispatch::Echo);
    }

    #[test]
    fn test_someone_elses_announce_is_rendered() {
        let d = dispatcher();
        let out = d.classify(
            r#"{"content":"User bob entered the chat","created_at":"2024-01-01T10:00:00Z","created_by":"<System>","correlation_id":"corr-bob"}"#,
        );
        match out {
            Dispatch::Entries(e) => assert_eq!(e.last().unwrap().kind, MessageKind::System),
            other => panic!("expected entries, got {other:?}"),
        }
    }

    #[test]
    fn test_same_text_without_correlation_is_not_suppressed() {
        let d = dispatcher();
        let out = d.classify(
            r#"{"content":"User me entered the chat","created_at":"2024-01-01T10:00:00Z","created_by":"<System>"}"#,
        );
        assert!(matches!(out, Dispatch::Entries(_)));
    }

    #[test]
    fn test_first_chat_of_day_gets_separator() {
        let d = dispatcher();
        let out = d.classify(r#"{"content":"yo","created_at":"2024-01-01T11:00:00Z","created_by":"bob"}"#);
        match out {
            Dispatch::Entries(e) => {
                assert_eq!(e.len(), 2);
                assert_eq!(e[0].kind, MessageKind::DateSeparator);
                assert_eq!(e[0].timestamp, "Today");
                assert_eq!(e[1].timestamp, "11:00");
                assert_eq!(e[1].text.as_deref(), Some("yo"));
            }
            other => panic!("expected entries, got {other:?}"),
        }
    }

    #[test]
    fn test_second_chat_same_day_has_no_separator() {
        let d = dispatcher();
        d.classify(r#"{"content":"a","created_at":"2024-01-01T11:00:00Z","created_by":"bob"}"#);
        match d.classify(r#"{"content":"b","created_at":"2024-01-01T12:00:00Z","created_by":"bob"}"#) {
            Dispatch::Entries(e) => assert_eq!(e.len(), 1),
            other => panic!("expected entries, got {other:?}"),
        }
    }

    #[test]
    fn test_unparseable_timestamp_keeps_raw_and_skips_separator() {
        let d = dispatcher();
        match d.classify(r#"{"content":"a","created_at":"10:00:00 AM","created_by":"bob"}"#) {
            Dispatch::Entries(e) => {
                assert_eq!(e.len(), 1);
                assert_eq!(e[0].timestamp, "10:00:00 AM");
            }
            other => panic!("expected entries, got {other:?}"),
        }
    }

    #[test]
    fn test_garbage_is_ignored() {
        assert_eq!(dispatcher().classify("}{"), Dispatch::Ignored);
    }

    #[test]
    fn test_dispatch_into_drops_known_id() {
        let d = dispatcher();
        let mut t = Timeline::new();
        t.push(Message::chat(Some(MessageId::from(42)), "hi", "alice", "10:00"));
        let out = d.dispatch_into(
            r#"{"id":42,"content":"hi","created_at":"2024-01-01T10:00:00Z","created_by":"alice"}"#,
            &mut t,
        );
        assert_eq!(out, Dispatch::Ignored);
        assert_eq!(t.len(), 1);
    }
}
