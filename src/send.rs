//! Outgoing writes: send, edit, delete.
//!
//! A send is a REST store followed by a live fan-out of the identified
//! frame. Nothing is rendered optimistically; the sender's own view picks
//! the message up from the live bounce-back, or from the REST result when
//! the live channel was not open.

use std::fmt;

use futures_util::Sink;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{info, warn};

use crate::api::{MessageApi, NewMessage};
use crate::calendar::Calendar;
use crate::error::{ChatError, Result};
use crate::protocol::OutboundFrame;
use crate::timeline::{MessageId, Timeline};
use crate::transport::TransportChannel;

/// How a send ended when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Input was empty after trimming; no calls were made.
    Skipped,
    /// Stored and fanned out on the live channel.
    Broadcast(MessageId),
    /// Stored, but the live channel was not open. The frame is returned so
    /// the caller can render it locally.
    StoredOnly(OutboundFrame),
}

pub struct SendCoordinator<A> {
    api: A,
    calendar: Calendar,
}

impl<A: MessageApi> SendCoordinator<A> {
    pub fn new(api: A, calendar: Calendar) -> Self {
        Self { api, calendar }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Store `text` as `sender`, then broadcast it with the server's id.
    ///
    /// # Errors
    /// [`ChatError::SendFailure`] carrying the original text and the REST
    /// error as its cause when the write fails. No live frame is sent in that
    /// case.
    pub async fn send_message<S>(
        &self,
        text: &str,
        sender: &str,
        channel: Option<&mut TransportChannel<S>>,
    ) -> Result<SendOutcome>
    where
        S: Sink<WsMessage> + Unpin,
        S::Error: fmt::Display,
    {
        let content = text.trim();
        if content.is_empty() {
            return Ok(SendOutcome::Skipped);
        }

        let created_at = self.calendar.now_wire();
        let new_message = NewMessage {
            content: content.to_string(),
            created_at: created_at.clone(),
            created_by: sender.to_string(),
        };
        let id = self.api.send_message(&new_message).await.map_err(|e| {
            warn!(error = %e, "send-message failed");
            ChatError::SendFailure {
                text: text.to_string(),
                cause: Box::new(e),
            }
        })?;

        let frame = OutboundFrame::identified(id.clone(), content, created_at, sender);
        let broadcast = match channel {
            Some(channel) => channel.send(&frame).await,
            None => false,
        };
        if broadcast {
            Ok(SendOutcome::Broadcast(id))
        } else {
            info!(id = %id, "message stored but live channel not open; peers see it on next load");
            Ok(SendOutcome::StoredOnly(frame))
        }
    }

    /// Delete a message on the server, then drop it from `timeline`.
    ///
    /// # Errors
    /// [`ChatError::MissingIdentifier`] without any call when `id` is `None`;
    /// otherwise whatever the REST call returned. The timeline is untouched
    /// on error.
    pub async fn delete_message(&self, id: Option<&MessageId>, timeline: &mut Timeline) -> Result<()> {
        let id = id.ok_or(ChatError::MissingIdentifier)?;
        self.api.delete_message(id).await?;
        if timeline.remove(id).is_none() {
            info!(id = %id, "deleted message was not on screen");
        }
        Ok(())
    }

    /// Replace a message's text on the server, then in `timeline`.
    ///
    /// # Errors
    /// Same contract as [`delete_message`](Self::delete_message).
    pub async fn update_message(
        &self,
        id: Option<&MessageId>,
        text: &str,
        timeline: &mut Timeline,
    ) -> Result<()> {
        let id = id.ok_or(ChatError::MissingIdentifier)?;
        self.api.update_message(id, text).await?;
        if !timeline.update_text(id, text) {
            info!(id = %id, "updated message was not on screen");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MessageRecord;
    use crate::timeline::Message;
    use crate::transport::tests::RecordingSink;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct MockApi {
        calls: Arc<Mutex<Vec<String>>>,
        fail: Option<u16>,
    }

    impl MockApi {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn outcome<T>(&self, ok: T) -> Result<T> {
            match self.fail {
                None => Ok(ok),
                Some(401) => Err(ChatError::Authentication("token expired".into())),
                Some(429) => Err(ChatError::RateLimited),
                Some(status) => Err(ChatError::Request {
                    endpoint: "mock".into(),
                    status,
                    detail: "boom".into(),
                }),
            }
        }
    }

    impl MessageApi for MockApi {
        async fn fetch_messages(&self) -> Result<Vec<MessageRecord>> {
            self.calls.lock().unwrap().push("fetch".into());
            self.outcome(Vec::new())
        }
        async fn send_message(&self, m: &NewMessage) -> Result<MessageId> {
            self.calls.lock().unwrap().push(format!("send:{}", m.content));
            self.outcome(MessageId::from(7))
        }
        async fn update_message(&self, id: &MessageId, c: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("update:{id}:{c}"));
            self.outcome(())
        }
        async fn delete_message(&self, id: &MessageId) -> Result<()> {
            self.calls.lock().unwrap().push(format!("delete:{id}"));
            self.outcome(())
        }
    }

    fn coordinator(api: MockApi) -> SendCoordinator<MockApi> {
        SendCoordinator::new(api, Calendar::with_offset_minutes(0))
    }

    async fn open_channel(sink: &RecordingSink) -> TransportChannel<RecordingSink> {
        let mut ch = TransportChannel::new(sink.clone(), "alice", "corr", Calendar::with_offset_minutes(0));
        ch.open().await;
        ch
    }

    #[tokio::test]
    async fn test_whitespace_only_send_makes_no_calls() {
        let api = MockApi::default();
        let sink = RecordingSink::default();
        let mut ch = open_channel(&sink).await;
        let out = coordinator(api.clone()).send_message("   ", "alice", Some(&mut ch)).await.unwrap();
        assert_eq!(out, SendOutcome::Skipped);
        assert!(api.calls().is_empty());
        assert_eq!(sink.sent().len(), 1, "only the announce");
    }

    #[tokio::test]
    async fn test_send_stores_then_broadcasts_with_id() {
        let api = MockApi::default();
        let sink = RecordingSink::default();
        let mut ch = open_channel(&sink).await;
        let out = coordinator(api.clone()).send_message(" hi ", "alice", Some(&mut ch)).await.unwrap();
        assert_eq!(out, SendOutcome::Broadcast(MessageId::from(7)));
        assert_eq!(api.calls(), vec!["send:hi"]);
        let sent = sink.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1]["id"], 7);
        assert_eq!(sent[1]["content"], "hi");
        assert_eq!(sent[1]["created_by"], "alice");
    }

    #[tokio::test]
    async fn test_rest_failure_returns_text_and_skips_broadcast() {
        let api = MockApi {
            fail: Some(500),
            ..Default::default()
        };
        let sink = RecordingSink::default();
        let mut ch = open_channel(&sink).await;
        let err = coordinator(api).send_message("hello", "alice", Some(&mut ch)).await.unwrap_err();
        match err {
            ChatError::SendFailure { text, cause } => {
                assert_eq!(text, "hello");
                assert!(cause.to_string().contains("boom"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(sink.sent().len(), 1, "no chat frame after failed store");
    }

    #[tokio::test]
    async fn test_throttled_send_is_rate_limited_and_returns_text() {
        let api = MockApi {
            fail: Some(429),
            ..Default::default()
        };
        let sink = RecordingSink::default();
        let mut ch = open_channel(&sink).await;
        let err = coordinator(api).send_message("hi", "alice", Some(&mut ch)).await.unwrap_err();
        assert!(err.is_rate_limited());
        assert!(!err.requires_reauth());
        assert!(matches!(err, ChatError::SendFailure { ref text, .. } if text == "hi"));
        assert_eq!(sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_send_requires_reauth_and_returns_text() {
        let api = MockApi {
            fail: Some(401),
            ..Default::default()
        };
        let err = coordinator(api.clone())
            .send_message::<RecordingSink>("hi", "alice", None)
            .await
            .unwrap_err();
        assert!(err.requires_reauth());
        assert!(!err.is_rate_limited());
        assert!(matches!(err, ChatError::SendFailure { ref text, .. } if text == "hi"));
        assert_eq!(api.calls(), vec!["send:hi"]);
    }

    #[tokio::test]
    async fn test_send_with_closed_channel_is_stored_only() {
        let api = MockApi::default();
        let out = coordinator(api.clone())
            .send_message::<RecordingSink>("hi", "alice", None)
            .await
            .unwrap();
        match out {
            SendOutcome::StoredOnly(frame) => assert_eq!(frame.id, Some(MessageId::from(7))),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(api.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_without_id_makes_no_calls() {
        let api = MockApi::default();
        let mut t = Timeline::new();
        let err = coordinator(api.clone()).delete_message(None, &mut t).await.unwrap_err();
        assert!(matches!(err, ChatError::MissingIdentifier));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_without_id_makes_no_calls() {
        let api = MockApi::default();
        let mut t = Timeline::new();
        let err = coordinator(api.clone()).update_message(None, "x", &mut t).await.unwrap_err();
        assert!(matches!(err, ChatError::MissingIdentifier));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_entry() {
        let api = MockApi::default();
        let mut t = Timeline::new();
        t.push(Message::chat(Some(MessageId::from(42)), "bye", "alice", "10:00"));
        coordinator(api.clone())
            .delete_message(Some(&MessageId::from(42)), &mut t)
            .await
            .unwrap();
        assert_eq!(api.calls(), vec!["delete:42"]);
        assert!(t.is_empty());
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_entry() {
        let api = MockApi {
            fail: Some(500),
            ..Default::default()
        };
        let mut t = Timeline::new();
        t.push(Message::chat(Some(MessageId::from(42)), "bye", "alice", "10:00"));
        assert!(coordinator(api)
            .delete_message(Some(&MessageId::from(42)), &mut t)
            .await
            .is_err());
        assert_eq!(t.len(), 1);
    }

    #[tokio::test]
    async fn test_update_rewrites_text() {
        let api = MockApi::default();
        let mut t = Timeline::new();
        t.push(Message::chat(Some(MessageId::from(3)), "old", "alice", "10:00"));
        coordinator(api.clone())
            .update_message(Some(&MessageId::from(3)), "new", &mut t)
            .await
            .unwrap();
        assert_eq!(api.calls(), vec!["update:3:new"]);
        assert_eq!(t.entries()[0].text.as_deref(), Some("new"));
    }
}
