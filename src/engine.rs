//! The mounted chat view.
//!
//! ## Responsibility
//! Own one live channel and one timeline for the lifetime of a mount, and
//! multiplex the four event sources onto them: the one-shot history load,
//! inbound live frames, user commands, and the teardown signal.
//!
//! ## Guarantees
//! - Live frames are applied strictly in arrival order.
//! - Chat frames that arrive before history settles are held and replayed
//!   after the merge, so history always sits above live traffic.
//! - The channel is closed (with a best-effort leave announce) on every
//!   exit path of [`ChatSession::run`].
//! - A history response that lands after teardown is dropped.
//!
//! ## NOT Responsible For
//! - Rendering (callers receive [`SessionEvent`]s)
//! - Authentication (the API handle arrives already authorized)

use std::fmt;
use std::future::Future;

use futures_util::{Sink, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::MessageApi;
use crate::calendar::Calendar;
use crate::dispatcher::{Dispatch, Dispatcher};
use crate::error::{ChatError, Result};
use crate::history::HistoryLoader;
use crate::presence::{PresenceSnapshot, PresenceTracker};
use crate::protocol::{entered_text, InboundFrame, OutboundFrame};
use crate::send::{SendCoordinator, SendOutcome};
use crate::timeline::{DateSeparatorMemo, Message, MessageId, Timeline, SYSTEM_SENDER};
use crate::transport::{ChannelState, LiveConnector, ReconnectPolicy, TransportChannel};

// ---------------------------------------------------------------------------
// Commands and events
// ---------------------------------------------------------------------------

/// Which message an edit or delete refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// A server identifier.
    Id(MessageId),
    /// A 1-based line number as printed by the renderer.
    Entry(usize),
}

/// User-initiated actions.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Send(String),
    Edit { target: Target, text: String },
    Delete(Target),
    Who,
    Quit,
}

/// Everything a renderer needs to keep its view in step with the timeline.
#[derive(Debug)]
pub enum SessionEvent {
    /// New entries at the end of the timeline, numbered from `first`.
    Appended { first: usize, entries: Vec<Message> },
    /// History was merged above live entries; carries the whole timeline,
    /// renumbered from 1.
    HistoryMerged(Vec<Message>),
    Presence(PresenceSnapshot),
    Removed(MessageId),
    Updated { id: MessageId, text: String },
    Channel(ChannelState),
    /// A user action or background load failed.
    Failed(ChatError),
}

/// Final state of a session after teardown.
#[derive(Debug)]
pub struct SessionReport {
    pub timeline: Timeline,
    pub presence: PresenceSnapshot,
}

// ---------------------------------------------------------------------------
// View state
// ---------------------------------------------------------------------------

struct View {
    timeline: Timeline,
    presence: PresenceTracker,
    held: Vec<String>,
    history_pending: bool,
    /// Printed line number minus one to the id shown on that line. A number
    /// keeps its message until the next renumbering, even after removals.
    lines: Vec<Option<MessageId>>,
}

impl View {
    /// Route one raw chat or presence frame.
    fn ingest(&mut self, dispatcher: &Dispatcher, raw: String) -> Option<SessionEvent> {
        if self.history_pending {
            if let Some(InboundFrame::Presence(p)) = InboundFrame::decode(&raw) {
                let snapshot = p.into_snapshot();
                self.presence.apply(snapshot.clone());
                return Some(SessionEvent::Presence(snapshot));
            }
            self.held.push(raw);
            return None;
        }
        match dispatcher.dispatch_into(&raw, &mut self.timeline) {
            Dispatch::Presence(snapshot) => {
                self.presence.apply(snapshot.clone());
                Some(SessionEvent::Presence(snapshot))
            }
            Dispatch::Entries(entries) => {
                let first = self.lines.len() + 1;
                self.lines.extend(entries.iter().map(|m| m.id.clone()));
                Some(SessionEvent::Appended { first, entries })
            }
            Dispatch::Echo => {
                debug!("suppressed echo of own announce");
                None
            }
            Dispatch::Ignored => None,
        }
    }

    /// Number every entry afresh, as the renderer does on a history merge.
    fn renumber(&mut self) {
        self.lines = self.timeline.entries().iter().map(|m| m.id.clone()).collect();
    }

    /// A removed message leaves its number empty instead of shifting later ones.
    fn forget(&mut self, id: &MessageId) {
        for slot in self.lines.iter_mut().filter(|slot| slot.as_ref() == Some(id)) {
            *slot = None;
        }
    }

    fn resolve(&self, target: &Target) -> Option<MessageId> {
        match target {
            Target::Id(id) => Some(id.clone()),
            Target::Entry(n) => n.checked_sub(1).and_then(|i| self.lines.get(i)).cloned().flatten(),
        }
    }
}

// ---------------------------------------------------------------------------
// ChatSession
// ---------------------------------------------------------------------------

pub struct ChatSession<A, C> {
    username: String,
    api: A,
    connector: C,
    calendar: Calendar,
    memo: DateSeparatorMemo,
    reconnect: ReconnectPolicy,
    correlation: String,
}

impl<A, C> ChatSession<A, C>
where
    A: MessageApi + Clone + Send + Sync + 'static,
    C: LiveConnector,
    <C::Sink as Sink<WsMessage>>::Error: fmt::Display,
{
    pub fn new(username: impl Into<String>, api: A, connector: C, calendar: Calendar) -> Self {
        Self {
            username: username.into(),
            api,
            connector,
            calendar,
            memo: DateSeparatorMemo::new(),
            reconnect: ReconnectPolicy::disabled(),
            correlation: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Identifier attached to this session's own entered announce.
    pub fn correlation_id(&self) -> &str {
        &self.correlation
    }

    async fn open_live(&self) -> Result<(TransportChannel<C::Sink>, C::Source)> {
        let (sink, source) = self.connector.connect().await?;
        let mut channel = TransportChannel::new(sink, &self.username, &self.correlation, self.calendar.clone());
        channel.open().await;
        Ok((channel, source))
    }

    fn schedule_reconnect(&self, attempt: u32) -> Option<Instant> {
        if !self.reconnect.allows(attempt) {
            return None;
        }
        let delay = self.reconnect.delay(attempt);
        info!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "scheduling live reconnect");
        Some(Instant::now() + delay)
    }

    /// Mount the view and run until `Quit`, the command channel closing, or
    /// `shutdown` resolving.
    pub async fn run<F, Sd>(self, mut commands: mpsc::Receiver<Command>, shutdown: Sd, mut emit: F) -> SessionReport
    where
        F: FnMut(SessionEvent),
        Sd: Future<Output = ()>,
    {
        let dispatcher = Dispatcher::new(self.correlation.clone(), self.memo.clone(), self.calendar.clone());
        let coordinator = SendCoordinator::new(self.api.clone(), self.calendar.clone());
        let mut view = View {
            timeline: Timeline::new(),
            presence: PresenceTracker::new(),
            held: Vec::new(),
            history_pending: true,
            lines: Vec::new(),
        };

        // History runs on its own task; the receiver is dropped on teardown
        // and a late result goes nowhere.
        let (history_tx, mut history_rx) = oneshot::channel();
        let loader = HistoryLoader::new(self.memo.clone(), self.calendar.clone());
        let api = self.api.clone();
        tokio::spawn(async move {
            let _ = history_tx.send(loader.load(&api).await);
        });

        let mut channel = None;
        let mut source = None;
        let mut attempt = 0u32;
        let mut reconnect_at = None;

        match self.open_live().await {
            Ok((ch, src)) => {
                emit(SessionEvent::Channel(ch.state()));
                channel = Some(ch);
                source = Some(src);
                // Rendered locally once per mount; the server's echo is suppressed.
                let local = OutboundFrame {
                    id: None,
                    content: entered_text(&self.username),
                    created_at: self.calendar.now_wire(),
                    created_by: SYSTEM_SENDER.to_string(),
                    correlation_id: None,
                };
                if let Some(ev) = view.ingest(&dispatcher, local.to_json()) {
                    emit(ev);
                }
            }
            Err(e) => {
                warn!(error = %e, "could not open live channel");
                emit(SessionEvent::Channel(ChannelState::Errored));
                emit(SessionEvent::Failed(e));
                reconnect_at = self.schedule_reconnect(attempt);
            }
        }

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("teardown signal received");
                    break;
                }

                loaded = &mut history_rx, if view.history_pending => {
                    view.history_pending = false;
                    match loaded {
                        Ok(Ok(entries)) => {
                            let inserted = view.timeline.merge_history(entries);
                            debug!(inserted, "history merged");
                            view.renumber();
                            emit(SessionEvent::HistoryMerged(view.timeline.entries().to_vec()));
                        }
                        Ok(Err(e)) => emit(SessionEvent::Failed(e)),
                        Err(_) => warn!("history task ended without a result"),
                    }
                    for raw in std::mem::take(&mut view.held) {
                        if let Some(ev) = view.ingest(&dispatcher, raw) {
                            emit(ev);
                        }
                    }
                }

                frame = next_frame(&mut source) => {
                    match frame {
                        Some(Ok(WsMessage::Text(raw))) => {
                            if let Some(ev) = view.ingest(&dispatcher, raw) {
                                emit(ev);
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            info!("live channel closed by server");
                            if let Some(ch) = channel.as_mut() {
                                ch.mark_closed();
                            }
                            source = None;
                            emit(SessionEvent::Channel(ChannelState::Closed));
                            reconnect_at = self.schedule_reconnect(attempt);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "live channel error");
                            if let Some(ch) = channel.as_mut() {
                                ch.mark_errored();
                            }
                            source = None;
                            emit(SessionEvent::Channel(ChannelState::Errored));
                            reconnect_at = self.schedule_reconnect(attempt);
                        }
                    }
                }

                _ = tokio::time::sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                    reconnect_at = None;
                    match self.open_live().await {
                        Ok((ch, src)) => {
                            info!(attempt = attempt + 1, "live channel re-opened");
                            attempt = 0;
                            emit(SessionEvent::Channel(ch.state()));
                            channel = Some(ch);
                            source = Some(src);
                        }
                        Err(e) => {
                            warn!(error = %e, attempt = attempt + 1, "live reconnect failed");
                            attempt += 1;
                            reconnect_at = self.schedule_reconnect(attempt);
                            if reconnect_at.is_none() {
                                emit(SessionEvent::Failed(e));
                            }
                        }
                    }
                }

                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!("command channel closed");
                        break;
                    };
                    match command {
                        Command::Quit => break,
                        Command::Who => emit(SessionEvent::Presence(view.presence.snapshot().clone())),
                        Command::Send(text) => {
                            match coordinator.send_message(&text, &self.username, channel.as_mut()).await {
                                Ok(SendOutcome::StoredOnly(frame)) => {
                                    if let Some(ev) = view.ingest(&dispatcher, frame.to_json()) {
                                        emit(ev);
                                    }
                                }
                                Ok(_) => {}
                                Err(e) => emit(SessionEvent::Failed(e)),
                            }
                        }
                        Command::Edit { target, text } => {
                            let id = view.resolve(&target);
                            match coordinator.update_message(id.as_ref(), &text, &mut view.timeline).await {
                                Ok(()) => {
                                    if let Some(id) = id {
                                        emit(SessionEvent::Updated { id, text });
                                    }
                                }
                                Err(e) => emit(SessionEvent::Failed(e)),
                            }
                        }
                        Command::Delete(target) => {
                            let id = view.resolve(&target);
                            match coordinator.delete_message(id.as_ref(), &mut view.timeline).await {
                                Ok(()) => {
                                    if let Some(id) = id {
                                        view.forget(&id);
                                        emit(SessionEvent::Removed(id));
                                    }
                                }
                                Err(e) => emit(SessionEvent::Failed(e)),
                            }
                        }
                    }
                }
            }
        }

        if let Some(ch) = channel.as_mut() {
            ch.close().await;
        }
        emit(SessionEvent::Channel(ChannelState::Closed));

        SessionReport {
            timeline: view.timeline,
            presence: view.presence.snapshot().clone(),
        }
    }
}

/// Next item from the live source, or pending forever when there is none.
async fn next_frame<S>(source: &mut Option<S>) -> Option<S::Item>
where
    S: Stream + Unpin,
{
    match source.as_mut() {
        Some(s) => s.next().await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
