//! Client-side sync engine for a realtime group chat.
//!
//! A REST history snapshot and a live WebSocket feed are reconciled into one
//! ordered, deduplicated [`timeline::Timeline`], with presence tracked from
//! the same feed and sends written REST-first, live-second.

pub mod api;
pub mod calendar;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod history;
pub mod presence;
pub mod protocol;
pub mod render;
pub mod send;
pub mod session;
pub mod timeline;
pub mod transport;

pub use engine::{ChatSession, Command, SessionEvent, SessionReport, Target};
pub use error::{ChatError, Result};
pub use timeline::{Message, MessageId, MessageKind, Timeline};
