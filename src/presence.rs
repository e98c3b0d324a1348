//! Online-user tracking fed by presence frames on the live channel.

use std::collections::BTreeSet;

use serde::Serialize;

/// Who is online, as reported by one presence frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PresenceSnapshot {
    pub count: usize,
    pub users: BTreeSet<String>,
}

impl PresenceSnapshot {
    /// Snapshot from a user list. The count is always the list's size.
    pub fn from_users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let users: BTreeSet<String> = users.into_iter().map(Into::into).collect();
        Self {
            count: users.len(),
            users,
        }
    }

    /// Snapshot from a bare count, when the frame carried no list.
    pub fn from_count(count: usize) -> Self {
        Self {
            count,
            users: BTreeSet::new(),
        }
    }
}

/// Holds the last applied snapshot. Every frame is authoritative and total.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    current: PresenceSnapshot,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace count and users wholesale.
    pub fn apply(&mut self, snapshot: PresenceSnapshot) {
        self.current = snapshot;
    }

    pub fn count(&self) -> usize {
        self.current.count
    }

    pub fn users(&self) -> &BTreeSet<String> {
        &self.current.users
    }

    pub fn snapshot(&self) -> &PresenceSnapshot {
        &self.current
    }
}
