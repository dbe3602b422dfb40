use std::sync::Arc;

use chrono::Utc;
use core_types::{MessageEntry, MessageId, Sender};
use parking_lot::Mutex;

/// Append-only, insertion-ordered sequence of displayed entries.
///
/// Cloning yields another handle to the same log. Sequence numbers keep
/// increasing across a session reset so an archive cursor never goes back.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    inner: Arc<Mutex<LogInner>>,
}

#[derive(Debug, Default)]
struct LogInner {
    entries: Vec<MessageEntry>,
    next_seq: u64,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, sender: Sender, text: impl Into<String>) -> MessageEntry {
        let mut inner = self.inner.lock();
        inner.next_seq += 1;
        let entry = MessageEntry {
            id: MessageId::new_v4(),
            seq: inner.next_seq,
            sender,
            text: text.into(),
            created_at: Utc::now(),
        };
        inner.entries.push(entry.clone());
        entry
    }

    pub fn user(&self, text: impl Into<String>) -> MessageEntry {
        self.append(Sender::User, text)
    }

    pub fn assistant(&self, text: impl Into<String>) -> MessageEntry {
        self.append(Sender::Assistant, text)
    }

    pub fn system(&self, text: impl Into<String>) -> MessageEntry {
        self.append(Sender::System, text)
    }

    pub fn error(&self, text: impl Into<String>) -> MessageEntry {
        self.append(Sender::Error, text)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<MessageEntry> {
        self.inner.lock().entries.clone()
    }

    /// Entries appended after the one with sequence number `seq`.
    pub fn entries_after(&self, seq: u64) -> Vec<MessageEntry> {
        let inner = self.inner.lock();
        let start = inner.entries.partition_point(|entry| entry.seq <= seq);
        inner.entries[start..].to_vec()
    }

    pub(crate) fn reset(&self) {
        self.inner.lock().entries.clear();
    }
}
