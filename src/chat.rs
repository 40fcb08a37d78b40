use std::collections::VecDeque;
use std::sync::Mutex;

use crate::constants::{CHAT_MAX_LEN, CHAT_RETAINED};
use crate::store::StoreError;
use crate::types::{ChatError, ChatMessageView, Team};

struct ChatInner {
    next_seq: u64,
    messages: VecDeque<ChatMessageView>,
}

/// Append-only chat tail with server-assigned sequence numbers. Only the
/// last `retained` messages stay in memory; the full history lives in the
/// store's journal.
pub struct ChatLog {
    retained: usize,
    inner: Mutex<ChatInner>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::with_retention(CHAT_RETAINED)
    }

    pub fn with_retention(retained: usize) -> Self {
        Self {
            retained: retained.max(1),
            inner: Mutex::new(ChatInner {
                next_seq: 1,
                messages: VecDeque::new(),
            }),
        }
    }

    pub fn append(
        &self,
        player_id: &str,
        name: &str,
        team: Team,
        text: &str,
        at_ms: u64,
    ) -> Result<ChatMessageView, ChatError> {
        self.append_persisted(player_id, name, team, text, at_ms, |_| Ok(()))
    }

    /// Validates and sequences the message, runs `persist` while the log
    /// is still locked, and only commits the message once the write is
    /// confirmed. A persist failure leaves the log untouched.
    pub fn append_persisted<F>(
        &self,
        player_id: &str,
        name: &str,
        team: Team,
        text: &str,
        at_ms: u64,
        persist: F,
    ) -> Result<ChatMessageView, ChatError>
    where
        F: FnOnce(&ChatMessageView) -> Result<(), StoreError>,
    {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if trimmed.chars().count() > CHAT_MAX_LEN {
            return Err(ChatError::MessageTooLong(CHAT_MAX_LEN));
        }

        let mut inner = self.inner.lock().expect("chat lock poisoned");
        let message = ChatMessageView {
            seq: inner.next_seq,
            player_id: player_id.to_string(),
            name: name.to_string(),
            team,
            text: trimmed.to_string(),
            at_ms,
        };
        persist(&message)?;
        inner.next_seq += 1;
        inner.messages.push_back(message.clone());
        while inner.messages.len() > self.retained {
            inner.messages.pop_front();
        }
        Ok(message)
    }

    /// Reinstates a message loaded from the store, keeping the sequence
    /// counter ahead of everything seen.
    pub fn restore(&self, message: ChatMessageView) {
        let mut inner = self.inner.lock().expect("chat lock poisoned");
        inner.next_seq = inner.next_seq.max(message.seq + 1);
        inner.messages.push_back(message);
        while inner.messages.len() > self.retained {
            inner.messages.pop_front();
        }
    }

    pub fn tail(&self) -> Vec<ChatMessageView> {
        let inner = self.inner.lock().expect("chat lock poisoned");
        inner.messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("chat lock poisoned").messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new()
    }
}
