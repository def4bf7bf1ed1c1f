//! Agent mailboxes for inter-agent communication.
//!
//! An [`Outbox`] is bound to exactly one peer [`Inbox`]. Sending appends to the
//! peer inbox's tail; draining takes the whole inbox in one step. Both ends
//! share a mutex, so any number of writers and readers may use the same
//! mailbox without losing or duplicating messages.

use std::sync::{Arc, Mutex, MutexGuard};

/// A message exchanged between agents.
pub type Message = String;

#[derive(Debug, Default)]
struct MailboxState {
    messages: Vec<Message>,
    total_received: u64,
    total_drained: u64,
}

/// Receiving end of a mailbox.
#[derive(Debug, Clone, Default)]
pub struct Inbox {
    state: Arc<Mutex<MailboxState>>,
}

impl Inbox {
    /// Create an empty inbox.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        // A panicking writer cannot leave the Vec half-updated, so the data is still valid.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a message to the tail.
    pub fn deliver(&self, message: impl Into<Message>) {
        let mut state = self.lock();
        state.messages.push(message.into());
        state.total_received += 1;
    }

    /// Take every queued message in arrival order, leaving the inbox empty.
    pub fn drain(&self) -> Vec<Message> {
        let mut state = self.lock();
        let messages = std::mem::take(&mut state.messages);
        state.total_drained += messages.len() as u64;
        messages
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get mailbox statistics.
    pub fn stats(&self) -> MailboxStats {
        let state = self.lock();
        MailboxStats {
            queued: state.messages.len(),
            total_received: state.total_received,
            total_drained: state.total_drained,
        }
    }
}

/// Sending end of a mailbox, bound to one peer inbox.
#[derive(Debug, Clone)]
pub struct Outbox {
    target: Inbox,
}

impl Outbox {
    pub fn new(target: Inbox) -> Self {
        Self { target }
    }

    /// Deliver a message to the peer inbox. Never blocks on the reader.
    pub fn send(&self, message: impl Into<Message>) {
        self.target.deliver(message);
    }
}

/// Mailbox statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxStats {
    pub queued: usize,
    pub total_received: u64,
    pub total_drained: u64,
}

/// Create a connected outbox/inbox pair.
pub fn channel() -> (Outbox, Inbox) {
    let inbox = Inbox::new();
    (Outbox::new(inbox.clone()), inbox)
}
