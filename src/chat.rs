//! In-match chat log.

use serde::Serialize;

use crate::protocol::ClientMessage;
use crate::session::Session;

/// One chat line, own or received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatEntry {
    pub sender: String,
    pub text: String,
    pub is_own: bool,
    /// Receipt order within the session, starting at 0.
    pub sequence: u64,
}

/// Append-only chat history in receipt order.
#[derive(Debug, Clone, Default)]
pub struct ChatLog {
    entries: Vec<ChatEntry>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&mut self, sender: String, text: String, is_own: bool) -> ChatEntry {
        let entry = ChatEntry {
            sender,
            text,
            is_own,
            sequence: self.entries.len() as u64,
        };
        self.entries.push(entry.clone());
        entry
    }

    /// Record a local message and build its outbound frame.
    ///
    /// The text is trimmed; blank messages are ignored.
    pub fn send(&mut self, session: &Session, text: &str) -> Option<(ChatEntry, ClientMessage)> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let entry = self.append(session.self_name.clone(), text.to_string(), true);
        let outbound = ClientMessage::ChatMessage {
            message: entry.text.clone(),
            sender: entry.sender.clone(),
        };
        Some((entry, outbound))
    }

    /// Record a message relayed from the opponent.
    pub fn receive(&mut self, sender: String, message: String) -> ChatEntry {
        self.append(sender, message, false)
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::PlayerColor;

    fn session() -> Session {
        Session::new("r", "alice", PlayerColor::White)
    }

    #[test]
    fn send_trims_and_records_own_entry() {
        let mut log = ChatLog::new();
        let (entry, outbound) = log.send(&session(), "  hi there  ").unwrap();
        assert!(entry.is_own);
        assert_eq!(entry.text, "hi there");
        assert_eq!(
            outbound,
            ClientMessage::ChatMessage {
                message: "hi there".into(),
                sender: "alice".into()
            }
        );
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn blank_message_is_ignored() {
        let mut log = ChatLog::new();
        assert!(log.send(&session(), "   ").is_none());
        assert!(log.is_empty());
    }

    #[test]
    fn entries_keep_receipt_order_without_dedup() {
        let mut log = ChatLog::new();
        log.receive("bob".into(), "gg".into());
        log.send(&session(), "gg").unwrap();
        log.receive("bob".into(), "gg".into());
        let seqs: Vec<u64> = log.entries().iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, [0, 1, 2]);
        assert!(!log.entries()[0].is_own);
        assert!(log.entries()[1].is_own);
    }
}
