//! Append-only log of everything received from the relay.

use std::fmt;

use chrono::{DateTime, Local};

use crate::client::Incoming;

/// One received frame with its local arrival time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub received_at: DateTime<Local>,
    pub body: Incoming,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.received_at.format("%H:%M:%S"), self.body)
    }
}

/// Received messages, in arrival order. Entries are never edited or removed.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a frame stamped with the current local time.
    pub fn push(&mut self, body: Incoming) {
        self.push_at(Local::now(), body);
    }

    /// Appends a frame with an explicit arrival time.
    pub fn push_at(&mut self, received_at: DateTime<Local>, body: Incoming) {
        self.entries.push(LogEntry { received_at, body });
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blab_protocol::ChatMessage;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_entries_keep_arrival_order() {
        let mut log = MessageLog::new();
        log.push(Incoming::Raw("first".to_string()));
        log.push(Incoming::Raw("second".to_string()));
        log.push(Incoming::Chat(ChatMessage::new("alice", "third")));

        let bodies: Vec<String> = log.iter().map(|e| e.body.to_string()).collect();
        assert_eq!(bodies, vec!["first", "second", "alice: third"]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_entry_display() {
        let mut log = MessageLog::new();
        log.push_at(at(9, 5, 7), Incoming::Chat(ChatMessage::new("bob", "hi")));
        assert_eq!(log.last().unwrap().to_string(), "[09:05:07] bob: hi");
    }

    #[test]
    fn test_empty_log() {
        let log = MessageLog::new();
        assert!(log.is_empty());
        assert!(log.last().is_none());
    }
}
