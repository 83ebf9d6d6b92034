//! Conversation log shown in the chat panel
//!
//! Entries are typed when they are appended; the UI never has to guess what
//! kind of message it is looking at.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationEntry {
    User {
        text: String,
    },
    Assistant {
        text: String,
        has_tool_calls: bool,
    },
    ToolResult {
        call_id: String,
        tool: String,
        output: String,
    },
    /// Inline error row (tool failure, failed run, timeout)
    Error {
        message: String,
    },
}

impl ConversationEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into() }
    }

    pub fn assistant(text: impl Into<String>, has_tool_calls: bool) -> Self {
        Self::Assistant {
            text: text.into(),
            has_tool_calls,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::ToolResult { .. } => "tool_result",
            Self::Error { .. } => "error",
        }
    }
}

/// Append-only, observable list of conversation entries
#[derive(Clone)]
pub struct ConversationLog {
    tx: watch::Sender<Vec<ConversationEntry>>,
}

impl ConversationLog {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self { tx }
    }

    pub fn append(&self, entry: ConversationEntry) {
        self.tx.send_modify(|entries| entries.push(entry));
    }

    pub fn entries(&self) -> Vec<ConversationEntry> {
        self.tx.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<ConversationEntry>> {
        self.tx.subscribe()
    }
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_order() {
        let log = ConversationLog::new();
        assert!(log.is_empty());

        log.append(ConversationEntry::user("where is Lima?"));
        log.append(ConversationEntry::ToolResult {
            call_id: "call_1".to_string(),
            tool: "update_map".to_string(),
            output: "Map updated".to_string(),
        });
        log.append(ConversationEntry::assistant("Lima is in Peru.", true));

        let kinds: Vec<&str> = log.entries().iter().map(ConversationEntry::kind).collect();
        assert_eq!(kinds, ["user", "tool_result", "assistant"]);
    }

    #[test]
    fn test_clones_share_entries() {
        let log = ConversationLog::new();
        let other = log.clone();
        other.append(ConversationEntry::error("boom"));
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0], ConversationEntry::error("boom"));
    }

    #[test]
    fn test_entry_serializes_with_kind_tag() {
        let json = serde_json::to_value(ConversationEntry::assistant("hi", false)).unwrap();
        assert_eq!(json["kind"], "assistant");
        assert_eq!(json["has_tool_calls"], false);
    }
}
