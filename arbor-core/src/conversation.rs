//! Conversation history passed alongside a query

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

/// One prior turn of the conversation, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

/// The last `n` turns of `history`, oldest first.
pub fn recent_turns(history: &[ConversationTurn], n: usize) -> &[ConversationTurn] {
    &history[history.len().saturating_sub(n)..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_turns_takes_tail() {
        let history = vec![
            ConversationTurn::user("a"),
            ConversationTurn::assistant("b"),
            ConversationTurn::user("c"),
        ];
        let tail = recent_turns(&history, 2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "b");
        assert_eq!(recent_turns(&history, 10).len(), 3);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ConversationTurn::user("hi")).unwrap();
        assert!(json.contains("\"user\""));
    }
}
