use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message roles, closed to the set the store persists.
///
/// Producers may label turns however they like ("human", "ai", ...);
/// [`Role::normalize`] maps those labels into this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Map a producer-specific role label into the closed role set.
    ///
    /// Unknown labels fold into `Assistant`: anything that is not the user
    /// or the system spoke on the assistant's behalf.
    pub fn normalize(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "user" | "human" => Self::User,
            "system" => Self::System,
            _ => Self::Assistant,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// One tool invocation recorded on an assistant message.
///
/// `output` stays `None` while the call is in flight (or when generation was
/// stopped before the tool finished).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    pub name: String,
    pub input: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

/// A single message in a thread's derived transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolRecord>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolRecord>) -> Self {
        self.tool_calls = tool_calls;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_maps_known_labels() {
        assert_eq!(Role::normalize("user"), Role::User);
        assert_eq!(Role::normalize("Human"), Role::User);
        assert_eq!(Role::normalize("system"), Role::System);
        assert_eq!(Role::normalize("assistant"), Role::Assistant);
        assert_eq!(Role::normalize("ai"), Role::Assistant);
    }

    #[test]
    fn normalize_folds_unknown_labels_into_assistant() {
        assert_eq!(Role::normalize("function"), Role::Assistant);
        assert_eq!(Role::normalize("tool"), Role::Assistant);
        assert_eq!(Role::normalize(""), Role::Assistant);
    }

    #[test]
    fn message_serialization_uses_lowercase_roles() {
        let msg = ChatMessage::user("hi");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"user\""));
        assert!(!json.contains("tool_calls"));
    }

    #[test]
    fn tool_calls_round_trip() {
        let msg = ChatMessage::assistant("done").with_tool_calls(vec![ToolRecord {
            name: "search".to_string(),
            input: serde_json::json!({"q": "rust"}),
            output: Some(serde_json::json!("3 hits")),
        }]);
        let json = serde_json::to_string(&msg).unwrap();
        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tool_calls.len(), 1);
        assert_eq!(back.tool_calls[0].name, "search");
    }
}
