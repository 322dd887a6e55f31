//! Conversation state for one user interaction.
//!
//! A `Session` is a plain value owned by whoever drives the conversation (the
//! CLI loop or the HTTP session map) and passed by reference into the
//! orchestrator. Template content is never cached here; it lives in the
//! Template Store under `id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::Role;
use crate::store::Validity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Explaining,
    AwaitingConfirmation,
    Generating,
    Generated,
    Validating,
    Updating,
    Resolving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraceCategory {
    Rationale,
    ToolCall,
    ToolOutput,
    Failure,
}

/// Observational record of one step. Never fed back into prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub heading: String,
    pub category: TraceCategory,
    pub content: String,
}

impl TraceEntry {
    pub fn new(category: TraceCategory, heading: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            category,
            content: content.into(),
        }
    }
}

/// One visible message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<TraceEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validity: Option<Validity>,
    /// Store version shown by this turn, for template turns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default)]
    pub is_error: bool,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            trace: Vec::new(),
            validity: None,
            version: None,
            is_error: false,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            ..Self::user(text)
        }
    }

    pub fn assistant_error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::assistant(text)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub state: SessionState,
    /// User validate requests since the last generate or update
    pub validate_counter: u32,
    /// Latest explanation, as produced by the model or edited by the user
    pub explanation: Option<String>,
    pub chat: Vec<ChatTurn>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            state: SessionState::Idle,
            validate_counter: 0,
            explanation: None,
            chat: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    /// Discard history and take a fresh id. Stored templates stay under the
    /// old id.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_issues_new_id_and_clears() {
        let mut session = Session::new();
        let old_id = session.id.clone();
        session.state = SessionState::Generated;
        session.validate_counter = 2;
        session.explanation = Some("explanation".to_string());
        session.chat.push(ChatTurn::user("hello"));

        session.reset();

        assert_ne!(session.id, old_id);
        assert_eq!(session.state, SessionState::Idle);
        assert_eq!(session.validate_counter, 0);
        assert!(session.explanation.is_none());
        assert!(session.chat.is_empty());
    }

    #[test]
    fn test_chat_turn_serialization() {
        let turn = ChatTurn::assistant_error("model call failed");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["is_error"], true);
        assert!(json.get("validity").is_none());

        let entry = TraceEntry::new(TraceCategory::ToolCall, "Validate template", "v2");
        assert_eq!(serde_json::to_value(&entry).unwrap()["category"], "tool-call");
    }
}
