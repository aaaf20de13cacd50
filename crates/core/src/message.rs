//! Turn and MessageStore domain types.
//!
//! These are the core value objects that flow through a chat session:
//! User types a message → it is appended as a user turn → the model reply is
//! appended as an assistant turn → the log feeds the next turn's history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChatError;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Assistant => f.write_str("assistant"),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn ID
    pub id: String,

    /// Who sent this turn
    pub speaker: Speaker,

    /// The text content
    pub content: String,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn new(speaker: Speaker, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            speaker,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a detached user turn (not yet part of any store).
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Speaker::User, content)
    }

    /// Create a detached assistant turn (not yet part of any store).
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Speaker::Assistant, content)
    }
}

/// The authoritative, append-only turn log of one session.
///
/// Insertion order is conversation order. Turns handed out by the store are
/// read-only; the only mutations are [`append`](Self::append),
/// [`seed`](Self::seed) and a full [`reset`](Self::reset).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageStore {
    turns: Vec<Turn>,

    /// Greeting restored by `reset()`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    greeting: Option<String>,
}

impl MessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose first turn is the assistant's greeting.
    pub fn with_greeting(greeting: impl Into<String>) -> Self {
        let mut store = Self::new();
        store.seed(greeting);
        store
    }

    /// Seed the assistant greeting.
    ///
    /// Only an empty store is seeded, so re-entering a session never
    /// duplicates the greeting.
    pub fn seed(&mut self, greeting: impl Into<String>) {
        let greeting = greeting.into();
        if self.turns.is_empty() && !greeting.trim().is_empty() {
            self.turns.push(Turn::assistant(greeting.clone()));
        }
        self.greeting = Some(greeting);
    }

    /// Append one turn and return it.
    ///
    /// User turns must carry non-blank content. Blank assistant turns are
    /// accepted as error-recovery placeholders.
    pub fn append(
        &mut self,
        speaker: Speaker,
        content: impl Into<String>,
    ) -> Result<&Turn, ChatError> {
        let content = content.into();
        if speaker == Speaker::User && content.trim().is_empty() {
            return Err(ChatError::Validation(
                "user turns must not be empty".into(),
            ));
        }
        self.turns.push(Turn::new(speaker, content));
        Ok(&self.turns[self.turns.len() - 1])
    }

    /// The full ordered history.
    pub fn history(&self) -> &[Turn] {
        &self.turns
    }

    /// Every turn except the most recent one.
    ///
    /// Used to build chat history right after the current user turn was
    /// appended, so that turn is sent once as the body and not again inside
    /// the history.
    pub fn history_excluding_last(&self) -> &[Turn] {
        match self.turns.split_last() {
            Some((_, rest)) => rest,
            None => &[],
        }
    }

    /// The most recent turn, if any.
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Replace the whole log with the seeded greeting (or nothing).
    pub fn reset(&mut self) {
        self.turns.clear();
        if let Some(greeting) = self.greeting.clone() {
            self.seed(greeting);
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Rough token estimate (4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.turns.iter().map(|t| t.content.len() / 4).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_turn() {
        let turn = Turn::user("Hello, assistant!");
        assert_eq!(turn.speaker, Speaker::User);
        assert_eq!(turn.content, "Hello, assistant!");
    }

    #[test]
    fn append_preserves_order() {
        let mut store = MessageStore::new();
        store.append(Speaker::User, "first").unwrap();
        store.append(Speaker::Assistant, "second").unwrap();
        store.append(Speaker::User, "third").unwrap();

        let contents: Vec<_> = store.history().iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, ["first", "second", "third"]);
    }

    #[test]
    fn empty_user_turn_rejected() {
        let mut store = MessageStore::new();
        let err = store.append(Speaker::User, "   \n").unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn empty_assistant_turn_allowed_as_placeholder() {
        let mut store = MessageStore::new();
        store.append(Speaker::Assistant, "").unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn greeting_seeded_once() {
        let mut store = MessageStore::with_greeting("Hi, I'm Kaputa.");
        store.seed("Hi, I'm Kaputa.");
        assert_eq!(store.len(), 1);
        assert_eq!(store.history()[0].speaker, Speaker::Assistant);

        store.append(Speaker::User, "Hello").unwrap();
        store.seed("Hi, I'm Kaputa.");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn history_excluding_last_drops_only_the_latest_turn() {
        let mut store = MessageStore::with_greeting("Welcome");
        store.append(Speaker::User, "Hello").unwrap();

        let history = store.history_excluding_last();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Welcome");
        assert!(MessageStore::new().history_excluding_last().is_empty());
    }

    #[test]
    fn reset_restores_greeting_only() {
        let mut store = MessageStore::with_greeting("Welcome");
        store.append(Speaker::User, "Hello").unwrap();
        store.append(Speaker::Assistant, "Hi!").unwrap();

        store.reset();
        assert_eq!(store.len(), 1);
        assert_eq!(store.history()[0].content, "Welcome");

        let mut plain = MessageStore::new();
        plain.append(Speaker::User, "Hello").unwrap();
        plain.reset();
        assert!(plain.is_empty());
    }

    #[test]
    fn store_survives_serialization() {
        let mut store = MessageStore::with_greeting("Welcome");
        store.append(Speaker::User, "Hello").unwrap();

        let json = serde_json::to_string(&store).unwrap();
        let mut restored: MessageStore = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.history(), store.history());

        restored.reset();
        assert_eq!(restored.len(), 1);
    }

    #[test]
    fn token_estimate() {
        let mut store = MessageStore::new();
        // 20 chars ≈ 5 tokens
        store.append(Speaker::User, "12345678901234567890").unwrap();
        assert_eq!(store.estimated_tokens(), 5);
    }
}
