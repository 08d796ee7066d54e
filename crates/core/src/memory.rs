use crate::models::ChatTurn;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Append-only transcript for one chat session. Lives in process memory
/// only; restarts start from an empty transcript.
#[derive(Debug, Default, Clone)]
pub struct ConversationMemory {
    turns: Vec<ChatTurn>,
}

impl ConversationMemory {
    pub fn record(&mut self, question: &str, answer: &str) {
        self.turns.push(ChatTurn::user(question));
        self.turns.push(ChatTurn::assistant(answer));
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }
}

/// Per-session conversation state keyed by a caller-supplied session id.
/// Sessions are created on first use and never observe each other.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, ConversationMemory>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn history(&self, session_id: &str) -> Vec<ChatTurn> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|memory| memory.turns().to_vec())
            .unwrap_or_default()
    }

    pub async fn record(&self, session_id: &str, question: &str, answer: &str) {
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .record(question, answer);
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatRole;

    #[tokio::test]
    async fn turns_append_in_order() {
        let registry = SessionRegistry::new();
        registry.record("s1", "first question", "first answer").await;
        registry.record("s1", "second question", "second answer").await;

        let history = registry.history("s1").await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].role, ChatRole::User);
        assert_eq!(history[0].text, "first question");
        assert_eq!(history[3].role, ChatRole::Assistant);
        assert_eq!(history[3].text, "second answer");
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let registry = SessionRegistry::new();
        registry.record("alice", "my secret plan", "noted").await;
        registry.record("bob", "hello", "hi").await;

        let bob = registry.history("bob").await;
        assert_eq!(bob.len(), 2);
        assert!(bob.iter().all(|turn| !turn.text.contains("secret")));
        assert_eq!(registry.session_count().await, 2);
    }

    #[tokio::test]
    async fn unknown_session_has_empty_history() {
        let registry = SessionRegistry::new();
        assert!(registry.history("nobody").await.is_empty());
    }
}
