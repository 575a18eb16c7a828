//! Per-session conversation memory
//!
//! A process-wide map from session id to rolling history with idle-TTL
//! expiry. All operations are serialized under a single mutex; expiry is
//! cooperative, checked on access and eagerly in `cleanup_expired`. The
//! pending low-confidence decision is a typed value on the session, not
//! an opaque metadata blob.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use recipe_chat_config::constants::memory as consts;

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Marker that the last response was blocked on low confidence and the
/// user must choose to proceed or clarify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDecision {
    pub original_query: String,
}

struct Session {
    history: Vec<Message>,
    created_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    pending_decision: Option<PendingDecision>,
    metadata: HashMap<String, String>,
}

impl Session {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            history: Vec::new(),
            created_at: now,
            last_accessed: now,
            pending_decision: None,
            metadata: HashMap::new(),
        }
    }
}

/// Read-only view of a session returned to callers.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub turn_count: usize,
    pub pending_decision: Option<PendingDecision>,
}

/// Session store with rolling history and idle-TTL expiry.
pub struct ConversationMemory {
    sessions: Mutex<HashMap<String, Session>>,
    /// Retained turns; history is capped at twice this.
    max_turns: usize,
    ttl: Duration,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(consts::MAX_TURNS, consts::SESSION_TTL_MINUTES)
    }
}

impl ConversationMemory {
    pub fn new(max_turns: usize, ttl_minutes: i64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_turns: max_turns.max(1),
            ttl: Duration::minutes(ttl_minutes.max(1)),
        }
    }

    /// Create a session and return its freshly generated id.
    pub fn create_session(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.sessions.lock().insert(id.clone(), Session::new());
        id
    }

    fn expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        now - session.last_accessed > self.ttl
    }

    /// Fetch a session snapshot; a missing or expired session is `None`.
    /// A successful read refreshes `last_accessed`.
    pub fn get_session(&self, id: &str) -> Option<SessionSnapshot> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(id) {
            Some(session) if !self.expired(session, now) => {
                session.last_accessed = now;
                Some(SessionSnapshot {
                    id: id.to_string(),
                    created_at: session.created_at,
                    last_accessed: session.last_accessed,
                    turn_count: session.history.len(),
                    pending_decision: session.pending_decision.clone(),
                })
            }
            Some(_) => {
                // Lazily evict on access.
                sessions.remove(id);
                None
            }
            None => None,
        }
    }

    /// Append a message, truncating to the most recent `2·max_turns`.
    /// Silently ignored for a missing or expired session.
    pub fn add_message(&self, id: &str, message: Message) {
        let now = Utc::now();
        let mut sessions = self.sessions.lock();
        let session = match sessions.get_mut(id) {
            Some(s) if now - s.last_accessed <= self.ttl => s,
            Some(_) => {
                sessions.remove(id);
                return;
            }
            None => return,
        };
        session.history.push(message);
        session.last_accessed = now;
        let cap = self.max_turns * 2;
        if session.history.len() > cap {
            let excess = session.history.len() - cap;
            session.history.drain(..excess);
        }
    }

    /// Full retained history, oldest first.
    pub fn get_history(&self, id: &str) -> Vec<Message> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(id) {
            Some(session) if !self.expired(session, now) => {
                session.last_accessed = now;
                session.history.clone()
            }
            _ => Vec::new(),
        }
    }

    /// Plain-text summary of the most recent `n_turns` exchanges.
    pub fn get_context_summary(&self, id: &str, n_turns: usize) -> String {
        let history = self.get_history(id);
        if history.is_empty() {
            return String::new();
        }
        let take = n_turns * 2;
        let start = history.len().saturating_sub(take);
        history[start..]
            .iter()
            .map(|m| {
                let label = match m.role {
                    MessageRole::User => "사용자",
                    MessageRole::Assistant => "어시스턴트",
                };
                format!("{}: {}", label, m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn clear_session(&self, id: &str) {
        self.sessions.lock().remove(id);
    }

    pub fn update_metadata(&self, id: &str, key: &str, value: &str) {
        if let Some(session) = self.sessions.lock().get_mut(id) {
            session.metadata.insert(key.to_string(), value.to_string());
        }
    }

    pub fn get_metadata(&self, id: &str, key: &str) -> Option<String> {
        self.sessions
            .lock()
            .get(id)
            .and_then(|s| s.metadata.get(key).cloned())
    }

    /// The pending low-confidence decision, if any.
    pub fn pending_decision(&self, id: &str) -> Option<PendingDecision> {
        self.sessions
            .lock()
            .get(id)
            .and_then(|s| s.pending_decision.clone())
    }

    pub fn set_pending_decision(&self, id: &str, decision: PendingDecision) {
        if let Some(session) = self.sessions.lock().get_mut(id) {
            session.pending_decision = Some(decision);
        }
    }

    pub fn clear_pending_decision(&self, id: &str) {
        if let Some(session) = self.sessions.lock().get_mut(id) {
            session.pending_decision = None;
        }
    }

    /// Eagerly evict every expired session; returns the eviction count.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| now - s.last_accessed <= self.ttl);
        before - sessions.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_get() {
        let memory = ConversationMemory::default();
        let id = memory.create_session();
        assert!(memory.get_session(&id).is_some());
        assert!(memory.get_session("missing").is_none());
    }

    #[test]
    fn test_history_capped_at_twice_max_turns() {
        let memory = ConversationMemory::new(2, 30);
        let id = memory.create_session();
        for i in 0..10 {
            memory.add_message(&id, Message::new(MessageRole::User, format!("q{}", i)));
            memory.add_message(&id, Message::new(MessageRole::Assistant, format!("a{}", i)));
        }
        let history = memory.get_history(&id);
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "q8");
        assert_eq!(history[3].content, "a9");
    }

    #[test]
    fn test_expired_session_not_found() {
        let memory = ConversationMemory::new(5, 30);
        let id = memory.create_session();
        {
            let mut sessions = memory.sessions.lock();
            let session = sessions.get_mut(&id).unwrap();
            session.last_accessed = Utc::now() - Duration::minutes(31);
        }
        assert!(memory.get_session(&id).is_none());
        // Lazily evicted on the failed read.
        assert_eq!(memory.session_count(), 0);
    }

    #[test]
    fn test_cleanup_expired() {
        let memory = ConversationMemory::new(5, 30);
        let live = memory.create_session();
        let stale = memory.create_session();
        {
            let mut sessions = memory.sessions.lock();
            sessions.get_mut(&stale).unwrap().last_accessed =
                Utc::now() - Duration::minutes(31);
        }
        assert_eq!(memory.cleanup_expired(), 1);
        assert!(memory.get_session(&live).is_some());
    }

    #[test]
    fn test_context_summary_recent_turns() {
        let memory = ConversationMemory::default();
        let id = memory.create_session();
        memory.add_message(&id, Message::new(MessageRole::User, "김치찌개 레시피"));
        memory.add_message(&id, Message::new(MessageRole::Assistant, "재료는 김치..."));
        let summary = memory.get_context_summary(&id, 3);
        assert!(summary.contains("사용자: 김치찌개 레시피"));
        assert!(summary.contains("어시스턴트: 재료는 김치..."));
    }

    #[test]
    fn test_pending_decision_lifecycle() {
        let memory = ConversationMemory::default();
        let id = memory.create_session();
        assert!(memory.pending_decision(&id).is_none());

        memory.set_pending_decision(
            &id,
            PendingDecision {
                original_query: "xyzqq stew".to_string(),
            },
        );
        assert_eq!(
            memory.pending_decision(&id).unwrap().original_query,
            "xyzqq stew"
        );

        memory.clear_pending_decision(&id);
        assert!(memory.pending_decision(&id).is_none());
    }

    #[test]
    fn test_add_message_refreshes_access() {
        let memory = ConversationMemory::default();
        let id = memory.create_session();
        let before = memory.get_session(&id).unwrap().last_accessed;
        memory.add_message(&id, Message::new(MessageRole::User, "hi"));
        let after = memory.get_session(&id).unwrap().last_accessed;
        assert!(after >= before);
    }
}
