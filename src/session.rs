//! Conversation session tracking
//!
//! When a worker invocation returns a continuation session id, later
//! invocations of the same role can resume that worker-side context instead
//! of re-sending system instructions. The tracker keeps at most one session
//! per role, records the message exchange, and aggregates per-session token
//! totals. Sessions never expire; they are dropped only by explicit clear.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::agent::AgentRole;
use crate::worker::TokenUsage;

/// Who produced a message within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

/// One message in a conversation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub speaker: Speaker,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

/// Worker-side conversation context for one role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub role: AgentRole,
    /// Opaque id the worker accepts to resume this context
    pub continuation_id: String,
    pub messages: Vec<SessionMessage>,
    pub totals: TokenUsage,
}

/// At most one [`ConversationSession`] per role
#[derive(Default)]
pub struct SessionTracker {
    sessions: Mutex<HashMap<AgentRole, ConversationSession>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continuation id to pass to the next invocation of `role`, if any
    pub fn continuation_id(&self, role: AgentRole) -> Option<String> {
        self.sessions
            .lock()
            .unwrap()
            .get(&role)
            .map(|s| s.continuation_id.clone())
    }

    /// Record one successful prompt/response exchange.
    ///
    /// The session is created on the first exchange that carries a
    /// continuation id and updated (id refreshed, messages appended, totals
    /// accumulated) on every one after that. Exchanges without a
    /// continuation id leave the tracker untouched.
    pub fn record_exchange(
        &self,
        role: AgentRole,
        prompt: &str,
        output: &str,
        continuation_id: Option<&str>,
        usage: Option<TokenUsage>,
    ) {
        let Some(continuation_id) = continuation_id else {
            return;
        };

        let now = Utc::now();
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .entry(role)
            .or_insert_with(|| ConversationSession {
                role,
                continuation_id: continuation_id.to_string(),
                messages: Vec::new(),
                totals: TokenUsage::default(),
            });

        session.continuation_id = continuation_id.to_string();
        session.messages.push(SessionMessage {
            speaker: Speaker::User,
            content: prompt.to_string(),
            timestamp: now,
            usage: None,
        });
        session.messages.push(SessionMessage {
            speaker: Speaker::Assistant,
            content: output.to_string(),
            timestamp: now,
            usage,
        });
        if let Some(usage) = usage {
            session.totals.add(&usage);
        }
    }

    /// Snapshot of one role's session
    pub fn get(&self, role: AgentRole) -> Option<ConversationSession> {
        self.sessions.lock().unwrap().get(&role).cloned()
    }

    /// Snapshots of all sessions, in role order
    pub fn sessions(&self) -> Vec<ConversationSession> {
        let mut list: Vec<_> = self.sessions.lock().unwrap().values().cloned().collect();
        list.sort_by_key(|s| s.role);
        list
    }

    /// Drop one role's session so its next run starts fresh
    pub fn clear(&self, role: AgentRole) -> bool {
        self.sessions.lock().unwrap().remove(&role).is_some()
    }

    /// Drop every session
    pub fn clear_all(&self) {
        self.sessions.lock().unwrap().clear();
    }
}
