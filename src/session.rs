//! Per-session conversation state and the session store.
//!
//! One session owns its state exclusively; the router is the only writer.
//! Nothing here persists beyond the process — the store exists so the agent
//! can be tested without process-level fixtures and so independent sessions
//! never share mutable state.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::fallback::FallbackReason;
use crate::router::RouterState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ConversationState {
    pub session_id: String,
    turns: Vec<ConversationTurn>,
    pub last_fallback_reason: Option<FallbackReason>,
    pub consecutive_fallback_count: u32,
    /// Flips on every recorded fallback. The counter saturates, so repeated
    /// phrasings alternate on this instead to stay distinct back-to-back.
    pub fallback_parity: bool,
    pub router_state: RouterState,
}

impl ConversationState {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            turns: Vec::new(),
            last_fallback_reason: None,
            consecutive_fallback_count: 0,
            fallback_parity: false,
            router_state: RouterState::Idle,
        }
    }

    pub fn push_user(&mut self, text: &str) {
        self.push_turn(Role::User, text);
    }

    pub fn push_agent(&mut self, text: &str) {
        self.push_turn(Role::Agent, text);
    }

    fn push_turn(&mut self, role: Role, text: &str) {
        self.turns.push(ConversationTurn {
            role,
            text: text.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Last `n` turns, oldest first.
    pub fn recent_turns(&self, n: usize) -> &[ConversationTurn] {
        let skip = self.turns.len().saturating_sub(n);
        &self.turns[skip..]
    }

    pub fn last_user_text(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.text.as_str())
    }

    /// Drop the oldest turns past the retention window.
    pub fn trim_turns(&mut self, max_turns: usize) {
        if self.turns.len() > max_turns {
            let drop = self.turns.len() - max_turns;
            self.turns.drain(..drop);
        }
    }

    /// Record one fallback occurrence. The counter saturates at `cap` so a
    /// user mashing the same unmatched phrase can't overflow anything.
    pub fn record_fallback(&mut self, reason: FallbackReason, cap: u32) {
        self.last_fallback_reason = Some(reason);
        if self.consecutive_fallback_count < cap {
            self.consecutive_fallback_count += 1;
        }
        self.fallback_parity = !self.fallback_parity;
    }

    /// Any non-fallback response resets the streak.
    pub fn clear_fallbacks(&mut self) {
        self.last_fallback_reason = None;
        self.consecutive_fallback_count = 0;
        self.fallback_parity = false;
    }
}

/// Session-scoped state access. Keeps state ownership per session explicit
/// instead of a process-wide mutable store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the state for `session_id`, creating a fresh one on first use.
    async fn get_state(&self, session_id: &str) -> ConversationState;
    async fn save_state(&self, session_id: &str, state: ConversationState);
}

pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, ConversationState>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_state(&self, session_id: &str) -> ConversationState {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_else(|| ConversationState::new(session_id))
    }

    async fn save_state(&self, session_id: &str, state: ConversationState) {
        self.sessions
            .lock()
            .await
            .insert(session_id.to_string(), state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_counter_saturates_at_cap() {
        let mut state = ConversationState::new("s1");
        for _ in 0..10 {
            state.record_fallback(FallbackReason::NoMatch, 5);
        }
        assert_eq!(state.consecutive_fallback_count, 5);
        assert_eq!(state.last_fallback_reason, Some(FallbackReason::NoMatch));
    }

    #[test]
    fn clear_resets_counter_and_reason() {
        let mut state = ConversationState::new("s1");
        state.record_fallback(FallbackReason::LowConfidence, 5);
        state.clear_fallbacks();
        assert_eq!(state.consecutive_fallback_count, 0);
        assert_eq!(state.last_fallback_reason, None);
        assert!(!state.fallback_parity);
    }

    #[test]
    fn parity_keeps_alternating_past_the_counter_cap() {
        let mut state = ConversationState::new("s1");
        let mut seen = Vec::new();
        for _ in 0..8 {
            state.record_fallback(FallbackReason::NoMatch, 5);
            seen.push(state.fallback_parity);
        }
        assert_eq!(state.consecutive_fallback_count, 5);
        for pair in seen.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test]
    fn recent_turns_returns_tail_window() {
        let mut state = ConversationState::new("s1");
        for i in 0..8 {
            state.push_user(&format!("message {}", i));
        }
        let recent = state.recent_turns(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].text, "message 5");
        assert_eq!(recent[2].text, "message 7");
    }

    #[test]
    fn trim_drops_oldest_turns() {
        let mut state = ConversationState::new("s1");
        for i in 0..6 {
            state.push_user(&format!("m{}", i));
        }
        state.trim_turns(4);
        assert_eq!(state.turns().len(), 4);
        assert_eq!(state.turns()[0].text, "m2");
    }

    #[test]
    fn last_user_text_skips_agent_turns() {
        let mut state = ConversationState::new("s1");
        state.push_user("hello");
        state.push_agent("hi there");
        assert_eq!(state.last_user_text(), Some("hello"));
    }

    #[tokio::test]
    async fn store_roundtrips_state_per_session() {
        let store = InMemorySessionStore::new();
        let mut state = store.get_state("a").await;
        state.push_user("first");
        store.save_state("a", state).await;

        let reloaded = store.get_state("a").await;
        assert_eq!(reloaded.turns().len(), 1);

        // Independent session starts fresh.
        let other = store.get_state("b").await;
        assert!(other.turns().is_empty());
    }
}
