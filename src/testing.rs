//! Scripted oracle for tests. Replies are consumed in order; an exhausted
//! script answers with a no-match classification so multi-turn tests don't
//! need to pad their scripts.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::providers::{Oracle, ProviderError, ProviderErrorKind};

#[derive(Debug, Clone)]
pub struct MockCall {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Return this text as the oracle's completion.
    Text(String),
    /// Fail the call as a timeout.
    Unavailable,
}

pub struct MockOracle {
    replies: Mutex<VecDeque<ScriptedReply>>,
    pub call_log: Mutex<Vec<MockCall>>,
}

impl MockOracle {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self::with_replies(Vec::new())
    }

    pub fn with_replies(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            call_log: Mutex::new(Vec::new()),
        }
    }

    /// Queue another reply mid-test.
    #[allow(dead_code)]
    pub async fn push_reply(&self, reply: ScriptedReply) {
        self.replies.lock().await.push_back(reply);
    }

    pub async fn call_count(&self) -> usize {
        self.call_log.lock().await.len()
    }
}

#[async_trait]
impl Oracle for MockOracle {
    async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String> {
        self.call_log.lock().await.push(MockCall {
            system: system.to_string(),
            user: user.to_string(),
        });

        match self.replies.lock().await.pop_front() {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Unavailable) => Err(ProviderError {
                kind: ProviderErrorKind::Timeout,
                status: None,
                message: "scripted outage".to_string(),
                retry_after_secs: None,
            }
            .into()),
            None => Ok(classification_json(None, 0.0, &[])),
        }
    }
}

/// Build a well-formed classification reply, the way a cooperative oracle
/// would answer.
pub fn classification_json(
    capability: Option<&str>,
    confidence: f32,
    entities: &[(&str, &str)],
) -> String {
    let entity_map: serde_json::Map<String, serde_json::Value> = entities
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
        .collect();
    serde_json::json!({
        "capability": capability.unwrap_or("none"),
        "confidence": confidence,
        "entities": entity_map,
        "rationale": "scripted",
    })
    .to_string()
}
