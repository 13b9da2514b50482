//! Intent classification over the oracle.
//!
//! One oracle call per turn under normal operation. The oracle is asked for a
//! schema-constrained JSON object; if the reply doesn't parse, we retry once
//! with a stricter instruction, then give up with a parse error. Providers
//! wrap JSON in prose or code fences often enough that parsing is a ladder of
//! strategies, not a single `from_str`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::providers::{Oracle, ProviderError};
use crate::registry::CapabilityRegistry;
use crate::session::{ConversationState, Role};

/// Structured result of one classification call. Produced fresh per turn,
/// never mutated.
#[derive(Debug, Clone)]
pub struct Classification {
    /// `None` means the oracle reported no matching capability. The id is
    /// *not* validated against the registry here — that's the router's job.
    pub capability_id: Option<String>,
    /// Self-reported, clamped to [0, 1].
    pub confidence: f32,
    /// Extracted entities, keys normalized to lower_snake_case.
    pub entities: HashMap<String, String>,
    pub rationale: String,
}

impl Classification {
    /// A "nothing matched" result, used when parse errors are recovered
    /// locally as no-match.
    pub fn none() -> Self {
        Self {
            capability_id: None,
            confidence: 0.0,
            entities: HashMap::new(),
            rationale: String::new(),
        }
    }
}

#[derive(Debug)]
pub enum ClassifyError {
    /// Oracle output was unusable even after the strict retry.
    Parse(String),
    /// Network/timeout/provider fault.
    OracleUnavailable(String),
}

impl fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifyError::Parse(detail) => {
                write!(f, "oracle returned unparseable classification: {}", detail)
            }
            ClassifyError::OracleUnavailable(detail) => {
                write!(f, "oracle unavailable: {}", detail)
            }
        }
    }
}

impl std::error::Error for ClassifyError {}

/// Map an oracle failure to `OracleUnavailable`, preferring the classified
/// provider summary over the raw error chain for the log detail.
fn unavailable(e: anyhow::Error) -> ClassifyError {
    let detail = match e.downcast_ref::<ProviderError>() {
        Some(provider_err) => provider_err.log_summary(),
        None => e.to_string(),
    };
    ClassifyError::OracleUnavailable(detail)
}

pub struct IntentClassifier {
    oracle: Arc<dyn Oracle>,
    context_turns: usize,
    /// Total time allowed for one classification, covering the initial call
    /// and the strict-JSON retry together.
    call_budget: Duration,
}

impl IntentClassifier {
    pub fn new(oracle: Arc<dyn Oracle>, context_turns: usize, call_budget: Duration) -> Self {
        Self {
            oracle,
            context_turns,
            call_budget,
        }
    }

    /// Classify one user message. Does not mutate conversation state.
    pub async fn classify(
        &self,
        message: &str,
        state: &ConversationState,
        registry: &CapabilityRegistry,
    ) -> Result<Classification, ClassifyError> {
        let system = build_system_prompt(registry);
        let user = build_user_prompt(message, state, self.context_turns);
        let started = Instant::now();

        let raw = self
            .oracle
            .complete(&system, &user)
            .await
            .map_err(unavailable)?;

        if let Some(classification) = parse_classification(&raw) {
            debug!(
                capability = ?classification.capability_id,
                confidence = classification.confidence,
                rationale = %classification.rationale,
                "Classification parsed"
            );
            return Ok(classification);
        }

        // The retry shares the first call's time budget rather than getting a
        // fresh one, so a slow provider can't double the worst-case latency.
        let remaining = self
            .call_budget
            .checked_sub(started.elapsed())
            .filter(|r| !r.is_zero())
            .ok_or_else(|| {
                ClassifyError::OracleUnavailable(
                    "call budget exhausted before the strict retry".to_string(),
                )
            })?;

        warn!("Classification output unparseable, retrying with strict instruction");
        let strict_user = format!(
            "{}\n\nYour previous reply could not be parsed. Respond with ONLY a valid JSON \
             object matching the required shape. No prose, no code fences.",
            user
        );
        let retry = tokio::time::timeout(remaining, self.oracle.complete(&system, &strict_user))
            .await
            .map_err(|_| {
                ClassifyError::OracleUnavailable(
                    "strict retry exceeded the remaining call budget".to_string(),
                )
            })?
            .map_err(unavailable)?;

        parse_classification(&retry).ok_or_else(|| {
            // Truncate on a char boundary for the error detail.
            let mut end = retry.len().min(200);
            while end > 0 && !retry.is_char_boundary(end) {
                end -= 1;
            }
            ClassifyError::Parse(retry[..end].to_string())
        })
    }
}

/// Capability list exposed to the oracle: id, description, and example
/// phrases only. Required entities and handler internals stay out of the
/// prompt.
fn build_system_prompt(registry: &CapabilityRegistry) -> String {
    let mut prompt = String::from(
        "You are the intent classifier for a customer-service agent. \
         Classify the customer's latest message into exactly one of the supported \
         capabilities, or \"none\" if nothing applies.\n\nSupported capabilities:\n",
    );
    for cap in registry.list() {
        prompt.push_str(&format!("- {}: {}\n", cap.id, cap.description));
        if !cap.example_phrases.is_empty() {
            prompt.push_str(&format!(
                "  examples: {}\n",
                cap.example_phrases
                    .iter()
                    .map(|p| format!("\"{}\"", p))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
    }
    prompt.push_str(
        "\nAlso extract any entities the customer supplies (for example an email address \
         or an order number), using lower_snake_case keys.\n\
         Respond with ONLY a JSON object of this shape:\n\
         {\"capability\": \"<id or none>\", \"confidence\": <0.0-1.0>, \
         \"entities\": {\"<key>\": \"<value>\"}, \"rationale\": \"<one short sentence>\"}",
    );
    prompt
}

fn build_user_prompt(message: &str, state: &ConversationState, context_turns: usize) -> String {
    let mut prompt = String::new();
    let recent = state.recent_turns(context_turns);
    if !recent.is_empty() {
        prompt.push_str("Recent conversation:\n");
        for turn in recent {
            let speaker = match turn.role {
                Role::User => "customer",
                Role::Agent => "agent",
            };
            prompt.push_str(&format!("{}: {}\n", speaker, turn.text));
        }
        prompt.push('\n');
    }
    prompt.push_str(&format!("Customer message: {}", message));
    prompt
}

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap());
static EMBEDDED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)\{[^{}]*"capability"[^{}]*\}"#).unwrap());

#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default)]
    capability: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    entities: HashMap<String, serde_json::Value>,
    #[serde(default)]
    rationale: String,
}

/// Parsing ladder: direct object, fenced code block, then the first embedded
/// object mentioning "capability".
pub fn parse_classification(raw: &str) -> Option<Classification> {
    let trimmed = raw.trim();

    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        if let Ok(parsed) = serde_json::from_str::<RawClassification>(trimmed) {
            return Some(normalize(parsed));
        }
    }

    if let Some(captures) = FENCED_JSON.captures(trimmed) {
        if let Ok(parsed) = serde_json::from_str::<RawClassification>(&captures[1]) {
            return Some(normalize(parsed));
        }
    }

    if let Some(m) = EMBEDDED_JSON.find(trimmed) {
        if let Ok(parsed) = serde_json::from_str::<RawClassification>(m.as_str()) {
            return Some(normalize(parsed));
        }
    }

    None
}

fn normalize(raw: RawClassification) -> Classification {
    let capability_id = raw.capability.and_then(|id| {
        let id = id.trim().to_string();
        if id.is_empty() || id.eq_ignore_ascii_case("none") || id.eq_ignore_ascii_case("null") {
            None
        } else {
            Some(id)
        }
    });

    let entities = raw
        .entities
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => return None,
                other => other.to_string(),
            };
            let value = value.trim().to_string();
            if value.is_empty() {
                None
            } else {
                Some((normalize_entity_key(&key), value))
            }
        })
        .collect();

    Classification {
        capability_id,
        confidence: raw.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
        entities,
        rationale: raw.rationale,
    }
}

/// Oracles are inconsistent about entity-key casing ("OrderNumber", "Email").
/// Normalize to lower_snake_case so required-entity checks are stable.
pub fn normalize_entity_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for ch in key.trim().chars() {
        if ch.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else if ch == ' ' || ch == '-' {
            if !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        } else {
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
            out.push(ch);
        }
    }
    out
}
