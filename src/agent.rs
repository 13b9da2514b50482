//! The chat surface and error boundary.
//!
//! `submit_turn` is the only entry point the surrounding UI layer calls.
//! Parse failures, oracle outages, handler failures, and hallucinated
//! capability ids are all caught here; callers only ever see rendered text
//! plus a machine-readable status.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::classifier::{Classification, ClassifyError, IntentClassifier};
use crate::config::RoutingConfig;
use crate::fallback::{self, FallbackReason};
use crate::handlers::CapabilityHandler;
use crate::persona::Persona;
use crate::providers::Oracle;
use crate::registry::CapabilityRegistry;
use crate::router::{Router, RouterOutcome};
use crate::session::{ConversationState, SessionStore};

/// Machine-readable outcome of one turn, for logging and observability.
/// Never shown to the end user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    Dispatched { capability_id: String },
    AwaitingEntities { capability_id: String },
    Fallback { reason: FallbackReason },
}

impl TurnStatus {
    pub fn code(&self) -> String {
        match self {
            TurnStatus::Dispatched { capability_id } => format!("dispatched:{}", capability_id),
            TurnStatus::AwaitingEntities { capability_id } => {
                format!("awaiting_entities:{}", capability_id)
            }
            TurnStatus::Fallback { reason } => format!("fallback:{}", reason.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentReply {
    pub text: String,
    pub status: TurnStatus,
}

pub struct Agent {
    classifier: IntentClassifier,
    router: Router,
    registry: Arc<CapabilityRegistry>,
    handlers: HashMap<String, Arc<dyn CapabilityHandler>>,
    sessions: Arc<dyn SessionStore>,
    persona: Persona,
    max_fallback_count: u32,
    max_turns: usize,
}

impl Agent {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        registry: Arc<CapabilityRegistry>,
        handlers: HashMap<String, Arc<dyn CapabilityHandler>>,
        sessions: Arc<dyn SessionStore>,
        routing: &RoutingConfig,
        oracle_call_budget: Duration,
        persona: Persona,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(oracle, routing.context_turns, oracle_call_budget),
            router: Router::new(routing.confidence_threshold),
            registry,
            handlers,
            sessions,
            persona,
            max_fallback_count: routing.max_fallback_count,
            max_turns: routing.max_turns,
        }
    }

    /// Process one user turn to completion. Turns within a session are
    /// strictly sequential; callers must not overlap calls for one session.
    pub async fn submit_turn(&self, session_id: &str, user_text: &str) -> AgentReply {
        let message = user_text.trim();
        let mut state = self.sessions.get_state(session_id).await;

        // Blank input skips the oracle entirely and routes as no-match.
        let classification = if message.is_empty() {
            Classification::none()
        } else {
            match self
                .classifier
                .classify(message, &state, &self.registry)
                .await
            {
                Ok(c) => c,
                Err(ClassifyError::Parse(detail)) => {
                    warn!(
                        session = %session_id,
                        detail = %detail,
                        "Unparseable classification after retry; treating as no match"
                    );
                    Classification::none()
                }
                Err(ClassifyError::OracleUnavailable(detail)) => {
                    // Service-health signal; the user sees only the fixed apology.
                    error!(session = %session_id, detail = %detail, "Oracle unavailable");
                    state.push_user(message);
                    let text = self.persona.wrap(fallback::ORACLE_DOWN_APOLOGY);
                    state.record_fallback(
                        FallbackReason::OracleUnavailable,
                        self.max_fallback_count,
                    );
                    return self
                        .finish_turn(
                            session_id,
                            state,
                            text,
                            TurnStatus::Fallback {
                                reason: FallbackReason::OracleUnavailable,
                            },
                        )
                        .await;
                }
            }
        };

        if !message.is_empty() {
            state.push_user(message);
        }

        let outcome = self
            .router
            .decide(&self.registry, &mut state, &classification);

        let (raw_text, status) = match outcome {
            RouterOutcome::Dispatch {
                capability_id,
                entities,
            } => match self.dispatch(&capability_id, &entities, &state).await {
                Ok(text) => {
                    state.clear_fallbacks();
                    info!(session = %session_id, capability = %capability_id, "Turn dispatched");
                    (text, TurnStatus::Dispatched { capability_id })
                }
                Err(e) => {
                    error!(
                        session = %session_id,
                        capability = %capability_id,
                        error = %e,
                        "Handler failed"
                    );
                    let text = fallback::generate(
                        FallbackReason::HandlerError,
                        None,
                        &state,
                        &self.registry,
                    );
                    state.record_fallback(FallbackReason::HandlerError, self.max_fallback_count);
                    (
                        text,
                        TurnStatus::Fallback {
                            reason: FallbackReason::HandlerError,
                        },
                    )
                }
            },

            RouterOutcome::AskForEntities {
                capability_id,
                missing,
            } => {
                let text = match self.registry.get(&capability_id) {
                    Ok(cap) => fallback::entity_prompt(cap, &missing),
                    Err(_) => {
                        fallback::generate(FallbackReason::NoMatch, None, &state, &self.registry)
                    }
                };
                // An entity prompt is progress on a matched task, not a fallback.
                state.clear_fallbacks();
                (text, TurnStatus::AwaitingEntities { capability_id })
            }

            RouterOutcome::Fallback { reason, candidate } => {
                let candidate_cap = candidate
                    .as_deref()
                    .and_then(|id| self.registry.get(id).ok());
                let text = fallback::generate(reason, candidate_cap, &state, &self.registry);
                state.record_fallback(reason, self.max_fallback_count);
                (text, TurnStatus::Fallback { reason })
            }
        };

        let text = self.persona.wrap(&raw_text);
        self.finish_turn(session_id, state, text, status).await
    }

    async fn dispatch(
        &self,
        capability_id: &str,
        entities: &HashMap<String, String>,
        state: &ConversationState,
    ) -> anyhow::Result<String> {
        let handler = self.handlers.get(capability_id).ok_or_else(|| {
            anyhow::anyhow!("no handler registered for capability '{}'", capability_id)
        })?;
        Ok(handler.handle(entities, state).await?)
    }

    async fn finish_turn(
        &self,
        session_id: &str,
        mut state: ConversationState,
        text: String,
        status: TurnStatus,
    ) -> AgentReply {
        state.push_agent(&text);
        state.trim_turns(self.max_turns);
        self.sessions.save_state(session_id, state).await;
        info!(session = %session_id, status = %status.code(), "Turn complete");
        AgentReply { text, status }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(
            TurnStatus::Dispatched {
                capability_id: "order_status".to_string()
            }
            .code(),
            "dispatched:order_status"
        );
        assert_eq!(
            TurnStatus::Fallback {
                reason: FallbackReason::LowConfidence
            }
            .code(),
            "fallback:low_confidence"
        );
        assert_eq!(
            TurnStatus::AwaitingEntities {
                capability_id: "order_status".to_string()
            }
            .code(),
            "awaiting_entities:order_status"
        );
    }
}
