//! Deterministic routing state machine.
//!
//! Converts a classification result plus the session's pending state into one
//! of three outcomes: dispatch a handler, ask for missing entities, or fall
//! back. The classifier's capability id is never trusted until it has been
//! validated against the registry, and a below-threshold confidence is
//! treated as no match even when a valid id came back.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::classifier::Classification;
use crate::fallback::FallbackReason;
use crate::registry::CapabilityRegistry;
use crate::session::ConversationState;

/// Pending multi-turn routing state, threaded through the session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RouterState {
    #[default]
    Idle,
    /// A capability matched but required entities are still missing.
    AwaitingEntities {
        capability_id: String,
        entities: HashMap<String, String>,
    },
}

/// What the agent should do with this turn. Dispatching and fallback are
/// transient — `RouterState` is back to a resting value by the time one of
/// these is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterOutcome {
    Dispatch {
        capability_id: String,
        entities: HashMap<String, String>,
    },
    AskForEntities {
        capability_id: String,
        missing: Vec<String>,
    },
    Fallback {
        reason: FallbackReason,
        /// Registry-validated candidate for low-confidence clarification.
        candidate: Option<String>,
    },
}

pub struct Router {
    confidence_threshold: f32,
}

impl Router {
    pub fn new(confidence_threshold: f32) -> Self {
        Self {
            confidence_threshold,
        }
    }

    /// Run one turn of the state machine. The router is the only writer of
    /// `state.router_state`.
    pub fn decide(
        &self,
        registry: &CapabilityRegistry,
        state: &mut ConversationState,
        classification: &Classification,
    ) -> RouterOutcome {
        // Registry validation first: a stale or hallucinated id is treated
        // exactly like "none".
        let validated: Option<String> = match &classification.capability_id {
            Some(id) if registry.contains(id) => Some(id.clone()),
            Some(id) => {
                warn!(
                    capability = %id,
                    confidence = classification.confidence,
                    "Classifier referenced unknown capability; treating as no match"
                );
                None
            }
            None => None,
        };
        let confident = classification.confidence >= self.confidence_threshold;

        match state.router_state.clone() {
            RouterState::Idle => match validated {
                Some(id) if confident => {
                    self.begin_task(registry, state, &id, classification.entities.clone())
                }
                Some(id) => {
                    debug!(
                        capability = %id,
                        confidence = classification.confidence,
                        threshold = self.confidence_threshold,
                        "Confidence below threshold; not dispatching"
                    );
                    RouterOutcome::Fallback {
                        reason: FallbackReason::LowConfidence,
                        candidate: Some(id),
                    }
                }
                None => RouterOutcome::Fallback {
                    reason: FallbackReason::NoMatch,
                    candidate: None,
                },
            },

            RouterState::AwaitingEntities {
                capability_id: pending,
                entities: mut held,
            } => {
                match validated {
                    // Confident switch to a different capability: abandon the
                    // pending task and route to the new target.
                    Some(id) if confident && id != pending => {
                        info!(
                            from = %pending,
                            to = %id,
                            "Topic switch; abandoning pending task"
                        );
                        self.begin_task(registry, state, &id, classification.entities.clone())
                    }
                    // Same capability, or an unrelated/low-confidence reply:
                    // merge whatever entities this turn supplied and re-check.
                    _ => {
                        for (key, value) in &classification.entities {
                            held.insert(key.clone(), value.clone());
                        }
                        self.begin_task(registry, state, &pending, held)
                    }
                }
            }
        }
    }

    /// Start (or continue) a task for `capability_id` with the entities
    /// gathered so far. Dispatches when all required entities are present,
    /// otherwise parks the task and asks for what's missing.
    fn begin_task(
        &self,
        registry: &CapabilityRegistry,
        state: &mut ConversationState,
        capability_id: &str,
        entities: HashMap<String, String>,
    ) -> RouterOutcome {
        let capability = match registry.get(capability_id) {
            Ok(c) => c,
            // Unreachable after validation, but never panic on routing.
            Err(e) => {
                warn!(error = %e, "Capability vanished between validation and dispatch");
                state.router_state = RouterState::Idle;
                return RouterOutcome::Fallback {
                    reason: FallbackReason::NoMatch,
                    candidate: None,
                };
            }
        };

        let missing: Vec<String> = capability
            .required_entities
            .iter()
            .filter(|required| !entities.contains_key(*required))
            .cloned()
            .collect();

        if missing.is_empty() {
            state.router_state = RouterState::Idle;
            info!(capability = %capability_id, "Dispatching to handler");
            RouterOutcome::Dispatch {
                capability_id: capability_id.to_string(),
                entities,
            }
        } else {
            debug!(capability = %capability_id, missing = ?missing, "Awaiting entities");
            state.router_state = RouterState::AwaitingEntities {
                capability_id: capability_id.to_string(),
                entities,
            };
            RouterOutcome::AskForEntities {
                capability_id: capability_id.to_string(),
                missing,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_capabilities;

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::new(default_capabilities()).unwrap()
    }

    fn router() -> Router {
        Router::new(0.55)
    }

    fn classified(
        capability: Option<&str>,
        confidence: f32,
        entities: &[(&str, &str)],
    ) -> Classification {
        Classification {
            capability_id: capability.map(str::to_string),
            confidence,
            entities: entities
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            rationale: String::new(),
        }
    }

    #[test]
    fn no_match_falls_back() {
        let mut state = ConversationState::new("s1");
        let outcome = router().decide(&registry(), &mut state, &classified(None, 0.0, &[]));
        assert_eq!(
            outcome,
            RouterOutcome::Fallback {
                reason: FallbackReason::NoMatch,
                candidate: None
            }
        );
        assert_eq!(state.router_state, RouterState::Idle);
    }

    #[test]
    fn low_confidence_never_dispatches_even_with_valid_id() {
        let mut state = ConversationState::new("s1");
        let outcome = router().decide(
            &registry(),
            &mut state,
            &classified(Some("product_recommendation"), 0.4, &[]),
        );
        assert_eq!(
            outcome,
            RouterOutcome::Fallback {
                reason: FallbackReason::LowConfidence,
                candidate: Some("product_recommendation".to_string())
            }
        );
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut state = ConversationState::new("s1");
        let outcome = router().decide(
            &registry(),
            &mut state,
            &classified(Some("product_recommendation"), 0.55, &[]),
        );
        assert!(matches!(outcome, RouterOutcome::Dispatch { .. }));
    }

    #[test]
    fn ghost_capability_treated_as_no_match() {
        let mut state = ConversationState::new("s1");
        let outcome = router().decide(
            &registry(),
            &mut state,
            &classified(Some("ghost_capability"), 0.9, &[]),
        );
        assert_eq!(
            outcome,
            RouterOutcome::Fallback {
                reason: FallbackReason::NoMatch,
                candidate: None
            }
        );
    }

    #[test]
    fn missing_entities_parks_the_task() {
        let mut state = ConversationState::new("s1");
        let outcome = router().decide(
            &registry(),
            &mut state,
            &classified(Some("order_status"), 0.9, &[]),
        );
        match outcome {
            RouterOutcome::AskForEntities {
                capability_id,
                missing,
            } => {
                assert_eq!(capability_id, "order_status");
                assert_eq!(missing, vec!["email", "order_number"]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(matches!(
            state.router_state,
            RouterState::AwaitingEntities { .. }
        ));
    }

    #[test]
    fn entities_merge_across_turns_until_complete() {
        let registry = registry();
        let router = router();
        let mut state = ConversationState::new("s1");

        router.decide(
            &registry,
            &mut state,
            &classified(Some("order_status"), 0.9, &[("email", "a@b.com")]),
        );

        // Second turn supplies the remaining entity; intent may come back as
        // none on a bare order number.
        let outcome = router.decide(
            &registry,
            &mut state,
            &classified(None, 0.2, &[("order_number", "#W001")]),
        );
        match outcome {
            RouterOutcome::Dispatch {
                capability_id,
                entities,
            } => {
                assert_eq!(capability_id, "order_status");
                assert_eq!(entities.get("email").map(String::as_str), Some("a@b.com"));
                assert_eq!(
                    entities.get("order_number").map(String::as_str),
                    Some("#W001")
                );
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(state.router_state, RouterState::Idle);
    }

    #[test]
    fn off_topic_low_confidence_stays_awaiting() {
        let registry = registry();
        let router = router();
        let mut state = ConversationState::new("s1");

        router.decide(
            &registry,
            &mut state,
            &classified(Some("order_status"), 0.9, &[]),
        );
        let outcome = router.decide(
            &registry,
            &mut state,
            &classified(Some("product_recommendation"), 0.3, &[]),
        );
        assert!(matches!(outcome, RouterOutcome::AskForEntities { .. }));
        assert!(matches!(
            state.router_state,
            RouterState::AwaitingEntities { ref capability_id, .. } if capability_id == "order_status"
        ));
    }

    #[test]
    fn confident_topic_switch_abandons_pending_task() {
        let registry = registry();
        let router = router();
        let mut state = ConversationState::new("s1");

        router.decide(
            &registry,
            &mut state,
            &classified(Some("order_status"), 0.9, &[("email", "a@b.com")]),
        );
        let outcome = router.decide(
            &registry,
            &mut state,
            &classified(Some("early_risers_promotion"), 0.9, &[]),
        );
        assert_eq!(
            outcome,
            RouterOutcome::Dispatch {
                capability_id: "early_risers_promotion".to_string(),
                entities: HashMap::new(),
            }
        );
        assert_eq!(state.router_state, RouterState::Idle);
    }

    #[test]
    fn ghost_id_while_awaiting_keeps_pending_task() {
        let registry = registry();
        let router = router();
        let mut state = ConversationState::new("s1");

        router.decide(
            &registry,
            &mut state,
            &classified(Some("order_status"), 0.9, &[]),
        );
        let outcome = router.decide(
            &registry,
            &mut state,
            &classified(Some("ghost_capability"), 0.95, &[]),
        );
        assert!(matches!(outcome, RouterOutcome::AskForEntities { .. }));
    }
}
