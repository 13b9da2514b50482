//! Dynamic fallback and clarification text.
//!
//! Replaces the one-static-string fallback: phrasing varies by reason and by
//! how many fallbacks the user has already seen this session, and every
//! capability claim is formatted from the registry — nothing here invents
//! capabilities or order/product facts.

use serde::{Deserialize, Serialize};

use crate::registry::{Capability, CapabilityRegistry};
use crate::session::ConversationState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    NoMatch,
    LowConfidence,
    HandlerError,
    OracleUnavailable,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::NoMatch => "no_match",
            FallbackReason::LowConfidence => "low_confidence",
            FallbackReason::HandlerError => "handler_error",
            FallbackReason::OracleUnavailable => "oracle_unavailable",
        }
    }
}

/// The one response that must not depend on the oracle or the registry being
/// reachable.
pub const ORACLE_DOWN_APOLOGY: &str =
    "I'm having trouble reaching our systems right now. Please give me a moment and try again.";

/// Render fallback text for `reason`.
///
/// `state` is the conversation *before* this fallback is recorded: a non-zero
/// `consecutive_fallback_count` means the previous turn already fell back,
/// which selects the shorter repeated-occurrence variants.
pub fn generate(
    reason: FallbackReason,
    candidate: Option<&Capability>,
    state: &ConversationState,
    registry: &CapabilityRegistry,
) -> String {
    let repeated = state.consecutive_fallback_count >= 1;

    match reason {
        FallbackReason::OracleUnavailable => ORACLE_DOWN_APOLOGY.to_string(),

        FallbackReason::NoMatch => {
            if repeated {
                // Alternate the short form so a long streak never renders the
                // same text twice in a row.
                if state.fallback_parity {
                    format!(
                        "I still didn't catch that. Which of these would help: {}?",
                        capability_names(registry)
                    )
                } else {
                    format!(
                        "Hmm, I'm still not sure what you're after. Would any of these work: {}?",
                        capability_names(registry)
                    )
                }
            } else {
                format!(
                    "Hi there! Here's what I can help you with:\n{}\nWhat would you like to do?",
                    capability_menu(registry)
                )
            }
        }

        FallbackReason::LowConfidence => match candidate {
            Some(cap) => {
                let ask = format!(
                    "It sounds like you might want to {}. Is that right?",
                    lowercase_first(&cap.description)
                );
                let second_low_confidence_in_a_row =
                    repeated && state.last_fallback_reason == Some(FallbackReason::LowConfidence);
                if second_low_confidence_in_a_row {
                    if state.fallback_parity {
                        format!(
                            "{}\nIf not, here's everything I can do:\n{}",
                            ask,
                            capability_menu(registry)
                        )
                    } else {
                        format!(
                            "{}\nOr pick from the full list:\n{}",
                            ask,
                            capability_menu(registry)
                        )
                    }
                } else {
                    ask
                }
            }
            // No usable candidate: fall back to the menu ask.
            None => format!(
                "I'm not quite sure what you're after. Here's what I can help with:\n{}",
                capability_menu(registry)
            ),
        },

        FallbackReason::HandlerError => {
            if repeated {
                if state.fallback_parity {
                    format!(
                        "That still isn't working on my end — sorry about that. You could try \
                         rephrasing, or ask me about {} instead.",
                        capability_names(registry)
                    )
                } else {
                    format!(
                        "Sorry, that request keeps failing on my end. A different wording \
                         might help, or I can help with {}.",
                        capability_names(registry)
                    )
                }
            } else {
                "I'm sorry — I couldn't complete that request just now. Please try again."
                    .to_string()
            }
        }
    }
}

/// Prompt for missing required entities while a task is pending. Not a
/// fallback, but built here so all user-facing ask-text lives in one place.
pub fn entity_prompt(capability: &Capability, missing: &[String]) -> String {
    let wanted = match missing.len() {
        0 => String::from("a little more detail"),
        1 => humanize_entity(&missing[0]),
        _ => {
            let humanized: Vec<String> = missing.iter().map(|e| humanize_entity(e)).collect();
            let (last, rest) = humanized.split_last().expect("len >= 2");
            format!("{} and {}", rest.join(", "), last)
        }
    };
    format!(
        "To help with {}, I just need your {}.",
        capability.display_name, wanted
    )
}

/// Full menu: one line per capability, text taken verbatim from the registry.
fn capability_menu(registry: &CapabilityRegistry) -> String {
    registry
        .list()
        .iter()
        .map(|cap| format!("• {} — {}", cap.display_name, cap.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Short form: display names only.
fn capability_names(registry: &CapabilityRegistry) -> String {
    registry
        .list()
        .iter()
        .map(|cap| cap.display_name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn humanize_entity(entity: &str) -> String {
    entity.replace('_', " ")
}

fn lowercase_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
