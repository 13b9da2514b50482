//! Brand-voice wrapping, applied as a final formatting pass.
//!
//! Tone lives in config, not in routing logic, so the fallback and handler
//! text stays testable independent of presentation.

use crate::config::PersonaConfig;

#[derive(Debug, Clone)]
pub struct Persona {
    config: PersonaConfig,
}

impl Persona {
    pub fn new(config: PersonaConfig) -> Self {
        Self { config }
    }

    /// Wrap response text in the brand voice. Purely additive — the inner
    /// text is preserved verbatim, so distinct fallback texts stay distinct.
    pub fn wrap(&self, text: &str) -> String {
        format!(
            "{} {}\n\n{} {}",
            self.config.emoji,
            text.trim_end(),
            self.config.sign_off,
            self.config.accent_emoji
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_preserves_inner_text() {
        let persona = Persona::new(PersonaConfig::default());
        let wrapped = persona.wrap("Your order is on its way.");
        assert!(wrapped.contains("Your order is on its way."));
        assert!(wrapped.contains("Onward into the unknown!"));
        assert!(wrapped.starts_with("🏔️"));
    }

    #[test]
    fn distinct_inputs_stay_distinct() {
        let persona = Persona::new(PersonaConfig::default());
        assert_ne!(persona.wrap("a"), persona.wrap("b"));
    }
}
