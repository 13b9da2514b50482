use std::path::Path;

use serde::Deserialize;

use crate::registry::Capability;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub persona: PersonaConfig,
    #[serde(default)]
    pub data: DataConfig,
    /// Capability registry content. When absent, the built-in set is used.
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<Capability>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Per-call budget for the oracle; the strict-JSON retry gets the same
    /// budget, not a fresh one on top.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_timeout_secs() -> u64 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoutingConfig {
    /// Classifications below this confidence are treated as "no match",
    /// even when a capability id was returned.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// How many recent turns are included in the classifier prompt.
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,
    /// Saturation cap for the consecutive-fallback counter.
    #[serde(default = "default_max_fallback_count")]
    pub max_fallback_count: u32,
    /// Turns retained per session before the oldest are dropped.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            context_turns: default_context_turns(),
            max_fallback_count: default_max_fallback_count(),
            max_turns: default_max_turns(),
        }
    }
}

fn default_confidence_threshold() -> f32 {
    0.55
}
fn default_context_turns() -> usize {
    6
}
fn default_max_fallback_count() -> u32 {
    5
}
fn default_max_turns() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersonaConfig {
    #[serde(default = "default_brand_name")]
    pub brand_name: String,
    #[serde(default = "default_emoji")]
    pub emoji: String,
    #[serde(default = "default_accent_emoji")]
    pub accent_emoji: String,
    #[serde(default = "default_sign_off")]
    pub sign_off: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            brand_name: default_brand_name(),
            emoji: default_emoji(),
            accent_emoji: default_accent_emoji(),
            sign_off: default_sign_off(),
        }
    }
}

fn default_brand_name() -> String {
    "Adventure Outfitters".to_string()
}
fn default_emoji() -> String {
    "🏔️".to_string()
}
fn default_accent_emoji() -> String {
    "🌟".to_string()
}
fn default_sign_off() -> String {
    "Onward into the unknown!".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    #[serde(default = "default_orders_path")]
    pub orders_path: String,
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,
    #[serde(default = "default_promo_codes_path")]
    pub promo_codes_path: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            orders_path: default_orders_path(),
            catalog_path: default_catalog_path(),
            promo_codes_path: default_promo_codes_path(),
        }
    }
}

fn default_orders_path() -> String {
    "data/customer_orders.json".to_string()
}
fn default_catalog_path() -> String {
    "data/product_catalog.json".to_string()
}
fn default_promo_codes_path() -> String {
    "data/promo_codes.json".to_string()
}

pub fn default_capabilities() -> Vec<Capability> {
    vec![
        Capability {
            id: "order_status".to_string(),
            display_name: "Order Status & Tracking".to_string(),
            description: "Check the status of an existing order and get tracking information"
                .to_string(),
            example_phrases: vec![
                "Where is my order?".to_string(),
                "Check order #W001 for john.doe@example.com".to_string(),
                "track my package".to_string(),
            ],
            required_entities: vec!["email".to_string(), "order_number".to_string()],
        },
        Capability {
            id: "product_recommendation".to_string(),
            display_name: "Product Recommendations".to_string(),
            description: "Find outdoor gear suggestions from the product catalog".to_string(),
            example_phrases: vec![
                "I'm looking for a good backpack for hiking".to_string(),
                "What skis do you sell?".to_string(),
                "recommend me some camping gear".to_string(),
            ],
            required_entities: vec![],
        },
        Capability {
            id: "early_risers_promotion".to_string(),
            display_name: "Early Risers Promotion".to_string(),
            description: "Get a 10% Early Risers discount code, available 8-10 AM Pacific"
                .to_string(),
            example_phrases: vec![
                "Can I get an Early Risers discount code?".to_string(),
                "early bird promo please".to_string(),
            ],
            required_entities: vec![],
        },
    ]
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&content)?;
        config.apply_env_fallbacks();
        Ok(config)
    }

    /// Use built-in defaults when no config file exists. The API key must
    /// then come from the environment.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let mut config = AppConfig::default();
            config.capabilities = default_capabilities();
            config.apply_env_fallbacks();
            Ok(config)
        }
    }

    fn apply_env_fallbacks(&mut self) {
        if self.provider.api_key.is_empty() {
            for var in ["TRAILBOT_API_KEY", "OPENAI_API_KEY"] {
                if let Ok(key) = std::env::var(var) {
                    if !key.trim().is_empty() {
                        self.provider.api_key = key.trim().to_string();
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_full_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.routing.confidence_threshold, 0.55);
        assert_eq!(config.routing.context_turns, 6);
        assert_eq!(config.provider.model, "gpt-4o-mini");
        assert_eq!(config.persona.brand_name, "Adventure Outfitters");
        assert_eq!(config.capabilities.len(), 3);
    }

    #[test]
    fn capability_overrides_replace_defaults() {
        let toml_str = r#"
            [[capabilities]]
            id = "order_status"
            display_name = "Orders"
            description = "Order lookups"
            required_entities = ["email", "order_number"]
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.capabilities.len(), 1);
        assert_eq!(config.capabilities[0].id, "order_status");
        assert!(config.capabilities[0].example_phrases.is_empty());
    }

    #[test]
    fn routing_section_partially_specified() {
        let config: AppConfig = toml::from_str("[routing]\nconfidence_threshold = 0.7\n").unwrap();
        assert_eq!(config.routing.confidence_threshold, 0.7);
        assert_eq!(config.routing.max_fallback_count, 5);
    }

    #[test]
    fn default_order_status_requires_both_entities() {
        let caps = default_capabilities();
        let order = caps.iter().find(|c| c.id == "order_status").unwrap();
        assert_eq!(order.required_entities, vec!["email", "order_number"]);
    }
}
