use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::handlers::{CapabilityHandler, HandlerError};
use crate::session::ConversationState;

/// One row of the product-catalog data file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProductRecord {
    pub product_name: String,
    #[serde(rename = "SKU")]
    pub sku: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub inventory: u32,
}

pub struct ProductHandler {
    products: Vec<ProductRecord>,
}

impl ProductHandler {
    pub fn new(products: Vec<ProductRecord>) -> Self {
        Self { products }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let products = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Vec<ProductRecord>>(&content) {
                Ok(products) => {
                    info!(path = %path.display(), count = products.len(), "Loaded product catalog");
                    products
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not parse catalog file");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read catalog file");
                Vec::new()
            }
        };
        Self { products }
    }

    /// Keyword search over name, description, and tags; results ordered by
    /// how many query words matched.
    fn search(&self, query: &str) -> Vec<&ProductRecord> {
        let query_words: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let mut scored: Vec<(usize, &ProductRecord)> = self
            .products
            .iter()
            .filter_map(|product| {
                let haystack = format!(
                    "{} {} {}",
                    product.product_name.to_lowercase(),
                    product.description.to_lowercase(),
                    product.tags.join(" ").to_lowercase()
                );
                let matches = query_words
                    .iter()
                    .filter(|word| haystack.contains(word.as_str()))
                    .count();
                if matches > 0 {
                    Some((matches, product))
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().map(|(_, p)| p).take(3).collect()
    }

    fn by_sku(&self, sku: &str) -> Option<&ProductRecord> {
        self.products
            .iter()
            .find(|p| p.sku.eq_ignore_ascii_case(sku))
    }
}

#[async_trait]
impl CapabilityHandler for ProductHandler {
    fn capability_id(&self) -> &str {
        "product_recommendation"
    }

    async fn handle(
        &self,
        entities: &HashMap<String, String>,
        state: &ConversationState,
    ) -> Result<String, HandlerError> {
        // Direct SKU lookup takes priority when the classifier extracted one.
        if let Some(sku) = entities.get("sku") {
            if let Some(product) = self.by_sku(sku) {
                return Ok(render_products(&[product]));
            }
        }

        let query = state
            .last_user_text()
            .ok_or_else(|| HandlerError::new("no user message available for product search"))?;

        let matches = self.search(query);
        if matches.is_empty() {
            return Ok(
                "I couldn't find any products matching your request. Could you try describing \
                 what type of outdoor gear you're looking for? We have backpacks, skis, and \
                 other adventure essentials!"
                    .to_string(),
            );
        }

        Ok(render_products(&matches))
    }
}

fn render_products(products: &[&ProductRecord]) -> String {
    let mut reply = String::from("Here are some great products I found for you:\n\n");
    for (i, product) in products.iter().enumerate() {
        reply.push_str(&format!(
            "{}. **{}** (SKU: {})\n   {}\n   In stock: {} units\n\n",
            i + 1,
            product.product_name,
            product.sku,
            product.description,
            product.inventory
        ));
    }
    reply.push_str("These are perfect for your next adventure!");
    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<ProductRecord> {
        vec![
            ProductRecord {
                product_name: "SummitClimber Backpack".to_string(),
                sku: "SOBP001".to_string(),
                description: "A rugged 65L backpack for multi-day hiking trips".to_string(),
                tags: vec!["backpack".to_string(), "hiking".to_string()],
                inventory: 12,
            },
            ProductRecord {
                product_name: "Alpine Explorer Skis".to_string(),
                sku: "SOSK002".to_string(),
                description: "All-mountain skis for powder and groomed runs".to_string(),
                tags: vec!["skis".to_string(), "winter".to_string()],
                inventory: 5,
            },
            ProductRecord {
                product_name: "TrailBlaze Tent".to_string(),
                sku: "SOTT003".to_string(),
                description: "Lightweight two-person tent for backcountry camping".to_string(),
                tags: vec!["tent".to_string(), "camping".to_string()],
                inventory: 8,
            },
        ]
    }

    fn state_with_query(query: &str) -> ConversationState {
        let mut state = ConversationState::new("s1");
        state.push_user(query);
        state
    }

    #[tokio::test]
    async fn keyword_search_ranks_best_match_first() {
        let handler = ProductHandler::new(catalog());
        let state = state_with_query("I need a backpack for hiking");
        let reply = handler.handle(&HashMap::new(), &state).await.unwrap();
        assert!(reply.contains("SummitClimber Backpack"));
        // Best match is listed first.
        let backpack_pos = reply.find("SummitClimber").unwrap();
        assert!(reply.find("Alpine Explorer").map_or(true, |p| backpack_pos < p));
    }

    #[tokio::test]
    async fn sku_entity_short_circuits_search() {
        let handler = ProductHandler::new(catalog());
        let state = state_with_query("tell me about that one");
        let mut entities = HashMap::new();
        entities.insert("sku".to_string(), "sosk002".to_string());
        let reply = handler.handle(&entities, &state).await.unwrap();
        assert!(reply.contains("Alpine Explorer Skis"));
        assert!(!reply.contains("Backpack"));
    }

    #[tokio::test]
    async fn no_matches_invites_a_better_description() {
        let handler = ProductHandler::new(catalog());
        let state = state_with_query("quantum flux capacitor");
        let reply = handler.handle(&HashMap::new(), &state).await.unwrap();
        assert!(reply.contains("couldn't find any products"));
    }

    #[tokio::test]
    async fn empty_catalog_still_replies() {
        let handler = ProductHandler::new(Vec::new());
        let state = state_with_query("backpack");
        let reply = handler.handle(&HashMap::new(), &state).await.unwrap();
        assert!(reply.contains("couldn't find any products"));
    }
}
