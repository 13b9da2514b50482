use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use crate::handlers::{CapabilityHandler, HandlerError};
use crate::session::ConversationState;

/// One row of the customer-orders data file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderRecord {
    pub order_number: String,
    pub customer_name: String,
    pub email: String,
    #[serde(default)]
    pub products_ordered: Vec<String>,
    pub status: String,
    #[serde(default)]
    pub tracking_number: Option<String>,
}

pub struct OrderStatusHandler {
    orders: Vec<OrderRecord>,
}

// Order numbers look like #W001; accept the bare form too.
static ORDER_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"#?(W\d{3,})").unwrap());

impl OrderStatusHandler {
    pub fn new(orders: Vec<OrderRecord>) -> Self {
        Self { orders }
    }

    /// Load the orders file; a missing or unreadable file yields an empty
    /// order book (lookups then politely find nothing).
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let orders = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Vec<OrderRecord>>(&content) {
                Ok(orders) => {
                    info!(path = %path.display(), count = orders.len(), "Loaded customer orders");
                    orders
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not parse orders file");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read orders file");
                Vec::new()
            }
        };
        Self { orders }
    }

    fn find_order(&self, email: &str, order_number: &str) -> Option<&OrderRecord> {
        self.orders.iter().find(|order| {
            order.email.eq_ignore_ascii_case(email) && order.order_number == order_number
        })
    }
}

/// Normalize "#W001" / "W001" / "order W001" to the canonical "#W001" form.
pub fn normalize_order_number(raw: &str) -> Option<String> {
    ORDER_NUMBER
        .captures(raw)
        .map(|captures| format!("#{}", &captures[1]))
}

#[async_trait]
impl CapabilityHandler for OrderStatusHandler {
    fn capability_id(&self) -> &str {
        "order_status"
    }

    async fn handle(
        &self,
        entities: &HashMap<String, String>,
        _state: &ConversationState,
    ) -> Result<String, HandlerError> {
        let email = entities
            .get("email")
            .ok_or_else(|| HandlerError::new("missing required entity 'email'"))?;
        let raw_order = entities
            .get("order_number")
            .ok_or_else(|| HandlerError::new("missing required entity 'order_number'"))?;

        let order_number = match normalize_order_number(raw_order) {
            Some(normalized) => normalized,
            None => {
                // Not an error: guide the user to the right format.
                return Ok(format!(
                    "Hmm, \"{}\" doesn't look like one of our order numbers. They start \
                     with 'W' and look like #W001, #W002, etc. Could you check your order \
                     confirmation email?",
                    raw_order
                ));
            }
        };

        let order = match self.find_order(email, &order_number) {
            Some(order) => order,
            None => {
                info!(order = %order_number, "Order not found");
                return Ok(format!(
                    "I couldn't find order {} for {} in our system. Could you double-check \
                     the order number? You can also try a different email if you used \
                     multiple addresses.",
                    order_number, email
                ));
            }
        };

        let mut reply = format!("Hello {}! Here's your order status:\n\n", order.customer_name);
        reply.push_str(&format!("📋 Order: {}\n", order.order_number));
        reply.push_str(&format!("📧 Email: {}\n", order.email));
        if !order.products_ordered.is_empty() {
            reply.push_str(&format!(
                "🎒 Products: {}\n",
                order.products_ordered.join(", ")
            ));
        }
        reply.push_str(&format!("📊 Status: {}\n", title_case(&order.status)));
        if let Some(tracking) = &order.tracking_number {
            reply.push_str(&format!("🚚 Tracking: {}\n", tracking));
            reply.push_str(&format!(
                "📦 Track your package: https://tools.usps.com/go/TrackConfirmAction?tLabels={}",
                tracking
            ));
        }

        Ok(reply)
    }
}

fn title_case(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
