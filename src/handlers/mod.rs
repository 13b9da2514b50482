//! Capability handlers — the business logic behind each registry entry.
//!
//! One handler per capability, registered in a map keyed by capability id.
//! Adding a capability means adding one registry entry and one handler
//! registration; the router's branching never changes.

mod order_status;
mod products;
mod promotion;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::session::ConversationState;

pub use order_status::{OrderRecord, OrderStatusHandler};
pub use products::{ProductHandler, ProductRecord};
pub use promotion::EarlyRisersHandler;

/// Uniform contract for capability handlers. Entities arrive with
/// lower_snake_case keys; required entities are guaranteed present by the
/// router before dispatch.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    fn capability_id(&self) -> &str;

    async fn handle(
        &self,
        entities: &HashMap<String, String>,
        state: &ConversationState,
    ) -> Result<String, HandlerError>;
}

/// A capability-specific failure. Caught at the router boundary and turned
/// into a HANDLER_ERROR fallback — never shown raw to the user.
#[derive(Debug)]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler error: {}", self.message)
    }
}

impl std::error::Error for HandlerError {}

/// Build the default handler set from config-declared data paths.
pub fn default_handlers(
    config: &AppConfig,
) -> anyhow::Result<HashMap<String, Arc<dyn CapabilityHandler>>> {
    let mut handlers: HashMap<String, Arc<dyn CapabilityHandler>> = HashMap::new();

    let order_status = Arc::new(OrderStatusHandler::from_file(&config.data.orders_path));
    handlers.insert(order_status.capability_id().to_string(), order_status);

    let products = Arc::new(ProductHandler::from_file(&config.data.catalog_path));
    handlers.insert(products.capability_id().to_string(), products);

    let promotion = Arc::new(EarlyRisersHandler::new(Some(
        config.data.promo_codes_path.clone().into(),
    )));
    handlers.insert(promotion.capability_id().to_string(), promotion);

    Ok(handlers)
}
