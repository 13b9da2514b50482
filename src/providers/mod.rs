mod error;
mod openai_compatible;

use async_trait::async_trait;

pub use error::{ProviderError, ProviderErrorKind};
pub use openai_compatible::OpenAiCompatibleOracle;

/// The external language-model service, used only for classification.
///
/// The core treats this as an opaque text oracle: one system + user prompt
/// in, raw text out. Failures carry a classified `ProviderError` so the
/// caller can tell a timeout from a bad API key.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String>;
}
