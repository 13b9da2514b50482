//! Startup wiring and the interactive chat loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::Agent;
use crate::config::AppConfig;
use crate::handlers;
use crate::persona::Persona;
use crate::providers::OpenAiCompatibleOracle;
use crate::registry::CapabilityRegistry;
use crate::session::InMemorySessionStore;

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    // 1. Capability registry
    let registry = Arc::new(CapabilityRegistry::new(config.capabilities.clone())?);
    if registry.is_empty() {
        warn!("Capability registry is empty; every message will fall back");
    }
    info!(count = registry.list().len(), "Capability registry loaded");

    // 2. Oracle provider
    let oracle = Arc::new(
        OpenAiCompatibleOracle::new(
            &config.provider.base_url,
            &config.provider.api_key,
            &config.provider.model,
            Duration::from_secs(config.provider.timeout_secs),
        )
        .map_err(|e| anyhow::anyhow!(e))?,
    );
    info!(
        base_url = %config.provider.base_url,
        model = %config.provider.model,
        "Oracle provider configured"
    );

    // 3. Capability handlers
    let handlers = handlers::default_handlers(&config)?;
    info!(count = handlers.len(), "Capability handlers registered");

    // 4. Session store
    let sessions = Arc::new(InMemorySessionStore::new());

    // 5. Agent
    let persona = Persona::new(config.persona.clone());
    let agent = Agent::new(
        oracle,
        registry,
        handlers,
        sessions,
        &config.routing,
        Duration::from_secs(config.provider.timeout_secs),
        persona,
    );

    chat_loop(agent, &config).await
}

async fn chat_loop(agent: Agent, config: &AppConfig) -> anyhow::Result<()> {
    let session_id = Uuid::new_v4().to_string();
    info!(session = %session_id, "Chat session started");

    println!(
        "{} Welcome to {}! Ask me about your orders, our gear, or the Early Risers \
         promotion. Type 'quit' to leave.\n",
        config.persona.emoji, config.persona.brand_name
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You: ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input.to_lowercase().as_str(), "quit" | "exit" | "bye" | "q") {
            println!(
                "\n{} Thanks for stopping by! {}",
                config.persona.emoji, config.persona.sign_off
            );
            break;
        }

        let reply = agent.submit_turn(&session_id, input).await;
        println!("\n{}\n", reply.text);
    }

    info!(session = %session_id, "Chat session ended");
    Ok(())
}
