use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::handlers::{CapabilityHandler, HandlerError};
use crate::session::ConversationState;

const PROMO_START_HOUR: u32 = 8;
const PROMO_END_HOUR: u32 = 10;
const PROMO_TIMEZONE: Tz = chrono_tz::US::Pacific;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IssuedCode {
    promo_code: String,
    generated_at: DateTime<Utc>,
}

/// Early Risers promotion: a 10% discount code, available 8-10 AM Pacific.
/// One code per session; reissued codes are returned verbatim.
pub struct EarlyRisersHandler {
    codes_path: Option<PathBuf>,
    issued: Mutex<HashMap<String, IssuedCode>>,
}

impl EarlyRisersHandler {
    pub fn new(codes_path: Option<PathBuf>) -> Self {
        let issued = codes_path
            .as_deref()
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();
        Self {
            codes_path,
            issued: Mutex::new(issued),
        }
    }

    fn is_window_open(now_local: &chrono::DateTime<Tz>) -> bool {
        let hour = chrono::Timelike::hour(now_local);
        (PROMO_START_HOUR..PROMO_END_HOUR).contains(&hour)
    }

    async fn issue_code(&self, session_id: &str, now: DateTime<Utc>) -> String {
        let mut issued = self.issued.lock().await;
        if let Some(existing) = issued.get(session_id) {
            return existing.promo_code.clone();
        }

        let suffix: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(8)
            .map(|b| (b as char).to_ascii_uppercase())
            .collect();
        let promo_code = format!("EARLY{}{}", now.format("%Y%m%d"), suffix);

        issued.insert(
            session_id.to_string(),
            IssuedCode {
                promo_code: promo_code.clone(),
                generated_at: now,
            },
        );
        info!(session = %session_id, code = %promo_code, "Issued Early Risers code");

        // Persist best-effort; a write failure costs at most a duplicate code.
        if let Some(path) = &self.codes_path {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match serde_json::to_string_pretty(&*issued) {
                Ok(json) => {
                    if let Err(e) = std::fs::write(path, json) {
                        warn!(path = %path.display(), error = %e, "Could not persist promo codes");
                    }
                }
                Err(e) => warn!(error = %e, "Could not serialize promo codes"),
            }
        }

        promo_code
    }
}

#[async_trait]
impl CapabilityHandler for EarlyRisersHandler {
    fn capability_id(&self) -> &str {
        "early_risers_promotion"
    }

    async fn handle(
        &self,
        _entities: &HashMap<String, String>,
        state: &ConversationState,
    ) -> Result<String, HandlerError> {
        let now = Utc::now();
        let now_local = now.with_timezone(&PROMO_TIMEZONE);

        if !Self::is_window_open(&now_local) {
            return Ok(format!(
                "The Early Risers promotion is only available from 8:00 AM to 10:00 AM \
                 Pacific Time! It's currently {} Pacific. Rise early to catch this 10% \
                 discount! 🌅",
                now_local.format("%I:%M %p")
            ));
        }

        let promo_code = self.issue_code(&state.session_id, now).await;

        Ok(format!(
            "🌅 Good morning, early riser! You're up bright and early at {} Pacific Time!\n\n\
             🎉 Here's your exclusive Early Risers 10% discount code:\n\n\
             **{}**\n\n\
             Use it at checkout — it's good for 10% off your entire order. Thanks for being \
             an early bird; the mountains are calling!",
            now_local.format("%I:%M %p"),
            promo_code
        ))
    }
}
