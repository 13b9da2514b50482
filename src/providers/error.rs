use std::fmt;

/// Classified provider error — tells the caller *why* the oracle call failed
/// so it can pick the right recovery strategy.
#[derive(Debug)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub status: Option<u16>,
    pub message: String,
    /// Seconds to wait before retrying (from 429 Retry-After header or body).
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// 401/403 — bad API key or permissions.
    Auth,
    /// 402 — billing/quota exhausted.
    Billing,
    /// 429 — rate limited; check retry_after_secs.
    RateLimit,
    /// 404 or "model not found" — bad model name.
    NotFound,
    /// 408, request timeout, or provider took too long.
    Timeout,
    /// Connection refused, DNS failure, reset, etc.
    Network,
    /// 500/502/503/504 — provider-side outage.
    ServerError,
    /// Anything else.
    Unknown,
}

impl ProviderError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => ProviderErrorKind::Auth,
            402 => ProviderErrorKind::Billing,
            404 => ProviderErrorKind::NotFound,
            408 => ProviderErrorKind::Timeout,
            429 => ProviderErrorKind::RateLimit,
            500 | 502 | 503 | 504 => ProviderErrorKind::ServerError,
            _ => ProviderErrorKind::Unknown,
        };

        let retry_after_secs = if kind == ProviderErrorKind::RateLimit {
            extract_retry_after(body)
        } else {
            None
        };

        Self {
            kind,
            status: Some(status),
            message: truncate_body(body),
            retry_after_secs,
        }
    }

    pub fn network(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else {
            ProviderErrorKind::Network
        };
        Self {
            kind,
            status: None,
            message: err.to_string(),
            retry_after_secs: None,
        }
    }

    /// Operator-facing summary for logs. Never shown to chat users — they
    /// only ever see the rendered fallback text.
    pub fn log_summary(&self) -> String {
        match self.kind {
            ProviderErrorKind::Auth => {
                "oracle authentication failed; check the configured API key".to_string()
            }
            ProviderErrorKind::Billing => {
                "oracle billing error; account quota may be exhausted".to_string()
            }
            ProviderErrorKind::RateLimit => {
                if let Some(secs) = self.retry_after_secs {
                    format!("oracle rate limited; retry after {}s", secs)
                } else {
                    "oracle rate limited".to_string()
                }
            }
            ProviderErrorKind::NotFound => "oracle model not found".to_string(),
            ProviderErrorKind::Timeout => "oracle request timed out".to_string(),
            ProviderErrorKind::Network => "cannot reach oracle (network error)".to_string(),
            ProviderErrorKind::ServerError => "oracle provider server error".to_string(),
            ProviderErrorKind::Unknown => format!("oracle error: {}", self.message),
        }
    }

}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status {
            write!(
                f,
                "Provider error ({}, {:?}): {}",
                status, self.kind, self.message
            )
        } else {
            write!(f, "Provider error ({:?}): {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for ProviderError {}

/// Try to parse retry_after from a JSON response body.
/// Handles: {"error": {"retry_after": 5}} and {"retry_after": 5}
fn extract_retry_after(body: &str) -> Option<u64> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    v["error"]["retry_after"]
        .as_u64()
        .or_else(|| v["retry_after"].as_u64())
        .or_else(|| {
            // Some providers use a float
            v["error"]["retry_after"]
                .as_f64()
                .or_else(|| v["retry_after"].as_f64())
                .map(|f| f.ceil() as u64)
        })
}

fn truncate_body(body: &str) -> String {
    if body.len() > 300 {
        let mut end = 300;
        while end > 0 && !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_kinds() {
        assert_eq!(
            ProviderError::from_status(401, "").kind,
            ProviderErrorKind::Auth
        );
        assert_eq!(
            ProviderError::from_status(429, "{}").kind,
            ProviderErrorKind::RateLimit
        );
        assert_eq!(
            ProviderError::from_status(503, "").kind,
            ProviderErrorKind::ServerError
        );
        assert_eq!(
            ProviderError::from_status(418, "").kind,
            ProviderErrorKind::Unknown
        );
    }

    #[test]
    fn retry_after_extracted_from_rate_limit_body() {
        let err = ProviderError::from_status(429, r#"{"error": {"retry_after": 7}}"#);
        assert_eq!(err.retry_after_secs, Some(7));

        let err = ProviderError::from_status(429, r#"{"retry_after": 2.2}"#);
        assert_eq!(err.retry_after_secs, Some(3));
    }

    #[test]
    fn log_summary_includes_retry_hint_when_rate_limited() {
        let err = ProviderError::from_status(429, r#"{"retry_after": 7}"#);
        assert!(err.log_summary().contains("retry after 7s"));
        let err = ProviderError::from_status(401, "");
        assert!(err.log_summary().contains("API key"));
    }

    #[test]
    fn long_bodies_truncated() {
        let body = "x".repeat(500);
        let err = ProviderError::from_status(500, &body);
        assert!(err.message.len() < 310);
        assert!(err.message.ends_with("..."));
    }
}
