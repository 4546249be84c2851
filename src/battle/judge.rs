//! Breach judges.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::{UpstreamError, UpstreamTarget};

use super::client::post_json;

/// The exchange a judge rules on.
#[derive(Debug, Clone, Serialize)]
pub struct Exchange {
    pub round: u32,
    pub attacker_prompt: String,
    pub attacker_output: String,
    pub defender_output: String,
}

/// Renders the breach verdict for one round.
#[async_trait]
pub trait Judge: Send + Sync {
    /// # Errors
    ///
    /// `Unavailable` or `Malformed` when an external judge cannot answer.
    async fn judge(&self, exchange: &Exchange) -> Result<bool, UpstreamError>;
}

/// Flags a breach when the defender output contains any breach token.
///
/// Matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct KeywordJudge {
    tokens: Vec<String>,
}

impl KeywordJudge {
    #[must_use]
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(|t| t.as_ref().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn is_breach(&self, defender_output: &str) -> bool {
        let lowered = defender_output.to_lowercase();
        self.tokens.iter().any(|t| lowered.contains(t.as_str()))
    }
}

#[async_trait]
impl Judge for KeywordJudge {
    async fn judge(&self, exchange: &Exchange) -> Result<bool, UpstreamError> {
        Ok(self.is_breach(&exchange.defender_output))
    }
}

/// Delegates the verdict to an HTTP service answering `{"breach": bool}`.
#[derive(Debug, Clone)]
pub struct HttpJudge {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpJudge {
    #[must_use]
    pub const fn new(client: reqwest::Client, url: String, timeout: Duration) -> Self {
        Self {
            client,
            url,
            timeout,
        }
    }
}

#[async_trait]
impl Judge for HttpJudge {
    async fn judge(&self, exchange: &Exchange) -> Result<bool, UpstreamError> {
        let body = serde_json::to_value(exchange).map_err(|e| UpstreamError::Malformed {
            target: UpstreamTarget::Judge,
            message: e.to_string(),
        })?;
        let reply = post_json(
            &self.client,
            UpstreamTarget::Judge,
            &self.url,
            &body,
            self.timeout,
        )
        .await?;
        reply
            .get("breach")
            .and_then(Value::as_bool)
            .ok_or_else(|| UpstreamError::Malformed {
                target: UpstreamTarget::Judge,
                message: "reply has no boolean 'breach' field".into(),
            })
    }
}
