//! Tool-call client for attacker and defender capsules.
//!
//! A call is `POST {url}/call_tool` with `{"name", "arguments": {"prompt"}}`.
//! The reply is reduced to plain text by [`extract_text`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{ArenaError, UpstreamError, UpstreamTarget};

/// Upper bound on an agent reply body.
pub const MAX_RESPONSE_SIZE: usize = 1024 * 1024;

/// Calls a capsule tool and returns its text output.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// One attempt. Retrying is the caller's job.
    ///
    /// # Errors
    ///
    /// `Unavailable` on connection failure, timeout or non-2xx status;
    /// `Malformed` when the reply carries no usable text.
    async fn call_tool(
        &self,
        target: UpstreamTarget,
        url: &str,
        tool: &str,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<String, UpstreamError>;
}

/// Creates the shared HTTP client for upstream calls.
///
/// Redirects are not followed.
///
/// # Errors
///
/// Returns `ArenaError::Io` if the TLS backend cannot be initialised.
pub fn create_http_client() -> Result<reqwest::Client, ArenaError> {
    reqwest::Client::builder()
        .redirect(redirect::Policy::none())
        .build()
        .map_err(|e| ArenaError::Io(std::io::Error::other(e.to_string())))
}

/// Sends a JSON POST and returns the parsed reply, enforcing `timeout` on
/// both the request and the body read.
pub(crate) async fn post_json(
    client: &reqwest::Client,
    target: UpstreamTarget,
    url: &str,
    body: &Value,
    timeout: Duration,
) -> Result<Value, UpstreamError> {
    let unavailable = |message: String| UpstreamError::Unavailable { target, message };

    let response = tokio::time::timeout(timeout, client.post(url).json(body).send())
        .await
        .map_err(|_| unavailable(format!("timed out after {}ms", timeout.as_millis())))?
        .map_err(|e| unavailable(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(unavailable(format!("HTTP {}", status.as_u16())));
    }

    let bytes = tokio::time::timeout(timeout, response.bytes())
        .await
        .map_err(|_| unavailable(format!("timed out after {}ms", timeout.as_millis())))?
        .map_err(|e| unavailable(e.to_string()))?;

    if bytes.len() > MAX_RESPONSE_SIZE {
        return Err(UpstreamError::Malformed {
            target,
            message: format!("response body exceeds {MAX_RESPONSE_SIZE} byte limit"),
        });
    }

    serde_json::from_slice(&bytes).map_err(|e| UpstreamError::Malformed {
        target,
        message: format!("invalid JSON: {e}"),
    })
}

/// [`AgentClient`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpAgentClient {
    #[must_use]
    pub const fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn call_tool(
        &self,
        target: UpstreamTarget,
        url: &str,
        tool: &str,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<String, UpstreamError> {
        let mut arguments = json!({ "prompt": prompt });
        if let Some(model) = model {
            arguments["model"] = Value::String(model.to_owned());
        }
        let body = json!({ "name": tool, "arguments": arguments });
        let endpoint = format!("{}/call_tool", url.trim_end_matches('/'));

        debug!(%target, url = %endpoint, tool, "calling capsule tool");
        let reply = post_json(&self.client, target, &endpoint, &body, self.timeout).await?;
        extract_text(target, &reply)
    }
}

/// Reduces a tool reply to text.
///
/// - array: the `text` field of each object, joined by a space
/// - object: its `text` string
/// - string: itself
///
/// # Errors
///
/// `Malformed` for any other shape.
pub fn extract_text(target: UpstreamTarget, reply: &Value) -> Result<String, UpstreamError> {
    let malformed = |message: &str| UpstreamError::Malformed {
        target,
        message: message.to_owned(),
    };
    match reply {
        Value::String(text) => Ok(text.clone()),
        Value::Object(map) => map
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| malformed("object reply has no string 'text' field")),
        Value::Array(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                let Value::Object(map) = item else {
                    return Err(malformed("array reply contains a non-object item"));
                };
                parts.push(map.get("text").and_then(Value::as_str).unwrap_or_default());
            }
            Ok(parts.join(" "))
        }
        _ => Err(malformed("reply is neither text, object nor array")),
    }
}
