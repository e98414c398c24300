//! Anthropic Messages API client.
//!
//! Every attempt runs under its own deadline. Timeouts, connection failures,
//! HTTP 429 and 5xx responses are retried with exponential backoff; any other
//! non-success status is returned immediately as [`GatewayError::Rejected`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use relay_core::config::ModelConfig;
use relay_core::types::Turn;

use crate::error::GatewayError;
use crate::gateway::{Completion, ModelGateway};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_ERROR_BODY_CHARS: usize = 512;

pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    default_system_prompt: String,
    timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
}

impl AnthropicClient {
    /// A `timeout_secs` of zero is treated as one second.
    pub fn from_config(config: &ModelConfig, api_key: impl Into<String>) -> Result<Self, GatewayError> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| GatewayError::InvalidRequest(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            default_system_prompt: config.default_system_prompt.clone(),
            timeout,
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    /// Delay before retry number `retry` (1-based): `backoff * 2^(retry - 1)`.
    fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.retry_backoff.saturating_mul(factor)
    }

    fn build_request_body<'a>(
        &'a self,
        system_prompt: Option<&'a str>,
        turns: &'a [Turn],
    ) -> MessagesRequest<'a> {
        let system = system_prompt
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(self.default_system_prompt.as_str());

        MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system,
            messages: turns
                .iter()
                .map(|t| WireMessage {
                    role: t.role.as_str(),
                    content: &t.text,
                })
                .collect(),
        }
    }

    async fn attempt(&self, body: &MessagesRequest<'_>) -> Result<Completion, AttemptError> {
        let url = format!("{}/v1/messages", self.base_url);

        let request = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send();

        let exchange = async move {
            let response = request.await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        let (status, text) = match tokio::time::timeout(self.timeout, exchange).await {
            Err(_) => return Err(AttemptError::Timeout),
            Ok(Err(e)) if e.is_timeout() => return Err(AttemptError::Timeout),
            Ok(Err(e)) => return Err(AttemptError::Transient(e.to_string())),
            Ok(Ok(pair)) => pair,
        };

        if status.as_u16() == 429 || status.is_server_error() {
            return Err(AttemptError::Transient(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate(&text)
            )));
        }
        if !status.is_success() {
            return Err(AttemptError::Fatal(GatewayError::Rejected {
                status: status.as_u16(),
                body: truncate(&text),
            }));
        }

        parse_completion(&text).map_err(AttemptError::Fatal)
    }
}

#[async_trait]
impl ModelGateway for AnthropicClient {
    async fn complete(
        &self,
        system_prompt: Option<&str>,
        turns: &[Turn],
    ) -> Result<Completion, GatewayError> {
        if turns.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "at least one turn is required".to_string(),
            ));
        }

        let body = self.build_request_body(system_prompt, turns);
        let attempts = self.max_retries.saturating_add(1);
        let mut last_failure = AttemptError::Timeout;

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.backoff_for(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying model request");
                tokio::time::sleep(delay).await;
            }

            match self.attempt(&body).await {
                Ok(completion) => {
                    debug!(
                        attempt,
                        input_tokens = completion.input_tokens,
                        "Model completion received"
                    );
                    return Ok(completion);
                }
                Err(AttemptError::Fatal(e)) => {
                    warn!(attempt, error = %e, "Model request failed");
                    return Err(e);
                }
                Err(transient) => {
                    warn!(attempt, attempts, error = %transient, "Transient model failure");
                    last_failure = transient;
                }
            }
        }

        Err(match last_failure {
            AttemptError::Timeout => GatewayError::Timeout { attempts },
            AttemptError::Transient(reason) => GatewayError::Unavailable { attempts, reason },
            AttemptError::Fatal(e) => e,
        })
    }
}

// The API key must never reach the logs.
impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

enum AttemptError {
    Timeout,
    Transient(String),
    Fatal(GatewayError),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Timeout => f.write_str("attempt deadline elapsed"),
            AttemptError::Transient(reason) => f.write_str(reason),
            AttemptError::Fatal(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
}

fn parse_completion(body: &str) -> Result<Completion, GatewayError> {
    let response: MessagesResponse = serde_json::from_str(body)
        .map_err(|e| GatewayError::Malformed(format!("failed to parse response: {}", e)))?;

    let text = response
        .content
        .into_iter()
        .find(|block| block.block_type == "text")
        .map(|block| block.text)
        .ok_or_else(|| GatewayError::Malformed("response has no text content block".to_string()))?;

    Ok(Completion {
        text,
        input_tokens: response.usage.input_tokens,
    })
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body.to_string()
    } else {
        let mut cut: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        cut.push_str("...");
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn test_client(base_url: &str) -> AnthropicClient {
        AnthropicClient::from_config(&ModelConfig::default(), "test-key")
            .unwrap()
            .with_base_url(base_url)
            .with_retries(2, Duration::from_millis(1))
    }

    fn reply_body(text: &str, input_tokens: u32) -> String {
        json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": text}],
            "usage": {"input_tokens": input_tokens, "output_tokens": 7}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_complete_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "test-key")
            .match_header("anthropic-version", "2023-06-01")
            .match_body(Matcher::PartialJson(json!({
                "model": "claude-3-5-sonnet-20240620",
                "max_tokens": 1000,
                "system": "Be brief.",
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .with_status(200)
            .with_body(reply_body("Hi!", 12))
            .expect(1)
            .create();

        let client = test_client(&server.url());
        let completion = client
            .complete(Some("Be brief."), &[Turn::user("hello")])
            .await
            .unwrap();

        assert_eq!(completion.text, "Hi!");
        assert_eq!(completion.input_tokens, 12);
        mock.assert();
    }

    #[tokio::test]
    async fn test_blank_system_prompt_uses_default() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_body(Matcher::PartialJson(json!({
                "system": "You are a helpful assistant."
            })))
            .with_status(200)
            .with_body(reply_body("ok", 1))
            .expect(2)
            .create();

        let client = test_client(&server.url());
        client.complete(Some("   "), &[Turn::user("hi")]).await.unwrap();
        client.complete(None, &[Turn::user("hi")]).await.unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn test_history_is_sent_in_order() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_body(Matcher::PartialJson(json!({
                "messages": [
                    {"role": "user", "content": "one"},
                    {"role": "assistant", "content": "two"},
                    {"role": "user", "content": "three"}
                ]
            })))
            .with_status(200)
            .with_body(reply_body("four", 30))
            .create();

        let turns = vec![Turn::user("one"), Turn::assistant("two"), Turn::user("three")];
        let completion = test_client(&server.url())
            .complete(None, &turns)
            .await
            .unwrap();

        assert_eq!(completion.text, "four");
        mock.assert();
    }

    #[tokio::test]
    async fn test_empty_turns_rejected_without_network() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", "/v1/messages").expect(0).create();

        let result = test_client(&server.url()).complete(None, &[]).await;
        assert!(matches!(result, Err(GatewayError::InvalidRequest(_))));
        mock.assert();
    }

    #[tokio::test]
    async fn test_server_error_retried_until_exhausted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .with_status(503)
            .with_body("overloaded")
            .expect(3)
            .create();

        let result = test_client(&server.url())
            .complete(None, &[Turn::user("hello")])
            .await;

        match result {
            Err(GatewayError::Unavailable { attempts, reason }) => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("503"));
            }
            other => panic!("expected Unavailable, got {:?}", other),
        }
        mock.assert();
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .with_status(401)
            .with_body(r#"{"type":"error","error":{"type":"authentication_error"}}"#)
            .expect(1)
            .create();

        let result = test_client(&server.url())
            .complete(None, &[Turn::user("hello")])
            .await;

        match result {
            Err(GatewayError::Rejected { status, body }) => {
                assert_eq!(status, 401);
                assert!(body.contains("authentication_error"));
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
        mock.assert();
    }

    #[tokio::test]
    async fn test_missing_text_block_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_body(r#"{"content": [], "usage": {"input_tokens": 3}}"#)
            .create();

        let result = test_client(&server.url())
            .complete(None, &[Turn::user("hello")])
            .await;
        assert!(matches!(result, Err(GatewayError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_missing_usage_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_body(r#"{"content": [{"type": "text", "text": "hi"}]}"#)
            .expect(1)
            .create();

        let result = test_client(&server.url())
            .complete(None, &[Turn::user("hello")])
            .await;
        assert!(matches!(result, Err(GatewayError::Malformed(_))));
        mock.assert();
    }

    #[test]
    fn test_usage_without_input_tokens_is_malformed() {
        let result = parse_completion(
            r#"{"content": [{"type": "text", "text": "hi"}], "usage": {"output_tokens": 4}}"#,
        );
        assert!(matches!(result, Err(GatewayError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_unresponsive_endpoint_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept connections and never answer.
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = test_client(&format!("http://{}", addr))
            .with_timeout(Duration::from_millis(100))
            .with_retries(1, Duration::from_millis(1));

        let result = client.complete(None, &[Turn::user("hello")]).await;
        match result {
            Err(e @ GatewayError::Timeout { .. }) => {
                assert!(e.is_timeout());
                assert!(matches!(e, GatewayError::Timeout { attempts: 2 }));
            }
            other => panic!("expected Timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let client = AnthropicClient::from_config(&ModelConfig::default(), "k")
            .unwrap()
            .with_retries(3, Duration::from_millis(500));
        assert_eq!(client.backoff_for(1), Duration::from_millis(500));
        assert_eq!(client.backoff_for(2), Duration::from_millis(1000));
        assert_eq!(client.backoff_for(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_zero_timeout_is_clamped() {
        let config = ModelConfig {
            timeout_secs: 0,
            ..ModelConfig::default()
        };
        let client = AnthropicClient::from_config(&config, "k").unwrap();
        assert_eq!(client.timeout, Duration::from_secs(1));

        let client = AnthropicClient::from_config(&ModelConfig::default(), "k").unwrap();
        assert_eq!(client.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let client = AnthropicClient::from_config(&ModelConfig::default(), "sk-secret").unwrap();
        let rendered = format!("{:?}", client);
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("claude-3-5-sonnet-20240620"));
    }

    #[test]
    fn test_truncate_long_body() {
        let long = "x".repeat(MAX_ERROR_BODY_CHARS + 10);
        let cut = truncate(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), MAX_ERROR_BODY_CHARS + 3);
        assert_eq!(truncate("short"), "short");
    }
}
