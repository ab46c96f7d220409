//! OpenAI-compatible chat-completion client.

use crate::config::RunConfig;
use crate::metrics::{ErrorKind, RequestOutcome};
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

/// Completion response; only the usage block matters for measurement.
#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    completion_tokens: Option<u64>,
}

struct RequestFailure {
    kind: ErrorKind,
    status: Option<u16>,
    detail: String,
}

/// Issues single completion calls against the target endpoint.
///
/// Holds only immutable state; one instance is shared read-only across
/// all concurrent request tasks.
pub struct InferenceClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model_name: String,
    max_tokens: u32,
    temperature: f64,
}

impl InferenceClient {
    pub fn new(config: &RunConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(config.concurrency as usize)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint_url(),
            api_key: config.api_key.clone(),
            model_name: config.model_name.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// Execute exactly one inference call and produce its outcome.
    ///
    /// The latency clock starts immediately before the request is sent and
    /// stops once the complete response body has been received and
    /// decoded, so token throughput reflects total generation time rather
    /// than time-to-first-byte. Every error path yields an outcome; this
    /// never propagates per-request failures.
    pub async fn execute(&self, sequence_id: u64, prompt: &str) -> RequestOutcome {
        let request = ChatRequest {
            model: &self.model_name,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let started_at = Instant::now();
        let result = self.send(&request).await;
        let finished_at = Instant::now();

        match result {
            Ok((status, tokens_generated)) => RequestOutcome {
                sequence_id,
                started_at,
                finished_at,
                latency: finished_at - started_at,
                tokens_generated,
                status: Some(status),
                error: None,
                error_detail: None,
            },
            Err(failure) => RequestOutcome {
                sequence_id,
                started_at,
                finished_at,
                latency: finished_at - started_at,
                tokens_generated: 0,
                status: failure.status,
                error: Some(failure.kind),
                error_detail: Some(failure.detail),
            },
        }
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<(u16, u64), RequestFailure> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| RequestFailure {
            kind: classify_transport_error(&e),
            status: None,
            detail: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RequestFailure {
                kind: ErrorKind::Http,
                status: Some(status.as_u16()),
                detail: format!("HTTP {}", status),
            });
        }

        // Drain the full body before the caller stops the clock.
        let body = response.bytes().await.map_err(|e| RequestFailure {
            kind: classify_transport_error(&e),
            status: Some(status.as_u16()),
            detail: e.to_string(),
        })?;

        let parsed: ChatResponse = serde_json::from_slice(&body).map_err(|e| RequestFailure {
            kind: ErrorKind::Parse,
            status: Some(status.as_u16()),
            detail: format!("malformed completion response: {e}"),
        })?;

        // Missing usage metadata counts as success with zero tokens; no
        // token-estimation heuristics.
        let tokens = parsed
            .usage
            .and_then(|u| u.completion_tokens)
            .unwrap_or(0);

        Ok((status.as_u16(), tokens))
    }
}

fn classify_transport_error(error: &reqwest::Error) -> ErrorKind {
    if error.is_timeout() {
        ErrorKind::Timeout
    } else {
        ErrorKind::Connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_payload_shape() {
        let request = ChatRequest {
            model: "test-model",
            messages: vec![Message {
                role: "user",
                content: "hello",
            }],
            max_tokens: 128,
            temperature: 0.0,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "test-model");
        assert_eq!(json["max_tokens"], 128);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hello");
    }

    #[test]
    fn test_response_with_usage() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"hi"}}],
                       "usage":{"prompt_tokens":5,"completion_tokens":42,"total_tokens":47}}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.usage.and_then(|u| u.completion_tokens), Some(42));
    }

    #[test]
    fn test_response_without_usage_falls_back_to_zero() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"hi"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed.usage.and_then(|u| u.completion_tokens).unwrap_or(0),
            0
        );
    }

    #[test]
    fn test_malformed_response_is_a_parse_error() {
        let result: Result<ChatResponse, _> = serde_json::from_str("not json at all");
        assert!(result.is_err());
    }
}
