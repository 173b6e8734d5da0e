use super::parse::truncate_str;
use super::{ReasoningService, StructuredRequest};
use crate::config::Config;
use crate::error::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000; // 2 seconds
const BACKOFF_MULTIPLIER: u64 = 2; // Exponential backoff

/// Chat-completions client for any OpenAI-compatible endpoint (OpenRouter by default)
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

/// API usage information
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    stream: bool,
    response_format: ResponseFormat<'a>,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'a str,
    schema: &'a Value,
    strict: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: Option<String>,
}

impl OpenAiClient {
    /// Build a client from resolved configuration
    pub fn from_config(config: &Config) -> Result<Self, ServiceError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ServiceError::MissingApiKey)?;

        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ReasoningService for OpenAiClient {
    /// Includes automatic retry with exponential backoff for rate limits
    async fn complete(&self, request: &StructuredRequest) -> Result<String, ServiceError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: &request.system,
                },
                Message {
                    role: "user",
                    content: &request.user,
                },
            ],
            max_tokens: self.max_tokens,
            stream: false,
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: request.name,
                    schema: &request.schema,
                    strict: true,
                },
            },
        };

        let mut retry_count = 0;

        loop {
            let response = self
                .http
                .post(&self.endpoint)
                .header("Content-Type", "application/json")
                .header("X-Title", "testagon")
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            let text = response.text().await?;

            if status.is_success() {
                let parsed: ChatResponse =
                    serde_json::from_str(&text).map_err(|e| ServiceError::Malformed {
                        schema: request.name,
                        message: format!("unexpected chat response envelope: {}", e),
                        preview: truncate_str(&text, 200).to_string(),
                    })?;

                if let Some(usage) = &parsed.usage {
                    tracing::debug!(
                        "{}: {} prompt + {} completion tokens",
                        request.name,
                        usage.prompt_tokens,
                        usage.completion_tokens
                    );
                }

                return parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .ok_or_else(|| ServiceError::Malformed {
                        schema: request.name,
                        message: "response has no message content".to_string(),
                        preview: truncate_str(&text, 200).to_string(),
                    });
            }

            // Check if we should retry (rate limits)
            if status.as_u16() == 429 && retry_count < MAX_RETRIES {
                retry_count += 1;

                let retry_after = parse_retry_after(&text).unwrap_or_else(|| {
                    (INITIAL_BACKOFF_MS * BACKOFF_MULTIPLIER.pow(retry_count - 1)) / 1000
                });

                tracing::warn!(
                    "Rate limited. Retrying in {}s (attempt {}/{})",
                    retry_after,
                    retry_count,
                    MAX_RETRIES
                );
                tokio::time::sleep(tokio::time::Duration::from_secs(retry_after)).await;
                continue;
            }

            // Non-retryable error or max retries exceeded
            let error_msg = match status.as_u16() {
                401 => "Invalid API key. Check TESTAGON_API_KEY.".to_string(),
                429 => format!(
                    "Rate limited after {} retries. Try again in a few minutes.",
                    retry_count
                ),
                500..=599 => format!(
                    "Server error ({}). The service may be temporarily unavailable.",
                    status
                ),
                _ => format!("API error {}: {}", status, truncate_str(&text, 200)),
            };
            return Err(ServiceError::Api(error_msg));
        }
    }
}

/// Extract a retry-after hint from a rate-limit response body (if present)
fn parse_retry_after(text: &str) -> Option<u64> {
    // Look for patterns like "retry after X seconds"
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    let after_retry = &text_lower[pos..];
    for word in after_retry.split_whitespace().skip(1).take(5) {
        if let Ok(secs) = word
            .trim_matches(|c: char| !c.is_numeric())
            .parse::<u64>()
        {
            if secs > 0 && secs < 300 {
                return Some(secs);
            }
        }
    }
    None
}
