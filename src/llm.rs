//! Completion service integration.
//!
//! The pipeline hands finished code text to a completion backend through a
//! narrow trait; the concrete client speaks the Anthropic messages API.
//! Provider payload shaping stays in here, the rest of the service only
//! sees `complete(prompt) -> text`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CompletionError;

pub const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";

pub const SYSTEM_PROMPT: &str = "You are an AI that helps developers by analyzing screenshots of code.\n\
    Always consider the user's query and try to find problems, bugs, or improvements in the code that relate to it.";

/// Options forwarded with every completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub model_id: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            model_id: "claude-sonnet-4-20250514".to_string(),
            max_output_tokens: 2048,
            temperature: 0.5,
        }
    }
}

/// Narrow seam to the text-generation backend.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError>;
}

/// Build the analysis prompt around the extracted code.
pub fn create_prompt(user_query: &str, extracted_code: &str) -> String {
    format!(
        "Analyze this screenshot of code and answer the user's question: '{user_query}'\n\n\
         IMPORTANT: Keep your response focused and to the point. Include:\n\n\
         1. A brief, clear explanation (2-3 paragraphs max)\n\
         \x20  - Use simple, professional language\n\
         \x20  - Focus on the key points\n\
         \x20  - Use emojis sparingly for clarity\n\n\
         2. Relevant code examples or suggestions in code blocks\n\
         \x20  - Include proper language specification\n\
         \x20  - Add brief comments\n\
         \x20  - Keep examples concise\n\n\
         Code from screenshot:\n{extracted_code}\n\n\
         Keep the total response under 500 words and focus on the most important information."
    )
}

// ============================================================================
// Anthropic client
// ============================================================================

/// HTTP client for the Anthropic messages endpoint.
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, request_timeout: Duration) -> Result<Self, CompletionError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| CompletionError::Upstream(format!("failed to build client: {}", err)))?;
        Ok(Self {
            http,
            api_key,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        })
    }

}

#[async_trait]
impl CompletionService for AnthropicClient {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        let body = serde_json::json!({
            "model": options.model_id,
            "system": SYSTEM_PROMPT,
            "messages": [
                { "role": "user", "content": prompt }
            ],
            "max_tokens": options.max_output_tokens,
            "temperature": options.temperature,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    CompletionError::Timeout(err.to_string())
                } else {
                    CompletionError::Upstream(err.to_string())
                }
            })?;

        let response = response
            .error_for_status()
            .map_err(|err| CompletionError::Upstream(err.to_string()))?;

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|err| CompletionError::Upstream(err.to_string()))?;

        let mut output = String::new();
        if let Some(blocks) = data.get("content").and_then(|c| c.as_array()) {
            for block in blocks {
                if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                    if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                        output.push_str(text);
                    }
                }
            }
        }

        if output.is_empty() {
            return Err(CompletionError::Upstream(format!(
                "unexpected response: {}",
                data
            )));
        }
        Ok(output)
    }
}

// ============================================================================
// Retry wrapper
// ============================================================================

/// Retry policy for completion calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Call the completion backend, retrying only on timeout.
///
/// Attempt N sleeps N times the base delay before retrying. Other error
/// classes surface immediately; retrying a hard upstream failure just burns
/// the latency budget.
pub async fn complete_with_retry(
    service: &dyn CompletionService,
    prompt: &str,
    options: &CompletionOptions,
    policy: RetryPolicy,
) -> Result<String, CompletionError> {
    let mut attempt = 0u32;
    loop {
        match service.complete(prompt, options).await {
            Ok(text) => return Ok(text),
            Err(CompletionError::Timeout(message)) => {
                if attempt >= policy.max_retries {
                    return Err(CompletionError::Timeout(format!(
                        "timed out after {} retries: {}",
                        policy.max_retries, message
                    )));
                }
                attempt += 1;
                log::warn!(
                    "completion timed out, retrying (attempt {}/{})",
                    attempt,
                    policy.max_retries
                );
                tokio::time::sleep(policy.base_delay * attempt).await;
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyService {
        calls: AtomicU32,
        succeed_after: u32,
    }

    #[async_trait]
    impl CompletionService for FlakyService {
        async fn complete(
            &self,
            _prompt: &str,
            _options: &CompletionOptions,
        ) -> Result<String, CompletionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.succeed_after {
                Err(CompletionError::Timeout("deadline".to_string()))
            } else {
                Ok("analysis".to_string())
            }
        }
    }

    struct BrokenService {
        calls: AtomicU32,
    }

    #[async_trait]
    impl CompletionService for BrokenService {
        async fn complete(
            &self,
            _prompt: &str,
            _options: &CompletionOptions,
        ) -> Result<String, CompletionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CompletionError::Upstream("500 internal".to_string()))
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_timeouts() {
        let service = FlakyService {
            calls: AtomicU32::new(0),
            succeed_after: 2,
        };
        let options = CompletionOptions::default();
        let text = complete_with_retry(&service, "prompt", &options, fast_policy())
            .await
            .unwrap();
        assert_eq!(text, "analysis");
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let service = FlakyService {
            calls: AtomicU32::new(0),
            succeed_after: u32::MAX,
        };
        let options = CompletionOptions::default();
        let err = complete_with_retry(&service, "prompt", &options, fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::Timeout(_)));
        // initial attempt plus three retries
        assert_eq!(service.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_upstream_errors_are_not_retried() {
        let service = BrokenService {
            calls: AtomicU32::new(0),
        };
        let options = CompletionOptions::default();
        let err = complete_with_retry(&service, "prompt", &options, fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::Upstream(_)));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_prompt_embeds_query_and_code() {
        let prompt = create_prompt("is this correct?", "def add(a, b):\n    return a + b");
        assert!(prompt.contains("is this correct?"));
        assert!(prompt.contains("def add(a, b):\n    return a + b"));
        assert!(prompt.contains("Code from screenshot:"));
    }
}
