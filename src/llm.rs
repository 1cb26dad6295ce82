//! LLM client for extraction refinement, relationship validation, and answer
//! synthesis.
//!
//! Speaks the OpenAI chat-completions wire format. All failure modes
//! (timeout, rate limit, malformed output) are caught here and surfaced as
//! typed [`LlmError`]s so callers can decide between retry, fallback, and
//! giving up — raw reqwest errors never propagate.
//!
//! Retry strategy mirrors the embedding client:
//! - HTTP 429 and 5xx → transient, retry with exponential backoff
//! - other 4xx → fail immediately
//! - network error / timeout → transient

use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::warn;

use crate::config::LlmConfig;
use crate::errors::LlmError;

/// Thin client over an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct LlmClient {
    base_url: String,
    model: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl LlmClient {
    /// Build a client from config, or `None` when the provider is disabled.
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>, LlmError> {
        if !config.is_enabled() {
            return Ok(None);
        }

        let model = config
            .model
            .clone()
            .ok_or_else(|| LlmError::Request("llm.model not configured".to_string()))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| LlmError::Request("OPENAI_API_KEY not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;

        Ok(Some(Self {
            base_url: config.base_url.clone(),
            model,
            api_key,
            max_retries: config.max_retries,
            client,
        }))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One completion request, no retry. `json_mode` asks the API for a JSON
    /// object response.
    pub async fn complete(&self, prompt: &str, json_mode: bool) -> Result<String, LlmError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        if json_mode {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Request(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if status.is_server_error() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Request(format!("HTTP {}: {}", status, text)));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Malformed(format!("HTTP {}: {}", status, text)));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        json.pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::Malformed("response missing message content".to_string()))
    }

    /// Completion with bounded retry for transient failures.
    /// Backoff: 1s, 2s, 4s, ... capped at 2^5.
    pub async fn complete_with_retry(
        &self,
        prompt: &str,
        json_mode: bool,
    ) -> Result<String, LlmError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match self.complete(prompt, json_mode).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() => {
                    warn!(attempt, error = %e, "transient LLM failure, retrying");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(LlmError::Request("retries exhausted".to_string())))
    }

    /// JSON-schema completion: parses the reply into `T`, re-prompting once
    /// on malformed output before giving up.
    pub async fn complete_json<T: DeserializeOwned>(&self, prompt: &str) -> Result<T, LlmError> {
        let first = self.complete_with_retry(prompt, true).await?;
        match parse_json_reply::<T>(&first) {
            Ok(parsed) => Ok(parsed),
            Err(parse_err) => {
                warn!(error = %parse_err, "malformed LLM JSON, re-prompting once");
                let retry_prompt = format!(
                    "{}\n\nYour previous reply was not valid JSON ({}). \
                     Reply with a single valid JSON object and nothing else.",
                    prompt, parse_err
                );
                let second = self.complete_with_retry(&retry_prompt, true).await?;
                parse_json_reply::<T>(&second).map_err(LlmError::Malformed)
            }
        }
    }
}

/// Parse a model reply as JSON, tolerating markdown code fences.
fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Result<T, String> {
    let trimmed = reply.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.strip_suffix("```").unwrap_or(s))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str::<T>(stripped).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        relationship: String,
        confidence: f64,
    }

    #[test]
    fn test_parse_plain_json() {
        let v: Verdict =
            parse_json_reply(r#"{"relationship": "SUPPORTS", "confidence": 0.9}"#).unwrap();
        assert_eq!(v.relationship, "SUPPORTS");
        assert!((v.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_parse_fenced_json() {
        let reply = "```json\n{\"relationship\": \"MENTIONS\", \"confidence\": 0.5}\n```";
        let v: Verdict = parse_json_reply(reply).unwrap();
        assert_eq!(v.relationship, "MENTIONS");
    }

    #[test]
    fn test_parse_garbage_is_err() {
        assert!(parse_json_reply::<Verdict>("the answer is maybe").is_err());
    }

    #[test]
    fn test_disabled_provider_yields_none() {
        let config = LlmConfig::default();
        assert!(LlmClient::from_config(&config).unwrap().is_none());
    }
}
