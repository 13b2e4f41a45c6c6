//! Language-model HTTP client (chat-completions shape).
//!
//! Requests strict JSON via `response_format`, but still tolerates models
//! that wrap their output in markdown fences.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::config::ModelConfig;
use crate::error::{QuorumError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Extract JSON from a response that may contain markdown code blocks
fn extract_json(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        if let Some(end) = text[start + 7..].find("```") {
            return text[start + 7..start + 7 + end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        if let Some(end) = text[start + 3..].find("```") {
            let content = text[start + 3..start + 3 + end].trim();
            if let Some(newline) = content.find('\n') {
                return content[newline + 1..].trim();
            }
            return content;
        }
    }

    if let Some(start) = text.find('{') {
        if let Some(end) = text.rfind('}') {
            return &text[start..=end];
        }
    }

    text.trim()
}

/// Chat-completions client; model, key, and endpoint come from config
pub struct LlmClient {
    config: ModelConfig,
    http: Client,
}

impl LlmClient {
    pub fn new(config: ModelConfig) -> Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(QuorumError::Http)?;
        Ok(Self { config, http })
    }

    pub fn model_name(&self) -> &str {
        &self.config.name
    }

    /// One structured completion; the response body is parsed as strict
    /// JSON (fence-tolerant); the caller supplies the timeout.
    pub async fn chat_json(
        &self,
        system: &str,
        user: &str,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let body = json!({
            "model": self.config.name,
            "messages": [
                ChatMessage::system(system),
                ChatMessage::user(user),
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "response_format": {"type": "json_object"},
        });

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let request = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send();

        let response = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| QuorumError::Llm(format!("model call timed out after {:?}", timeout)))?
            .map_err(QuorumError::Http)?;

        if !response.status().is_success() {
            return Err(QuorumError::Llm(format!(
                "model endpoint returned {}",
                response.status()
            )));
        }

        let parsed: ChatResponse = tokio::time::timeout(timeout, response.json())
            .await
            .map_err(|_| QuorumError::Llm("model response read timed out".to_string()))?
            .map_err(QuorumError::Http)?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| QuorumError::LlmParse("empty choices".to_string()))?;

        debug!(model = %self.config.name, "raw model output: {}", content);

        serde_json::from_str(extract_json(content))
            .map_err(|e| QuorumError::LlmParse(format!("{}: {}", e, content)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_from_fenced_block() {
        let text = "Here's my analysis:\n\n```json\n{\"signal\": \"bullish\", \"confidence\": 0.9}\n```\n\nDone.";
        let json = extract_json(text);
        assert!(json.starts_with('{'));
        assert!(json.contains("bullish"));
        assert!(serde_json::from_str::<serde_json::Value>(json).is_ok());
    }

    #[test]
    fn extracts_json_from_generic_fence() {
        let text = "```\njson\n{\"a\": 1}\n```";
        let json = extract_json(text);
        assert!(serde_json::from_str::<serde_json::Value>(json).is_ok());
    }

    #[test]
    fn extracts_raw_object() {
        let text = r#"{"signal":"neutral","confidence":0.5}"#;
        assert_eq!(extract_json(text), text);
    }

    #[test]
    fn extracts_object_with_prose_around_it() {
        let text = r#"Sure! {"signal":"bearish"} hope that helps"#;
        assert_eq!(extract_json(text), r#"{"signal":"bearish"}"#);
    }
}
