use crate::config::AppConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("completion request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("completion API returned status {status}: {body}")]
    Status { status: u16, body: String },
}

/// One chat completion: system instruction plus user prompt in, the first
/// choice's message content out. Missing content extracts as an empty string.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, BackendError>;
}

/// Client for any OpenAI-compatible chat-completions endpoint (OpenAI
/// itself or OpenRouter, depending on which key is configured).
pub struct OpenAiBackend {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiBackend {
    pub fn new(config: &AppConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.backend_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

fn request_body(model: &str, system: &str, prompt: &str, max_tokens: u32) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": system },
            { "role": "user", "content": prompt }
        ],
        "max_tokens": max_tokens
    })
}

fn extract_content(payload: &Value) -> String {
    payload["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or("")
        .to_string()
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = request_body(&self.model, system, prompt, max_tokens);

        debug!(model = %self.model, "sending completion request");
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = res.json().await?;
        Ok(extract_content(&payload))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_carries_both_roles_and_the_token_cap() {
        let body = request_body("openai/gpt-3.5-turbo", "sistema", "hola", 800);
        assert_eq!(body["model"], "openai/gpt-3.5-turbo");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "sistema");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "hola");
        assert_eq!(body["max_tokens"], 800);
    }

    #[test]
    fn extract_content_tolerates_malformed_payloads() {
        let ok = json!({ "choices": [ { "message": { "content": "hola" } } ] });
        assert_eq!(extract_content(&ok), "hola");

        assert_eq!(extract_content(&json!({})), "");
        assert_eq!(extract_content(&json!({ "choices": [] })), "");
        assert_eq!(
            extract_content(&json!({ "choices": [ { "message": {} } ] })),
            ""
        );
        assert_eq!(
            extract_content(&json!({ "choices": [ { "message": { "content": 42 } } ] })),
            ""
        );
    }
}
