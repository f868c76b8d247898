//! HTTP-backed chat model speaking the OpenAI-compatible completions shape

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::adapters::ChatModel;
use crate::error::{AdapterError, AdapterResult};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// Chat-completions client. Strict-JSON discipline lives a layer up in
/// [`crate::llm::LlmClient`]; this adapter only moves text.
pub struct HttpChatModel {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpChatModel {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> AdapterResult<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            // Deterministic normalization expects deterministic sampling.
            temperature: 0.0,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AdapterError::unavailable(format!("llm request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(categorise(status, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::malformed(format!("llm response body: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AdapterError::malformed("llm response had no choices"))
    }
}

fn categorise(status: reqwest::StatusCode, body: &str) -> AdapterError {
    match status.as_u16() {
        401 | 403 => AdapterError::AuthMissing { message: format!("{status}: {body}") },
        429 => AdapterError::RateLimited { message: format!("{status}: {body}") },
        _ => AdapterError::unavailable(format!("{status}: {body}")),
    }
}
