//! Completion backend: the one external call the engine awaits.
//!
//! `OpenAI` calls chat.completions and returns plain text. Calls are
//! instrumented and log model names, latencies and response sizes (not contents).
//!
//! NOTE: We never log the API key.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::CompletionError;

/// One message of the outbound request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
  pub role: String,
  pub content: String,
}

impl ChatMessage {
  pub fn system(content: impl Into<String>) -> Self {
    Self { role: "system".into(), content: content.into() }
  }
  pub fn user(content: impl Into<String>) -> Self {
    Self { role: "user".into(), content: content.into() }
  }
  pub fn assistant(content: impl Into<String>) -> Self {
    Self { role: "assistant".into(), content: content.into() }
  }
}

/// Black box returning natural-language text for a message list.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
  async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError>;

  fn name(&self) -> &str;
}

/// Backend used when no API key is configured; every call fails so the
/// engine takes its canned-reply path.
pub struct Offline;

#[async_trait]
impl CompletionBackend for Offline {
  async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, CompletionError> {
    Err(CompletionError::NotConfigured("OPENAI_API_KEY"))
  }

  fn name(&self) -> &str { "offline" }
}

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
  pub temperature: f32,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model =
      std::env::var("OPENAI_TUTOR_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .ok()?;

    Some(Self {
      client,
      api_key,
      base_url: base_url.trim_end_matches('/').to_string(),
      model,
      temperature: 0.4,
    })
  }
}

#[async_trait]
impl CompletionBackend for OpenAI {
  #[instrument(level = "info", target = "completion", skip(self, messages), fields(model = %self.model, messages = messages.len()))]
  async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: &self.model,
      messages,
      temperature: self.temperature,
      max_tokens: Some(160),
    };

    let start = Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, "socratic-tutor/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let message = extract_openai_error(&body).unwrap_or(body);
      return Err(CompletionError::HttpStatus { status, message });
    }

    let bytes = res.bytes().await?;
    let body: ChatCompletionResponse = serde_json::from_slice(&bytes)?;
    if let Some(usage) = &body.usage {
      info!(target: "completion", prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.into_iter().next()
      .and_then(|c| c.message.content)
      .map(|t| t.trim().to_string())
      .filter(|t| !t.is_empty())
      .ok_or(CompletionError::EmptyChoices)?;

    info!(target: "completion", elapsed = ?start.elapsed(), reply_len = text.len(), "Completion received");
    Ok(text)
  }

  fn name(&self) -> &str { "openai" }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
  model: &'a str,
  messages: &'a [ChatMessage],
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn extracts_provider_error_message() {
    let body = r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#;
    assert_eq!(extract_openai_error(body).as_deref(), Some("Rate limit reached"));
    assert_eq!(extract_openai_error("<html>bad gateway</html>"), None);
  }

  #[test]
  fn request_serializes_messages_in_order() {
    let messages = vec![ChatMessage::system("rules"), ChatMessage::user("hi"), ChatMessage::assistant("why?")];
    let req = ChatCompletionRequest { model: "m", messages: &messages, temperature: 0.4, max_tokens: None };
    let v = serde_json::to_value(&req).unwrap();
    assert_eq!(v["messages"][1]["role"], "user");
    assert_eq!(v["messages"][2]["content"], "why?");
    assert!(v.get("max_tokens").is_none());
  }

  #[tokio::test]
  async fn offline_backend_always_fails() {
    let err = Offline.complete(&[ChatMessage::user("x")]).await.unwrap_err();
    assert!(matches!(err, CompletionError::NotConfigured(_)));
  }
}
