//! OpenAI-compatible chat completions client
//!
//! Serves OpenAI, xAI, Groq, Cerebras and custom endpoints, which all speak
//! the `/chat/completions` dialect with bearer authentication.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use super::sse::{forward_events, EventOutcome};
use super::{
    map_http_error, retry_after_secs, BackendError, BackendKind, GenerationBackend,
    GenerationResponse, Message, StreamChunk, TokenUsage,
};

pub struct OpenAiCompatibleBackend {
    kind: BackendKind,
    model: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
    #[serde(default)]
    delta: Option<ChoiceMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl OpenAiCompatibleBackend {
    pub fn new(
        kind: BackendKind,
        model: String,
        api_key: Option<String>,
        base_url: String,
        client: reqwest::Client,
    ) -> Self {
        Self {
            kind,
            model,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn request_body<'a>(
        &'a self,
        messages: &'a [Message],
        temperature: f32,
        max_tokens: u32,
        stream: bool,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature,
            max_tokens,
            stream,
        }
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, model = %self.model, "Sending {} completion request", self.kind);

        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        } else if self.kind.requires_credential() {
            return Err(BackendError::CredentialMissing {
                backend: self.kind.as_str().to_string(),
            });
        }

        let response = request.send().await.map_err(|e| BackendError::Request {
            backend: self.kind.as_str().to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(map_http_error(self.kind, status, retry_after, &text));
        }

        Ok(response)
    }

    fn parse_error(&self, message: impl ToString) -> BackendError {
        BackendError::Parse {
            backend: self.kind.as_str().to_string(),
            message: message.to_string(),
        }
    }

    fn parse_completion(&self, body: &str) -> Result<GenerationResponse, BackendError> {
        let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| self.parse_error(e))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| self.parse_error("response has no choices"))?;

        let content = choice
            .message
            .and_then(|m| m.content)
            .unwrap_or_default();

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: if u.total_tokens > 0 {
                    u.total_tokens
                } else {
                    u.prompt_tokens + u.completion_tokens
                },
            })
            .unwrap_or_default();

        Ok(GenerationResponse {
            content,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            usage,
            finish_reason: choice.finish_reason,
        })
    }

    fn parse_stream_data(&self, data: &str) -> Result<EventOutcome, BackendError> {
        let data = data.trim();
        if data.is_empty() {
            return Ok(EventOutcome::Skip);
        }
        if data == "[DONE]" {
            return Ok(EventOutcome::Done(None));
        }

        let parsed: ChatResponse = serde_json::from_str(data).map_err(|e| self.parse_error(e))?;
        let Some(choice) = parsed.choices.into_iter().next() else {
            // Usage-only trailer
            return Ok(EventOutcome::Skip);
        };

        let content = choice.delta.and_then(|d| d.content).unwrap_or_default();
        if content.is_empty() && choice.finish_reason.is_none() {
            return Ok(EventOutcome::Skip);
        }

        Ok(EventOutcome::Chunk(StreamChunk {
            content,
            is_final: false,
            finish_reason: choice.finish_reason,
        }))
    }
}

#[async_trait]
impl GenerationBackend for OpenAiCompatibleBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        messages: &[Message],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<GenerationResponse, BackendError> {
        let body = self.request_body(messages, temperature, max_tokens, false);
        let response = self.send(&body).await?;
        let text = response.text().await.map_err(|e| BackendError::Request {
            backend: self.kind.as_str().to_string(),
            message: e.to_string(),
        })?;
        self.parse_completion(&text)
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        temperature: f32,
        max_tokens: u32,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<(), BackendError> {
        let body = self.request_body(messages, temperature, max_tokens, true);
        let response = self.send(&body).await?;
        forward_events(self.kind, response, &tx, |event| {
            self.parse_stream_data(&event.data)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(kind: BackendKind, api_key: Option<&str>) -> OpenAiCompatibleBackend {
        OpenAiCompatibleBackend::new(
            kind,
            kind.default_model().to_string(),
            api_key.map(str::to_string),
            "http://127.0.0.1:9/v1/".to_string(),
            reqwest::Client::new(),
        )
    }

    #[test]
    fn test_parse_completion() {
        let b = backend(BackendKind::Groq, Some("k"));
        let body = r#"{
            "model": "llama-3.3-70b-versatile",
            "choices": [{"message": {"role": "assistant", "content": "Hi"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 7, "completion_tokens": 2, "total_tokens": 9}
        }"#;

        let response = b.parse_completion(body).unwrap();
        assert_eq!(response.content, "Hi");
        assert_eq!(response.usage.total_tokens, 9);
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_parse_stream_data() {
        let b = backend(BackendKind::OpenAi, Some("k"));

        match b
            .parse_stream_data(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#)
            .unwrap()
        {
            EventOutcome::Chunk(chunk) => assert_eq!(chunk.content, "Hel"),
            _ => panic!("expected a chunk"),
        }

        assert!(matches!(
            b.parse_stream_data("[DONE]").unwrap(),
            EventOutcome::Done(None)
        ));
        assert!(matches!(
            b.parse_stream_data(r#"{"choices":[],"usage":{"prompt_tokens":1}}"#)
                .unwrap(),
            EventOutcome::Skip
        ));
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_request() {
        let b = backend(BackendKind::OpenAi, None);
        let err = b
            .generate(&[Message::user("hello")], 0.7, 16)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::CredentialMissing { .. }));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let b = backend(BackendKind::Custom, None);
        assert_eq!(b.base_url, "http://127.0.0.1:9/v1");
    }
}
