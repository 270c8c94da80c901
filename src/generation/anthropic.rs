//! Anthropic messages API client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use super::sse::{forward_events, EventOutcome, SseEvent};
use super::{
    map_http_error, retry_after_secs, BackendError, BackendKind, GenerationBackend,
    GenerationResponse, Message, Role, StreamChunk, TokenUsage,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicBackend {
    model: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl AnthropicBackend {
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: String,
        client: reqwest::Client,
    ) -> Self {
        Self {
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
    ) -> MessagesRequest<'a> {
        // System turns go in the top-level field
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        MessagesRequest {
            model: &self.model,
            system: if system.is_empty() {
                None
            } else {
                Some(system.join("\n\n"))
            },
            messages: messages
                .iter()
                .filter(|m| m.role != Role::System)
                .map(|m| ApiMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            // The messages API caps temperature at 1.0
            temperature: temperature.min(1.0),
            max_tokens,
            stream,
        }
    }

    async fn send(&self, body: &MessagesRequest<'_>) -> Result<reqwest::Response, BackendError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BackendError::CredentialMissing {
                backend: BackendKind::Anthropic.as_str().to_string(),
            })?;

        let url = format!("{}/messages", self.base_url);
        debug!(url = %url, model = %self.model, "Sending anthropic messages request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Request {
                backend: BackendKind::Anthropic.as_str().to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(map_http_error(
                BackendKind::Anthropic,
                status,
                retry_after,
                &text,
            ));
        }

        Ok(response)
    }

    fn parse_error(message: impl ToString) -> BackendError {
        BackendError::Parse {
            backend: BackendKind::Anthropic.as_str().to_string(),
            message: message.to_string(),
        }
    }

    fn parse_completion(&self, body: &str) -> Result<GenerationResponse, BackendError> {
        let parsed: MessagesResponse = serde_json::from_str(body).map_err(Self::parse_error)?;

        let content = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        let usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens))
            .unwrap_or_default();

        Ok(GenerationResponse {
            content,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            usage,
            finish_reason: parsed.stop_reason,
        })
    }

    fn parse_stream_event(event: &SseEvent) -> Result<EventOutcome, BackendError> {
        if event.data.trim().is_empty() {
            return Ok(EventOutcome::Skip);
        }
        let data: serde_json::Value =
            serde_json::from_str(&event.data).map_err(Self::parse_error)?;

        let event_type = event
            .event
            .as_deref()
            .or_else(|| data["type"].as_str())
            .unwrap_or("");

        match event_type {
            "content_block_delta" => {
                let text = data["delta"]["text"].as_str().unwrap_or("");
                if text.is_empty() {
                    Ok(EventOutcome::Skip)
                } else {
                    Ok(EventOutcome::Chunk(StreamChunk::text(text)))
                }
            }
            "message_delta" => match data["delta"]["stop_reason"].as_str() {
                Some(reason) => Ok(EventOutcome::Chunk(StreamChunk {
                    content: String::new(),
                    is_final: false,
                    finish_reason: Some(reason.to_string()),
                })),
                None => Ok(EventOutcome::Skip),
            },
            "message_stop" => Ok(EventOutcome::Done(None)),
            "error" => Err(BackendError::Stream {
                backend: BackendKind::Anthropic.as_str().to_string(),
                message: data["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown streaming error")
                    .to_string(),
            }),
            _ => Ok(EventOutcome::Skip),
        }
    }
}

#[async_trait]
impl GenerationBackend for AnthropicBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Anthropic
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
            backend: BackendKind::Anthropic.as_str().to_string(),
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
        forward_events(
            BackendKind::Anthropic,
            response,
            &tx,
            Self::parse_stream_event,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> AnthropicBackend {
        AnthropicBackend::new(
            "claude-3-sonnet-20240229".to_string(),
            Some("k".to_string()),
            "https://api.anthropic.com/v1".to_string(),
            reqwest::Client::new(),
        )
    }

    #[test]
    fn test_system_messages_lifted() {
        let b = backend();
        let messages = vec![
            Message::system("be terse"),
            Message::user("hi"),
            Message::assistant("hello"),
            Message::user("again"),
        ];
        let body = b.request_body(&messages, 1.5, 100, false);

        assert_eq!(body.system.as_deref(), Some("be terse"));
        assert_eq!(body.messages.len(), 3);
        assert_eq!(body.messages[0].role, "user");
        assert_eq!(body.temperature, 1.0);
    }

    #[test]
    fn test_parse_completion() {
        let b = backend();
        let body = r#"{
            "model": "claude-3-sonnet-20240229",
            "content": [{"type": "text", "text": "Hello "}, {"type": "text", "text": "there"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 12, "output_tokens": 3}
        }"#;

        let response = b.parse_completion(body).unwrap();
        assert_eq!(response.content, "Hello there");
        assert_eq!(response.usage.total_tokens, 15);
        assert_eq!(response.finish_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn test_parse_stream_events() {
        let delta = SseEvent {
            event: Some("content_block_delta".to_string()),
            data: r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hi"}}"#
                .to_string(),
        };
        match AnthropicBackend::parse_stream_event(&delta).unwrap() {
            EventOutcome::Chunk(chunk) => assert_eq!(chunk.content, "Hi"),
            _ => panic!("expected a chunk"),
        }

        let stop = SseEvent {
            event: Some("message_stop".to_string()),
            data: r#"{"type":"message_stop"}"#.to_string(),
        };
        assert!(matches!(
            AnthropicBackend::parse_stream_event(&stop).unwrap(),
            EventOutcome::Done(None)
        ));

        let error = SseEvent {
            event: Some("error".to_string()),
            data: r#"{"type":"error","error":{"message":"overloaded"}}"#.to_string(),
        };
        assert!(AnthropicBackend::parse_stream_event(&error).is_err());
    }
}
