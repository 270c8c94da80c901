//! Google Gemini generateContent client

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use super::sse::{forward_events, EventOutcome};
use super::{
    map_http_error, retry_after_secs, BackendError, BackendKind, GenerationBackend,
    GenerationResponse, Message, Role, StreamChunk, TokenUsage,
};

pub struct GoogleBackend {
    model: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl GoogleBackend {
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

    /// Gemini uses `user`/`model` roles and a separate system instruction
    fn request_body(messages: &[Message], temperature: f32, max_tokens: u32) -> Value {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let contents: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": temperature,
                "maxOutputTokens": max_tokens,
            },
        });

        if !system.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system.join("\n\n") }] });
        }

        body
    }

    async fn send(&self, method: &str, stream: bool, body: &Value) -> Result<reqwest::Response, BackendError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BackendError::CredentialMissing {
                backend: BackendKind::Google.as_str().to_string(),
            })?;

        let url = format!("{}/models/{}:{}", self.base_url, self.model, method);
        debug!(url = %url, "Sending google generation request");

        let mut request = self.client.post(&url).query(&[("key", key)]);
        if stream {
            request = request.query(&[("alt", "sse")]);
        }

        let response = request
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Request {
                backend: BackendKind::Google.as_str().to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(map_http_error(BackendKind::Google, status, retry_after, &text));
        }

        Ok(response)
    }

    fn parse_error(message: impl ToString) -> BackendError {
        BackendError::Parse {
            backend: BackendKind::Google.as_str().to_string(),
            message: message.to_string(),
        }
    }

    fn candidate_text(body: &Value) -> String {
        body["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }

    fn usage(body: &Value) -> Option<TokenUsage> {
        let meta = body.get("usageMetadata")?;
        let prompt = meta["promptTokenCount"].as_u64().unwrap_or(0) as u32;
        let completion = meta["candidatesTokenCount"].as_u64().unwrap_or(0) as u32;
        let mut usage = TokenUsage::new(prompt, completion);
        if let Some(total) = meta["totalTokenCount"].as_u64() {
            usage.total_tokens = total as u32;
        }
        Some(usage)
    }

    fn parse_completion(&self, body: &str) -> Result<GenerationResponse, BackendError> {
        let parsed: Value = serde_json::from_str(body).map_err(Self::parse_error)?;

        if parsed["candidates"].as_array().map_or(true, |c| c.is_empty()) {
            let reason = parsed["promptFeedback"]["blockReason"]
                .as_str()
                .unwrap_or("no candidates returned");
            return Err(Self::parse_error(reason));
        }

        Ok(GenerationResponse {
            content: Self::candidate_text(&parsed),
            model: parsed["modelVersion"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| self.model.clone()),
            usage: Self::usage(&parsed).unwrap_or_default(),
            finish_reason: parsed["candidates"][0]["finishReason"]
                .as_str()
                .map(str::to_string),
        })
    }

    fn parse_stream_data(data: &str) -> Result<EventOutcome, BackendError> {
        if data.trim().is_empty() {
            return Ok(EventOutcome::Skip);
        }
        let parsed: Value = serde_json::from_str(data).map_err(Self::parse_error)?;

        let content = Self::candidate_text(&parsed);
        let finish_reason = parsed["candidates"][0]["finishReason"]
            .as_str()
            .map(str::to_string);

        if content.is_empty() && finish_reason.is_none() {
            return Ok(EventOutcome::Skip);
        }

        Ok(EventOutcome::Chunk(StreamChunk {
            content,
            is_final: false,
            finish_reason,
        }))
    }
}

#[async_trait]
impl GenerationBackend for GoogleBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Google
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
        let body = Self::request_body(messages, temperature, max_tokens);
        let response = self.send("generateContent", false, &body).await?;
        let text = response.text().await.map_err(|e| BackendError::Request {
            backend: BackendKind::Google.as_str().to_string(),
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
        let body = Self::request_body(messages, temperature, max_tokens);
        let response = self.send("streamGenerateContent", true, &body).await?;
        forward_events(BackendKind::Google, response, &tx, |event| {
            Self::parse_stream_data(&event.data)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_roles() {
        let messages = vec![
            Message::system("rules"),
            Message::user("q1"),
            Message::assistant("a1"),
            Message::user("q2"),
        ];
        let body = GoogleBackend::request_body(&messages, 0.5, 64);

        assert_eq!(body["contents"].as_array().unwrap().len(), 3);
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "rules");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 64);
    }

    #[test]
    fn test_parse_completion() {
        let backend = GoogleBackend::new(
            "gemini-pro".to_string(),
            Some("k".to_string()),
            "https://example.invalid".to_string(),
            reqwest::Client::new(),
        );
        let body = r#"{
            "candidates": [{"content": {"parts": [{"text": "Answer"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 1, "totalTokenCount": 5}
        }"#;

        let response = backend.parse_completion(body).unwrap();
        assert_eq!(response.content, "Answer");
        assert_eq!(response.model, "gemini-pro");
        assert_eq!(response.usage.total_tokens, 5);

        assert!(backend
            .parse_completion(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#)
            .is_err());
    }

    #[test]
    fn test_parse_stream_data() {
        match GoogleBackend::parse_stream_data(
            r#"{"candidates":[{"content":{"parts":[{"text":"par"}]}}]}"#,
        )
        .unwrap()
        {
            EventOutcome::Chunk(chunk) => assert_eq!(chunk.content, "par"),
            _ => panic!("expected a chunk"),
        }
    }
}
