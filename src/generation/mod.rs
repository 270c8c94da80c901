//! Text generation backends
//!
//! One capability trait, one implementation per vendor API shape, and a
//! factory keyed by [`BackendKind`]. OpenAI, xAI, Groq, Cerebras and custom
//! endpoints share the OpenAI-compatible client.

mod anthropic;
mod factory;
mod google;
mod openai;
mod sse;

pub use anthropic::AnthropicBackend;
pub use factory::{resolve_model, BackendFactory, BackendInfo, BackendOptions, DEFAULT_MODEL_SENTINEL};
pub use google::GoogleBackend;
pub use openai::OpenAiCompatibleBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::ErrorKind;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("No API key configured for {backend}")]
    CredentialMissing { backend: String },

    #[error("{backend} rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        backend: String,
        retry_after_secs: u64,
    },

    #[error("{backend} context length exceeded: {message}")]
    ContextExceeded { backend: String, message: String },

    #[error("{backend} authentication failed")]
    AuthFailed { backend: String },

    #[error("{backend} is misconfigured: {message}")]
    Misconfigured { backend: String, message: String },

    #[error("{backend} request failed: {message}")]
    Request { backend: String, message: String },

    #[error("{backend} stream failed: {message}")]
    Stream { backend: String, message: String },

    #[error("Failed to parse {backend} response: {message}")]
    Parse { backend: String, message: String },

    #[error("Unknown generation backend: {0}")]
    UnknownBackend(String),
}

impl BackendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::CredentialMissing { .. } => ErrorKind::BackendCredentialMissing,
            BackendError::RateLimited { .. } => ErrorKind::BackendRateLimited,
            BackendError::ContextExceeded { .. } => ErrorKind::BackendContextExceeded,
            BackendError::AuthFailed { .. } => ErrorKind::BackendAuthFailed,
            BackendError::UnknownBackend(_) | BackendError::Misconfigured { .. } => {
                ErrorKind::Config
            }
            BackendError::Request { .. }
            | BackendError::Stream { .. }
            | BackendError::Parse { .. } => ErrorKind::BackendFailure,
        }
    }

    /// Backend identity the error is tagged with
    pub fn backend(&self) -> Option<&str> {
        match self {
            BackendError::CredentialMissing { backend }
            | BackendError::RateLimited { backend, .. }
            | BackendError::ContextExceeded { backend, .. }
            | BackendError::AuthFailed { backend }
            | BackendError::Misconfigured { backend, .. }
            | BackendError::Request { backend, .. }
            | BackendError::Stream { backend, .. }
            | BackendError::Parse { backend, .. } => Some(backend),
            BackendError::UnknownBackend(_) => None,
        }
    }
}

/// Supported generation backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    OpenAi,
    Anthropic,
    Google,
    Xai,
    Groq,
    Cerebras,
    Custom,
}

impl BackendKind {
    pub const ALL: [BackendKind; 7] = [
        BackendKind::OpenAi,
        BackendKind::Anthropic,
        BackendKind::Google,
        BackendKind::Xai,
        BackendKind::Groq,
        BackendKind::Cerebras,
        BackendKind::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::OpenAi => "openai",
            BackendKind::Anthropic => "anthropic",
            BackendKind::Google => "google",
            BackendKind::Xai => "xai",
            BackendKind::Groq => "groq",
            BackendKind::Cerebras => "cerebras",
            BackendKind::Custom => "custom",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            BackendKind::OpenAi => "OpenAI",
            BackendKind::Anthropic => "Anthropic",
            BackendKind::Google => "Google",
            BackendKind::Xai => "xAI",
            BackendKind::Groq => "Groq",
            BackendKind::Cerebras => "Cerebras",
            BackendKind::Custom => "Custom",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            BackendKind::OpenAi => "gpt-4-turbo-preview",
            BackendKind::Anthropic => "claude-3-sonnet-20240229",
            BackendKind::Google => "gemini-pro",
            BackendKind::Xai => "grok-beta",
            BackendKind::Groq => "llama-3.3-70b-versatile",
            BackendKind::Cerebras => "llama-3.3-70b",
            BackendKind::Custom => "default",
        }
    }

    /// Base URL of the vendor API; custom endpoints have none
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            BackendKind::OpenAi => Some("https://api.openai.com/v1"),
            BackendKind::Anthropic => Some("https://api.anthropic.com/v1"),
            BackendKind::Google => Some("https://generativelanguage.googleapis.com/v1beta"),
            BackendKind::Xai => Some("https://api.x.ai/v1"),
            BackendKind::Groq => Some("https://api.groq.com/openai/v1"),
            BackendKind::Cerebras => Some("https://api.cerebras.ai/v1"),
            BackendKind::Custom => None,
        }
    }

    /// Conventional environment variable holding this backend's API key
    pub fn credential_env(&self) -> Option<&'static str> {
        match self {
            BackendKind::OpenAi => Some("OPENAI_API_KEY"),
            BackendKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            BackendKind::Google => Some("GOOGLE_API_KEY"),
            BackendKind::Xai => Some("XAI_API_KEY"),
            BackendKind::Groq => Some("GROQ_API_KEY"),
            BackendKind::Cerebras => Some("CEREBRAS_API_KEY"),
            BackendKind::Custom => None,
        }
    }

    /// Whether requests fail without an API key
    pub fn requires_credential(&self) -> bool {
        !matches!(self, BackendKind::Custom)
    }

    /// Models offered in listings; any model string is accepted at request time
    pub fn known_models(&self) -> &'static [&'static str] {
        match self {
            BackendKind::OpenAi => &[
                "gpt-4-turbo-preview",
                "gpt-4-turbo",
                "gpt-4",
                "gpt-4o",
                "gpt-4o-mini",
                "gpt-3.5-turbo",
            ],
            BackendKind::Anthropic => &[
                "claude-3-opus-20240229",
                "claude-3-sonnet-20240229",
                "claude-3-haiku-20240307",
            ],
            BackendKind::Google => &["gemini-pro", "gemini-1.0-pro", "gemini-1.5-pro"],
            BackendKind::Xai => &["grok-beta", "grok-2", "grok-2-mini"],
            BackendKind::Groq => &[
                "llama-3.3-70b-versatile",
                "llama-3.1-70b-versatile",
                "llama-3.1-8b-instant",
            ],
            BackendKind::Cerebras => &["llama-3.3-70b", "llama3.1-8b"],
            BackendKind::Custom => &[],
        }
    }
}

impl FromStr for BackendKind {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        BackendKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == key)
            .ok_or_else(|| BackendError::UnknownBackend(s.to_string()))
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A complete (non-streamed) generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
    pub finish_reason: Option<String>,
}

/// Incremental output of a streamed generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub content: String,
    pub is_final: bool,
    pub finish_reason: Option<String>,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_final: false,
            finish_reason: None,
        }
    }

    pub fn final_chunk(finish_reason: Option<String>) -> Self {
        Self {
            content: String::new(),
            is_final: true,
            finish_reason,
        }
    }
}

/// A text generation backend
///
/// `generate_stream` sends chunks in order and ends with a chunk whose
/// `is_final` is set. A closed receiver ends the stream early with `Ok`.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn model(&self) -> &str;

    async fn generate(
        &self,
        messages: &[Message],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<GenerationResponse, BackendError>;

    async fn generate_stream(
        &self,
        messages: &[Message],
        temperature: f32,
        max_tokens: u32,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<(), BackendError>;
}

/// Map a non-success HTTP status to a typed error
pub(crate) fn map_http_error(
    kind: BackendKind,
    status: reqwest::StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> BackendError {
    let backend = kind.as_str().to_string();
    let lowered = body.to_lowercase();

    match status.as_u16() {
        401 | 403 => BackendError::AuthFailed { backend },
        429 => BackendError::RateLimited {
            backend,
            retry_after_secs: retry_after.unwrap_or(5),
        },
        _ if lowered.contains("context_length")
            || lowered.contains("maximum context")
            || lowered.contains("too many tokens")
            || lowered.contains("prompt is too long") =>
        {
            BackendError::ContextExceeded {
                backend,
                message: truncate_body(body),
            }
        }
        code => BackendError::Request {
            backend,
            message: format!("HTTP {}: {}", code, truncate_body(body)),
        },
    }
}

/// Read the Retry-After header as whole seconds
pub(crate) fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 500;
    if body.chars().count() <= MAX {
        body.to_string()
    } else {
        let head: String = body.chars().take(MAX).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("groq".parse::<BackendKind>().unwrap(), BackendKind::Groq);
        assert_eq!(" OpenAI ".parse::<BackendKind>().unwrap(), BackendKind::OpenAi);
        assert!(matches!(
            "ollama".parse::<BackendKind>(),
            Err(BackendError::UnknownBackend(_))
        ));

        for kind in BackendKind::ALL {
            assert_eq!(kind.as_str().parse::<BackendKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_http_error_mapping() {
        let auth = map_http_error(
            BackendKind::OpenAi,
            reqwest::StatusCode::UNAUTHORIZED,
            None,
            "",
        );
        assert_eq!(auth.kind(), ErrorKind::BackendAuthFailed);
        assert_eq!(auth.backend(), Some("openai"));

        let limited = map_http_error(
            BackendKind::Groq,
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            Some(12),
            "slow down",
        );
        assert!(matches!(
            limited,
            BackendError::RateLimited {
                retry_after_secs: 12,
                ..
            }
        ));

        let context = map_http_error(
            BackendKind::OpenAi,
            reqwest::StatusCode::BAD_REQUEST,
            None,
            r#"{"error":{"code":"context_length_exceeded"}}"#,
        );
        assert_eq!(context.kind(), ErrorKind::BackendContextExceeded);

        let other = map_http_error(
            BackendKind::Anthropic,
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            None,
            "boom",
        );
        assert_eq!(other.kind(), ErrorKind::BackendFailure);
    }

    #[test]
    fn test_usage_total() {
        let usage = TokenUsage::new(10, 5);
        assert_eq!(usage.total_tokens, 15);
    }
}
