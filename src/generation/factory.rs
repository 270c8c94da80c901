use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::{
    AnthropicBackend, BackendError, BackendKind, GenerationBackend, GoogleBackend,
    OpenAiCompatibleBackend,
};
use crate::config::LlmConfig;

/// Model name that means "use whatever the layer below chose"
pub const DEFAULT_MODEL_SENTINEL: &str = "default";

/// Per-construction overrides for a backend
#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            api_key: None,
            model: None,
            base_url: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Listing entry for `BackendFactory::available`
#[derive(Debug, Clone, Serialize)]
pub struct BackendInfo {
    pub kind: BackendKind,
    pub display_name: &'static str,
    pub configured: bool,
    pub default_model: &'static str,
    pub models: &'static [&'static str],
}

pub struct BackendFactory;

impl BackendFactory {
    /// Build a backend of `kind` with the given overrides
    pub fn create(
        kind: BackendKind,
        options: BackendOptions,
    ) -> Result<Arc<dyn GenerationBackend>, BackendError> {
        let model = resolve_model(options.model.as_deref(), None, kind);

        let base_url = options
            .base_url
            .filter(|url| !url.trim().is_empty())
            .or_else(|| kind.default_base_url().map(str::to_string))
            .ok_or_else(|| BackendError::Misconfigured {
                backend: kind.as_str().to_string(),
                message: "a base_url is required".to_string(),
            })?;

        let api_key = options.api_key.filter(|key| !key.trim().is_empty());
        if api_key.is_none() && kind.requires_credential() {
            return Err(BackendError::CredentialMissing {
                backend: kind.as_str().to_string(),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| BackendError::Misconfigured {
                backend: kind.as_str().to_string(),
                message: e.to_string(),
            })?;

        debug!("Created generation backend: {} with model {}", kind, model);

        let backend: Arc<dyn GenerationBackend> = match kind {
            BackendKind::Anthropic => {
                Arc::new(AnthropicBackend::new(model, api_key, base_url, client))
            }
            BackendKind::Google => Arc::new(GoogleBackend::new(model, api_key, base_url, client)),
            BackendKind::OpenAi
            | BackendKind::Xai
            | BackendKind::Groq
            | BackendKind::Cerebras
            | BackendKind::Custom => Arc::new(OpenAiCompatibleBackend::new(
                kind, model, api_key, base_url, client,
            )),
        };

        Ok(backend)
    }

    /// Build the backend described by the `[llm]` section
    pub fn from_config(config: &LlmConfig) -> Result<Arc<dyn GenerationBackend>, BackendError> {
        let kind: BackendKind = config.provider.parse()?;
        Self::create(
            kind,
            BackendOptions {
                api_key: Self::env_credential(kind, config),
                model: Some(config.model.clone()),
                base_url: config.base_url.clone(),
                timeout: Duration::from_secs(config.timeout_secs),
            },
        )
    }

    /// API key from the environment
    ///
    /// The configured provider reads `llm.api_key_env`; other backends read
    /// their conventional variable.
    pub fn env_credential(kind: BackendKind, config: &LlmConfig) -> Option<String> {
        let var = if config.provider.parse::<BackendKind>().ok() == Some(kind) {
            Some(config.api_key_env.as_str())
        } else {
            kind.credential_env()
        };

        var.and_then(|name| std::env::var(name).ok())
            .filter(|value| !value.trim().is_empty())
    }

    /// Every backend with whether it can be used right now
    pub fn available(config: &LlmConfig) -> Vec<BackendInfo> {
        BackendKind::ALL
            .into_iter()
            .map(|kind| {
                let configured = match kind {
                    BackendKind::Custom => {
                        config.provider == kind.as_str() && config.base_url.is_some()
                    }
                    _ => Self::env_credential(kind, config).is_some(),
                };
                BackendInfo {
                    kind,
                    display_name: kind.display_name(),
                    configured,
                    default_model: kind.default_model(),
                    models: kind.known_models(),
                }
            })
            .collect()
    }
}

/// Resolve a requested model name
///
/// Empty or `"default"` falls through to `fallback`, then to the backend's
/// own default model.
pub fn resolve_model(requested: Option<&str>, fallback: Option<&str>, kind: BackendKind) -> String {
    let usable = |m: &&str| !m.trim().is_empty() && *m != DEFAULT_MODEL_SENTINEL;

    requested
        .filter(usable)
        .or_else(|| fallback.filter(usable))
        .unwrap_or_else(|| kind.default_model())
        .to_string()
}
