//! Layered generation backend selection

use super::BackendOverride;
use crate::config::LlmConfig;
use crate::error::Result;
use crate::generation::{
    resolve_model, BackendError, BackendFactory, BackendKind, BackendOptions, GenerationBackend,
};
use crate::storage::{BackendSetting, Store};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Produces the backend one request generates with
#[async_trait]
pub trait BackendResolver: Send + Sync {
    async fn resolve(
        &self,
        requested: &BackendOverride,
        settings_scope: Option<&str>,
    ) -> Result<Arc<dyn GenerationBackend>>;
}

/// Request override, then stored settings, then the `[llm]` section
pub struct LayeredBackendResolver {
    store: Arc<dyn Store>,
    llm: LlmConfig,
}

impl LayeredBackendResolver {
    pub fn new(store: Arc<dyn Store>, llm: LlmConfig) -> Self {
        Self { store, llm }
    }
}

#[async_trait]
impl BackendResolver for LayeredBackendResolver {
    async fn resolve(
        &self,
        requested: &BackendOverride,
        settings_scope: Option<&str>,
    ) -> Result<Arc<dyn GenerationBackend>> {
        let stored = self.store.backend_settings(settings_scope).await?;
        let (kind, options) = select_backend(requested, stored.as_ref(), &self.llm)?;

        debug!(
            "Selected backend {} (model {:?}, stored setting: {})",
            kind,
            options.model,
            stored.is_some()
        );

        Ok(BackendFactory::create(kind, options)?)
    }
}

/// Resolve provider, model, credential and base URL across the layers
///
/// Stored and configured values only apply to the provider they were saved
/// for. An empty or `"default"` model falls through to the next layer.
pub fn select_backend(
    requested: &BackendOverride,
    stored: Option<&BackendSetting>,
    llm: &LlmConfig,
) -> std::result::Result<(BackendKind, BackendOptions), BackendError> {
    let provider = requested
        .provider
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .or(stored.map(|s| s.provider.as_str()));

    let kind: BackendKind = match provider {
        Some(provider) => provider.parse()?,
        None if llm.enabled => llm.provider.parse()?,
        None => {
            return Err(BackendError::Misconfigured {
                backend: llm.provider.clone(),
                message: "generation is disabled and no backend is configured".to_string(),
            })
        }
    };

    let stored = stored.filter(|s| s.provider.parse::<BackendKind>().ok() == Some(kind));
    let configured = llm.provider.parse::<BackendKind>().ok() == Some(kind);

    let fallback_model = stored
        .and_then(|s| s.model.as_deref())
        .filter(|m| !m.trim().is_empty() && *m != crate::generation::DEFAULT_MODEL_SENTINEL)
        .or_else(|| configured.then_some(llm.model.as_str()));
    let model = resolve_model(requested.model.as_deref(), fallback_model, kind);

    let api_key = non_empty(requested.api_key.clone())
        .or_else(|| non_empty(stored.and_then(|s| s.api_key.clone())))
        .or_else(|| BackendFactory::env_credential(kind, llm));

    let base_url = non_empty(requested.base_url.clone())
        .or_else(|| non_empty(stored.and_then(|s| s.base_url.clone())))
        .or_else(|| {
            if configured {
                non_empty(llm.base_url.clone())
            } else {
                None
            }
        });

    Ok((
        kind,
        BackendOptions {
            api_key,
            model: Some(model),
            base_url,
            timeout: Duration::from_secs(llm.timeout_secs),
        },
    ))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
