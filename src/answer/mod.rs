//! Answer orchestration
//!
//! Turns a question into a grounded answer: classify, answer pure aggregates
//! from the store, otherwise retrieve, build the context block, pick a
//! generation backend and generate (blocking or streamed).

mod backend;
mod context;
mod fast_path;
mod orchestrator;
mod prompts;

pub use backend::{select_backend, BackendResolver, LayeredBackendResolver};
pub use context::{build_context, citations, stats_block, PackedContext, NO_DOCUMENTS};
pub use fast_path::{AggregateIntent, FastPath};
pub use orchestrator::AnswerOrchestrator;
pub use prompts::{answer_messages, summary_messages, system_prompt, SUMMARY_SYSTEM_PROMPT};

use crate::error::Degradation;
use crate::generation::{GenerationBackend, Message, TokenUsage};
use crate::query::{QuerySummary, QueryType};
use crate::retrieval::{ScopeFilter, SourceClass};
use serde::{Deserialize, Serialize};

/// Request-level backend choice; unset fields fall through to stored settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendOverride {
    pub provider: Option<String>,
    pub model: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AnswerRequest {
    pub question: String,
    /// Prior turns, oldest first
    pub history: Vec<Message>,
    pub backend: BackendOverride,
    /// Key of the stored backend settings to prefer
    pub settings_scope: Option<String>,
    pub scope: Option<ScopeFilter>,
    pub top_k: Option<usize>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl AnswerRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SummarizeRequest {
    pub topic: Option<String>,
    pub backend: BackendOverride,
    pub settings_scope: Option<String>,
    pub scope: Option<ScopeFilter>,
    pub max_documents: Option<usize>,
}

/// A source the answer was grounded on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub id: String,
    pub source: SourceClass,
    /// Effective score rounded to 4 places
    pub score: f64,
    pub email_id: Option<String>,
    pub subject: Option<String>,
    pub sender: Option<String>,
    /// ISO-8601
    pub date: Option<String>,
    pub filename: Option<String>,
}

/// Which backend produced an answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendIdentity {
    pub provider: String,
    pub model: String,
}

impl BackendIdentity {
    pub const SYSTEM_PROVIDER: &'static str = "system";

    /// Answers computed directly from the store
    pub fn direct_store_query() -> Self {
        Self {
            provider: Self::SYSTEM_PROVIDER.to_string(),
            model: "direct_store_query".to_string(),
        }
    }

    /// No generation took place
    pub fn none() -> Self {
        Self {
            provider: Self::SYSTEM_PROVIDER.to_string(),
            model: "none".to_string(),
        }
    }

    pub fn of(backend: &dyn GenerationBackend) -> Self {
        Self {
            provider: backend.kind().as_str().to_string(),
            model: backend.model().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub query_type: QueryType,
    pub query: QuerySummary,
    pub backend: BackendIdentity,
    pub usage: TokenUsage,
    pub degradations: Vec<Degradation>,
}

/// Everything but the text of a streamed answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamedAnswer {
    pub citations: Vec<Citation>,
    pub query_type: QueryType,
    pub query: QuerySummary,
    pub backend: BackendIdentity,
    pub degradations: Vec<Degradation>,
}
