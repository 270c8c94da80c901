//! Deterministic collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use mailsage::answer::{BackendOverride, BackendResolver};
use mailsage::embedding::{
    BatchProcessor, EmbeddingError, EmbeddingProvider, HnswParams, HnswVectorIndex,
    TantivyLexicalIndex,
};
use mailsage::generation::{
    BackendError, BackendKind, GenerationBackend, GenerationResponse, Message, StreamChunk,
    TokenUsage,
};
use mailsage::ingest::{ImportAttachment, ImportRecord, Importer};
use mailsage::storage::SqliteStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const VOCAB: &[&str] = &[
    "budget", "q3", "revenue", "lunch", "falcon", "launch", "invoice", "offsite",
];

/// Bag-of-words over a tiny vocabulary plus a constant component
///
/// Records every text it embeds.
#[derive(Default)]
pub struct VocabEmbedder {
    pub embedded: Mutex<Vec<String>>,
}

impl VocabEmbedder {
    fn vector(text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let mut vector = vec![0.0; VOCAB.len() + 1];
        for token in lowered.split(|c: char| !c.is_alphanumeric()) {
            if let Some(pos) = VOCAB.iter().position(|w| *w == token) {
                vector[pos] += 1.0;
            }
        }
        vector[VOCAB.len()] = 1.0;
        vector
    }

    pub fn texts(&self) -> Vec<String> {
        self.embedded.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for VocabEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embedded.lock().unwrap().push(text.to_string());
        Ok(Self::vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        VOCAB.len() + 1
    }

    fn model_name(&self) -> &str {
        "vocab"
    }
}

pub fn params() -> HnswParams {
    HnswParams {
        dimension: VOCAB.len() + 1,
        max_nb_connection: 16,
        ef_construction: 100,
        ef_search: 64,
        max_elements: 1000,
    }
}

/// Replies to `generate` in order and streams `chunks`
pub struct ScriptedBackend {
    replies: Mutex<Vec<Result<String, BackendError>>>,
    chunks: Vec<String>,
    pub calls: Mutex<Vec<Vec<Message>>>,
    pub chunks_sent: AtomicUsize,
}

impl ScriptedBackend {
    pub fn replying(replies: Vec<&str>) -> Arc<Self> {
        Self::with_results(replies.into_iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn with_results(mut replies: Vec<Result<String, BackendError>>) -> Arc<Self> {
        replies.reverse();
        Arc::new(Self {
            replies: Mutex::new(replies),
            chunks: vec!["Budget ".to_string(), "is ".to_string(), "approved.".to_string()],
            calls: Mutex::new(Vec::new()),
            chunks_sent: AtomicUsize::new(0),
        })
    }

    pub fn last_call(&self) -> Vec<Message> {
        self.calls.lock().unwrap().last().cloned().unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Custom
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        messages: &[Message],
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<GenerationResponse, BackendError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        let reply = self.replies.lock().unwrap().pop().unwrap_or_else(|| {
            Err(BackendError::Request {
                backend: "custom".to_string(),
                message: "script exhausted".to_string(),
            })
        });
        reply.map(|content| GenerationResponse {
            content,
            model: "scripted".to_string(),
            usage: TokenUsage::new(10, 5),
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        _temperature: f32,
        _max_tokens: u32,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<(), BackendError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        for chunk in &self.chunks {
            if tx.send(StreamChunk::text(chunk.clone())).await.is_err() {
                return Ok(());
            }
            self.chunks_sent.fetch_add(1, Ordering::SeqCst);
        }
        let _ = tx.send(StreamChunk::final_chunk(Some("stop".to_string()))).await;
        Ok(())
    }
}

/// Always hands out the same backend and counts the calls
pub struct FixedResolver {
    backend: Arc<dyn GenerationBackend>,
    pub calls: AtomicUsize,
    pub last_override: Mutex<Option<BackendOverride>>,
}

impl FixedResolver {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            calls: AtomicUsize::new(0),
            last_override: Mutex::new(None),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendResolver for FixedResolver {
    async fn resolve(
        &self,
        requested: &BackendOverride,
        _settings_scope: Option<&str>,
    ) -> mailsage::Result<Arc<dyn GenerationBackend>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_override.lock().unwrap() = Some(requested.clone());
        Ok(Arc::clone(&self.backend))
    }
}

fn record(
    id: &str,
    subject: &str,
    sender: &str,
    day: u32,
    folder: &str,
    body: &str,
    attachments: Vec<ImportAttachment>,
) -> ImportRecord {
    ImportRecord {
        id: id.to_string(),
        source_id: "pst-1".to_string(),
        source_name: Some("archive.pst".to_string()),
        subject: Some(subject.to_string()),
        sender: Some(sender.to_string()),
        sender_name: None,
        date: Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).single(),
        folder: Some(folder.to_string()),
        body: body.to_string(),
        attachments,
    }
}

pub fn mailbox() -> Vec<ImportRecord> {
    vec![
        record(
            "e1",
            "Q3 budget review",
            "alice@x.com",
            4,
            "Inbox",
            "The Q3 budget numbers are ready for review.",
            vec![ImportAttachment {
                filename: "budget.pdf".to_string(),
                text: "Q3 budget revenue forecast spreadsheet".to_string(),
            }],
        ),
        record("e2", "Team lunch", "bob@x.com", 5, "Inbox", "Lunch on Friday at noon.", Vec::new()),
        record(
            "e3",
            "Falcon launch",
            "carol@x.com",
            6,
            "Projects/Falcon",
            "The falcon launch moved to May.",
            Vec::new(),
        ),
        record(
            "e4",
            "Invoice",
            "alice@x.com",
            7,
            "Inbox/Finance",
            "Invoice for the offsite venue.",
            Vec::new(),
        ),
    ]
}

/// Every adapter, populated from [`mailbox`]
pub struct Fixture {
    pub store: SqliteStore,
    pub embedder: Arc<VocabEmbedder>,
    pub primary: Arc<HnswVectorIndex>,
    pub attachments: Arc<HnswVectorIndex>,
    pub lexical: Arc<TantivyLexicalIndex>,
}

impl Fixture {
    pub async fn empty() -> Self {
        let store = SqliteStore::in_memory().unwrap();
        Self {
            store,
            embedder: Arc::new(VocabEmbedder::default()),
            primary: Arc::new(HnswVectorIndex::new(params())),
            attachments: Arc::new(HnswVectorIndex::new(params())),
            lexical: Arc::new(TantivyLexicalIndex::in_memory().unwrap()),
        }
    }

    pub async fn with_mailbox() -> Self {
        let fixture = Self::empty().await;
        fixture.import(mailbox()).await;
        fixture
    }

    pub async fn import(&self, records: Vec<ImportRecord>) {
        let batch = BatchProcessor::new(
            self.embedder.clone(),
            self.primary.clone(),
            self.attachments.clone(),
            self.lexical.clone(),
            8,
            2,
        );
        Importer::new(self.store.clone(), batch, 512, 50)
            .import(records)
            .await
            .unwrap();
        // searches should only see query embeddings
        self.embedder.embedded.lock().unwrap().clear();
    }
}
