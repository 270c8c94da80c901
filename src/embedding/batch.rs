/// Batch processor for embedding generation and indexing
use super::{EmbeddingError, EmbeddingProvider, LexicalIndex, LexicalRecord, VectorIndex};
use crate::retrieval::{DocumentMetadata, SourceClass};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// One chunk to embed and index
#[derive(Debug, Clone)]
pub struct IndexItem {
    pub id: String,
    pub text: String,
    pub class: SourceClass,
    pub metadata: DocumentMetadata,
}

/// Result of batch processing
#[derive(Debug, Default)]
pub struct BatchResult {
    pub processed: usize,
    pub failed: usize,
    pub lexical_indexed: usize,
    pub duration_ms: u64,
}

/// Batch processor for embedding generation and indexing
///
/// Embeds items in chunks of `batch_size`, with at most `max_concurrent`
/// chunks in flight, and routes each item to the index of its class.
pub struct BatchProcessor {
    provider: Arc<dyn EmbeddingProvider>,
    primary_index: Arc<dyn VectorIndex>,
    attachment_index: Arc<dyn VectorIndex>,
    lexical_index: Arc<dyn LexicalIndex>,
    batch_size: usize,
    max_concurrent: usize,
}

impl BatchProcessor {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        primary_index: Arc<dyn VectorIndex>,
        attachment_index: Arc<dyn VectorIndex>,
        lexical_index: Arc<dyn LexicalIndex>,
        batch_size: usize,
        max_concurrent: usize,
    ) -> Self {
        Self {
            provider,
            primary_index,
            attachment_index,
            lexical_index,
            batch_size: batch_size.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Embed and index `items`, then add `records` to the lexical index
    ///
    /// A failed chunk is counted and skipped; a lexical indexing failure
    /// fails the whole call.
    pub async fn process(
        &self,
        items: Vec<IndexItem>,
        records: Vec<LexicalRecord>,
    ) -> Result<BatchResult> {
        let start = std::time::Instant::now();
        let total = items.len();

        info!("Starting batch processing of {} items", total);

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let tasks = items.chunks(self.batch_size).map(|chunk| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire_owned().await?;
                let result = self.process_chunk(chunk).await;
                Ok::<_, anyhow::Error>((chunk.len(), result))
            }
        });

        let mut result = BatchResult::default();
        for outcome in futures::future::join_all(tasks).await {
            let (len, chunk_result) = outcome?;
            match chunk_result {
                Ok(count) => {
                    result.processed += count;
                    debug!("Processed chunk of {} items", count);
                }
                Err(e) => {
                    warn!("Failed to process chunk: {}", e);
                    result.failed += len;
                }
            }
        }

        result.lexical_indexed = records.len();
        self.lexical_index.add(records).await?;

        result.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Batch processing complete: {} processed, {} failed, {} lexical, {}ms",
            result.processed, result.failed, result.lexical_indexed, result.duration_ms
        );

        Ok(result)
    }

    async fn process_chunk(&self, chunk: &[IndexItem]) -> Result<usize, EmbeddingError> {
        let texts: Vec<String> = chunk.iter().map(|item| item.text.clone()).collect();
        let embeddings = self.provider.embed_batch(&texts).await?;

        if embeddings.len() != chunk.len() {
            return Err(EmbeddingError::GenerationError(format!(
                "Embedding count mismatch: expected {}, got {}",
                chunk.len(),
                embeddings.len()
            )));
        }

        for class in [SourceClass::Primary, SourceClass::Attachment] {
            let mut ids = Vec::new();
            let mut vectors = Vec::new();
            let mut documents = Vec::new();
            let mut metadatas = Vec::new();

            for (item, embedding) in chunk.iter().zip(&embeddings) {
                if item.class == class {
                    ids.push(item.id.clone());
                    vectors.push(embedding.clone());
                    documents.push(item.text.clone());
                    metadatas.push(item.metadata.clone());
                }
            }

            if ids.is_empty() {
                continue;
            }

            let index = match class {
                SourceClass::Primary => &self.primary_index,
                SourceClass::Attachment => &self.attachment_index,
            };
            index
                .add(ids, vectors, documents, metadatas)
                .await
                .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;
        }

        Ok(chunk.len())
    }
}

/// Split text into word-aligned chunks of at most `chunk_size` characters
///
/// Consecutive chunks share roughly `overlap` trailing characters. A single
/// word longer than `chunk_size` becomes its own chunk.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for word in words {
        let word_len = word.chars().count();
        let added = if current.is_empty() { word_len } else { word_len + 1 };

        if !current.is_empty() && current_len + added > chunk_size {
            chunks.push(current.join(" "));

            // Carry trailing words up to the overlap budget
            let mut carried: Vec<&str> = Vec::new();
            let mut carried_len = 0usize;
            for w in current.iter().rev() {
                let len = w.chars().count() + usize::from(!carried.is_empty());
                if carried_len + len > overlap {
                    break;
                }
                carried_len += len;
                carried.push(w);
            }
            carried.reverse();

            if carried_len + word_len + 1 > chunk_size {
                carried.clear();
                carried_len = 0;
            }

            current = carried;
            current_len = carried_len;
        }

        current_len += if current.is_empty() { word_len } else { word_len + 1 };
        current.push(word);
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}
