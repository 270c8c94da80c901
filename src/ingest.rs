//! Import of pre-extracted email records
//!
//! Reads one JSON object per line, writes the system of record, then embeds
//! body chunks and attachment text into the vector indexes and the lexical
//! index.

use crate::embedding::{chunk_id, chunk_text, BatchProcessor, IndexItem, LexicalRecord};
use crate::error::{MailsageError, Result};
use crate::retrieval::{DocumentMetadata, SourceClass};
use crate::storage::{SqliteStore, StoredDocument};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;
use tracing::{debug, info, warn};

/// One email as produced by an upstream extractor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRecord {
    pub id: String,
    pub source_id: String,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<ImportAttachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportAttachment {
    pub filename: String,
    /// Extracted text; empty attachments are stored but not indexed
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ImportSummary {
    pub sources: usize,
    pub emails: usize,
    pub chunks: usize,
    pub attachments: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

/// Attachment index id for the `position`th attachment of an email
pub fn attachment_id(email_id: &str, position: usize) -> String {
    format!("{}_att_{}", email_id, position)
}

/// Parse a JSONL file, skipping blank lines
pub fn read_jsonl(path: &Path) -> Result<Vec<ImportRecord>> {
    let file = std::fs::File::open(path).map_err(|e| MailsageError::Io {
        source: e,
        context: format!("Failed to open import file: {:?}", path),
    })?;

    let mut records = Vec::new();
    for (number, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| MailsageError::Io {
            source: e,
            context: format!("Failed to read line {} of {:?}", number + 1, path),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| MailsageError::Json {
            source: e,
            context: format!("Invalid record on line {}", number + 1),
        })?;
        records.push(record);
    }

    debug!("Read {} records from {:?}", records.len(), path);
    Ok(records)
}

pub struct Importer {
    store: SqliteStore,
    batch: BatchProcessor,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Importer {
    pub fn new(store: SqliteStore, batch: BatchProcessor, chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            store,
            batch,
            chunk_size,
            chunk_overlap,
        }
    }

    pub async fn import(&self, records: Vec<ImportRecord>) -> Result<ImportSummary> {
        let start = std::time::Instant::now();
        let imported_at = Utc::now().timestamp();

        let mut sources: BTreeMap<String, String> = BTreeMap::new();
        let mut documents = Vec::with_capacity(records.len());
        let mut items = Vec::new();
        let mut lexical = Vec::with_capacity(records.len());
        let mut attachments = 0;

        for record in records {
            sources
                .entry(record.source_id.clone())
                .or_insert_with(|| record.source_name.clone().unwrap_or_else(|| record.source_id.clone()));

            let metadata = DocumentMetadata {
                email_id: Some(record.id.clone()),
                subject: record.subject.clone(),
                sender: record.sender.clone(),
                sender_name: record.sender_name.clone(),
                date: record.date.map(|d| d.timestamp()),
                source_id: Some(record.source_id.clone()),
                folder: record.folder.clone(),
                has_attachments: Some(!record.attachments.is_empty()),
                ..Default::default()
            };

            for (i, chunk) in chunk_text(&record.body, self.chunk_size, self.chunk_overlap)
                .into_iter()
                .enumerate()
            {
                items.push(IndexItem {
                    id: chunk_id(&record.id, i),
                    text: chunk,
                    class: SourceClass::Primary,
                    metadata: metadata.clone(),
                });
            }

            for (i, attachment) in record.attachments.iter().enumerate() {
                if attachment.text.trim().is_empty() {
                    continue;
                }
                attachments += 1;
                items.push(IndexItem {
                    id: attachment_id(&record.id, i),
                    text: attachment.text.clone(),
                    class: SourceClass::Attachment,
                    metadata: DocumentMetadata {
                        filename: Some(attachment.filename.clone()),
                        ..metadata.clone()
                    },
                });
            }

            lexical.push(LexicalRecord {
                id: record.id.clone(),
                body: record.body.clone(),
                metadata,
            });

            documents.push(StoredDocument {
                id: record.id,
                source_id: record.source_id,
                subject: record.subject,
                sender: record.sender,
                sender_name: record.sender_name,
                date: record.date.map(|d| d.timestamp()),
                folder: record.folder,
                has_attachments: !record.attachments.is_empty(),
                attachment_count: record.attachments.len() as u32,
                body: record.body,
            });
        }

        let store = self.store.clone();
        let source_count = sources.len();
        let emails = tokio::task::spawn_blocking(move || -> Result<usize> {
            for (id, name) in &sources {
                store.upsert_source(id, name, imported_at)?;
            }
            Ok(store.upsert_documents(&documents)?)
        })
        .await
        .map_err(|e| MailsageError::Other(e.into()))??;

        info!("Stored {} emails from {} sources", emails, source_count);

        let chunks = items.len();
        let batch = self.batch.process(items, lexical).await?;
        if batch.failed > 0 {
            warn!("{} of {} chunks failed to embed", batch.failed, chunks);
        }

        Ok(ImportSummary {
            sources: source_count,
            emails,
            chunks: batch.processed,
            attachments,
            failed: batch.failed,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
