//! Server-sent event decoding shared by the streaming backends

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

use super::{BackendError, BackendKind, StreamChunk};

/// One decoded server-sent event
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental decoder; bytes may split lines and UTF-8 sequences anywhere
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if let Some(event) = self.take_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was not followed by a blank line
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let rest = String::from_utf8_lossy(&rest).into_owned();
            if let Some(event) = self.take_line(rest.trim_end_matches('\r')) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn take_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() && self.event.is_none() {
            return None;
        }
        let event = SseEvent {
            event: self.event.take(),
            data: self.data.join("\n"),
        };
        self.data.clear();
        Some(event)
    }
}

/// What a backend made of one event
pub(crate) enum EventOutcome {
    Skip,
    Chunk(StreamChunk),
    Done(Option<String>),
}

/// Read an SSE response body and forward chunks to `tx`
///
/// Always ends with a final chunk unless the receiver went away first.
pub(crate) async fn forward_events<F>(
    kind: BackendKind,
    response: reqwest::Response,
    tx: &mpsc::Sender<StreamChunk>,
    mut on_event: F,
) -> Result<(), BackendError>
where
    F: FnMut(&SseEvent) -> Result<EventOutcome, BackendError>,
{
    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::default();
    let mut finish_reason = None;

    'read: while let Some(bytes) = body.next().await {
        let bytes = bytes.map_err(|e| BackendError::Stream {
            backend: kind.as_str().to_string(),
            message: e.to_string(),
        })?;

        for event in decoder.push(&bytes) {
            match on_event(&event)? {
                EventOutcome::Skip => {}
                EventOutcome::Chunk(chunk) => {
                    if chunk.finish_reason.is_some() {
                        finish_reason = chunk.finish_reason.clone();
                    }
                    if tx.send(chunk).await.is_err() {
                        debug!("{} stream receiver closed, cancelling", kind);
                        return Ok(());
                    }
                }
                EventOutcome::Done(reason) => {
                    if reason.is_some() {
                        finish_reason = reason;
                    }
                    break 'read;
                }
            }
        }
    }

    if let Some(event) = decoder.finish() {
        if let EventOutcome::Chunk(chunk) = on_event(&event)? {
            if tx.send(chunk).await.is_err() {
                return Ok(());
            }
        }
    }

    let _ = tx.send(StreamChunk::final_chunk(finish_reason)).await;
    Ok(())
}
