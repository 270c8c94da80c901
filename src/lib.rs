//! Mailsage - Question answering over email archives
//!
//! Imports pre-extracted emails into a SQLite system of record, semantic
//! vector indexes and a lexical index, then serves hybrid search and
//! grounded answers, picking the generation backend per request.

pub mod answer;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod query;
pub mod retrieval;
pub mod search;
pub mod storage;

pub use error::{MailsageError, Result};
