//! CLI command definitions and parsing
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "mailsage",
    version,
    author = "neur0map",
    about = "Question answering over ingested email archives",
    long_about = "Mailsage answers natural-language questions about imported email archives. \
                  It combines semantic and lexical retrieval, answers counting questions straight \
                  from the store, and generates grounded answers with a choice of LLM backends."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/mailsage/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration profile to apply
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a question about your email
    Ask {
        /// Question to ask
        question: String,

        /// Print the answer as it is generated
        #[arg(long)]
        stream: bool,

        #[command(flatten)]
        backend: BackendArgs,

        /// Number of documents to retrieve
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Restrict to these source ids
        #[arg(long = "source", value_name = "ID")]
        sources: Vec<String>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Search emails with hybrid, semantic or full-text matching
    Search {
        /// Search query text; empty lists emails matching the filters
        #[arg(default_value = "")]
        query: String,

        /// Search mode
        #[arg(short, long, value_parser = ["hybrid", "semantic", "lexical", "fulltext"], default_value = "hybrid")]
        mode: String,

        /// 1-based page number
        #[arg(long, default_value = "1")]
        page: usize,

        /// Results per page
        #[arg(long)]
        page_size: Option<usize>,

        #[command(flatten)]
        filters: FilterArgs,

        /// Also search attachment text
        #[arg(long)]
        attachments: bool,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Summarize emails on a topic
    Summarize {
        /// Topic to summarize (defaults to recent email)
        #[arg(short, long)]
        topic: Option<String>,

        /// Maximum number of emails to include
        #[arg(long)]
        max: Option<usize>,

        #[command(flatten)]
        backend: BackendArgs,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Suggest subjects and sender names for a partial query
    Suggest {
        /// Partial text
        partial: String,

        /// Maximum number of suggestions
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show sender and folder facets
    Facets {
        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Show store and index statistics
    Stats,

    /// List generation backends and whether they are configured
    Backends,

    /// Import pre-extracted email records from a JSONL file
    Import {
        /// JSONL file, one email per line
        file: PathBuf,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Generation backend selection for one request
#[derive(clap::Args, Debug, Default)]
pub struct BackendArgs {
    /// Backend provider (openai, anthropic, google, xai, groq, cerebras, custom)
    #[arg(long)]
    pub provider: Option<String>,

    /// Model name ("default" uses the stored or configured model)
    #[arg(long)]
    pub model: Option<String>,

    /// Base URL for custom OpenAI-compatible endpoints
    #[arg(long)]
    pub base_url: Option<String>,

    /// Stored backend settings scope to prefer
    #[arg(long)]
    pub settings_scope: Option<String>,
}

#[derive(clap::Args, Debug, Default)]
pub struct FilterArgs {
    /// Only emails from these senders
    #[arg(long = "sender", value_name = "ADDRESS")]
    pub senders: Vec<String>,

    /// Only emails from these source ids
    #[arg(long = "source", value_name = "ID")]
    pub sources: Vec<String>,

    /// Sent on or after this date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub from: Option<NaiveDate>,

    /// Sent on or before this date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub to: Option<NaiveDate>,

    /// Folder path prefixes
    #[arg(long = "folder", value_name = "PATH")]
    pub folders: Vec<String>,

    /// Only emails with (true) or without (false) attachments
    #[arg(long)]
    pub has_attachments: Option<bool>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| format!("expected YYYY-MM-DD, got {:?}: {}", value, e))
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_search_filters_parse() {
        let cli = Cli::try_parse_from([
            "mailsage",
            "search",
            "budget",
            "--mode",
            "lexical",
            "--sender",
            "alice@x.com",
            "--from",
            "2024-01-01",
            "--folder",
            "Inbox",
        ])
        .unwrap();

        match cli.command {
            Commands::Search { query, mode, filters, .. } => {
                assert_eq!(query, "budget");
                assert_eq!(mode, "lexical");
                assert_eq!(filters.senders, vec!["alice@x.com"]);
                assert_eq!(filters.from, NaiveDate::from_ymd_opt(2024, 1, 1));
                assert_eq!(filters.folders, vec!["Inbox"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_bad_date_rejected() {
        let result = Cli::try_parse_from(["mailsage", "search", "--from", "01/02/2024"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_ask_backend_flags() {
        let cli = Cli::try_parse_from([
            "mailsage", "ask", "who sent the most?", "--provider", "groq", "-k", "5", "--stream",
        ])
        .unwrap();

        match cli.command {
            Commands::Ask { question, stream, backend, top_k, .. } => {
                assert_eq!(question, "who sent the most?");
                assert!(stream);
                assert_eq!(backend.provider.as_deref(), Some("groq"));
                assert_eq!(top_k, Some(5));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
