use anyhow::{Context, Result};
use mailsage::answer::{
    AnswerOrchestrator, AnswerRequest, BackendOverride, LayeredBackendResolver, SummarizeRequest,
};
use mailsage::cli::{BackendArgs, Cli, Commands, ConfigAction, FilterArgs};
use mailsage::config::{Config, ConfigValidator};
use mailsage::embedding::{
    BatchProcessor, EmbeddingProvider, FastEmbedProvider, HnswParams, HnswVectorIndex,
    TantivyLexicalIndex, VectorIndex,
};
use mailsage::generation::{BackendFactory, StreamChunk};
use mailsage::ingest::{read_jsonl, Importer};
use mailsage::query::QueryProcessor;
use mailsage::retrieval::{RetrievalEngine, ScopeFilter};
use mailsage::search::{SearchFilters, SearchMode, SearchRequest, SearchService};
use mailsage::storage::{SqliteStore, Store};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    runtime.block_on(run(cli.config, cli.profile, cli.command))
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "mailsage=debug" } else { "mailsage=info" };
    let filter = EnvFilter::try_from_env("MAILSAGE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    command: Commands,
) -> Result<()> {
    if let Commands::Config { action } = command {
        return cmd_config(config_path, profile, action);
    }
    let config = load_config(config_path, profile)?;

    match command {
        Commands::Ask {
            question,
            stream,
            backend,
            top_k,
            sources,
            json,
        } => cmd_ask(&config, question, stream, backend, top_k, sources, json).await,
        Commands::Search {
            query,
            mode,
            page,
            page_size,
            filters,
            attachments,
            json,
        } => {
            let request = SearchRequest {
                include_attachments: attachments,
                ..SearchRequest::new(query)
                    .mode(mode.parse::<SearchMode>()?)
                    .page(page, page_size.unwrap_or(0))
                    .filters(search_filters(&filters))
            };
            cmd_search(&config, request, json).await
        }
        Commands::Summarize {
            topic,
            max,
            backend,
            json,
        } => cmd_summarize(&config, topic, max, backend, json).await,
        Commands::Suggest { partial, limit } => {
            let stack = Stack::open(&config)?;
            for suggestion in stack.search.suggestions(&partial, limit).await? {
                println!("{}", suggestion);
            }
            Ok(())
        }
        Commands::Facets { filters } => {
            let stack = Stack::open(&config)?;
            let facets = stack.search.facets(&search_filters(&filters)).await?;
            println!("Senders:");
            for facet in &facets.senders {
                println!("  {:>6}  {}", facet.count, facet.value);
            }
            println!("Folders:");
            for facet in &facets.folders {
                println!("  {:>6}  {}", facet.count, facet.value);
            }
            Ok(())
        }
        Commands::Stats => cmd_stats(&config),
        Commands::Backends => {
            println!("Generation backends:");
            for info in BackendFactory::available(&config.llm) {
                let marker = if info.configured { "✓" } else { "✗" };
                println!(
                    "  {} {:<10} {:<14} default model: {}",
                    marker,
                    info.kind.as_str(),
                    info.display_name,
                    info.default_model
                );
            }
            Ok(())
        }
        Commands::Import { file } => cmd_import(&config, &file).await,
        Commands::Config { action } => cmd_config(None, None, action),
    }
}

/// Every collaborator a request needs, opened from the data directory
struct Stack {
    store: SqliteStore,
    embedder: Arc<dyn EmbeddingProvider>,
    primary: Arc<HnswVectorIndex>,
    attachments: Arc<HnswVectorIndex>,
    lexical: Arc<TantivyLexicalIndex>,
    search: SearchService,
    answers: AnswerOrchestrator,
}

impl Stack {
    fn open(config: &Config) -> Result<Self> {
        let data_dir = expand_path(&config.storage.data_dir)?;
        let index_dir = data_dir.join("indexes");
        std::fs::create_dir_all(&index_dir)
            .with_context(|| format!("Failed to create index directory: {:?}", index_dir))?;

        let store = SqliteStore::open(&data_dir.join(&config.storage.database_file))?;

        tracing::info!("Loading embedding model {}", config.embedding.model);
        let embedder: Arc<dyn EmbeddingProvider> =
            Arc::new(FastEmbedProvider::new(&config.embedding.model)?);

        let params = HnswParams::from(&config.indexing);
        let primary = Arc::new(HnswVectorIndex::open(index_dir.join("emails.hnsw.zst"), params)?);
        let attachments = Arc::new(HnswVectorIndex::open(
            index_dir.join("attachments.hnsw.zst"),
            params,
        )?);
        let lexical = Arc::new(TantivyLexicalIndex::open(index_dir.join("lexical"))?);

        let enrichment_backend = if config.llm.enabled {
            match BackendFactory::from_config(&config.llm) {
                Ok(backend) => Some(backend),
                Err(e) => {
                    tracing::warn!("Query enrichment disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };
        let processor = Arc::new(QueryProcessor::new(config.query.clone(), enrichment_backend)?);

        let shared_store: Arc<dyn Store> = Arc::new(store.clone());
        let search = SearchService::new(
            Arc::clone(&processor),
            Arc::clone(&embedder),
            primary.clone(),
            attachments.clone(),
            lexical.clone(),
            Arc::clone(&shared_store),
            config.search.clone(),
        );

        let retrieval = Arc::new(RetrievalEngine::new(
            Arc::clone(&embedder),
            primary.clone(),
            attachments.clone(),
            config.retrieval.clone(),
        ));
        let resolver = Arc::new(LayeredBackendResolver::new(
            Arc::clone(&shared_store),
            config.llm.clone(),
        ));
        let answers = AnswerOrchestrator::new(
            Arc::clone(&processor),
            retrieval,
            shared_store,
            resolver,
            config.answer.clone(),
        )?;

        Ok(Self {
            store,
            embedder,
            primary,
            attachments,
            lexical,
            search,
            answers,
        })
    }
}

fn backend_override(args: BackendArgs) -> (BackendOverride, Option<String>) {
    (
        BackendOverride {
            provider: args.provider,
            model: args.model,
            api_key: None,
            base_url: args.base_url,
        },
        args.settings_scope,
    )
}

fn search_filters(args: &FilterArgs) -> SearchFilters {
    SearchFilters {
        source_ids: args.sources.clone(),
        senders: args.senders.clone(),
        date_from: args
            .from
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc().timestamp()),
        date_to: args
            .to
            .and_then(|d| d.and_hms_opt(23, 59, 59))
            .map(|d| d.and_utc().timestamp()),
        has_attachments: args.has_attachments,
        folders: args.folders.clone(),
    }
}

async fn cmd_ask(
    config: &Config,
    question: String,
    stream: bool,
    backend: BackendArgs,
    top_k: Option<usize>,
    sources: Vec<String>,
    json: bool,
) -> Result<()> {
    let stack = Stack::open(config)?;
    let (backend, settings_scope) = backend_override(backend);

    let request = AnswerRequest {
        backend,
        settings_scope,
        scope: ScopeFilter::sources(&sources),
        top_k,
        ..AnswerRequest::new(question)
    };

    if !stream {
        let response = stack.answers.answer(request).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&response)?);
            return Ok(());
        }

        println!("{}\n", response.answer);
        print_citations(&response.citations);
        for degradation in &response.degradations {
            println!("note: {}", degradation.reason());
        }
        println!(
            "[{} via {}/{}]",
            response.query_type, response.backend.provider, response.backend.model
        );
        return Ok(());
    }

    let (tx, mut rx) = mpsc::channel::<StreamChunk>(stack.answers.stream_buffer());
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(chunk) = rx.recv().await {
            print!("{}", chunk.content);
            let _ = stdout.flush();
            if chunk.is_final {
                break;
            }
        }
        println!();
    });

    let streamed = stack.answers.answer_stream(request, tx).await;
    printer.await.context("Stream printer task failed")?;
    let streamed = streamed?;

    if json {
        println!("{}", serde_json::to_string_pretty(&streamed)?);
    } else {
        println!();
        print_citations(&streamed.citations);
        for degradation in &streamed.degradations {
            println!("note: {}", degradation.reason());
        }
    }
    Ok(())
}

fn print_citations(citations: &[mailsage::answer::Citation]) {
    if citations.is_empty() {
        return;
    }
    println!("Sources:");
    for (i, citation) in citations.iter().enumerate() {
        println!(
            "  [{}] {} | {} | {} ({:.4}){}",
            i + 1,
            citation.subject.as_deref().unwrap_or("(no subject)"),
            citation.sender.as_deref().unwrap_or("unknown"),
            citation.date.as_deref().unwrap_or("-"),
            citation.score,
            citation
                .filename
                .as_ref()
                .map(|f| format!(" [{}]", f))
                .unwrap_or_default()
        );
    }
}

async fn cmd_search(config: &Config, request: SearchRequest, json: bool) -> Result<()> {
    let stack = Stack::open(config)?;
    let response = stack.search.search(request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if response.results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!(
        "Page {} ({} of {} results, {}ms)\n",
        response.page,
        response.results.len(),
        response.total_count,
        response.elapsed_ms
    );
    for result in &response.results {
        println!(
            "{:.3} [{}] {}",
            result.score,
            result.match_type,
            result.subject.as_deref().unwrap_or("(no subject)")
        );
        println!(
            "      {} | {}{}",
            result.sender.as_deref().unwrap_or("unknown"),
            result
                .date
                .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string()),
            result
                .matched_attachment
                .as_ref()
                .map(|f| format!(" | {}", f))
                .unwrap_or_default()
        );
        if let Some(snippet) = &result.snippet {
            println!("      {}", snippet.replace('\n', " "));
        }
    }
    if response.has_more {
        println!("\nMore results: --page {}", response.page + 1);
    }
    Ok(())
}

async fn cmd_summarize(
    config: &Config,
    topic: Option<String>,
    max: Option<usize>,
    backend: BackendArgs,
    json: bool,
) -> Result<()> {
    let stack = Stack::open(config)?;
    let (backend, settings_scope) = backend_override(backend);

    let response = stack
        .answers
        .summarize(SummarizeRequest {
            topic,
            backend,
            settings_scope,
            scope: None,
            max_documents: max,
        })
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("{}\n", response.answer);
        print_citations(&response.citations);
    }
    Ok(())
}

fn cmd_stats(config: &Config) -> Result<()> {
    let data_dir = expand_path(&config.storage.data_dir)?;
    let db_path = data_dir.join(&config.storage.database_file);
    if !db_path.exists() {
        println!("No data yet. Run 'mailsage import <file>' first.");
        return Ok(());
    }

    let store = SqliteStore::open(&db_path)?;
    let stats = store.stats()?;

    println!("Mailsage Statistics");
    println!("  Data directory:      {}", data_dir.display());
    println!("  Sources:             {}", stats.sources);
    println!("  Emails:              {}", stats.emails);
    println!("  With attachments:    {}", stats.emails_with_attachments);
    println!("  Backend settings:    {}", stats.backend_settings);
    Ok(())
}

async fn cmd_import(config: &Config, file: &Path) -> Result<()> {
    let records = read_jsonl(file)?;
    if records.is_empty() {
        println!("No records in {}", file.display());
        return Ok(());
    }

    let stack = Stack::open(config)?;
    tracing::info!(
        "Importing {} records with {} ({} dims)",
        records.len(),
        stack.embedder.model_name(),
        stack.embedder.dimension()
    );

    let batch = BatchProcessor::new(
        Arc::clone(&stack.embedder),
        stack.primary.clone(),
        stack.attachments.clone(),
        stack.lexical.clone(),
        config.embedding.batch_size,
        config.embedding.max_concurrent_batches,
    );
    let importer = Importer::new(
        stack.store.clone(),
        batch,
        config.embedding.chunk_size,
        config.embedding.chunk_overlap,
    );
    let summary = importer.import(records).await?;

    stack.primary.save()?;
    stack.attachments.save()?;

    println!("✓ Imported {} emails from {} sources", summary.emails, summary.sources);
    println!(
        "  Chunks indexed: {} ({} attachments), failed: {}",
        summary.chunks, summary.attachments, summary.failed
    );
    println!(
        "  Index sizes: {} emails, {} attachments, {} lexical",
        stack.primary.len(),
        stack.attachments.len(),
        stack.lexical.len()
    );
    println!("  Took {}ms", summary.duration_ms);
    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, profile)?;
            let value = serde_json::to_value(&config).context("Failed to serialize config")?;

            let shown = match section {
                Some(section) => value
                    .get(&section)
                    .cloned()
                    .with_context(|| format!("Unknown config section: {}", section))?,
                None => value,
            };
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            ConfigValidator::validate(&config)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'mailsage config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        return Ok(config);
    }

    let config = match profile {
        Some(profile) => Config::load_with_profile(&path, &profile)?,
        None => Config::load(&path)?,
    };
    Ok(config)
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path.to_str().context("Invalid path encoding")?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir().context("Cannot determine home directory")?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
