use anyhow::{anyhow, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use hybrid_ingest_core::embeddings::{DEFAULT_EMBEDDING_MODEL, DEFAULT_OPENAI_BASE_URL};
use hybrid_ingest_core::models::DEFAULT_INDEX_NAME;
use hybrid_ingest_core::parser::DEFAULT_UNSTRUCTURED_URL;
use hybrid_ingest_core::{
    DirectoryReport, DocumentIndex, DocumentParser, Embedder, FileReport, HybridQuery,
    HybridSearcher, IndexAdmin,
    IngestionPipeline, KeywordExtractor, KeywordMode, OpenAiConfig, OpenAiEmbedder,
    OpenAiKeywordClient, OpenSearchStore, PipelineConfig, SchemaManager, Section,
    UnstructuredClient, UnstructuredConfig, EMBEDDING_DIMENSION,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "hybrid-ingest", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// OpenSearch base URL
    #[arg(long, env = "OPENSEARCH_URL", default_value = "http://localhost:9200")]
    opensearch_url: String,

    /// Target index name
    #[arg(long, env = "INDEX_NAME", default_value = DEFAULT_INDEX_NAME)]
    index: String,

    /// OpenAI API key (embeddings and delegated keywords)
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// OpenAI-compatible base URL
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    openai_base_url: String,

    /// Embedding model identifier
    #[arg(long, default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,
}

#[derive(Subcommand)]
enum Command {
    /// Parse, enrich, embed and index a file or every supported file in a directory.
    Ingest {
        /// Single file to ingest.
        #[arg(long, conflicts_with = "dir", required_unless_present = "dir")]
        file: Option<PathBuf>,
        /// Directory whose top-level pdf/docx/doc/txt/md/html files are ingested.
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Drop and recreate the index before ingesting.
        #[arg(long, default_value_t = false)]
        recreate: bool,
        /// Extract keywords with the completion model instead of heuristics.
        #[arg(long, default_value_t = false)]
        llm_keywords: bool,
        /// Unstructured API key
        #[arg(long, env = "UNSTRUCTURED_API_KEY", hide_env_values = true)]
        unstructured_api_key: Option<String>,
        /// Unstructured partition endpoint
        #[arg(long, env = "UNSTRUCTURED_API_URL", default_value = DEFAULT_UNSTRUCTURED_URL)]
        unstructured_api_url: String,
        /// Embedding calls in flight per file.
        #[arg(long, default_value = "4")]
        embed_concurrency: usize,
        /// Documents per bulk request.
        #[arg(long, default_value = "100")]
        bulk_batch_size: usize,
    },
    /// Create the index and scoring pipeline without ingesting anything.
    Setup {
        /// Drop and recreate the index if it exists.
        #[arg(long, default_value_t = false)]
        recreate: bool,
    },
    /// Run a hybrid (BM25 + knn) query against the index.
    Search {
        /// Search query
        #[arg(long)]
        query: String,
        /// Number of hits to return.
        #[arg(long, default_value = "10")]
        top_k: usize,
        /// Restrict hits to one section type.
        #[arg(long, value_enum)]
        section: Option<SectionArg>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SectionArg {
    Title,
    Header,
    List,
    Table,
    Narrative,
    Content,
}

impl From<SectionArg> for Section {
    fn from(value: SectionArg) -> Self {
        match value {
            SectionArg::Title => Section::Title,
            SectionArg::Header => Section::Header,
            SectionArg::List => Section::List,
            SectionArg::Table => Section::Table,
            SectionArg::Narrative => Section::Narrative,
            SectionArg::Content => Section::Content,
        }
    }
}

fn require(value: Option<String>, variable: &str) -> anyhow::Result<String> {
    value
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| anyhow!("please set the {variable} environment variable"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        index = %cli.index,
        "hybrid-ingest boot"
    );

    match cli.command {
        Command::Ingest {
            ref file,
            ref dir,
            recreate,
            llm_keywords,
            ref unstructured_api_key,
            ref unstructured_api_url,
            embed_concurrency,
            bulk_batch_size,
        } => {
            let unstructured_key = require(unstructured_api_key.clone(), "UNSTRUCTURED_API_KEY")?;
            let openai = openai_config(&cli)?;

            let config = PipelineConfig {
                index_name: cli.index.clone(),
                keyword_mode: if llm_keywords {
                    KeywordMode::Delegated
                } else {
                    KeywordMode::Heuristic
                },
                embedding_concurrency: embed_concurrency,
                bulk_batch_size,
                ..PipelineConfig::default()
            };
            config.validate()?;

            let store = connect(&cli.opensearch_url).await?;
            provision(&store, &config.index_name, recreate).await?;

            let parser = UnstructuredClient::new(UnstructuredConfig::new(
                unstructured_api_url.as_str(),
                unstructured_key,
            ))?;
            let embedder = OpenAiEmbedder::new(openai.clone())?;
            let keywords = if llm_keywords {
                KeywordExtractor::with_completer(Arc::new(OpenAiKeywordClient::new(&openai)?))?
            } else {
                KeywordExtractor::heuristic_only()?
            };

            info!(
                unstructured = %unstructured_api_url,
                embedding_model = %openai.embedding_model,
                keyword_mode = ?config.keyword_mode,
                "ingestion configured"
            );

            let pipeline = IngestionPipeline::new(&parser, &embedder, &store, keywords, &config);

            let lines = run_ingest(
                &pipeline,
                &store,
                &config.index_name,
                file.as_deref(),
                dir.as_deref(),
            )
            .await;
            for line in lines {
                println!("{line}");
            }
        }
        Command::Setup { recreate } => {
            PipelineConfig {
                index_name: cli.index.clone(),
                ..PipelineConfig::default()
            }
            .validate()?;

            let store = connect(&cli.opensearch_url).await?;
            provision(&store, &cli.index, recreate).await?;
            println!("{}", index_count_line(&store, &cli.index).await);
        }
        Command::Search {
            ref query,
            top_k,
            section,
        } => {
            let openai = openai_config(&cli)?;
            let store = connect(&cli.opensearch_url).await?;
            let embedder = OpenAiEmbedder::new(openai)?;
            let searcher = HybridSearcher::new(&embedder, &store, &cli.index);

            let hits = searcher
                .search(&HybridQuery {
                    text: query.clone(),
                    top_k,
                    section: section.map(Section::from),
                })
                .await
                .context("hybrid search failed")?;

            println!("query: {query}");
            for hit in hits {
                let page = hit
                    .page_number
                    .map(|page| format!(" page={page}"))
                    .unwrap_or_default();
                println!(
                    "[{}] score={:.4} id={} file={}{}",
                    hit.section, hit.score, hit.record_id, hit.filename, page
                );
                if let Some(title) = &hit.title {
                    println!("  title: {title}");
                }
                println!("  {}", hit.summary);
            }
        }
    }

    Ok(())
}

fn openai_config(cli: &Cli) -> anyhow::Result<OpenAiConfig> {
    let mut config = OpenAiConfig::new(require(cli.openai_api_key.clone(), "OPENAI_API_KEY")?);
    config.base_url = cli.openai_base_url.clone();
    config.embedding_model = cli.embedding_model.clone();
    config.dimensions = EMBEDDING_DIMENSION;
    Ok(config)
}

async fn connect(endpoint: &str) -> anyhow::Result<OpenSearchStore> {
    let store = OpenSearchStore::new(endpoint)?;
    let version = store
        .server_version()
        .await
        .with_context(|| format!("failed to connect to OpenSearch at {endpoint}"))?;
    info!(version = %version, endpoint, "connected to OpenSearch");
    Ok(store)
}

async fn provision(store: &OpenSearchStore, index: &str, recreate: bool) -> anyhow::Result<()> {
    let outcome = SchemaManager::new(store, EMBEDDING_DIMENSION)
        .ensure_index(index, recreate)
        .await?;
    info!(index, action = ?outcome.action, "index ready");
    if let Some(warning) = outcome.pipeline_warning {
        warn!(%warning, "hybrid search will work without score normalization");
    }
    Ok(())
}

/// Per-file failures and a missing or empty directory are reported as lines;
/// the index count line always comes last.
async fn run_ingest<P, E, I>(
    pipeline: &IngestionPipeline<'_, P, E, I>,
    index: &I,
    index_name: &str,
    file: Option<&Path>,
    dir: Option<&Path>,
) -> Vec<String>
where
    P: DocumentParser + ?Sized,
    E: Embedder + ?Sized,
    I: DocumentIndex + ?Sized,
{
    let mut lines = Vec::new();

    if let Some(path) = file {
        match pipeline.ingest_file(path).await {
            Ok(report) => lines.push(file_report_line(&report)),
            Err(error) => lines.push(format!("error ingesting {}: {error}", path.display())),
        }
    } else if let Some(folder) = dir {
        match pipeline.ingest_directory(folder).await {
            Ok(report) => lines.extend(directory_report_lines(&report)),
            Err(error) => lines.push(format!("error ingesting {}: {error}", folder.display())),
        }
    }

    lines.push(index_count_line(index, index_name).await);
    lines
}

fn file_report_line(report: &FileReport) -> String {
    format!(
        "{}: indexed {} documents ({} errors, {} embedding failures, {} short elements skipped)",
        report.filename,
        report.indexed,
        report.index_errors,
        report.embedding_failures,
        report.too_short
    )
}

fn directory_report_lines(report: &DirectoryReport) -> Vec<String> {
    let mut lines: Vec<String> = report.files.iter().map(file_report_line).collect();
    for failed in &report.failed_files {
        lines.push(format!("error processing {}: {}", failed.path.display(), failed.reason));
    }
    lines.push(format!(
        "total indexed: {} documents, {} errors, {} files failed ({}s)",
        report.total_indexed(),
        report.total_errors(),
        report.failed_files.len(),
        (report.finished_at - report.started_at).num_seconds()
    ));
    lines
}

async fn index_count_line<I: DocumentIndex + ?Sized>(index: &I, name: &str) -> String {
    let count = match index.count(name).await {
        Ok(count) => count.to_string(),
        Err(_) => "unknown".to_string(),
    };
    format!("total documents in '{name}': {count}")
}
