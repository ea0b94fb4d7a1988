pub mod completion;
pub mod embeddings;
pub mod error;
pub mod indexer;
pub mod ingest;
pub mod keywords;
pub mod metadata;
pub mod models;
pub mod parser;
pub mod records;
pub mod schema;
pub mod search;
pub mod stores;
pub mod traits;

pub use completion::OpenAiKeywordClient;
pub use embeddings::{
    embed_all, Embedder, EmbeddingFailure, EmbeddingOutcome, OpenAiConfig, OpenAiEmbedder,
    EMBEDDING_DIMENSION,
};
pub use error::{CollaboratorError, IngestError, SearchError};
pub use indexer::{BulkIndexer, IndexSummary};
pub use ingest::{
    discover_supported_files, DirectoryReport, FailedFile, FileReport, IngestionPipeline,
    SUPPORTED_EXTENSIONS,
};
pub use keywords::{HeuristicExtractor, KeywordCompleter, KeywordExtractor};
pub use metadata::{sanitize, SanitizedMetadata};
pub use models::{
    Element, ElementType, IndexRecord, KeywordMode, PendingRecord, PipelineConfig, Section,
};
pub use parser::{DocumentParser, UnstructuredClient, UnstructuredConfig};
pub use records::RecordBuilder;
pub use schema::{IndexAction, SchemaManager, SchemaOutcome, SEARCH_PIPELINE_NAME};
pub use search::{HybridQuery, HybridSearcher, SearchHit};
pub use stores::OpenSearchStore;
pub use traits::{BulkItem, DocumentIndex, HybridIndex, IndexAdmin};
