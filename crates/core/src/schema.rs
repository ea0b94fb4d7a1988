//! Index mapping, analyzers and the hybrid score-normalization pipeline.
//!
//! Field, analyzer and pipeline names are shared with indices that already
//! exist in deployments; keep them byte-for-byte stable.

use crate::metadata::ALLOWED_METADATA_KEYS;
use crate::traits::IndexAdmin;
use crate::SearchError;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

pub const TEXT_ANALYZER: &str = "hybrid_analyzer";
pub const KEYWORD_ANALYZER: &str = "keyword_analyzer";
pub const VECTOR_FIELD: &str = "vector_field";
pub const SEARCH_PIPELINE_NAME: &str = "hybrid_search_pipeline";
pub const LEXICAL_WEIGHT: f64 = 0.4;
pub const VECTOR_WEIGHT: f64 = 0.6;
pub const TITLE_BOOST: f64 = 3.0;
pub const KEYWORDS_BOOST: f64 = 2.0;

pub fn index_body(dimension: usize) -> Value {
    json!({
        "settings": {
            "index": {
                "knn": true,
                "knn.algo_param.ef_search": 100
            },
            "analysis": {
                "analyzer": {
                    TEXT_ANALYZER: {
                        "type": "custom",
                        "tokenizer": "standard",
                        "filter": [
                            "lowercase",
                            "english_stemmer",
                            "english_stop",
                            "word_delimiter_graph"
                        ]
                    },
                    KEYWORD_ANALYZER: {
                        "type": "custom",
                        "tokenizer": "standard",
                        "filter": ["lowercase"]
                    }
                },
                "filter": {
                    "english_stemmer": {"type": "stemmer", "language": "english"},
                    "english_stop": {"type": "stop", "stopwords": "_english_"}
                }
            }
        },
        "mappings": {
            "properties": {
                "record_id": {"type": "keyword"},
                "element_id": {"type": "keyword"},
                "text": {
                    "type": "text",
                    "analyzer": TEXT_ANALYZER,
                    "search_analyzer": TEXT_ANALYZER,
                    "fields": {
                        "raw": {"type": "text", "analyzer": KEYWORD_ANALYZER},
                        "keyword": {"type": "keyword", "ignore_above": 256}
                    }
                },
                VECTOR_FIELD: {
                    "type": "knn_vector",
                    "dimension": dimension,
                    "method": {
                        "name": "hnsw",
                        "space_type": "cosinesimil",
                        "engine": "faiss",
                        "parameters": {"ef_construction": 256, "m": 32}
                    }
                },
                "metadata": {
                    "type": "object",
                    "properties": metadata_properties()
                },
                "title": {
                    "type": "text",
                    "analyzer": TEXT_ANALYZER,
                    "boost": TITLE_BOOST
                },
                "keywords": {
                    "type": "text",
                    "analyzer": KEYWORD_ANALYZER,
                    "boost": KEYWORDS_BOOST,
                    "fields": {
                        "exact": {"type": "keyword"}
                    }
                },
                "section": {"type": "keyword"},
                "summary": {"type": "text", "analyzer": TEXT_ANALYZER}
            }
        }
    })
}

fn metadata_properties() -> Value {
    let mut properties = Map::new();
    for key in ALLOWED_METADATA_KEYS {
        let field_type = match key {
            "page_number" => "integer",
            "is_continuation" => "boolean",
            _ => "keyword",
        };
        properties.insert(key.to_string(), json!({"type": field_type}));
    }
    Value::Object(properties)
}

/// Min-max normalizes lexical and vector scores independently, then takes
/// their weighted arithmetic mean.
pub fn search_pipeline_body() -> Value {
    json!({
        "description": "Hybrid search pipeline with score normalization",
        "phase_results_processors": [
            {
                "normalization-processor": {
                    "normalization": {"technique": "min_max"},
                    "combination": {
                        "technique": "arithmetic_mean",
                        "parameters": {"weights": [LEXICAL_WEIGHT, VECTOR_WEIGHT]}
                    }
                }
            }
        ]
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexAction {
    AlreadyPresent,
    Created,
    Recreated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaOutcome {
    pub action: IndexAction,
    /// Set when the scoring pipeline could not be provisioned; hybrid search
    /// still works, only without normalization.
    pub pipeline_warning: Option<String>,
}

pub struct SchemaManager<'a, A: IndexAdmin + ?Sized> {
    admin: &'a A,
    dimension: usize,
}

impl<'a, A: IndexAdmin + ?Sized> SchemaManager<'a, A> {
    pub fn new(admin: &'a A, dimension: usize) -> Self {
        Self { admin, dimension }
    }

    pub async fn ensure_index(&self, name: &str, recreate: bool) -> Result<SchemaOutcome, SearchError> {
        let mut action = IndexAction::Created;

        if self.admin.index_exists(name).await? {
            if !recreate {
                info!(index = name, "index already exists");
                return Ok(SchemaOutcome {
                    action: IndexAction::AlreadyPresent,
                    pipeline_warning: None,
                });
            }
            info!(index = name, "deleting existing index");
            self.admin.delete_index(name).await?;
            action = IndexAction::Recreated;
        }

        self.admin.create_index(name, &index_body(self.dimension)).await?;
        info!(index = name, dimension = self.dimension, "created index with hybrid schema");

        let pipeline_warning = self.ensure_search_pipeline(SEARCH_PIPELINE_NAME).await.err();
        Ok(SchemaOutcome {
            action,
            pipeline_warning,
        })
    }

    /// Best effort: the error string is returned for the caller to surface.
    pub async fn ensure_search_pipeline(&self, name: &str) -> Result<(), String> {
        if matches!(self.admin.search_pipeline_exists(name).await, Ok(true)) {
            info!(pipeline = name, "search pipeline already exists");
            return Ok(());
        }

        match self.admin.put_search_pipeline(name, &search_pipeline_body()).await {
            Ok(()) => {
                info!(pipeline = name, "created search pipeline for hybrid score normalization");
                Ok(())
            }
            Err(error) => {
                warn!(
                    pipeline = name,
                    %error,
                    "could not create search pipeline; hybrid search runs without score normalization"
                );
                Err(error.to_string())
            }
        }
    }
}
