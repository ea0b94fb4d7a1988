use crate::error::{CollaboratorError, IngestError};
use crate::models::{IndexRecord, PendingRecord};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

pub const EMBEDDING_DIMENSION: usize = 1536;
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const EMBEDDING_TIMEOUT: Duration = Duration::from_secs(30);
const SERVICE: &str = "embedding";

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError>;
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub embedding_model: String,
    pub dimensions: usize,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: EMBEDDING_DIMENSION,
        }
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<String, IngestError> {
        if self.api_key.trim().is_empty() {
            return Err(IngestError::Configuration("OpenAI API key is not set".to_string()));
        }
        let base = url::Url::parse(self.base_url.trim_end_matches('/')).map_err(|error| {
            IngestError::Configuration(format!("invalid OpenAI base url {}: {error}", self.base_url))
        })?;
        Ok(format!("{}/{path}", base.as_str().trim_end_matches('/')))
    }
}

pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    config: OpenAiConfig,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiConfig) -> Result<Self, IngestError> {
        let endpoint = config.endpoint("embeddings")?;
        let client = Client::builder()
            .timeout(EMBEDDING_TIMEOUT)
            .build()
            .map_err(|error| IngestError::Configuration(format!("http client: {error}")))?;
        Ok(Self {
            client,
            endpoint,
            config,
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&EmbeddingRequest {
                model: &self.config.embedding_model,
                input: text,
            })
            .send()
            .await
            .map_err(|error| CollaboratorError::from_transport(SERVICE, error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|error| {
            CollaboratorError::Malformed {
                service: SERVICE,
                details: error.to_string(),
            }
        })?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|entry| entry.embedding)
            .ok_or_else(|| CollaboratorError::Malformed {
                service: SERVICE,
                details: "response has no embedding".to_string(),
            })?;

        check_dimensions(vector, self.config.dimensions)
    }
}

pub(crate) fn check_dimensions(
    vector: Vec<f32>,
    expected: usize,
) -> Result<Vec<f32>, CollaboratorError> {
    if vector.len() != expected {
        return Err(CollaboratorError::Malformed {
            service: SERVICE,
            details: format!("embedding dimension {} != {expected}", vector.len()),
        });
    }
    Ok(vector)
}

#[derive(Debug, Clone)]
pub struct EmbeddingFailure {
    pub record_id: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct EmbeddingOutcome {
    pub records: Vec<IndexRecord>,
    pub failures: Vec<EmbeddingFailure>,
}

/// Embeds every record with at most `concurrency` calls in flight. A failed
/// call drops only that record; output keeps the input order.
pub async fn embed_all<E>(
    embedder: &E,
    records: Vec<PendingRecord>,
    concurrency: usize,
) -> EmbeddingOutcome
where
    E: Embedder + ?Sized,
{
    let total = records.len();
    let results: Vec<_> = stream::iter(records.into_iter().map(|record| async move {
        match embedder.embed(&record.text).await {
            Ok(vector) => Ok(record.with_vector(vector)),
            Err(error) => Err(EmbeddingFailure {
                record_id: record.record_id,
                reason: error.to_string(),
            }),
        }
    }))
    .buffered(concurrency.max(1))
    .collect()
    .await;

    let mut outcome = EmbeddingOutcome::default();
    for result in results {
        match result {
            Ok(record) => outcome.records.push(record),
            Err(failure) => {
                warn!(record_id = %failure.record_id, reason = %failure.reason, "embedding failed");
                outcome.failures.push(failure);
            }
        }
    }

    info!(
        total,
        embedded = outcome.records.len(),
        failed = outcome.failures.len(),
        "embedding finished"
    );
    outcome
}
