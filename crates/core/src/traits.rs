use crate::{IndexRecord, SearchError};
use async_trait::async_trait;
use serde_json::Value;

/// Index and search-pipeline management calls on the search engine.
#[async_trait]
pub trait IndexAdmin: Send + Sync {
    async fn server_version(&self) -> Result<String, SearchError>;

    async fn index_exists(&self, index: &str) -> Result<bool, SearchError>;

    /// Must treat "index already exists" as success.
    async fn create_index(&self, index: &str, body: &Value) -> Result<(), SearchError>;

    async fn delete_index(&self, index: &str) -> Result<(), SearchError>;

    async fn search_pipeline_exists(&self, name: &str) -> Result<bool, SearchError>;

    async fn put_search_pipeline(&self, name: &str, body: &Value) -> Result<(), SearchError>;
}

/// Outcome for one document of a bulk submission.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItem {
    pub record_id: String,
    pub error: Option<String>,
}

#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Upserts by `record_id`. An `Err` means the whole request failed; per
    /// document failures come back as items with `error` set.
    async fn bulk_index(
        &self,
        index: &str,
        records: &[IndexRecord],
    ) -> Result<Vec<BulkItem>, SearchError>;

    async fn refresh(&self, index: &str) -> Result<(), SearchError>;

    async fn count(&self, index: &str) -> Result<u64, SearchError>;
}

#[async_trait]
pub trait HybridIndex: Send + Sync {
    async fn search_hybrid(
        &self,
        index: &str,
        query: &crate::HybridQuery,
        query_vector: &[f32],
    ) -> Result<Vec<crate::SearchHit>, SearchError>;
}
