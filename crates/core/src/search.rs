use crate::embeddings::Embedder;
use crate::models::Section;
use crate::traits::HybridIndex;
use crate::SearchError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct HybridQuery {
    pub text: String,
    pub top_k: usize,
    pub section: Option<Section>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub record_id: String,
    pub score: f64,
    pub section: String,
    pub title: Option<String>,
    pub summary: String,
    pub text: String,
    pub filename: String,
    pub page_number: Option<u64>,
}

/// Embeds the query text and runs one lexical + knn query; score
/// normalization and fusion happen inside the engine's search pipeline.
pub struct HybridSearcher<'a, E: ?Sized, H: ?Sized> {
    embedder: &'a E,
    index: &'a H,
    index_name: &'a str,
}

impl<'a, E, H> HybridSearcher<'a, E, H>
where
    E: Embedder + ?Sized,
    H: HybridIndex + ?Sized,
{
    pub fn new(embedder: &'a E, index: &'a H, index_name: &'a str) -> Self {
        Self {
            embedder,
            index,
            index_name,
        }
    }

    pub async fn search(&self, query: &HybridQuery) -> Result<Vec<SearchHit>, SearchError> {
        if query.text.trim().is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }
        if query.top_k == 0 {
            return Err(SearchError::Request("top_k must be positive".to_string()));
        }

        let query_vector = self
            .embedder
            .embed(&query.text)
            .await
            .map_err(|error| SearchError::Request(format!("query embedding failed: {error}")))?;

        let mut hits = self
            .index
            .search_hybrid(self.index_name, query, &query_vector)
            .await?;
        hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        hits.truncate(query.top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CollaboratorError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedEmbedder {
        fail: bool,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn dimensions(&self) -> usize {
            3
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, CollaboratorError> {
            if self.fail {
                return Err(CollaboratorError::Timeout { service: "embedding" });
            }
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    #[derive(Default)]
    struct FakeHybridIndex {
        hits: Vec<SearchHit>,
        seen_vector: Mutex<Vec<f32>>,
    }

    #[async_trait]
    impl HybridIndex for FakeHybridIndex {
        async fn search_hybrid(
            &self,
            _index: &str,
            _query: &HybridQuery,
            query_vector: &[f32],
        ) -> Result<Vec<SearchHit>, SearchError> {
            *self.seen_vector.lock().unwrap() = query_vector.to_vec();
            Ok(self.hits.clone())
        }
    }

    fn hit(id: &str, score: f64) -> SearchHit {
        SearchHit {
            record_id: id.to_string(),
            score,
            section: "narrative".to_string(),
            title: None,
            summary: String::new(),
            text: "Multi-head attention lets the model attend to several subspaces".to_string(),
            filename: "attention.pdf".to_string(),
            page_number: Some(1),
        }
    }

    fn query(text: &str, top_k: usize) -> HybridQuery {
        HybridQuery {
            text: text.to_string(),
            top_k,
            section: None,
        }
    }

    #[tokio::test]
    async fn searcher_sends_query_vector_and_ranks_hits() {
        let index = FakeHybridIndex {
            hits: vec![hit("low", 0.2), hit("high", 0.9), hit("mid", 0.5)],
            ..FakeHybridIndex::default()
        };
        let embedder = FixedEmbedder { fail: false };
        let searcher = HybridSearcher::new(&embedder, &index, "docs");

        let hits = searcher.search(&query("multi-head attention", 2)).await.unwrap();

        assert_eq!(*index.seen_vector.lock().unwrap(), vec![1.0, 0.0, 0.0]);
        let ids: Vec<_> = hits.iter().map(|hit| hit.record_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid"]);
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let index = FakeHybridIndex::default();
        let embedder = FixedEmbedder { fail: false };
        let searcher = HybridSearcher::new(&embedder, &index, "docs");
        assert!(searcher.search(&query("   ", 5)).await.is_err());
    }

    #[tokio::test]
    async fn embedding_failure_fails_the_search() {
        let index = FakeHybridIndex::default();
        let embedder = FixedEmbedder { fail: true };
        let searcher = HybridSearcher::new(&embedder, &index, "docs");
        let result = searcher.search(&query("attention", 5)).await;
        assert!(matches!(result, Err(SearchError::Request(_))));
    }
}
