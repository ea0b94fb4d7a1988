use crate::schema::{SEARCH_PIPELINE_NAME, VECTOR_FIELD};
use crate::search::{HybridQuery, SearchHit};
use crate::traits::{BulkItem, DocumentIndex, HybridIndex, IndexAdmin};
use crate::{IndexRecord, IngestError, SearchError};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;

const BACKEND: &str = "opensearch";
const ALREADY_EXISTS: &str = "resource_already_exists_exception";

pub struct OpenSearchStore {
    client: Arc<Client>,
    endpoint: String,
}

impl OpenSearchStore {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, IngestError> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint).map_err(|error| {
            IngestError::Configuration(format!("invalid OpenSearch url {endpoint}: {error}"))
        })?;
        let client = Client::builder()
            .build()
            .map_err(|error| IngestError::Configuration(format!("http client: {error}")))?;

        Ok(Self {
            client: Arc::new(client),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }
}

/// A concurrent writer created the index between our existence check and
/// our create call.
pub fn is_benign_create_conflict(status: StatusCode, body: &str) -> bool {
    status == StatusCode::BAD_REQUEST && body.contains(ALREADY_EXISTS)
}

async fn backend_error(action: &str, response: Response) -> SearchError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    SearchError::BackendResponse {
        backend: BACKEND.to_string(),
        details: format!("{action} failed with {status}: {body}"),
    }
}

#[async_trait]
impl IndexAdmin for OpenSearchStore {
    async fn server_version(&self) -> Result<String, SearchError> {
        let response = self
            .client
            .get(self.url(""))
            .send()
            .await
            .map_err(|error| SearchError::Unreachable {
                endpoint: self.endpoint.clone(),
                details: error.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(backend_error("info", response).await);
        }

        let info: Value = response.json().await?;
        Ok(info
            .pointer("/version/number")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string())
    }

    async fn index_exists(&self, index: &str) -> Result<bool, SearchError> {
        let response = self.client.head(self.url(index)).send().await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(backend_error("index exists", response).await),
        }
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), SearchError> {
        let response = self.client.put(self.url(index)).json(body).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        if is_benign_create_conflict(status, &text) {
            tracing::debug!(index, "index created concurrently, keeping it");
            return Ok(());
        }

        Err(SearchError::Request(format!(
            "open-search index setup failed with {status}: {text}"
        )))
    }

    async fn delete_index(&self, index: &str) -> Result<(), SearchError> {
        let response = self.client.delete(self.url(index)).send().await?;
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(backend_error("delete index", response).await)
    }

    async fn search_pipeline_exists(&self, name: &str) -> Result<bool, SearchError> {
        let response = self
            .client
            .get(self.url(&format!("_search/pipeline/{name}")))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(backend_error("get search pipeline", response).await),
        }
    }

    async fn put_search_pipeline(&self, name: &str, body: &Value) -> Result<(), SearchError> {
        let response = self
            .client
            .put(self.url(&format!("_search/pipeline/{name}")))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error("put search pipeline", response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentIndex for OpenSearchStore {
    async fn bulk_index(
        &self,
        index: &str,
        records: &[IndexRecord],
    ) -> Result<Vec<BulkItem>, SearchError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let payload = bulk_payload(index, records)?;
        let response = self
            .client
            .post(self.url("_bulk"))
            .header("Content-Type", "application/x-ndjson")
            .body(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error("bulk", response).await);
        }

        let parsed: Value = response.json().await?;
        parse_bulk_items(records, &parsed)
    }

    async fn refresh(&self, index: &str) -> Result<(), SearchError> {
        let response = self
            .client
            .post(self.url(&format!("{index}/_refresh")))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error("refresh", response).await);
        }
        Ok(())
    }

    async fn count(&self, index: &str) -> Result<u64, SearchError> {
        let response = self
            .client
            .get(self.url(&format!("{index}/_count")))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error("count", response).await);
        }

        let parsed: Value = response.json().await?;
        parsed
            .pointer("/count")
            .and_then(Value::as_u64)
            .ok_or_else(|| SearchError::BackendResponse {
                backend: BACKEND.to_string(),
                details: "count response has no count".to_string(),
            })
    }
}

#[async_trait]
impl HybridIndex for OpenSearchStore {
    async fn search_hybrid(
        &self,
        index: &str,
        query: &HybridQuery,
        query_vector: &[f32],
    ) -> Result<Vec<SearchHit>, SearchError> {
        let response = self
            .client
            .post(self.url(&format!("{index}/_search")))
            .query(&[("search_pipeline", SEARCH_PIPELINE_NAME)])
            .json(&hybrid_query_body(query, query_vector))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error("search", response).await);
        }

        let parsed: Value = response.json().await?;
        Ok(parse_hits(&parsed))
    }
}

fn bulk_payload(index: &str, records: &[IndexRecord]) -> Result<String, SearchError> {
    let mut lines = Vec::with_capacity(records.len() * 2);
    for record in records {
        lines.push(serde_json::to_string(&json!({
            "index": {
                "_index": index,
                "_id": record.record_id(),
            }
        }))?);
        lines.push(serde_json::to_string(record)?);
    }
    Ok(lines.join("\n") + "\n")
}

/// Items come back in submission order, one per action.
fn parse_bulk_items(records: &[IndexRecord], response: &Value) -> Result<Vec<BulkItem>, SearchError> {
    let items = response
        .pointer("/items")
        .and_then(Value::as_array)
        .ok_or_else(|| SearchError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "bulk response has no items".to_string(),
        })?;

    if items.len() != records.len() {
        return Err(SearchError::BackendResponse {
            backend: BACKEND.to_string(),
            details: format!(
                "bulk response has {} items for {} records",
                items.len(),
                records.len()
            ),
        });
    }

    Ok(records
        .iter()
        .zip(items)
        .map(|(record, item)| {
            let action = item.get("index").unwrap_or(item);
            let error = action.get("error").filter(|error| !error.is_null()).map(|error| {
                let kind = error.pointer("/type").and_then(Value::as_str).unwrap_or("error");
                let reason = error
                    .pointer("/reason")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                format!("{kind}: {reason}")
            });
            BulkItem {
                record_id: record.record_id().to_string(),
                error,
            }
        })
        .collect())
}

fn hybrid_query_body(query: &HybridQuery, query_vector: &[f32]) -> Value {
    let mut lexical = json!({
        "multi_match": {
            "query": query.text,
            "fields": ["text", "title^3", "keywords^2", "summary"]
        }
    });

    if let Some(section) = query.section {
        lexical = json!({
            "bool": {
                "must": [lexical],
                "filter": [{"term": {"section": section.as_str()}}]
            }
        });
    }

    json!({
        "size": query.top_k,
        "_source": {"excludes": [VECTOR_FIELD]},
        "query": {
            "hybrid": {
                "queries": [
                    lexical,
                    {"knn": {VECTOR_FIELD: {"vector": query_vector, "k": query.top_k}}}
                ]
            }
        }
    })
}

fn parse_hits(response: &Value) -> Vec<SearchHit> {
    let hits = response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    hits.into_iter()
        .map(|raw| {
            let source = raw.get("_source").cloned().unwrap_or(Value::Null);
            let text_at = |pointer: &str| {
                source
                    .pointer(pointer)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };

            SearchHit {
                record_id: raw
                    .pointer("/_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                score: raw.pointer("/_score").and_then(Value::as_f64).unwrap_or(0.0),
                section: text_at("/section"),
                title: source
                    .pointer("/title")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                summary: text_at("/summary"),
                text: text_at("/text"),
                filename: text_at("/metadata/filename"),
                page_number: source.pointer("/metadata/page_number").and_then(Value::as_u64),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::SanitizedMetadata;
    use crate::models::{PendingRecord, Section};

    fn record(id: &str) -> IndexRecord {
        PendingRecord {
            record_id: id.to_string(),
            element_id: String::new(),
            text: "Scaled dot-product attention".to_string(),
            metadata: SanitizedMetadata::default().with_filename("paper.pdf"),
            keywords: vec!["dot-product".to_string()],
            section: Section::Narrative,
            title: None,
            summary: "Scaled dot-product attention".to_string(),
        }
        .with_vector(vec![0.1, 0.2])
    }

    #[test]
    fn bulk_payload_uses_record_id_as_document_id() {
        let payload = bulk_payload("docs", &[record("r1"), record("r2")]).unwrap();
        let lines: Vec<Value> = payload
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert!(payload.ends_with('\n'));
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], json!({"index": {"_index": "docs", "_id": "r1"}}));
        assert_eq!(lines[1]["record_id"], "r1");
        assert_eq!(lines[1]["keywords"], "dot-product");
        assert_eq!(lines[2]["index"]["_id"], "r2");
    }

    #[test]
    fn bulk_item_errors_are_reported_per_record() {
        let response = json!({
            "errors": true,
            "items": [
                {"index": {"_id": "r1", "status": 201}},
                {"index": {"_id": "r2", "status": 400,
                    "error": {"type": "mapper_parsing_exception", "reason": "bad vector"}}}
            ]
        });

        let items = parse_bulk_items(&[record("r1"), record("r2")], &response).unwrap();
        assert_eq!(items[0].error, None);
        assert_eq!(items[1].record_id, "r2");
        assert_eq!(
            items[1].error.as_deref(),
            Some("mapper_parsing_exception: bad vector")
        );
    }

    #[test]
    fn bulk_item_count_mismatch_is_rejected() {
        let response = json!({"items": [{"index": {"status": 201}}]});
        assert!(parse_bulk_items(&[record("r1"), record("r2")], &response).is_err());
    }

    #[test]
    fn hybrid_query_pairs_lexical_and_knn() {
        let query = HybridQuery {
            text: "attention".to_string(),
            top_k: 5,
            section: Some(Section::Title),
        };
        let body = hybrid_query_body(&query, &[0.5, 0.5]);
        let queries = &body["query"]["hybrid"]["queries"];

        assert_eq!(body["size"], 5);
        assert_eq!(queries[0]["bool"]["filter"][0]["term"]["section"], "title");
        assert_eq!(queries[0]["bool"]["must"][0]["multi_match"]["query"], "attention");
        assert_eq!(queries[1]["knn"]["vector_field"]["k"], 5);
    }

    #[test]
    fn hits_are_parsed_from_search_response() {
        let response = json!({
            "hits": {"hits": [{
                "_id": "r1",
                "_score": 0.87,
                "_source": {
                    "text": "body",
                    "summary": "sum",
                    "section": "title",
                    "title": "Intro",
                    "metadata": {"filename": "paper.pdf", "page_number": 2}
                }
            }]}
        });

        let hits = parse_hits(&response);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record_id, "r1");
        assert_eq!(hits[0].title.as_deref(), Some("Intro"));
        assert_eq!(hits[0].page_number, Some(2));
        assert_eq!(hits[0].filename, "paper.pdf");
    }

    #[test]
    fn duplicate_create_from_a_racer_is_benign() {
        let body = r#"{"error":{"root_cause":[{"type":"resource_already_exists_exception","reason":"index [docs/abc] already exists"}],"type":"resource_already_exists_exception"},"status":400}"#;
        assert!(is_benign_create_conflict(StatusCode::BAD_REQUEST, body));

        let mapping_error = r#"{"error":{"type":"mapper_parsing_exception","reason":"unknown field"},"status":400}"#;
        assert!(!is_benign_create_conflict(StatusCode::BAD_REQUEST, mapping_error));
        assert!(!is_benign_create_conflict(StatusCode::FORBIDDEN, body));
    }

    #[test]
    fn invalid_endpoint_is_a_configuration_error() {
        assert!(matches!(
            OpenSearchStore::new("not a url"),
            Err(IngestError::Configuration(_))
        ));
        let store = OpenSearchStore::new("http://localhost:9200/").unwrap();
        assert_eq!(store.url("docs/_count"), "http://localhost:9200/docs/_count");
    }
}
