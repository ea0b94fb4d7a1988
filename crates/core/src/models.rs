use crate::error::IngestError;
use crate::metadata::SanitizedMetadata;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

pub const DEFAULT_INDEX_NAME: &str = "hybrid_demo";
pub const MIN_TEXT_CHARS: usize = 10;

/// Element kinds reported by the document parser. Anything unrecognised
/// (e.g. `CompositeElement`, `Image`) lands in `Other`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ElementType {
    Title,
    Header,
    ListItem,
    Table,
    NarrativeText,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub element_type: ElementType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub element_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Title,
    Header,
    List,
    Table,
    Narrative,
    Content,
}

impl Section {
    pub fn as_str(self) -> &'static str {
        match self {
            Section::Title => "title",
            Section::Header => "header",
            Section::List => "list",
            Section::Table => "table",
            Section::Narrative => "narrative",
            Section::Content => "content",
        }
    }

    /// Titles and headers double as the boosted `title` field.
    pub fn carries_title(self) -> bool {
        matches!(self, Section::Title | Section::Header)
    }
}

impl From<ElementType> for Section {
    fn from(value: ElementType) -> Self {
        match value {
            ElementType::Title => Section::Title,
            ElementType::Header => Section::Header,
            ElementType::ListItem => Section::List,
            ElementType::Table => Section::Table,
            ElementType::NarrativeText => Section::Narrative,
            ElementType::Other => Section::Content,
        }
    }
}

/// A record with every text-derived field computed, waiting for its vector.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PendingRecord {
    pub record_id: String,
    pub element_id: String,
    pub text: String,
    pub metadata: SanitizedMetadata,
    #[serde(serialize_with = "join_keywords")]
    pub keywords: Vec<String>,
    pub section: Section,
    pub title: Option<String>,
    pub summary: String,
}

impl PendingRecord {
    pub fn with_vector(self, vector: Vec<f32>) -> IndexRecord {
        IndexRecord {
            record: self,
            vector_field: vector,
        }
    }
}

/// The unit of persistence; serializes to the index document `_source`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IndexRecord {
    #[serde(flatten)]
    pub record: PendingRecord,
    pub vector_field: Vec<f32>,
}

impl IndexRecord {
    pub fn record_id(&self) -> &str {
        &self.record.record_id
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeywordMode {
    #[default]
    Heuristic,
    Delegated,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub index_name: String,
    pub keyword_mode: KeywordMode,
    pub min_text_chars: usize,
    pub embedding_concurrency: usize,
    pub bulk_batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            index_name: DEFAULT_INDEX_NAME.to_string(),
            keyword_mode: KeywordMode::Heuristic,
            min_text_chars: MIN_TEXT_CHARS,
            embedding_concurrency: 4,
            bulk_batch_size: 100,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.index_name.trim().is_empty() {
            return Err(IngestError::Configuration("index name is empty".to_string()));
        }
        if self.index_name.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(IngestError::Configuration(format!(
                "index name must be lowercase: {}",
                self.index_name
            )));
        }
        if self.embedding_concurrency == 0 || self.bulk_batch_size == 0 {
            return Err(IngestError::Configuration(
                "embedding concurrency and bulk batch size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn join_keywords<S>(keywords: &[String], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&keywords.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn element_tolerates_nulls_and_unknown_types() {
        let element: Element = serde_json::from_value(json!({
            "type": "CompositeElement",
            "element_id": null,
            "text": "Some body text",
            "metadata": null
        }))
        .expect("element should deserialize");

        assert_eq!(element.element_type, ElementType::Other);
        assert_eq!(element.element_id, "");
        assert!(element.metadata.is_empty());
        assert_eq!(Section::from(element.element_type), Section::Content);
    }

    #[test]
    fn missing_type_defaults_to_other() {
        let element: Element =
            serde_json::from_value(json!({"text": "plain"})).expect("element should deserialize");
        assert_eq!(element.element_type, ElementType::Other);
    }

    #[test]
    fn index_record_serializes_flat_source() {
        let pending = PendingRecord {
            record_id: "abc".to_string(),
            element_id: "el-1".to_string(),
            text: "Attention is all you need".to_string(),
            metadata: SanitizedMetadata::default().with_filename("paper.pdf"),
            keywords: vec!["attention".to_string(), "BLEU".to_string()],
            section: Section::Narrative,
            title: None,
            summary: "Attention is all you need".to_string(),
        };
        let source = serde_json::to_value(pending.with_vector(vec![0.5, 0.25]))
            .expect("record should serialize");

        assert_eq!(source["record_id"], "abc");
        assert_eq!(source["keywords"], "attention BLEU");
        assert_eq!(source["section"], "narrative");
        assert_eq!(source["title"], Value::Null);
        assert_eq!(source["metadata"], json!({"filename": "paper.pdf"}));
        assert_eq!(source["vector_field"], json!([0.5, 0.25]));
    }

    #[test]
    fn config_rejects_uppercase_index() {
        let config = PipelineConfig {
            index_name: "Hybrid".to_string(),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(PipelineConfig::default().validate().is_ok());
    }
}
