use crate::keywords::KeywordExtractor;
use crate::metadata::sanitize;
use crate::models::{Element, KeywordMode, PendingRecord, Section};
use md5::{Digest, Md5};

pub const SUMMARY_CHARS: usize = 200;
pub const ID_PREFIX_CHARS: usize = 50;
const ELLIPSIS: &str = "...";

/// Turns parsed elements into records carrying every text-derived field.
/// Embedding happens later, in [`crate::embeddings::embed_all`].
#[derive(Clone)]
pub struct RecordBuilder {
    keywords: KeywordExtractor,
    keyword_mode: KeywordMode,
    min_text_chars: usize,
}

impl RecordBuilder {
    pub fn new(keywords: KeywordExtractor, keyword_mode: KeywordMode, min_text_chars: usize) -> Self {
        Self {
            keywords,
            keyword_mode,
            min_text_chars,
        }
    }

    /// Returns `None` when the element's trimmed text is shorter than the
    /// minimum; that is an expected drop, not an error.
    pub async fn build(
        &self,
        element: &Element,
        filename: &str,
        index: usize,
        total: usize,
    ) -> Option<PendingRecord> {
        let text = element.text.as_str();
        if text.trim().chars().count() < self.min_text_chars {
            return None;
        }

        tracing::debug!(filename, position = index + 1, total, "building record");

        let section = Section::from(element.element_type);
        let title = section.carries_title().then(|| text.to_string());
        let metadata = sanitize(&element.metadata).with_filename(filename);
        let keywords = self.keywords.extract(text, self.keyword_mode).await;

        Some(PendingRecord {
            record_id: make_record_id(filename, index, text),
            element_id: element.element_id.clone(),
            text: text.to_string(),
            metadata,
            keywords,
            section,
            title,
            summary: summarize(text),
        })
    }
}

/// md5 over `{filename}_{index}_{first 50 chars}`. Identical inputs always
/// map to the same id, so re-ingestion overwrites instead of duplicating.
pub fn make_record_id(filename: &str, index: usize, text: &str) -> String {
    let prefix: String = text.chars().take(ID_PREFIX_CHARS).collect();
    let mut hasher = Md5::new();
    hasher.update(format!("{filename}_{index}_{prefix}").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// First 200 characters cut back to the last space, plus `...`.
pub fn summarize(text: &str) -> String {
    if text.chars().count() <= SUMMARY_CHARS {
        return text.to_string();
    }

    let head: String = text.chars().take(SUMMARY_CHARS).collect();
    let cut = match head.rsplit_once(' ') {
        Some((before, _)) => before,
        None => head.as_str(),
    };
    format!("{cut}{ELLIPSIS}")
}
