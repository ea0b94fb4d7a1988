use crate::traits::DocumentIndex;
use crate::IndexRecord;
use tracing::{info, warn};

/// Only the first few index errors per batch are logged in full.
pub const MAX_SURFACED_INDEX_ERRORS: usize = 3;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSummary {
    pub indexed: usize,
    pub errors: usize,
    pub error_samples: Vec<String>,
}

impl IndexSummary {
    fn record_error(&mut self, record_id: &str, reason: &str) {
        self.errors += 1;
        if self.error_samples.len() < MAX_SURFACED_INDEX_ERRORS {
            warn!(record_id, reason, "index error");
            self.error_samples.push(format!("{record_id}: {reason}"));
        }
    }
}

pub struct BulkIndexer<'a, I: DocumentIndex + ?Sized> {
    index: &'a I,
    index_name: &'a str,
    batch_size: usize,
}

impl<'a, I: DocumentIndex + ?Sized> BulkIndexer<'a, I> {
    pub fn new(index: &'a I, index_name: &'a str, batch_size: usize) -> Self {
        Self {
            index,
            index_name,
            batch_size: batch_size.max(1),
        }
    }

    /// Upserts every record under its `record_id`, counting failures without
    /// stopping, then refreshes once so the batch is searchable.
    pub async fn index_all(&self, records: &[IndexRecord]) -> IndexSummary {
        let mut summary = IndexSummary::default();

        for batch in records.chunks(self.batch_size) {
            match self.index.bulk_index(self.index_name, batch).await {
                Ok(items) => {
                    for item in items {
                        match item.error {
                            None => summary.indexed += 1,
                            Some(reason) => summary.record_error(&item.record_id, &reason),
                        }
                    }
                }
                Err(error) => {
                    let reason = error.to_string();
                    for record in batch {
                        summary.record_error(record.record_id(), &reason);
                    }
                }
            }
        }

        if summary.errors > MAX_SURFACED_INDEX_ERRORS {
            warn!(
                suppressed = summary.errors - MAX_SURFACED_INDEX_ERRORS,
                "further index errors not shown"
            );
        }

        if !records.is_empty() {
            if let Err(error) = self.index.refresh(self.index_name).await {
                warn!(index = self.index_name, %error, "refresh failed, documents will appear after the next scheduled refresh");
            }
        }

        info!(
            index = self.index_name,
            indexed = summary.indexed,
            errors = summary.errors,
            "indexing finished"
        );
        summary
    }
}
