use crate::embeddings::{embed_all, Embedder};
use crate::indexer::BulkIndexer;
use crate::keywords::KeywordExtractor;
use crate::parser::DocumentParser;
use crate::records::RecordBuilder;
use crate::traits::DocumentIndex;
use crate::{IngestError, PipelineConfig};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

pub const SUPPORTED_EXTENSIONS: [&str; 6] = ["pdf", "docx", "doc", "txt", "md", "html"];

/// Top-level files of `folder` whose extension is in [`SUPPORTED_EXTENSIONS`].
pub fn discover_supported_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_supported = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                SUPPORTED_EXTENSIONS
                    .iter()
                    .any(|supported| ext.eq_ignore_ascii_case(supported))
            });

        if is_supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileReport {
    pub filename: String,
    pub elements: usize,
    /// Elements discarded by the minimum-length filter.
    pub too_short: usize,
    /// Records dropped because their embedding call failed.
    pub embedding_failures: usize,
    pub indexed: usize,
    pub index_errors: usize,
    pub index_error_samples: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FailedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct DirectoryReport {
    pub files: Vec<FileReport>,
    pub failed_files: Vec<FailedFile>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DirectoryReport {
    pub fn total_indexed(&self) -> usize {
        self.files.iter().map(|file| file.indexed).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.files
            .iter()
            .map(|file| file.embedding_failures + file.index_errors)
            .sum::<usize>()
            + self.failed_files.len()
    }
}

/// Drives parse, build, embed and index for files and directories. All
/// settings, the record builder's included, come from the [`PipelineConfig`]
/// it was built with.
pub struct IngestionPipeline<'a, P: ?Sized, E: ?Sized, I: ?Sized> {
    parser: &'a P,
    embedder: &'a E,
    index: &'a I,
    builder: RecordBuilder,
    config: &'a PipelineConfig,
}

impl<'a, P, E, I> IngestionPipeline<'a, P, E, I>
where
    P: DocumentParser + ?Sized,
    E: Embedder + ?Sized,
    I: DocumentIndex + ?Sized,
{
    pub fn new(
        parser: &'a P,
        embedder: &'a E,
        index: &'a I,
        keywords: KeywordExtractor,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            parser,
            embedder,
            index,
            builder: RecordBuilder::new(keywords, config.keyword_mode, config.min_text_chars),
            config,
        }
    }

    pub async fn ingest_file(&self, path: &Path) -> Result<FileReport, IngestError> {
        if !path.is_file() {
            return Err(IngestError::InvalidArgument(format!(
                "file not found: {}",
                path.display()
            )));
        }
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
            .to_string();

        let elements = self.parser.parse(path).await?;
        let mut report = FileReport {
            filename: filename.clone(),
            elements: elements.len(),
            ..FileReport::default()
        };

        if elements.is_empty() {
            warn!(file = %filename, "no elements extracted");
            return Ok(report);
        }

        let total = elements.len();
        let mut pending = Vec::with_capacity(total);
        for (position, element) in elements.iter().enumerate() {
            match self.builder.build(element, &filename, position, total).await {
                Some(record) => pending.push(record),
                None => report.too_short += 1,
            }
        }

        let embedded = embed_all(self.embedder, pending, self.config.embedding_concurrency).await;
        report.embedding_failures = embedded.failures.len();

        if embedded.records.is_empty() {
            warn!(file = %filename, "no valid documents to index");
            return Ok(report);
        }

        info!(file = %filename, documents = embedded.records.len(), "indexing documents");
        let summary = BulkIndexer::new(self.index, &self.config.index_name, self.config.bulk_batch_size)
            .index_all(&embedded.records)
            .await;

        report.indexed = summary.indexed;
        report.index_errors = summary.errors;
        report.index_error_samples = summary.error_samples;

        info!(
            file = %filename,
            indexed = report.indexed,
            errors = report.index_errors,
            too_short = report.too_short,
            embedding_failures = report.embedding_failures,
            "file ingested"
        );
        Ok(report)
    }

    /// One file failing (parse error, unreadable file) is recorded and the
    /// remaining files still run.
    pub async fn ingest_directory(&self, folder: &Path) -> Result<DirectoryReport, IngestError> {
        if !folder.is_dir() {
            return Err(IngestError::InvalidArgument(format!(
                "not a directory: {}",
                folder.display()
            )));
        }

        let files = discover_supported_files(folder);
        if files.is_empty() {
            return Err(IngestError::NoSupportedFiles(folder.display().to_string()));
        }

        info!(count = files.len(), folder = %folder.display(), "found files to process");
        let started_at = Utc::now();
        let mut reports = Vec::new();
        let mut failed_files = Vec::new();

        for path in files {
            match self.ingest_file(&path).await {
                Ok(report) => reports.push(report),
                Err(failure) => {
                    error!(path = %path.display(), error = %failure, "error processing file");
                    failed_files.push(FailedFile {
                        path,
                        reason: failure.to_string(),
                    });
                }
            }
        }

        Ok(DirectoryReport {
            files: reports,
            failed_files,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Element, ElementType};
    use crate::traits::BulkItem;
    use crate::{CollaboratorError, IndexRecord, SearchError};
    use async_trait::async_trait;
    use serde_json::Map;
    use std::collections::{HashMap, HashSet};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct FakeParser {
        failing_files: HashSet<String>,
    }

    #[async_trait]
    impl DocumentParser for FakeParser {
        async fn parse(&self, path: &Path) -> Result<Vec<Element>, CollaboratorError> {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if self.failing_files.contains(name) {
                return Err(CollaboratorError::Status {
                    service: "document parser",
                    status: 500,
                    body: "internal error".to_string(),
                });
            }

            let element = |element_type, text: &str| Element {
                element_type,
                element_id: String::new(),
                text: text.to_string(),
                metadata: Map::new(),
            };
            Ok(vec![
                element(ElementType::Title, "Introduction"),
                element(ElementType::NarrativeText, "tiny"),
                element(ElementType::NarrativeText, &format!("Body paragraph of {name}")),
                element(ElementType::ListItem, "embedding will fail here"),
            ])
        }
    }

    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        fn dimensions(&self) -> usize {
            2
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
            if text.contains("fail") {
                return Err(CollaboratorError::Timeout { service: "embedding" });
            }
            Ok(vec![0.5, 0.5])
        }
    }

    #[derive(Default)]
    struct MemoryIndex {
        documents: Mutex<HashMap<String, IndexRecord>>,
    }

    #[async_trait]
    impl DocumentIndex for MemoryIndex {
        async fn bulk_index(
            &self,
            _index: &str,
            records: &[IndexRecord],
        ) -> Result<Vec<BulkItem>, SearchError> {
            let mut documents = self.documents.lock().unwrap();
            Ok(records
                .iter()
                .map(|record| {
                    documents.insert(record.record_id().to_string(), record.clone());
                    BulkItem {
                        record_id: record.record_id().to_string(),
                        error: None,
                    }
                })
                .collect())
        }

        async fn refresh(&self, _index: &str) -> Result<(), SearchError> {
            Ok(())
        }

        async fn count(&self, _index: &str) -> Result<u64, SearchError> {
            Ok(self.documents.lock().unwrap().len() as u64)
        }
    }

    fn keywords() -> KeywordExtractor {
        KeywordExtractor::heuristic_only().unwrap()
    }

    #[test]
    fn discovery_filters_extensions_and_stays_top_level() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        fs::create_dir(base.join("nested"))?;
        for name in ["a.pdf", "b.DOCX", "c.md", "d.png", "e.html", "notes"] {
            fs::write(base.join(name), b"x")?;
        }
        fs::write(base.join("nested").join("f.pdf"), b"x")?;

        let names: Vec<_> = discover_supported_files(base)
            .iter()
            .filter_map(|path| path.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect();

        assert_eq!(names, vec!["a.pdf", "b.DOCX", "c.md", "e.html"]);
        Ok(())
    }

    #[tokio::test]
    async fn file_report_separates_drop_classes() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("paper.pdf");
        fs::write(&path, b"%PDF-1.4")?;

        let config = PipelineConfig::default();
        let parser = FakeParser {
            failing_files: HashSet::new(),
        };
        let index = MemoryIndex::default();
        let pipeline = IngestionPipeline::new(&parser, &FakeEmbedder, &index, keywords(), &config);

        let report = pipeline.ingest_file(&path).await?;

        assert_eq!(report.elements, 4);
        assert_eq!(report.too_short, 1);
        assert_eq!(report.embedding_failures, 1);
        assert_eq!(report.indexed, 2);
        assert_eq!(report.index_errors, 0);
        Ok(())
    }

    #[tokio::test]
    async fn reingesting_a_file_keeps_the_same_ids() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("paper.pdf");
        fs::write(&path, b"%PDF-1.4")?;

        let config = PipelineConfig::default();
        let parser = FakeParser {
            failing_files: HashSet::new(),
        };
        let index = MemoryIndex::default();
        let pipeline = IngestionPipeline::new(&parser, &FakeEmbedder, &index, keywords(), &config);

        pipeline.ingest_file(&path).await?;
        let first_ids: HashSet<String> = index.documents.lock().unwrap().keys().cloned().collect();
        pipeline.ingest_file(&path).await?;
        let second_ids: HashSet<String> = index.documents.lock().unwrap().keys().cloned().collect();

        assert_eq!(first_ids, second_ids);
        assert_eq!(index.count("hybrid_demo").await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn directory_run_survives_a_failing_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        for name in ["1.pdf", "2.pdf", "3.pdf"] {
            fs::write(dir.path().join(name), b"%PDF-1.4")?;
        }

        let config = PipelineConfig::default();
        let parser = FakeParser {
            failing_files: ["2.pdf".to_string()].into(),
        };
        let index = MemoryIndex::default();
        let pipeline = IngestionPipeline::new(&parser, &FakeEmbedder, &index, keywords(), &config);

        let report = pipeline.ingest_directory(dir.path()).await?;

        assert_eq!(report.files.len(), 2);
        assert_eq!(report.failed_files.len(), 1);
        assert_eq!(
            report.failed_files[0].path.file_name().and_then(|n| n.to_str()),
            Some("2.pdf")
        );
        assert_eq!(report.total_indexed(), 4);
        assert_eq!(report.total_errors(), 3);
        assert!(report.finished_at >= report.started_at);
        Ok(())
    }

    #[tokio::test]
    async fn directory_without_supported_files_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("image.png"), b"x")?;

        let config = PipelineConfig::default();
        let parser = FakeParser {
            failing_files: HashSet::new(),
        };
        let index = MemoryIndex::default();
        let pipeline = IngestionPipeline::new(&parser, &FakeEmbedder, &index, keywords(), &config);

        let result = pipeline.ingest_directory(dir.path()).await;
        assert!(matches!(result, Err(IngestError::NoSupportedFiles(_))));
        Ok(())
    }

    #[tokio::test]
    async fn minimum_length_comes_from_pipeline_config() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("paper.pdf");
        fs::write(&path, b"%PDF-1.4")?;

        let config = PipelineConfig {
            min_text_chars: 50,
            ..PipelineConfig::default()
        };
        let parser = FakeParser {
            failing_files: HashSet::new(),
        };
        let index = MemoryIndex::default();
        let pipeline = IngestionPipeline::new(&parser, &FakeEmbedder, &index, keywords(), &config);

        let report = pipeline.ingest_file(&path).await?;

        assert_eq!(report.too_short, 4);
        assert_eq!(report.indexed, 0);
        assert_eq!(index.count("docs").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_is_rejected_before_parsing() {
        let config = PipelineConfig::default();
        let parser = FakeParser {
            failing_files: HashSet::new(),
        };
        let index = MemoryIndex::default();
        let pipeline = IngestionPipeline::new(&parser, &FakeEmbedder, &index, keywords(), &config);

        let result = pipeline.ingest_file(Path::new("/nonexistent/file.pdf")).await;
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
    }
}
