//! The ingestion pipeline: one document in, a stored bundle out.
//!
//! Stages run in a fixed order, each reporting a progress checkpoint to the
//! task tracker before it starts:
//!
//!   LOADING (0.10) → CLASSIFYING (0.20) → EXTRACTING (0.40) →
//!   VALIDATING (0.50) → CHUNKING (0.60) → STORING (0.80) → COMPLETED (1.0)
//!
//! Cancellation is observed at stage boundaries only; a running stage always
//! finishes or fails on its own terms. Failures never escape [`run`]: every
//! error lands in the task record as a terminal FAILED (or CANCELLED) state.

use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunker::{self, ChunkStrategy};
use crate::classify::Classifier;
use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::errors::PipelineError;
use crate::extractor::{ControlSegment, StructuredExtractor};
use crate::graph;
use crate::llm::LlmClient;
use crate::loader::FileSource;
use crate::models::{
    ControlItem, Document, DocumentType, ProcessedDocument, TaskState,
};
use crate::tasks::TaskStatusTracker;

/// Caller-supplied knobs for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Skip classification and treat the document as this type.
    pub force_type: Option<DocumentType>,
    /// Run the structural validation stage on extracted controls.
    pub validate: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            force_type: None,
            validate: true,
        }
    }
}

pub struct IngestionPipeline {
    pool: SqlitePool,
    config: Config,
    tracker: TaskStatusTracker,
    classifier: Classifier,
    extractor: StructuredExtractor,
    embedder: Box<dyn EmbeddingProvider>,
    llm: Option<LlmClient>,
}

impl IngestionPipeline {
    pub fn new(
        pool: SqlitePool,
        config: Config,
        tracker: TaskStatusTracker,
    ) -> anyhow::Result<Self> {
        let classifier = Classifier::new()?;
        let extractor = StructuredExtractor::new()?;
        let embedder = embedding::create_provider(&config.embedding)?;
        let llm = LlmClient::from_config(&config.llm)
            .map_err(|e| anyhow::anyhow!("LLM client init failed: {}", e))?;

        Ok(Self {
            pool,
            config,
            tracker,
            classifier,
            extractor,
            embedder,
            llm,
        })
    }

    pub fn tracker(&self) -> &TaskStatusTracker {
        &self.tracker
    }

    /// Register a task and return its id. The caller decides whether to run
    /// the pipeline inline or on a spawned task.
    pub fn register_task(&self) -> String {
        let task_id = Uuid::new_v4().to_string();
        self.tracker.create(&task_id);
        task_id
    }

    /// Drive one document through every stage. Never returns an unrecorded
    /// error: on failure the task is marked FAILED with the stage's message,
    /// on cancellation CANCELLED. The returned `Result` mirrors the terminal
    /// task state for callers that run the pipeline inline.
    pub async fn run(
        &self,
        task_id: &str,
        source: FileSource,
        options: IngestOptions,
    ) -> Result<ProcessedDocument, PipelineError> {
        let outcome = self.run_stages(task_id, source, options).await;

        match &outcome {
            Ok(processed) => {
                self.tracker.update(
                    task_id,
                    TaskState::Completed,
                    TaskState::Completed.checkpoint(),
                    "done",
                    json!({
                        "document_id": processed.document_id,
                        "doc_type": processed.doc_type.as_str(),
                        "confidence": processed.confidence,
                        "num_chunks": processed.num_chunks,
                        "num_controls": processed.num_controls,
                        "embedding_model": self.embedder.model_name(),
                    }),
                );
                info!(
                    task_id = %task_id,
                    document_id = %processed.document_id,
                    chunks = processed.num_chunks,
                    controls = processed.num_controls,
                    "ingestion completed"
                );
            }
            Err(PipelineError::Cancelled) => {
                self.tracker.mark_cancelled(task_id);
                info!(task_id = %task_id, "ingestion cancelled");
            }
            Err(e) => {
                self.tracker.fail(task_id, &e.to_string());
                warn!(task_id = %task_id, error = %e, "ingestion failed");
            }
        }

        outcome
    }

    async fn run_stages(
        &self,
        task_id: &str,
        source: FileSource,
        options: IngestOptions,
    ) -> Result<ProcessedDocument, PipelineError> {
        let file_name = source.file_name();

        // LOADING: bytes only, no interpretation yet.
        self.enter_stage(task_id, TaskState::Loading, "reading file", json!(null))?;
        let bytes = source.read_bytes()?;
        if bytes.is_empty() {
            return Err(PipelineError::Validation("empty file".to_string()));
        }

        // CLASSIFYING: text extraction happens here so that a corrupt or
        // binary file fails with the user-facing unsupported-format message.
        self.enter_stage(
            task_id,
            TaskState::Classifying,
            "detecting document type",
            json!({ "file_name": file_name }),
        )?;
        let text = crate::loader::extract_text(&bytes, &file_name)?;
        let classification = match options.force_type {
            Some(doc_type) => crate::models::Classification {
                doc_type,
                confidence: 1.0,
            },
            None => self.classifier.classify(&text),
        };
        info!(
            task_id = %task_id,
            doc_type = classification.doc_type.as_str(),
            confidence = classification.confidence,
            "document classified"
        );

        // EXTRACTING: structured control segmentation, LLM-refined when a
        // client is configured. A failure here is isolated per segment inside
        // the extractor; the stage itself cannot fail.
        self.enter_stage(
            task_id,
            TaskState::Extracting,
            "extracting controls",
            json!({ "doc_type": classification.doc_type.as_str() }),
        )?;
        let strategy = chunker::select_strategy(
            classification.doc_type,
            classification.confidence,
            self.config.classification.structured_confidence_threshold,
        );
        let segments = if strategy == ChunkStrategy::Structured {
            self.extractor
                .extract(classification.doc_type, &text, self.llm.as_ref())
                .await
        } else {
            Vec::new()
        };

        // VALIDATING: structural sanity of the extraction output.
        self.enter_stage(
            task_id,
            TaskState::Validating,
            "validating extraction",
            json!({ "segments": segments.len() }),
        )?;
        if options.validate {
            validate_segments(&segments)?;
        }

        // CHUNKING
        self.enter_stage(
            task_id,
            TaskState::Chunking,
            "chunking document",
            json!(null),
        )?;
        let document_id = Uuid::new_v4().to_string();
        let chunks = chunker::chunk_document(
            &document_id,
            &text,
            &segments,
            strategy,
            &self.config.chunking,
        );
        // Whitespace-only input survives loading but yields nothing to
        // store; completing it would leave a bare Document node behind.
        if chunks.is_empty() {
            return Err(PipelineError::Validation(
                "document produced no chunks".to_string(),
            ));
        }

        // STORING: embeddings plus the transactional bundle write.
        self.enter_stage(
            task_id,
            TaskState::Storing,
            "storing chunks and graph nodes",
            json!({
                "num_chunks": chunks.len(),
                "embedding_model": self.embedder.model_name(),
            }),
        )?;
        let embeddings = self.embed_chunks(task_id, &chunks).await;

        let document = Document {
            id: document_id.clone(),
            file_name: file_name.clone(),
            doc_type: classification.doc_type,
            confidence: classification.confidence,
            body: text,
            created_at: chrono::Utc::now().timestamp(),
        };
        let controls = build_controls(&document_id, classification.doc_type, &segments);
        graph::store_document_bundle(&self.pool, &document, &chunks, &controls, &embeddings)
            .await
            .map_err(map_store_error)?;

        Ok(ProcessedDocument {
            document_id,
            task_id: task_id.to_string(),
            doc_type: classification.doc_type,
            confidence: classification.confidence,
            num_chunks: chunks.len(),
            num_controls: controls.len(),
        })
    }

    /// Stage boundary: observe cancellation, then report the checkpoint.
    fn enter_stage(
        &self,
        task_id: &str,
        state: TaskState,
        operation: &str,
        metadata: serde_json::Value,
    ) -> Result<(), PipelineError> {
        if self.tracker.cancel_requested(task_id) {
            return Err(PipelineError::Cancelled);
        }
        self.tracker
            .update(task_id, state, state.checkpoint(), operation, metadata);
        Ok(())
    }

    /// Batch-embed chunk texts. A disabled or failing provider degrades to
    /// unembedded chunks rather than failing the document.
    async fn embed_chunks(
        &self,
        task_id: &str,
        chunks: &[crate::models::KnowledgeChunk],
    ) -> Vec<Option<Vec<f32>>> {
        if chunks.is_empty() || !self.config.embedding.is_enabled() {
            return vec![None; chunks.len()];
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let dims = self.embedder.dims();
        match self.embedder.embed(&texts).await {
            Ok(vectors)
                if vectors.len() == chunks.len() && vectors.iter().all(|v| v.len() == dims) =>
            {
                vectors.into_iter().map(Some).collect()
            }
            Ok(vectors) => {
                warn!(
                    task_id = %task_id,
                    expected = chunks.len(),
                    got = vectors.len(),
                    "embedding count or dimension mismatch, storing chunks unembedded"
                );
                vec![None; chunks.len()]
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "embedding failed, storing chunks unembedded");
                vec![None; chunks.len()]
            }
        }
    }
}

/// Shared pipeline handle for the server and the CLI.
pub type SharedPipeline = Arc<IngestionPipeline>;

fn validate_segments(segments: &[ControlSegment]) -> Result<(), PipelineError> {
    for seg in segments {
        if seg.control_id.trim().is_empty() {
            return Err(PipelineError::Validation(
                "extracted control with empty id".to_string(),
            ));
        }
        if seg.text.trim().is_empty() {
            return Err(PipelineError::Validation(format!(
                "control {} has no body text",
                seg.control_id
            )));
        }
    }
    Ok(())
}

/// One control item per distinct control id; a heading repeated later in the
/// document keeps its first occurrence.
fn build_controls(
    document_id: &str,
    doc_type: DocumentType,
    segments: &[ControlSegment],
) -> Vec<ControlItem> {
    let mut seen = std::collections::HashSet::new();
    segments
        .iter()
        .filter(|seg| seen.insert(seg.control_id.clone()))
        .map(|seg| ControlItem {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            control_id: seg.control_id.clone(),
            title: seg.title.clone(),
            text: seg.text.clone(),
            domain: doc_type.domain().to_string(),
            level: seg.level,
        })
        .collect()
}

fn map_store_error(err: anyhow::Error) -> PipelineError {
    if err.to_string().contains("graph write conflict") {
        PipelineError::GraphWriteConflict(err.to_string())
    } else {
        PipelineError::Other(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ChunkingConfig, Config, DbConfig, ServerConfig,
    };
    use crate::db;
    use crate::migrate;

    fn test_config() -> Config {
        Config {
            db: DbConfig {
                path: "unused.db".into(),
            },
            chunking: ChunkingConfig {
                max_tokens: 200,
                overlap_tokens: 20,
            },
            classification: Default::default(),
            llm: Default::default(),
            embedding: Default::default(),
            retrieval: Default::default(),
            gardener: Default::default(),
            tasks: Default::default(),
            server: ServerConfig {
                bind: "127.0.0.1:0".into(),
            },
        }
    }

    async fn test_pipeline() -> IngestionPipeline {
        let pool = db::connect_memory().await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        IngestionPipeline::new(pool, test_config(), TaskStatusTracker::new()).unwrap()
    }

    const ISO_SAMPLE: &str = "\
ISO/IEC 27001 Annex A controls for the information security management \
system (ISMS).\n\
\n\
A.5.1 Policies for information security\n\
Management shall define and approve the information security policy.\n\
\n\
A.5.2 Information security roles\n\
Roles and responsibilities shall be defined and allocated.\n";

    #[tokio::test]
    async fn test_structured_document_end_to_end() {
        let pipeline = test_pipeline().await;
        let task_id = pipeline.register_task();
        let src = FileSource::spool("iso.txt", ISO_SAMPLE.as_bytes()).unwrap();

        let processed = pipeline.run(&task_id, src, IngestOptions::default()).await.unwrap();
        assert_eq!(processed.doc_type, DocumentType::Iso27001);
        assert_eq!(processed.num_controls, 2);
        assert!(processed.num_chunks >= 2);

        let task = pipeline.tracker().get(&task_id).unwrap();
        assert_eq!(task.state, TaskState::Completed);
        assert!((task.progress - 1.0).abs() < 1e-9);

        let counts = graph::store_counts(&pipeline.pool).await.unwrap();
        assert_eq!(counts.documents, 1);
        assert_eq!(counts.controls, 2);
        assert_eq!(counts.embedded_chunks, counts.chunks);
    }

    #[tokio::test]
    async fn test_free_text_takes_generic_path() {
        let pipeline = test_pipeline().await;
        let task_id = pipeline.register_task();
        let src = FileSource::spool(
            "notes.md",
            b"Quarterly review notes.\n\nWe discussed onboarding and budgets.",
        )
        .unwrap();

        let processed = pipeline.run(&task_id, src, IngestOptions::default()).await.unwrap();
        assert_eq!(processed.doc_type, DocumentType::FreeText);
        assert_eq!(processed.num_controls, 0);
        assert!(processed.num_chunks >= 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_fails_at_classifying() {
        let pipeline = test_pipeline().await;
        let task_id = pipeline.register_task();
        let src = FileSource::spool("blob.bin", &[0xff, 0xfe, 0x9c, 0x80]).unwrap();

        let err = pipeline.run(&task_id, src, IngestOptions::default()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));

        let task = pipeline.tracker().get(&task_id).unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert!(task.error.as_deref().unwrap().contains("unsupported format"));
    }

    #[tokio::test]
    async fn test_empty_file_rejected() {
        let pipeline = test_pipeline().await;
        let task_id = pipeline.register_task();
        let src = FileSource::spool("empty.txt", b"").unwrap();

        let err = pipeline.run(&task_id, src, IngestOptions::default()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_whitespace_only_file_rejected() {
        // Non-empty bytes that chunk to nothing must fail, not complete
        // with zero chunks and a bare document node.
        let pipeline = test_pipeline().await;
        let task_id = pipeline.register_task();
        let src = FileSource::spool("blank.txt", b"   \n\n \t\n").unwrap();

        let err = pipeline.run(&task_id, src, IngestOptions::default()).await.unwrap_err();
        match err {
            PipelineError::Validation(msg) => assert!(msg.contains("no chunks")),
            other => panic!("expected validation error, got {:?}", other),
        }

        let task = pipeline.tracker().get(&task_id).unwrap();
        assert_eq!(task.state, TaskState::Failed);

        let counts = graph::store_counts(&pipeline.pool).await.unwrap();
        assert_eq!(counts.documents, 0);
        assert_eq!(counts.nodes, 0);
    }

    #[tokio::test]
    async fn test_completed_metadata_records_model_and_confidence() {
        let pipeline = test_pipeline().await;
        let task_id = pipeline.register_task();
        let src = FileSource::spool("iso.txt", ISO_SAMPLE.as_bytes()).unwrap();

        let processed = pipeline.run(&task_id, src, IngestOptions::default()).await.unwrap();

        let task = pipeline.tracker().get(&task_id).unwrap();
        assert_eq!(
            task.metadata["embedding_model"].as_str(),
            Some("local-feature-hash")
        );
        let confidence = task.metadata["confidence"].as_f64().unwrap();
        assert!((confidence - processed.confidence).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cancel_before_run_is_observed() {
        let pipeline = test_pipeline().await;
        let task_id = pipeline.register_task();
        assert!(pipeline.tracker().request_cancel(&task_id));

        let src = FileSource::spool("iso.txt", ISO_SAMPLE.as_bytes()).unwrap();
        let err = pipeline.run(&task_id, src, IngestOptions::default()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));

        let task = pipeline.tracker().get(&task_id).unwrap();
        assert_eq!(task.state, TaskState::Cancelled);
    }

    #[tokio::test]
    async fn test_reingest_same_document_id_is_idempotent() {
        // Two runs of the same content produce two documents (ids are fresh
        // per run), but a rerun of the storing stage for one id must not
        // duplicate rows. That invariant lives in the store layer; here we
        // assert the pipeline level outcome stays consistent.
        let pipeline = test_pipeline().await;
        for _ in 0..2 {
            let task_id = pipeline.register_task();
            let src = FileSource::spool("iso.txt", ISO_SAMPLE.as_bytes()).unwrap();
            pipeline.run(&task_id, src, IngestOptions::default()).await.unwrap();
        }
        let counts = graph::store_counts(&pipeline.pool).await.unwrap();
        assert_eq!(counts.documents, 2);
    }
}
