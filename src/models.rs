//! Core data models used throughout Compliance Atlas.
//!
//! These types represent the documents, chunks, control items, graph nodes,
//! and task records that flow through the ingestion pipeline, the gardener,
//! and the query engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Detected (or forced) type of an ingested document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Iso27001,
    Nist80053,
    PciDss,
    Soc2,
    FreeText,
}

impl DocumentType {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Iso27001 => "iso_27001",
            DocumentType::Nist80053 => "nist_800_53",
            DocumentType::PciDss => "pci_dss",
            DocumentType::Soc2 => "soc_2",
            DocumentType::FreeText => "free_text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "iso_27001" => Some(DocumentType::Iso27001),
            "nist_800_53" => Some(DocumentType::Nist80053),
            "pci_dss" => Some(DocumentType::PciDss),
            "soc_2" => Some(DocumentType::Soc2),
            "free_text" => Some(DocumentType::FreeText),
            _ => None,
        }
    }

    /// Structured standards get the control-aligned chunking path.
    pub fn is_structured(self) -> bool {
        !matches!(self, DocumentType::FreeText)
    }

    /// Compliance domain label used for grouping and orphan-repair candidate
    /// selection.
    pub fn domain(self) -> &'static str {
        match self {
            DocumentType::Iso27001 => "iso27001",
            DocumentType::Nist80053 => "nist",
            DocumentType::PciDss => "pci",
            DocumentType::Soc2 => "soc2",
            DocumentType::FreeText => "general",
        }
    }
}

/// Classifier output: a document type plus a confidence in [0, 1].
#[derive(Debug, Clone, Copy)]
pub struct Classification {
    pub doc_type: DocumentType,
    pub confidence: f64,
}

/// Normalized document stored in SQLite. Immutable once classified.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub file_name: String,
    pub doc_type: DocumentType,
    pub confidence: f64,
    pub body: String,
    pub created_at: i64,
}

/// Lifecycle state of an ingestion task.
///
/// Non-terminal states map to the pipeline stages; `Completed`, `Failed`,
/// and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Loading,
    Classifying,
    Extracting,
    Validating,
    Chunking,
    Storing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Fixed progress checkpoint reported when this state is entered.
    pub fn checkpoint(self) -> f64 {
        match self {
            TaskState::Loading => 0.10,
            TaskState::Classifying => 0.20,
            TaskState::Extracting => 0.40,
            TaskState::Validating => 0.50,
            TaskState::Chunking => 0.60,
            TaskState::Storing => 0.80,
            TaskState::Completed => 1.0,
            TaskState::Failed | TaskState::Cancelled => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Loading => "LOADING",
            TaskState::Classifying => "CLASSIFYING",
            TaskState::Extracting => "EXTRACTING",
            TaskState::Validating => "VALIDATING",
            TaskState::Chunking => "CHUNKING",
            TaskState::Storing => "STORING",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
            TaskState::Cancelled => "CANCELLED",
        }
    }
}

/// In-memory record of one ingestion task, owned by the tracker.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingTask {
    pub task_id: String,
    pub state: TaskState,
    pub progress: f64,
    pub current_operation: String,
    pub metadata: serde_json::Value,
    pub error: Option<String>,
    #[serde(skip)]
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An ordered text unit belonging to exactly one document. Written once at
/// the storing stage, immutable afterward.
#[derive(Debug, Clone)]
pub struct KnowledgeChunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
    /// Set on the structured chunking path when the chunk is aligned to a
    /// single control.
    pub control_id: Option<String>,
}

/// An extracted compliance requirement.
#[derive(Debug, Clone)]
pub struct ControlItem {
    pub id: String,
    pub document_id: String,
    pub control_id: String,
    pub title: String,
    pub text: String,
    pub domain: String,
    pub level: i64,
}

/// Kind discriminator for graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Document,
    Chunk,
    Control,
    Entity,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Document => "document",
            NodeKind::Chunk => "chunk",
            NodeKind::Control => "control",
            NodeKind::Entity => "entity",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document" => Some(NodeKind::Document),
            "chunk" => Some(NodeKind::Chunk),
            "control" => Some(NodeKind::Control),
            "entity" => Some(NodeKind::Entity),
            _ => None,
        }
    }
}

/// A node in the knowledge graph. `norm_key` is the normalized
/// `(title, domain)` identity used for duplicate grouping.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    pub title: String,
    pub domain: String,
    pub norm_key: String,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, kind: NodeKind, title: &str, domain: &str) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.to_string(),
            domain: domain.to_string(),
            norm_key: normalized_key(title, domain),
        }
    }
}

/// Normalized `(title, domain)` key: lowercased, whitespace collapsed.
pub fn normalized_key(title: &str, domain: &str) -> String {
    let title_norm = title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    format!("{}::{}", domain.to_lowercase(), title_norm)
}

/// Typed edge label between two graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Mentions,
    Implements,
    Supports,
    References,
    Conflicts,
    SynonymOf,
}

impl RelationshipType {
    pub fn as_str(self) -> &'static str {
        match self {
            RelationshipType::Mentions => "MENTIONS",
            RelationshipType::Implements => "IMPLEMENTS",
            RelationshipType::Supports => "SUPPORTS",
            RelationshipType::References => "REFERENCES",
            RelationshipType::Conflicts => "CONFLICTS",
            RelationshipType::SynonymOf => "SYNONYM_OF",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MENTIONS" => Some(RelationshipType::Mentions),
            "IMPLEMENTS" => Some(RelationshipType::Implements),
            "SUPPORTS" => Some(RelationshipType::Supports),
            "REFERENCES" => Some(RelationshipType::References),
            "CONFLICTS" => Some(RelationshipType::Conflicts),
            "SYNONYM_OF" => Some(RelationshipType::SynonymOf),
            _ => None,
        }
    }
}

/// A typed, scored edge. `confidence` is always in [0, 1].
#[derive(Debug, Clone)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    pub rel_type: RelationshipType,
    pub confidence: f64,
    pub reasoning: Option<String>,
}

/// Snapshot of graph health produced by one gardener cycle. Append-only.
#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub id: String,
    pub orphan_count: i64,
    pub duplicate_groups: i64,
    pub node_count: i64,
    pub relationship_count: i64,
    /// Relationships per node; 0.0 on an empty graph.
    pub relationship_density: f64,
    /// Per-candidate LLM validation failures isolated during the cycle.
    pub validation_failures: i64,
    pub created_at: i64,
}

/// Final result of a successful ingestion run.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedDocument {
    pub document_id: String,
    pub task_id: String,
    pub doc_type: DocumentType,
    pub confidence: f64,
    pub num_chunks: usize,
    pub num_controls: usize,
}

/// One retrieved source backing a query answer.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub chunk_id: String,
    pub document_id: String,
    pub score: f64,
    pub snippet: String,
}

/// Metadata attached to every query answer.
#[derive(Debug, Clone, Serialize)]
pub struct QueryMetadata {
    pub processing_time_ms: u64,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
}

/// Structured query result. The engine always returns one of these,
/// degrading confidence rather than failing.
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    pub response: String,
    pub sources: Vec<SourceRef>,
    pub confidence: f64,
    pub metadata: QueryMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_key_collapses_case_and_whitespace() {
        assert_eq!(
            normalized_key("Access  Control\tPolicy", "ISO27001"),
            "iso27001::access control policy"
        );
        assert_eq!(
            normalized_key("access control policy", "iso27001"),
            normalized_key("ACCESS CONTROL  POLICY", "iso27001")
        );
    }

    #[test]
    fn test_task_state_checkpoints_monotone() {
        let order = [
            TaskState::Loading,
            TaskState::Classifying,
            TaskState::Extracting,
            TaskState::Validating,
            TaskState::Chunking,
            TaskState::Storing,
            TaskState::Completed,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].checkpoint() <= pair[1].checkpoint());
        }
    }

    #[test]
    fn test_relationship_type_roundtrip() {
        for rel in [
            RelationshipType::Mentions,
            RelationshipType::Implements,
            RelationshipType::Supports,
            RelationshipType::References,
            RelationshipType::Conflicts,
            RelationshipType::SynonymOf,
        ] {
            assert_eq!(RelationshipType::parse(rel.as_str()), Some(rel));
        }
    }

    #[test]
    fn test_document_type_parse() {
        assert_eq!(
            DocumentType::parse("iso_27001"),
            Some(DocumentType::Iso27001)
        );
        assert_eq!(DocumentType::parse("nope"), None);
        assert!(DocumentType::Iso27001.is_structured());
        assert!(!DocumentType::FreeText.is_structured());
    }
}
