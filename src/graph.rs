//! Graph and vector store primitives over SQLite.
//!
//! All writers go through per-row atomic upserts (`ON CONFLICT ... DO
//! UPDATE`), so the pipeline and the gardener can interleave safely without
//! a cross-operation transaction. Document persistence is idempotent:
//! re-running the storing stage for the same document replaces its rows
//! inside one transaction instead of duplicating them.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::time::Duration;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{
    ControlItem, Document, GraphNode, KnowledgeChunk, NodeKind, QualityReport, Relationship,
    RelationshipType,
};

/// One ranked hit from the vector index.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: String,
    pub document_id: String,
    pub similarity: f64,
    pub text: String,
}

// ============ Node and edge upserts ============

pub async fn upsert_node(pool: &SqlitePool, node: &GraphNode) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO graph_nodes (id, kind, title, domain, norm_key)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            kind = excluded.kind,
            title = excluded.title,
            domain = excluded.domain,
            norm_key = excluded.norm_key
        "#,
    )
    .bind(&node.id)
    .bind(node.kind.as_str())
    .bind(&node.title)
    .bind(&node.domain)
    .bind(&node.norm_key)
    .execute(pool)
    .await?;
    Ok(())
}

/// Edge upsert with bounded retry on a locked database. SQLite reports
/// writer contention as "database is locked"; after the retry budget the
/// conflict is surfaced to the caller.
pub async fn upsert_relationship(pool: &SqlitePool, rel: &Relationship) -> Result<()> {
    let confidence = rel.confidence.clamp(0.0, 1.0);
    let now = chrono::Utc::now().timestamp();

    let mut last_err = None;
    for attempt in 0..3u32 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(50 << attempt)).await;
        }

        let result = sqlx::query(
            r#"
            INSERT INTO relationships (source, target, rel_type, confidence, reasoning, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(source, target, rel_type) DO UPDATE SET
                confidence = excluded.confidence,
                reasoning = excluded.reasoning
            "#,
        )
        .bind(&rel.source)
        .bind(&rel.target)
        .bind(rel.rel_type.as_str())
        .bind(confidence)
        .bind(&rel.reasoning)
        .bind(now)
        .execute(pool)
        .await;

        match result {
            Ok(_) => return Ok(()),
            Err(e) if e.to_string().contains("database is locked") => last_err = Some(e),
            Err(e) => return Err(e.into()),
        }
    }

    Err(anyhow::anyhow!(
        "graph write conflict: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    ))
}

// ============ Document persistence ============

/// Persist one processed document: document row, chunks, control items,
/// embeddings, graph nodes, and MENTIONS edges, in a single transaction.
/// Existing rows for the same document id are replaced first, which makes a
/// rerun of the storing stage idempotent.
pub async fn store_document_bundle(
    pool: &SqlitePool,
    document: &Document,
    chunks: &[KnowledgeChunk],
    controls: &[ControlItem],
    embeddings: &[Option<Vec<f32>>],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
    )
    .bind(&document.id)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "DELETE FROM graph_nodes WHERE id IN (SELECT id FROM chunks WHERE document_id = ?)",
    )
    .bind(&document.id)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "DELETE FROM relationships WHERE source IN (SELECT id FROM chunks WHERE document_id = ?)",
    )
    .bind(&document.id)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "DELETE FROM graph_nodes WHERE id IN (SELECT id FROM control_items WHERE document_id = ?)",
    )
    .bind(&document.id)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "DELETE FROM relationships WHERE source IN (SELECT id FROM control_items WHERE document_id = ?)",
    )
    .bind(&document.id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(&document.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM control_items WHERE document_id = ?")
        .bind(&document.id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO documents (id, file_name, doc_type, confidence, body, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            file_name = excluded.file_name,
            doc_type = excluded.doc_type,
            confidence = excluded.confidence,
            body = excluded.body
        "#,
    )
    .bind(&document.id)
    .bind(&document.file_name)
    .bind(document.doc_type.as_str())
    .bind(document.confidence)
    .bind(&document.body)
    .bind(document.created_at)
    .execute(&mut *tx)
    .await?;

    let domain = document.doc_type.domain();
    let now = chrono::Utc::now().timestamp();

    let doc_node = GraphNode::new(
        document.id.clone(),
        NodeKind::Document,
        &document.file_name,
        domain,
    );
    upsert_node_tx(&mut tx, &doc_node).await?;

    for (chunk, embedding) in chunks.iter().zip(embeddings.iter()) {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, text, hash, control_id) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .bind(&chunk.control_id)
        .execute(&mut *tx)
        .await?;

        if let Some(vec) = embedding {
            sqlx::query(
                "INSERT INTO chunk_vectors (chunk_id, document_id, embedding) VALUES (?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(vec_to_blob(vec))
            .execute(&mut *tx)
            .await?;
        }

        let title = chunk
            .control_id
            .clone()
            .unwrap_or_else(|| format!("{} #{}", document.file_name, chunk.chunk_index));
        let chunk_node = GraphNode::new(chunk.id.clone(), NodeKind::Chunk, &title, domain);
        upsert_node_tx(&mut tx, &chunk_node).await?;
        insert_edge_tx(&mut tx, &chunk.id, &document.id, RelationshipType::Mentions, 1.0, now)
            .await?;
    }

    for control in controls {
        sqlx::query(
            r#"
            INSERT INTO control_items (id, document_id, control_id, title, text, domain, level)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&control.id)
        .bind(&control.document_id)
        .bind(&control.control_id)
        .bind(&control.title)
        .bind(&control.text)
        .bind(&control.domain)
        .bind(control.level)
        .execute(&mut *tx)
        .await?;

        let control_node =
            GraphNode::new(control.id.clone(), NodeKind::Control, &control.title, &control.domain);
        upsert_node_tx(&mut tx, &control_node).await?;
        insert_edge_tx(&mut tx, &control.id, &document.id, RelationshipType::Mentions, 1.0, now)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

async fn upsert_node_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    node: &GraphNode,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO graph_nodes (id, kind, title, domain, norm_key)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            kind = excluded.kind,
            title = excluded.title,
            domain = excluded.domain,
            norm_key = excluded.norm_key
        "#,
    )
    .bind(&node.id)
    .bind(node.kind.as_str())
    .bind(&node.title)
    .bind(&node.domain)
    .bind(&node.norm_key)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_edge_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    source: &str,
    target: &str,
    rel_type: RelationshipType,
    confidence: f64,
    now: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO relationships (source, target, rel_type, confidence, reasoning, created_at)
        VALUES (?, ?, ?, ?, NULL, ?)
        ON CONFLICT(source, target, rel_type) DO UPDATE SET confidence = excluded.confidence
        "#,
    )
    .bind(source)
    .bind(target)
    .bind(rel_type.as_str())
    .bind(confidence)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ============ Graph queries ============

fn row_to_node(row: &sqlx::sqlite::SqliteRow) -> GraphNode {
    GraphNode {
        id: row.get("id"),
        kind: NodeKind::parse(row.get::<String, _>("kind").as_str()).unwrap_or(NodeKind::Entity),
        title: row.get("title"),
        domain: row.get("domain"),
        norm_key: row.get("norm_key"),
    }
}

/// Nodes with zero incident relationships, in either direction.
pub async fn find_orphans(pool: &SqlitePool) -> Result<Vec<GraphNode>> {
    let rows = sqlx::query(
        r#"
        SELECT n.id, n.kind, n.title, n.domain, n.norm_key
        FROM graph_nodes n
        LEFT JOIN relationships r ON r.source = n.id OR r.target = n.id
        WHERE r.source IS NULL
        ORDER BY n.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_node).collect())
}

/// All nodes sharing a `norm_key` with at least one other node, grouped.
/// Groups are symmetric and transitive by construction.
pub async fn duplicate_groups(pool: &SqlitePool) -> Result<Vec<Vec<GraphNode>>> {
    let rows = sqlx::query(
        r#"
        SELECT id, kind, title, domain, norm_key
        FROM graph_nodes
        WHERE norm_key IN (
            SELECT norm_key FROM graph_nodes GROUP BY norm_key HAVING COUNT(*) > 1
        )
        ORDER BY norm_key, id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut groups: HashMap<String, Vec<GraphNode>> = HashMap::new();
    for row in &rows {
        let node = row_to_node(row);
        groups.entry(node.norm_key.clone()).or_default().push(node);
    }

    let mut out: Vec<Vec<GraphNode>> = groups.into_values().collect();
    out.sort_by(|a, b| a[0].norm_key.cmp(&b[0].norm_key));
    Ok(out)
}

/// Same-domain neighbor candidates for orphan repair, excluding the node
/// itself.
pub async fn domain_candidates(
    pool: &SqlitePool,
    node_id: &str,
    domain: &str,
    limit: usize,
) -> Result<Vec<GraphNode>> {
    let rows = sqlx::query(
        r#"
        SELECT id, kind, title, domain, norm_key
        FROM graph_nodes
        WHERE domain = ? AND id != ?
        ORDER BY id
        LIMIT ?
        "#,
    )
    .bind(domain)
    .bind(node_id)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_node).collect())
}

/// Text backing a node, for similarity scoring: chunk/control body where one
/// exists, node title otherwise.
pub async fn node_text(pool: &SqlitePool, node: &GraphNode) -> Result<String> {
    let body: Option<String> = match node.kind {
        NodeKind::Chunk => {
            sqlx::query_scalar("SELECT text FROM chunks WHERE id = ?")
                .bind(&node.id)
                .fetch_optional(pool)
                .await?
        }
        NodeKind::Control => {
            sqlx::query_scalar("SELECT text FROM control_items WHERE id = ?")
                .bind(&node.id)
                .fetch_optional(pool)
                .await?
        }
        NodeKind::Document | NodeKind::Entity => None,
    };

    Ok(body.unwrap_or_else(|| node.title.clone()))
}

/// Incident relationship count for one node.
pub async fn relationship_count_for(pool: &SqlitePool, node_id: &str) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM relationships WHERE source = ? OR target = ?")
            .bind(node_id)
            .bind(node_id)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

// ============ Vector search ============

/// Rank stored chunk vectors against a query embedding; top-k by cosine
/// similarity, ties broken by chunk id for determinism.
pub async fn vector_query(
    pool: &SqlitePool,
    query_vec: &[f32],
    k: usize,
) -> Result<Vec<VectorHit>> {
    let rows = sqlx::query(
        r#"
        SELECT cv.chunk_id, cv.document_id, cv.embedding, c.text
        FROM chunk_vectors cv
        JOIN chunks c ON c.id = cv.chunk_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut hits: Vec<VectorHit> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vec = blob_to_vec(&blob);
            VectorHit {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                similarity: cosine_similarity(query_vec, &vec) as f64,
                text: row.get("text"),
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(k);
    Ok(hits)
}

/// Control items reachable from the given chunks through relationships or a
/// shared control id. Used by the primary path's graph expansion.
pub async fn related_controls(
    pool: &SqlitePool,
    chunk_ids: &[String],
    limit: usize,
) -> Result<Vec<ControlItem>> {
    if chunk_ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; chunk_ids.len()].join(", ");
    let sql = format!(
        r#"
        SELECT DISTINCT ci.id, ci.document_id, ci.control_id, ci.title, ci.text, ci.domain, ci.level
        FROM control_items ci
        WHERE ci.id IN (
            SELECT r.target FROM relationships r WHERE r.source IN ({ph})
            UNION
            SELECT r.source FROM relationships r WHERE r.target IN ({ph})
        )
        OR ci.control_id IN (
            SELECT c.control_id FROM chunks c
            WHERE c.id IN ({ph}) AND c.control_id IS NOT NULL
        )
        ORDER BY ci.control_id
        LIMIT ?
        "#,
        ph = placeholders
    );

    let mut query = sqlx::query(&sql);
    for _ in 0..3 {
        for id in chunk_ids {
            query = query.bind(id);
        }
    }
    query = query.bind(limit as i64);

    let rows = query.fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| ControlItem {
            id: row.get("id"),
            document_id: row.get("document_id"),
            control_id: row.get("control_id"),
            title: row.get("title"),
            text: row.get("text"),
            domain: row.get("domain"),
            level: row.get("level"),
        })
        .collect())
}

// ============ Quality reports ============

pub async fn insert_quality_report(pool: &SqlitePool, report: &QualityReport) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO quality_reports
            (id, orphan_count, duplicate_groups, node_count, relationship_count,
             relationship_density, validation_failures, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&report.id)
    .bind(report.orphan_count)
    .bind(report.duplicate_groups)
    .bind(report.node_count)
    .bind(report.relationship_count)
    .bind(report.relationship_density)
    .bind(report.validation_failures)
    .bind(report.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn latest_quality_report(pool: &SqlitePool) -> Result<Option<QualityReport>> {
    let row = sqlx::query(
        r#"
        SELECT id, orphan_count, duplicate_groups, node_count, relationship_count,
               relationship_density, validation_failures, created_at
        FROM quality_reports
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| QualityReport {
        id: row.get("id"),
        orphan_count: row.get("orphan_count"),
        duplicate_groups: row.get("duplicate_groups"),
        node_count: row.get("node_count"),
        relationship_count: row.get("relationship_count"),
        relationship_density: row.get("relationship_density"),
        validation_failures: row.get("validation_failures"),
        created_at: row.get("created_at"),
    }))
}

/// Store-wide counts used by quality reports and `atlas stats`.
pub struct StoreCounts {
    pub documents: i64,
    pub chunks: i64,
    pub embedded_chunks: i64,
    pub controls: i64,
    pub nodes: i64,
    pub relationships: i64,
}

pub async fn store_counts(pool: &SqlitePool) -> Result<StoreCounts> {
    let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await?;
    let embedded_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(pool)
        .await?;
    let controls: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM control_items")
        .fetch_one(pool)
        .await?;
    let nodes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM graph_nodes")
        .fetch_one(pool)
        .await?;
    let relationships: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM relationships")
        .fetch_one(pool)
        .await?;

    Ok(StoreCounts {
        documents,
        chunks,
        embedded_chunks,
        controls,
        nodes,
        relationships,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate;
    use crate::models::DocumentType;

    async fn test_pool() -> SqlitePool {
        let pool = db::connect_memory().await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    fn node(id: &str, title: &str, domain: &str) -> GraphNode {
        GraphNode::new(id, NodeKind::Entity, title, domain)
    }

    #[tokio::test]
    async fn test_orphan_detection() {
        let pool = test_pool().await;
        upsert_node(&pool, &node("a", "Alpha", "iso27001")).await.unwrap();
        upsert_node(&pool, &node("b", "Beta", "iso27001")).await.unwrap();
        upsert_node(&pool, &node("c", "Gamma", "iso27001")).await.unwrap();

        upsert_relationship(
            &pool,
            &Relationship {
                source: "a".into(),
                target: "b".into(),
                rel_type: RelationshipType::Mentions,
                confidence: 0.9,
                reasoning: None,
            },
        )
        .await
        .unwrap();

        let orphans = find_orphans(&pool).await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, "c");

        // Both endpoints of the edge are non-orphans.
        assert_eq!(relationship_count_for(&pool, "a").await.unwrap(), 1);
        assert_eq!(relationship_count_for(&pool, "b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_groups_share_norm_key() {
        let pool = test_pool().await;
        upsert_node(&pool, &node("a", "Access Control Policy", "iso27001")).await.unwrap();
        upsert_node(&pool, &node("b", "ACCESS  CONTROL policy", "iso27001")).await.unwrap();
        upsert_node(&pool, &node("c", "Access Control Policy", "nist")).await.unwrap();
        upsert_node(&pool, &node("d", "Unique Title", "iso27001")).await.unwrap();

        let groups = duplicate_groups(&pool).await.unwrap();
        assert_eq!(groups.len(), 1);
        let ids: Vec<&str> = groups[0].iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_edge_upsert_is_idempotent() {
        let pool = test_pool().await;
        upsert_node(&pool, &node("a", "Alpha", "general")).await.unwrap();
        upsert_node(&pool, &node("b", "Beta", "general")).await.unwrap();

        let rel = Relationship {
            source: "a".into(),
            target: "b".into(),
            rel_type: RelationshipType::Supports,
            confidence: 0.8,
            reasoning: Some("overlapping scope".into()),
        };
        upsert_relationship(&pool, &rel).await.unwrap();
        upsert_relationship(&pool, &rel).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM relationships")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_confidence_clamped_to_unit_interval() {
        let pool = test_pool().await;
        upsert_node(&pool, &node("a", "Alpha", "general")).await.unwrap();
        upsert_node(&pool, &node("b", "Beta", "general")).await.unwrap();
        upsert_relationship(
            &pool,
            &Relationship {
                source: "a".into(),
                target: "b".into(),
                rel_type: RelationshipType::References,
                confidence: 3.5,
                reasoning: None,
            },
        )
        .await
        .unwrap();

        let stored: f64 = sqlx::query_scalar("SELECT confidence FROM relationships")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!((stored - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_store_bundle_rerun_does_not_duplicate() {
        let pool = test_pool().await;

        let document = Document {
            id: "doc1".into(),
            file_name: "iso.txt".into(),
            doc_type: DocumentType::Iso27001,
            confidence: 0.9,
            body: "body".into(),
            created_at: 0,
        };
        let chunks = vec![KnowledgeChunk {
            id: "ch1".into(),
            document_id: "doc1".into(),
            chunk_index: 0,
            text: "A.5.1 Policies".into(),
            hash: "h".into(),
            control_id: Some("A.5.1".into()),
        }];
        let controls = vec![ControlItem {
            id: "ct1".into(),
            document_id: "doc1".into(),
            control_id: "A.5.1".into(),
            title: "Policies".into(),
            text: "A.5.1 Policies".into(),
            domain: "iso27001".into(),
            level: 3,
        }];
        let embeddings = vec![Some(vec![1.0f32, 0.0])];

        store_document_bundle(&pool, &document, &chunks, &controls, &embeddings)
            .await
            .unwrap();
        store_document_bundle(&pool, &document, &chunks, &controls, &embeddings)
            .await
            .unwrap();

        let counts = store_counts(&pool).await.unwrap();
        assert_eq!(counts.documents, 1);
        assert_eq!(counts.chunks, 1);
        assert_eq!(counts.controls, 1);
        assert_eq!(counts.embedded_chunks, 1);
        // document + chunk + control nodes
        assert_eq!(counts.nodes, 3);
        // chunk→doc and control→doc MENTIONS edges
        assert_eq!(counts.relationships, 2);
    }

    #[tokio::test]
    async fn test_vector_query_orders_by_similarity() {
        let pool = test_pool().await;

        let document = Document {
            id: "doc1".into(),
            file_name: "f.txt".into(),
            doc_type: DocumentType::FreeText,
            confidence: 0.9,
            body: "body".into(),
            created_at: 0,
        };
        let chunks = vec![
            KnowledgeChunk {
                id: "ch1".into(),
                document_id: "doc1".into(),
                chunk_index: 0,
                text: "exact match".into(),
                hash: "h1".into(),
                control_id: None,
            },
            KnowledgeChunk {
                id: "ch2".into(),
                document_id: "doc1".into(),
                chunk_index: 1,
                text: "orthogonal".into(),
                hash: "h2".into(),
                control_id: None,
            },
        ];
        let embeddings = vec![Some(vec![1.0f32, 0.0]), Some(vec![0.0f32, 1.0])];
        store_document_bundle(&pool, &document, &chunks, &[], &embeddings)
            .await
            .unwrap();

        let hits = vector_query(&pool, &[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "ch1");
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[tokio::test]
    async fn test_quality_report_roundtrip_latest() {
        let pool = test_pool().await;
        assert!(latest_quality_report(&pool).await.unwrap().is_none());

        for (i, orphans) in [(1, 5i64), (2, 3i64)] {
            insert_quality_report(
                &pool,
                &QualityReport {
                    id: format!("r{}", i),
                    orphan_count: orphans,
                    duplicate_groups: 0,
                    node_count: 10,
                    relationship_count: 4,
                    relationship_density: 0.4,
                    validation_failures: 0,
                    created_at: i,
                },
            )
            .await
            .unwrap();
        }

        let latest = latest_quality_report(&pool).await.unwrap().unwrap();
        assert_eq!(latest.id, "r2");
        assert_eq!(latest.orphan_count, 3);
    }
}
