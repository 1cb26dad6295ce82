//! Background graph maintenance.
//!
//! Each cycle runs four passes over the store: orphan repair, duplicate
//! grouping, LLM-validated linking of candidate control pairs, and a quality
//! snapshot. Every pass is isolated: a failure in one is logged and counted,
//! never aborts the cycle, and the quality report is written regardless.

use anyhow::Result;
use serde::Deserialize;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::GardenerConfig;
use crate::graph;
use crate::llm::LlmClient;
use crate::models::{GraphNode, QualityReport, Relationship, RelationshipType};

/// Outcome of one maintenance cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    pub orphans_repaired: usize,
    pub orphans_remaining: usize,
    pub duplicate_groups: usize,
    pub links_created: usize,
    pub validation_failures: usize,
}

pub struct GraphGardener {
    pool: SqlitePool,
    config: GardenerConfig,
    llm: Option<LlmClient>,
}

#[derive(Debug, Deserialize)]
struct LinkVerdict {
    relationship: String,
    confidence: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

impl GraphGardener {
    pub fn new(pool: SqlitePool, config: GardenerConfig, llm: Option<LlmClient>) -> Self {
        Self { pool, config, llm }
    }

    /// Run cycles forever at the configured interval. The first cycle runs
    /// one full interval after startup.
    pub async fn run_loop(self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match self.run_cycle().await {
                Ok(outcome) => info!(
                    repaired = outcome.orphans_repaired,
                    remaining = outcome.orphans_remaining,
                    duplicates = outcome.duplicate_groups,
                    links = outcome.links_created,
                    failures = outcome.validation_failures,
                    "gardener cycle finished"
                ),
                Err(e) => warn!(error = %e, "gardener cycle failed"),
            }
        }
    }

    /// One full maintenance cycle. The quality report is appended even when
    /// individual passes fail.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let mut outcome = CycleOutcome::default();

        match self.repair_orphans().await {
            Ok(repaired) => outcome.orphans_repaired = repaired,
            Err(e) => warn!(error = %e, "orphan repair pass failed"),
        }

        match self.link_duplicates().await {
            Ok(groups) => outcome.duplicate_groups = groups,
            Err(e) => warn!(error = %e, "duplicate pass failed"),
        }

        match self.validate_and_link().await {
            Ok((links, failures)) => {
                outcome.links_created = links;
                outcome.validation_failures = failures;
            }
            Err(e) => warn!(error = %e, "validate-and-link pass failed"),
        }

        let report = self.quality_check(&outcome).await?;
        outcome.orphans_remaining = report.orphan_count as usize;
        Ok(outcome)
    }

    /// Connect orphan nodes to their most similar same-domain neighbor when
    /// the similarity clears the configured threshold. Similarity is a
    /// deterministic token-overlap score, so repeated cycles converge instead
    /// of flapping.
    async fn repair_orphans(&self) -> Result<usize> {
        let orphans = graph::find_orphans(&self.pool).await?;
        let mut repaired = 0;

        for orphan in &orphans {
            let candidates = graph::domain_candidates(
                &self.pool,
                &orphan.id,
                &orphan.domain,
                self.config.candidate_limit,
            )
            .await?;
            if candidates.is_empty() {
                continue;
            }

            let orphan_text = graph::node_text(&self.pool, orphan).await?;
            let mut best: Option<(&GraphNode, f64)> = None;
            for candidate in &candidates {
                let candidate_text = graph::node_text(&self.pool, candidate).await?;
                let score = token_overlap(&orphan_text, &candidate_text);
                match best {
                    Some((_, s)) if s >= score => {}
                    _ => best = Some((candidate, score)),
                }
            }

            if let Some((candidate, score)) = best {
                if score >= self.config.orphan_similarity_threshold {
                    graph::upsert_relationship(
                        &self.pool,
                        &Relationship {
                            source: orphan.id.clone(),
                            target: candidate.id.clone(),
                            rel_type: RelationshipType::Mentions,
                            confidence: score,
                            reasoning: Some("token-overlap orphan repair".to_string()),
                        },
                    )
                    .await?;
                    repaired += 1;
                }
            }
        }

        Ok(repaired)
    }

    /// Link every member of a duplicate group to the group's first node with
    /// a SYNONYM_OF edge. Nodes are never deleted; the grouping is additive
    /// and idempotent.
    async fn link_duplicates(&self) -> Result<usize> {
        let groups = graph::duplicate_groups(&self.pool).await?;

        for group in &groups {
            let canonical = &group[0];
            for node in &group[1..] {
                graph::upsert_relationship(
                    &self.pool,
                    &Relationship {
                        source: node.id.clone(),
                        target: canonical.id.clone(),
                        rel_type: RelationshipType::SynonymOf,
                        confidence: 1.0,
                        reasoning: Some("identical normalized title and domain".to_string()),
                    },
                )
                .await?;
            }
        }

        Ok(groups.len())
    }

    /// Ask the LLM to judge unlinked same-domain control pairs. A malformed
    /// or failed verdict skips that pair and is counted; it never stops the
    /// pass.
    async fn validate_and_link(&self) -> Result<(usize, usize)> {
        let Some(llm) = &self.llm else {
            return Ok((0, 0));
        };

        let pairs = self.unlinked_control_pairs().await?;
        let mut links = 0;
        let mut failures = 0;

        for pair in &pairs {
            let prompt = format!(
                "Two compliance controls from the same domain:\n\n\
                 Control 1 ({}): {}\n{}\n\n\
                 Control 2 ({}): {}\n{}\n\n\
                 Decide whether control 1 relates to control 2. Reply with a \
                 JSON object: {{\"relationship\": \"IMPLEMENTS|SUPPORTS|REFERENCES|CONFLICTS|NONE\", \
                 \"confidence\": <0..1>, \"reasoning\": \"<one sentence>\"}}",
                pair.a_control_id,
                pair.a_title,
                truncate(&pair.a_text, 1200),
                pair.b_control_id,
                pair.b_title,
                truncate(&pair.b_text, 1200),
            );

            let verdict: LinkVerdict = match llm.complete_json(&prompt).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        source = %pair.a_id,
                        target = %pair.b_id,
                        error = %e,
                        "link validation failed for pair"
                    );
                    failures += 1;
                    continue;
                }
            };

            let Some(rel_type) = RelationshipType::parse(verdict.relationship.trim()) else {
                if verdict.relationship.trim() != "NONE" {
                    failures += 1;
                }
                continue;
            };
            if verdict.confidence < self.config.link_confidence_threshold {
                continue;
            }

            graph::upsert_relationship(
                &self.pool,
                &Relationship {
                    source: pair.a_id.clone(),
                    target: pair.b_id.clone(),
                    rel_type,
                    confidence: verdict.confidence,
                    reasoning: verdict.reasoning.clone(),
                },
            )
            .await?;
            links += 1;
        }

        Ok((links, failures))
    }

    /// Append a quality snapshot for this cycle.
    async fn quality_check(&self, outcome: &CycleOutcome) -> Result<QualityReport> {
        let counts = graph::store_counts(&self.pool).await?;
        let orphans = graph::find_orphans(&self.pool).await?;
        let groups = graph::duplicate_groups(&self.pool).await?;

        let density = if counts.nodes > 0 {
            counts.relationships as f64 / counts.nodes as f64
        } else {
            0.0
        };

        let report = QualityReport {
            id: Uuid::new_v4().to_string(),
            orphan_count: orphans.len() as i64,
            duplicate_groups: groups.len() as i64,
            node_count: counts.nodes,
            relationship_count: counts.relationships,
            relationship_density: density,
            validation_failures: outcome.validation_failures as i64,
            created_at: chrono::Utc::now().timestamp(),
        };
        graph::insert_quality_report(&self.pool, &report).await?;
        Ok(report)
    }

    /// Same-domain control node pairs with no existing relationship in
    /// either direction, capped at the configured candidate limit.
    async fn unlinked_control_pairs(&self) -> Result<Vec<ControlPair>> {
        let rows = sqlx::query(
            r#"
            SELECT a.id AS a_id, a.control_id AS a_control_id, a.title AS a_title, a.text AS a_text,
                   b.id AS b_id, b.control_id AS b_control_id, b.title AS b_title, b.text AS b_text
            FROM control_items a
            JOIN control_items b ON a.domain = b.domain AND a.id < b.id
            WHERE NOT EXISTS (
                SELECT 1 FROM relationships r
                WHERE (r.source = a.id AND r.target = b.id)
                   OR (r.source = b.id AND r.target = a.id)
            )
            ORDER BY a.id, b.id
            LIMIT ?
            "#,
        )
        .bind(self.config.candidate_limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ControlPair {
                a_id: row.get("a_id"),
                a_control_id: row.get("a_control_id"),
                a_title: row.get("a_title"),
                a_text: row.get("a_text"),
                b_id: row.get("b_id"),
                b_control_id: row.get("b_control_id"),
                b_title: row.get("b_title"),
                b_text: row.get("b_text"),
            })
            .collect())
    }
}

struct ControlPair {
    a_id: String,
    a_control_id: String,
    a_title: String,
    a_text: String,
    b_id: String,
    b_control_id: String,
    b_title: String,
    b_text: String,
}

/// Jaccard overlap of lowercase word sets. 1.0 for identical token sets,
/// 0.0 when nothing is shared or either side is empty.
fn token_overlap(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = tokens(a);
    let set_b: HashSet<String> = tokens(b);
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let shared = set_a.intersection(&set_b).count();
    let total = set_a.union(&set_b).count();
    shared as f64 / total as f64
}

fn tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate;
    use crate::models::NodeKind;

    async fn test_pool() -> SqlitePool {
        let pool = db::connect_memory().await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    fn gardener(pool: SqlitePool) -> GraphGardener {
        GraphGardener::new(pool, GardenerConfig::default(), None)
    }

    async fn add_node(pool: &SqlitePool, id: &str, title: &str, domain: &str) {
        graph::upsert_node(pool, &GraphNode::new(id, NodeKind::Entity, title, domain))
            .await
            .unwrap();
    }

    #[test]
    fn test_token_overlap_extremes() {
        assert!((token_overlap("access control policy", "Access Control Policy") - 1.0).abs() < 1e-9);
        assert_eq!(token_overlap("alpha beta", "gamma delta"), 0.0);
        assert_eq!(token_overlap("", "anything"), 0.0);

        let partial = token_overlap("access control policy", "access control standard");
        assert!(partial > 0.0 && partial < 1.0);
    }

    #[tokio::test]
    async fn test_orphan_repair_links_similar_neighbor() {
        let pool = test_pool().await;
        add_node(&pool, "o1", "user access provisioning policy", "iso27001").await;
        add_node(&pool, "n1", "user access provisioning policy review", "iso27001").await;
        add_node(&pool, "n2", "cryptographic key lifecycle", "iso27001").await;
        // n1 and n2 are linked so only o1 is an orphan.
        graph::upsert_relationship(
            &pool,
            &Relationship {
                source: "n1".into(),
                target: "n2".into(),
                rel_type: RelationshipType::Mentions,
                confidence: 1.0,
                reasoning: None,
            },
        )
        .await
        .unwrap();

        let repaired = gardener(pool.clone()).repair_orphans().await.unwrap();
        assert_eq!(repaired, 1);
        assert!(graph::find_orphans(&pool).await.unwrap().is_empty());
        assert!(graph::relationship_count_for(&pool, "o1").await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_orphan_below_threshold_left_alone() {
        let pool = test_pool().await;
        add_node(&pool, "o1", "completely unrelated topic", "iso27001").await;
        add_node(&pool, "n1", "cryptographic key lifecycle", "iso27001").await;
        add_node(&pool, "n2", "cryptographic key rotation", "iso27001").await;
        graph::upsert_relationship(
            &pool,
            &Relationship {
                source: "n1".into(),
                target: "n2".into(),
                rel_type: RelationshipType::Mentions,
                confidence: 1.0,
                reasoning: None,
            },
        )
        .await
        .unwrap();

        let repaired = gardener(pool.clone()).repair_orphans().await.unwrap();
        assert_eq!(repaired, 0);
        let orphans = graph::find_orphans(&pool).await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, "o1");
    }

    #[tokio::test]
    async fn test_duplicates_get_synonym_edges() {
        let pool = test_pool().await;
        add_node(&pool, "a", "Access Control Policy", "iso27001").await;
        add_node(&pool, "b", "access  control policy", "iso27001").await;
        add_node(&pool, "c", "Key Management", "iso27001").await;

        let groups = gardener(pool.clone()).link_duplicates().await.unwrap();
        assert_eq!(groups, 1);

        let rel_type: String = sqlx::query_scalar(
            "SELECT rel_type FROM relationships WHERE source = 'b' AND target = 'a'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(rel_type, "SYNONYM_OF");
    }

    #[tokio::test]
    async fn test_cycle_appends_quality_report_without_llm() {
        let pool = test_pool().await;
        add_node(&pool, "a", "Alpha", "general").await;
        add_node(&pool, "b", "Beta", "general").await;

        let outcome = gardener(pool.clone()).run_cycle().await.unwrap();
        // No LLM configured: link validation is a no-op, never an error.
        assert_eq!(outcome.links_created, 0);
        assert_eq!(outcome.validation_failures, 0);

        let report = graph::latest_quality_report(&pool).await.unwrap().unwrap();
        assert_eq!(report.node_count, 2);
        assert_eq!(report.orphan_count, 2);
        assert!((report.relationship_density - 0.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_repeated_cycles_are_idempotent() {
        let pool = test_pool().await;
        add_node(&pool, "a", "User Access Review", "iso27001").await;
        add_node(&pool, "b", "user access review", "iso27001").await;

        let g = gardener(pool.clone());
        g.run_cycle().await.unwrap();
        let rels_after_first: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM relationships")
            .fetch_one(&pool)
            .await
            .unwrap();
        g.run_cycle().await.unwrap();
        let rels_after_second: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM relationships")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rels_after_first, rels_after_second);
    }
}
