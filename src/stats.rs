//! Store statistics and health overview.
//!
//! Quick summary of what's ingested: document, chunk, and control counts,
//! embedding coverage, graph shape, and the latest gardener report. Used by
//! `atlas stats` to give confidence that ingestion and maintenance are
//! working as expected.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::graph;

/// Per-document-type breakdown.
struct TypeStats {
    doc_type: String,
    doc_count: i64,
    chunk_count: i64,
    control_count: i64,
}

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let counts = graph::store_counts(&pool).await?;
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Compliance Atlas — Store Stats");
    println!("==============================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!("  Documents:     {}", counts.documents);
    println!("  Chunks:        {}", counts.chunks);
    println!(
        "  Embedded:      {} / {} ({}%)",
        counts.embedded_chunks,
        counts.chunks,
        if counts.chunks > 0 {
            (counts.embedded_chunks * 100) / counts.chunks
        } else {
            0
        }
    );
    println!("  Controls:      {}", counts.controls);
    println!("  Graph nodes:   {}", counts.nodes);
    println!("  Relationships: {}", counts.relationships);

    let type_rows = sqlx::query(
        r#"
        SELECT
            d.doc_type,
            COUNT(DISTINCT d.id) AS doc_count,
            COUNT(DISTINCT c.id) AS chunk_count,
            COUNT(DISTINCT ci.id) AS control_count
        FROM documents d
        LEFT JOIN chunks c ON c.document_id = d.id
        LEFT JOIN control_items ci ON ci.document_id = d.id
        GROUP BY d.doc_type
        ORDER BY doc_count DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    if !type_rows.is_empty() {
        println!();
        println!("  By document type:");
        for row in &type_rows {
            let stats = TypeStats {
                doc_type: row.get("doc_type"),
                doc_count: row.get("doc_count"),
                chunk_count: row.get("chunk_count"),
                control_count: row.get("control_count"),
            };
            println!(
                "    {:<12} {} docs, {} chunks, {} controls",
                stats.doc_type, stats.doc_count, stats.chunk_count, stats.control_count
            );
        }
    }

    if let Some(report) = graph::latest_quality_report(&pool).await? {
        println!();
        println!("  Latest quality report:");
        println!("    Orphans:            {}", report.orphan_count);
        println!("    Duplicate groups:   {}", report.duplicate_groups);
        println!(
            "    Density:            {:.2} relationships/node",
            report.relationship_density
        );
        println!("    Validation errors:  {}", report.validation_failures);
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    match bytes {
        b if b >= GB => format!("{:.1} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.1} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.1} KB", b as f64 / KB as f64),
        b => format!("{} B", b),
    }
}
