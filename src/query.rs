//! Query answering with graceful degradation.
//!
//! [`QueryFallbackEngine::answer`] never fails. The primary path uses the
//! LLM for intent classification and answer synthesis over retrieved chunks
//! and their related controls; any failure there drops to the fallback path,
//! plain vector retrieval with a hard confidence cap. An empty store yields
//! an explicit insufficient-information answer instead of an error.

use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::{EmbeddingConfig, RetrievalConfig};
use crate::embedding::{self, EmbeddingProvider};
use crate::graph::{self, VectorHit};
use crate::llm::LlmClient;
use crate::models::{QueryAnswer, QueryMetadata, SourceRef};

/// Below this the answer is an explicit "don't know".
const INSUFFICIENT_CONFIDENCE: f64 = 0.1;
const CACHE_TTL: Duration = Duration::from_secs(60);
const CACHE_MAX_ENTRIES: usize = 256;
const SNIPPET_LEN: usize = 240;

pub struct QueryFallbackEngine {
    pool: SqlitePool,
    config: RetrievalConfig,
    embedder: Box<dyn EmbeddingProvider>,
    llm: Option<LlmClient>,
    cache: Mutex<HashMap<String, (Instant, QueryAnswer)>>,
}

#[derive(Debug, serde::Deserialize)]
struct IntentVerdict {
    intent: String,
}

#[derive(Debug, serde::Deserialize)]
struct SynthesisVerdict {
    answer: String,
    confidence: f64,
}

impl QueryFallbackEngine {
    pub fn new(
        pool: SqlitePool,
        config: RetrievalConfig,
        embedding: &EmbeddingConfig,
        llm: Option<LlmClient>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            pool,
            config,
            embedder: embedding::create_provider(embedding)?,
            llm,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Answer a query. Infallible: every failure mode degrades to a lower
    /// tier instead of surfacing an error.
    pub async fn answer(&self, query: &str, use_cache: bool) -> QueryAnswer {
        let started = Instant::now();
        let query = query.trim();

        if query.is_empty() {
            return insufficient("empty query", false, started);
        }
        if use_cache {
            if let Some(hit) = self.cache_get(query) {
                debug!(query = %query, "query cache hit");
                return hit;
            }
        }

        let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .unwrap_or(0);
        if chunk_count == 0 {
            return insufficient(
                "insufficient information: no documents have been ingested yet",
                false,
                started,
            );
        }

        let hits = match self.retrieve(query).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "retrieval failed");
                return insufficient(
                    "insufficient information: retrieval is unavailable",
                    true,
                    started,
                );
            }
        };
        if hits.is_empty() {
            return insufficient(
                "insufficient information: nothing relevant was found",
                false,
                started,
            );
        }

        let answer = match self.primary(query, &hits, started).await {
            Some(answer) => answer,
            None => self.fallback(&hits, started),
        };

        if use_cache {
            self.cache_put(query, &answer);
        }
        answer
    }

    async fn retrieve(&self, query: &str) -> anyhow::Result<Vec<VectorHit>> {
        let query_vec = embedding::embed_query(self.embedder.as_ref(), query).await?;
        graph::vector_query(&self.pool, &query_vec, self.config.top_k).await
    }

    /// LLM-backed tier: intent classification, graph expansion to related
    /// controls, answer synthesis. Returns None on any failure so the caller
    /// falls back.
    async fn primary(
        &self,
        query: &str,
        hits: &[VectorHit],
        started: Instant,
    ) -> Option<QueryAnswer> {
        let llm = self.llm.as_ref()?;

        let intent_prompt = format!(
            "Classify the intent of this compliance question as one of: \
             lookup, comparison, gap_analysis, explanation.\n\nQuestion: {}\n\n\
             Reply with a JSON object: {{\"intent\": \"<label>\"}}",
            query
        );
        let intent: IntentVerdict = match llm.complete_json(&intent_prompt).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "intent classification failed, using fallback path");
                return None;
            }
        };

        let chunk_ids: Vec<String> = hits.iter().map(|h| h.chunk_id.clone()).collect();
        let controls = match graph::related_controls(&self.pool, &chunk_ids, 10).await {
            Ok(controls) => controls,
            Err(e) => {
                warn!(error = %e, "graph expansion failed, using fallback path");
                return None;
            }
        };

        let mut context = String::new();
        for hit in hits {
            context.push_str(&format!("[chunk {}]\n{}\n\n", hit.chunk_id, hit.text));
        }
        for control in &controls {
            context.push_str(&format!(
                "[control {}] {}\n{}\n\n",
                control.control_id, control.title, control.text
            ));
        }

        let synthesis_prompt = format!(
            "Answer the compliance question using only the context below. \
             Intent: {}.\n\nContext:\n{}\nQuestion: {}\n\n\
             Reply with a JSON object: \
             {{\"answer\": \"<answer>\", \"confidence\": <0..1>}}",
            intent.intent, context, query
        );
        let verdict: SynthesisVerdict = match llm.complete_json(&synthesis_prompt).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "answer synthesis failed, using fallback path");
                return None;
            }
        };

        let confidence = verdict
            .confidence
            .clamp(0.0, self.config.primary_confidence_ceiling);
        Some(QueryAnswer {
            response: verdict.answer,
            sources: sources_from(hits),
            confidence,
            metadata: QueryMetadata {
                processing_time_ms: started.elapsed().as_millis() as u64,
                fallback_used: false,
                intent: Some(intent.intent),
            },
        })
    }

    /// Retrieval-only tier. Confidence is the top similarity, hard-capped so
    /// a fallback answer can never outrank a primary one.
    fn fallback(&self, hits: &[VectorHit], started: Instant) -> QueryAnswer {
        let top = hits[0].similarity.max(0.0);
        let confidence = top.min(self.config.fallback_confidence_cap);

        let mut response = String::from("Most relevant passages:\n");
        for (i, hit) in hits.iter().enumerate() {
            response.push_str(&format!("{}. {}\n", i + 1, snippet(&hit.text)));
        }

        QueryAnswer {
            response,
            sources: sources_from(hits),
            confidence,
            metadata: QueryMetadata {
                processing_time_ms: started.elapsed().as_millis() as u64,
                fallback_used: true,
                intent: None,
            },
        }
    }

    fn cache_get(&self, query: &str) -> Option<QueryAnswer> {
        let cache = self.cache.lock().expect("query cache poisoned");
        cache.get(query).and_then(|(at, answer)| {
            (at.elapsed() < CACHE_TTL).then(|| answer.clone())
        })
    }

    fn cache_put(&self, query: &str, answer: &QueryAnswer) {
        let mut cache = self.cache.lock().expect("query cache poisoned");
        if cache.len() >= CACHE_MAX_ENTRIES {
            cache.retain(|_, (at, _)| at.elapsed() < CACHE_TTL);
            if cache.len() >= CACHE_MAX_ENTRIES {
                cache.clear();
            }
        }
        cache.insert(query.to_string(), (Instant::now(), answer.clone()));
    }
}

fn sources_from(hits: &[VectorHit]) -> Vec<SourceRef> {
    hits.iter()
        .map(|hit| SourceRef {
            chunk_id: hit.chunk_id.clone(),
            document_id: hit.document_id.clone(),
            score: hit.similarity,
            snippet: snippet(&hit.text),
        })
        .collect()
}

fn snippet(text: &str) -> String {
    let trimmed = text.trim().replace('\n', " ");
    match trimmed.char_indices().nth(SNIPPET_LEN) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed,
    }
}

fn insufficient(message: &str, fallback_used: bool, started: Instant) -> QueryAnswer {
    QueryAnswer {
        response: message.to_string(),
        sources: Vec::new(),
        confidence: INSUFFICIENT_CONFIDENCE,
        metadata: QueryMetadata {
            processing_time_ms: started.elapsed().as_millis() as u64,
            fallback_used,
            intent: None,
        },
    }
}
