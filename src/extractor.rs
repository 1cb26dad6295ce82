//! Structured control extraction.
//!
//! Per-standard rule sets segment document text into control-aligned
//! sections: a heading regex detects control IDs, lines accumulate into the
//! active segment, and table-of-contents dot-leader lines are rejected.
//!
//! A heading whose title is missing or implausibly long is marked ambiguous
//! and refined through the LLM with a fixed JSON schema (one re-prompt on
//! malformed output). When no LLM is configured, or refinement permanently
//! fails, the rule-derived fields stand — extraction never depends on the
//! model being available.

use anyhow::{Context, Result};
use regex::Regex;
use tracing::warn;

use crate::errors::LlmError;
use crate::llm::LlmClient;
use crate::models::DocumentType;

/// Longest heading tail still treated as a proper control title.
const MAX_TITLE_LEN: usize = 140;

/// One control-aligned section of a structured document.
#[derive(Debug, Clone)]
pub struct ControlSegment {
    pub control_id: String,
    pub title: String,
    pub text: String,
    /// Nesting depth derived from the control ID (e.g. `A.5.1.2` → 3).
    pub level: i64,
    pub ambiguous: bool,
}

#[derive(serde::Deserialize)]
struct RefinedControl {
    control_id: String,
    title: String,
}

struct RuleSet {
    doc_type: DocumentType,
    heading: Regex,
}

pub struct StructuredExtractor {
    rules: Vec<RuleSet>,
    toc_line: Regex,
}

impl StructuredExtractor {
    pub fn new() -> Result<Self> {
        let rules = vec![
            RuleSet {
                doc_type: DocumentType::Iso27001,
                heading: Regex::new(r"^\s*(A\.\d{1,2}\.\d{1,2}(?:\.\d{1,2})?)\s*[-–:]?\s*(.*)$")
                    .context("failed to compile ISO 27001 heading regex")?,
            },
            RuleSet {
                doc_type: DocumentType::Nist80053,
                heading: Regex::new(r"^\s*([A-Z]{2}-\d{1,3}(?:\(\d+\))?)\s*[-–:]?\s*(.*)$")
                    .context("failed to compile NIST 800-53 heading regex")?,
            },
            RuleSet {
                doc_type: DocumentType::PciDss,
                // PCI IDs are bare dotted numbers, so a title is required to
                // count as a heading at all.
                heading: Regex::new(r"^\s*(\d{1,2}\.\d{1,2}(?:\.\d{1,2})*)\s+(\S.*)$")
                    .context("failed to compile PCI DSS heading regex")?,
            },
            RuleSet {
                doc_type: DocumentType::Soc2,
                heading: Regex::new(r"^\s*(CC\d\.\d)\s*[-–:]?\s*(.*)$")
                    .context("failed to compile SOC 2 heading regex")?,
            },
        ];

        Ok(Self {
            rules,
            toc_line: Regex::new(r"\.{3,}\s*\d+\s*$")
                .context("failed to compile table-of-contents line regex")?,
        })
    }

    /// Rule-based segmentation only. Deterministic.
    pub fn segment(&self, doc_type: DocumentType, text: &str) -> Vec<ControlSegment> {
        let Some(rules) = self.rules.iter().find(|r| r.doc_type == doc_type) else {
            return Vec::new();
        };

        struct Active {
            control_id: String,
            title: String,
            body_lines: Vec<String>,
        }

        fn finalize(active: Active) -> ControlSegment {
            let body = active.body_lines.join("\n").trim().to_string();
            let heading = if active.title.is_empty() {
                active.control_id.clone()
            } else {
                format!("{} {}", active.control_id, active.title)
            };
            let text = if body.is_empty() {
                heading.clone()
            } else {
                format!("{}\n{}", heading, body)
            };
            let ambiguous = active.title.is_empty() || active.title.len() > MAX_TITLE_LEN;

            // Ambiguous headings fall back to the first body line as title.
            let title = if active.title.is_empty() || active.title.len() > MAX_TITLE_LEN {
                active
                    .body_lines
                    .first()
                    .map(|l| truncate(l, MAX_TITLE_LEN))
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| active.control_id.clone())
            } else {
                active.title.clone()
            };

            ControlSegment {
                level: control_level(&active.control_id),
                control_id: active.control_id,
                title,
                text,
                ambiguous,
            }
        }

        let mut segments = Vec::new();
        let mut current: Option<Active> = None;

        for raw_line in text.lines() {
            let line = raw_line.trim_end();
            if line.trim().is_empty() {
                continue;
            }
            if self.toc_line.is_match(line) {
                continue;
            }

            if let Some(captures) = rules.heading.captures(line) {
                let control_id = captures
                    .get(1)
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default();
                let title = captures
                    .get(2)
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default();

                if !control_id.is_empty() {
                    if let Some(active) = current.take() {
                        segments.push(finalize(active));
                    }
                    current = Some(Active {
                        control_id,
                        title,
                        body_lines: Vec::new(),
                    });
                    continue;
                }
            }

            if let Some(active) = current.as_mut() {
                active.body_lines.push(line.trim().to_string());
            }
        }

        if let Some(active) = current.take() {
            segments.push(finalize(active));
        }

        segments
    }

    /// Full extraction: rule-based segmentation plus LLM refinement of
    /// ambiguous segments when a client is available.
    pub async fn extract(
        &self,
        doc_type: DocumentType,
        text: &str,
        llm: Option<&LlmClient>,
    ) -> Vec<ControlSegment> {
        let mut segments = self.segment(doc_type, text);

        let Some(llm) = llm else {
            return segments;
        };

        for seg in segments.iter_mut().filter(|s| s.ambiguous) {
            match refine_segment(llm, seg).await {
                Ok(()) => seg.ambiguous = false,
                Err(e) => {
                    // Rule-derived fields stand; refinement is best-effort.
                    warn!(control_id = %seg.control_id, error = %e, "control refinement failed");
                }
            }
        }

        segments
    }
}

async fn refine_segment(llm: &LlmClient, seg: &mut ControlSegment) -> Result<(), LlmError> {
    let prompt = format!(
        "You are given one section of a compliance standard. Identify the \
         control it describes.\n\nSection:\n{}\n\n\
         Reply with a JSON object: {{\"control_id\": \"<id>\", \"title\": \"<short title>\"}}",
        truncate(&seg.text, 2000)
    );

    let refined: RefinedControl = llm.complete_json(&prompt).await?;
    if !refined.control_id.trim().is_empty() {
        seg.control_id = refined.control_id.trim().to_string();
    }
    if !refined.title.trim().is_empty() {
        seg.title = truncate(refined.title.trim(), MAX_TITLE_LEN);
    }
    Ok(())
}

/// Depth of a control ID: dot-separated components, parenthesized
/// enhancements count one extra.
fn control_level(control_id: &str) -> i64 {
    let base = control_id.split('.').count() as i64;
    if control_id.contains('(') {
        base + 1
    } else {
        base
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.trim().to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].trim().to_string()
    }
}
