//! Summary distillation: raw search results -> fact-dense summary units.
//!
//! Every fact the model emits must trace to a URL that actually appeared
//! in the directive's raw results; anything else is dropped, never
//! repaired or invented. A directive with no usable results yields a
//! gap-flagged unit rather than an error: gaps are surfaced downstream,
//! not hidden here.

use crate::backend::{ModelBackend, StructuredRequest, complete_structured};
use crate::config::{BackendConfig, SummarizerConfig};
use crate::types::{DistilledFact, RawResult, SearchDirective, SummaryUnit};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

const SUMMARIZER_SYSTEM: &str = "\
You are a senior research analyst distilling raw web search results. \
Extract 3-5 key facts: prioritize numbers, dates, and named entities; \
distinguish facts from opinions; skip marketing fluff. Every fact must \
cite the source_url of the result it was drawn from; never invent a \
fact or a URL, and if the results do not support a fact, leave it out. \
If the results are thin or contradictory, say so in coverage_note. \
Respond with strict JSON: {\"facts\": [{\"fact_text\": \"...\", \
\"source_url\": \"...\"}], \"coverage_note\": null}";

/// Distillation draft as emitted by the model, before grounding checks.
#[derive(Debug, Deserialize)]
struct SummaryDraft {
    #[serde(default)]
    facts: Vec<FactDraft>,
    #[serde(default)]
    coverage_note: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FactDraft {
    fact_text: String,
    #[serde(default)]
    source_url: String,
}

/// Reduces one directive's raw results into a grounded [`SummaryUnit`].
pub struct Summarizer {
    backend: Arc<dyn ModelBackend>,
    config: SummarizerConfig,
    max_tokens: usize,
    temperature: f64,
}

impl Summarizer {
    /// Create a summarizer over the given backend.
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        config: SummarizerConfig,
        backend_config: &BackendConfig,
    ) -> Self {
        Self {
            backend,
            config,
            max_tokens: backend_config.max_tokens,
            temperature: backend_config.temperature,
        }
    }

    /// Distill `results` into a summary unit for `directive`.
    ///
    /// Never fails the run: a failed model call or fully ungrounded output
    /// degrades to a gap-flagged unit.
    pub async fn summarize(
        &self,
        directive: &SearchDirective,
        results: &[RawResult],
    ) -> SummaryUnit {
        if results.is_empty() {
            return SummaryUnit::gap(
                directive.id,
                format!("no search results for '{}'", directive.query_text),
            );
        }

        let request = StructuredRequest {
            system: SUMMARIZER_SYSTEM.to_string(),
            prompt: self.build_prompt(directive, results),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let draft: SummaryDraft = match complete_structured(&self.backend, request).await {
            Ok(draft) => draft,
            Err(e) => {
                warn!(directive = %directive.id, error = %e, "Distillation failed, recording gap");
                return SummaryUnit::gap(
                    directive.id,
                    format!("distillation failed for '{}': {e}", directive.query_text),
                );
            }
        };

        let known_urls: HashSet<&str> = results.iter().map(|r| r.url.as_str()).collect();
        let mut dropped = 0usize;
        let distilled_facts: Vec<DistilledFact> = draft
            .facts
            .into_iter()
            .filter_map(|fact| {
                let fact_text = fact.fact_text.trim().to_string();
                if fact_text.is_empty() || !known_urls.contains(fact.source_url.as_str()) {
                    dropped += 1;
                    return None;
                }
                Some(DistilledFact {
                    fact_text,
                    source_url: fact.source_url,
                })
            })
            .collect();

        if dropped > 0 {
            warn!(
                directive = %directive.id,
                dropped,
                kept = distilled_facts.len(),
                "Dropped facts without a traceable source"
            );
        }

        if distilled_facts.is_empty() {
            return SummaryUnit::gap(
                directive.id,
                format!(
                    "no grounded facts could be distilled for '{}'",
                    directive.query_text
                ),
            );
        }

        debug!(directive = %directive.id, facts = distilled_facts.len(), "Summary unit ready");
        SummaryUnit {
            directive_id: directive.id,
            distilled_facts,
            coverage_note: draft.coverage_note.filter(|n| !n.trim().is_empty()),
        }
    }

    fn build_prompt(&self, directive: &SearchDirective, results: &[RawResult]) -> String {
        let mut body = format!(
            "Search query: {}\nIntent: {}\n\nResults:\n",
            directive.query_text, directive.intent
        );
        for result in results {
            body.push_str(&format!(
                "- [{}] {}\n  {}\n",
                result.url, result.title, result.snippet
            ));
        }
        clamp_chars(&body, self.config.max_input_chars)
    }
}

/// Truncate to at most `max` characters on a char boundary.
fn clamp_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}
