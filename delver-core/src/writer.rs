//! Report synthesis: summary units -> one cited, structured report.
//!
//! The model drafts the prose; everything verifiable is checked here.
//! Sections are validated against the mandatory category list, every
//! citation marker must point into the numbered source list built from
//! the input units, and the confidence score is computed from coverage;
//! it is never the model's opinion.

use crate::backend::{ModelBackend, StructuredRequest, complete_structured};
use crate::config::{BackendConfig, WriterConfig};
use crate::error::SynthesisError;
use crate::types::{Report, ReportSection, SearchPlan, SummaryUnit};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Headings the report must carry, one section each, in this order.
pub const MANDATORY_SECTIONS: [&str; 5] = [
    "Definition",
    "Mechanism",
    "Application",
    "Limitations",
    "Outlook",
];

const WRITER_SYSTEM: &str = "\
You are a research director writing a publication-quality report from \
distilled research summaries. Structure the report with exactly these \
section headings, in order: Definition, Mechanism, Application, \
Limitations, Outlook. Support every factual claim with a citation marker \
[n] referring to the numbered source list; never cite a number that is \
not in the list. Where the research left a coverage gap, state the gap \
plainly (the Limitations section must mention any flagged gaps) instead \
of inventing content. Also produce a clear title and the most significant \
key findings. Respond with strict JSON: {\"title\": \"...\", \
\"sections\": [{\"heading\": \"...\", \"body_markdown\": \"...\"}], \
\"key_findings\": [\"...\"]}";

/// Report draft as emitted by the model, before validation.
#[derive(Debug, Deserialize)]
struct ReportDraft {
    #[serde(default)]
    title: String,
    #[serde(default)]
    sections: Vec<SectionDraft>,
    #[serde(default)]
    key_findings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SectionDraft {
    heading: String,
    body_markdown: String,
}

/// Merges summary units into a validated [`Report`].
pub struct ReportWriter {
    backend: Arc<dyn ModelBackend>,
    config: WriterConfig,
    max_tokens: usize,
    temperature: f64,
}

impl ReportWriter {
    /// Create a writer over the given backend.
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        config: WriterConfig,
        backend_config: &BackendConfig,
    ) -> Self {
        Self {
            backend,
            config,
            max_tokens: backend_config.max_tokens,
            temperature: backend_config.temperature,
        }
    }

    /// Synthesize the final report for `topic` from the full unit set.
    pub async fn synthesize(
        &self,
        topic: &str,
        plan: &SearchPlan,
        units: &[SummaryUnit],
    ) -> Result<Report, SynthesisError> {
        let sources = collect_sources(units);

        let request = StructuredRequest {
            system: WRITER_SYSTEM.to_string(),
            prompt: self.build_prompt(topic, plan, units, &sources),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let draft: ReportDraft = complete_structured(&self.backend, request).await?;

        let sections = validate_sections(draft.sections)?;
        let citations = collect_citations(&sections, &sources)?;

        let grounded_units = units.iter().filter(|u| u.has_facts()).count();
        let planned = plan.len().max(1);
        let confidence_score = (grounded_units as f64 / planned as f64).clamp(0.0, 1.0);

        let title = if draft.title.trim().is_empty() {
            warn!("Draft had no title, falling back to topic");
            topic.to_string()
        } else {
            draft.title.trim().to_string()
        };

        info!(
            sections = sections.len(),
            citations = citations.len(),
            confidence = confidence_score,
            "Report synthesized"
        );
        Ok(Report {
            title,
            sections,
            citations,
            confidence_score,
            key_findings: draft.key_findings,
        })
    }

    fn build_prompt(
        &self,
        topic: &str,
        plan: &SearchPlan,
        units: &[SummaryUnit],
        sources: &[String],
    ) -> String {
        let mut body = format!("Research topic: {topic}\n\nNumbered sources:\n");
        for (i, url) in sources.iter().enumerate() {
            body.push_str(&format!("[{}] {url}\n", i + 1));
        }

        body.push_str("\nResearch summaries:\n");
        for unit in units {
            let query = plan
                .directive(&unit.directive_id)
                .map(|d| d.query_text.as_str())
                .unwrap_or("(unknown directive)");
            body.push_str(&format!("\n### {query}\n"));
            for fact in &unit.distilled_facts {
                let index = sources
                    .iter()
                    .position(|url| url == &fact.source_url)
                    .map(|p| p + 1)
                    .unwrap_or(0);
                body.push_str(&format!("- {} [{index}]\n", fact.fact_text));
            }
            if let Some(ref note) = unit.coverage_note {
                body.push_str(&format!("- COVERAGE GAP: {note}\n"));
            }
        }

        clamp_chars(&body, self.config.max_input_chars)
    }
}

/// First-seen-ordered unique source URLs across all unit facts.
fn collect_sources(units: &[SummaryUnit]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for unit in units {
        for fact in &unit.distilled_facts {
            if !sources.contains(&fact.source_url) {
                sources.push(fact.source_url.clone());
            }
        }
    }
    sources
}

/// Check mandatory coverage and drop duplicate mandatory headings.
fn validate_sections(drafts: Vec<SectionDraft>) -> Result<Vec<ReportSection>, SynthesisError> {
    let mut sections: Vec<ReportSection> = Vec::new();
    for draft in drafts {
        let heading = draft.heading.trim().to_string();
        let duplicate_mandatory = MANDATORY_SECTIONS
            .iter()
            .any(|m| heading.eq_ignore_ascii_case(m))
            && sections
                .iter()
                .any(|s| s.heading.eq_ignore_ascii_case(&heading));
        if duplicate_mandatory {
            debug!(heading = %heading, "Dropping duplicate mandatory section");
            continue;
        }
        sections.push(ReportSection {
            heading,
            body_markdown: draft.body_markdown,
        });
    }

    for mandatory in MANDATORY_SECTIONS {
        if !sections.iter().any(|s| s.heading.eq_ignore_ascii_case(mandatory)) {
            return Err(SynthesisError::MissingSection {
                heading: mandatory.to_string(),
            });
        }
    }
    Ok(sections)
}

/// Resolve every `[n]` marker against the source list.
///
/// Returns the citation map restricted to indices actually cited; an
/// index outside the list is a fabricated citation and fails synthesis.
fn collect_citations(
    sections: &[ReportSection],
    sources: &[String],
) -> Result<BTreeMap<usize, String>, SynthesisError> {
    let marker = Regex::new(r"\[(\d+)\]").unwrap();
    let mut citations = BTreeMap::new();
    for section in sections {
        for capture in marker.captures_iter(&section.body_markdown) {
            let Ok(index) = capture[1].parse::<usize>() else {
                continue;
            };
            if index == 0 || index > sources.len() {
                return Err(SynthesisError::FabricatedCitation { index });
            }
            citations.insert(index, sources[index - 1].clone());
        }
    }
    Ok(citations)
}

/// Truncate to at most `max` characters on a char boundary.
fn clamp_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}
