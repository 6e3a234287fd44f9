//! Core data model for the research pipeline.
//!
//! Every entity flows strictly downstream: the planner owns the plan until
//! it is handed to the executor, the executor owns raw results until they
//! reach the summarizer, and so on. Nothing here is mutated after creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Why a search query was planned. The first five categories form the
/// mandatory coverage checklist every plan must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    /// Definitional / background material.
    Background,
    /// How the subject works under the hood.
    Mechanism,
    /// Practical, real-world application.
    Application,
    /// Known limitations and risks.
    Risk,
    /// Recent developments and outlook.
    RecentDevelopment,
    /// Head-to-head comparison with alternatives.
    Comparison,
    /// Anything else the model proposes.
    #[serde(other)]
    General,
}

impl IntentCategory {
    /// The categories a plan must cover, in report order.
    pub const MANDATORY: [IntentCategory; 5] = [
        IntentCategory::Background,
        IntentCategory::Mechanism,
        IntentCategory::Application,
        IntentCategory::Risk,
        IntentCategory::RecentDevelopment,
    ];
}

impl std::fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IntentCategory::Background => "background",
            IntentCategory::Mechanism => "mechanism",
            IntentCategory::Application => "application",
            IntentCategory::Risk => "risk",
            IntentCategory::RecentDevelopment => "recent_development",
            IntentCategory::Comparison => "comparison",
            IntentCategory::General => "general",
        };
        write!(f, "{s}")
    }
}

/// One planned search query. Immutable once the plan is produced; the id
/// carries traceability through every later stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchDirective {
    /// Unique identifier within the plan.
    pub id: Uuid,
    /// The query to send to the search provider.
    pub query_text: String,
    /// Why this query was planned.
    pub intent: IntentCategory,
}

/// An ordered set of search directives for one topic.
///
/// Order reflects intended coverage breadth, not execution order;
/// execution is concurrent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPlan {
    /// The research topic this plan covers.
    pub topic: String,
    /// The planned directives. All ids are unique.
    pub directives: Vec<SearchDirective>,
}

impl SearchPlan {
    /// Look up a directive by id.
    pub fn directive(&self, id: &Uuid) -> Option<&SearchDirective> {
        self.directives.iter().find(|d| d.id == *id)
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }
}

/// One retrieved search result, owned by exactly one directive's result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResult {
    /// Result title as returned by the provider.
    pub title: String,
    /// Source URL.
    pub url: String,
    /// Text snippet from the result.
    pub snippet: String,
    /// Position in the provider's ranking (0 = top).
    pub source_rank: u32,
}

/// A single distilled fact with its source attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistilledFact {
    /// The fact, stated densely.
    pub fact_text: String,
    /// URL of the raw result this fact was drawn from. Never empty.
    pub source_url: String,
}

/// Fact-dense distillation of one directive's raw results.
///
/// A directive that failed upstream still yields a unit: no facts, and a
/// coverage note flagging the gap. Gaps are surfaced, not hidden.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryUnit {
    /// The directive these facts answer.
    pub directive_id: Uuid,
    /// Distilled facts, each with source attribution.
    pub distilled_facts: Vec<DistilledFact>,
    /// Set when coverage for this directive is missing or degraded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_note: Option<String>,
}

impl SummaryUnit {
    /// A unit recording that a directive produced no usable facts.
    pub fn gap(directive_id: Uuid, note: impl Into<String>) -> Self {
        Self {
            directive_id,
            distilled_facts: Vec::new(),
            coverage_note: Some(note.into()),
        }
    }

    /// Whether this unit contributed any grounded facts.
    pub fn has_facts(&self) -> bool {
        !self.distilled_facts.is_empty()
    }
}

/// One section of the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSection {
    /// Section heading.
    pub heading: String,
    /// Section body in Markdown; factual claims carry `[n]` citation markers.
    pub body_markdown: String,
}

/// The terminal artifact of a research run. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Report title.
    pub title: String,
    /// Ordered sections; includes one per mandatory category.
    pub sections: Vec<ReportSection>,
    /// Citation index -> source URL. Every index referenced in a section
    /// body is present here, and every URL traces to an input summary unit.
    pub citations: BTreeMap<usize, String>,
    /// Ratio of directives that produced non-empty summaries to directives
    /// planned. A declared formula, not a model guess.
    pub confidence_score: f64,
    /// The most significant findings, in order.
    pub key_findings: Vec<String>,
}

impl Report {
    /// Render the report as a single Markdown document.
    pub fn to_markdown(&self) -> String {
        let mut out = format!("# {}\n\n", self.title);

        if !self.key_findings.is_empty() {
            out.push_str("## Key Findings\n\n");
            for finding in &self.key_findings {
                out.push_str(&format!("- {finding}\n"));
            }
            out.push('\n');
        }

        for section in &self.sections {
            out.push_str(&format!("## {}\n\n{}\n\n", section.heading, section.body_markdown));
        }

        if !self.citations.is_empty() {
            out.push_str("## Sources\n\n");
            for (index, url) in &self.citations {
                out.push_str(&format!("[{index}] {url}\n"));
            }
            out.push('\n');
        }

        out.push_str(&format!(
            "---\n**Confidence:** {:.0}%\n",
            self.confidence_score * 100.0
        ));
        out
    }
}

/// Accumulated collaborator spend for one run.
///
/// Per-call cost estimates come from configuration; the ledger only counts
/// and sums.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    /// Number of model backend calls issued.
    pub model_calls: u64,
    /// Number of external search provider calls issued (cache misses only).
    pub search_calls: u64,
    /// Estimated total spend in USD.
    pub estimated_usd: f64,
}

impl CostSummary {
    /// Record one model call at the given estimated cost.
    pub fn add_model_call(&mut self, cost_usd: f64) {
        self.model_calls += 1;
        self.estimated_usd += cost_usd;
    }

    /// Record one external search call.
    pub fn add_search_call(&mut self) {
        self.search_calls += 1;
    }
}

/// The envelope returned by a successful research run.
#[derive(Debug, Clone)]
pub struct ResearchRun {
    /// The topic that was researched.
    pub topic: String,
    /// The plan that drove the run.
    pub plan: SearchPlan,
    /// The synthesized report.
    pub report: Report,
    /// Collaborator spend for this run.
    pub costs: CostSummary,
    /// Wall-clock duration of the run.
    pub duration: Duration,
}

/// A persisted cache entry: the results of one external search call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Content-addressed key (hex digest of the normalized query).
    pub key: String,
    /// The query text as submitted (pre-normalization).
    pub query_text: String,
    /// The results returned by the provider.
    pub raw_results: Vec<RawResult>,
    /// When this entry was fetched.
    pub fetched_at: DateTime<Utc>,
}
