//! Research planning: topic -> ordered set of search directives.
//!
//! One structured model call proposes the queries; everything after that
//! is deterministic validation. Duplicate queries (after normalization)
//! are dropped once, bounds are enforced, and any mandatory intent
//! category the model skipped is patched with a template directive so the
//! coverage checklist holds even against an uncooperative model.

use crate::backend::{ModelBackend, StructuredRequest, complete_structured};
use crate::cache::normalize_query;
use crate::config::{BackendConfig, PlannerConfig};
use crate::error::PlanningError;
use crate::types::{IntentCategory, SearchDirective, SearchPlan};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

const PLANNER_SYSTEM: &str = "\
You are an expert research strategist. Given a research topic, produce a \
set of web search queries that together cover it comprehensively. Each \
query is 5-12 words, concrete, and optimized for a search engine. Tag \
every query with exactly one intent: background (definitions and \
context), mechanism (how it works), application (practical uses), risk \
(limitations and risks), recent_development (latest news and outlook), \
comparison, or general. Cover all of background, mechanism, application, \
risk, and recent_development at least once. Respond with strict JSON: \
{\"searches\": [{\"query\": \"...\", \"intent\": \"...\"}]}";

/// Draft plan as emitted by the model, before validation.
#[derive(Debug, Deserialize)]
struct PlanDraft {
    searches: Vec<PlanDraftItem>,
}

#[derive(Debug, Deserialize)]
struct PlanDraftItem {
    query: String,
    intent: IntentCategory,
}

/// Turns a topic into a validated [`SearchPlan`].
pub struct Planner {
    backend: Arc<dyn ModelBackend>,
    config: PlannerConfig,
    max_tokens: usize,
    temperature: f64,
}

impl Planner {
    /// Create a planner over the given backend.
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        config: PlannerConfig,
        backend_config: &BackendConfig,
    ) -> Self {
        Self {
            backend,
            config,
            max_tokens: backend_config.max_tokens,
            temperature: backend_config.temperature,
        }
    }

    /// Generate a plan for `topic`.
    ///
    /// Exactly one outbound model call; no other side effects.
    pub async fn plan(&self, topic: &str) -> Result<SearchPlan, PlanningError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(PlanningError::EmptyTopic);
        }

        let request = StructuredRequest {
            system: PLANNER_SYSTEM.to_string(),
            prompt: format!(
                "Research topic: {topic}\n\nGenerate between {} and {} searches.",
                self.config.min_directives, self.config.max_directives
            ),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let draft: PlanDraft = complete_structured(&self.backend, request).await?;
        debug!(proposed = draft.searches.len(), "Model proposed search queries");

        let mut seen: HashSet<String> = HashSet::new();
        let mut directives: Vec<SearchDirective> = Vec::new();
        for item in draft.searches {
            let query_text = item.query.trim().to_string();
            let normalized = normalize_query(&query_text);
            if normalized.is_empty() {
                continue;
            }
            if !seen.insert(normalized) {
                debug!(query = %query_text, "Dropping duplicate query");
                continue;
            }
            directives.push(SearchDirective {
                id: uuid::Uuid::new_v4(),
                query_text,
                intent: item.intent,
            });
        }

        if directives.len() < self.config.min_directives {
            return Err(PlanningError::TooFewDirectives {
                got: directives.len(),
                min: self.config.min_directives,
            });
        }
        if directives.len() > self.config.max_directives {
            directives.truncate(self.config.max_directives);
        }

        self.patch_mandatory_coverage(topic, &mut directives, &mut seen);

        info!(topic = %topic, directives = directives.len(), "Search plan ready");
        Ok(SearchPlan {
            topic: topic.to_string(),
            directives,
        })
    }

    /// Append template directives for any uncovered mandatory category,
    /// evicting redundant directives when the plan is already full.
    fn patch_mandatory_coverage(
        &self,
        topic: &str,
        directives: &mut Vec<SearchDirective>,
        seen: &mut HashSet<String>,
    ) {
        for category in IntentCategory::MANDATORY {
            if directives.iter().any(|d| d.intent == category) {
                continue;
            }
            let query_text = template_query(topic, category);
            if !seen.insert(normalize_query(&query_text)) {
                continue;
            }
            if directives.len() >= self.config.max_directives {
                evict_redundant(directives);
            }
            warn!(category = %category, query = %query_text, "Patching uncovered mandatory category");
            directives.push(SearchDirective {
                id: uuid::Uuid::new_v4(),
                query_text,
                intent: category,
            });
        }
    }
}

/// Deterministic fallback query for a mandatory category.
fn template_query(topic: &str, category: IntentCategory) -> String {
    match category {
        IntentCategory::Background => format!("what is {topic} overview definition"),
        IntentCategory::Mechanism => format!("how does {topic} work underlying mechanism"),
        IntentCategory::Application => format!("{topic} practical applications use cases"),
        IntentCategory::Risk => format!("{topic} limitations risks known problems"),
        IntentCategory::RecentDevelopment => format!("latest {topic} developments and outlook"),
        IntentCategory::Comparison | IntentCategory::General => topic.to_string(),
    }
}

/// Remove, from the back, a directive whose removal cannot uncover a
/// mandatory category: non-mandatory intent, or a category covered more
/// than once.
fn evict_redundant(directives: &mut Vec<SearchDirective>) {
    let mut counts: HashMap<IntentCategory, usize> = HashMap::new();
    for d in directives.iter() {
        *counts.entry(d.intent).or_default() += 1;
    }
    let pos = directives
        .iter()
        .rposition(|d| {
            !IntentCategory::MANDATORY.contains(&d.intent) || counts[&d.intent] > 1
        })
        .unwrap_or(directives.len() - 1);
    directives.remove(pos);
}
