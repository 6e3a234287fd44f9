//! # Delver Core
//!
//! Core library for the delver research pipeline: planning, concurrent
//! grounded search with caching and rate limiting, summary distillation,
//! and cited report synthesis. The model backend, search provider, and
//! presentation layer are collaborators behind traits; the pipeline
//! itself runs headless.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod planner;
pub mod progress;
pub mod search;
pub mod summarizer;
pub mod types;
pub mod writer;

// Re-export commonly used types at the crate root.
pub use backend::{MockModelBackend, ModelBackend, OpenAiCompatibleBackend, StructuredRequest};
pub use cache::{CacheKey, ResultCache, normalize_query};
pub use config::{DelverConfig, load_config};
pub use error::{DelverError, PlanningError, Result, SearchFailure, SynthesisError};
pub use executor::{DirectiveResults, SearchExecutor};
pub use pipeline::ResearchPipeline;
pub use planner::Planner;
pub use progress::{DirectiveOutcome, NoOpObserver, PipelineObserver};
pub use search::duckduckgo::DuckDuckGoProvider;
pub use search::throttle::{Clock, SearchThrottle, SystemClock};
pub use search::{SearchGateway, SearchProvider};
pub use summarizer::Summarizer;
pub use types::{
    CacheEntry, CostSummary, DistilledFact, IntentCategory, RawResult, Report, ReportSection,
    ResearchRun, SearchDirective, SearchPlan, SummaryUnit,
};
pub use writer::ReportWriter;
