//! The research pipeline driver.
//!
//! Stages are barrier-synchronized: the planner finishes before any
//! search is dispatched, every search settles before distillation starts,
//! and the writer sees the complete unit set so it can check mandatory
//! coverage. The driver owns the run-level policy the stages deliberately
//! don't: the minimum-success threshold, cancellation, and the cost and
//! duration ledger.

use crate::backend::ModelBackend;
use crate::config::DelverConfig;
use crate::error::DelverError;
use crate::executor::SearchExecutor;
use crate::planner::Planner;
use crate::progress::{NoOpObserver, PipelineObserver};
use crate::search::SearchGateway;
use crate::summarizer::Summarizer;
use crate::types::{CostSummary, ResearchRun, SummaryUnit};
use crate::writer::ReportWriter;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// End-to-end research pipeline: plan, search, distill, synthesize.
pub struct ResearchPipeline {
    planner: Planner,
    executor: SearchExecutor,
    summarizer: Summarizer,
    writer: ReportWriter,
    gateway: Arc<SearchGateway>,
    observer: Arc<dyn PipelineObserver>,
    min_success_ratio: f64,
    model_call_usd: f64,
    report_call_usd: f64,
}

impl ResearchPipeline {
    /// Assemble a pipeline from its collaborators and configuration.
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        gateway: Arc<SearchGateway>,
        config: &DelverConfig,
    ) -> Self {
        Self {
            planner: Planner::new(backend.clone(), config.planner.clone(), &config.backend),
            executor: SearchExecutor::new(gateway.clone(), config.executor.max_in_flight),
            summarizer: Summarizer::new(
                backend.clone(),
                config.summarizer.clone(),
                &config.backend,
            ),
            writer: ReportWriter::new(backend, config.writer.clone(), &config.backend),
            gateway,
            observer: Arc::new(NoOpObserver),
            min_success_ratio: config.executor.min_success_ratio,
            model_call_usd: config.costs.model_call_usd,
            report_call_usd: config.costs.report_call_usd,
        }
    }

    /// Attach a progress observer.
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run the pipeline for `topic`.
    ///
    /// Fails fast on planning errors (before any search spend), tolerates
    /// per-directive search failures up to the configured threshold, and
    /// reports `Cancelled`, never a partial report, when the token fires.
    pub async fn run(
        &self,
        topic: &str,
        cancel: CancellationToken,
    ) -> Result<ResearchRun, DelverError> {
        let started = Instant::now();
        let mut costs = CostSummary::default();
        let search_calls_before = self.gateway.external_calls();

        if cancel.is_cancelled() {
            return Err(DelverError::Cancelled);
        }

        let plan = self.planner.plan(topic).await?;
        costs.add_model_call(self.model_call_usd);
        self.observer.on_plan_ready(&plan);
        info!(topic = %topic, directives = plan.len(), "Plan ready, dispatching searches");

        if cancel.is_cancelled() {
            return Err(DelverError::Cancelled);
        }

        let mut results = self
            .executor
            .execute(&plan, self.observer.clone(), &cancel)
            .await;
        if cancel.is_cancelled() {
            return Err(DelverError::Cancelled);
        }

        let failed_ids: Vec<Uuid> = plan
            .directives
            .iter()
            .filter(|d| !results.get(&d.id).is_some_and(|r| r.is_ok()))
            .map(|d| d.id)
            .collect();
        let succeeded = plan.len() - failed_ids.len();
        let ratio = succeeded as f64 / plan.len().max(1) as f64;
        if ratio < self.min_success_ratio {
            warn!(
                succeeded,
                planned = plan.len(),
                threshold = self.min_success_ratio,
                "Too many directives failed"
            );
            return Err(DelverError::InsufficientCoverage {
                succeeded,
                planned: plan.len(),
                failed_ids,
            });
        }

        let mut units: Vec<SummaryUnit> = Vec::with_capacity(plan.len());
        for directive in &plan.directives {
            if cancel.is_cancelled() {
                return Err(DelverError::Cancelled);
            }
            let raw = match results.remove(&directive.id) {
                Some(Ok(raw)) => raw,
                _ => Vec::new(),
            };
            if !raw.is_empty() {
                costs.add_model_call(self.model_call_usd);
            }
            units.push(self.summarizer.summarize(directive, &raw).await);
        }

        if cancel.is_cancelled() {
            return Err(DelverError::Cancelled);
        }

        let report = self.writer.synthesize(topic, &plan, &units).await?;
        costs.add_model_call(self.report_call_usd);
        costs.search_calls = self.gateway.external_calls() - search_calls_before;
        self.observer.on_report_ready(&report);

        let duration = started.elapsed();
        info!(
            duration_secs = duration.as_secs_f64(),
            confidence = report.confidence_score,
            model_calls = costs.model_calls,
            search_calls = costs.search_calls,
            "Research run complete"
        );

        Ok(ResearchRun {
            topic: topic.to_string(),
            plan,
            report,
            costs,
            duration,
        })
    }
}
