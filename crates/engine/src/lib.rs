use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info_span};

use soliguard::cache::{EmbeddingCache, RunId};
use soliguard::config::AnalysisConfig;
use soliguard::error::{CoverageFlag, Deadline, Result};
use soliguard::finding::{Finding, FindingFlags};
use soliguard::flow::analyze_flows;
use soliguard::graph::build_hybrid_graph;
use soliguard::normalize::{normalize, ImportResolver, NoImports};
use soliguard::report::{order_findings, synthesize, ReportBundle};
use soliguard::scorer::{HistoryProvider, ScoringState, ThresholdTable, VulnerabilityScorer};
use soliguard_explain::Explainer;
use soliguard_model::scorer::ScorerConfig;
use soliguard_model::{CalibratedStore, DualChannelScorer};

/// Everything a completed run produces. Reports and findings are plain data;
/// the graph and embeddings are dropped unless the caller retained them.
#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub run: RunId,
    pub findings: Vec<Finding>,
    pub reports: ReportBundle,
    pub coverage: Vec<CoverageFlag>,
}

/// Composition root: parser, flow analysis, hybrid graph, dual-channel
/// scorer, explainer and report synthesis wired into one `submit` call.
/// Model parameters and thresholds are loaded once and shared read-only
/// across runs.
pub struct AnalysisEngine {
    config: AnalysisConfig,
    thresholds: ThresholdTable,
    scorer: Arc<DualChannelScorer>,
    explainer: Explainer,
    cache: EmbeddingCache,
}

impl AnalysisEngine {
    pub fn new(config: AnalysisConfig) -> Self {
        Self::with_history(config, Arc::new(soliguard::scorer::NoHistory))
    }

    /// Engine with a prior-findings provider wired into the scorer.
    pub fn with_history(config: AnalysisConfig, history: Arc<dyn HistoryProvider>) -> Self {
        let thresholds = ThresholdTable::default().with_overrides(&config.thresholds);
        let scorer_config = ScorerConfig {
            rounds: config.model.rounds,
            embedding_dim: config.model.embedding_dim,
            context_window: config.model.context_window,
            divergence_bound: config.model.divergence_bound,
        };
        let scorer = DualChannelScorer::new(
            scorer_config,
            Arc::new(CalibratedStore::default()),
            thresholds.clone(),
            history,
        );
        Self {
            explainer: Explainer::new(config.explain.max_counterfactual_edits),
            thresholds,
            scorer: Arc::new(scorer),
            cache: EmbeddingCache::new(),
            config,
        }
    }

    /// Analyze one source submission. Fatal errors (parse, scoring, timeout)
    /// abort the run with no partial output.
    pub fn submit(&self, source: &str, version_hint: Option<&str>) -> Result<RunOutput> {
        self.submit_with_imports(source, version_hint, &NoImports)
    }

    pub fn submit_with_imports(
        &self,
        source: &str,
        version_hint: Option<&str>,
        resolver: &dyn ImportResolver,
    ) -> Result<RunOutput> {
        self.run(source, version_hint, resolver, false)
    }

    /// Like [`submit`](Self::submit), but retains the run's channel
    /// embeddings in the in-memory cache for later inspection.
    pub fn submit_retained(&self, source: &str, version_hint: Option<&str>) -> Result<RunOutput> {
        self.run(source, version_hint, &NoImports, true)
    }

    fn run(
        &self,
        source: &str,
        version_hint: Option<&str>,
        resolver: &dyn ImportResolver,
        retain: bool,
    ) -> Result<RunOutput> {
        let run = RunId::fingerprint(source, version_hint);
        let span = info_span!("analysis", run = %run);
        let _guard = span.enter();
        let deadline = Deadline::start(self.config.timeout());

        let unit = normalize(source, version_hint, resolver)?;
        deadline.check()?;

        let flows = analyze_flows(&unit);
        let graph = build_hybrid_graph(&unit, &flows);
        debug!(nodes = graph.node_count(), "hybrid graph ready");
        deadline.check()?;

        let outcome = self.scorer.score(&graph)?;
        debug!(detections = outcome.detections.len(), "scoring done");
        deadline.check()?;
        if retain {
            self.cache.retain(run.clone(), outcome.state.clone());
        }

        let mut coverage = unit.coverage.clone();
        coverage.extend(graph.coverage.iter().cloned());
        let degraded = !coverage.is_empty();

        let mut findings = Vec::with_capacity(outcome.detections.len());
        for detection in &outcome.detections {
            let threshold = self.thresholds.get(&detection.kind);
            let explanation = self.explainer.explain(
                &graph,
                self.scorer.as_ref(),
                detection,
                threshold,
                &deadline,
            )?;
            findings.push(Finding {
                kind: detection.kind.clone(),
                severity: detection.kind.severity(),
                confidence: detection.confidence,
                structural_confidence: detection.structural_confidence,
                semantic_confidence: detection.semantic_confidence,
                contract: detection.contract.clone(),
                function: detection.function.clone(),
                anchors: detection.anchors.clone(),
                flags: FindingFlags {
                    low_agreement: detection.low_agreement,
                    degraded_coverage: degraded,
                    counterfactual_found: explanation.counterfactual.found(),
                },
                explanation,
            });
        }
        order_findings(&mut findings);

        let reports = synthesize(&graph, &findings);
        Ok(RunOutput {
            run,
            findings,
            reports,
            coverage,
        })
    }

    /// Retained embeddings for a prior run, if any.
    pub fn embeddings(&self, run: &RunId) -> Option<ScoringState> {
        self.cache.lookup(run)
    }

    pub fn evict(&self, run: &RunId) {
        self.cache.evict(run);
    }
}

/// Installs the process-wide subscriber, filtered by `RUST_LOG`. Call once
/// from the outermost binary.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
