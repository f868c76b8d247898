//! Pipeline orchestrator: INTAKE → NORMALIZE → CANDIDATES → EXTRACT →
//! SCORE → CLASSIFY → SELECT → CLUSTER → EMIT → FINALIZED
//!
//! Single-threaded cooperative scheduling: one stage at a time, batched
//! concurrent adapter calls inside a stage with a fixed in-flight cap,
//! cancellation checks between stages and after every batch, and global
//! budgets that truncate gracefully at the nearest stage boundary.

use siphasher::sip::SipHasher13;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crate::adapters::{ChatModel, KeywordDataAdapter, SerpMetadataSource, WebScrapeAdapter};
use crate::artifacts::{
    self, ArtifactInputs, GraphArtifact, ProvenanceEvent, RelatedQueriesOutput, RunFlags, RunMeta,
};
use crate::candidates::CandidateGenerator;
use crate::cluster::{self, ClusterBuilder};
use crate::config::EngineConfig;
use crate::error::{RunFailure, RunWarning, Stage};
use crate::extraction::Extractor;
use crate::gate;
use crate::llm::LlmClient;
use crate::synapse::{self, SynapseBuilder};
use crate::taxonomy::Taxonomy;
use crate::types::{Node, Phrase};
use tracing::{debug, info, warn};

/// Cooperative cancellation signal checked between stages and batches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Request for one end-to-end run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub seed: String,
    pub language: String,
    pub market: String,
    /// External cancellation; omitted runs are uncancellable.
    pub cancel: Option<CancelToken>,
    /// Fixed clock for replayable runs; wall clock when absent.
    pub now: Option<i64>,
}

impl RunRequest {
    pub fn new(seed: impl Into<String>, language: impl Into<String>, market: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            language: language.into(),
            market: market.into(),
            cancel: None,
            now: None,
        }
    }
}

/// The two artifacts of a finalized run.
#[derive(Debug)]
pub struct RunOutput {
    pub related: RelatedQueriesOutput,
    pub graph: GraphArtifact,
}

/// Per-run mutable state, owned exclusively by the orchestrator.
struct RunContext {
    run_id: String,
    now: i64,
    started: Instant,
    adapter_calls: u32,
    llm_tokens: u64,
    warnings: Vec<RunWarning>,
    provenance: Vec<ProvenanceEvent>,
    flags: RunFlags,
    cancel: CancelToken,
}

impl RunContext {
    fn record(&mut self, stage: Stage, source: impl Into<String>, operation: impl Into<String>) {
        self.provenance.push(ProvenanceEvent {
            stage,
            source: source.into(),
            operation: operation.into(),
            observed_at: self.now,
        });
    }

    /// Check cancellation; latches the flag on first observation.
    fn cancelled(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            self.flags.cancelled = true;
        }
        self.flags.cancelled
    }

    /// Check global budgets; latches truncation with its reason.
    fn budget_exhausted(&mut self, config: &EngineConfig) -> bool {
        if self.flags.truncated {
            return true;
        }
        let budgets = &config.budgets;
        let reason = if budgets
            .max_adapter_calls
            .is_some_and(|max| self.adapter_calls >= max)
        {
            Some("adapter call budget exhausted")
        } else if budgets
            .max_llm_tokens
            .is_some_and(|max| self.llm_tokens >= max)
        {
            Some("llm token budget exhausted")
        } else if budgets
            .run_deadline_ms
            .is_some_and(|ms| self.started.elapsed() >= Duration::from_millis(ms))
        {
            Some("run deadline reached")
        } else {
            None
        };
        if let Some(reason) = reason {
            warn!("run {}: {reason}", self.run_id);
            self.flags.truncated = true;
            self.flags.truncation_reason = Some(reason.to_string());
        }
        self.flags.truncated
    }

    /// No further LLM or adapter work once cancelled or truncated.
    fn halted(&self) -> bool {
        self.flags.cancelled || self.flags.truncated
    }
}

/// Main engine: sequences the stages over injected adapters.
pub struct SynapseEngine {
    keyword: Option<Arc<dyn KeywordDataAdapter>>,
    scrape: Option<Arc<dyn WebScrapeAdapter>>,
    serp_meta: Option<Arc<dyn SerpMetadataSource>>,
    llm: LlmClient,
    config: EngineConfig,
}

pub type SharedSynapseEngine = Arc<SynapseEngine>;

impl SynapseEngine {
    /// Create an engine with the full adapter set.
    pub fn new(
        keyword: Option<Arc<dyn KeywordDataAdapter>>,
        scrape: Option<Arc<dyn WebScrapeAdapter>>,
        serp_meta: Option<Arc<dyn SerpMetadataSource>>,
        chat: Arc<dyn ChatModel>,
        mut config: EngineConfig,
    ) -> SharedSynapseEngine {
        if config.versions.model == "unspecified" {
            config.versions.model = chat.model_id().to_string();
        }
        let llm = LlmClient::new(
            chat,
            config.intent_extraction_retry_max,
            Duration::from_millis(config.llm_timeout_ms),
        );
        Arc::new(Self { keyword, scrape, serp_meta, llm, config })
    }

    /// Engine with only the LLM wired up; everything else degrades.
    pub fn new_simple(chat: Arc<dyn ChatModel>, config: EngineConfig) -> SharedSynapseEngine {
        Self::new(None, None, None, chat, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the full pipeline for one seed.
    pub async fn run(&self, req: RunRequest) -> Result<RunOutput, RunFailure> {
        // INTAKE
        let seed_raw = req.seed.trim();
        if seed_raw.is_empty() {
            return Err(RunFailure::contract(Stage::Intake, "seed phrase is empty"));
        }
        let now = req.now.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0)
        });

        // NORMALIZE
        let seed_phrase = Phrase::new(seed_raw, &req.language, &req.market);
        if seed_phrase.text.is_empty() {
            return Err(RunFailure::contract(Stage::Normalize, "seed normalizes to empty"));
        }
        let taxonomy = Taxonomy::default_for_market(&req.market);
        let seed_id = seed_phrase.id();

        let mut ctx = RunContext {
            run_id: run_id(&seed_phrase, &self.config, now),
            now,
            started: Instant::now(),
            adapter_calls: 0,
            llm_tokens: 0,
            warnings: Vec::new(),
            provenance: Vec::new(),
            flags: RunFlags::default(),
            cancel: req.cancel.clone().unwrap_or_default(),
        };

        info!(
            "run {}: seed='{}' market={} language={}",
            ctx.run_id, seed_phrase.text, req.market, req.language
        );

        // CANDIDATES
        let generator = CandidateGenerator {
            keyword: self.keyword.as_deref(),
            serp_meta: self.serp_meta.as_deref(),
            llm: &self.llm,
            config: &self.config,
        };
        let pool = generator.generate(&seed_phrase).await;
        ctx.adapter_calls += pool.adapter_calls;
        ctx.llm_tokens += pool.llm_tokens;
        ctx.warnings.extend(pool.warnings);
        ctx.record(Stage::Candidates, "keyword_data", "candidate_generation");
        if pool.degraded {
            ctx.flags.low_confidence = true;
            ctx.record(Stage::Candidates, self.llm.model_id(), "facet_expansion");
        }

        // EXTRACT: batched with the concurrency cap, cancellation and
        // budget checks between batches.
        ctx.cancelled();
        let extractor = Extractor {
            keyword: self.keyword.as_deref(),
            scrape: self.scrape.as_deref(),
            llm: &self.llm,
            taxonomy: &taxonomy,
            config: &self.config,
            now,
            degraded: pool.degraded,
        };

        let mut nodes: Vec<Node> = Vec::new();
        let batches = pool.candidates.chunks(self.config.adapter_concurrency.max(1));
        for (batch_idx, batch) in batches.enumerate() {
            // The first batch carries the seed and always runs; without a
            // seed node no artifact can satisfy its contract.
            if batch_idx > 0 && (ctx.cancelled() || ctx.budget_exhausted(&self.config)) {
                debug!("run {}: extraction halted before batch {batch_idx}", ctx.run_id);
                break;
            }
            let outcomes =
                futures::future::join_all(batch.iter().map(|c| extractor.extract(c))).await;
            for outcome in outcomes {
                ctx.adapter_calls += outcome.adapter_calls;
                ctx.llm_tokens += outcome.llm_tokens;
                ctx.warnings.extend(outcome.warnings);
                if let Some(node) = outcome.node {
                    ctx.record(Stage::Extract, node.serp.source.as_str(), "serp_profile");
                    ctx.record(Stage::Extract, self.llm.model_id(), "intent_extraction");
                    nodes.push(node);
                }
            }
        }
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let Some(seed_node) = nodes.iter().find(|n| n.id == seed_id).cloned() else {
            return Err(RunFailure::contract(
                Stage::Extract,
                "seed intent extraction failed; no seed node",
            ));
        };

        // Validation gate: annotates, never aborts.
        let report = gate::check(&nodes, &self.config);
        if report.low_confidence {
            ctx.flags.low_confidence = true;
        }
        ctx.warnings.extend(report.warnings);

        // SCORE
        if ctx.cancelled() {
            debug!("run {}: cancelled before scoring", ctx.run_id);
        }
        let scored = synapse::score_pairs(&nodes, &seed_id, &self.config);

        // CLASSIFY: skipped entirely once cancelled or truncated.
        ctx.budget_exhausted(&self.config);
        let classification_budget = if ctx.halted() { 0 } else { self.config.classification_budget };
        let builder = SynapseBuilder {
            llm: Some(&self.llm),
            config: &self.config,
            seed_id: &seed_id,
        };
        let build = builder.classify(&nodes, scored, classification_budget).await;
        ctx.llm_tokens += build.llm_tokens;
        ctx.warnings.extend(build.warnings);
        ctx.flags.classification_truncated = build.classification_truncated;
        for _ in 0..build.llm_calls {
            ctx.record(Stage::Classify, self.llm.model_id(), "synapse_classification");
        }

        // SELECT
        ctx.cancelled();
        let ranked = cluster::select(&seed_node, &nodes, &build.edges, &self.config);

        // CLUSTER: labels share the classification budget remainder.
        let label_budget = if ctx.halted() {
            0
        } else {
            self.config
                .classification_budget
                .saturating_sub(build.llm_calls as usize)
        };
        let cluster_builder = ClusterBuilder { llm: Some(&self.llm), config: &self.config };
        let selected_ids: Vec<_> = ranked.iter().map(|r| r.id.clone()).collect();
        let clustering = cluster_builder
            .cluster(&nodes, &selected_ids, &build.edges, label_budget)
            .await;
        ctx.llm_tokens += clustering.llm_tokens;
        ctx.warnings.extend(clustering.warnings);
        for _ in 0..clustering.llm_calls {
            ctx.record(Stage::Cluster, self.llm.model_id(), "cluster_label");
        }

        // EMIT
        ctx.cancelled();
        let run_meta = RunMeta {
            run_id: ctx.run_id.clone(),
            seed_id: seed_id.clone(),
            versions: self.config.versions.clone(),
            taxonomy_version: taxonomy.version().to_string(),
            flags: ctx.flags.clone(),
            warnings: ctx.warnings.clone(),
            provenance: ctx.provenance.clone(),
        };

        let (related, graph) = artifacts::emit(ArtifactInputs {
            seed: &seed_node,
            nodes: &nodes,
            edges: &build.edges,
            clusters: &clustering.clusters,
            ranked: &ranked,
            modularity: clustering.modularity,
            pass_ratio: report.pass_ratio,
            run: run_meta,
            taxonomy_len: taxonomy.len(),
        })?;

        // FINALIZED
        info!(
            "run {} finalized: {} nodes, {} edges, {} clusters, {} related queries in {}ms",
            ctx.run_id,
            graph.nodes.len(),
            graph.edges.len(),
            graph.clusters.len(),
            related.items.len(),
            ctx.started.elapsed().as_millis()
        );

        Ok(RunOutput { related, graph })
    }
}

/// Deterministic run id over the seed identity, version triple, and clock.
fn run_id(seed: &Phrase, config: &EngineConfig, now: i64) -> String {
    let mut hasher = SipHasher13::new();
    seed.text.hash(&mut hasher);
    seed.language.hash(&mut hasher);
    seed.market.hash(&mut hasher);
    config.versions.engine.hash(&mut hasher);
    config.versions.model.hash(&mut hasher);
    config.versions.rules.hash(&mut hasher);
    now.hash(&mut hasher);
    format!("run-{:016x}", hasher.finish())
}
