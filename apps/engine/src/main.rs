//! Opportunity enrichment engine.
//!
//! Takes job ids on the command line, loads their inputs from the document
//! store, and runs each through the full pipeline: extraction, fit analysis,
//! company and people enrichment, evidence selection, artifact generation,
//! and publication.

mod config;
mod errors;
mod models;
mod pipeline;
mod pool;
mod providers;
mod research_cache;
mod selection;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

use crate::config::Config;
use crate::models::evidence::EvidenceCorpus;
use crate::models::job::{JobStatus, TransitionKind};
use crate::pipeline::{Orchestrator, Providers};
use crate::providers::llm::AnthropicClient;
use crate::providers::store::{FsArtifactStore, JsonFileStore};
use crate::providers::web::SearchClient;
use crate::providers::DocumentStore;
use crate::selection::scorer::{KeywordRelevanceScorer, LlmRelevanceScorer, RelevanceScorer};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.rust_log);

    let job_ids: Vec<Uuid> = std::env::args()
        .skip(1)
        .map(|arg| Uuid::parse_str(&arg).with_context(|| format!("'{arg}' is not a job id")))
        .collect::<Result<_>>()?;
    if job_ids.is_empty() {
        anyhow::bail!("usage: engine <job-id> [<job-id>...]");
    }

    let llm = Arc::new(AnthropicClient::new(config.anthropic_api_key.clone()));
    let documents = Arc::new(JsonFileStore::new(&config.jobs_dir)?);
    let providers = Providers {
        llm: llm.clone(),
        web: Arc::new(SearchClient::new(config.search_endpoint.clone())),
        documents: documents.clone(),
        artifacts: Arc::new(FsArtifactStore::new(&config.artifacts_dir)?),
    };

    // The semantic scorer is the default; the keyword scorer is the free,
    // deterministic fallback for local runs.
    let scorer: Arc<dyn RelevanceScorer> =
        match std::env::var("RELEVANCE_SCORER").as_deref() {
            Ok("keyword") => Arc::new(KeywordRelevanceScorer),
            _ => Arc::new(LlmRelevanceScorer::new(llm)),
        };

    let corpus = load_corpus(&config.jobs_dir);
    info!(
        version = corpus.version,
        records = corpus.len(),
        "evidence corpus loaded"
    );

    let orchestrator = Arc::new(Orchestrator::new(&config, providers, scorer, corpus));

    let mut handles = Vec::new();
    for job_id in job_ids {
        let input = documents
            .load(job_id)
            .with_context(|| format!("failed to load job input {job_id}"))?;
        match orchestrator.submit(input) {
            Ok(handle) => handles.push(handle),
            Err(err) => error!(%job_id, %err, "submission rejected"),
        }
    }
    info!(
        submitted = handles.len(),
        active = orchestrator.active_jobs(),
        "jobs submitted"
    );

    // Ctrl-C cancels every in-flight job cooperatively; each stops at its
    // next stage boundary and is persisted as failed.
    let watcher = {
        let orchestrator = Arc::clone(&orchestrator);
        let handles = handles.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling in-flight jobs");
                for handle in &handles {
                    orchestrator.cancel(handle);
                }
            }
        })
    };

    let mut failures = 0usize;
    for handle in &handles {
        let mut events = orchestrator.events(handle);
        while let Some(event) = events.next().await {
            match event.kind {
                TransitionKind::StageEntered { stage } => {
                    debug!(job_id = %event.job_id, %stage, "stage entered");
                }
                TransitionKind::StageExited { stage } => {
                    debug!(job_id = %event.job_id, %stage, "stage exited");
                }
                TransitionKind::Terminal { status } => {
                    let record = orchestrator.status(handle);
                    info!(
                        job_id = %event.job_id,
                        %status,
                        stages_succeeded = record.succeeded_stages(),
                        errors = record.errors.len(),
                        "job finished"
                    );
                    for artifact in record.published.unwrap_or_default() {
                        info!(job_id = %event.job_id, name = %artifact.name, reference = %artifact.reference, "artifact published");
                    }
                    if status == JobStatus::Failed {
                        failures += 1;
                    }
                }
            }
        }
    }

    watcher.abort();
    if failures > 0 {
        anyhow::bail!("{failures} job(s) failed");
    }
    Ok(())
}

fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Reads `{jobs_dir}/corpus.json`. A missing or malformed file degrades to an
/// empty corpus; jobs then finish partial at the selection stage instead of
/// failing to start.
fn load_corpus(jobs_dir: &str) -> EvidenceCorpus {
    let path = std::path::Path::new(jobs_dir).join("corpus.json");
    match std::fs::read_to_string(&path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(corpus) => corpus,
            Err(err) => {
                warn!(path = %path.display(), %err, "corpus file is malformed; starting empty");
                EvidenceCorpus::default()
            }
        },
        Err(_) => {
            warn!(path = %path.display(), "no corpus file found; starting empty");
            EvidenceCorpus::default()
        }
    }
}
