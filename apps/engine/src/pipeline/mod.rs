//! Pipeline orchestrator.
//!
//! Owns the two pools, the research cache, and the selection engine. Jobs are
//! admitted through a bounded queue and run whole on one pipeline worker;
//! callers observe progress through cheap snapshots or a per-job transition
//! stream, never by holding a lock across a stage.

pub mod prompts;
pub mod retry;
pub mod runner;
pub mod stages;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::errors::SubmitError;
use crate::models::evidence::EvidenceCorpus;
use crate::models::job::{JobInput, JobRecord, StageTransition, TransitionKind};
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::runner::{CallBudget, JobContext};
use crate::pool::data::DataPool;
use crate::pool::pipeline::PipelinePool;
use crate::providers::{ArtifactStore, DocumentStore, TextGenerator, WebFetcher};
use crate::research_cache::ResearchCache;
use crate::selection::scorer::RelevanceScorer;
use crate::selection::{SelectionConfig, SelectionEngine};

/// The external capabilities handed to every job.
#[derive(Clone)]
pub struct Providers {
    pub llm: Arc<dyn TextGenerator>,
    pub web: Arc<dyn WebFetcher>,
    pub documents: Arc<dyn DocumentStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
}

/// Caller-side handle to one submitted job.
#[derive(Clone)]
pub struct RunHandle {
    pub job_id: Uuid,
    record: Arc<RwLock<JobRecord>>,
    cancel: Arc<AtomicBool>,
    events: broadcast::Sender<StageTransition>,
}

impl RunHandle {
    /// Cheap point-in-time copy of the job record.
    pub fn snapshot(&self) -> JobRecord {
        self.record
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Requests cooperative cancellation. The stage in flight finishes; the
    /// job stops at the next stage boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Subscribes to the job's transition stream. There is no replay, but the
    /// stream always ends with a terminal event even for a late subscriber.
    pub fn events(&self) -> JobEvents {
        JobEvents {
            rx: self.events.subscribe(),
            record: Arc::clone(&self.record),
            job_id: self.job_id,
            done: false,
        }
    }
}

/// Consumer side of a job's transition stream. Yields `None` once the
/// terminal event has been delivered.
pub struct JobEvents {
    rx: broadcast::Receiver<StageTransition>,
    record: Arc<RwLock<JobRecord>>,
    job_id: Uuid,
    done: bool,
}

impl JobEvents {
    pub async fn next(&mut self) -> Option<StageTransition> {
        if self.done {
            return None;
        }
        loop {
            match tokio::time::timeout(Duration::from_millis(50), self.rx.recv()).await {
                Ok(Ok(event)) => {
                    if matches!(event.kind, TransitionKind::Terminal { .. }) {
                        self.done = true;
                    }
                    return Some(event);
                }
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    warn!(job_id = %self.job_id, skipped, "event subscriber lagged");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    self.done = true;
                    return None;
                }
                Err(_tick) => {
                    // Subscribed after the terminal event was sent: synthesize
                    // it from the record so the stream still terminates.
                    let status = self
                        .record
                        .read()
                        .unwrap_or_else(|e| e.into_inner())
                        .status;
                    if status.is_terminal() {
                        self.done = true;
                        return Some(StageTransition::now(
                            self.job_id,
                            TransitionKind::Terminal { status },
                        ));
                    }
                }
            }
        }
    }
}

pub struct Orchestrator {
    providers: Providers,
    cache: Arc<ResearchCache>,
    selection: Arc<SelectionEngine>,
    /// Swapped wholesale by out-of-band corpus edits; jobs snapshot it at
    /// submission.
    corpus: RwLock<Arc<EvidenceCorpus>>,
    data_pool: Arc<DataPool>,
    pool: PipelinePool,
    retry: RetryPolicy,
    job_timeout: Duration,
    call_budget: u32,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        providers: Providers,
        scorer: Arc<dyn RelevanceScorer>,
        corpus: EvidenceCorpus,
    ) -> Self {
        let selection = SelectionEngine::new(
            SelectionConfig {
                k: config.selection_k,
                prefilter_n: config.prefilter_n,
                relevance_threshold: config.relevance_threshold,
                min_fitness: config.min_fitness,
                cache_ttl_secs: config.selection_cache_ttl_secs,
                recency_half_life_months: config.recency_half_life_months,
            },
            scorer,
        );
        Self {
            providers,
            cache: Arc::new(ResearchCache::new(
                config.company_cache_ttl_secs,
                config.min_contacts_full,
            )),
            selection: Arc::new(selection),
            corpus: RwLock::new(Arc::new(corpus)),
            data_pool: Arc::new(DataPool::new(config.data_workers, config.queue_depth)),
            pool: PipelinePool::new(config.pipeline_workers, config.queue_depth),
            retry: RetryPolicy::from_config(config),
            job_timeout: Duration::from_secs(config.job_timeout_secs),
            call_budget: config.call_budget,
        }
    }

    /// Validates and enqueues a job. A rejected job never enters the queue;
    /// an accepted one is `queued` until a worker picks it up.
    pub fn submit(&self, input: JobInput) -> Result<RunHandle, SubmitError> {
        input.validate().map_err(SubmitError::InvalidInput)?;

        let record = Arc::new(RwLock::new(JobRecord::new(input.clone())));
        let cancel = Arc::new(AtomicBool::new(false));
        let (events, _) = broadcast::channel(64);

        let corpus = {
            let guard = self.corpus.read().unwrap_or_else(|e| e.into_inner());
            Arc::clone(&guard)
        };
        let ctx = JobContext {
            input: input.clone(),
            providers: self.providers.clone(),
            cache: Arc::clone(&self.cache),
            selection: Arc::clone(&self.selection),
            corpus,
            data_pool: Arc::clone(&self.data_pool),
            record: Arc::clone(&record),
            cancel: Arc::clone(&cancel),
            events: events.clone(),
            retry: self.retry.clone(),
            timeout: self.job_timeout,
            budget: CallBudget::new(self.call_budget),
        };

        self.pool
            .dispatch(Box::new(move |rt| runner::run_job(rt, ctx)))?;

        Ok(RunHandle {
            job_id: input.job_id,
            record,
            cancel,
            events,
        })
    }

    pub fn status(&self, handle: &RunHandle) -> JobRecord {
        handle.snapshot()
    }

    pub fn events(&self, handle: &RunHandle) -> JobEvents {
        handle.events()
    }

    pub fn cancel(&self, handle: &RunHandle) {
        handle.cancel();
    }

    /// Jobs currently running on pipeline workers.
    pub fn active_jobs(&self) -> usize {
        self.pool.active()
    }

    /// Installs a new corpus version. Running jobs keep their snapshot; the
    /// version bump invalidates the selection cache for new jobs.
    pub fn replace_corpus(&self, corpus: EvidenceCorpus) {
        let mut guard = self.corpus.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(corpus);
    }
}
