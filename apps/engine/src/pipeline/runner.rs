//! Per-job execution: the stage graph, the retry/skip/abort policy, and the
//! crash/timeout containment around one job on its pool worker.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::StageError;
use crate::models::evidence::EvidenceCorpus;
use crate::models::job::{
    JobInput, JobRecord, JobStatus, StageId, StageState, StageTransition, TransitionKind,
};
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::{stages, Providers};
use crate::pool::data::DataPool;
use crate::pool::pipeline::panic_message;
use crate::research_cache::ResearchCache;
use crate::selection::SelectionEngine;

/// Expensive provider calls allowed for one job. Shared by all of the job's
/// stages, including the concurrent enrichment pair.
pub(crate) struct CallBudget {
    limit: u32,
    used: AtomicU32,
}

impl CallBudget {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            used: AtomicU32::new(0),
        }
    }

    /// Reserves `n` calls or fails without consuming anything.
    pub fn charge(&self, n: u32) -> Result<(), StageError> {
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            if current + n > self.limit {
                return Err(StageError::BudgetExceeded(format!(
                    "{current} of {} calls used, {n} more requested",
                    self.limit
                )));
            }
            match self.used.compare_exchange(
                current,
                current + n,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    pub fn used(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }
}

/// Everything one job needs while running on its pool worker. Shared state
/// (record, cancel flag, events) is also held by the caller's `RunHandle`.
pub(crate) struct JobContext {
    pub input: JobInput,
    pub providers: Providers,
    pub cache: Arc<ResearchCache>,
    pub selection: Arc<SelectionEngine>,
    /// Corpus snapshot taken at submission; stable for the whole run.
    pub corpus: Arc<EvidenceCorpus>,
    pub data_pool: Arc<DataPool>,
    pub record: Arc<RwLock<JobRecord>>,
    pub cancel: Arc<AtomicBool>,
    pub events: broadcast::Sender<StageTransition>,
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub budget: CallBudget,
}

impl JobContext {
    pub fn job_id(&self) -> Uuid {
        self.input.job_id
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Runs `f` under the record's write lock, tolerating poisoning so a
    /// crashed sibling job can never wedge status reads.
    pub fn with_record<R>(&self, f: impl FnOnce(&mut JobRecord) -> R) -> R {
        let mut guard = self.record.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn snapshot(&self) -> JobRecord {
        self.record
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Best effort; a job with no listeners still runs to completion.
    pub fn emit(&self, kind: TransitionKind) {
        let _ = self.events.send(StageTransition::now(self.job_id(), kind));
    }
}

/// Entry point invoked on a pipeline worker with that worker's private
/// runtime. Never panics outward and never returns before the record holds a
/// terminal status.
pub(crate) fn run_job(rt: &tokio::runtime::Runtime, ctx: JobContext) {
    let span = tracing::info_span!("job", job_id = %ctx.job_id());
    let _enter = span.enter();

    ctx.with_record(|r| r.advance_status(JobStatus::Running));
    info!(
        title = %ctx.input.title,
        company = %ctx.input.company_name,
        "job started"
    );

    let deadline = ctx.timeout;
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        rt.block_on(async { tokio::time::timeout(deadline, drive(&ctx)).await })
    }));

    match outcome {
        Ok(Ok(())) => finalize(&ctx),
        Ok(Err(_elapsed)) => abort_in_flight(&ctx, StageError::Timeout(deadline.as_secs())),
        Err(panic) => abort_in_flight(&ctx, StageError::WorkerCrash(panic_message(&panic))),
    }

    let status = ctx.with_record(|r| r.status);
    ctx.emit(TransitionKind::Terminal { status });
    info!(%status, calls_used = ctx.budget.used(), "job finished");

    // Best-effort persistence of the final record; Publish already saved a
    // snapshot on the happy path.
    let snapshot = ctx.snapshot();
    let docs = Arc::clone(&ctx.providers.documents);
    let queued = ctx.data_pool.execute(Box::new(move || {
        if let Err(err) = docs.save(&snapshot) {
            warn!(%err, "failed to persist final job record");
        }
    }));
    if let Err(err) = queued {
        warn!(%err, "data pool rejected final record save");
    }
}

/// The fixed stage graph. Cancellation is honored at stage boundaries; an
/// exhausted call budget skips the remaining expensive stages but still
/// attempts Publish so whatever was produced gets persisted.
async fn drive(ctx: &JobContext) {
    let extract = run_stage(ctx, StageId::Extract, || stages::extract(ctx)).await;
    if check_cancelled(ctx) {
        return;
    }
    if extract != StageRun::Succeeded {
        for stage in [
            StageId::Analyze,
            StageId::CompanyEnrich,
            StageId::PeopleEnrich,
            StageId::RankFit,
            StageId::Generate,
            StageId::Publish,
        ] {
            skip(ctx, stage, "requirements unavailable");
        }
        return;
    }

    let analyze = run_stage(ctx, StageId::Analyze, || stages::analyze(ctx)).await;
    if check_cancelled(ctx) {
        return;
    }
    let mut budget_blown = analyze.blew_budget();

    // The two enrichment stages are independent of each other.
    let (company, people) = if budget_blown {
        skip(ctx, StageId::CompanyEnrich, "call budget exhausted");
        skip(ctx, StageId::PeopleEnrich, "call budget exhausted");
        (StageRun::Skipped, StageRun::Skipped)
    } else {
        tokio::join!(
            run_stage(ctx, StageId::CompanyEnrich, || stages::company_enrich(ctx)),
            run_stage(ctx, StageId::PeopleEnrich, || stages::people_enrich(ctx)),
        )
    };
    if check_cancelled(ctx) {
        return;
    }
    budget_blown |= company.blew_budget() || people.blew_budget();

    let rank = if budget_blown {
        skip(ctx, StageId::RankFit, "call budget exhausted");
        StageRun::Skipped
    } else {
        run_stage(ctx, StageId::RankFit, || stages::rank_fit(ctx)).await
    };
    if check_cancelled(ctx) {
        return;
    }
    budget_blown |= rank.blew_budget();

    if budget_blown {
        skip(ctx, StageId::Generate, "call budget exhausted");
    } else {
        run_stage(ctx, StageId::Generate, || stages::generate(ctx)).await;
    }
    if check_cancelled(ctx) {
        return;
    }

    run_stage(ctx, StageId::Publish, || stages::publish(ctx)).await;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageRun {
    Succeeded,
    Skipped,
    Failed { budget: bool },
}

impl StageRun {
    fn blew_budget(self) -> bool {
        matches!(self, StageRun::Failed { budget: true })
    }
}

/// Runs one stage with entry/exit bookkeeping and the centralized retry
/// policy. Only retryable errors are retried; `DependencyMissing` becomes a
/// skip; everything else is a stage failure.
async fn run_stage<F, Fut>(ctx: &JobContext, stage: StageId, f: F) -> StageRun
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<(), StageError>>,
{
    if ctx.cancelled() {
        ctx.with_record(|r| {
            r.stage_mut(stage).state = StageState::Skipped {
                reason: "cancelled".into(),
            }
        });
        return StageRun::Skipped;
    }

    ctx.with_record(|r| r.mark_stage_entered(stage));
    ctx.emit(TransitionKind::StageEntered { stage });
    debug!(%stage, "stage entered");

    let mut attempt = 1u32;
    let outcome = loop {
        match f().await {
            Ok(()) => break Ok(()),
            Err(err) if err.retryable() && attempt < ctx.retry.max_attempts => {
                let delay = ctx.retry.delay_for(attempt);
                warn!(
                    %stage,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %err,
                    "stage attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => break Err(err),
        }
    };

    let run = match outcome {
        Ok(()) => {
            ctx.with_record(|r| r.mark_stage_exited(stage, StageState::Succeeded));
            debug!(%stage, "stage succeeded");
            StageRun::Succeeded
        }
        Err(err @ StageError::DependencyMissing(_)) => {
            warn!(%stage, %err, "stage skipped");
            ctx.with_record(|r| {
                r.push_error(stage, &err);
                r.mark_stage_exited(
                    stage,
                    StageState::Skipped {
                        reason: err.to_string(),
                    },
                );
            });
            StageRun::Skipped
        }
        Err(err) => {
            let budget = matches!(err, StageError::BudgetExceeded(_));
            warn!(%stage, %err, "stage failed");
            ctx.with_record(|r| {
                r.push_error(stage, &err);
                r.mark_stage_exited(stage, StageState::Failed { error: err.clone() });
            });
            StageRun::Failed { budget }
        }
    };

    ctx.emit(TransitionKind::StageExited { stage });
    run
}

fn skip(ctx: &JobContext, stage: StageId, reason: &str) {
    debug!(%stage, reason, "stage skipped");
    ctx.with_record(|r| {
        r.stage_mut(stage).state = StageState::Skipped {
            reason: reason.into(),
        }
    });
    ctx.emit(TransitionKind::StageExited { stage });
}

/// Checks the cancel flag at a stage boundary. A cancelled job fails with a
/// cancellation error; stages already completed keep their outcomes.
fn check_cancelled(ctx: &JobContext) -> bool {
    if !ctx.cancelled() {
        return false;
    }
    info!("job cancelled at stage boundary");
    ctx.with_record(|r| {
        let next = r
            .stages
            .iter()
            .find(|s| s.state == StageState::NotRun)
            .map(|s| s.stage)
            .unwrap_or(StageId::Publish);
        r.push_error(next, &StageError::Cancelled);
        for stage in StageId::ALL {
            if r.stage(stage).state == StageState::NotRun {
                r.stage_mut(stage).state = StageState::Skipped {
                    reason: "cancelled".into(),
                };
            }
        }
        r.advance_status(JobStatus::Failed);
    });
    true
}

/// Terminal aggregation: a failed Extract fails the job outright; any other
/// failed or skipped stage degrades it to partial; a clean sweep completes.
fn finalize(ctx: &JobContext) {
    ctx.with_record(|r| {
        if r.status.is_terminal() {
            return;
        }
        let extract_failed = matches!(
            r.stage(StageId::Extract).state,
            StageState::Failed { .. }
        );
        let degraded = r.stages.iter().any(|s| {
            matches!(
                s.state,
                StageState::Failed { .. } | StageState::Skipped { .. }
            )
        });
        let status = if extract_failed {
            JobStatus::Failed
        } else if degraded {
            JobStatus::Partial
        } else {
            JobStatus::Completed
        };
        r.advance_status(status);
    });
}

/// Containment for timeouts and panics: blame the stage that was in flight,
/// fail it, skip whatever never ran, and fail the job.
fn abort_in_flight(ctx: &JobContext, error: StageError) {
    warn!(%error, "job aborted");
    ctx.with_record(|r| {
        let in_flight: Vec<StageId> = r
            .stages
            .iter()
            .filter(|s| s.entered_at.is_some() && s.exited_at.is_none())
            .map(|s| s.stage)
            .collect();
        let blamed = in_flight.first().copied().unwrap_or(StageId::Extract);
        r.push_error(blamed, &error);
        for stage in in_flight {
            r.mark_stage_exited(stage, StageState::Failed {
                error: error.clone(),
            });
        }
        for stage in StageId::ALL {
            if r.stage(stage).state == StageState::NotRun {
                r.stage_mut(stage).state = StageState::Skipped {
                    reason: "job aborted".into(),
                };
            }
        }
        r.advance_status(JobStatus::Failed);
    });
}
