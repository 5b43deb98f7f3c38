use thiserror::Error;

/// A failure produced by one pipeline stage.
///
/// Stage errors never escape the orchestrator's job loop; they are recorded
/// into the job's error list and drive the retry/skip/abort policy.
#[derive(Debug, Clone, Error, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum StageError {
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    #[error("validation failed: {0}")]
    PermanentValidation(String),

    #[error("missing upstream output: {0}")]
    DependencyMissing(String),

    #[error("provider call budget exhausted: {0}")]
    BudgetExceeded(String),

    #[error("corrupt cache entry for key '{0}'")]
    CacheCorruption(String),

    #[error("job cancelled")]
    Cancelled,

    #[error("job timed out after {0}s")]
    Timeout(u64),

    #[error("worker crashed: {0}")]
    WorkerCrash(String),
}

impl StageError {
    /// Only transient I/O failures are worth a retry. Everything else is
    /// either permanent or handled structurally (skip/abort).
    pub fn retryable(&self) -> bool {
        matches!(self, StageError::TransientIo(_))
    }

    /// Stable machine-readable kind, stored in the job's error list.
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::TransientIo(_) => "transient_io",
            StageError::PermanentValidation(_) => "permanent_validation",
            StageError::DependencyMissing(_) => "dependency_missing",
            StageError::BudgetExceeded(_) => "budget_exceeded",
            StageError::CacheCorruption(_) => "cache_corruption",
            StageError::Cancelled => "cancelled",
            StageError::Timeout(_) => "timeout",
            StageError::WorkerCrash(_) => "worker_crash",
        }
    }
}

/// Errors surfaced to the caller at submission time. A rejected job never
/// enters the queue and never appears as `queued`.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("pipeline pool exhausted (queue depth {0})")]
    PoolExhausted(usize),

    #[error("invalid job input: {0}")]
    InvalidInput(String),

    #[error("pool is shut down")]
    PoolClosed,
}
