use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Pool sizes, TTLs, and selection parameters are configuration, not
/// hard-coded constants.
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: String,
    pub search_endpoint: String,
    pub jobs_dir: String,
    pub artifacts_dir: String,

    /// Max whole jobs running concurrently (pipeline-execution pool size).
    pub pipeline_workers: usize,
    /// Workers for short blocking I/O (data-operations pool size).
    pub data_workers: usize,
    /// Bounded admission queue depth; a full queue rejects submission.
    pub queue_depth: usize,

    pub company_cache_ttl_secs: u64,
    /// Merged contact count at which a research entry is considered full.
    pub min_contacts_full: usize,

    pub selection_k: usize,
    pub prefilter_n: usize,
    /// Per-(requirement, record) relevance (0-10) needed to attribute a
    /// record to a requirement in the selection mapping.
    pub relevance_threshold: f64,
    /// Overall fitness floor; below it the selection collapses to the single
    /// best record.
    pub min_fitness: f64,
    pub selection_cache_ttl_secs: u64,
    pub recency_half_life_months: f64,

    pub job_timeout_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Expensive provider calls allowed per job before remaining expensive
    /// stages are aborted.
    pub call_budget: u32,

    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            search_endpoint: require_env("SEARCH_ENDPOINT")?,
            jobs_dir: env_or("JOBS_DIR", "./jobs"),
            artifacts_dir: env_or("ARTIFACTS_DIR", "./artifacts"),
            pipeline_workers: env_parse("PIPELINE_WORKERS", 4)?,
            data_workers: env_parse("DATA_WORKERS", 8)?,
            queue_depth: env_parse("QUEUE_DEPTH", 16)?,
            company_cache_ttl_secs: env_parse("COMPANY_CACHE_TTL_SECS", 86_400)?,
            min_contacts_full: env_parse("MIN_CONTACTS_FULL", 3)?,
            selection_k: env_parse("SELECTION_K", 3)?,
            prefilter_n: env_parse("PREFILTER_N", 10)?,
            relevance_threshold: env_parse("RELEVANCE_THRESHOLD", 6.0)?,
            min_fitness: env_parse("MIN_FITNESS", 2.0)?,
            selection_cache_ttl_secs: env_parse("SELECTION_CACHE_TTL_SECS", 3_600)?,
            recency_half_life_months: env_parse("RECENCY_HALF_LIFE_MONTHS", 18.0)?,
            job_timeout_secs: env_parse("JOB_TIMEOUT_SECS", 300)?,
            retry_max_attempts: env_parse("RETRY_MAX_ATTEMPTS", 3)?,
            retry_base_delay_ms: env_parse("RETRY_BASE_DELAY_MS", 1_000)?,
            call_budget: env_parse("CALL_BUDGET", 24)?,
            rust_log: env_or("RUST_LOG", "info"),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("'{key}' must be a valid {}", std::any::type_name::<T>())),
        Err(_) => Ok(default),
    }
}
