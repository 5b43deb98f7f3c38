//! External capability seams consumed by the pipeline core.
//!
//! Text generation and web fetch are async traits (network-bound); the
//! document and artifact stores are blocking traits executed on the
//! data-operations pool. Stages see only these traits, never the concrete
//! clients.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::errors::StageError;
use crate::models::job::{JobInput, JobRecord};

pub mod llm;
pub mod store;
pub mod web;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("provider returned empty content")]
    EmptyContent,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ProviderError {
    /// Rate limits, server errors, and transport failures are worth a retry;
    /// everything else is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http(_) => true,
            ProviderError::Api { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Io(_) => true,
            _ => false,
        }
    }
}

impl From<ProviderError> for StageError {
    fn from(err: ProviderError) -> Self {
        if err.is_transient() {
            StageError::TransientIo(err.to_string())
        } else {
            StageError::PermanentValidation(err.to_string())
        }
    }
}

/// Text-generation/completion capability. Used by Analyze, the evidence
/// scorer, and Generate. Retries are the calling stage's responsibility.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, prompt: &str, system: &str) -> Result<String, ProviderError>;
}

/// One result item from the web-fetch/search capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSnippet {
    pub title: String,
    pub url: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    pub snippets: Vec<SearchSnippet>,
}

/// Web-fetch/search capability used inside the enrichment stages.
#[async_trait]
pub trait WebFetcher: Send + Sync {
    async fn fetch(&self, query: &str) -> Result<SearchResult, ProviderError>;
}

/// Blocking read/write contract against the document store.
pub trait DocumentStore: Send + Sync {
    fn load(&self, job_id: Uuid) -> Result<JobInput, ProviderError>;
    fn save(&self, record: &JobRecord) -> Result<(), ProviderError>;
}

/// Blocking artifact sink; returns an opaque reference for the stored blob.
pub trait ArtifactStore: Send + Sync {
    fn store(&self, name: &str, blob: &[u8]) -> Result<String, ProviderError>;
}

/// Calls the generator and deserializes the response text as JSON. The
/// prompt must instruct the model to return valid JSON.
pub async fn complete_json<T: DeserializeOwned>(
    generator: &dyn TextGenerator,
    prompt: &str,
    system: &str,
) -> Result<T, ProviderError> {
    let text = generator.complete(prompt, system).await?;
    let text = strip_json_fences(&text);
    serde_json::from_str(text).map_err(ProviderError::Parse)
}

/// Strips ```json ... ``` or ``` ... ``` code fences from model output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or_else(|| stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or_else(|| stripped.trim_start())
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_without_tag() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let input = "{\"key\": \"value\"}";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Http("connection reset".into()).is_transient());
        assert!(ProviderError::Api {
            status: 429,
            message: "slow down".into()
        }
        .is_transient());
        assert!(ProviderError::Api {
            status: 503,
            message: "overloaded".into()
        }
        .is_transient());
        assert!(!ProviderError::Api {
            status: 400,
            message: "bad request".into()
        }
        .is_transient());
        assert!(!ProviderError::EmptyContent.is_transient());
    }

    #[test]
    fn test_provider_error_maps_to_stage_error() {
        let transient: StageError = ProviderError::Http("reset".into()).into();
        assert!(transient.retryable());

        let permanent: StageError = ProviderError::EmptyContent.into();
        assert!(!permanent.retryable());
    }

    #[tokio::test]
    async fn test_complete_json_parses_fenced_output() {
        struct Fenced;

        #[async_trait]
        impl TextGenerator for Fenced {
            async fn complete(&self, _: &str, _: &str) -> Result<String, ProviderError> {
                Ok("```json\n{\"answer\": 42}\n```".to_string())
            }
        }

        #[derive(Deserialize)]
        struct Out {
            answer: u32,
        }

        let out: Out = complete_json(&Fenced, "prompt", "system").await.unwrap();
        assert_eq!(out.answer, 42);
    }
}
