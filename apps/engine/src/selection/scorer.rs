//! Relevance scoring, the expensive phase of evidence selection.
//!
//! Pluggable, trait-based: the default `KeywordRelevanceScorer` is pure Rust,
//! fast, and deterministic; `LlmRelevanceScorer` evaluates the full
//! structured record through the text-generation provider. Swapped at
//! startup, carried as `Arc<dyn RelevanceScorer>`.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::errors::StageError;
use crate::models::evidence::EvidenceRecord;
use crate::providers::{complete_json, TextGenerator};

/// Scores one (requirement, record) pair on a 0-10 scale.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    async fn relevance(
        &self,
        requirement: &str,
        record: &EvidenceRecord,
    ) -> Result<f64, StageError>;
}

// ---------------------------------------------------------------------------
// KeywordRelevanceScorer, the deterministic default
// ---------------------------------------------------------------------------

/// Token-level scorer over the full structured record.
///
/// Per requirement token: exact hit in the record's keyword/skill lists
/// scores 1.0, a hit anywhere in the rendered structured text scores 0.6,
/// otherwise 0.0. The mean across tokens is scaled to 0-10.
pub struct KeywordRelevanceScorer;

#[async_trait]
impl RelevanceScorer for KeywordRelevanceScorer {
    async fn relevance(
        &self,
        requirement: &str,
        record: &EvidenceRecord,
    ) -> Result<f64, StageError> {
        Ok(keyword_relevance(requirement, record))
    }
}

fn keyword_relevance(requirement: &str, record: &EvidenceRecord) -> f64 {
    let tokens: Vec<String> = requirement
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_string)
        .collect();
    if tokens.is_empty() {
        return 0.0;
    }

    let tagged: Vec<String> = record
        .keywords
        .iter()
        .chain(record.hard_skills.iter())
        .chain(record.soft_skills.iter())
        .chain(record.categories.iter())
        .map(|t| t.to_lowercase())
        .collect();
    let full_text = record.render_full().to_lowercase();

    let total: f64 = tokens
        .iter()
        .map(|token| {
            if tagged.iter().any(|t| t == token) {
                1.0
            } else if full_text.contains(token.as_str()) {
                0.6
            } else {
                0.0
            }
        })
        .sum();

    (total / tokens.len() as f64) * 10.0
}

// ---------------------------------------------------------------------------
// LlmRelevanceScorer
// ---------------------------------------------------------------------------

const RELEVANCE_SYSTEM: &str = "You are an expert recruiter evaluating whether a \
    candidate achievement addresses a specific job requirement. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object.";

const RELEVANCE_PROMPT_TEMPLATE: &str = r#"Rate how directly the following achievement addresses the job requirement.

Requirement:
{requirement}

Achievement:
{record}

Return a JSON object with this EXACT schema:
{"relevance": 7.5, "reason": "one short sentence"}

"relevance" is a number from 0 (unrelated) to 10 (directly demonstrates the requirement)."#;

#[derive(Debug, Deserialize)]
struct RelevanceVerdict {
    relevance: f64,
    #[allow(dead_code)]
    reason: Option<String>,
}

/// Semantic scorer over the full structured record. Sees the record through
/// `render_full()`, which keeps the exact field set tunable in one place.
pub struct LlmRelevanceScorer {
    llm: Arc<dyn TextGenerator>,
}

impl LlmRelevanceScorer {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl RelevanceScorer for LlmRelevanceScorer {
    async fn relevance(
        &self,
        requirement: &str,
        record: &EvidenceRecord,
    ) -> Result<f64, StageError> {
        let prompt = RELEVANCE_PROMPT_TEMPLATE
            .replace("{requirement}", requirement)
            .replace("{record}", &record.render_full());

        let verdict: RelevanceVerdict =
            complete_json(self.llm.as_ref(), &prompt, RELEVANCE_SYSTEM).await?;
        Ok(verdict.relevance.clamp(0.0, 10.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::evidence::fixtures::record;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_keyword_scorer_rewards_tag_hits() {
        let mut r = record(Uuid::new_v4(), "summary", &["kafka"]);
        r.hard_skills = vec!["Rust".into()];
        let scorer = KeywordRelevanceScorer;

        let score = scorer.relevance("rust kafka", &r).await.unwrap();
        assert!((score - 10.0).abs() < f64::EPSILON, "score was {score}");
    }

    #[tokio::test]
    async fn test_keyword_scorer_text_hit_is_partial() {
        let mut r = record(Uuid::new_v4(), "summary", &[]);
        r.actions = vec!["migrated the kafka consumers".into()];
        let scorer = KeywordRelevanceScorer;

        let score = scorer.relevance("kafka", &r).await.unwrap();
        assert!((score - 6.0).abs() < 0.01, "score was {score}");
    }

    #[tokio::test]
    async fn test_keyword_scorer_no_hit_is_zero() {
        let r = record(Uuid::new_v4(), "wrote documentation", &[]);
        let scorer = KeywordRelevanceScorer;
        assert_eq!(scorer.relevance("kubernetes", &r).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_keyword_scorer_is_deterministic() {
        let r = record(Uuid::new_v4(), "built rust services", &["rust"]);
        let scorer = KeywordRelevanceScorer;
        let a = scorer.relevance("rust services", &r).await.unwrap();
        let b = scorer.relevance("rust services", &r).await.unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_relevance_verdict_deserializes() {
        let v: RelevanceVerdict =
            serde_json::from_str(r#"{"relevance": 8.5, "reason": "direct match"}"#).unwrap();
        assert!((v.relevance - 8.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_requirement_scores_zero() {
        let r = record(Uuid::new_v4(), "anything", &[]);
        assert_eq!(keyword_relevance("", &r), 0.0);
    }
}
