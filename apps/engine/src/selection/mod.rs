//! Evidence Selection Engine.
//!
//! Two-phase: a cheap token-overlap pre-filter bounds the corpus to N
//! candidates, then the pluggable relevance scorer evaluates each candidate
//! against every requirement on the full structured record. The top K by
//! weighted fitness are selected, with an explicit requirement-to-evidence
//! mapping. Results are cached by (requirement-and-keyword fingerprint,
//! corpus version) so repeated runs against unchanged inputs skip the scorer.

pub mod prefilter;
pub mod scorer;

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::errors::StageError;
use crate::models::evidence::{EvidenceCorpus, EvidenceRecord};
use crate::models::job::KeywordEntry;
use crate::selection::scorer::RelevanceScorer;

/// Evidence ids judged to address one requirement. When nothing clears the
/// relevance threshold the single best selected record is attributed and
/// flagged low-confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementEvidence {
    pub requirement: String,
    pub evidence: Vec<Uuid>,
    pub low_confidence: bool,
}

/// Output of the selection engine: a bounded, ordered selection plus the
/// per-requirement attribution map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionOutcome {
    pub selected: Vec<Uuid>,
    pub mapping: Vec<RequirementEvidence>,
    pub corpus_version: u64,
}

#[derive(Debug, Clone)]
pub struct SelectionConfig {
    pub k: usize,
    pub prefilter_n: usize,
    pub relevance_threshold: f64,
    pub min_fitness: f64,
    pub cache_ttl_secs: u64,
    pub recency_half_life_months: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            k: 3,
            prefilter_n: 10,
            relevance_threshold: 6.0,
            min_fitness: 2.0,
            cache_ttl_secs: 3_600,
            recency_half_life_months: 18.0,
        }
    }
}

struct CachedSelection {
    outcome: SelectionOutcome,
    computed_at: DateTime<Utc>,
}

pub struct SelectionEngine {
    config: SelectionConfig,
    scorer: Arc<dyn RelevanceScorer>,
    cache: Mutex<HashMap<(u64, u64), CachedSelection>>,
}

struct ScoredCandidate {
    record: EvidenceRecord,
    /// Per-requirement relevance, index-aligned with the requirement list.
    relevance: Vec<f64>,
    fitness: f64,
}

impl SelectionEngine {
    pub fn new(config: SelectionConfig, scorer: Arc<dyn RelevanceScorer>) -> Self {
        Self {
            config,
            scorer,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Selects the best-fit evidence for a requirement set. The posting's
    /// keyword inventory steers the pre-filter; it is part of the cache key.
    pub async fn select(
        &self,
        requirements: &[String],
        keywords: &[KeywordEntry],
        corpus: &EvidenceCorpus,
    ) -> Result<SelectionOutcome, StageError> {
        let mut inputs = requirements.to_vec();
        inputs.extend(
            keywords
                .iter()
                .map(|k| format!("{}={:.3}", k.keyword, k.weighted_score)),
        );
        let key = (fingerprint(&inputs), corpus.version);
        if let Some(hit) = self.cache_lookup(key) {
            debug!(corpus_version = corpus.version, "selection cache hit");
            return Ok(hit);
        }

        // Corpus smaller than K: the whole corpus is the candidate set and
        // the pre-filter is skipped; scoring still runs for the mapping.
        let candidates: Vec<&EvidenceRecord> = if corpus.len() <= self.config.k {
            corpus.records.iter().collect()
        } else {
            prefilter::prefilter(
                requirements,
                keywords,
                &corpus.records,
                self.config.prefilter_n,
            )
        };

        let mut scored = Vec::with_capacity(candidates.len());
        for record in candidates {
            let mut relevance = Vec::with_capacity(requirements.len());
            for requirement in requirements {
                relevance.push(self.scorer.relevance(requirement, record).await?);
            }
            let fitness = weighted_fitness(&relevance);
            scored.push(ScoredCandidate {
                record: record.clone(),
                relevance,
                fitness,
            });
        }

        self.rank(&mut scored);

        // Below the fitness floor the selection collapses to the single best
        // candidate; downstream stages need at least one record.
        let take = if scored.iter().any(|c| c.fitness >= self.config.min_fitness) {
            self.config.k.min(scored.len())
        } else {
            1.min(scored.len())
        };
        let chosen = &scored[..take];

        let outcome = SelectionOutcome {
            selected: chosen.iter().map(|c| c.record.id).collect(),
            mapping: self.build_mapping(requirements, chosen),
            corpus_version: corpus.version,
        };

        self.cache_store(key, &outcome);
        Ok(outcome)
    }

    /// Orders candidates by fitness, then recency, then presence of
    /// quantified metrics, then id for determinism.
    fn rank(&self, scored: &mut [ScoredCandidate]) {
        let half_life = self.config.recency_half_life_months;
        scored.sort_by(|a, b| {
            b.fitness
                .partial_cmp(&a.fitness)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.record
                        .recency_score(half_life)
                        .partial_cmp(&a.record.recency_score(half_life))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| b.record.has_metrics().cmp(&a.record.has_metrics()))
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
    }

    fn build_mapping(
        &self,
        requirements: &[String],
        chosen: &[ScoredCandidate],
    ) -> Vec<RequirementEvidence> {
        requirements
            .iter()
            .enumerate()
            .map(|(idx, requirement)| {
                let mut hits: Vec<(f64, Uuid)> = chosen
                    .iter()
                    .filter(|c| c.relevance[idx] >= self.config.relevance_threshold)
                    .map(|c| (c.relevance[idx], c.record.id))
                    .collect();
                hits.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

                if !hits.is_empty() {
                    return RequirementEvidence {
                        requirement: requirement.clone(),
                        evidence: hits.into_iter().map(|(_, id)| id).collect(),
                        low_confidence: false,
                    };
                }

                // Nothing cleared the threshold: attribute the strongest
                // selected record and flag it.
                let best = chosen
                    .iter()
                    .max_by(|a, b| {
                        a.relevance[idx]
                            .partial_cmp(&b.relevance[idx])
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|c| c.record.id);
                RequirementEvidence {
                    requirement: requirement.clone(),
                    evidence: best.into_iter().collect(),
                    low_confidence: true,
                }
            })
            .collect()
    }

    fn cache_lookup(&self, key: (u64, u64)) -> Option<SelectionOutcome> {
        let ttl = Duration::seconds(self.config.cache_ttl_secs as i64);
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .get(&key)
            .filter(|c| Utc::now() - c.computed_at < ttl)
            .map(|c| c.outcome.clone())
    }

    fn cache_store(&self, key: (u64, u64), outcome: &SelectionOutcome) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(
            key,
            CachedSelection {
                outcome: outcome.clone(),
                computed_at: Utc::now(),
            },
        );
    }
}

/// Aggregates per-requirement relevance into one fitness value. Requirement
/// order encodes priority: weight decays as 1/(1+index).
fn weighted_fitness(relevance: &[f64]) -> f64 {
    if relevance.is_empty() {
        return 0.0;
    }
    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for (idx, rel) in relevance.iter().enumerate() {
        let weight = 1.0 / (1.0 + idx as f64);
        weighted += rel * weight;
        total_weight += weight;
    }
    weighted / total_weight
}

/// Order-independent fingerprint of a requirement set. Per-string hashes are
/// XOR-combined so permutations collide on purpose; the count guards against
/// trivial collisions between subsets.
pub fn fingerprint(requirements: &[String]) -> u64 {
    let mut combined = 0u64;
    for requirement in requirements {
        let mut hasher = DefaultHasher::new();
        requirement.trim().to_lowercase().hash(&mut hasher);
        combined ^= hasher.finish();
    }
    combined.wrapping_add(requirements.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::evidence::fixtures::record;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scorer that counts invocations and scores by keyword containment.
    struct CountingScorer {
        calls: AtomicU32,
    }

    #[async_trait]
    impl RelevanceScorer for CountingScorer {
        async fn relevance(
            &self,
            requirement: &str,
            record: &EvidenceRecord,
        ) -> Result<f64, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let req = requirement.to_lowercase();
            let hit = record
                .keywords
                .iter()
                .any(|k| req.contains(&k.to_lowercase()));
            Ok(if hit { 8.0 } else { 1.0 })
        }
    }

    fn engine(k: usize) -> (SelectionEngine, Arc<CountingScorer>) {
        let scorer = Arc::new(CountingScorer {
            calls: AtomicU32::new(0),
        });
        let config = SelectionConfig {
            k,
            ..SelectionConfig::default()
        };
        (
            SelectionEngine::new(config, Arc::clone(&scorer) as Arc<dyn RelevanceScorer>),
            scorer,
        )
    }

    fn corpus_of(n: usize, version: u64) -> EvidenceCorpus {
        let records = (0..n)
            .map(|i| {
                let kw = if i % 2 == 0 { "rust" } else { "sales" };
                record(Uuid::new_v4(), &format!("did thing {i} with {kw}"), &[kw])
            })
            .collect();
        EvidenceCorpus::new(version, records)
    }

    #[tokio::test]
    async fn test_selection_bounded_by_k() {
        let (engine, _) = engine(3);
        let corpus = corpus_of(8, 1);
        let reqs = vec!["rust experience".to_string()];

        let outcome = engine.select(&reqs, &[], &corpus).await.unwrap();
        assert_eq!(outcome.selected.len(), 3);
    }

    #[tokio::test]
    async fn test_small_corpus_returned_whole() {
        let (engine, _) = engine(3);
        let corpus = corpus_of(2, 1);
        let reqs = vec!["rust".to_string()];

        let outcome = engine.select(&reqs, &[], &corpus).await.unwrap();
        assert_eq!(outcome.selected.len(), 2);
    }

    #[tokio::test]
    async fn test_scenario_five_records_two_requirements_k3() {
        let (engine, _) = engine(3);
        let corpus = corpus_of(5, 1);
        let reqs = vec!["rust services".to_string(), "sales enablement".to_string()];

        let outcome = engine.select(&reqs, &[], &corpus).await.unwrap();
        assert_eq!(outcome.selected.len(), 3);
        assert_eq!(outcome.mapping.len(), 2);
        assert!(outcome.mapping.iter().all(|m| !m.evidence.is_empty()));
    }

    #[tokio::test]
    async fn test_repeated_select_is_deterministic_and_cached() {
        let (engine, scorer) = engine(2);
        let corpus = corpus_of(6, 7);
        let reqs = vec!["rust".to_string()];

        let first = engine.select(&reqs, &[], &corpus).await.unwrap();
        let calls_after_first = scorer.calls.load(Ordering::SeqCst);
        let second = engine.select(&reqs, &[], &corpus).await.unwrap();

        assert_eq!(first.selected, second.selected);
        assert_eq!(
            scorer.calls.load(Ordering::SeqCst),
            calls_after_first,
            "cache hit must not invoke the scorer"
        );
    }

    #[tokio::test]
    async fn test_corpus_version_change_invalidates_cache() {
        let (engine, scorer) = engine(2);
        let reqs = vec!["rust".to_string()];

        engine.select(&reqs, &[], &corpus_of(6, 1)).await.unwrap();
        let calls_v1 = scorer.calls.load(Ordering::SeqCst);
        engine.select(&reqs, &[], &corpus_of(6, 2)).await.unwrap();

        assert!(scorer.calls.load(Ordering::SeqCst) > calls_v1);
    }

    #[tokio::test]
    async fn test_low_confidence_fallback_attribution() {
        let (engine, _) = engine(2);
        // No record matches "embedded firmware"; every relevance is 1.0,
        // below the default threshold of 6.0.
        let corpus = corpus_of(4, 1);
        let reqs = vec!["embedded firmware".to_string()];

        let outcome = engine.select(&reqs, &[], &corpus).await.unwrap();
        let mapping = &outcome.mapping[0];
        assert!(mapping.low_confidence);
        assert_eq!(mapping.evidence.len(), 1);
        assert!(outcome.selected.contains(&mapping.evidence[0]));
    }

    #[tokio::test]
    async fn test_all_below_fitness_floor_returns_single_best() {
        let scorer = Arc::new(CountingScorer {
            calls: AtomicU32::new(0),
        });
        let config = SelectionConfig {
            k: 3,
            min_fitness: 5.0, // every "sales"-free requirement scores 1.0
            ..SelectionConfig::default()
        };
        let engine = SelectionEngine::new(config, scorer);
        let corpus = corpus_of(6, 1);
        let reqs = vec!["embedded firmware".to_string()];

        let outcome = engine.select(&reqs, &[], &corpus).await.unwrap();
        assert_eq!(outcome.selected.len(), 1);
    }

    #[tokio::test]
    async fn test_metrics_break_ties() {
        let (engine, _) = engine(1);
        let plain = record(Uuid::new_v4(), "built rust services", &["rust"]);
        let mut quantified = record(Uuid::new_v4(), "built rust services", &["rust"]);
        quantified.metrics = vec!["cut latency 40%".into()];

        let corpus = EvidenceCorpus::new(1, vec![plain, quantified.clone()]);
        let reqs = vec!["rust work".to_string()];

        let outcome = engine.select(&reqs, &[], &corpus).await.unwrap();
        // Equal fitness and recency: quantified metrics win the tie.
        assert_eq!(outcome.selected, vec![quantified.id]);
    }

    #[tokio::test]
    async fn test_keyword_inventory_steers_the_candidate_pool() {
        let scorer = Arc::new(CountingScorer {
            calls: AtomicU32::new(0),
        });
        let config = SelectionConfig {
            k: 1,
            prefilter_n: 1,
            ..SelectionConfig::default()
        };
        let engine = SelectionEngine::new(config, scorer);

        // Identical summaries, so only the posting's keyword inventory can
        // decide which record survives the pre-filter cut.
        let kube = record(Uuid::new_v4(), "ran the platform team", &["kubernetes"]);
        let terra = record(Uuid::new_v4(), "ran the platform team", &["terraform"]);
        let corpus = EvidenceCorpus::new(1, vec![kube.clone(), terra.clone()]);
        let reqs = vec!["platform operations".to_string()];

        let keyword = |name: &str| KeywordEntry {
            keyword: name.to_string(),
            frequency: 3,
            position_weight: 0.8,
            weighted_score: 2.4,
        };

        let outcome = engine
            .select(&reqs, &[keyword("kubernetes")], &corpus)
            .await
            .unwrap();
        assert_eq!(outcome.selected, vec![kube.id]);

        // Different inventory, same requirements: must not hit the cache.
        let outcome = engine
            .select(&reqs, &[keyword("terraform")], &corpus)
            .await
            .unwrap();
        assert_eq!(outcome.selected, vec![terra.id]);
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a = vec!["rust".to_string(), "kafka".to_string()];
        let b = vec!["kafka".to_string(), "rust".to_string()];
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_distinguishes_sets() {
        let a = vec!["rust".to_string()];
        let b = vec!["kafka".to_string()];
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_weighted_fitness_prioritizes_early_requirements() {
        // High relevance on the first requirement beats high on the second.
        let first_strong = weighted_fitness(&[9.0, 1.0]);
        let second_strong = weighted_fitness(&[1.0, 9.0]);
        assert!(first_strong > second_strong);
    }

    #[test]
    fn test_weighted_fitness_empty_is_zero() {
        assert_eq!(weighted_fitness(&[]), 0.0);
    }
}
