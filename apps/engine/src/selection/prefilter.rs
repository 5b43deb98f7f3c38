//! Cheap pre-filter for evidence selection.
//!
//! Scores each record against the requirement set using token overlap over
//! the condensed/keyword representation only, plus a boost for the posting's
//! weighted keyword inventory, then keeps the top N for the expensive
//! scorer. Cheap enough to run over the full corpus on every job.

use std::collections::HashSet;

use crate::models::evidence::EvidenceRecord;
use crate::models::job::KeywordEntry;

/// Token-overlap similarity between a requirement and a record's condensed
/// text: the fraction of requirement tokens covered by the record.
pub fn similarity(requirement: &str, record_text: &str) -> f64 {
    let req_tokens = tokenize(requirement);
    if req_tokens.is_empty() {
        return 0.0;
    }
    let record_tokens: HashSet<String> = tokenize(record_text).into_iter().collect();
    let covered = req_tokens
        .iter()
        .filter(|t| record_tokens.contains(*t))
        .count();
    covered as f64 / req_tokens.len() as f64
}

/// Mean similarity of one record across all requirements.
pub fn mean_similarity(requirements: &[String], record: &EvidenceRecord) -> f64 {
    if requirements.is_empty() {
        return 0.0;
    }
    let text = record.search_text();
    let total: f64 = requirements.iter().map(|r| similarity(r, &text)).sum();
    total / requirements.len() as f64
}

/// Share of the inventory's total weight whose keywords appear in the
/// record's condensed text, in `[0, 1]`.
pub fn keyword_boost(keywords: &[KeywordEntry], record_text: &str) -> f64 {
    let total: f64 = keywords.iter().map(|k| f64::from(k.weighted_score)).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let text = record_text.to_lowercase();
    let matched: f64 = keywords
        .iter()
        .filter(|k| text.contains(&k.keyword.to_lowercase()))
        .map(|k| f64::from(k.weighted_score))
        .sum();
    matched / total
}

/// Ranks the corpus by mean similarity plus keyword boost and keeps the top
/// `n` records. Ties are broken by record id so the pre-filter is
/// deterministic.
pub fn prefilter<'a>(
    requirements: &[String],
    keywords: &[KeywordEntry],
    records: &'a [EvidenceRecord],
    n: usize,
) -> Vec<&'a EvidenceRecord> {
    let mut scored: Vec<(f64, &EvidenceRecord)> = records
        .iter()
        .map(|r| {
            let score =
                mean_similarity(requirements, r) + keyword_boost(keywords, &r.search_text());
            (score, r)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.id.cmp(&b.1.id))
    });

    scored.into_iter().take(n).map(|(_, r)| r).collect()
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::evidence::fixtures::record;
    use uuid::Uuid;

    #[test]
    fn test_similarity_full_and_none() {
        assert_eq!(similarity("rust systems", "rust systems experience"), 1.0);
        assert_eq!(similarity("rust", "java spring"), 0.0);
    }

    #[test]
    fn test_similarity_partial_coverage() {
        let s = similarity("distributed rust services", "rust services in production");
        assert!(s > 0.5 && s < 1.0, "similarity was {s}");
    }

    #[test]
    fn test_short_tokens_ignored() {
        // "go" is two characters and must not match.
        assert_eq!(similarity("go", "go programming"), 0.0);
    }

    fn keyword(keyword: &str, weighted_score: f32) -> KeywordEntry {
        KeywordEntry {
            keyword: keyword.to_string(),
            frequency: 1,
            position_weight: 1.0,
            weighted_score,
        }
    }

    #[test]
    fn test_prefilter_keeps_top_n_by_mean_similarity() {
        let reqs = vec!["rust distributed systems".to_string()];
        let strong = record(Uuid::new_v4(), "built distributed systems in rust", &["rust"]);
        let weak = record(Uuid::new_v4(), "wrote marketing copy", &[]);
        let records = vec![weak.clone(), strong.clone()];

        let kept = prefilter(&reqs, &[], &records, 1);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, strong.id);
    }

    #[test]
    fn test_prefilter_is_deterministic_on_ties() {
        let reqs = vec!["kubernetes".to_string()];
        let a = record(Uuid::new_v4(), "same text", &[]);
        let b = record(Uuid::new_v4(), "same text", &[]);

        let forward_records = [a.clone(), b.clone()];
        let reversed_records = [b, a];
        let forward = prefilter(&reqs, &[], &forward_records, 2);
        let reversed = prefilter(&reqs, &[], &reversed_records, 2);
        let forward_ids: Vec<_> = forward.iter().map(|r| r.id).collect();
        let reversed_ids: Vec<_> = reversed.iter().map(|r| r.id).collect();
        assert_eq!(forward_ids, reversed_ids);
    }

    #[test]
    fn test_prefilter_handles_small_corpus() {
        let reqs = vec!["rust".to_string()];
        let only = record(Uuid::new_v4(), "rust", &[]);
        let kept = prefilter(&reqs, &[], std::slice::from_ref(&only), 10);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_keyword_boost_is_weight_share() {
        let keywords = vec![keyword("kubernetes", 3.0), keyword("terraform", 1.0)];
        assert_eq!(keyword_boost(&keywords, "ran kubernetes clusters"), 0.75);
        assert_eq!(keyword_boost(&keywords, "wrote marketing copy"), 0.0);
        assert_eq!(keyword_boost(&[], "ran kubernetes clusters"), 0.0);
    }

    #[test]
    fn test_weighted_keywords_separate_equal_similarity_records() {
        let reqs = vec!["platform operations".to_string()];
        // Identical summaries: only the keyword inventory can separate them.
        let kube = record(Uuid::new_v4(), "ran the platform operations team", &["kubernetes"]);
        let terra = record(Uuid::new_v4(), "ran the platform operations team", &["terraform"]);
        let records = [kube.clone(), terra.clone()];

        let kept = prefilter(&reqs, &[keyword("kubernetes", 2.4)], &records, 1);
        assert_eq!(kept[0].id, kube.id);

        let kept = prefilter(&reqs, &[keyword("terraform", 2.4)], &records, 1);
        assert_eq!(kept[0].id, terra.id);
    }
}
