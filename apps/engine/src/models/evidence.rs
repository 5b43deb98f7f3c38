//! Evidence records ("STAR" achievements) and the read-only corpus the
//! pipeline scores against.
//!
//! Records are created and edited out of band; the pipeline never mutates
//! them. The corpus version changes whenever any record changes and is used
//! to invalidate derived caches.

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One candidate achievement in STAR form, with derived fields maintained by
/// the out-of-band editing process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub id: Uuid,
    pub company: String,
    pub role: String,
    pub period_start: Option<NaiveDate>,
    /// None means the role is current.
    pub period_end: Option<NaiveDate>,

    pub background: String,
    pub situations: Vec<String>,
    pub tasks: Vec<String>,
    pub actions: Vec<String>,
    pub results: Vec<String>,
    pub impact_summary: String,

    /// Condensed, lossy summary used by the cheap pre-filter.
    pub summary: String,
    pub keywords: Vec<String>,
    pub categories: Vec<String>,
    pub hard_skills: Vec<String>,
    pub soft_skills: Vec<String>,
    pub metrics: Vec<String>,
}

impl EvidenceRecord {
    pub fn has_metrics(&self) -> bool {
        self.metrics.iter().any(|m| !m.trim().is_empty())
    }

    /// Recency with exponential half-life decay. Current roles score 1.0.
    pub fn recency_score(&self, half_life_months: f64) -> f64 {
        let end = match self.period_end {
            Some(d) => d,
            None => return 1.0,
        };
        let now = Utc::now().naive_utc().date();
        let months = months_between(end, now);
        if months <= 0.0 {
            return 1.0;
        }
        (0.5_f64).powf(months / half_life_months).clamp(0.0, 1.0)
    }

    /// The cheap representation consulted by the pre-filter: condensed
    /// summary plus keyword/category/skill fields, nothing structured.
    pub fn search_text(&self) -> String {
        let mut parts = vec![self.summary.clone()];
        parts.extend(self.keywords.iter().cloned());
        parts.extend(self.categories.iter().cloned());
        parts.extend(self.hard_skills.iter().cloned());
        parts.extend(self.soft_skills.iter().cloned());
        parts.join(" ")
    }

    /// Full structured rendering handed to the expensive scorer. The exact
    /// field set is a tunable, so it lives in this one place.
    pub fn render_full(&self) -> String {
        let mut out = format!("Role: {} at {}\n", self.role, self.company);
        if !self.background.is_empty() {
            out.push_str(&format!("Background: {}\n", self.background));
        }
        render_list(&mut out, "Situation", &self.situations);
        render_list(&mut out, "Task", &self.tasks);
        render_list(&mut out, "Action", &self.actions);
        render_list(&mut out, "Result", &self.results);
        if !self.impact_summary.is_empty() {
            out.push_str(&format!("Impact: {}\n", self.impact_summary));
        }
        render_list(&mut out, "Metric", &self.metrics);
        out
    }
}

fn render_list(out: &mut String, label: &str, items: &[String]) {
    for item in items {
        out.push_str(&format!("{label}: {item}\n"));
    }
}

/// The candidate's full achievement corpus plus its version id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceCorpus {
    pub version: u64,
    pub records: Vec<EvidenceRecord>,
}

impl EvidenceCorpus {
    pub fn new(version: u64, records: Vec<EvidenceRecord>) -> Self {
        Self { version, records }
    }

    pub fn get(&self, id: Uuid) -> Option<&EvidenceRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn months_between(start: NaiveDate, end: NaiveDate) -> f64 {
    let years = end.year() - start.year();
    let months = end.month() as i32 - start.month() as i32;
    let total = years * 12 + months;
    let day_frac = (end.day() as f64 - start.day() as f64) / 30.0;
    (total as f64 + day_frac).max(0.0)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Minimal record with sensible defaults for unit tests.
    pub fn record(id: Uuid, summary: &str, keywords: &[&str]) -> EvidenceRecord {
        EvidenceRecord {
            id,
            company: "Acme".into(),
            role: "Engineer".into(),
            period_start: NaiveDate::from_ymd_opt(2020, 1, 1),
            period_end: None,
            background: String::new(),
            situations: vec![],
            tasks: vec![],
            actions: vec![],
            results: vec![],
            impact_summary: String::new(),
            summary: summary.to_string(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            categories: vec![],
            hard_skills: vec![],
            soft_skills: vec![],
            metrics: vec![],
        }
    }
}
