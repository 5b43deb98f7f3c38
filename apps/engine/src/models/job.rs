//! The per-opportunity job record accumulated across pipeline stages.
//!
//! Stage slots are explicit optional fields and every stage carries a tagged
//! outcome (`NotRun | Skipped | Succeeded | Failed`), so the append-only and
//! monotonic-status invariants hold at the type level rather than by
//! convention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::StageError;
use crate::models::company::{CompanyProfile, Contact};
use crate::selection::SelectionOutcome;

/// Minimal input needed to enqueue a job. Identity is externally supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInput {
    pub job_id: Uuid,
    pub title: String,
    pub company_name: String,
    pub posting_text: String,
}

impl JobInput {
    pub fn validate(&self) -> Result<(), String> {
        if self.posting_text.trim().is_empty() {
            return Err("posting_text must not be empty".into());
        }
        if self.company_name.trim().is_empty() {
            return Err("company_name must not be empty".into());
        }
        Ok(())
    }
}

/// Job lifecycle status. Forward-only; the first terminal value sticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Partial,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Partial | JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Partial => "partial",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed stage graph, in declared order. CompanyEnrich and PeopleEnrich
/// are independent and may run concurrently once Analyze completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Extract,
    Analyze,
    CompanyEnrich,
    PeopleEnrich,
    RankFit,
    Generate,
    Publish,
}

impl StageId {
    pub const ALL: [StageId; 7] = [
        StageId::Extract,
        StageId::Analyze,
        StageId::CompanyEnrich,
        StageId::PeopleEnrich,
        StageId::RankFit,
        StageId::Generate,
        StageId::Publish,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageId::Extract => "extract",
            StageId::Analyze => "analyze",
            StageId::CompanyEnrich => "company_enrich",
            StageId::PeopleEnrich => "people_enrich",
            StageId::RankFit => "rank_fit",
            StageId::Generate => "generate",
            StageId::Publish => "publish",
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged per-stage outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StageState {
    NotRun,
    Skipped { reason: String },
    Succeeded,
    Failed { error: StageError },
}

/// Execution record for one stage: outcome plus entry/exit timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: StageId,
    pub state: StageState,
    pub entered_at: Option<DateTime<Utc>>,
    pub exited_at: Option<DateTime<Utc>>,
}

/// One entry in the job's itemized error list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageErrorRecord {
    pub stage: StageId,
    pub kind: String,
    pub message: String,
    pub retryable: bool,
    pub at: DateTime<Utc>,
}

/// A single requirement extracted from the posting, in priority order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub text: String,
    pub is_required: bool,
}

/// A posting keyword weighted by frequency and position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordEntry {
    pub keyword: String,
    pub frequency: u32,
    /// title=1.0, requirements=0.8, responsibilities=0.6, about=0.3
    pub position_weight: f32,
    /// frequency * position_weight
    pub weighted_score: f32,
}

/// Output slot of the Extract stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRequirements {
    pub requirements: Vec<Requirement>,
    pub keyword_inventory: Vec<KeywordEntry>,
}

impl ExtractedRequirements {
    /// Ordered requirement texts, as consumed by selection and analysis.
    pub fn requirement_texts(&self) -> Vec<String> {
        self.requirements.iter().map(|r| r.text.clone()).collect()
    }
}

/// Output slot of the Analyze stage: candidate-fit summary with cited
/// evidence ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitAnalysis {
    /// 0-100.
    pub overall_score: u32,
    pub rationale: String,
    pub gaps: Vec<String>,
    pub cited_evidence: Vec<Uuid>,
}

/// Draft artifact produced by Generate, before publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub name: String,
    pub content: String,
}

/// Published artifact reference produced by Publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub reference: String,
}

/// The accumulated job record. Slots are written once by their owning stage
/// and never cleared afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub input: JobInput,
    pub status: JobStatus,
    pub stages: Vec<StageRecord>,

    pub requirements: Option<ExtractedRequirements>,
    pub fit: Option<FitAnalysis>,
    pub company_profile: Option<CompanyProfile>,
    pub contacts: Option<Vec<Contact>>,
    pub selection: Option<SelectionOutcome>,
    pub drafts: Option<Vec<GeneratedArtifact>>,
    pub published: Option<Vec<ArtifactRef>>,

    pub errors: Vec<StageErrorRecord>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(input: JobInput) -> Self {
        Self {
            job_id: input.job_id,
            stages: StageId::ALL
                .iter()
                .map(|&stage| StageRecord {
                    stage,
                    state: StageState::NotRun,
                    entered_at: None,
                    exited_at: None,
                })
                .collect(),
            input,
            status: JobStatus::Queued,
            requirements: None,
            fit: None,
            company_profile: None,
            contacts: None,
            selection: None,
            drafts: None,
            published: None,
            errors: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn stage(&self, id: StageId) -> &StageRecord {
        self.stages
            .iter()
            .find(|s| s.stage == id)
            .unwrap_or_else(|| unreachable!("all stages initialized in new()"))
    }

    pub fn stage_mut(&mut self, id: StageId) -> &mut StageRecord {
        self.stages
            .iter_mut()
            .find(|s| s.stage == id)
            .unwrap_or_else(|| unreachable!("all stages initialized in new()"))
    }

    /// Advances status forward. Once a terminal status is reached it is
    /// fixed; later writes are ignored.
    pub fn advance_status(&mut self, next: JobStatus) {
        if self.status.is_terminal() {
            return;
        }
        if self.status == JobStatus::Running && next == JobStatus::Queued {
            return;
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
    }

    pub fn mark_stage_entered(&mut self, id: StageId) {
        let stage = self.stage_mut(id);
        stage.entered_at = Some(Utc::now());
    }

    pub fn mark_stage_exited(&mut self, id: StageId, state: StageState) {
        let stage = self.stage_mut(id);
        stage.exited_at = Some(Utc::now());
        stage.state = state;
    }

    pub fn push_error(&mut self, stage: StageId, error: &StageError) {
        self.errors.push(StageErrorRecord {
            stage,
            kind: error.kind().to_string(),
            message: error.to_string(),
            retryable: error.retryable(),
            at: Utc::now(),
        });
    }

    /// Count of stages that produced usable output.
    pub fn succeeded_stages(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| s.state == StageState::Succeeded)
            .count()
    }
}

/// Writes a slot exactly once. Later writes are ignored, preserving the
/// append-only invariant across stages. Returns whether the write landed.
pub fn fill_slot<T>(slot: &mut Option<T>, value: T) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(value);
    true
}

/// One event in a job's stage-transition stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransition {
    pub job_id: Uuid,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: TransitionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransitionKind {
    StageEntered { stage: StageId },
    StageExited { stage: StageId },
    Terminal { status: JobStatus },
}

impl StageTransition {
    pub fn now(job_id: Uuid, kind: TransitionKind) -> Self {
        Self {
            job_id,
            at: Utc::now(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> JobInput {
        JobInput {
            job_id: Uuid::new_v4(),
            title: "Senior Rust Engineer".into(),
            company_name: "Acme".into(),
            posting_text: "Build distributed systems in Rust.".into(),
        }
    }

    #[test]
    fn test_input_validation() {
        assert!(input().validate().is_ok());

        let mut bad = input();
        bad.posting_text = "  ".into();
        assert!(bad.validate().is_err());

        let mut bad = input();
        bad.company_name = String::new();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_new_record_has_all_stages_not_run() {
        let record = JobRecord::new(input());
        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.stages.len(), StageId::ALL.len());
        assert!(record
            .stages
            .iter()
            .all(|s| s.state == StageState::NotRun));
    }

    #[test]
    fn test_status_is_monotonic_and_terminal_sticks() {
        let mut record = JobRecord::new(input());
        record.advance_status(JobStatus::Running);
        assert_eq!(record.status, JobStatus::Running);

        // Backward transition ignored.
        record.advance_status(JobStatus::Queued);
        assert_eq!(record.status, JobStatus::Running);

        record.advance_status(JobStatus::Partial);
        assert_eq!(record.status, JobStatus::Partial);
        assert!(record.completed_at.is_some());

        // Terminal is fixed once reached.
        record.advance_status(JobStatus::Completed);
        assert_eq!(record.status, JobStatus::Partial);
        record.advance_status(JobStatus::Failed);
        assert_eq!(record.status, JobStatus::Partial);
    }

    #[test]
    fn test_fill_slot_is_write_once() {
        let mut slot: Option<u32> = None;
        assert!(fill_slot(&mut slot, 1));
        assert!(!fill_slot(&mut slot, 2));
        assert_eq!(slot, Some(1));
    }

    #[test]
    fn test_push_error_records_taxonomy_fields() {
        let mut record = JobRecord::new(input());
        record.push_error(StageId::CompanyEnrich, &StageError::TransientIo("dns".into()));
        assert_eq!(record.errors.len(), 1);
        let e = &record.errors[0];
        assert_eq!(e.stage, StageId::CompanyEnrich);
        assert_eq!(e.kind, "transient_io");
        assert!(e.retryable);
    }

    #[test]
    fn test_stage_transitions_update_record() {
        let mut record = JobRecord::new(input());
        record.mark_stage_entered(StageId::Extract);
        assert!(record.stage(StageId::Extract).entered_at.is_some());

        record.mark_stage_exited(StageId::Extract, StageState::Succeeded);
        let s = record.stage(StageId::Extract);
        assert!(s.exited_at.is_some());
        assert_eq!(s.state, StageState::Succeeded);
        assert_eq!(record.succeeded_stages(), 1);
    }

    #[test]
    fn test_transition_event_serializes_with_tag() {
        let t = StageTransition::now(
            Uuid::new_v4(),
            TransitionKind::StageEntered {
                stage: StageId::Extract,
            },
        );
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("\"event\":\"stage_entered\""));
        assert!(json.contains("\"stage\":\"extract\""));
    }
}
