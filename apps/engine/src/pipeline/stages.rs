//! The seven stage implementations.
//!
//! Each stage reads its dependencies from the job record, calls out through
//! the provider traits, and writes its output slot exactly once. Stages
//! return `DependencyMissing` when upstream output is absent; the runner
//! turns that into a skip rather than a failure.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::StageError;
use crate::models::company::{canonical_company_key, CompanyProfile, Contact, ResearchPayload};
use crate::models::job::{
    fill_slot, ArtifactRef, ExtractedRequirements, FitAnalysis, GeneratedArtifact, KeywordEntry,
};
use crate::pipeline::prompts;
use crate::pipeline::runner::JobContext;
use crate::providers::{complete_json, SearchResult};
use crate::research_cache::Completeness;

pub(crate) async fn extract(ctx: &JobContext) -> Result<(), StageError> {
    ctx.budget.charge(1)?;

    let prompt = prompts::EXTRACT_PROMPT_TEMPLATE
        .replace("{title}", &ctx.input.title)
        .replace("{posting}", &ctx.input.posting_text);
    let extracted: ExtractedRequirements =
        complete_json(ctx.providers.llm.as_ref(), &prompt, prompts::EXTRACT_SYSTEM).await?;

    if extracted.requirements.is_empty() {
        return Err(StageError::PermanentValidation(
            "posting yielded no requirements".into(),
        ));
    }

    info!(
        requirements = extracted.requirements.len(),
        keywords = extracted.keyword_inventory.len(),
        "requirements extracted"
    );
    ctx.with_record(|r| {
        fill_slot(&mut r.requirements, extracted);
    });
    Ok(())
}

/// Raw analysis reply; cited ids arrive as strings and are validated against
/// the corpus before they reach the record.
#[derive(Debug, Deserialize)]
struct FitAnalysisReply {
    overall_score: u32,
    rationale: String,
    #[serde(default)]
    gaps: Vec<String>,
    #[serde(default)]
    cited_evidence: Vec<String>,
}

pub(crate) async fn analyze(ctx: &JobContext) -> Result<(), StageError> {
    let requirements = ctx
        .with_record(|r| r.requirements.clone())
        .ok_or_else(|| StageError::DependencyMissing("extracted requirements".into()))?;
    ctx.budget.charge(1)?;

    let numbered: Vec<String> = requirements
        .requirements
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let tag = if r.is_required { "required" } else { "preferred" };
            format!("{}. [{tag}] {}", i + 1, r.text)
        })
        .collect();
    let digest: Vec<String> = ctx
        .corpus
        .records
        .iter()
        .map(|r| format!("{}: {}", r.id, r.summary))
        .collect();
    let digest = if digest.is_empty() {
        "(no evidence on file)".to_string()
    } else {
        digest.join("\n")
    };

    let prompt = prompts::ANALYZE_PROMPT_TEMPLATE
        .replace("{requirements}", &numbered.join("\n"))
        .replace("{keywords}", &render_keywords(&requirements.keyword_inventory))
        .replace("{evidence}", &digest);
    let reply: FitAnalysisReply =
        complete_json(ctx.providers.llm.as_ref(), &prompt, prompts::ANALYZE_SYSTEM).await?;

    let cited: Vec<Uuid> = reply
        .cited_evidence
        .iter()
        .filter_map(|s| Uuid::parse_str(s).ok())
        .filter(|id| ctx.corpus.get(*id).is_some())
        .collect();
    if cited.len() < reply.cited_evidence.len() {
        warn!(
            claimed = reply.cited_evidence.len(),
            valid = cited.len(),
            "dropped citations not present in the corpus"
        );
    }

    let fit = FitAnalysis {
        overall_score: reply.overall_score.min(100),
        rationale: reply.rationale,
        gaps: reply.gaps,
        cited_evidence: cited,
    };
    info!(score = fit.overall_score, gaps = fit.gaps.len(), "fit analyzed");
    ctx.with_record(|r| {
        fill_slot(&mut r.fit, fit);
    });
    Ok(())
}

pub(crate) async fn company_enrich(ctx: &JobContext) -> Result<(), StageError> {
    let company = ctx.input.company_name.clone();
    let key = canonical_company_key(&company);

    let payload = ctx
        .cache
        .resolve(
            &key,
            || fetch_company_full(ctx, &key, &company),
            |_cached| fetch_contact_supplement(ctx, &company),
        )
        .await?;

    info!(
        company = %payload.profile.name,
        contacts = payload.contacts.len(),
        "company research resolved"
    );
    ctx.with_record(|r| {
        fill_slot(&mut r.company_profile, payload.profile.clone());
    });
    Ok(())
}

async fn fetch_company_full(
    ctx: &JobContext,
    key: &str,
    company: &str,
) -> Result<ResearchPayload, StageError> {
    ctx.budget.charge(2)?;

    let results = ctx
        .providers
        .web
        .fetch(&format!("{company} company overview"))
        .await
        .map_err(StageError::from)?;
    if results.snippets.is_empty() {
        return Err(StageError::TransientIo(format!(
            "no search results for '{company}'"
        )));
    }

    let prompt = prompts::PROFILE_PROMPT_TEMPLATE
        .replace("{company}", company)
        .replace("{snippets}", &render_snippets(&results));
    let profile: CompanyProfile =
        complete_json(ctx.providers.llm.as_ref(), &prompt, prompts::PROFILE_SYSTEM).await?;

    match discover_contacts(ctx, company).await {
        Ok(contacts) => Ok(ResearchPayload { profile, contacts }),
        Err(err) => {
            // The profile is the expensive half. Keep it as a partial entry
            // so the next run only needs the contact supplement.
            warn!(company, %err, "contact discovery failed; caching profile as partial");
            ctx.cache.put(
                key,
                ResearchPayload {
                    profile,
                    contacts: Vec::new(),
                },
                Completeness::Partial,
            );
            Err(err)
        }
    }
}

async fn fetch_contact_supplement(
    ctx: &JobContext,
    company: &str,
) -> Result<Vec<Contact>, StageError> {
    discover_contacts(ctx, company).await
}

#[derive(Debug, Deserialize)]
struct ContactsReply {
    #[serde(default)]
    contacts: Vec<Contact>,
}

async fn discover_contacts(ctx: &JobContext, company: &str) -> Result<Vec<Contact>, StageError> {
    ctx.budget.charge(2)?;

    let results = ctx
        .providers
        .web
        .fetch(&format!("{company} leadership team hiring manager"))
        .await
        .map_err(StageError::from)?;
    if results.snippets.is_empty() {
        debug!(company, "no search results for contact discovery");
        return Ok(Vec::new());
    }

    let prompt = prompts::CONTACTS_PROMPT_TEMPLATE
        .replace("{company}", company)
        .replace("{snippets}", &render_snippets(&results));
    let reply: ContactsReply =
        complete_json(ctx.providers.llm.as_ref(), &prompt, prompts::CONTACTS_SYSTEM).await?;
    Ok(reply.contacts)
}

pub(crate) async fn people_enrich(ctx: &JobContext) -> Result<(), StageError> {
    let contacts = discover_contacts(ctx, &ctx.input.company_name).await?;
    info!(found = contacts.len(), "people enrichment finished");
    ctx.with_record(|r| {
        fill_slot(&mut r.contacts, contacts);
    });
    Ok(())
}

pub(crate) async fn rank_fit(ctx: &JobContext) -> Result<(), StageError> {
    let requirements = ctx
        .with_record(|r| r.requirements.clone())
        .ok_or_else(|| StageError::DependencyMissing("extracted requirements".into()))?;
    if ctx.corpus.is_empty() {
        return Err(StageError::PermanentValidation(
            "evidence corpus is empty".into(),
        ));
    }
    ctx.budget.charge(1)?;

    let texts = requirements.requirement_texts();
    let outcome = ctx
        .selection
        .select(&texts, &requirements.keyword_inventory, &ctx.corpus)
        .await?;
    info!(
        selected = outcome.selected.len(),
        low_confidence = outcome.mapping.iter().filter(|m| m.low_confidence).count(),
        "evidence selected"
    );
    ctx.with_record(|r| {
        fill_slot(&mut r.selection, outcome);
    });
    Ok(())
}

pub(crate) async fn generate(ctx: &JobContext) -> Result<(), StageError> {
    let selection = ctx
        .with_record(|r| r.selection.clone())
        .ok_or_else(|| StageError::DependencyMissing("evidence selection".into()))?;
    ctx.budget.charge(2)?;

    let snapshot = ctx.snapshot();
    let profile_text = snapshot
        .company_profile
        .map(|p| {
            let mut text = format!("{}: {}", p.name, p.overview);
            if let Some(industry) = p.industry {
                text.push_str(&format!(" Industry: {industry}."));
            }
            text
        })
        .unwrap_or_else(|| "(no company profile available)".into());
    let fit_text = snapshot
        .fit
        .map(|f| format!("Score {}/100. {}", f.overall_score, f.rationale))
        .unwrap_or_else(|| "(no fit assessment available)".into());
    let contacts_text = snapshot
        .contacts
        .filter(|c| !c.is_empty())
        .map(|c| {
            c.iter()
                .map(|p| format!("{} ({})", p.name, p.title))
                .collect::<Vec<_>>()
                .join("; ")
        })
        .unwrap_or_else(|| "(none found)".into());
    let evidence_text = selection
        .selected
        .iter()
        .filter_map(|id| ctx.corpus.get(*id))
        .map(|r| r.render_full())
        .collect::<Vec<_>>()
        .join("\n---\n");

    let cover_prompt = prompts::COVER_LETTER_PROMPT_TEMPLATE
        .replace("{title}", &ctx.input.title)
        .replace("{company}", &ctx.input.company_name)
        .replace("{profile}", &profile_text)
        .replace("{fit}", &fit_text)
        .replace("{evidence}", &evidence_text);
    let cover = ctx
        .providers
        .llm
        .complete(&cover_prompt, prompts::COVER_LETTER_SYSTEM)
        .await
        .map_err(StageError::from)?;

    let outreach_prompt = prompts::OUTREACH_PROMPT_TEMPLATE
        .replace("{title}", &ctx.input.title)
        .replace("{company}", &ctx.input.company_name)
        .replace("{contacts}", &contacts_text)
        .replace("{evidence}", &evidence_text);
    let outreach = ctx
        .providers
        .llm
        .complete(&outreach_prompt, prompts::OUTREACH_SYSTEM)
        .await
        .map_err(StageError::from)?;

    let drafts = vec![
        GeneratedArtifact {
            name: "cover_letter.md".into(),
            content: cover,
        },
        GeneratedArtifact {
            name: "outreach_email.md".into(),
            content: outreach,
        },
    ];
    info!(drafts = drafts.len(), "artifacts generated");
    ctx.with_record(|r| {
        fill_slot(&mut r.drafts, drafts);
    });
    Ok(())
}

pub(crate) async fn publish(ctx: &JobContext) -> Result<(), StageError> {
    let drafts = ctx
        .with_record(|r| r.drafts.clone())
        .ok_or_else(|| StageError::DependencyMissing("generated drafts".into()))?;

    let mut published = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let store = Arc::clone(&ctx.providers.artifacts);
        let stored_name = format!("{}-{}", ctx.job_id(), draft.name);
        let blob = draft.content.into_bytes();
        let reference = ctx
            .data_pool
            .run(move || store.store(&stored_name, &blob))
            .await?
            .map_err(StageError::from)?;
        published.push(ArtifactRef {
            name: draft.name,
            reference,
        });
    }

    info!(artifacts = published.len(), "artifacts published");
    ctx.with_record(|r| {
        fill_slot(&mut r.published, published);
    });

    let snapshot = ctx.snapshot();
    let docs = Arc::clone(&ctx.providers.documents);
    ctx.data_pool
        .run(move || docs.save(&snapshot))
        .await?
        .map_err(StageError::from)?;
    Ok(())
}

fn render_keywords(inventory: &[KeywordEntry]) -> String {
    if inventory.is_empty() {
        return "(none)".to_string();
    }
    let mut sorted: Vec<&KeywordEntry> = inventory.iter().collect();
    sorted.sort_by(|a, b| {
        b.weighted_score
            .partial_cmp(&a.weighted_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted
        .iter()
        .take(15)
        .map(|k| format!("{} ({:.1})", k.keyword, k.weighted_score))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_snippets(results: &SearchResult) -> String {
    results
        .snippets
        .iter()
        .take(8)
        .map(|s| format!("- {} ({})\n  {}", s.title, s.url, s.content))
        .collect::<Vec<_>>()
        .join("\n")
}
