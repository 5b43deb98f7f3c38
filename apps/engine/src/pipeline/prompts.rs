//! Prompt templates for the model-backed stages.
//!
//! Every structured prompt pins an EXACT response schema so the reply can be
//! deserialized directly into the stage's output slot.

pub const EXTRACT_SYSTEM: &str = "You are an expert at analyzing job postings. You extract structured requirements and keyword inventories with high precision. You always respond with valid JSON only, no markdown fences, no commentary.";

pub const EXTRACT_PROMPT_TEMPLATE: &str = r#"Analyze this job posting and extract its requirements and keyword inventory.

Job title: {title}

Job posting:
{posting}

Return JSON matching this EXACT schema:
{
  "requirements": [
    {"text": "requirement text", "is_required": true}
  ],
  "keyword_inventory": [
    {"keyword": "kubernetes", "frequency": 3, "position_weight": 0.8, "weighted_score": 2.4}
  ]
}

Rules:
- List requirements in priority order, most important first.
- "is_required" is true for must-have requirements, false for nice-to-haves.
- position_weight: 1.0 if the keyword appears in the title, 0.8 in requirements, 0.6 in responsibilities, 0.3 elsewhere. Use the highest position the keyword appears in.
- weighted_score = frequency * position_weight.
- Do not invent requirements that are not in the posting."#;

pub const ANALYZE_SYSTEM: &str = "You are a career advisor assessing how well a candidate's track record fits a role. You are honest about gaps. You always respond with valid JSON only, no markdown fences, no commentary.";

pub const ANALYZE_PROMPT_TEMPLATE: &str = r#"Assess how well this candidate fits the role below.

Requirements (priority order):
{requirements}

Weighted keywords from the posting (keyword (weighted score)):
{keywords}

Candidate evidence (id: summary):
{evidence}

Return JSON matching this EXACT schema:
{
  "overall_score": 72,
  "rationale": "2-4 sentence fit assessment",
  "gaps": ["requirement with no supporting evidence"],
  "cited_evidence": ["uuid-of-evidence-record"]
}

Rules:
- overall_score is 0-100.
- cited_evidence may only contain ids from the evidence list above.
- List a gap for every required item with no supporting evidence."#;

pub const PROFILE_SYSTEM: &str = "You are a company research analyst. You distill search results into a concise factual company profile. You always respond with valid JSON only, no markdown fences, no commentary.";

pub const PROFILE_PROMPT_TEMPLATE: &str = r#"Build a company profile for "{company}" from these search results.

Search results:
{snippets}

Return JSON matching this EXACT schema:
{
  "name": "Company Name",
  "overview": "2-4 sentence overview of what the company does",
  "industry": "industry or null",
  "headquarters": "city, country or null"
}

Rules:
- Only state facts supported by the search results.
- Use null for industry or headquarters when the results do not say."#;

pub const CONTACTS_SYSTEM: &str = "You are a company research analyst identifying people relevant to a job application. You never invent names or contact details. You always respond with valid JSON only, no markdown fences, no commentary.";

pub const CONTACTS_PROMPT_TEMPLATE: &str = r#"Identify people at "{company}" who would be relevant to a job application (hiring managers, team leads, recruiters, executives) from these search results.

Search results:
{snippets}

Return JSON matching this EXACT schema:
{
  "contacts": [
    {"name": "Jane Doe", "title": "VP Engineering", "email": null, "source": "https://..."}
  ]
}

Rules:
- Only include people actually named in the search results.
- email is null unless explicitly present in a result.
- source is the url of the result the person came from.
- An empty list is a valid answer."#;

pub const COVER_LETTER_SYSTEM: &str = "You are an expert cover letter writer. You write specific, evidence-backed letters in a professional but warm register. Respond with the letter as markdown only, no surrounding commentary.";

pub const COVER_LETTER_PROMPT_TEMPLATE: &str = r#"Write a one-page cover letter for this application.

Role: {title} at {company}

Company profile:
{profile}

Fit assessment:
{fit}

Selected evidence to draw on:
{evidence}

Rules:
- Ground every claim in the selected evidence; never invent experience.
- Address the company's actual business where the profile supports it.
- Three to four paragraphs, no placeholders like [Your Name]."#;

pub const OUTREACH_SYSTEM: &str = "You are an expert at concise professional outreach. You write short, specific emails that respect the reader's time. Respond with the email as markdown only, no surrounding commentary.";

pub const OUTREACH_PROMPT_TEMPLATE: &str = r#"Write a short outreach email (under 150 words) about the {title} role at {company}.

Contacts found (address the most relevant one, or a generic greeting if none):
{contacts}

Strongest evidence to mention:
{evidence}

Rules:
- One concrete, evidence-backed hook; no generic enthusiasm.
- End with a single low-friction ask.
- Include a subject line as the first line, prefixed "Subject: "."#;
