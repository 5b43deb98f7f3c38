//! Company research payloads: profile, contacts, and the key normalization
//! rules used by the research cache.

use serde::{Deserialize, Serialize};

/// A single person discovered during people/contact enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub title: String,
    pub email: Option<String>,
    pub source: String,
}

impl Contact {
    /// Identity key used for merge de-duplication. Email wins when present
    /// because names collide across sources.
    pub fn identity_key(&self) -> String {
        match self.email.as_deref() {
            Some(email) if !email.trim().is_empty() => email.trim().to_lowercase(),
            _ => normalize_whitespace(&self.name.to_lowercase()),
        }
    }
}

/// Researched company profile. Overview text is the expensive part; the
/// remaining fields are best-effort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub name: String,
    pub overview: String,
    pub industry: Option<String>,
    pub headquarters: Option<String>,
}

/// The unit stored in the research cache: profile plus discovered contacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchPayload {
    pub profile: CompanyProfile,
    pub contacts: Vec<Contact>,
}

impl ResearchPayload {
    /// Integrity check applied on cache read. A payload that fails this is
    /// discarded and treated as a miss.
    pub fn is_valid(&self) -> bool {
        !self.profile.name.trim().is_empty()
    }

    /// Merges newly discovered contacts into this payload.
    ///
    /// Monotonically additive: existing contacts are never removed, duplicates
    /// (by normalized identity key) are dropped, and first-seen order is
    /// preserved. Returns how many contacts were actually added.
    pub fn merge_contacts(&mut self, discovered: Vec<Contact>) -> usize {
        let mut seen: Vec<String> = self.contacts.iter().map(Contact::identity_key).collect();
        let mut added = 0;
        for contact in discovered {
            let key = contact.identity_key();
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            self.contacts.push(contact);
            added += 1;
        }
        added
    }
}

/// Canonicalizes a company name into a cache key: lowercase, punctuation
/// stripped, whitespace collapsed, trailing corporate suffix dropped.
pub fn canonical_company_key(name: &str) -> String {
    const SUFFIXES: &[&str] = &["inc", "llc", "ltd", "corp", "co", "gmbh", "plc"];

    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut words: Vec<&str> = cleaned.split_whitespace().collect();

    if words.len() > 1 {
        if let Some(last) = words.last() {
            if SUFFIXES.contains(last) {
                words.pop();
            }
        }
    }
    words.join(" ")
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
