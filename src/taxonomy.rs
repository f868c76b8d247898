//! Taxonomy and phrase normalization: canonical concept tokens,
//! vector fingerprints, and stable phrase identity

use siphasher::sip::SipHasher13;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use crate::types::{CanonicalConcept, PhraseId};

/// Lowercase and collapse whitespace runs to single spaces.
pub fn normalize_phrase(raw: &str) -> String {
    raw.split_whitespace()
        .map(|t| t.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whitespace token sequence of a normalized phrase.
pub fn tokens(normalized: &str) -> Vec<String> {
    normalized.split_whitespace().map(|t| t.to_string()).collect()
}

/// Head term (last token) and modifier sequence (the rest).
/// Head-final compounds dominate the supported markets.
pub fn head_and_modifiers(normalized: &str) -> (String, Vec<String>) {
    let mut toks = tokens(normalized);
    match toks.pop() {
        Some(head) => (head, toks),
        None => (String::new(), Vec::new()),
    }
}

/// Stable identity hash over (normalized text, language, market).
/// SipHash13 with the zero key; stable across runs and Rust releases.
pub fn phrase_id(normalized: &str, language: &str, market: &str) -> PhraseId {
    let mut hasher = SipHasher13::new();
    normalized.hash(&mut hasher);
    language.hash(&mut hasher);
    market.hash(&mut hasher);
    PhraseId(format!("{:016x}", hasher.finish()))
}

/// Prefix marking an open-set concept token.
pub const NEW_PREFIX: &str = "NEW:";

/// A versioned market taxonomy: fixed uppercase tokens plus a synonym table.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    version: String,
    market: String,
    tokens: Vec<String>,
    /// lowercased surface form → taxonomy token
    synonyms: BTreeMap<String, String>,
}

impl Taxonomy {
    /// Built-in default taxonomy shared by the supported markets.
    pub fn default_for_market(market: &str) -> Self {
        let tokens: Vec<String> = [
            "AGENT",
            "AMOUNT",
            "AUTHORITY",
            "CHOICE",
            "COMPARISON",
            "COST",
            "LOCATION",
            "PROCESS",
            "QUALITY",
            "RISK",
            "TIME",
            "TRUST",
        ]
        .iter()
        .map(|t| t.to_string())
        .collect();

        let mut synonyms = BTreeMap::new();
        let table: &[(&str, &str)] = &[
            ("broker", "AGENT"),
            ("mäklare", "AGENT"),
            ("realtor", "AGENT"),
            ("advisor", "AGENT"),
            ("price", "COST"),
            ("pris", "COST"),
            ("fee", "COST"),
            ("avgift", "COST"),
            ("cheap", "COST"),
            ("billig", "COST"),
            ("best", "CHOICE"),
            ("bästa", "CHOICE"),
            ("top", "CHOICE"),
            ("alternative", "CHOICE"),
            ("city", "LOCATION"),
            ("stockholm", "LOCATION"),
            ("near", "LOCATION"),
            ("nära", "LOCATION"),
            ("official", "AUTHORITY"),
            ("myndighet", "AUTHORITY"),
            ("licensed", "AUTHORITY"),
            ("review", "TRUST"),
            ("omdöme", "TRUST"),
            ("recension", "TRUST"),
            ("safe", "TRUST"),
            ("compare", "COMPARISON"),
            ("jämför", "COMPARISON"),
            ("versus", "COMPARISON"),
            ("vs", "COMPARISON"),
            ("how", "PROCESS"),
            ("hur", "PROCESS"),
            ("steps", "PROCESS"),
            ("guide", "PROCESS"),
            ("quality", "QUALITY"),
            ("kvalitet", "QUALITY"),
            ("risk", "RISK"),
            ("danger", "RISK"),
            ("when", "TIME"),
            ("när", "TIME"),
            ("fast", "TIME"),
            ("snabb", "TIME"),
            ("amount", "AMOUNT"),
            ("belopp", "AMOUNT"),
            ("sum", "AMOUNT"),
        ];
        for (surface, token) in table {
            synonyms.insert((*surface).to_string(), (*token).to_string());
        }

        Self {
            version: "taxonomy-v1".to_string(),
            market: market.to_string(),
            tokens,
            synonyms,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn market(&self) -> &str {
        &self.market
    }

    /// Fixed token list; fingerprint slots follow this order.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.iter().any(|t| t == token)
    }

    /// Map free text onto a canonical token. Never errors: unknown input
    /// yields an open-set `NEW:<SLUG>` token; empty input yields `NEW:UNKNOWN`.
    pub fn map_concept(&self, text: &str) -> MappedConcept {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return MappedConcept {
                token: format!("{NEW_PREFIX}UNKNOWN"),
                known: false,
            };
        }

        let upper = trimmed.to_uppercase();
        if self.contains(&upper) {
            return MappedConcept { token: upper, known: true };
        }

        if let Some(token) = self.synonyms.get(&trimmed.to_lowercase()) {
            return MappedConcept {
                token: token.clone(),
                known: true,
            };
        }

        MappedConcept {
            token: format!("{NEW_PREFIX}{}", slugify(trimmed)),
            known: false,
        }
    }

    /// True when a token is acceptable on a normalized concept: either a
    /// taxonomy member or correctly `NEW:`-prefixed.
    pub fn is_valid_token(&self, token: &str) -> bool {
        self.contains(token)
            || (token.starts_with(NEW_PREFIX) && token.len() > NEW_PREFIX.len())
    }

    /// Deterministic fixed-length vector over the taxonomy tokens. Each
    /// slot takes the highest weight among concepts mapping to that token;
    /// `NEW:` tokens occupy no slot.
    pub fn vector_fingerprint(&self, concepts: &[CanonicalConcept]) -> Vec<f64> {
        let mut vector = vec![0.0; self.tokens.len()];
        for concept in concepts {
            if let Some(slot) = self.tokens.iter().position(|t| *t == concept.token) {
                if concept.weight > vector[slot] {
                    vector[slot] = concept.weight;
                }
            }
        }
        vector
    }
}

/// Outcome of concept mapping: the canonical token and whether it was
/// resolved inside the taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedConcept {
    pub token: String,
    pub known: bool,
}

/// Uppercased slug with non-alphanumeric runs collapsed to `_`.
fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_was_sep = true;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            for up in ch.to_uppercase() {
                slug.push(up);
            }
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    if slug.is_empty() {
        "UNKNOWN".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concept(token: &str, weight: f64) -> CanonicalConcept {
        CanonicalConcept {
            token: token.to_string(),
            weight,
            evidence: String::new(),
            source_terms: vec![],
            confidence: 1.0,
        }
    }

    #[test]
    fn normalize_collapses_whitespace_and_lowercases() {
        assert_eq!(normalize_phrase("  Mäklare   STOCKHOLM "), "mäklare stockholm");
    }

    #[test]
    fn phrase_id_is_stable() {
        let a = phrase_id("mäklare stockholm", "sv", "se");
        let b = phrase_id("mäklare stockholm", "sv", "se");
        assert_eq!(a, b);
        assert_ne!(a, phrase_id("mäklare stockholm", "sv", "no"));
    }

    #[test]
    fn head_is_last_token() {
        let (head, modifiers) = head_and_modifiers("bästa mäklare stockholm");
        assert_eq!(head, "stockholm");
        assert_eq!(modifiers, vec!["bästa", "mäklare"]);
    }

    #[test]
    fn map_concept_resolves_exact_synonym_and_open_set() {
        let tax = Taxonomy::default_for_market("se");
        assert_eq!(tax.map_concept("cost").token, "COST");
        assert_eq!(tax.map_concept("mäklare").token, "AGENT");
        let open = tax.map_concept("solar panels");
        assert_eq!(open.token, "NEW:SOLAR_PANELS");
        assert!(!open.known);
        assert_eq!(tax.map_concept("").token, "NEW:UNKNOWN");
    }

    #[test]
    fn fingerprint_takes_max_weight_per_slot() {
        let tax = Taxonomy::default_for_market("se");
        let v = tax.vector_fingerprint(&[
            concept("COST", 0.4),
            concept("COST", 0.9),
            concept("NEW:SOLAR", 1.0),
        ]);
        assert_eq!(v.len(), tax.len());
        let cost_slot = tax.tokens().iter().position(|t| t == "COST").unwrap();
        assert!((v[cost_slot] - 0.9).abs() < 1e-9);
        assert!((v.iter().sum::<f64>() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn new_tokens_are_valid_but_unprefixed_unknowns_are_not() {
        let tax = Taxonomy::default_for_market("se");
        assert!(tax.is_valid_token("AGENT"));
        assert!(tax.is_valid_token("NEW:SOLAR"));
        assert!(!tax.is_valid_token("SOLAR"));
        assert!(!tax.is_valid_token("NEW:"));
    }
}
