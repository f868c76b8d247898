//! System prompts and user-message builders for the strict-JSON LLM operations.
//!
//! Each system prompt carries the full output schema and decision guide;
//! responses that stray from the schema are retried with a terse reminder
//! appended to the user message.

use std::fmt::Write;

use crate::types::{ComponentBreakdown, Perspective, Phrase, SerpProfile};

pub const INTENT_EXTRACTION_PROMPT_VERSION: &str = "intent-extraction-v3";
pub const SYNAPSE_CLASSIFICATION_PROMPT_VERSION: &str = "synapse-classification-v2";
pub const CLUSTER_LABEL_PROMPT_VERSION: &str = "cluster-label-v1";
pub const FACET_EXPANSION_PROMPT_VERSION: &str = "facet-expansion-v1";

/// System prompt for intent signature extraction.
pub const INTENT_EXTRACTION_SYSTEM: &str = r#"You extract the intent signature of a search phrase. Respond with a single JSON object and nothing else. No prose, no markdown fences.

## Output schema

{
  "canonical_concepts": [{"token": "<TAXONOMY TOKEN or NEW:SLUG>", "weight": 0.0-1.0, "evidence": "<why>", "source_terms": ["<substring of the phrase>"], "confidence": 0.0-1.0}],
  "promises": [<same shape as canonical_concepts>],
  "action_verbs": ["<verb>"],
  "trust_signals": [<same shape as canonical_concepts>],
  "perspective": {"primary": "seeker|advisor|provider|educator|regulator|neutral", "secondary": "<optional, same enum>", "confidence": 0.0-1.0, "evidence": "<why>"},
  "intent_gradient": {"value": 0.0-1.0, "label": "informational|educational|investigational|commercial_investigation|comparison|navigational|transactional", "confidence": 0.0-1.0},
  "required_elements": ["<content element the page must contain>"],
  "format": "article|guide|listing|product_page|category_page|comparison_page|calculator|forum|faq|news|landing_page|unknown",
  "incompatibility_markers": ["<marker>"],
  "emergent_meaning": "<one sentence>",
  "confidence_by_field": {"concepts": 0.0-1.0, "promises": 0.0-1.0, "perspective": 0.0-1.0, "intent": 0.0-1.0, "elements": 0.0-1.0, "overall": 0.0-1.0}
}

## Decision guide

- Use only tokens from the provided taxonomy list. A concept with no
  taxonomy match must use the prefix NEW: followed by an uppercase slug.
- source_terms must be verbatim substrings of the phrase, never taxonomy
  tokens. Aim for at least 2 canonical_concepts where the phrase allows.
- perspective.primary is the voice of the searcher, not the page:
  "seeker" wants, "provider" offers, "advisor" recommends,
  "educator" explains, "regulator" governs, "neutral" is indeterminate.
- intent_gradient.value: 0.0 is purely informational, 1.0 is purely
  transactional. Pick the label consistent with the value.
- Ground every judgement in the SERP snapshot when one is supplied;
  lower your confidences when it is missing or synthetic.
"#;

/// System prompt for classifying a scored pair into a synapse.
pub const SYNAPSE_CLASSIFICATION_SYSTEM: &str = r#"You classify the relationship between two search phrases into a synapse. Respond with a single JSON object and nothing else.

## Output schema

{
  "family": "EXPANSION|TRANSITION|BOUNDARY|CONTEXTUAL",
  "subtype": "attribute_expansion|specification|audience_refinement|intent_shift|journey_progression|reframing|perspective_flip|scope_exclusion|competing_need|shared_setting|complementary_topic|background_knowledge",
  "explanation": "<one or two sentences>",
  "actionable_insight": "<what a content owner should do with this pair>",
  "contradiction": true|false,
  "risk_notes": "<optional, omit when empty>"
}

## Decision guide

- EXPANSION: same need, narrowed or enriched (attribute_expansion,
  specification, audience_refinement).
- TRANSITION: the searcher moved along the journey or reframed the need
  (intent_shift, journey_progression, reframing).
- BOUNDARY: the pair marks a limit of the topic: inverted stance,
  excluded scope, or a competing need (perspective_flip, scope_exclusion,
  competing_need).
- CONTEXTUAL: related only through setting or background
  (shared_setting, complementary_topic, background_knowledge).
- The subtype must belong to the family. Set contradiction=true only for
  high topical overlap with opposed perspectives and distant intent.
"#;

/// System prompt for naming a cluster of related phrases.
pub const CLUSTER_LABEL_SYSTEM: &str = r#"You name a cluster of related search phrases. Respond with a single JSON object and nothing else.

{"label": "<2-4 word human label>"}

The label names what the phrases share, in the language of the phrases.
"#;

/// System prompt for the LLM-only candidate fallback.
pub const FACET_EXPANSION_SYSTEM: &str = r#"You expand a seed search phrase into related search phrases a real user in the given market would type. Respond with a single JSON object and nothing else.

{"phrases": ["<related phrase>"]}

Cover different facets: cost, quality, comparison, process, trust,
location, timing. Stay in the language of the seed. No duplicates.
"#;

/// Appended to the user message on each strict-JSON retry.
pub fn strict_json_reminder(attempt: usize) -> String {
    format!(
        "\n\nREMINDER (attempt {attempt}): respond with exactly one valid JSON object matching the schema. No prose, no markdown."
    )
}

/// User message for intent extraction.
pub fn intent_extraction_user(
    phrase: &Phrase,
    taxonomy_tokens: &[String],
    serp: Option<&SerpProfile>,
) -> String {
    let mut msg = String::new();
    let _ = writeln!(msg, "Phrase: {}", phrase.text);
    let _ = writeln!(msg, "Language: {}  Market: {}", phrase.language, phrase.market);
    let _ = writeln!(msg, "Taxonomy tokens: {}", taxonomy_tokens.join(", "));

    match serp {
        Some(profile) if !profile.results.is_empty() => {
            let _ = writeln!(msg, "\nSERP snapshot (source: {}):", profile.source.as_str());
            for result in profile.results.iter().take(10) {
                let _ = writeln!(msg, "{}. {} — {}", result.rank, result.title, result.url);
                if !result.description.is_empty() {
                    let _ = writeln!(msg, "   {}", result.description);
                }
            }
        }
        _ => {
            let _ = writeln!(msg, "\nNo SERP evidence is available. Lower all confidences accordingly.");
        }
    }

    msg
}

/// User message for synapse classification.
pub fn synapse_classification_user(
    phrase_a: &str,
    phrase_b: &str,
    components: &ComponentBreakdown,
    shared_concepts: &[String],
    only_a: &[String],
    only_b: &[String],
    perspective_a: Perspective,
    perspective_b: Perspective,
) -> String {
    let mut msg = String::new();
    let _ = writeln!(msg, "Phrase A: {phrase_a}");
    let _ = writeln!(msg, "Phrase B: {phrase_b}");
    let _ = writeln!(
        msg,
        "Perspectives: A={} B={}",
        perspective_a.as_str(),
        perspective_b.as_str()
    );
    let _ = writeln!(msg, "Shared concepts: {}", shared_concepts.join(", "));
    let _ = writeln!(msg, "Only A: {}", only_a.join(", "));
    let _ = writeln!(msg, "Only B: {}", only_b.join(", "));
    let _ = writeln!(msg, "Component scores:");
    let fmt = |v: Option<f64>| v.map(|x| format!("{x:.2}")).unwrap_or_else(|| "absent".into());
    let _ = writeln!(msg, "  serp_overlap: {}", fmt(components.serp_overlap));
    let _ = writeln!(msg, "  concept_overlap: {}", fmt(components.concept_overlap));
    let _ = writeln!(msg, "  perspective_alignment: {}", fmt(components.perspective_alignment));
    let _ = writeln!(msg, "  entity_overlap: {}", fmt(components.entity_overlap));
    let _ = writeln!(msg, "  intent_proximity: {}", fmt(components.intent_proximity));
    msg
}

/// User message for cluster labelling.
pub fn cluster_label_user(phrases: &[String], shared_concepts: &[String]) -> String {
    let mut msg = String::new();
    let _ = writeln!(msg, "Phrases:");
    for phrase in phrases.iter().take(15) {
        let _ = writeln!(msg, "- {phrase}");
    }
    if !shared_concepts.is_empty() {
        let _ = writeln!(msg, "Shared concepts: {}", shared_concepts.join(", "));
    }
    msg
}

/// User message for facet expansion.
pub fn facet_expansion_user(seed: &Phrase, count: usize) -> String {
    format!(
        "Seed: {}\nLanguage: {}  Market: {}\nReturn up to {} phrases.",
        seed.text, seed.language, seed.market, count
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompts_carry_full_enums() {
        assert!(INTENT_EXTRACTION_SYSTEM.contains("commercial_investigation"));
        assert!(INTENT_EXTRACTION_SYSTEM.contains("NEW:"));
        assert!(SYNAPSE_CLASSIFICATION_SYSTEM.contains("perspective_flip"));
        assert!(SYNAPSE_CLASSIFICATION_SYSTEM.contains("CONTEXTUAL"));
    }

    #[test]
    fn extraction_user_flags_missing_serp() {
        let phrase = Phrase::new("mäklare stockholm", "sv", "se");
        let msg = intent_extraction_user(&phrase, &["AGENT".into()], None);
        assert!(msg.contains("No SERP evidence"));
    }
}
