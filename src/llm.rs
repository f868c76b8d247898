//! Strict-JSON LLM layer: raw response shapes, deterministic
//! normalization against the taxonomy, and the bounded retry loop.
//!
//! The LLM is an untrusted oracle. Every numeric is clamped to [0,1],
//! unknown enum values fall back to neutral defaults, concept tokens are
//! forced through the taxonomy, and the vector fingerprint is always
//! recomputed locally.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::ChatModel;
use crate::error::{AdapterError, AdapterResult};
use crate::prompts;
use crate::taxonomy::Taxonomy;
use crate::types::{
    CanonicalConcept, ComponentBreakdown, ConfidenceByField, IntentGradient, IntentLabel,
    IntentSignature, PageFormat, Perspective, PerspectiveSignal, Phrase, SerpProfile,
    SynapseFamily, SynapseSubtype,
};

// ---------------------------------------------------------------------------
// Raw response shapes: lenient on purpose, every field optional

#[derive(Debug, Default, Deserialize)]
pub struct RawConcept {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub source_terms: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawPerspective {
    #[serde(default)]
    pub primary: String,
    #[serde(default)]
    pub secondary: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub evidence: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawGradient {
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawConfidence {
    #[serde(default)]
    pub concepts: Option<f64>,
    #[serde(default)]
    pub promises: Option<f64>,
    #[serde(default)]
    pub perspective: Option<f64>,
    #[serde(default)]
    pub intent: Option<f64>,
    #[serde(default)]
    pub elements: Option<f64>,
    #[serde(default)]
    pub overall: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawIntentResponse {
    #[serde(default)]
    pub canonical_concepts: Vec<RawConcept>,
    #[serde(default)]
    pub promises: Vec<RawConcept>,
    #[serde(default)]
    pub action_verbs: Vec<String>,
    #[serde(default)]
    pub trust_signals: Vec<RawConcept>,
    #[serde(default)]
    pub perspective: RawPerspective,
    #[serde(default)]
    pub intent_gradient: RawGradient,
    #[serde(default)]
    pub required_elements: Vec<String>,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub incompatibility_markers: Vec<String>,
    #[serde(default)]
    pub emergent_meaning: String,
    #[serde(default)]
    pub confidence_by_field: RawConfidence,
}

#[derive(Debug, Deserialize)]
pub struct RawClassification {
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub actionable_insight: String,
    #[serde(default)]
    pub contradiction: bool,
    #[serde(default)]
    pub risk_notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    #[serde(default)]
    label: String,
}

#[derive(Debug, Deserialize)]
struct RawPhrases {
    #[serde(default)]
    phrases: Vec<String>,
}

// ---------------------------------------------------------------------------
// Normalization

/// Pull the JSON object out of a completion, tolerating fences and prose.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Keep source terms only when every entry really is a substring of the
/// phrase; a single violation coerces the whole list to empty.
fn checked_source_terms(terms: Vec<String>, phrase_text: &str) -> Vec<String> {
    let ok = terms
        .iter()
        .all(|t| !t.trim().is_empty() && phrase_text.contains(t.trim().to_lowercase().as_str()));
    if ok {
        terms.into_iter().map(|t| t.trim().to_lowercase()).collect()
    } else {
        vec![]
    }
}

fn normalize_concepts(
    raw: Vec<RawConcept>,
    phrase_text: &str,
    taxonomy: &Taxonomy,
) -> Vec<CanonicalConcept> {
    raw.into_iter()
        .filter(|c| !c.token.trim().is_empty())
        .map(|c| {
            let upper = c.token.trim().to_uppercase();
            let token = if taxonomy.is_valid_token(&upper) {
                upper
            } else {
                taxonomy.map_concept(&c.token).token
            };
            CanonicalConcept {
                token,
                weight: clamp01(c.weight),
                evidence: c.evidence,
                source_terms: checked_source_terms(c.source_terms, phrase_text),
                confidence: clamp01(c.confidence.unwrap_or(0.5)),
            }
        })
        .collect()
}

/// Coerce a raw extraction response into a normalized signature.
/// The fingerprint is computed here, never taken from the response.
pub fn normalize_signature(
    phrase: &Phrase,
    raw: RawIntentResponse,
    taxonomy: &Taxonomy,
) -> IntentSignature {
    let canonical_concepts = normalize_concepts(raw.canonical_concepts, &phrase.text, taxonomy);
    let promises = normalize_concepts(raw.promises, &phrase.text, taxonomy);
    let trust_signals = normalize_concepts(raw.trust_signals, &phrase.text, taxonomy);

    let perspective = PerspectiveSignal {
        primary: Perspective::parse(raw.perspective.primary.trim()).unwrap_or(Perspective::Neutral),
        secondary: raw
            .perspective
            .secondary
            .as_deref()
            .and_then(|s| Perspective::parse(s.trim())),
        confidence: clamp01(raw.perspective.confidence.unwrap_or(0.5)),
        evidence: raw.perspective.evidence,
    };

    let gradient_value = clamp01(raw.intent_gradient.value);
    let intent_gradient = IntentGradient {
        value: gradient_value,
        label: IntentLabel::parse(raw.intent_gradient.label.trim())
            .unwrap_or_else(|| IntentLabel::from_gradient(gradient_value)),
        confidence: clamp01(raw.intent_gradient.confidence.unwrap_or(0.5)),
    };

    let c = raw.confidence_by_field;
    let concepts = clamp01(c.concepts.unwrap_or(0.5));
    let promises_conf = clamp01(c.promises.unwrap_or(0.5));
    let perspective_conf = clamp01(c.perspective.unwrap_or(0.5));
    let intent_conf = clamp01(c.intent.unwrap_or(0.5));
    let elements = clamp01(c.elements.unwrap_or(0.5));
    let overall = clamp01(c.overall.unwrap_or(
        (concepts + promises_conf + perspective_conf + intent_conf + elements) / 5.0,
    ));
    let confidence_by_field = ConfidenceByField {
        concepts,
        promises: promises_conf,
        perspective: perspective_conf,
        intent: intent_conf,
        elements,
        overall,
    };

    let vector_fingerprint = taxonomy.vector_fingerprint(&canonical_concepts);

    IntentSignature {
        canonical_concepts,
        promises,
        action_verbs: raw.action_verbs,
        trust_signals,
        perspective,
        intent_gradient,
        required_elements: raw.required_elements,
        format: PageFormat::parse(raw.format.trim()).unwrap_or(PageFormat::Unknown),
        incompatibility_markers: raw.incompatibility_markers,
        emergent_meaning: raw.emergent_meaning,
        confidence_by_field,
        vector_fingerprint,
        evidence_used: vec![],
    }
}

// ---------------------------------------------------------------------------
// Client with bounded parse-retry

/// Result of one strict-JSON operation: the normalized object plus the
/// audit trail the artifacts record.
#[derive(Debug, Clone)]
pub struct LlmOutcome<T> {
    pub value: T,
    pub prompt_version: &'static str,
    pub raw: String,
    pub attempts: usize,
    /// Rough token estimate (chars / 4) across prompt and response.
    pub tokens_estimate: u64,
}

#[derive(Debug, Clone)]
pub struct ClassificationResult {
    pub family: SynapseFamily,
    pub subtype: SynapseSubtype,
    pub explanation: String,
    pub actionable_insight: String,
    pub contradiction: bool,
    pub risk_notes: Option<String>,
}

/// Typed gateway over a [`ChatModel`]: builds prompts, retries on parse
/// failure with a reminder appended, normalizes every response.
pub struct LlmClient {
    model: Arc<dyn ChatModel>,
    retry_max: usize,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(model: Arc<dyn ChatModel>, retry_max: usize, timeout: Duration) -> Self {
        Self { model, retry_max, timeout }
    }

    pub fn model_id(&self) -> String {
        self.model.model_id().to_string()
    }

    async fn complete(&self, system: &str, user: &str) -> AdapterResult<String> {
        match tokio::time::timeout(self.timeout, self.model.complete(system, user)).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout { after_ms: self.timeout.as_millis() as u64 }),
        }
    }

    /// Run one strict-JSON operation, re-asking up to `retry_max` times
    /// when the response fails to parse into `R`.
    async fn strict_json<R, T>(
        &self,
        system: &str,
        user: &str,
        prompt_version: &'static str,
        normalize: impl Fn(R) -> Option<T>,
    ) -> AdapterResult<LlmOutcome<T>>
    where
        R: for<'de> Deserialize<'de>,
    {
        let attempts_max = self.retry_max.max(1);
        let mut tokens_estimate = 0u64;
        let mut last_error = String::new();

        for attempt in 1..=attempts_max {
            let message = if attempt == 1 {
                user.to_string()
            } else {
                format!("{user}{}", prompts::strict_json_reminder(attempt))
            };

            let raw = self.complete(system, &message).await?;
            tokens_estimate += ((system.len() + message.len() + raw.len()) / 4) as u64;

            let parsed = extract_json(&raw)
                .and_then(|json| serde_json::from_str::<R>(json).ok())
                .and_then(&normalize);

            match parsed {
                Some(value) => {
                    return Ok(LlmOutcome {
                        value,
                        prompt_version,
                        raw,
                        attempts: attempt,
                        tokens_estimate,
                    });
                }
                None => {
                    tracing::debug!("strict-JSON parse failed on attempt {attempt}");
                    last_error = format!("unparseable response on attempt {attempt}");
                }
            }
        }

        Err(AdapterError::malformed(last_error))
    }

    /// Extract and normalize an intent signature for a phrase.
    pub async fn intent_extraction(
        &self,
        phrase: &Phrase,
        taxonomy: &Taxonomy,
        serp: Option<&SerpProfile>,
    ) -> AdapterResult<LlmOutcome<IntentSignature>> {
        let user = prompts::intent_extraction_user(phrase, taxonomy.tokens(), serp);
        self.strict_json::<RawIntentResponse, IntentSignature>(
            prompts::INTENT_EXTRACTION_SYSTEM,
            &user,
            prompts::INTENT_EXTRACTION_PROMPT_VERSION,
            |raw| Some(normalize_signature(phrase, raw, taxonomy)),
        )
        .await
    }

    /// Classify a scored pair into family/subtype/insight.
    #[allow(clippy::too_many_arguments)]
    pub async fn synapse_classification(
        &self,
        phrase_a: &str,
        phrase_b: &str,
        components: &ComponentBreakdown,
        shared: &[String],
        only_a: &[String],
        only_b: &[String],
        perspective_a: Perspective,
        perspective_b: Perspective,
    ) -> AdapterResult<LlmOutcome<ClassificationResult>> {
        let user = prompts::synapse_classification_user(
            phrase_a,
            phrase_b,
            components,
            shared,
            only_a,
            only_b,
            perspective_a,
            perspective_b,
        );
        self.strict_json::<RawClassification, ClassificationResult>(
            prompts::SYNAPSE_CLASSIFICATION_SYSTEM,
            &user,
            prompts::SYNAPSE_CLASSIFICATION_PROMPT_VERSION,
            |raw| {
                // Subtype wins when present: it pins the family.
                let subtype = SynapseSubtype::parse(raw.subtype.trim());
                let (family, subtype) = match subtype {
                    Some(subtype) => (subtype.family(), subtype),
                    None => {
                        let family = SynapseFamily::parse(raw.family.trim())?;
                        (family, SynapseSubtype::default_for(family))
                    }
                };
                Some(ClassificationResult {
                    family,
                    subtype,
                    explanation: raw.explanation,
                    actionable_insight: raw.actionable_insight,
                    contradiction: raw.contradiction,
                    risk_notes: raw.risk_notes.filter(|n| !n.trim().is_empty()),
                })
            },
        )
        .await
    }

    /// Name a cluster. Falls back to the caller's label on failure.
    pub async fn cluster_label(
        &self,
        phrases: &[String],
        shared_concepts: &[String],
    ) -> AdapterResult<LlmOutcome<String>> {
        let user = prompts::cluster_label_user(phrases, shared_concepts);
        self.strict_json::<RawLabel, String>(
            prompts::CLUSTER_LABEL_SYSTEM,
            &user,
            prompts::CLUSTER_LABEL_PROMPT_VERSION,
            |raw| {
                let label = raw.label.trim().to_string();
                if label.is_empty() {
                    None
                } else {
                    Some(label)
                }
            },
        )
        .await
    }

    /// LLM-only candidate fallback: expand the seed across facets.
    pub async fn facet_expansion(
        &self,
        seed: &Phrase,
        count: usize,
    ) -> AdapterResult<LlmOutcome<Vec<String>>> {
        let user = prompts::facet_expansion_user(seed, count);
        self.strict_json::<RawPhrases, Vec<String>>(
            prompts::FACET_EXPANSION_SYSTEM,
            &user,
            prompts::FACET_EXPANSION_PROMPT_VERSION,
            |raw| {
                let mut seen = std::collections::BTreeSet::new();
                let phrases: Vec<String> = raw
                    .phrases
                    .into_iter()
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty() && seen.insert(p.to_lowercase()))
                    .take(count)
                    .collect();
                if phrases.is_empty() {
                    None
                } else {
                    Some(phrases)
                }
            },
        )
        .await
    }
}
