//! Core type definitions for synapse graph compilation

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::taxonomy;

/// Stable identity for a phrase: hex SipHash over (normalized text, language, market).
///
/// Ordering is lexicographic over the hex form; every merge step in the
/// pipeline sorts by this to keep output order deterministic.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PhraseId(pub String);

impl std::fmt::Display for PhraseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A normalized search phrase bound to a language and market.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Phrase {
    pub text: String, // normalized: lowercased, whitespace-collapsed
    pub language: String,
    pub market: String,
}

impl Phrase {
    /// Normalize raw text and bind it to a language/market.
    pub fn new(raw: &str, language: &str, market: &str) -> Self {
        Self {
            text: taxonomy::normalize_phrase(raw),
            language: language.to_string(),
            market: market.to_string(),
        }
    }

    /// Identity hash; stable across runs and Rust releases.
    pub fn id(&self) -> PhraseId {
        taxonomy::phrase_id(&self.text, &self.language, &self.market)
    }
}

/// Perspective of the voice behind a phrase or page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Perspective {
    Seeker,
    Advisor,
    Provider,
    Educator,
    Regulator,
    Neutral,
}

impl Perspective {
    pub const ALL: [Perspective; 6] = [
        Perspective::Seeker,
        Perspective::Advisor,
        Perspective::Provider,
        Perspective::Educator,
        Perspective::Regulator,
        Perspective::Neutral,
    ];

    /// Ordinal used for the perspective axis of the layout plane.
    pub fn ordinal(self) -> usize {
        match self {
            Perspective::Seeker => 0,
            Perspective::Advisor => 1,
            Perspective::Provider => 2,
            Perspective::Educator => 3,
            Perspective::Regulator => 4,
            Perspective::Neutral => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Perspective::Seeker => "seeker",
            Perspective::Advisor => "advisor",
            Perspective::Provider => "provider",
            Perspective::Educator => "educator",
            Perspective::Regulator => "regulator",
            Perspective::Neutral => "neutral",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Perspective::ALL.iter().copied().find(|p| p.as_str() == s)
    }
}

/// Position of a phrase on the informational→transactional gradient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    Informational,
    Educational,
    Investigational,
    CommercialInvestigation,
    Comparison,
    Navigational,
    Transactional,
}

impl IntentLabel {
    pub const ALL: [IntentLabel; 7] = [
        IntentLabel::Informational,
        IntentLabel::Educational,
        IntentLabel::Investigational,
        IntentLabel::CommercialInvestigation,
        IntentLabel::Comparison,
        IntentLabel::Navigational,
        IntentLabel::Transactional,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IntentLabel::Informational => "informational",
            IntentLabel::Educational => "educational",
            IntentLabel::Investigational => "investigational",
            IntentLabel::CommercialInvestigation => "commercial_investigation",
            IntentLabel::Comparison => "comparison",
            IntentLabel::Navigational => "navigational",
            IntentLabel::Transactional => "transactional",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        IntentLabel::ALL.iter().copied().find(|l| l.as_str() == s)
    }

    /// Label implied by a gradient value, used when the LLM omits it.
    pub fn from_gradient(value: f64) -> Self {
        match value {
            v if v < 0.15 => IntentLabel::Informational,
            v if v < 0.30 => IntentLabel::Educational,
            v if v < 0.45 => IntentLabel::Investigational,
            v if v < 0.60 => IntentLabel::CommercialInvestigation,
            v if v < 0.75 => IntentLabel::Comparison,
            v if v < 0.90 => IntentLabel::Navigational,
            _ => IntentLabel::Transactional,
        }
    }
}

/// Page archetype for SERP results and for the content a phrase calls for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageFormat {
    Article,
    Guide,
    Listing,
    ProductPage,
    CategoryPage,
    ComparisonPage,
    Calculator,
    Forum,
    Faq,
    News,
    LandingPage,
    #[default]
    Unknown,
}

impl PageFormat {
    pub const ALL: [PageFormat; 12] = [
        PageFormat::Article,
        PageFormat::Guide,
        PageFormat::Listing,
        PageFormat::ProductPage,
        PageFormat::CategoryPage,
        PageFormat::ComparisonPage,
        PageFormat::Calculator,
        PageFormat::Forum,
        PageFormat::Faq,
        PageFormat::News,
        PageFormat::LandingPage,
        PageFormat::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PageFormat::Article => "article",
            PageFormat::Guide => "guide",
            PageFormat::Listing => "listing",
            PageFormat::ProductPage => "product_page",
            PageFormat::CategoryPage => "category_page",
            PageFormat::ComparisonPage => "comparison_page",
            PageFormat::Calculator => "calculator",
            PageFormat::Forum => "forum",
            PageFormat::Faq => "faq",
            PageFormat::News => "news",
            PageFormat::LandingPage => "landing_page",
            PageFormat::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        PageFormat::ALL.iter().copied().find(|f| f.as_str() == s)
    }
}

/// A weighted tag from the market taxonomy, or an open-set `NEW:<SLUG>` token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalConcept {
    pub token: String,
    pub weight: f64, // [0,1]
    pub evidence: String,
    /// Substrings of the input phrase that triggered the concept.
    /// Never taxonomy tokens; violations are coerced to empty.
    pub source_terms: Vec<String>,
    pub confidence: f64, // [0,1]
}

/// Primary (and optional secondary) perspective with its evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerspectiveSignal {
    pub primary: Perspective,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<Perspective>,
    pub confidence: f64,
    pub evidence: String,
}

impl Default for PerspectiveSignal {
    fn default() -> Self {
        Self {
            primary: Perspective::Neutral,
            secondary: None,
            confidence: 0.0,
            evidence: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentGradient {
    pub value: f64, // [0,1], informational → transactional
    pub label: IntentLabel,
    pub confidence: f64,
}

impl Default for IntentGradient {
    fn default() -> Self {
        Self {
            value: 0.0,
            label: IntentLabel::Informational,
            confidence: 0.0,
        }
    }
}

/// Field-level confidences plus the overall roll-up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceByField {
    pub concepts: f64,
    pub promises: f64,
    pub perspective: f64,
    pub intent: f64,
    pub elements: f64,
    pub overall: f64,
}

impl ConfidenceByField {
    /// Clamp every field to `cap`, keeping lower values as-is.
    pub fn capped(&self, cap: f64) -> Self {
        Self {
            concepts: self.concepts.min(cap),
            promises: self.promises.min(cap),
            perspective: self.perspective.min(cap),
            intent: self.intent.min(cap),
            elements: self.elements.min(cap),
            overall: self.overall.min(cap),
        }
    }
}

/// The comparable semantic fingerprint of a phrase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentSignature {
    pub canonical_concepts: Vec<CanonicalConcept>,
    pub promises: Vec<CanonicalConcept>,
    pub action_verbs: Vec<String>,
    pub trust_signals: Vec<CanonicalConcept>,
    pub perspective: PerspectiveSignal,
    pub intent_gradient: IntentGradient,
    pub required_elements: Vec<String>,
    pub format: PageFormat,
    pub incompatibility_markers: Vec<String>,
    pub emergent_meaning: String,
    pub confidence_by_field: ConfidenceByField,
    /// Fixed-length vector over the market taxonomy; always computed
    /// locally from canonical_concepts, never accepted from the LLM.
    pub vector_fingerprint: Vec<f64>,
    pub evidence_used: Vec<String>,
}

/// Where a SERP snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerpSource {
    Live,
    AhrefsCached,
    Firecrawl,
    Scraped,
    OfflineSynthetic,
}

impl SerpSource {
    pub fn as_str(self) -> &'static str {
        match self {
            SerpSource::Live => "live",
            SerpSource::AhrefsCached => "ahrefs_cached",
            SerpSource::Firecrawl => "firecrawl",
            SerpSource::Scraped => "scraped",
            SerpSource::OfflineSynthetic => "offline_synthetic",
        }
    }
}

/// One ranked result within a SERP snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerpResult {
    pub rank: usize,
    pub url: String,
    pub title: String,
    pub description: String,
    pub page_type: PageFormat,
    pub perspective: Perspective,
    pub intent: IntentLabel,
    pub key_concepts: Vec<String>,
}

/// Snapshot of a phrase's top search results plus derived distributions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerpProfile {
    pub query: String,
    pub market: String,
    pub fetched_at: i64, // unix seconds
    pub source: SerpSource,
    pub results: Vec<SerpResult>,
    /// Fraction per intent label over the top-5 results.
    pub intent_distribution: BTreeMap<String, f64>,
    pub perspective_distribution: BTreeMap<String, f64>,
    pub page_type_distribution: BTreeMap<String, f64>,
}

impl SerpProfile {
    pub fn urls(&self) -> Vec<String> {
        self.results.iter().map(|r| r.url.clone()).collect()
    }

    pub fn is_synthetic(&self) -> bool {
        self.source == SerpSource::OfflineSynthetic
    }
}

/// Which source proposed a candidate phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Seed,
    AhrefsAlsoRank,
    AhrefsRelated,
    AhrefsMatching,
    AhrefsSuggestions,
    SerpMetadata,
    EdgeSeeding,
}

impl CandidateSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CandidateSource::Seed => "seed",
            CandidateSource::AhrefsAlsoRank => "ahrefs_also_rank",
            CandidateSource::AhrefsRelated => "ahrefs_related",
            CandidateSource::AhrefsMatching => "ahrefs_matching",
            CandidateSource::AhrefsSuggestions => "ahrefs_suggestions",
            CandidateSource::SerpMetadata => "serp_metadata",
            CandidateSource::EdgeSeeding => "edge_seeding",
        }
    }
}

/// A phrase proposed for consideration, with provenance tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub phrase: Phrase,
    /// Union of source tags, sorted, deduplicated.
    pub sources: Vec<CandidateSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Candidate {
    pub fn id(&self) -> PhraseId {
        self.phrase.id()
    }

    /// True when edge_seeding is the only provenance for this candidate.
    pub fn edge_seeded_only(&self) -> bool {
        self.sources.iter().all(|s| *s == CandidateSource::EdgeSeeding)
    }
}

/// Source tag + observation timestamp attached to adapter-derived values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    pub observed_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// A candidate that survived extraction: signature + SERP profile + provenance.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub id: PhraseId,
    pub phrase: Phrase,
    pub sources: Vec<CandidateSource>,
    pub signature: IntentSignature,
    pub serp: SerpProfile,
    pub provenance: Provenance,
}

impl Node {
    /// Highest-weight canonical concept token; the node's dominant facet.
    pub fn dominant_facet(&self) -> Option<&str> {
        self.signature
            .canonical_concepts
            .iter()
            .max_by(|a, b| {
                a.weight
                    .partial_cmp(&b.weight)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.token.cmp(&a.token))
            })
            .map(|c| c.token.as_str())
    }
}

/// Typed relationship family carried by a synapse edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SynapseFamily {
    #[serde(rename = "EXPANSION")]
    Expansion,
    #[serde(rename = "TRANSITION")]
    Transition,
    #[serde(rename = "BOUNDARY")]
    Boundary,
    #[serde(rename = "CONTEXTUAL")]
    Contextual,
}

impl SynapseFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            SynapseFamily::Expansion => "EXPANSION",
            SynapseFamily::Transition => "TRANSITION",
            SynapseFamily::Boundary => "BOUNDARY",
            SynapseFamily::Contextual => "CONTEXTUAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EXPANSION" => Some(SynapseFamily::Expansion),
            "TRANSITION" => Some(SynapseFamily::Transition),
            "BOUNDARY" => Some(SynapseFamily::Boundary),
            "CONTEXTUAL" => Some(SynapseFamily::Contextual),
            _ => None,
        }
    }
}

/// Closed 12-subtype list; each subtype belongs to exactly one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynapseSubtype {
    // EXPANSION
    AttributeExpansion,
    Specification,
    AudienceRefinement,
    // TRANSITION
    IntentShift,
    JourneyProgression,
    Reframing,
    // BOUNDARY
    PerspectiveFlip,
    ScopeExclusion,
    CompetingNeed,
    // CONTEXTUAL
    SharedSetting,
    ComplementaryTopic,
    BackgroundKnowledge,
}

impl SynapseSubtype {
    pub const ALL: [SynapseSubtype; 12] = [
        SynapseSubtype::AttributeExpansion,
        SynapseSubtype::Specification,
        SynapseSubtype::AudienceRefinement,
        SynapseSubtype::IntentShift,
        SynapseSubtype::JourneyProgression,
        SynapseSubtype::Reframing,
        SynapseSubtype::PerspectiveFlip,
        SynapseSubtype::ScopeExclusion,
        SynapseSubtype::CompetingNeed,
        SynapseSubtype::SharedSetting,
        SynapseSubtype::ComplementaryTopic,
        SynapseSubtype::BackgroundKnowledge,
    ];

    pub fn family(self) -> SynapseFamily {
        match self {
            SynapseSubtype::AttributeExpansion
            | SynapseSubtype::Specification
            | SynapseSubtype::AudienceRefinement => SynapseFamily::Expansion,
            SynapseSubtype::IntentShift
            | SynapseSubtype::JourneyProgression
            | SynapseSubtype::Reframing => SynapseFamily::Transition,
            SynapseSubtype::PerspectiveFlip
            | SynapseSubtype::ScopeExclusion
            | SynapseSubtype::CompetingNeed => SynapseFamily::Boundary,
            SynapseSubtype::SharedSetting
            | SynapseSubtype::ComplementaryTopic
            | SynapseSubtype::BackgroundKnowledge => SynapseFamily::Contextual,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SynapseSubtype::AttributeExpansion => "attribute_expansion",
            SynapseSubtype::Specification => "specification",
            SynapseSubtype::AudienceRefinement => "audience_refinement",
            SynapseSubtype::IntentShift => "intent_shift",
            SynapseSubtype::JourneyProgression => "journey_progression",
            SynapseSubtype::Reframing => "reframing",
            SynapseSubtype::PerspectiveFlip => "perspective_flip",
            SynapseSubtype::ScopeExclusion => "scope_exclusion",
            SynapseSubtype::CompetingNeed => "competing_need",
            SynapseSubtype::SharedSetting => "shared_setting",
            SynapseSubtype::ComplementaryTopic => "complementary_topic",
            SynapseSubtype::BackgroundKnowledge => "background_knowledge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        SynapseSubtype::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    /// Default subtype when only the family is known (deterministic inference).
    pub fn default_for(family: SynapseFamily) -> Self {
        match family {
            SynapseFamily::Expansion => SynapseSubtype::AttributeExpansion,
            SynapseFamily::Transition => SynapseSubtype::IntentShift,
            SynapseFamily::Boundary => SynapseSubtype::PerspectiveFlip,
            SynapseFamily::Contextual => SynapseSubtype::SharedSetting,
        }
    }
}

/// Per-component scores feeding the composite synapse strength.
/// An absent component contributes to neither side of the composite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentBreakdown {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serp_overlap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept_overlap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perspective_alignment: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_overlap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_proximity: Option<f64>,
}

/// How an edge's family/subtype was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationOrigin {
    Llm,
    Inferred,
}

/// A typed, weighted relation between two nodes (or seed and node).
#[derive(Debug, Clone, Serialize)]
pub struct Synapse {
    pub source: PhraseId,
    pub target: PhraseId,
    pub strength: f64, // [0,1]
    pub family: SynapseFamily,
    pub subtype: SynapseSubtype,
    pub explanation: String,
    pub actionable_insight: String,
    pub contradiction: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_notes: Option<String>,
    pub components: ComponentBreakdown,
    pub classified_by: ClassificationOrigin,
}

impl Synapse {
    /// Strength used during selection: contradictory edges are
    /// downgraded by exactly 0.2 (floored at 0) but kept for explanation.
    pub fn effective_strength(&self) -> f64 {
        if self.contradiction {
            (self.strength - 0.2).max(0.0)
        } else {
            self.strength
        }
    }
}

/// Position on the intent × perspective plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub intent_x: f64,
    pub perspective_y: f64,
}

/// A community of nodes with its label and layout centroid.
#[derive(Debug, Clone, Serialize)]
pub struct Cluster {
    pub id: usize,
    pub label: String,
    pub node_ids: Vec<PhraseId>,
    pub cohesion: f64, // [0,1]
    pub centroid: Coordinates,
}

/// Engine / model / rules version triple recorded in every artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versions {
    pub engine: String,
    pub model: String,
    pub rules: String,
}

impl Default for Versions {
    fn default() -> Self {
        Self {
            engine: env!("CARGO_PKG_VERSION").to_string(),
            model: "unspecified".to_string(),
            rules: "rules-v1".to_string(),
        }
    }
}
