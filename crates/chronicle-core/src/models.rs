//! Core data models for the enrichment pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::defaults;
use crate::error::{Error, Result};

// =============================================================================
// ENTITY TYPES
// =============================================================================

/// Kind of graph entity eligible for enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Event,
}

impl EntityKind {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Event => "event",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "person" | "persons" => Ok(Self::Person),
            "event" | "events" => Ok(Self::Event),
            _ => Err(format!("Invalid entity kind: {}", s)),
        }
    }
}

/// Identifier of a resolved real-world entity in the external knowledge base
/// (a Wikidata item id such as `Q7259`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExternalKey(String);

impl ExternalKey {
    /// Validate a bare key. Only `Q<digits>` is accepted because keys are
    /// embedded verbatim into attribute queries.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let valid = raw.len() > 1
            && raw.starts_with('Q')
            && raw[1..].chars().all(|c| c.is_ascii_digit());
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(Error::PermanentExternal(format!(
                "Invalid external key: {:?}",
                raw
            )))
        }
    }

    /// Extract the key from an entity URI (`http://www.wikidata.org/entity/Q42`).
    pub fn from_uri(uri: &str) -> Result<Self> {
        let tail = uri.rsplit('/').next().unwrap_or(uri);
        Self::parse(tail)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Public page for the entity.
    pub fn url(&self) -> String {
        format!("https://www.wikidata.org/wiki/{}", self.0)
    }
}

impl std::fmt::Display for ExternalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ExternalKey {
    type Error = Error;
    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ExternalKey> for String {
    fn from(key: ExternalKey) -> Self {
        key.0
    }
}

/// Whether a label is a bare item id, which the label service returns when
/// the item has no English label.
pub fn is_unresolved_label(label: &str) -> bool {
    label.len() > 1 && label.starts_with('Q') && label[1..].chars().all(|c| c.is_ascii_digit())
}

/// Reference to one graph entity queued for enrichment.
///
/// `stable_id` is the application-level identifier (article id for persons,
/// event id for events), never a storage-engine row id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentCandidate {
    pub kind: EntityKind,
    pub stable_id: String,
    pub display_name: Option<String>,
}

impl EnrichmentCandidate {
    pub fn new(kind: EntityKind, stable_id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            kind,
            stable_id: stable_id.into(),
            display_name: name,
        }
    }

    /// Trimmed display name, or `None` when missing or blank.
    pub fn name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }
}

// =============================================================================
// RESULT TYPES
// =============================================================================

/// Outcome category of enriching one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    Ok,
    NotFoundLocally,
    NotFoundExternally,
    SkippedNoName,
    Error,
}

impl EnrichmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NotFoundLocally => "not_found_locally",
            Self::NotFoundExternally => "not_found_externally",
            Self::SkippedNoName => "skipped_no_name",
            Self::Error => "error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl std::fmt::Display for EnrichmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of processing one candidate. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub stable_id: String,
    pub status: EnrichmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_key: Option<ExternalKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl EnrichmentResult {
    fn with_status(stable_id: impl Into<String>, status: EnrichmentStatus) -> Self {
        Self {
            stable_id: stable_id.into(),
            status,
            resolved_key: None,
            error_detail: None,
        }
    }

    pub fn ok(stable_id: impl Into<String>, key: ExternalKey) -> Self {
        Self {
            resolved_key: Some(key),
            ..Self::with_status(stable_id, EnrichmentStatus::Ok)
        }
    }

    pub fn skipped_no_name(stable_id: impl Into<String>) -> Self {
        Self::with_status(stable_id, EnrichmentStatus::SkippedNoName)
    }

    pub fn not_found_locally(stable_id: impl Into<String>) -> Self {
        Self::with_status(stable_id, EnrichmentStatus::NotFoundLocally)
    }

    pub fn not_found_externally(stable_id: impl Into<String>) -> Self {
        Self::with_status(stable_id, EnrichmentStatus::NotFoundExternally)
    }

    /// Error result; the detail is truncated to
    /// [`defaults::ERROR_DETAIL_MAX_CHARS`].
    pub fn error(stable_id: impl Into<String>, detail: impl AsRef<str>) -> Self {
        Self {
            error_detail: Some(truncate_detail(detail.as_ref())),
            ..Self::with_status(stable_id, EnrichmentStatus::Error)
        }
    }

    /// Attach the external key that was resolved before a later step failed.
    pub fn with_key(mut self, key: ExternalKey) -> Self {
        self.resolved_key = Some(key);
        self
    }
}

/// Truncate a message on a char boundary, marking the cut with an ellipsis.
pub fn truncate_detail(message: &str) -> String {
    let max = defaults::ERROR_DETAIL_MAX_CHARS;
    if message.chars().count() <= max {
        return message.to_string();
    }
    let mut out: String = message.chars().take(max).collect();
    out.push('…');
    out
}

/// Answer from the external knowledge base.
///
/// `Unavailable` is the sentinel for "retries exhausted": the caller records
/// a failed candidate and moves on instead of aborting the run.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    Unavailable(String),
}

impl<T> Lookup<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(v) => Lookup::Found(f(v)),
            Lookup::NotFound => Lookup::NotFound,
            Lookup::Unavailable(reason) => Lookup::Unavailable(reason),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Lookup::Unavailable(_))
    }
}

// =============================================================================
// ATTRIBUTE BUNDLES
// =============================================================================

/// Label with an optional validity interval (positions, conflicts, parties).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatedLabel {
    pub label: String,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Label with an optional year (awards, notable works).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearLabel {
    pub label: String,
    pub year: Option<String>,
}

/// Person-specific attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonDetails {
    pub death_date: Option<String>,
    pub death_place: Option<String>,
    pub cause_of_death: Option<String>,
    pub killer: Option<String>,
    pub positions: Vec<DatedLabel>,
    pub dynasties: Vec<String>,
    pub events: Vec<String>,
    pub conflicts: Vec<DatedLabel>,
    pub awards: Vec<YearLabel>,
    pub works: Vec<YearLabel>,
    pub parties: Vec<DatedLabel>,
    pub military_ranks: Vec<String>,
    pub religious_orders: Vec<String>,
    pub convictions: Vec<String>,
}

/// Event-specific attributes. Multi-valued fields hold external keys or URLs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventDetails {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub coordinates: Option<String>,
    pub deaths: Option<i64>,
    pub point_in_time: Option<String>,
    pub commons_category: Option<String>,
    pub page_banner: Option<String>,
    pub detail_map: Option<String>,
    pub categories: Vec<String>,
    pub locations: Vec<String>,
    pub causes: Vec<String>,
    pub effects: Vec<String>,
    pub participants: Vec<String>,
    pub part_of: Vec<String>,
    pub has_parts: Vec<String>,
    pub described_by: Vec<String>,
    pub described_at_urls: Vec<String>,
    pub videos: Vec<String>,
    pub main_categories: Vec<String>,
    pub focus_lists: Vec<String>,
}

/// Kind-specific part of an attribute bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttributeDetails {
    #[default]
    Basic,
    Person(PersonDetails),
    Event(EventDetails),
}

/// Attributes fetched for one external key, ready to be written back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeBundle {
    pub description: Option<String>,
    pub image: Option<String>,
    pub details: AttributeDetails,
}

impl AttributeBundle {
    /// Bundle with only the shared attributes.
    pub fn basic(description: Option<String>, image: Option<String>) -> Self {
        Self {
            description,
            image,
            details: AttributeDetails::Basic,
        }
    }

    /// Scalar attributes stored on the entity itself, excluding description
    /// and image which have dedicated columns.
    pub fn scalar_attributes(&self) -> JsonMap<String, JsonValue> {
        let mut out = JsonMap::new();
        let mut put = |k: &str, v: &Option<String>| {
            if let Some(v) = v {
                out.insert(k.to_string(), JsonValue::String(v.clone()));
            }
        };
        match &self.details {
            AttributeDetails::Basic => {}
            AttributeDetails::Person(p) => {
                put("death_date", &p.death_date);
                put("death_place", &p.death_place);
                put("cause_of_death", &p.cause_of_death);
            }
            AttributeDetails::Event(e) => {
                put("start_date", &e.start_date);
                put("end_date", &e.end_date);
                put("coordinates", &e.coordinates);
                put("point_in_time", &e.point_in_time);
                put("commons_category", &e.commons_category);
                put("page_banner", &e.page_banner);
                put("detail_map", &e.detail_map);
                if let Some(deaths) = e.deaths {
                    out.insert("number_of_deaths".to_string(), JsonValue::from(deaths));
                }
                let lists = [
                    ("primary_category_qids", &e.categories),
                    ("location_qids", &e.locations),
                    ("cause_qids", &e.causes),
                    ("effect_qids", &e.effects),
                    ("participant_qids", &e.participants),
                    ("part_of_qids", &e.part_of),
                    ("has_part_qids", &e.has_parts),
                    ("described_by_source_qids", &e.described_by),
                    ("described_at_url", &e.described_at_urls),
                    ("video_urls", &e.videos),
                    ("main_category_qids", &e.main_categories),
                    ("focus_list_qids", &e.focus_lists),
                ];
                for (k, values) in lists {
                    if !values.is_empty() {
                        out.insert(k.to_string(), JsonValue::from(values.clone()));
                    }
                }
            }
        }
        out
    }

    /// Relationship edges derived from this bundle, deduplicated by
    /// `(relation, target)`. A later duplicate replaces the earlier one's
    /// properties, matching merge-then-set semantics in the store.
    pub fn derived_edges(&self) -> Vec<DerivedEdge> {
        let mut edges: BTreeMap<(RelationType, String), DerivedEdge> = BTreeMap::new();
        // Person targets are labels, where a bare item id means "no English
        // label". Event targets are item keys and are kept as-is.
        let mut add = |edge: DerivedEdge| {
            let target = edge.target.trim();
            if target.is_empty() || (!edge.relation.is_keyed() && is_unresolved_label(target)) {
                return;
            }
            edges.insert((edge.relation, edge.target.clone()), edge);
        };

        match &self.details {
            AttributeDetails::Basic => {}
            AttributeDetails::Person(p) => {
                for pos in &p.positions {
                    add(DerivedEdge::dated(RelationType::HeldPosition, pos));
                }
                for c in &p.conflicts {
                    add(DerivedEdge::dated(RelationType::ParticipatedInConflict, c));
                }
                for party in &p.parties {
                    add(DerivedEdge::dated(RelationType::MemberOf, party));
                }
                for award in &p.awards {
                    add(DerivedEdge::yearly(RelationType::ReceivedAward, award, false));
                }
                for work in &p.works {
                    add(DerivedEdge::yearly(RelationType::CreatedWork, work, true));
                }
                let plain = [
                    (RelationType::MemberOfDynasty, &p.dynasties),
                    (RelationType::ParticipatedIn, &p.events),
                    (RelationType::HeldRank, &p.military_ranks),
                    (RelationType::MemberOfOrder, &p.religious_orders),
                    (RelationType::ConvictedOf, &p.convictions),
                ];
                for (relation, labels) in plain {
                    for label in labels {
                        add(DerivedEdge::plain(relation, label));
                    }
                }
                if let Some(killer) = &p.killer {
                    add(DerivedEdge::plain(RelationType::KilledBy, killer));
                }
            }
            AttributeDetails::Event(e) => {
                let keyed = [
                    (RelationType::InstanceOf, &e.categories),
                    (RelationType::LocatedIn, &e.locations),
                    (RelationType::PartOf, &e.part_of),
                ];
                for (relation, keys) in keyed {
                    for key in keys {
                        add(DerivedEdge::plain(relation, key));
                    }
                }
            }
        }
        edges.into_values().collect()
    }
}

// =============================================================================
// DERIVED RELATIONSHIPS
// =============================================================================

/// Relationship written from an enriched entity to a label node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    HeldPosition,
    MemberOfDynasty,
    ParticipatedIn,
    ParticipatedInConflict,
    ReceivedAward,
    CreatedWork,
    MemberOf,
    HeldRank,
    MemberOfOrder,
    ConvictedOf,
    KilledBy,
    InstanceOf,
    LocatedIn,
    PartOf,
}

impl RelationType {
    pub const ALL: [RelationType; 14] = [
        Self::HeldPosition,
        Self::MemberOfDynasty,
        Self::ParticipatedIn,
        Self::ParticipatedInConflict,
        Self::ReceivedAward,
        Self::CreatedWork,
        Self::MemberOf,
        Self::HeldRank,
        Self::MemberOfOrder,
        Self::ConvictedOf,
        Self::KilledBy,
        Self::InstanceOf,
        Self::LocatedIn,
        Self::PartOf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HeldPosition => "HELD_POSITION",
            Self::MemberOfDynasty => "MEMBER_OF_DYNASTY",
            Self::ParticipatedIn => "PARTICIPATED_IN",
            Self::ParticipatedInConflict => "PARTICIPATED_IN_CONFLICT",
            Self::ReceivedAward => "RECEIVED_AWARD",
            Self::CreatedWork => "CREATED_WORK",
            Self::MemberOf => "MEMBER_OF",
            Self::HeldRank => "HELD_RANK",
            Self::MemberOfOrder => "MEMBER_OF_ORDER",
            Self::ConvictedOf => "CONVICTED_OF",
            Self::KilledBy => "KILLED_BY",
            Self::InstanceOf => "INSTANCE_OF",
            Self::LocatedIn => "LOCATED_IN",
            Self::PartOf => "PART_OF",
        }
    }

    /// Whether targets are knowledge-base keys rather than labels.
    pub fn is_keyed(&self) -> bool {
        matches!(self, Self::InstanceOf | Self::LocatedIn | Self::PartOf)
    }

    /// Label of the node at the far end of the edge.
    pub fn target_label(&self) -> &'static str {
        match self {
            Self::HeldPosition => "Position",
            Self::MemberOfDynasty => "Dynasty",
            Self::ParticipatedIn => "HistoricalEvent",
            Self::ParticipatedInConflict => "Conflict",
            Self::ReceivedAward => "Award",
            Self::CreatedWork => "Work",
            Self::MemberOf => "Party",
            Self::HeldRank => "MilitaryRank",
            Self::MemberOfOrder => "ReligiousOrder",
            Self::ConvictedOf => "Crime",
            Self::KilledBy => "Killer",
            Self::InstanceOf => "Category",
            Self::LocatedIn => "Location",
            Self::PartOf => "EventRef",
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == wanted)
            .ok_or_else(|| format!("Invalid relation type: {}", s))
    }
}

/// One edge to upsert: entity -[relation]-> (target_label {key: target}).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedEdge {
    pub relation: RelationType,
    pub target: String,
    /// Properties set on the edge (start/end/year).
    pub edge_properties: JsonMap<String, JsonValue>,
    /// Properties set on the label node.
    pub node_properties: JsonMap<String, JsonValue>,
}

impl DerivedEdge {
    fn plain(relation: RelationType, target: &str) -> Self {
        Self {
            relation,
            target: target.trim().to_string(),
            edge_properties: JsonMap::new(),
            node_properties: JsonMap::new(),
        }
    }

    fn dated(relation: RelationType, label: &DatedLabel) -> Self {
        let mut edge = Self::plain(relation, &label.label);
        edge.edge_properties
            .insert("start".into(), opt_json(&label.start));
        edge.edge_properties.insert("end".into(), opt_json(&label.end));
        edge
    }

    fn yearly(relation: RelationType, label: &YearLabel, on_node: bool) -> Self {
        let mut edge = Self::plain(relation, &label.label);
        edge.edge_properties.insert("year".into(), opt_json(&label.year));
        if on_node {
            edge.node_properties.insert("year".into(), opt_json(&label.year));
        }
        edge
    }

    pub fn target_label(&self) -> &'static str {
        self.relation.target_label()
    }
}

fn opt_json(v: &Option<String>) -> JsonValue {
    v.clone().map(JsonValue::String).unwrap_or(JsonValue::Null)
}

// =============================================================================
// CANDIDATE FILTERS
// =============================================================================

/// Entity attribute whose absence selects a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityAttribute {
    ExternalKey,
    Description,
    Image,
}

impl EntityAttribute {
    /// Column backing the attribute.
    pub fn column(&self) -> &'static str {
        match self {
            Self::ExternalKey => "external_key",
            Self::Description => "description",
            Self::Image => "image_url",
        }
    }
}

impl std::str::FromStr for EntityAttribute {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "external_key" | "qid" | "wikidata_qid" => Ok(Self::ExternalKey),
            "description" => Ok(Self::Description),
            "image" | "image_url" => Ok(Self::Image),
            _ => Err(format!("Invalid entity attribute: {}", s)),
        }
    }
}

/// Predicate narrowing the candidate set, evaluated inside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Criterion {
    /// Every entity of the kind.
    All,
    /// Entities never enriched.
    Unenriched,
    /// Entities without an outgoing edge of the given relation.
    MissingRelationship(RelationType),
    /// Entities with the given attribute unset.
    MissingAttribute(EntityAttribute),
}

impl std::fmt::Display for Criterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Unenriched => f.write_str("unenriched"),
            Self::MissingRelationship(r) => write!(f, "missing-rel:{}", r),
            Self::MissingAttribute(a) => write!(f, "missing-attr:{}", a.column()),
        }
    }
}

impl std::str::FromStr for Criterion {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(rel) = s.strip_prefix("missing-rel:") {
            return rel.parse().map(Self::MissingRelationship);
        }
        if let Some(attr) = s.strip_prefix("missing-attr:") {
            return attr.parse().map(Self::MissingAttribute);
        }
        match s.to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "unenriched" => Ok(Self::Unenriched),
            _ => Err(format!("Invalid candidate criterion: {}", s)),
        }
    }
}

/// Selection of candidates for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFilter {
    pub kind: EntityKind,
    pub criterion: Criterion,
    /// Entities enriched at or after this instant keep matching, so the
    /// candidate set does not shrink under a run that is writing back.
    pub pinned_at: Option<DateTime<Utc>>,
}

impl RunFilter {
    pub fn new(kind: EntityKind, criterion: Criterion) -> Self {
        Self {
            kind,
            criterion,
            pinned_at: None,
        }
    }

    /// Default selection per kind: persons without a dynasty edge, events
    /// never enriched.
    pub fn default_for(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Person => Self::new(
                kind,
                Criterion::MissingRelationship(RelationType::MemberOfDynasty),
            ),
            EntityKind::Event => Self::new(kind, Criterion::Unenriched),
        }
    }

    pub fn pinned(mut self, at: DateTime<Utc>) -> Self {
        self.pinned_at = Some(at);
        self
    }
}
