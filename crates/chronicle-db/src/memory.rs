//! In-memory graph store for tests and dry runs.
//!
//! Mirrors the merge and filter semantics of [`crate::PgGraphStore`] so the
//! pipeline can be exercised without PostgreSQL. Read and write failures can
//! be injected to drive retry paths.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map as JsonMap, Value as JsonValue};

use chronicle_core::{
    AttributeBundle, CandidateSource, ContinentDuplicate, Criterion, EnrichmentCandidate,
    EnrichmentStore, EntityAttribute, EntityKind, Error, ExternalKey, GeographyStore,
    RelationType, Result, RunFilter, CONTINENT_LABEL, COUNTRY_LABEL,
};

/// Entity row as stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredEntity {
    pub display_name: Option<String>,
    pub external_key: Option<ExternalKey>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub attributes: JsonMap<String, JsonValue>,
    pub last_enriched_at: Option<DateTime<Utc>>,
}

/// Outgoing relation as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRelation {
    pub relation: RelationType,
    pub target_label: String,
    pub target: String,
    pub properties: JsonMap<String, JsonValue>,
}

type RelationKey = (EntityKind, String, RelationType, String);

#[derive(Default)]
struct GraphState {
    entities: BTreeMap<(EntityKind, String), StoredEntity>,
    label_nodes: BTreeMap<(String, String), JsonMap<String, JsonValue>>,
    relations: BTreeMap<RelationKey, JsonMap<String, JsonValue>>,
    upserts: Vec<(EntityKind, String, ExternalKey)>,
    /// Scripted outcomes for upcoming `next_batch` calls; `true` fails.
    read_script: VecDeque<bool>,
    failing_reads: u32,
    failing_upserts: HashSet<String>,
    batch_reads: Vec<u64>,
    /// Country name to linked continents.
    placements: BTreeMap<String, BTreeSet<String>>,
    failing_placements: HashSet<String>,
}

/// Thread-safe in-memory graph.
#[derive(Default)]
pub struct MemoryGraphStore {
    state: Mutex<GraphState>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, GraphState>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("graph state lock poisoned".into()))
    }

    /// Insert or rename an entity.
    pub fn insert_entity(&self, kind: EntityKind, stable_id: &str, display_name: Option<&str>) {
        if let Ok(mut state) = self.lock() {
            state
                .entities
                .entry((kind, stable_id.to_string()))
                .or_default()
                .display_name = display_name.map(str::to_string);
        }
    }

    /// Remove an entity and its relations, as if deleted mid-run.
    pub fn remove_entity(&self, kind: EntityKind, stable_id: &str) {
        if let Ok(mut state) = self.lock() {
            state.entities.remove(&(kind, stable_id.to_string()));
            state
                .relations
                .retain(|(k, id, _, _), _| !(*k == kind && id == stable_id));
        }
    }

    /// Fail the next `n` batch reads.
    pub fn fail_next_reads(&self, n: u32) {
        if let Ok(mut state) = self.lock() {
            state.failing_reads = n;
        }
    }

    /// Script upcoming batch reads in order: `true` fails, `false` succeeds.
    /// Takes precedence over [`Self::fail_next_reads`].
    pub fn script_reads(&self, outcomes: impl IntoIterator<Item = bool>) {
        if let Ok(mut state) = self.lock() {
            state.read_script.extend(outcomes);
        }
    }

    /// Make every upsert for `stable_id` fail.
    pub fn fail_upserts_for(&self, stable_id: &str) {
        if let Ok(mut state) = self.lock() {
            state.failing_upserts.insert(stable_id.to_string());
        }
    }

    /// Merge a country node and link it to each of `continents`.
    pub fn insert_country(&self, country: &str, continents: &[&str]) {
        if let Ok(mut state) = self.lock() {
            state
                .label_nodes
                .entry((COUNTRY_LABEL.to_string(), country.to_string()))
                .or_default();
            for continent in continents {
                state
                    .label_nodes
                    .entry((CONTINENT_LABEL.to_string(), continent.to_string()))
                    .or_default();
            }
            state
                .placements
                .entry(country.to_string())
                .or_default()
                .extend(continents.iter().map(|c| c.to_string()));
        }
    }

    /// Make every placement of `country` fail.
    pub fn fail_placements_for(&self, country: &str) {
        if let Ok(mut state) = self.lock() {
            state.failing_placements.insert(country.to_string());
        }
    }

    /// Continents linked to `country`, in name order.
    pub fn continents_of(&self, country: &str) -> Vec<String> {
        self.lock()
            .ok()
            .and_then(|s| s.placements.get(country).cloned())
            .map(|set| set.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn entity(&self, kind: EntityKind, stable_id: &str) -> Option<StoredEntity> {
        self.lock()
            .ok()?
            .entities
            .get(&(kind, stable_id.to_string()))
            .cloned()
    }

    pub fn relations(&self, kind: EntityKind, stable_id: &str) -> Vec<StoredRelation> {
        let Ok(state) = self.lock() else {
            return Vec::new();
        };
        state
            .relations
            .iter()
            .filter(|((k, id, _, _), _)| *k == kind && id == stable_id)
            .map(|((_, _, relation, target), props)| StoredRelation {
                relation: *relation,
                target_label: relation.target_label().to_string(),
                target: target.clone(),
                properties: props.clone(),
            })
            .collect()
    }

    pub fn label_node_count(&self) -> usize {
        self.lock().map(|s| s.label_nodes.len()).unwrap_or(0)
    }

    /// Every successful upsert in call order.
    pub fn upserts(&self) -> Vec<(EntityKind, String, ExternalKey)> {
        self.lock().map(|s| s.upserts.clone()).unwrap_or_default()
    }

    pub fn upsert_count(&self) -> usize {
        self.lock().map(|s| s.upserts.len()).unwrap_or(0)
    }

    /// Offsets requested by `next_batch`, including failed reads.
    pub fn batch_reads(&self) -> Vec<u64> {
        self.lock().map(|s| s.batch_reads.clone()).unwrap_or_default()
    }

    fn matches(state: &GraphState, filter: &RunFilter, kind: EntityKind, id: &str, e: &StoredEntity) -> bool {
        if kind != filter.kind {
            return false;
        }
        let selected = match filter.criterion {
            Criterion::All => true,
            Criterion::Unenriched => e.last_enriched_at.is_none(),
            Criterion::MissingRelationship(rel) => !state
                .relations
                .keys()
                .any(|(k, from, r, _)| *k == kind && from == id && *r == rel),
            Criterion::MissingAttribute(attr) => match attr {
                EntityAttribute::ExternalKey => e.external_key.is_none(),
                EntityAttribute::Description => blank(&e.description),
                EntityAttribute::Image => blank(&e.image_url),
            },
        };
        let pinned = match (filter.pinned_at, e.last_enriched_at) {
            (Some(pin), Some(at)) => at >= pin,
            _ => false,
        };
        selected || pinned
    }
}

fn blank(v: &Option<String>) -> bool {
    v.as_deref().map(str::is_empty).unwrap_or(true)
}

#[async_trait]
impl CandidateSource for MemoryGraphStore {
    async fn count(&self, filter: &RunFilter) -> Result<u64> {
        let state = self.lock()?;
        let n = state
            .entities
            .iter()
            .filter(|((kind, id), e)| Self::matches(&state, filter, *kind, id, e))
            .count();
        Ok(n as u64)
    }

    async fn next_batch(
        &self,
        filter: &RunFilter,
        offset: u64,
        size: usize,
    ) -> Result<Vec<EnrichmentCandidate>> {
        let mut state = self.lock()?;
        state.batch_reads.push(offset);
        let fail = match state.read_script.pop_front() {
            Some(outcome) => outcome,
            None if state.failing_reads > 0 => {
                state.failing_reads -= 1;
                true
            }
            None => false,
        };
        if fail {
            return Err(Error::StoreUnavailable(format!(
                "injected read failure at offset {}",
                offset
            )));
        }

        Ok(state
            .entities
            .iter()
            .filter(|((kind, id), e)| Self::matches(&state, filter, *kind, id, e))
            .skip(offset as usize)
            .take(size)
            .map(|((kind, id), e)| EnrichmentCandidate {
                kind: *kind,
                stable_id: id.clone(),
                display_name: e.display_name.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl EnrichmentStore for MemoryGraphStore {
    async fn exists(&self, kind: EntityKind, stable_id: &str) -> Result<bool> {
        Ok(self
            .lock()?
            .entities
            .contains_key(&(kind, stable_id.to_string())))
    }

    async fn find_by_name(
        &self,
        kind: EntityKind,
        name: &str,
    ) -> Result<Option<EnrichmentCandidate>> {
        let name = name.trim();
        Ok(self
            .lock()?
            .entities
            .iter()
            .find(|((k, _), e)| {
                *k == kind
                    && e.display_name
                        .as_deref()
                        .is_some_and(|n| n.trim().to_lowercase() == name.to_lowercase())
            })
            .map(|((k, id), e)| EnrichmentCandidate {
                kind: *k,
                stable_id: id.clone(),
                display_name: e.display_name.clone(),
            }))
    }

    async fn upsert_enrichment(
        &self,
        kind: EntityKind,
        stable_id: &str,
        key: &ExternalKey,
        bundle: &AttributeBundle,
    ) -> Result<()> {
        let mut state = self.lock()?;
        if state.failing_upserts.contains(stable_id) {
            return Err(Error::StoreUnavailable(format!(
                "injected write failure for {}",
                stable_id
            )));
        }
        let entity_key = (kind, stable_id.to_string());
        let Some(entity) = state.entities.get_mut(&entity_key) else {
            return Err(Error::LocalNotFound(format!("{} {}", kind, stable_id)));
        };

        entity.external_key = Some(key.clone());
        if bundle.description.is_some() {
            entity.description = bundle.description.clone();
        }
        if bundle.image.is_some() {
            entity.image_url = bundle.image.clone();
        }
        entity.attributes.extend(bundle.scalar_attributes());
        entity.last_enriched_at = Some(Utc::now());

        for edge in bundle.derived_edges() {
            state
                .label_nodes
                .entry((edge.target_label().to_string(), edge.target.clone()))
                .or_default()
                .extend(edge.node_properties.clone());
            state.relations.insert(
                (kind, stable_id.to_string(), edge.relation, edge.target.clone()),
                edge.edge_properties.clone(),
            );
        }
        state.upserts.push((kind, stable_id.to_string(), key.clone()));
        Ok(())
    }
}

#[async_trait]
impl GeographyStore for MemoryGraphStore {
    async fn countries(&self) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .label_nodes
            .keys()
            .filter(|(label, _)| label == COUNTRY_LABEL)
            .map(|(_, key)| key.clone())
            .collect())
    }

    async fn duplicate_continents(&self) -> Result<Vec<ContinentDuplicate>> {
        let mut duplicates: Vec<ContinentDuplicate> = self
            .lock()?
            .placements
            .iter()
            .filter(|(_, continents)| continents.len() > 1)
            .map(|(country, continents)| ContinentDuplicate {
                country: country.clone(),
                continents: continents.iter().cloned().collect(),
            })
            .collect();
        duplicates.sort_by(|a, b| b.continents.len().cmp(&a.continents.len()));
        Ok(duplicates)
    }

    async fn place_country(&self, country: &str, continent: &str) -> Result<()> {
        let mut state = self.lock()?;
        if state.failing_placements.contains(country) {
            return Err(Error::StoreUnavailable(format!(
                "injected write failure for {}",
                country
            )));
        }
        if !state
            .label_nodes
            .contains_key(&(COUNTRY_LABEL.to_string(), country.to_string()))
        {
            return Err(Error::LocalNotFound(format!("country {}", country)));
        }
        state
            .label_nodes
            .entry((CONTINENT_LABEL.to_string(), continent.to_string()))
            .or_default();
        state
            .placements
            .insert(country.to_string(), BTreeSet::from([continent.to_string()]));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_core::{AttributeDetails, DatedLabel, PersonDetails, YearLabel};

    fn person_bundle() -> AttributeBundle {
        AttributeBundle {
            description: Some("English mathematician".into()),
            image: Some("http://commons.wikimedia.org/ada.jpg".into()),
            details: AttributeDetails::Person(PersonDetails {
                death_date: Some("1852-11-27".into()),
                dynasties: vec!["House of Byron".into()],
                positions: vec![DatedLabel {
                    label: "Countess of Lovelace".into(),
                    start: Some("1838".into()),
                    end: None,
                }],
                works: vec![YearLabel {
                    label: "Sketch of the Analytical Engine".into(),
                    year: Some("1843".into()),
                }],
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn test_upsert_twice_is_idempotent() {
        let store = MemoryGraphStore::new();
        store.insert_entity(EntityKind::Person, "42", Some("Ada King"));
        let key = ExternalKey::parse("Q7259").unwrap();

        store
            .upsert_enrichment(EntityKind::Person, "42", &key, &person_bundle())
            .await
            .unwrap();
        let first = store.relations(EntityKind::Person, "42");
        let nodes = store.label_node_count();

        store
            .upsert_enrichment(EntityKind::Person, "42", &key, &person_bundle())
            .await
            .unwrap();

        assert_eq!(store.relations(EntityKind::Person, "42"), first);
        assert_eq!(store.label_node_count(), nodes);
        assert_eq!(first.len(), 3);
        let entity = store.entity(EntityKind::Person, "42").unwrap();
        assert_eq!(entity.external_key, Some(key));
        assert_eq!(entity.attributes["death_date"], "1852-11-27");
    }

    #[tokio::test]
    async fn test_upsert_missing_entity_fails() {
        let store = MemoryGraphStore::new();
        let key = ExternalKey::parse("Q1").unwrap();
        let err = store
            .upsert_enrichment(EntityKind::Event, "nope", &key, &AttributeBundle::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LocalNotFound(_)));
    }

    #[tokio::test]
    async fn test_pagination_is_ordered_and_disjoint() {
        let store = MemoryGraphStore::new();
        for i in 0..7 {
            store.insert_entity(EntityKind::Event, &format!("e{:02}", i), Some("x"));
        }
        store.insert_entity(EntityKind::Person, "p1", Some("y"));
        let filter = RunFilter::new(EntityKind::Event, Criterion::All);

        assert_eq!(store.count(&filter).await.unwrap(), 7);
        let a = store.next_batch(&filter, 0, 3).await.unwrap();
        let b = store.next_batch(&filter, 3, 3).await.unwrap();
        let c = store.next_batch(&filter, 6, 3).await.unwrap();
        let d = store.next_batch(&filter, 9, 3).await.unwrap();
        let ids: Vec<_> = a.iter().chain(&b).chain(&c).map(|c| c.stable_id.as_str()).collect();
        assert_eq!(ids, ["e00", "e01", "e02", "e03", "e04", "e05", "e06"]);
        assert!(d.is_empty());
    }

    #[tokio::test]
    async fn test_pinned_filter_keeps_enriched_entities() {
        let store = MemoryGraphStore::new();
        for id in ["a", "b", "c"] {
            store.insert_entity(EntityKind::Person, id, Some(id));
        }
        let pinned = Utc::now();
        let filter = RunFilter::default_for(EntityKind::Person).pinned(pinned);
        let unpinned = RunFilter::default_for(EntityKind::Person);

        let bundle = person_bundle();
        store
            .upsert_enrichment(EntityKind::Person, "a", &ExternalKey::parse("Q1").unwrap(), &bundle)
            .await
            .unwrap();

        assert_eq!(store.count(&unpinned).await.unwrap(), 2);
        assert_eq!(store.count(&filter).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_injected_read_failures() {
        let store = MemoryGraphStore::new();
        store.insert_entity(EntityKind::Event, "1", Some("Battle"));
        let filter = RunFilter::new(EntityKind::Event, Criterion::All);
        store.fail_next_reads(2);

        assert!(store.next_batch(&filter, 0, 10).await.is_err());
        assert!(store.next_batch(&filter, 0, 10).await.is_err());
        assert_eq!(store.next_batch(&filter, 0, 10).await.unwrap().len(), 1);
        assert_eq!(store.batch_reads(), vec![0, 0, 0]);
    }

    #[tokio::test]
    async fn test_find_by_name() {
        let store = MemoryGraphStore::new();
        store.insert_entity(EntityKind::Person, "42", Some("Ada King"));
        let found = store
            .find_by_name(EntityKind::Person, " ada king ")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.stable_id, "42");
        assert!(store
            .find_by_name(EntityKind::Event, "Ada King")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_place_country_replaces_duplicates() {
        let store = MemoryGraphStore::new();
        store.insert_country("Egypt", &["Africa", "Asia"]);
        store.insert_country("Turkey", &["Asia", "Europe", "Oceania"]);
        store.insert_country("Peru", &["South America"]);

        let duplicates = store.duplicate_continents().await.unwrap();
        let countries: Vec<_> = duplicates.iter().map(|d| d.country.as_str()).collect();
        assert_eq!(countries, ["Turkey", "Egypt"]);

        store.place_country("Egypt", "Africa").await.unwrap();
        store.place_country("Egypt", "Africa").await.unwrap();
        assert_eq!(store.continents_of("Egypt"), vec!["Africa"]);
        assert_eq!(store.duplicate_continents().await.unwrap().len(), 1);

        let err = store.place_country("Atlantis", "Europe").await.unwrap_err();
        assert!(matches!(err, Error::LocalNotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_entity() {
        let store = MemoryGraphStore::new();
        store.insert_entity(EntityKind::Person, "1", Some("x"));
        assert!(store.exists(EntityKind::Person, "1").await.unwrap());
        store.remove_entity(EntityKind::Person, "1");
        assert!(!store.exists(EntityKind::Person, "1").await.unwrap());
    }
}
