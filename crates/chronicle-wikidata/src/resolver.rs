//! [`ExternalResolver`] backed by the Wikidata query service.

use async_trait::async_trait;
use tracing::{debug, instrument};

use chronicle_core::{
    is_unresolved_label, AttributeBundle, AttributeDetails, ContinentMapping, DatedLabel,
    EntityKind, Error, EventDetails, ExternalKey, ExternalResolver, GeographyResolver, Lookup,
    PersonDetails, Result, YearLabel,
};

use crate::client::{QueryOutcome, SparqlClient};
use crate::queries;
use crate::types::{value, SparqlResults};

/// Resolves names to Wikidata items and fetches their attributes.
///
/// Identity lookups match on the English label alone and ignore the kind.
/// Keys come back in the order the service lists them. The enricher takes
/// the first, so an ambiguous name resolves to whichever item the service
/// happens to list first.
#[derive(Clone)]
pub struct WikidataResolver {
    client: SparqlClient,
}

/// Run a query inside a fetch, short-circuiting the whole fetch with
/// `Lookup::Unavailable` when the service is down.
macro_rules! rows {
    ($self:ident, $query:expr) => {
        match $self.client.query(&$query).await? {
            QueryOutcome::Results(rows) => rows,
            QueryOutcome::Unavailable(reason) => return Ok(Lookup::Unavailable(reason)),
        }
    };
}

impl WikidataResolver {
    pub fn new(client: SparqlClient) -> Self {
        Self { client }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(SparqlClient::from_env()?))
    }

    pub fn client(&self) -> &SparqlClient {
        &self.client
    }

    async fn fetch_person(&self, key: &ExternalKey) -> Result<Lookup<AttributeBundle>> {
        let basic = rows!(self, queries::basic(key));
        if basic.is_empty() {
            return Ok(Lookup::NotFound);
        }

        let positions = rows!(self, queries::positions(key));
        let dynasties = rows!(self, queries::dynasties(key));
        let death = rows!(self, queries::death(key));
        let events = rows!(self, queries::labels_of(key, "P1344"));
        let conflicts = rows!(self, queries::conflicts(key));
        let awards = rows!(self, queries::awards(key));
        let works = rows!(self, queries::works(key));
        let parties = rows!(self, queries::parties(key));
        let ranks = rows!(self, queries::labels_of(key, "P410"));
        let orders = rows!(self, queries::labels_of(key, "P611"));
        let crimes = rows!(self, queries::labels_of(key, "P1399"));

        let details = PersonDetails {
            death_date: death.first("deathDate").map(str::to_string),
            death_place: resolved(death.first("deathPlaceLabel")),
            cause_of_death: resolved(death.first("causeLabel")),
            killer: resolved(death.first("killerLabel")),
            positions: dated(&positions, "positionLabel"),
            dynasties: labels(&dynasties, "dynastyLabel"),
            events: labels(&events, "valueLabel"),
            conflicts: dated(&conflicts, "conflictLabel"),
            awards: yearly(&awards, "awardLabel"),
            works: yearly(&works, "workLabel"),
            parties: dated(&parties, "partyLabel"),
            military_ranks: labels(&ranks, "valueLabel"),
            religious_orders: labels(&orders, "valueLabel"),
            convictions: labels(&crimes, "valueLabel"),
        };

        Ok(Lookup::Found(AttributeBundle {
            description: basic.first("description").map(str::to_string),
            image: basic.first("image").map(str::to_string),
            details: AttributeDetails::Person(details),
        }))
    }

    async fn fetch_event(&self, key: &ExternalKey) -> Result<Lookup<AttributeBundle>> {
        let rows = rows!(self, queries::event(key));
        if rows.is_empty() {
            return Ok(Lookup::NotFound);
        }

        let first = |var: &str| rows.first(var).map(str::to_string);
        let details = EventDetails {
            start_date: first("startDate"),
            end_date: first("endDate"),
            coordinates: first("coordinates"),
            deaths: rows.first("deaths").and_then(parse_count),
            point_in_time: first("pointInTime"),
            commons_category: first("commonsCategory"),
            page_banner: first("pageBanner"),
            detail_map: first("detailMap"),
            categories: entity_keys(&rows, "category"),
            locations: entity_keys(&rows, "location"),
            causes: entity_keys(&rows, "cause"),
            effects: entity_keys(&rows, "effect"),
            participants: entity_keys(&rows, "participant"),
            part_of: entity_keys(&rows, "partOf"),
            has_parts: entity_keys(&rows, "hasPart"),
            described_by: entity_keys(&rows, "describedBy"),
            described_at_urls: rows.distinct("describedAtUrl"),
            videos: rows.distinct("video"),
            main_categories: entity_keys(&rows, "mainCategory"),
            focus_lists: entity_keys(&rows, "focusList"),
        };

        Ok(Lookup::Found(AttributeBundle {
            description: first("description"),
            image: first("image"),
            details: AttributeDetails::Event(details),
        }))
    }
}

#[async_trait]
impl ExternalResolver for WikidataResolver {
    #[instrument(skip(self), fields(subsystem = "wikidata", op = "resolve_identity"))]
    async fn resolve_identity(
        &self,
        _kind: EntityKind,
        name: &str,
    ) -> Result<Lookup<Vec<ExternalKey>>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("identity lookup needs a name".into()));
        }

        let rows = rows!(
            self,
            queries::identity(name, self.client.config().identity_limit)
        );
        let keys: Vec<ExternalKey> = rows
            .distinct("item")
            .iter()
            .filter_map(|uri| ExternalKey::from_uri(uri).ok())
            .collect();

        debug!(matches = keys.len(), "Identity lookup finished");
        if keys.is_empty() {
            Ok(Lookup::NotFound)
        } else {
            Ok(Lookup::Found(keys))
        }
    }

    #[instrument(skip(self, key), fields(subsystem = "wikidata", op = "fetch_attributes", key = %key))]
    async fn fetch_attributes(
        &self,
        kind: EntityKind,
        key: &ExternalKey,
    ) -> Result<Lookup<AttributeBundle>> {
        match kind {
            EntityKind::Person => self.fetch_person(key).await,
            EntityKind::Event => self.fetch_event(key).await,
        }
    }
}

#[async_trait]
impl GeographyResolver for WikidataResolver {
    #[instrument(skip(self), fields(subsystem = "wikidata", op = "country_continents"))]
    async fn country_continents(&self) -> Result<Lookup<ContinentMapping>> {
        let rows = rows!(self, queries::country_continents());
        let mut mapping = ContinentMapping::new();
        for row in &rows.bindings {
            if let (Some(country), Some(continent)) =
                (value(row, "countryLabel"), value(row, "continentLabel"))
            {
                mapping.insert(country, continent);
            }
        }

        debug!(countries = mapping.len(), "Country placements fetched");
        if mapping.is_empty() {
            Ok(Lookup::NotFound)
        } else {
            Ok(Lookup::Found(mapping))
        }
    }
}

/// Drop labels the label service could not resolve.
fn resolved(label: Option<&str>) -> Option<String> {
    label
        .filter(|l| !is_unresolved_label(l))
        .map(str::to_string)
}

fn labels(rows: &SparqlResults, var: &str) -> Vec<String> {
    rows.distinct(var)
        .into_iter()
        .filter(|l| !is_unresolved_label(l))
        .collect()
}

fn dated(rows: &SparqlResults, var: &str) -> Vec<DatedLabel> {
    rows.bindings
        .iter()
        .filter_map(|row| {
            let label = resolved(value(row, var))?;
            Some(DatedLabel {
                label,
                start: value(row, "start").map(str::to_string),
                end: value(row, "end").map(str::to_string),
            })
        })
        .collect()
}

fn yearly(rows: &SparqlResults, var: &str) -> Vec<YearLabel> {
    rows.bindings
        .iter()
        .filter_map(|row| {
            let label = resolved(value(row, var))?;
            Some(YearLabel {
                label,
                year: value(row, "year").map(str::to_string),
            })
        })
        .collect()
}

/// Entity URIs reduced to bare keys; other values are kept as-is.
fn entity_keys(rows: &SparqlResults, var: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for raw in rows.distinct(var) {
        let v = ExternalKey::from_uri(&raw)
            .map(String::from)
            .unwrap_or(raw);
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

/// Quantities arrive as decimals such as `+47000` or `1.5E3`.
fn parse_count(raw: &str) -> Option<i64> {
    raw.trim()
        .trim_start_matches('+')
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v.round() as i64)
}
