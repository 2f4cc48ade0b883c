//! SPARQL query builders.
//!
//! Names are embedded as escaped string literals. Keys are embedded
//! verbatim, which is safe because [`ExternalKey`] only admits `Q<digits>`.

use chronicle_core::ExternalKey;

/// Escape a string for use inside a double-quoted SPARQL literal.
pub fn escape_literal(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// Items whose English label equals `name` exactly.
pub fn identity(name: &str, limit: usize) -> String {
    format!(
        r#"SELECT ?item WHERE {{
  ?item rdfs:label "{}"@en .
}} LIMIT {}"#,
        escape_literal(name.trim()),
        limit.max(1)
    )
}

/// English description and image.
pub fn basic(key: &ExternalKey) -> String {
    format!(
        r#"SELECT ?description ?image WHERE {{
  BIND(wd:{key} AS ?item)
  OPTIONAL {{ ?item schema:description ?description FILTER(LANG(?description) = 'en') }}
  OPTIONAL {{ ?item wdt:P18 ?image . }}
}}"#
    )
}

/// Positions held (P39) with statement start/end qualifiers.
pub fn positions(key: &ExternalKey) -> String {
    format!(
        r#"SELECT ?positionLabel ?start ?end WHERE {{
  BIND(wd:{key} AS ?person)
  ?person p:P39 ?stmt .
  ?stmt ps:P39 ?position .
  OPTIONAL {{ ?stmt pq:P580 ?start . }}
  OPTIONAL {{ ?stmt pq:P582 ?end . }}
  SERVICE wikibase:label {{ bd:serviceParam wikibase:language "en". }}
}}"#
    )
}

/// Family (P53) or dynasty-like affiliation (P103).
pub fn dynasties(key: &ExternalKey) -> String {
    format!(
        r#"SELECT ?dynastyLabel WHERE {{
  BIND(wd:{key} AS ?person)
  {{ ?person wdt:P53 ?dynasty . }} UNION {{ ?person wdt:P103 ?dynasty . }}
  SERVICE wikibase:label {{ bd:serviceParam wikibase:language "en". }}
}}"#
    )
}

/// Death date (P570), place (P20), cause (P509) and killer (P157).
pub fn death(key: &ExternalKey) -> String {
    format!(
        r#"SELECT ?deathDate ?deathPlaceLabel ?causeLabel ?killerLabel WHERE {{
  BIND(wd:{key} AS ?person)
  OPTIONAL {{ ?person wdt:P570 ?deathDate . }}
  OPTIONAL {{ ?person wdt:P20 ?deathPlace . }}
  OPTIONAL {{ ?person wdt:P509 ?cause . }}
  OPTIONAL {{ ?person wdt:P157 ?killer . }}
  SERVICE wikibase:label {{ bd:serviceParam wikibase:language "en". }}
}}"#
    )
}

/// Labels of one direct property. Used for events (P1344), ranks (P410),
/// religious orders (P611) and convictions (P1399).
pub fn labels_of(key: &ExternalKey, property: &str) -> String {
    format!(
        r#"SELECT ?valueLabel WHERE {{
  BIND(wd:{key} AS ?person)
  ?person wdt:{property} ?value .
  SERVICE wikibase:label {{ bd:serviceParam wikibase:language "en". }}
}}"#
    )
}

/// Conflicts (P607) with the conflict's own start/end.
pub fn conflicts(key: &ExternalKey) -> String {
    format!(
        r#"SELECT ?conflictLabel ?start ?end WHERE {{
  BIND(wd:{key} AS ?person)
  ?person wdt:P607 ?conflict .
  OPTIONAL {{ ?conflict wdt:P580 ?start . }}
  OPTIONAL {{ ?conflict wdt:P582 ?end . }}
  SERVICE wikibase:label {{ bd:serviceParam wikibase:language "en". }}
}}"#
    )
}

/// Awards (P166) with point-in-time qualifier.
pub fn awards(key: &ExternalKey) -> String {
    format!(
        r#"SELECT ?awardLabel ?year WHERE {{
  BIND(wd:{key} AS ?person)
  ?person p:P166 ?stmt .
  ?stmt ps:P166 ?award .
  OPTIONAL {{ ?stmt pq:P585 ?year . }}
  SERVICE wikibase:label {{ bd:serviceParam wikibase:language "en". }}
}}"#
    )
}

/// Notable works (P800) with publication date.
pub fn works(key: &ExternalKey) -> String {
    format!(
        r#"SELECT ?workLabel ?year WHERE {{
  BIND(wd:{key} AS ?person)
  ?person wdt:P800 ?work .
  OPTIONAL {{ ?work wdt:P577 ?year . }}
  SERVICE wikibase:label {{ bd:serviceParam wikibase:language "en". }}
}}"#
    )
}

/// Party memberships (P102) with start/end qualifiers.
pub fn parties(key: &ExternalKey) -> String {
    format!(
        r#"SELECT ?partyLabel ?start ?end WHERE {{
  BIND(wd:{key} AS ?person)
  ?person p:P102 ?stmt .
  ?stmt ps:P102 ?party .
  OPTIONAL {{ ?stmt pq:P580 ?start . }}
  OPTIONAL {{ ?stmt pq:P582 ?end . }}
  SERVICE wikibase:label {{ bd:serviceParam wikibase:language "en". }}
}}"#
    )
}

/// All optional event attributes in one query. Multi-valued variables
/// produce a cross product of rows which the caller deduplicates.
pub fn event(key: &ExternalKey) -> String {
    format!(
        r#"SELECT ?description ?image ?startDate ?endDate ?coordinates ?deaths
       ?pointInTime ?commonsCategory ?pageBanner ?detailMap
       ?category ?location ?cause ?effect ?participant ?partOf ?hasPart
       ?describedBy ?describedAtUrl ?video ?mainCategory ?focusList
WHERE {{
  BIND(wd:{key} AS ?event)
  OPTIONAL {{ ?event schema:description ?description FILTER(LANG(?description) = 'en') }}
  OPTIONAL {{ ?event wdt:P18 ?image . }}
  OPTIONAL {{ ?event wdt:P580 ?startDate . }}
  OPTIONAL {{ ?event wdt:P582 ?endDate . }}
  OPTIONAL {{ ?event wdt:P625 ?coordinates . }}
  OPTIONAL {{ ?event wdt:P1120 ?deaths . }}
  OPTIONAL {{ ?event wdt:P585 ?pointInTime . }}
  OPTIONAL {{ ?event wdt:P373 ?commonsCategory . }}
  OPTIONAL {{ ?event wdt:P948 ?pageBanner . }}
  OPTIONAL {{ ?event wdt:P951 ?detailMap . }}
  OPTIONAL {{ ?event wdt:P31 ?category . }}
  OPTIONAL {{ ?event wdt:P276 ?location . }}
  OPTIONAL {{ ?event wdt:P828 ?cause . }}
  OPTIONAL {{ ?event wdt:P1542 ?effect . }}
  OPTIONAL {{ ?event wdt:P710 ?participant . }}
  OPTIONAL {{ ?event wdt:P361 ?partOf . }}
  OPTIONAL {{ ?event wdt:P527 ?hasPart . }}
  OPTIONAL {{ ?event wdt:P1343 ?describedBy . }}
  OPTIONAL {{ ?event wdt:P973 ?describedAtUrl . }}
  OPTIONAL {{ ?event wdt:P1047 ?video . }}
  OPTIONAL {{ ?event wdt:P301 ?mainCategory . }}
  OPTIONAL {{ ?event wdt:P1013 ?focusList . }}
}}"#
    )
}

/// Every country (P31/P279* of Q6256) with its continent (P30).
pub fn country_continents() -> String {
    r#"SELECT ?country ?countryLabel ?continentLabel WHERE {
  ?country wdt:P31/wdt:P279* wd:Q6256 .
  ?country wdt:P30 ?continent .
  SERVICE wikibase:label { bd:serviceParam wikibase:language "en". }
}"#
    .to_string()
}
