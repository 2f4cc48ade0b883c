//! Query service client tests against a stub HTTP server.
//!
//! - Client-001: a permanently rate-limited service is tried exactly
//!   `max_attempts` times and reported unavailable
//! - Client-002: descriptive User-Agent and Accept headers are sent
//! - Client-003: 400 is permanent and not retried
//! - Client-004: transient failures followed by success are absorbed
//! - Resolver-001: identity lookup keeps service order
//! - Resolver-002: person and event bundles are assembled from bindings
//! - Resolver-003: country placements keep the first continent and skip
//!   unresolved labels

use std::sync::atomic::{AtomicUsize, Ordering};

use chronicle_core::{
    AttributeDetails, EntityKind, Error, ExternalKey, ExternalResolver, GeographyResolver,
    Lookup,
};
use chronicle_wikidata::{QueryOutcome, SparqlClient, WikidataConfig, WikidataResolver};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn test_config(server: &MockServer) -> WikidataConfig {
    WikidataConfig::default()
        .with_endpoint(format!("{}/sparql", server.uri()))
        .with_user_agent("chronicle-test/1.0 (ops@example.org)")
        .with_backoff(1, 0, 5)
}

fn bindings(rows: serde_json::Value) -> serde_json::Value {
    json!({"head": {"vars": []}, "results": {"bindings": rows}})
}

fn uri(key: &str) -> serde_json::Value {
    json!({"type": "uri", "value": format!("http://www.wikidata.org/entity/{}", key)})
}

fn lit(v: &str) -> serde_json::Value {
    json!({"type": "literal", "value": v})
}

/// Fails the first `failures` requests with the given status, then succeeds.
struct FlakyResponder {
    calls: AtomicUsize,
    failures: usize,
    status: u16,
    body: serde_json::Value,
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            ResponseTemplate::new(self.status)
        } else {
            ResponseTemplate::new(200).set_body_json(&self.body)
        }
    }
}

#[tokio::test]
async fn test_always_rate_limited_stops_at_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sparql"))
        .respond_with(ResponseTemplate::new(429))
        .expect(5)
        .mount(&server)
        .await;

    let client = SparqlClient::new(test_config(&server).with_max_attempts(5)).unwrap();
    let outcome = client.query("SELECT * WHERE { ?s ?p ?o } LIMIT 1").await.unwrap();

    match outcome {
        QueryOutcome::Unavailable(reason) => {
            assert!(reason.contains("5 attempts"), "reason: {}", reason);
            assert!(reason.contains("429"));
        }
        QueryOutcome::Results(_) => panic!("expected unavailable"),
    }
}

#[tokio::test]
async fn test_sends_identifying_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sparql"))
        .and(header("user-agent", "chronicle-test/1.0 (ops@example.org)"))
        .and(header("accept", "application/sparql-results+json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bindings(json!([]))))
        .expect(1)
        .mount(&server)
        .await;

    let client = SparqlClient::new(test_config(&server)).unwrap();
    let outcome = client.query("ASK { }").await.unwrap();
    assert!(matches!(outcome, QueryOutcome::Results(r) if r.is_empty()));
}

#[tokio::test]
async fn test_bad_query_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sparql"))
        .respond_with(ResponseTemplate::new(400).set_body_string("MalformedQueryException"))
        .expect(1)
        .mount(&server)
        .await;

    let client = SparqlClient::new(test_config(&server)).unwrap();
    let err = client.query("SELEKT").await.unwrap_err();
    assert!(matches!(err, Error::PermanentExternal(ref m) if m.contains("MalformedQuery")));
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sparql"))
        .respond_with(FlakyResponder {
            calls: AtomicUsize::new(0),
            failures: 2,
            status: 503,
            body: bindings(json!([{"item": uri("Q1")}])),
        })
        .expect(3)
        .mount(&server)
        .await;

    let client = SparqlClient::new(test_config(&server)).unwrap();
    match client.query("SELECT ?item WHERE {}").await.unwrap() {
        QueryOutcome::Results(r) => assert_eq!(r.bindings.len(), 1),
        QueryOutcome::Unavailable(r) => panic!("unexpected unavailable: {}", r),
    }
}

#[tokio::test]
async fn test_identity_lookup_keeps_service_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sparql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bindings(json!([
            {"item": uri("Q7259")},
            {"item": uri("Q123")},
            {"item": uri("Q7259")}
        ]))))
        .mount(&server)
        .await;

    let resolver = WikidataResolver::new(SparqlClient::new(test_config(&server)).unwrap());
    let keys = match resolver
        .resolve_identity(EntityKind::Person, "Ada Lovelace")
        .await
        .unwrap()
    {
        Lookup::Found(keys) => keys,
        other => panic!("expected keys, got {:?}", other),
    };
    let keys: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
    assert_eq!(keys, vec!["Q7259", "Q123"]);
}

#[tokio::test]
async fn test_identity_lookup_unavailable_is_not_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sparql"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let resolver = WikidataResolver::new(
        SparqlClient::new(test_config(&server).with_max_attempts(2)).unwrap(),
    );
    let lookup = resolver
        .resolve_identity(EntityKind::Event, "Battle of Hastings")
        .await
        .unwrap();
    assert!(lookup.is_unavailable());
}

#[tokio::test]
async fn test_person_bundle_assembled() {
    let server = MockServer::start().await;
    // Every query gets the same rows; each reads only its own variables.
    Mock::given(method("GET"))
        .and(path("/sparql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bindings(json!([
            {
                "description": lit("English mathematician"),
                "dynastyLabel": lit("House of Byron"),
                "positionLabel": lit("Countess of Lovelace"),
                "start": lit("1838-06-30T00:00:00Z"),
                "deathDate": lit("1852-11-27T00:00:00Z"),
                "killerLabel": lit("Q404"),
                "workLabel": lit("Sketch of the Analytical Engine"),
                "year": lit("1843-01-01T00:00:00Z")
            }
        ]))))
        .expect(12)
        .mount(&server)
        .await;

    let resolver = WikidataResolver::new(SparqlClient::new(test_config(&server)).unwrap());
    let key = ExternalKey::parse("Q7259").unwrap();
    let bundle = match resolver
        .fetch_attributes(EntityKind::Person, &key)
        .await
        .unwrap()
    {
        Lookup::Found(b) => b,
        other => panic!("expected bundle, got {:?}", other),
    };

    assert_eq!(bundle.description.as_deref(), Some("English mathematician"));
    assert_eq!(bundle.image, None);
    let AttributeDetails::Person(person) = bundle.details else {
        panic!("expected person details");
    };
    assert_eq!(person.dynasties, vec!["House of Byron"]);
    assert_eq!(person.positions[0].label, "Countess of Lovelace");
    assert_eq!(person.death_date.as_deref(), Some("1852-11-27T00:00:00Z"));
    assert_eq!(person.killer, None);
    assert_eq!(person.works[0].year.as_deref(), Some("1843-01-01T00:00:00Z"));
}

#[tokio::test]
async fn test_person_fetch_unavailable_midway() {
    let server = MockServer::start().await;
    // The basic query succeeds, then the service starts refusing.
    Mock::given(method("GET"))
        .and(path("/sparql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bindings(json!([{}]))))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sparql"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let resolver = WikidataResolver::new(
        SparqlClient::new(test_config(&server).with_max_attempts(2)).unwrap(),
    );
    let key = ExternalKey::parse("Q7259").unwrap();
    let lookup = resolver
        .fetch_attributes(EntityKind::Person, &key)
        .await
        .unwrap();
    assert!(lookup.is_unavailable());
}

#[tokio::test]
async fn test_event_bundle_deduplicates_cross_product() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sparql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bindings(json!([
            {
                "description": lit("1815 battle"),
                "startDate": lit("1815-06-18T00:00:00Z"),
                "deaths": {"type": "literal", "value": "+47000",
                           "datatype": "http://www.w3.org/2001/XMLSchema#decimal"},
                "category": uri("Q178561"),
                "location": uri("Q31")
            },
            {
                "category": uri("Q178561"),
                "location": uri("Q1025")
            }
        ]))))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = WikidataResolver::new(SparqlClient::new(test_config(&server)).unwrap());
    let key = ExternalKey::parse("Q48314").unwrap();
    let Lookup::Found(bundle) = resolver
        .fetch_attributes(EntityKind::Event, &key)
        .await
        .unwrap()
    else {
        panic!("expected bundle");
    };

    let AttributeDetails::Event(event) = bundle.details else {
        panic!("expected event details");
    };
    assert_eq!(event.deaths, Some(47000));
    assert_eq!(event.categories, vec!["Q178561"]);
    assert_eq!(event.locations, vec!["Q31", "Q1025"]);
    assert_eq!(event.start_date.as_deref(), Some("1815-06-18T00:00:00Z"));
}

#[tokio::test]
async fn test_country_continents_first_listing_wins() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sparql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bindings(json!([
            {"country": uri("Q79"), "countryLabel": lit("Egypt"), "continentLabel": lit("Africa")},
            {"country": uri("Q79"), "countryLabel": lit("Egypt"), "continentLabel": lit("Asia")},
            {"country": uri("Q419"), "countryLabel": lit("Peru"), "continentLabel": lit("South America")},
            {"country": uri("Q999"), "countryLabel": lit("Q999"), "continentLabel": lit("Europe")}
        ]))))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = WikidataResolver::new(SparqlClient::new(test_config(&server)).unwrap());
    let Lookup::Found(mapping) = resolver.country_continents().await.unwrap() else {
        panic!("expected mapping");
    };

    assert_eq!(mapping.len(), 2);
    assert_eq!(mapping.continent_of("Egypt"), Some("Africa"));
    assert_eq!(mapping.continent_of("Peru"), Some("South America"));
    assert_eq!(mapping.continent_of("Q999"), None);
}

#[tokio::test]
async fn test_country_continents_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sparql"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let resolver = WikidataResolver::new(
        SparqlClient::new(test_config(&server).with_max_attempts(2)).unwrap(),
    );
    assert!(resolver.country_continents().await.unwrap().is_unavailable());
}
