//! # chronicle-wikidata
//!
//! Client for the Wikidata SPARQL query service.
//!
//! This crate provides:
//! - A SPARQL client with bounded exponential backoff for 429/5xx and
//!   network failures
//! - Query builders with literal escaping
//! - [`WikidataResolver`], the production [`chronicle_core::ExternalResolver`]
//!   and [`chronicle_core::GeographyResolver`]
//!
//! # Example
//!
//! ```rust,no_run
//! use chronicle_core::{EntityKind, ExternalResolver, Lookup};
//! use chronicle_wikidata::WikidataResolver;
//!
//! #[tokio::main]
//! async fn main() {
//!     let resolver = WikidataResolver::from_env().unwrap();
//!     if let Ok(Lookup::Found(keys)) =
//!         resolver.resolve_identity(EntityKind::Person, "Ada Lovelace").await
//!     {
//!         println!("first match: {}", keys[0]);
//!     }
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod queries;
pub mod resolver;
pub mod types;

pub use client::{QueryOutcome, SparqlClient, SPARQL_RESULTS_JSON};
pub use config::WikidataConfig;
pub use error::{to_chronicle_error, SparqlErrorCode};
pub use resolver::WikidataResolver;
pub use types::{Binding, BindingValue, SparqlResponse, SparqlResults};
