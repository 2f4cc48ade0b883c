//! # chronicle-jobs
//!
//! Enrichment runs for chronicle.
//!
//! This crate provides:
//! - The entity enricher (resolve, fetch, idempotent write-back)
//! - A bounded worker pool with per-task timeouts and a submission throttle
//! - File and in-memory checkpoint stores
//! - The run controller with single-flight start/resume, cooperative stop
//!   and run events on a broadcast channel
//! - The country to continent repair pass
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use chronicle_jobs::{
//!     ControllerConfig, EnrichmentConfig, EntityEnricher, FileCheckpointStore, RunController,
//!     WorkerPool,
//! };
//! use chronicle_core::{EntityKind, RunFilter};
//!
//! let config = EnrichmentConfig::from_env();
//! let db = chronicle_db::Database::connect("postgres://...").await?;
//! let graph = Arc::new(db.graph.clone());
//! let resolver = Arc::new(chronicle_wikidata::WikidataResolver::from_env()?);
//!
//! let enricher = Arc::new(EntityEnricher::new(graph.clone(), resolver));
//! let controller = RunController::new(
//!     graph,
//!     WorkerPool::from_config(enricher, &config),
//!     Arc::new(FileCheckpointStore::new("enrichment_checkpoint.json")),
//!     ControllerConfig::from(&config),
//! );
//!
//! let mut events = controller.events();
//! controller.start(config.plan(RunFilter::default_for(EntityKind::Event))).await?;
//! while let Ok(event) = events.recv().await {
//!     println!("{}", event.event_type);
//!     if event.payload.is_terminal() {
//!         break;
//!     }
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod continents;
pub mod controller;
pub mod enricher;
pub mod pool;
pub mod throttle;

// Re-export core types
pub use chronicle_core::*;

pub use checkpoint::{FileCheckpointStore, MemoryCheckpointStore};
pub use config::EnrichmentConfig;
pub use continents::ContinentRepairer;
pub use controller::{ControllerConfig, RunController};
pub use enricher::{EnrichmentPreview, EntityEnricher};
pub use pool::WorkerPool;
pub use throttle::SubmissionThrottle;
