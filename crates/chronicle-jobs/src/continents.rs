//! Country to continent repair.
//!
//! Imports can leave a country linked to several continents. The repair
//! pass fetches the knowledge base's placement of every country once and
//! re-places each country in the graph. Countries the knowledge base does not
//! list keep their links.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument, warn};

use chronicle_core::{
    ContinentDuplicate, ContinentMapping, ContinentRepairReport, CountryRepair, Error,
    GeographyResolver, GeographyStore, Lookup, Result,
};

pub struct ContinentRepairer {
    store: Arc<dyn GeographyStore>,
    resolver: Arc<dyn GeographyResolver>,
}

impl ContinentRepairer {
    pub fn new(store: Arc<dyn GeographyStore>, resolver: Arc<dyn GeographyResolver>) -> Self {
        Self { store, resolver }
    }

    /// Countries currently linked to more than one continent.
    pub async fn check_duplicates(&self) -> Result<Vec<ContinentDuplicate>> {
        self.store.duplicate_continents().await
    }

    /// Re-place every country. Per-country write failures are reported in
    /// the result; an unreachable knowledge base fails the whole pass before
    /// anything is written.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "continents"))]
    pub async fn repair(&self) -> Result<ContinentRepairReport> {
        let started = Instant::now();
        let mapping = match self.resolver.country_continents().await? {
            Lookup::Found(mapping) => mapping,
            Lookup::NotFound => ContinentMapping::new(),
            Lookup::Unavailable(reason) => return Err(Error::TransientExternal(reason)),
        };

        let mut report = ContinentRepairReport::default();
        for country in self.store.countries().await? {
            let name = country.trim();
            if name.is_empty() {
                continue;
            }
            let repair = match mapping.continent_of(name) {
                None => CountryRepair::not_found(name),
                Some(continent) => match self.store.place_country(&country, continent).await {
                    Ok(()) => CountryRepair::updated(name, continent),
                    Err(e) => {
                        warn!(country = name, continent, error = %e, "Country placement failed");
                        CountryRepair::failed(name, continent, &e.to_string())
                    }
                },
            };
            report.record(repair);
        }

        info!(
            processed = report.processed,
            updated = report.updated,
            not_found = report.not_found,
            errors = report.errors,
            duration_ms = started.elapsed().as_millis() as u64,
            "Continent repair finished"
        );
        Ok(report)
    }
}
