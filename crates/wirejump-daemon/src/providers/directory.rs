//! Cached endpoint directory and upstream selection

use rand::seq::{IteratorRandom, SliceRandom};
use rand::Rng;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

use super::{Endpoint, Provider, ProviderError};

/// Seconds a directory snapshot stays usable
pub const CACHE_LIFETIME_SECS: i64 = 3600;

/// Draws allowed before giving up on finding a new city
pub const MAX_SELECTION_DRAWS: usize = 33;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no upstream servers available")]
    NoEndpoints,

    #[error("could not find a server in a new city after {0} tries")]
    Exhausted(usize),
}

/// Endpoints of one provider grouped by country
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointDirectory {
    available: BTreeMap<String, Vec<Endpoint>>,
    provided_by: String,
    last_refresh: i64,
}

impl EndpointDirectory {
    pub fn from_endpoints(provided_by: &str, endpoints: Vec<Endpoint>, now: i64) -> Self {
        let mut available: BTreeMap<String, Vec<Endpoint>> = BTreeMap::new();

        for endpoint in endpoints {
            available
                .entry(endpoint.country.clone())
                .or_default()
                .push(endpoint);
        }

        Self {
            available,
            provided_by: provided_by.to_string(),
            last_refresh: now,
        }
    }

    /// Fetch a fresh snapshot from `provider`
    pub async fn fetch(provider: &Provider, now: i64) -> Result<Self, ProviderError> {
        let endpoints = provider.api().get_all_servers().await?;
        let directory = Self::from_endpoints(&provider.name, endpoints, now);

        info!(
            "Fetched {} locations from {}",
            directory.available.len(),
            provider.name
        );

        Ok(directory)
    }

    /// Whether `directory` must be rebuilt before use
    pub fn is_stale(directory: Option<&Self>, provider_name: &str, now: i64) -> bool {
        match directory {
            None => true,
            Some(dir) => {
                dir.provided_by != provider_name || now - dir.last_refresh > CACHE_LIFETIME_SECS
            }
        }
    }

    /// Location keys, sorted
    pub fn locations(&self) -> Vec<String> {
        self.available.keys().cloned().collect()
    }

    pub fn has_location(&self, location: &str) -> bool {
        self.available.contains_key(location)
    }

    pub fn random_location<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<String> {
        self.available.keys().choose(rng).cloned()
    }

    pub fn provided_by(&self) -> &str {
        &self.provided_by
    }

    pub fn last_refresh(&self) -> i64 {
        self.last_refresh
    }

    pub fn endpoints(&self, location: &str) -> &[Endpoint] {
        self.available
            .get(location)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Pick an endpoint in `location`, avoiding the city of `previous`
///
/// Falls back to every known endpoint when `location` has none. A single
/// candidate is returned even if it sits in the previous city.
pub fn guess_new_upstream<R: Rng + ?Sized>(
    directory: &EndpointDirectory,
    previous: Option<&Endpoint>,
    location: &str,
    rng: &mut R,
) -> Result<Endpoint, SelectionError> {
    let mut pool: Vec<&Endpoint> = directory.endpoints(location).iter().collect();

    if pool.is_empty() {
        pool = directory.available.values().flatten().collect();
    }

    match pool.as_slice() {
        [] => return Err(SelectionError::NoEndpoints),
        [only] => return Ok((*only).clone()),
        _ => {}
    }

    let previous_city = previous.map(|endpoint| endpoint.city.as_str());

    for _ in 0..MAX_SELECTION_DRAWS {
        if let Some(candidate) = pool.choose(rng) {
            if Some(candidate.city.as_str()) != previous_city {
                return Ok((*candidate).clone());
            }
        }
    }

    Err(SelectionError::Exhausted(MAX_SELECTION_DRAWS))
}
