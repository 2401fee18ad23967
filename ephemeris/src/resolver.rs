//! Target name resolution.
//!
//! Names are looked up in a local catalog first and then in SIMBAD through
//! its TAP service. All resolvers return J2000 coordinates.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{CelestialCoordinate, EphemerisError, Result};

/// Synchronous TAP endpoint of SIMBAD.
pub const SIMBAD_TAP_URL: &str = "https://simbad.cds.unistra.fr/simbad/sim-tap/sync";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub trait TargetResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<CelestialCoordinate>;
}

/// Resolves names with an ADQL query against SIMBAD.
pub struct SimbadResolver {
    client: reqwest::blocking::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct TapResponse {
    data: Vec<Vec<Option<f64>>>,
}

impl SimbadResolver {
    pub fn new() -> Result<Self> {
        Self::with_endpoint(SIMBAD_TAP_URL)
    }

    pub fn with_endpoint(endpoint: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| EphemerisError::Lookup(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

/// ADQL selecting the J2000 position of the object known by `name`.
pub fn simbad_query(name: &str) -> String {
    let quoted = name.trim().replace('\'', "''");
    format!(
        "SELECT TOP 1 basic.ra, basic.dec FROM basic JOIN ident ON ident.oidref = basic.oid WHERE ident.id = '{quoted}'"
    )
}

/// Extract the first row of a TAP JSON response.
pub fn parse_tap_response(name: &str, body: &str) -> Result<CelestialCoordinate> {
    let response: TapResponse = serde_json::from_str(body)
        .map_err(|e| EphemerisError::Parse(format!("SIMBAD response for {name}: {e}")))?;
    match response.data.first().map(|row| row.as_slice()) {
        Some([Some(ra), Some(dec), ..]) => Ok(CelestialCoordinate::new(*ra, *dec)),
        _ => Err(EphemerisError::ObjectNotFound(name.to_string())),
    }
}

impl TargetResolver for SimbadResolver {
    fn resolve(&self, name: &str) -> Result<CelestialCoordinate> {
        let query = simbad_query(name);
        debug!("SIMBAD query: {query}");
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("request", "doQuery"),
                ("lang", "adql"),
                ("format", "json"),
                ("query", query.as_str()),
            ])
            .send()
            .map_err(|e| EphemerisError::Lookup(format!("SIMBAD request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EphemerisError::Lookup(format!(
                "SIMBAD returned status {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .map_err(|e| EphemerisError::Lookup(format!("Failed to read SIMBAD response: {e}")))?;

        let coord = parse_tap_response(name, &body)?;
        info!(
            "Resolved {name} via SIMBAD: RA {:.5}, DEC {:+.5}",
            coord.ra_deg, coord.dec_deg
        );
        Ok(coord)
    }
}

/// Fixed table of named targets, matched ignoring case and spaces.
#[derive(Debug, Clone, Default)]
pub struct CatalogResolver {
    entries: BTreeMap<String, CelestialCoordinate>,
}

fn catalog_key(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

impl CatalogResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, name: &str, coord: CelestialCoordinate) -> Self {
        self.entries.insert(catalog_key(name), coord);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> FromIterator<(&'a String, &'a CelestialCoordinate)> for CatalogResolver {
    fn from_iter<I: IntoIterator<Item = (&'a String, &'a CelestialCoordinate)>>(iter: I) -> Self {
        let entries = iter
            .into_iter()
            .map(|(name, coord)| (catalog_key(name), *coord))
            .collect();
        Self { entries }
    }
}

impl TargetResolver for CatalogResolver {
    fn resolve(&self, name: &str) -> Result<CelestialCoordinate> {
        self.entries
            .get(&catalog_key(name))
            .copied()
            .ok_or_else(|| EphemerisError::ObjectNotFound(name.to_string()))
    }
}

/// Tries each resolver in turn and returns the first match.
#[derive(Default)]
pub struct ChainResolver {
    resolvers: Vec<Box<dyn TargetResolver>>,
}

impl ChainResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resolver: Box<dyn TargetResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }
}

impl TargetResolver for ChainResolver {
    fn resolve(&self, name: &str) -> Result<CelestialCoordinate> {
        let mut last_error = None;
        for resolver in &self.resolvers {
            match resolver.resolve(name) {
                Ok(coord) => return Ok(coord),
                Err(EphemerisError::ObjectNotFound(_)) => {}
                Err(e) => {
                    warn!("Lookup of {name} failed: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| EphemerisError::ObjectNotFound(name.to_string())))
    }
}
