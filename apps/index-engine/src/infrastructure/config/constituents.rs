//! Constituents File
//!
//! The constituent set is curated outside the engine and supplied as a JSON
//! array. Each entry may carry a `reference_price` used to seed the
//! simulated quote source.
//!
//! ```json
//! [
//!   {"ticker": "BBCA", "name": "Bank Central Asia", "sector": "Financials",
//!    "shares_outstanding": 123275050000, "free_float_factor": 0.42,
//!    "reference_price": 9800}
//! ]
//! ```

use std::path::Path;

use serde::Deserialize;

use super::ConfigError;
use crate::domain::constituent::{Constituent, ConstituentRegistry};

/// One entry of the constituents file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConstituentDefinition {
    /// Registry fields.
    #[serde(flatten)]
    pub constituent: Constituent,
    /// Indicative price for simulation.
    #[serde(default)]
    pub reference_price: Option<f64>,
}

/// Parse and validate constituent definitions.
///
/// # Errors
///
/// Returns an error for malformed JSON or definitions that violate registry
/// invariants.
pub fn parse_constituents(
    path: &Path,
    json: &str,
) -> Result<(ConstituentRegistry, Vec<ConstituentDefinition>), ConfigError> {
    let definitions: Vec<ConstituentDefinition> =
        serde_json::from_str(json).map_err(|source| ConfigError::ConstituentsParse {
            path: path.to_path_buf(),
            source,
        })?;
    let registry =
        ConstituentRegistry::new(definitions.iter().map(|d| d.constituent.clone()).collect())?;
    Ok((registry, definitions))
}

/// Read, parse and validate the constituents file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is invalid.
pub fn load_constituents(
    path: &Path,
) -> Result<(ConstituentRegistry, Vec<ConstituentDefinition>), ConfigError> {
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::ConstituentsFile {
        path: path.to_path_buf(),
        source,
    })?;
    parse_constituents(path, &json)
}
