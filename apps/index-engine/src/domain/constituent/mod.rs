//! Constituent Registry
//!
//! Static per-stock metadata for the index constituents. The registry is
//! created from configuration at start-up and only changes through
//! administrative actions, each of which is expressed as a
//! [`RegistryChange`] so the engine can recalibrate the divisor around it.
//!
//! # Invariants
//!
//! - Tickers are unique within a registry.
//! - `shares_outstanding > 0` for every constituent.
//! - `free_float_factor` is finite and within `[0, 1]`.

use serde::{Deserialize, Serialize};

// =============================================================================
// Constituent
// =============================================================================

/// A single index constituent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constituent {
    /// Exchange ticker (unique key).
    pub ticker: String,
    /// Company name.
    pub name: String,
    /// Sector classification.
    pub sector: String,
    /// Total shares outstanding.
    pub shares_outstanding: u64,
    /// Fraction of shares available for public trading.
    pub free_float_factor: f64,
}

impl Constituent {
    /// Create a validated constituent.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` if the ticker is empty, shares are zero or the
    /// free-float factor is outside `[0, 1]`.
    pub fn new(
        ticker: impl Into<String>,
        name: impl Into<String>,
        sector: impl Into<String>,
        shares_outstanding: u64,
        free_float_factor: f64,
    ) -> Result<Self, RegistryError> {
        let constituent = Self {
            ticker: ticker.into(),
            name: name.into(),
            sector: sector.into(),
            shares_outstanding,
            free_float_factor,
        };
        constituent.validate()?;
        Ok(constituent)
    }

    /// Check the constituent invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.ticker.trim().is_empty() {
            return Err(RegistryError::EmptyTicker);
        }
        if self.shares_outstanding == 0 {
            return Err(RegistryError::InvalidShares {
                ticker: self.ticker.clone(),
            });
        }
        validate_free_float(&self.ticker, self.free_float_factor)
    }

    /// Free-float adjusted share count.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn free_float_shares(&self) -> f64 {
        self.shares_outstanding as f64 * self.free_float_factor
    }
}

fn validate_free_float(ticker: &str, factor: f64) -> Result<(), RegistryError> {
    if factor.is_finite() && (0.0..=1.0).contains(&factor) {
        Ok(())
    } else {
        Err(RegistryError::InvalidFreeFloat {
            ticker: ticker.to_string(),
            factor,
        })
    }
}

// =============================================================================
// Registry Changes
// =============================================================================

/// An administrative change to the constituent set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RegistryChange {
    /// Add a new constituent.
    Add {
        /// The constituent to add.
        constituent: Constituent,
    },
    /// Remove a constituent by ticker.
    Remove {
        /// Ticker to remove.
        ticker: String,
    },
    /// Change a constituent's free-float factor.
    SetFreeFloat {
        /// Ticker to update.
        ticker: String,
        /// New free-float factor.
        free_float_factor: f64,
    },
    /// Change a constituent's shares outstanding.
    SetShares {
        /// Ticker to update.
        ticker: String,
        /// New shares outstanding.
        shares_outstanding: u64,
    },
}

impl RegistryChange {
    /// Ticker the change applies to.
    #[must_use]
    pub fn ticker(&self) -> &str {
        match self {
            Self::Add { constituent } => &constituent.ticker,
            Self::Remove { ticker }
            | Self::SetFreeFloat { ticker, .. }
            | Self::SetShares { ticker, .. } => ticker,
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Remove { .. } => "remove",
            Self::SetFreeFloat { .. } => "set_free_float",
            Self::SetShares { .. } => "set_shares",
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Ordered set of constituents keyed by ticker.
///
/// Order is the configuration order and is preserved in published weight
/// tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstituentRegistry {
    constituents: Vec<Constituent>,
}

impl ConstituentRegistry {
    /// Build a registry, validating every constituent and rejecting duplicates.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` on the first invalid or duplicate entry.
    pub fn new(constituents: Vec<Constituent>) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        for constituent in constituents {
            registry.insert(constituent)?;
        }
        Ok(registry)
    }

    fn insert(&mut self, constituent: Constituent) -> Result<(), RegistryError> {
        constituent.validate()?;
        if self.get(&constituent.ticker).is_some() {
            return Err(RegistryError::DuplicateTicker(constituent.ticker));
        }
        self.constituents.push(constituent);
        Ok(())
    }

    /// Look up a constituent by ticker.
    #[must_use]
    pub fn get(&self, ticker: &str) -> Option<&Constituent> {
        self.constituents.iter().find(|c| c.ticker == ticker)
    }

    /// Iterate constituents in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &Constituent> {
        self.constituents.iter()
    }

    /// Tickers in registry order.
    #[must_use]
    pub fn tickers(&self) -> Vec<String> {
        self.constituents.iter().map(|c| c.ticker.clone()).collect()
    }

    /// Number of constituents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.constituents.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constituents.is_empty()
    }

    /// Produce the registry that results from applying `change`.
    ///
    /// The receiver is left untouched so the caller can compare the
    /// before and after states when recalibrating.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` if the change is invalid for this registry.
    pub fn with_change(&self, change: &RegistryChange) -> Result<Self, RegistryError> {
        let mut next = self.clone();
        match change {
            RegistryChange::Add { constituent } => next.insert(constituent.clone())?,
            RegistryChange::Remove { ticker } => {
                let before = next.constituents.len();
                next.constituents.retain(|c| &c.ticker != ticker);
                if next.constituents.len() == before {
                    return Err(RegistryError::UnknownTicker(ticker.clone()));
                }
                if next.constituents.is_empty() {
                    return Err(RegistryError::WouldBeEmpty);
                }
            }
            RegistryChange::SetFreeFloat {
                ticker,
                free_float_factor,
            } => {
                validate_free_float(ticker, *free_float_factor)?;
                next.get_mut(ticker)?.free_float_factor = *free_float_factor;
            }
            RegistryChange::SetShares {
                ticker,
                shares_outstanding,
            } => {
                if *shares_outstanding == 0 {
                    return Err(RegistryError::InvalidShares {
                        ticker: ticker.clone(),
                    });
                }
                next.get_mut(ticker)?.shares_outstanding = *shares_outstanding;
            }
        }
        Ok(next)
    }

    fn get_mut(&mut self, ticker: &str) -> Result<&mut Constituent, RegistryError> {
        self.constituents
            .iter_mut()
            .find(|c| c.ticker == ticker)
            .ok_or_else(|| RegistryError::UnknownTicker(ticker.to_string()))
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors raised by registry validation and changes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    /// Ticker is empty or whitespace.
    #[error("constituent ticker cannot be empty")]
    EmptyTicker,

    /// Shares outstanding must be positive.
    #[error("shares outstanding for {ticker} must be positive")]
    InvalidShares {
        /// Offending ticker.
        ticker: String,
    },

    /// Free-float factor outside `[0, 1]`.
    #[error("free-float factor {factor} for {ticker} is outside [0, 1]")]
    InvalidFreeFloat {
        /// Offending ticker.
        ticker: String,
        /// Rejected factor.
        factor: f64,
    },

    /// Ticker already present.
    #[error("duplicate constituent ticker: {0}")]
    DuplicateTicker(String),

    /// Ticker not present.
    #[error("unknown constituent ticker: {0}")]
    UnknownTicker(String),

    /// The change would remove the last constituent.
    #[error("change would leave the index without constituents")]
    WouldBeEmpty,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_registry() -> ConstituentRegistry {
        ConstituentRegistry::new(vec![
            Constituent::new("AAA", "Alpha", "Energy", 1_000_000, 0.5).unwrap(),
            Constituent::new("BBB", "Beta", "Banks", 5_000_000, 0.8).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_free_float_outside_unit_interval() {
        let err = Constituent::new("AAA", "Alpha", "Energy", 10, 1.2).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidFreeFloat { .. }));

        let err = Constituent::new("AAA", "Alpha", "Energy", 10, f64::NAN).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidFreeFloat { .. }));
    }

    #[test]
    fn rejects_zero_shares_and_empty_ticker() {
        assert!(matches!(
            Constituent::new("AAA", "Alpha", "Energy", 0, 0.5),
            Err(RegistryError::InvalidShares { .. })
        ));
        assert_eq!(
            Constituent::new("  ", "Alpha", "Energy", 1, 0.5),
            Err(RegistryError::EmptyTicker)
        );
    }

    #[test]
    fn rejects_duplicate_tickers() {
        let a = Constituent::new("AAA", "Alpha", "Energy", 10, 0.5).unwrap();
        let err = ConstituentRegistry::new(vec![a.clone(), a]).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateTicker("AAA".to_string()));
    }

    #[test]
    fn with_change_leaves_original_untouched() {
        let registry = sample_registry();
        let next = registry
            .with_change(&RegistryChange::Remove {
                ticker: "AAA".to_string(),
            })
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(next.tickers(), vec!["BBB".to_string()]);
    }

    #[test]
    fn set_free_float_validates_range() {
        let registry = sample_registry();
        let err = registry
            .with_change(&RegistryChange::SetFreeFloat {
                ticker: "AAA".to_string(),
                free_float_factor: -0.1,
            })
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidFreeFloat { .. }));

        let next = registry
            .with_change(&RegistryChange::SetFreeFloat {
                ticker: "AAA".to_string(),
                free_float_factor: 0.25,
            })
            .unwrap();
        assert!((next.get("AAA").unwrap().free_float_factor - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn removing_unknown_or_last_constituent_fails() {
        let registry = sample_registry();
        assert_eq!(
            registry.with_change(&RegistryChange::Remove {
                ticker: "ZZZ".to_string()
            }),
            Err(RegistryError::UnknownTicker("ZZZ".to_string()))
        );

        let single = registry
            .with_change(&RegistryChange::Remove {
                ticker: "AAA".to_string(),
            })
            .unwrap();
        assert_eq!(
            single.with_change(&RegistryChange::Remove {
                ticker: "BBB".to_string()
            }),
            Err(RegistryError::WouldBeEmpty)
        );
    }

    #[test]
    fn registry_change_deserializes_from_tagged_json() {
        let change: RegistryChange =
            serde_json::from_str(r#"{"action":"set_shares","ticker":"AAA","shares_outstanding":42}"#)
                .unwrap();
        assert_eq!(change.kind(), "set_shares");
        assert_eq!(change.ticker(), "AAA");
    }
}
