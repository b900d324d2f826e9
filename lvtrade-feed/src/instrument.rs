//! Instrument identity and per-instrument display configuration.

use derive_more::{Display, From};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Instrument (pair) identifier, eg/ "UZS-USD".
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Deserialize, Serialize,
)]
pub struct InstrumentId(pub SmolStr);

impl InstrumentId {
    /// Construct an [`InstrumentId`], normalising to the upper case form the feed server uses.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id.as_ref().trim().to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for InstrumentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Immutable display configuration of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct InstrumentConfig {
    /// Decimal places shown to the user.
    pub display_decimals: u32,
    /// Raw feed quotes this pair in the opposite convention, show `1/price`.
    pub invert_for_display: bool,
    /// Decimal places the raw feed uses.
    pub api_decimals: u32,
}

impl InstrumentConfig {
    pub const fn new(display_decimals: u32, invert_for_display: bool, api_decimals: u32) -> Self {
        Self {
            display_decimals,
            invert_for_display,
            api_decimals,
        }
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self::new(2, false, 2)
    }
}

/// Lookup of [`InstrumentConfig`] by [`InstrumentId`].
///
/// Unknown instruments resolve to [`InstrumentConfig::default`].
#[derive(Debug, Clone)]
pub struct InstrumentRegistry {
    configs: FnvHashMap<InstrumentId, InstrumentConfig>,
    fallback: InstrumentConfig,
}

impl InstrumentRegistry {
    /// Construct an empty registry where every lookup yields `fallback`.
    pub fn empty(fallback: InstrumentConfig) -> Self {
        Self {
            configs: FnvHashMap::default(),
            fallback,
        }
    }

    pub fn with(mut self, instrument: impl Into<InstrumentId>, config: InstrumentConfig) -> Self {
        self.insert(instrument, config);
        self
    }

    pub fn insert(&mut self, instrument: impl Into<InstrumentId>, config: InstrumentConfig) {
        self.configs.insert(instrument.into(), config);
    }

    pub fn get(&self, instrument: &InstrumentId) -> InstrumentConfig {
        self.configs
            .get(instrument)
            .copied()
            .unwrap_or(self.fallback)
    }

    pub fn contains(&self, instrument: &InstrumentId) -> bool {
        self.configs.contains_key(instrument)
    }
}

impl Default for InstrumentRegistry {
    /// Pairs offered by the LvTrade product.
    fn default() -> Self {
        Self::empty(InstrumentConfig::default())
            .with("UZS-USD", InstrumentConfig::new(2, true, 11))
            .with("XAUUSD", InstrumentConfig::new(2, false, 2))
            .with("BTCUSD", InstrumentConfig::new(2, false, 2))
            .with("EURUSD", InstrumentConfig::new(5, false, 5))
    }
}

/// Sanitise a spread multiplier sourced from the selected account's plan.
///
/// Non-finite or non-positive values fall back to `1.0` (no markup).
pub fn sanitize_spread_multiplier(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_id_normalises() {
        assert_eq!(InstrumentId::new(" uzs-usd ").as_str(), "UZS-USD");
        assert_eq!(InstrumentId::from("eurusd"), InstrumentId::new("EURUSD"));
    }

    #[test]
    fn test_registry_defaults() {
        let registry = InstrumentRegistry::default();

        let uzs = registry.get(&InstrumentId::new("UZS-USD"));
        assert!(uzs.invert_for_display);
        assert_eq!(uzs.display_decimals, 2);
        assert_eq!(uzs.api_decimals, 11);

        assert_eq!(registry.get(&InstrumentId::new("EURUSD")).display_decimals, 5);

        let unknown = InstrumentId::new("DOGEUSD");
        assert!(!registry.contains(&unknown));
        assert_eq!(registry.get(&unknown), InstrumentConfig::default());
    }

    #[test]
    fn test_sanitize_spread_multiplier() {
        struct TestCase {
            input: f64,
            expected: f64,
        }

        let tests = vec![
            // TC0: valid multiplier passes through
            TestCase { input: 2.5, expected: 2.5 },
            // TC1: zero falls back
            TestCase { input: 0.0, expected: 1.0 },
            // TC2: negative falls back
            TestCase { input: -3.0, expected: 1.0 },
            // TC3: NaN falls back
            TestCase { input: f64::NAN, expected: 1.0 },
            // TC4: infinity falls back
            TestCase { input: f64::INFINITY, expected: 1.0 },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = sanitize_spread_multiplier(test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
