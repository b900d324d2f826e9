//! Raw feed values to display values.
//!
//! Pure functions, no state. Applies the account spread multiplier around the mid price,
//! display inversion for pairs quoted in the opposite convention, and rounding to the
//! instrument's display precision. Nothing here fails - unusable input degrades to the
//! raw source string or [`PLACEHOLDER`].

use crate::{history::Bar, instrument::InstrumentConfig, instrument::sanitize_spread_multiplier};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Shown when a field has no usable value at all.
pub const PLACEHOLDER: &str = "—";

/// Quote as received from the feed, prices still raw decimal strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RawQuote {
    pub bid: String,
    pub ask: String,
    pub last: Option<String>,
    pub timestamp: i64,
}

/// Display ready quote. Replaced wholesale on every update.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Quote {
    pub bid: String,
    pub ask: String,
    pub last: String,
    pub spread: String,
    pub timestamp: i64,
}

/// Normalise a [`RawQuote`] for display.
///
/// Inversion reverses the ordering of positive prices, so the raw ask becomes the displayed
/// bid (`1/ask`) and the raw bid becomes the displayed ask (`1/bid`). `last` has no
/// counterpart and is inverted in place.
pub fn normalize_quote(raw: &RawQuote, config: &InstrumentConfig, spread_multiplier: f64) -> Quote {
    let decimals = config.display_decimals as usize;
    let last = normalize_last(raw.last.as_deref(), config);

    let degraded = |last: String| Quote {
        bid: fallback(&raw.bid),
        ask: fallback(&raw.ask),
        last,
        spread: PLACEHOLDER.to_string(),
        timestamp: raw.timestamp,
    };

    let (Some(raw_bid), Some(raw_ask)) = (parse_price(&raw.bid), parse_price(&raw.ask)) else {
        return degraded(last);
    };

    // A wide multiplier can push the bid to or below zero
    let (bid, ask) = apply_spread_multiplier(raw_bid, raw_ask, spread_multiplier);
    if !(is_price(bid) && is_price(ask)) {
        debug!(bid, ask, spread_multiplier, "widened quote out of range");
        return degraded(last);
    }

    let (bid, ask) = if config.invert_for_display {
        (1.0 / ask, 1.0 / bid)
    } else {
        (bid, ask)
    };

    let spread = (ask - bid).abs();

    Quote {
        bid: format_fixed(bid, decimals),
        ask: format_fixed(ask, decimals),
        last,
        spread: format_fixed(spread, spread_decimals(spread, config.display_decimals)),
        timestamp: raw.timestamp,
    }
}

/// Widen the bid/ask gap symmetrically around the mid price.
///
/// A crossed book (`ask < bid`) has its gap treated as zero, collapsing both sides to mid.
pub fn apply_spread_multiplier(bid: f64, ask: f64, multiplier: f64) -> (f64, f64) {
    let multiplier = sanitize_spread_multiplier(multiplier);
    let mid = (bid + ask) / 2.0;
    let half_spread = (ask - bid).max(0.0) * multiplier / 2.0;
    (mid - half_spread, mid + half_spread)
}

/// Decimal places used to show a spread of `spread` (display space).
///
/// Narrow spreads get extra precision so sub-pip moves on low priced pairs stay visible.
pub fn spread_decimals(spread: f64, display_decimals: u32) -> usize {
    let decimals = if spread < 0.01 {
        (display_decimals + 4).max(6)
    } else if spread < 1.0 {
        (display_decimals + 2).max(4)
    } else {
        display_decimals.max(2)
    };
    decimals as usize
}

/// Convert a raw candle to display space.
///
/// Returns `None` if any price is non-finite or non-positive.
pub fn normalize_bar(raw: &Bar, config: &InstrumentConfig) -> Option<Bar> {
    let prices = [raw.open, raw.high, raw.low, raw.close];
    if !prices.iter().all(|price| price.is_finite() && *price > 0.0) {
        return None;
    }

    let bar = if config.invert_for_display {
        Bar {
            time: raw.time,
            open: 1.0 / raw.open,
            high: 1.0 / raw.low,
            low: 1.0 / raw.high,
            close: 1.0 / raw.close,
        }
    } else {
        *raw
    };

    let decimals = config.display_decimals as i32;
    Some(Bar {
        time: bar.time,
        open: round_to(bar.open, decimals),
        high: round_to(bar.high, decimals),
        low: round_to(bar.low, decimals),
        close: round_to(bar.close, decimals),
    })
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    let rounded = (value * factor).round() / factor;
    if rounded.is_finite() { rounded } else { value }
}

fn normalize_last(raw: Option<&str>, config: &InstrumentConfig) -> String {
    let Some(raw) = raw else {
        return PLACEHOLDER.to_string();
    };

    match parse_price(raw) {
        Some(last) if config.invert_for_display => {
            format_fixed(1.0 / last, config.display_decimals as usize)
        }
        Some(last) => format_fixed(last, config.display_decimals as usize),
        None => fallback(raw),
    }
}

/// Parse a finite, strictly positive price.
fn parse_price(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|price| is_price(*price))
}

fn is_price(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn fallback(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        PLACEHOLDER.to_string()
    } else {
        raw.to_string()
    }
}

fn format_fixed(value: f64, decimals: usize) -> String {
    format!("{:.*}", decimals, round_to(value, decimals as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(bid: &str, ask: &str, last: Option<&str>) -> RawQuote {
        RawQuote {
            bid: bid.to_string(),
            ask: ask.to_string(),
            last: last.map(str::to_string),
            timestamp: 1_700_000_000,
        }
    }

    fn parse(value: &str) -> f64 {
        value.parse().unwrap()
    }

    #[test]
    fn test_inverted_pair_end_to_end() {
        let config = InstrumentConfig::new(2, true, 11);

        let quote = normalize_quote(&raw("0.000076", "0.000077", None), &config, 1.0);

        assert_eq!(quote.bid, "12987.01");
        assert_eq!(quote.ask, "13157.89");
        assert_eq!(quote.last, PLACEHOLDER);
        assert_eq!(quote.spread, "170.88");
        assert_eq!(quote.timestamp, 1_700_000_000);
    }

    #[test]
    fn test_inversion_round_trips_raw_prices() {
        let config = InstrumentConfig::new(2, true, 11);

        let quote = normalize_quote(&raw("0.000076", "0.000077", Some("0.0000765")), &config, 1.0);

        // Ignoring the swap, re-inverting recovers the raw side within rounding tolerance
        let raw_bid = 1.0 / parse(&quote.ask);
        let raw_ask = 1.0 / parse(&quote.bid);
        assert!((raw_bid - 0.000076).abs() < 1e-10);
        assert!((raw_ask - 0.000077).abs() < 1e-10);
        assert!((1.0 / parse(&quote.last) - 0.0000765).abs() < 1e-10);
    }

    #[test]
    fn test_spread_scales_with_multiplier() {
        let config = InstrumentConfig::new(5, false, 5);

        let base = normalize_quote(&raw("1.08500", "1.08520", None), &config, 1.0);
        let doubled = normalize_quote(&raw("1.08500", "1.08520", None), &config, 2.0);

        let base_gap = parse(&base.ask) - parse(&base.bid);
        let doubled_gap = parse(&doubled.ask) - parse(&doubled.bid);
        assert!((doubled_gap - 2.0 * base_gap).abs() < 2e-5);

        // Mid price held fixed
        let base_mid = (parse(&base.ask) + parse(&base.bid)) / 2.0;
        let doubled_mid = (parse(&doubled.ask) + parse(&doubled.bid)) / 2.0;
        assert!((base_mid - doubled_mid).abs() < 1e-5);

        assert_eq!(doubled.bid, "1.08490");
        assert_eq!(doubled.ask, "1.08530");
    }

    #[test]
    fn test_apply_spread_multiplier() {
        struct TestCase {
            bid: f64,
            ask: f64,
            multiplier: f64,
            expected: (f64, f64),
        }

        let tests = vec![
            // TC0: identity multiplier
            TestCase { bid: 100.0, ask: 102.0, multiplier: 1.0, expected: (100.0, 102.0) },
            // TC1: triple the gap around mid 101
            TestCase { bid: 100.0, ask: 102.0, multiplier: 3.0, expected: (98.0, 104.0) },
            // TC2: invalid multiplier defaults to 1
            TestCase { bid: 100.0, ask: 102.0, multiplier: f64::NAN, expected: (100.0, 102.0) },
            // TC3: crossed book collapses to mid
            TestCase { bid: 102.0, ask: 100.0, multiplier: 2.0, expected: (101.0, 101.0) },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = apply_spread_multiplier(test.bid, test.ask, test.multiplier);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_spread_decimals() {
        struct TestCase {
            spread: f64,
            display_decimals: u32,
            expected: usize,
        }

        let tests = vec![
            // TC0: sub 0.01 spread, min 6
            TestCase { spread: 0.0002, display_decimals: 0, expected: 6 },
            // TC1: sub 0.01 spread, decimals + 4
            TestCase { spread: 0.0002, display_decimals: 5, expected: 9 },
            // TC2: sub 1 spread, min 4
            TestCase { spread: 0.35, display_decimals: 2, expected: 4 },
            // TC3: sub 1 spread, decimals + 2
            TestCase { spread: 0.35, display_decimals: 5, expected: 7 },
            // TC4: wide spread, min 2
            TestCase { spread: 25.0, display_decimals: 0, expected: 2 },
            // TC5: wide spread uses display decimals
            TestCase { spread: 25.0, display_decimals: 3, expected: 3 },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = spread_decimals(test.spread, test.display_decimals);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_degraded_quotes_fall_back() {
        struct TestCase {
            input: RawQuote,
            config: InstrumentConfig,
            multiplier: f64,
            expected: Quote,
        }

        let plain = InstrumentConfig::new(2, false, 2);
        let inverted = InstrumentConfig::new(2, true, 2);

        let tests = vec![
            TestCase {
                // TC0: unparseable bid keeps raw strings, no spread
                input: raw("n/a", "2710.35", Some("2710.10")),
                config: plain,
                multiplier: 1.0,
                expected: Quote {
                    bid: "n/a".to_string(),
                    ask: "2710.35".to_string(),
                    last: "2710.10".to_string(),
                    spread: PLACEHOLDER.to_string(),
                    timestamp: 1_700_000_000,
                },
            },
            TestCase {
                // TC1: zero ask and empty bid
                input: raw("", "0", Some("-1")),
                config: plain,
                multiplier: 1.0,
                expected: Quote {
                    bid: PLACEHOLDER.to_string(),
                    ask: "0".to_string(),
                    last: "-1".to_string(),
                    spread: PLACEHOLDER.to_string(),
                    timestamp: 1_700_000_000,
                },
            },
            TestCase {
                // TC2: valid quote rounds to display decimals
                input: raw("2710.004", "2710.356", Some("2710.2")),
                config: plain,
                multiplier: 1.0,
                expected: Quote {
                    bid: "2710.00".to_string(),
                    ask: "2710.36".to_string(),
                    last: "2710.20".to_string(),
                    spread: "0.3520".to_string(),
                    timestamp: 1_700_000_000,
                },
            },
            TestCase {
                // TC3: multiplier widens the bid below zero
                input: raw("1", "3", Some("2")),
                config: plain,
                multiplier: 3.0,
                expected: Quote {
                    bid: "1".to_string(),
                    ask: "3".to_string(),
                    last: "2.00".to_string(),
                    spread: PLACEHOLDER.to_string(),
                    timestamp: 1_700_000_000,
                },
            },
            TestCase {
                // TC4: widened bid of exactly zero on an inverted pair
                input: raw("1", "3", Some("2")),
                config: inverted,
                multiplier: 2.0,
                expected: Quote {
                    bid: "1".to_string(),
                    ask: "3".to_string(),
                    last: "0.50".to_string(),
                    spread: PLACEHOLDER.to_string(),
                    timestamp: 1_700_000_000,
                },
            },
            TestCase {
                // TC5: negative widened bid on an inverted pair
                input: raw("1", "3", None),
                config: inverted,
                multiplier: 3.0,
                expected: Quote {
                    bid: "1".to_string(),
                    ask: "3".to_string(),
                    last: PLACEHOLDER.to_string(),
                    spread: PLACEHOLDER.to_string(),
                    timestamp: 1_700_000_000,
                },
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = normalize_quote(&test.input, &test.config, test.multiplier);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_normalize_bar() {
        let inverted = InstrumentConfig::new(2, true, 11);
        let raw_bar = Bar {
            time: 60,
            open: 0.000077,
            high: 0.000078,
            low: 0.000076,
            close: 0.0000765,
        };

        let bar = normalize_bar(&raw_bar, &inverted).unwrap();
        assert_eq!(bar.open, 12987.01);
        assert_eq!(bar.high, 13157.89);
        assert_eq!(bar.low, 12820.51);
        assert_eq!(bar.close, 13071.9);
        assert!(bar.is_valid());

        let plain = InstrumentConfig::new(2, false, 2);
        assert_eq!(
            normalize_bar(&Bar::flat(60, 2710.129), &plain),
            Some(Bar::flat(60, 2710.13))
        );
        assert_eq!(normalize_bar(&Bar::flat(60, 0.0), &plain), None);
        assert_eq!(normalize_bar(&Bar::flat(60, f64::INFINITY), &plain), None);
    }
}
