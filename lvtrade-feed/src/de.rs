//! Lenient deserialisers for feed payloads.
//!
//! The feed mixes JSON numbers and numeric strings for the same fields. These helpers
//! accept either, and degrade unusable values to a sentinel rather than failing the whole
//! message.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::str::FromStr;

/// Deserialize a number or string as a `String`. `null` becomes an empty string.
pub fn de_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(string) => string,
        Value::Number(number) => number.to_string(),
        _ => String::new(),
    })
}

/// As [`de_string_or_number`], with `null` mapped to `None`.
pub fn de_opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(string)) => Some(string),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

/// Deserialize a number or numeric string as `f64`. Anything else yields `NaN`.
pub fn de_lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_as_f64(&value).unwrap_or(f64::NAN))
}

/// Deserialize a number or numeric string as `i64` (fractions truncated). Anything else
/// yields `0`.
pub fn de_lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let parsed = match &value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|float| float.is_finite()).map(|float| float as i64)),
        Value::String(string) => string.trim().parse::<i64>().ok(),
        _ => None,
    };
    Ok(parsed.unwrap_or_default())
}

/// Deserialize a number or decimal string as [`Decimal`]. Unparseable input yields zero.
pub fn de_lenient_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let parsed = match &value {
        Value::String(string) => Decimal::from_str(string.trim()).ok(),
        Value::Number(number) => Decimal::from_str(&number.to_string()).ok(),
        _ => None,
    };
    Ok(parsed.unwrap_or_default())
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(string) => string.trim().parse::<f64>().ok(),
        _ => None,
    }
}
