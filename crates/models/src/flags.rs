//! Lenient decoding for form-ish values.
//!
//! HTML checkboxes post `"on"`, some clients send `"yes"` or `true`; stored
//! data written by older versions may contain any of these.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};

/// Truthy encodings: `true`, `"on"`, `"yes"`, `"true"`, `"1"`, `1`.
pub fn is_truthy_str(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "on" | "yes" | "true" | "1")
}

struct TruthyVisitor;

impl<'de> Visitor<'de> for TruthyVisitor {
    type Value = bool;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a boolean, a checkbox string, a number or null")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> { Ok(v) }
    fn visit_i64<E: de::Error>(self, v: i64) -> Result<bool, E> { Ok(v == 1) }
    fn visit_u64<E: de::Error>(self, v: u64) -> Result<bool, E> { Ok(v == 1) }
    fn visit_f64<E: de::Error>(self, v: f64) -> Result<bool, E> { Ok(v == 1.0) }
    fn visit_str<E: de::Error>(self, v: &str) -> Result<bool, E> { Ok(is_truthy_str(v)) }
    fn visit_unit<E: de::Error>(self) -> Result<bool, E> { Ok(false) }
    fn visit_none<E: de::Error>(self) -> Result<bool, E> { Ok(false) }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<bool, D::Error> {
        d.deserialize_any(TruthyVisitor)
    }
}

pub fn deserialize_truthy<'de, D>(d: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    d.deserialize_any(TruthyVisitor)
}

/// Format an amount the way it is stored: two fraction digits.
pub fn format_amount(amount: f64) -> String {
    format!("{:.2}", amount)
}

/// Parse a user/stored amount; accepts `"25"`, `"25.5"`, `"$25.00"`.
pub fn parse_amount(s: &str) -> Option<f64> {
    let cleaned = s.trim().trim_start_matches('$').replace(',', "");
    let v = cleaned.parse::<f64>().ok()?;
    if v.is_finite() && v >= 0.0 { Some(v) } else { None }
}

struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
    type Value = String;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a decimal amount as string or number")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> { self.visit_f64(v as f64) }
    fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> { self.visit_f64(v as f64) }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
        if v.is_finite() && v >= 0.0 {
            Ok(format_amount(v))
        } else {
            Err(E::custom(format!("invalid amount {v}")))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
        if v.trim().is_empty() {
            return Ok(format_amount(0.0));
        }
        parse_amount(v)
            .map(format_amount)
            .ok_or_else(|| E::custom(format!("invalid amount {v:?}")))
    }

    fn visit_unit<E: de::Error>(self) -> Result<String, E> { Ok(format_amount(0.0)) }
    fn visit_none<E: de::Error>(self) -> Result<String, E> { Ok(format_amount(0.0)) }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<String, D::Error> {
        d.deserialize_any(AmountVisitor)
    }
}

pub fn deserialize_amount<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    d.deserialize_any(AmountVisitor)
}
