//! Field coercion helpers shared by the per-feed parsers.
//!
//! Upstream payloads are loosely typed: the same field can arrive under
//! several names, numbers arrive as strings, timestamps as ISO strings or
//! epoch milliseconds. [`Fields`] resolves aliases (first non-null wins) and
//! coerces values into the types the events need.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use super::NormalizeError;

/// A raw JSON object payload.
pub type Payload = Map<String, Value>;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Alias-aware accessor over a payload.
#[derive(Debug, Clone, Copy)]
pub struct Fields<'a> {
    payload: &'a Payload,
}

impl<'a> Fields<'a> {
    /// Wrap a payload.
    #[must_use]
    pub const fn new(payload: &'a Payload) -> Self {
        Self { payload }
    }

    /// First non-null value among `aliases`.
    #[must_use]
    pub fn lookup(&self, aliases: &[&str]) -> Option<&'a Value> {
        aliases
            .iter()
            .filter_map(|key| self.payload.get(*key))
            .find(|value| !value.is_null())
    }

    /// Trimmed text; numbers and booleans are stringified, blanks are absent.
    pub fn text(&self, field: &'static str, aliases: &[&str]) -> Result<Option<String>, NormalizeError> {
        self.lookup(aliases)
            .map(|value| scalar_text(field, value))
            .transpose()
            .map(Option::flatten)
    }

    /// Upper-cased ticker symbol.
    pub fn ticker(&self, field: &'static str, aliases: &[&str]) -> Result<Option<String>, NormalizeError> {
        Ok(self.text(field, aliases)?.map(|t| t.to_uppercase()))
    }

    /// Timezone-aware timestamp.
    pub fn timestamp(
        &self,
        field: &'static str,
        aliases: &[&str],
    ) -> Result<Option<DateTime<Utc>>, NormalizeError> {
        self.lookup(aliases)
            .map(|value| parse_timestamp(value).map_err(|reason| invalid(field, reason)))
            .transpose()
    }

    /// Calendar date; full timestamps are reduced to their UTC date.
    pub fn date(&self, field: &'static str, aliases: &[&str]) -> Result<Option<NaiveDate>, NormalizeError> {
        Ok(self.timestamp(field, aliases)?.map(|ts| ts.date_naive()))
    }

    /// Exact decimal.
    pub fn decimal(&self, field: &'static str, aliases: &[&str]) -> Result<Option<Decimal>, NormalizeError> {
        self.lookup(aliases)
            .map(|value| parse_decimal(value).map_err(|reason| invalid(field, reason)))
            .transpose()
    }

    /// Floating point number.
    pub fn float(&self, field: &'static str, aliases: &[&str]) -> Result<Option<f64>, NormalizeError> {
        self.lookup(aliases)
            .map(|value| match value {
                Value::Number(n) => n.as_f64().ok_or_else(|| invalid(field, "not representable as f64")),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| invalid(field, e.to_string())),
                other => Err(invalid(field, format!("expected number, got {other}"))),
            })
            .transpose()
    }

    /// Integer; integral floats and numeric strings are accepted.
    pub fn integer(&self, field: &'static str, aliases: &[&str]) -> Result<Option<i64>, NormalizeError> {
        self.lookup(aliases)
            .map(|value| parse_integer(value).map_err(|reason| invalid(field, reason)))
            .transpose()
    }

    /// Boolean; `0`/`1` and common string spellings are accepted.
    pub fn boolean(&self, field: &'static str, aliases: &[&str]) -> Result<Option<bool>, NormalizeError> {
        self.lookup(aliases)
            .map(|value| parse_bool(value).ok_or_else(|| invalid(field, format!("expected boolean, got {value}"))))
            .transpose()
    }

    /// List of strings; a scalar becomes a one-element list.
    pub fn list(&self, field: &'static str, aliases: &[&str]) -> Result<Vec<String>, NormalizeError> {
        let Some(value) = self.lookup(aliases) else {
            return Ok(Vec::new());
        };
        match value {
            Value::Array(items) => items
                .iter()
                .filter(|item| !item.is_null())
                .filter_map(|item| scalar_text(field, item).transpose())
                .collect(),
            scalar => Ok(scalar_text(field, scalar)?.into_iter().collect()),
        }
    }
}

/// Unwrap a required value.
pub fn required<T>(field: &'static str, value: Option<T>) -> Result<T, NormalizeError> {
    value.ok_or(NormalizeError::MissingField(field))
}

fn invalid(field: &'static str, reason: impl Into<String>) -> NormalizeError {
    NormalizeError::InvalidField {
        field,
        reason: reason.into(),
    }
}

fn scalar_text(field: &'static str, value: &Value) -> Result<Option<String>, NormalizeError> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => return Ok(None),
        other => return Err(invalid(field, format!("expected scalar, got {other}"))),
    };
    Ok((!text.is_empty()).then_some(text))
}

/// Parse ISO-8601 text, a bare date or epoch milliseconds.
///
/// Naive date-times carry no offset upstream and are taken as UTC.
pub fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, String> {
    match value {
        Value::Number(n) => {
            let millis = n
                .as_i64()
                .or_else(|| n.as_f64().map(round_to_i64))
                .ok_or_else(|| format!("epoch value {n} out of range"))?;
            from_millis(millis)
        }
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                let millis = s.parse::<i64>().map_err(|e| e.to_string())?;
                return from_millis(millis);
            }
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Ok(ts.with_timezone(&Utc));
            }
            for format in NAIVE_FORMATS {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return Ok(naive.and_utc());
                }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
                .ok_or_else(|| format!("unrecognised timestamp {s:?}"))
        }
        other => Err(format!("expected timestamp, got {other}")),
    }
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, String> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| format!("epoch millis {millis} out of range"))
}

#[allow(clippy::cast_possible_truncation)]
fn round_to_i64(value: f64) -> i64 {
    value.round() as i64
}

fn parse_decimal(value: &Value) -> Result<Decimal, String> {
    let text = match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(Decimal::from(i));
            }
            n.to_string()
        }
        Value::String(s) => s.trim().to_string(),
        other => return Err(format!("expected decimal, got {other}")),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| format!("{text:?}: {e}"))
}

fn parse_integer(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(round_to_i64))
            .ok_or_else(|| format!("expected integer, got {n}")),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().or_else(|_| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0)
                    .map(round_to_i64)
                    .ok_or_else(|| format!("expected integer, got {s:?}"))
            })
        }
        other => Err(format!("expected integer, got {other}")),
    }
}

fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Some(true),
            "false" | "f" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
