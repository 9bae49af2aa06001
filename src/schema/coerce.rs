//! Primitive coercions shared by payload validation and query casting.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Number, Value};

/// Largest integer a double can hold exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Parses a date from a string (RFC 3339, naive date-time or plain date) or a
/// number of milliseconds since the Unix epoch.
pub fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_date_str(s.trim()),
        Value::Number(n) => {
            let millis = n.as_f64()?;
            if !millis.is_finite() {
                return None;
            }
            Utc.timestamp_millis_opt(millis as i64).single()
        }
        _ => None,
    }
}

fn parse_date_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Canonical wire form of a date: RFC 3339 in UTC with millisecond precision.
pub fn format_date(date: &DateTime<Utc>) -> Value {
    Value::String(date.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Parses and normalises a date value.
pub fn normalize_date(value: &Value) -> Option<Value> {
    parse_date(value).map(|d| format_date(&d))
}

/// Coerces a query operand to a number; `None` when it is not numeric.
pub fn coerce_number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            let parsed: f64 = trimmed.parse().ok()?;
            number_value(parsed)
        }
        _ => None,
    }
}

/// Integral doubles become integer JSON numbers so they compare equal to
/// stored integers.
fn number_value(n: f64) -> Option<Value> {
    if !n.is_finite() {
        return None;
    }
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return Some(Value::Number(Number::from(n as i64)));
    }
    Number::from_f64(n).map(Value::Number)
}

/// `'1'`, `'true'` and `true` are truthy; everything else is `false`.
pub fn coerce_boolean(value: &Value) -> Value {
    let truthy = match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "1" || s == "true",
        _ => false,
    };
    Value::Bool(truthy)
}
