//! Per-column coercion from source values to typed SQL values.
//!
//! Source values arrive as relaxed MongoDB extended JSON, so wrappers such as
//! `{"$oid": ...}`, `{"$date": ...}` and `{"$numberLong": ...}` are understood
//! alongside plain JSON. Nothing is truncated or guessed: a value that does
//! not fit its column type is an error carrying a human-readable detail.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::models::SqlValue;
use crate::rules::ColumnType;

/// Coerce a non-null source value to `column_type`.
pub fn coerce(value: &Value, column_type: ColumnType) -> Result<SqlValue, String> {
    match column_type {
        ColumnType::String => to_text(value).map(SqlValue::Text),
        ColumnType::Integer => to_integer(value).map(SqlValue::Integer),
        ColumnType::Float => to_float(value).map(SqlValue::Float),
        ColumnType::Boolean => to_boolean(value).map(SqlValue::Boolean),
        ColumnType::Timestamp => to_timestamp(value).map(SqlValue::Timestamp),
        ColumnType::Json => serde_json::to_string(value)
            .map(SqlValue::Json)
            .map_err(|e| e.to_string()),
    }
}

/// Normalize a source identifier (`_id` or a foreign-key value) to the string
/// used as the translation-table key.
pub fn normalize_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        Value::Object(_) => ["$oid", "$numberLong", "$numberInt", "$uuid"]
            .iter()
            .find_map(|key| wrapped_str(value, key))
            .map(str::to_string),
        _ => None,
    }
}

fn to_text(value: &Value) -> Result<String, String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Object(_) => match wrapped_str(value, "$oid") {
            Some(oid) => oid.to_string(),
            None => return Err(unexpected("string", value)),
        },
        _ => return Err(unexpected("string", value)),
    };
    if text.contains('\0') {
        return Err("text contains a NUL byte".to_string());
    }
    Ok(text)
}

fn to_integer(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else if n.is_u64() {
                Err(format!("{} is out of range for a 64-bit integer", n))
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                float_to_integer(f)
            }
        }
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|_| format!("not an integer: {}", value)),
        Value::Object(_) => match wrapped_str(value, "$numberLong").or_else(|| wrapped_str(value, "$numberInt")) {
            Some(s) => s
                .parse::<i64>()
                .map_err(|_| format!("not an integer: {}", value)),
            None => Err(unexpected("integer", value)),
        },
        _ => Err(unexpected("integer", value)),
    }
}

fn float_to_integer(f: f64) -> Result<i64, String> {
    if f.fract() != 0.0 || !f.is_finite() {
        return Err(format!("{} would be truncated", f));
    }
    if f < i64::MIN as f64 || f >= i64::MAX as f64 {
        return Err(format!("{} is out of range for a 64-bit integer", f));
    }
    Ok(f as i64)
}

fn to_float(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                let f = i as f64;
                if f as i128 != i as i128 {
                    return Err(lossy(&n.to_string()));
                }
                Ok(f)
            } else if let Some(u) = n.as_u64() {
                let f = u as f64;
                if f as u128 != u as u128 {
                    return Err(lossy(&n.to_string()));
                }
                Ok(f)
            } else {
                n.as_f64().ok_or_else(|| unexpected("float", value))
            }
        }
        Value::String(s) => parse_exact_float(s, value),
        Value::Object(_) => match ["$numberDouble", "$numberLong", "$numberInt", "$numberDecimal"]
            .iter()
            .find_map(|key| wrapped_str(value, key))
        {
            Some(s) => parse_exact_float(s, value),
            None => Err(unexpected("float", value)),
        },
        _ => Err(unexpected("float", value)),
    }
}

/// Parse a decimal string, refusing any value a double cannot hold exactly.
fn parse_exact_float(s: &str, value: &Value) -> Result<f64, String> {
    let f = s
        .parse::<f64>()
        .map_err(|_| format!("not a number: {}", value))?;
    if !f.is_finite() {
        return Err(format!("{} is not a finite number", f));
    }
    let written = canonical_decimal(s).ok_or_else(|| format!("not a number: {}", value))?;
    if canonical_decimal(&format!("{:e}", f)) != Some(written) {
        return Err(lossy(s));
    }
    Ok(f)
}

fn lossy(repr: &str) -> String {
    format!("{} cannot be stored as a float without losing precision", repr)
}

/// Sign, significant digits and exponent of a decimal literal, so that
/// `1.50`, `15e-1` and `1.5` compare equal.
fn canonical_decimal(s: &str) -> Option<(bool, String, i64)> {
    let (negative, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (mantissa, exponent) = match rest.find(|c: char| c == 'e' || c == 'E') {
        Some(i) => (&rest[..i], rest[i + 1..].parse::<i64>().ok()?),
        None => (rest, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let digits = format!("{}{}", int_part, frac_part);
    let leading = digits.len() - digits.trim_start_matches('0').len();
    let significant = digits.trim_matches('0');
    if significant.is_empty() {
        return Some((false, String::new(), 0));
    }
    Some((
        negative,
        significant.to_string(),
        int_part.len() as i64 + exponent - leading as i64,
    ))
}

fn to_boolean(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(format!("{} is not 0 or 1", n)),
        },
        Value::String(s) => match s.as_str() {
            "1" => Ok(true),
            "0" => Ok(false),
            s if s.eq_ignore_ascii_case("true") => Ok(true),
            s if s.eq_ignore_ascii_case("false") => Ok(false),
            _ => Err(format!("not a boolean: {}", value)),
        },
        _ => Err(unexpected("boolean", value)),
    }
}

fn to_timestamp(value: &Value) -> Result<DateTime<Utc>, String> {
    match value {
        Value::String(s) => parse_datetime(s).ok_or_else(|| format!("not a timestamp: {}", value)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or_else(|| format!("{} is not a unix timestamp in seconds", n)),
        Value::Object(map) => match map.get("$date") {
            Some(Value::String(s)) => {
                parse_datetime(s).ok_or_else(|| format!("not a timestamp: {}", value))
            }
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(DateTime::from_timestamp_millis)
                .ok_or_else(|| format!("not a timestamp: {}", value)),
            Some(inner @ Value::Object(_)) => wrapped_str(inner, "$numberLong")
                .and_then(|ms| ms.parse::<i64>().ok())
                .and_then(DateTime::from_timestamp_millis)
                .ok_or_else(|| format!("not a timestamp: {}", value)),
            _ => Err(unexpected("timestamp", value)),
        },
        _ => Err(unexpected("timestamp", value)),
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// The string inside a single-key extended JSON wrapper like `{"$oid": "..."}`.
fn wrapped_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    match value {
        Value::Object(map) if map.len() == 1 => map.get(key).and_then(Value::as_str),
        _ => None,
    }
}

fn unexpected(expected: &str, value: &Value) -> String {
    let found = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    format!("expected {}, found {}", expected, found)
}
