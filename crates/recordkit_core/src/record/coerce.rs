//! Per-type value coercion.
//!
//! # Responsibility
//! - `to_stored`: caller input -> canonical stored representation (on set).
//! - `to_typed`: stored representation -> typed accessor value (on get).
//! - `to_projection`: stored representation -> value written to storage.
//!
//! # Invariants
//! - `to_stored` never yields a shape storage would reject.
//! - Unparseable date/timestamp input yields `Null`.

use crate::config::Charset;
use crate::db::{StoredValue, CURRENT_TIMESTAMP};
use crate::model::{FieldDescriptor, FieldType, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const ZERO_DATE: &str = "0000-00-00";
const ZERO_TIMESTAMP: &str = "0000-00-00 00:00:00";

static MONTH_FIRST_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{2})\D?(\d{2})\D?(\d{4})").expect("valid regex"));
static YEAR_FIRST_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})\D?(\d{2})\D?(\d{2})").expect("valid regex"));
static LOOSE_DATE_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})\D?(\d{2})\D?(\d{2})[T\s]?(\d{2})\D?(\d{2})\D?(\d{2})")
        .expect("valid regex")
});
static NON_DECIMAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^-\d.]").expect("valid regex"));
static NON_INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^-\d]").expect("valid regex"));

/// Free-text date/time layouts tried after the structured patterns.
const FREE_TEXT_DATE_TIMES: &[&str] = &[
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%d %B %Y %H:%M",
    "%B %d, %Y %H:%M",
];
const FREE_TEXT_DATES: &[&str] = &[
    "%B %d, %Y",
    "%B %d %Y",
    "%b %d, %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%Y/%m/%d",
    "%d.%m.%Y",
];

/// Result of coercing caller input for one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Coerced {
    pub stored: StoredValue,
    /// Typed value to seed the conversion cache with.
    pub converted: Option<Value>,
    /// The write counts as a mutation even if `stored` is unchanged.
    pub force_dirty: bool,
}

impl Coerced {
    fn stored(stored: StoredValue) -> Self {
        Self {
            stored,
            converted: None,
            force_dirty: false,
        }
    }
}

/// Input -> stored conversion applied by `Record::set`.
pub fn to_stored(field: &FieldDescriptor, input: Value, charset: Charset) -> Coerced {
    match field.kind {
        FieldType::String | FieldType::Clob => Coerced::stored(string_value(field, input, charset)),
        FieldType::Boolean => {
            Coerced::stored(StoredValue::Integer(i64::from(truthy(&input))))
        }
        FieldType::Decimal => Coerced::stored(decimal_value(field, &input)),
        FieldType::Integer | FieldType::UnsignedInteger => {
            Coerced::stored(integer_value(field, &input))
        }
        FieldType::Date => Coerced::stored(date_value(&input)),
        FieldType::Timestamp => Coerced::stored(timestamp_value(&input)),
        FieldType::Serialized if input.is_null() => Coerced::stored(StoredValue::Null),
        FieldType::Serialized => {
            let data = input.to_json();
            let encoded = StoredValue::Text(data.to_string());
            Coerced {
                stored: encoded,
                converted: Some(Value::Data(data)),
                force_dirty: false,
            }
        }
        FieldType::Enum => {
            let text = input.to_text();
            if !input.is_null() && field.values.iter().any(|allowed| *allowed == text) {
                Coerced::stored(StoredValue::Text(text))
            } else {
                Coerced::stored(StoredValue::Null)
            }
        }
        FieldType::Set | FieldType::List => {
            let items = match input {
                Value::List(items) => items
                    .into_iter()
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect(),
                Value::Null => Vec::new(),
                other => split_list(&other.to_text(), &field.delimiter),
            };
            Coerced {
                stored: StoredValue::Text(items.join(&field.delimiter)),
                converted: Some(Value::List(items)),
                force_dirty: true,
            }
        }
        FieldType::Password => Coerced::stored(match input {
            Value::Null => StoredValue::Null,
            other => StoredValue::Text(other.to_text()),
        }),
    }
}

/// Stored -> typed conversion applied by `Record::get`.
///
/// Returns the value and whether it should be kept in the conversion cache.
pub fn to_typed(field: &FieldDescriptor, stored: &StoredValue) -> (Value, bool) {
    match field.kind {
        FieldType::Timestamp => (timestamp_epoch(stored), true),
        FieldType::Serialized => (decode_serialized(field, stored), true),
        FieldType::Set | FieldType::List => {
            let items = match stored {
                StoredValue::Null => Vec::new(),
                other => split_list(&other.to_text(), &field.delimiter),
            };
            (Value::List(items), true)
        }
        FieldType::Boolean => {
            let flag = match stored {
                StoredValue::Null => false,
                StoredValue::Integer(number) => *number != 0,
                StoredValue::Real(number) => *number != 0.0,
                StoredValue::Text(text) => truthy(&Value::Text(text.clone())),
            };
            (Value::Bool(flag), true)
        }
        _ => (Value::from(stored), false),
    }
}

/// Stored value as it goes into a write projection.
pub fn to_projection(field: &FieldDescriptor, stored: &StoredValue) -> StoredValue {
    if field.blank_is_null && stored.is_blank() {
        return StoredValue::Null;
    }
    match (field.kind, stored) {
        (FieldType::Date, StoredValue::Text(text)) if text == ZERO_DATE && field.blank_is_null => {
            StoredValue::Null
        }
        (FieldType::Timestamp, StoredValue::Integer(epoch)) => format_epoch(*epoch as f64)
            .map(StoredValue::Text)
            .unwrap_or(StoredValue::Null),
        (FieldType::Timestamp, StoredValue::Real(epoch)) => format_epoch(*epoch)
            .map(StoredValue::Text)
            .unwrap_or(StoredValue::Null),
        _ => stored.clone(),
    }
}

/// Current time in canonical timestamp form.
pub fn now_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

fn string_value(field: &FieldDescriptor, input: Value, charset: Charset) -> StoredValue {
    if field.nullable() && field.blank_is_null && input.is_blank() {
        return StoredValue::Null;
    }
    if input.is_null() {
        return StoredValue::Null;
    }
    let text = match input {
        Value::Text(text) => text,
        other => other.to_text(),
    };
    StoredValue::Text(normalize_charset(text, charset))
}

fn normalize_charset(text: String, charset: Charset) -> String {
    match charset {
        Charset::Utf8 => text,
        Charset::Ascii => text
            .chars()
            .map(|ch| if ch.is_ascii() { ch } else { '?' })
            .collect(),
    }
}

/// Loose truthiness: `false`, `0`, `0.0`, empty text, `"0"`, `"false"`
/// and the empty list are false.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Int(number) => *number != 0,
        Value::Float(number) => *number != 0.0,
        Value::Text(text) => {
            let trimmed = text.trim();
            !(trimmed.is_empty() || trimmed == "0" || trimmed.eq_ignore_ascii_case("false"))
        }
        Value::List(items) => !items.is_empty(),
        Value::Data(data) => !data.is_null(),
    }
}

fn decimal_value(field: &FieldDescriptor, input: &Value) -> StoredValue {
    let stripped = NON_DECIMAL.replace_all(&input.to_text(), "").into_owned();
    if stripped.is_empty() && field.nullable() {
        return StoredValue::Null;
    }
    StoredValue::Text(stripped)
}

fn integer_value(field: &FieldDescriptor, input: &Value) -> StoredValue {
    let text = match input {
        Value::Float(number) => number.trunc().to_string(),
        Value::Bool(flag) => i64::from(*flag).to_string(),
        other => other.to_text(),
    };
    let stripped = NON_INTEGER.replace_all(&text, "").into_owned();
    if stripped.is_empty() && field.nullable() {
        return StoredValue::Null;
    }
    match stripped.parse::<i64>() {
        Ok(number) => StoredValue::Integer(number),
        Err(_) => StoredValue::Text(stripped),
    }
}

fn date_value(input: &Value) -> StoredValue {
    if let Some(epoch) = input.numeric() {
        return epoch_to_datetime(epoch)
            .map(|moment| StoredValue::Text(moment.format(DATE_FORMAT).to_string()))
            .unwrap_or(StoredValue::Null);
    }

    match input {
        Value::Text(text) => {
            let trimmed = text.trim();
            if let Some(caps) = YEAR_FIRST_DATE.captures(trimmed) {
                return StoredValue::Text(format!("{}-{}-{}", &caps[1], &caps[2], &caps[3]));
            }
            if let Some(caps) = MONTH_FIRST_DATE.captures(trimmed) {
                return StoredValue::Text(format!("{}-{}-{}", &caps[3], &caps[1], &caps[2]));
            }
            parse_free_text(trimmed)
                .map(|moment| StoredValue::Text(moment.format(DATE_FORMAT).to_string()))
                .unwrap_or(StoredValue::Null)
        }
        Value::Data(serde_json::Value::Object(parts)) => {
            let part = |primary: &str, short: &str| {
                parts
                    .get(primary)
                    .or_else(|| parts.get(short))
                    .and_then(|value| match value {
                        serde_json::Value::Number(number) => number.as_u64(),
                        serde_json::Value::String(text) => text.trim().parse().ok(),
                        _ => None,
                    })
            };
            let (year, month, day) = (part("year", "yyyy"), part("month", "mm"), part("day", "dd"));
            if year.is_none() && month.is_none() && day.is_none() {
                return StoredValue::Null;
            }
            StoredValue::Text(format!(
                "{:04}-{:02}-{:02}",
                year.unwrap_or(0),
                month.unwrap_or(0),
                day.unwrap_or(0)
            ))
        }
        _ => StoredValue::Null,
    }
}

fn timestamp_value(input: &Value) -> StoredValue {
    if let Some(epoch) = input.numeric() {
        return format_epoch(epoch)
            .map(StoredValue::Text)
            .unwrap_or(StoredValue::Null);
    }

    let Value::Text(text) = input else {
        return StoredValue::Null;
    };
    let trimmed = text.trim();
    if trimmed == CURRENT_TIMESTAMP {
        return StoredValue::text(CURRENT_TIMESTAMP);
    }
    if let Some(caps) = LOOSE_DATE_TIME.captures(trimmed) {
        return StoredValue::Text(format!(
            "{}-{}-{} {}:{}:{}",
            &caps[1], &caps[2], &caps[3], &caps[4], &caps[5], &caps[6]
        ));
    }
    parse_free_text(trimmed)
        .map(|moment| StoredValue::Text(moment.format(TIMESTAMP_FORMAT).to_string()))
        .unwrap_or(StoredValue::Null)
}

fn timestamp_epoch(stored: &StoredValue) -> Value {
    match stored {
        StoredValue::Integer(epoch) => Value::Int(*epoch),
        StoredValue::Real(epoch) => Value::Int(epoch.trunc() as i64),
        StoredValue::Text(text) if !text.is_empty() && text != ZERO_TIMESTAMP => {
            NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(text, DATE_FORMAT)
                        .ok()
                        .and_then(|date| date.and_hms_opt(0, 0, 0))
                })
                .map_or(Value::Null, |moment| Value::Int(moment.and_utc().timestamp()))
        }
        _ => Value::Null,
    }
}

fn decode_serialized(field: &FieldDescriptor, stored: &StoredValue) -> Value {
    match stored {
        StoredValue::Null => Value::Null,
        StoredValue::Text(text) => match serde_json::from_str(text) {
            Ok(data) => Value::Data(data),
            Err(err) => {
                warn!(
                    "event=decode_serialized module=record status=error field={} error={}",
                    field.name, err
                );
                Value::Null
            }
        },
        StoredValue::Integer(number) => Value::Data(serde_json::Value::from(*number)),
        StoredValue::Real(number) => Value::Data(serde_json::Value::from(*number)),
    }
}

/// Splits delimited text, trimming around delimiters and dropping empty
/// tokens.
pub fn split_list(text: &str, delimiter: &str) -> Vec<String> {
    text.split(delimiter)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(String::from)
        .collect()
}

fn epoch_to_datetime(epoch: f64) -> Option<DateTime<Utc>> {
    if !epoch.is_finite() {
        return None;
    }
    Utc.timestamp_opt(epoch.trunc() as i64, 0).single()
}

fn format_epoch(epoch: f64) -> Option<String> {
    epoch_to_datetime(epoch).map(|moment| moment.format(TIMESTAMP_FORMAT).to_string())
}

fn parse_free_text(text: &str) -> Option<NaiveDateTime> {
    if text.is_empty() {
        return None;
    }
    if let Ok(moment) = DateTime::parse_from_rfc3339(text) {
        return Some(moment.naive_utc());
    }
    if let Ok(moment) = DateTime::parse_from_rfc2822(text) {
        return Some(moment.naive_utc());
    }
    for format in FREE_TEXT_DATE_TIMES {
        if let Ok(moment) = NaiveDateTime::parse_from_str(text, format) {
            return Some(moment);
        }
    }
    for format in FREE_TEXT_DATES {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}
