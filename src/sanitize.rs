//! Coercion of domain values into column-safe values.
//!
//! Every field of every object kind has a [`FieldRule`]: its target column
//! type, whether it may be null and an optional constraint. A raw value is
//! either converted losslessly into the target type or rejected with
//! [`TreeplexError::SanitizationRejected`]; nothing is ever truncated,
//! defaulted or passed through unchanged. The same rule table generates the
//! storage schema, so the two can never disagree about a column.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::types::ToSql;
use serde_json::Value as Json;

use crate::datatype::{ColumnType, ColumnValue, RawValue};
use crate::error::{Result, TreeplexError};
use crate::tables::ObjectKind;

// largest integer magnitude an f64 represents exactly
const EXACT_FLOAT_INT: i64 = 1 << 53;

lazy_static! {
    static ref INTEGER_TEXT: Regex = Regex::new(r"^[+-]?\d+$").unwrap();
    static ref DECIMAL_TEXT: Regex = Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").unwrap();
    static ref GENEALOGICAL_DATE: Regex = Regex::new(concat!(
        r"(?i)^(?:",
        r"(?:(?:abt|about|bef|before|aft|after|est|calc|circa)\.?\s+)?\d{4}(?:-(?:0[1-9]|1[0-2])(?:-(?:0[1-9]|[12]\d|3[01]))?)?",
        r"|between\s+\d{4}(?:-(?:0[1-9]|1[0-2])(?:-(?:0[1-9]|[12]\d|3[01]))?)?",
        r"\s+and\s+\d{4}(?:-(?:0[1-9]|1[0-2])(?:-(?:0[1-9]|[12]\d|3[01]))?)?",
        r")$"
    ))
    .unwrap();
    static ref FULL_DATE: Regex = Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap();
    static ref HEX_COLOR: Regex = Regex::new(r"^#(?:[0-9A-Fa-f]{6}|[0-9A-Fa-f]{12})$").unwrap();
}

/// Rejection predicates applied after coercion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constraint {
    None,
    NonEmpty,
    Range(i64, i64),
    FloatRange(f64, f64),
    HexColor,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldRule {
    pub field: &'static str,
    pub target: ColumnType,
    pub nullable: bool,
    pub constraint: Constraint,
}

const fn optional(field: &'static str, target: ColumnType) -> FieldRule {
    FieldRule {
        field,
        target,
        nullable: true,
        constraint: Constraint::None,
    }
}

const fn constrained(field: &'static str, target: ColumnType, constraint: Constraint) -> FieldRule {
    FieldRule {
        field,
        target,
        nullable: true,
        constraint,
    }
}

const HANDLE: FieldRule = FieldRule {
    field: "handle",
    target: ColumnType::Text,
    nullable: false,
    constraint: Constraint::NonEmpty,
};
const GRAMPS_ID: FieldRule = optional("gramps_id", ColumnType::Text);
const CHANGE: FieldRule = optional("change", ColumnType::Timestamp);
const PRIVATE: FieldRule = optional("private", ColumnType::Boolean);
const JSON_DATA: FieldRule = optional("json_data", ColumnType::Document);

const PERSON: &[FieldRule] = &[
    HANDLE,
    GRAMPS_ID,
    CHANGE,
    PRIVATE,
    JSON_DATA,
    optional("given_name", ColumnType::Text),
    optional("surname", ColumnType::Text),
    constrained("gender", ColumnType::Integer, Constraint::Range(0, 2)),
    optional("birth_date", ColumnType::Date),
    optional("death_date", ColumnType::Date),
];
const FAMILY: &[FieldRule] = &[
    HANDLE,
    GRAMPS_ID,
    CHANGE,
    PRIVATE,
    JSON_DATA,
    optional("father_handle", ColumnType::Text),
    optional("mother_handle", ColumnType::Text),
    constrained("relationship_type", ColumnType::Integer, Constraint::Range(0, 3)),
];
const EVENT: &[FieldRule] = &[
    HANDLE,
    GRAMPS_ID,
    CHANGE,
    PRIVATE,
    JSON_DATA,
    optional("event_type", ColumnType::Text),
    optional("description", ColumnType::Text),
    optional("date", ColumnType::Date),
    optional("place_handle", ColumnType::Text),
];
const PLACE: &[FieldRule] = &[
    HANDLE,
    GRAMPS_ID,
    CHANGE,
    PRIVATE,
    JSON_DATA,
    optional("name", ColumnType::Text),
    optional("place_type", ColumnType::Text),
    constrained("latitude", ColumnType::Float, Constraint::FloatRange(-90.0, 90.0)),
    constrained("longitude", ColumnType::Float, Constraint::FloatRange(-180.0, 180.0)),
];
const SOURCE: &[FieldRule] = &[
    HANDLE,
    GRAMPS_ID,
    CHANGE,
    PRIVATE,
    JSON_DATA,
    optional("title", ColumnType::Text),
    optional("author", ColumnType::Text),
    optional("pubinfo", ColumnType::Text),
    optional("abbreviation", ColumnType::Text),
];
const CITATION: &[FieldRule] = &[
    HANDLE,
    GRAMPS_ID,
    CHANGE,
    PRIVATE,
    JSON_DATA,
    optional("page", ColumnType::Text),
    constrained("confidence", ColumnType::Integer, Constraint::Range(0, 4)),
    optional("source_handle", ColumnType::Text),
    optional("date", ColumnType::Date),
];
const REPOSITORY: &[FieldRule] = &[
    HANDLE,
    GRAMPS_ID,
    CHANGE,
    PRIVATE,
    JSON_DATA,
    optional("name", ColumnType::Text),
    optional("repository_type", ColumnType::Text),
];
const MEDIA: &[FieldRule] = &[
    HANDLE,
    GRAMPS_ID,
    CHANGE,
    PRIVATE,
    JSON_DATA,
    optional("path", ColumnType::Text),
    optional("mime", ColumnType::Text),
    optional("description", ColumnType::Text),
    optional("checksum", ColumnType::Text),
    optional("date", ColumnType::Date),
];
const NOTE: &[FieldRule] = &[
    HANDLE,
    GRAMPS_ID,
    CHANGE,
    PRIVATE,
    JSON_DATA,
    optional("text", ColumnType::Text),
    optional("note_type", ColumnType::Text),
    constrained("format", ColumnType::Integer, Constraint::Range(0, 1)),
];
const TAG: &[FieldRule] = &[
    HANDLE,
    CHANGE,
    JSON_DATA,
    optional("name", ColumnType::Text),
    constrained("color", ColumnType::Text, Constraint::HexColor),
    constrained("priority", ColumnType::Integer, Constraint::Range(0, i64::MAX)),
];

/// Every column of the kind's table, `handle` first.
pub fn rules(kind: ObjectKind) -> &'static [FieldRule] {
    match kind {
        ObjectKind::Person => PERSON,
        ObjectKind::Family => FAMILY,
        ObjectKind::Event => EVENT,
        ObjectKind::Place => PLACE,
        ObjectKind::Source => SOURCE,
        ObjectKind::Citation => CITATION,
        ObjectKind::Repository => REPOSITORY,
        ObjectKind::Media => MEDIA,
        ObjectKind::Note => NOTE,
        ObjectKind::Tag => TAG,
    }
}

pub fn rule(kind: ObjectKind, field: &str) -> Option<&'static FieldRule> {
    rules(kind).iter().find(|rule| rule.field == field)
}

fn rejected(kind: ObjectKind, field: &str, raw: &RawValue, reason: impl Into<String>) -> TreeplexError {
    TreeplexError::SanitizationRejected {
        kind,
        field: field.to_string(),
        value_type: raw.type_name(),
        reason: reason.into(),
    }
}

/// Coerces one raw value for `kind.field`.
pub fn sanitize_value(kind: ObjectKind, field: &str, raw: &RawValue) -> Result<ColumnValue> {
    let rule = rule(kind, field).ok_or_else(|| rejected(kind, field, raw, "unknown field"))?;
    if let RawValue::Null = raw {
        return if rule.nullable {
            Ok(ColumnValue::Null)
        } else {
            Err(rejected(kind, field, raw, "field is not nullable"))
        };
    }
    let value = coerce(rule.target, raw)
        .map_err(|reason| rejected(kind, field, raw, format!("cannot store as {}: {}", rule.target, reason)))?;
    check(rule.constraint, &value).map_err(|reason| rejected(kind, field, raw, reason))?;
    Ok(value)
}

type Coerced = std::result::Result<ColumnValue, String>;

fn coerce(target: ColumnType, raw: &RawValue) -> Coerced {
    match target {
        ColumnType::Text => to_text(raw),
        ColumnType::Integer => to_integer(raw),
        ColumnType::Float => to_float(raw),
        ColumnType::Boolean => to_boolean(raw),
        ColumnType::Date => to_date(raw),
        ColumnType::Timestamp => to_timestamp(raw),
        ColumnType::Document => to_document(raw),
    }
}

fn unsupported(raw: &RawValue) -> Coerced {
    Err(format!("{} values are not accepted", raw.type_name()))
}

fn to_text(raw: &RawValue) -> Coerced {
    match raw {
        RawValue::Text(s) if s.contains('\0') => Err("text contains a NUL character".into()),
        RawValue::Text(s) => Ok(ColumnValue::Text(s.clone())),
        RawValue::Int(i) => Ok(ColumnValue::Text(i.to_string())),
        _ => unsupported(raw),
    }
}

fn to_integer(raw: &RawValue) -> Coerced {
    match raw {
        RawValue::Int(i) => Ok(ColumnValue::Integer(*i)),
        RawValue::Bool(b) => Ok(ColumnValue::Integer(*b as i64)),
        RawValue::Float(f) => {
            // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive
            if f.is_finite() && f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                Ok(ColumnValue::Integer(*f as i64))
            } else {
                Err(format!("{} is not an integral value", f))
            }
        }
        RawValue::Text(s) if INTEGER_TEXT.is_match(s) => s
            .parse::<i64>()
            .map(ColumnValue::Integer)
            .map_err(|e| format!("'{}': {}", s, e)),
        RawValue::Text(s) => Err(format!("'{}' is not an integer", s)),
        _ => unsupported(raw),
    }
}

fn to_float(raw: &RawValue) -> Coerced {
    match raw {
        RawValue::Float(f) if f.is_finite() => Ok(ColumnValue::Real(*f)),
        RawValue::Float(f) => Err(format!("{} is not finite", f)),
        RawValue::Int(i) if (-EXACT_FLOAT_INT..=EXACT_FLOAT_INT).contains(i) => Ok(ColumnValue::Real(*i as f64)),
        RawValue::Int(i) => Err(format!("{} cannot be represented exactly", i)),
        RawValue::Text(s) if DECIMAL_TEXT.is_match(s) => match s.parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(ColumnValue::Real(f)),
            _ => Err(format!("'{}' is out of range", s)),
        },
        RawValue::Text(s) => Err(format!("'{}' is not a decimal number", s)),
        _ => unsupported(raw),
    }
}

fn to_boolean(raw: &RawValue) -> Coerced {
    match raw {
        RawValue::Bool(b) => Ok(ColumnValue::Boolean(*b)),
        RawValue::Int(0) => Ok(ColumnValue::Boolean(false)),
        RawValue::Int(1) => Ok(ColumnValue::Boolean(true)),
        RawValue::Int(i) => Err(format!("{} is neither 0 nor 1", i)),
        RawValue::Text(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(ColumnValue::Boolean(true)),
            "false" | "0" => Ok(ColumnValue::Boolean(false)),
            _ => Err(format!("'{}' is not a boolean", s)),
        },
        _ => unsupported(raw),
    }
}

/// Whether text reads as a genealogical date such as `abt 1850`,
/// `1850-03` or `between 1850 and 1855`.
pub fn is_genealogical_date(text: &str) -> bool {
    GENEALOGICAL_DATE.is_match(text)
        && FULL_DATE
            .find_iter(text)
            .all(|m| NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").is_ok())
}

fn to_date(raw: &RawValue) -> Coerced {
    match raw {
        RawValue::Date(d) => Ok(ColumnValue::Text(d.format("%Y-%m-%d").to_string())),
        RawValue::DateTime(d) => Ok(ColumnValue::Text(d.date().format("%Y-%m-%d").to_string())),
        RawValue::Timestamp(t) => Ok(ColumnValue::Text(t.date_naive().format("%Y-%m-%d").to_string())),
        RawValue::Text(s) => {
            let trimmed = s.trim();
            if is_genealogical_date(trimmed) {
                Ok(ColumnValue::Text(trimmed.to_string()))
            } else {
                Err(format!("'{}' is not a genealogical date", s))
            }
        }
        _ => unsupported(raw),
    }
}

fn non_negative(seconds: i64) -> Coerced {
    if seconds >= 0 {
        Ok(ColumnValue::Integer(seconds))
    } else {
        Err(format!("{} is before the unix epoch", seconds))
    }
}

fn to_timestamp(raw: &RawValue) -> Coerced {
    match raw {
        RawValue::Int(i) => non_negative(*i),
        RawValue::Timestamp(t) => non_negative(t.timestamp()),
        RawValue::DateTime(d) => non_negative(d.and_utc().timestamp()),
        RawValue::Text(s) => match DateTime::parse_from_rfc3339(s.trim()) {
            Ok(t) => non_negative(t.timestamp()),
            Err(e) => Err(format!("'{}' is not an RFC 3339 timestamp: {}", s, e)),
        },
        _ => unsupported(raw),
    }
}

fn to_document(raw: &RawValue) -> Coerced {
    let json = match raw {
        RawValue::List(_) | RawValue::Map(_) => raw
            .to_json()
            .ok_or_else(|| "contains a value with no JSON form".to_string())?,
        RawValue::Json(json) => json.clone(),
        RawValue::Text(s) => serde_json::from_str::<Json>(s).map_err(|e| format!("invalid JSON: {}", e))?,
        _ => return unsupported(raw),
    };
    match json {
        Json::Object(_) | Json::Array(_) => Ok(ColumnValue::Text(json.to_string())),
        other => Err(format!("a document must be an object or array, not {}", other)),
    }
}

fn check(constraint: Constraint, value: &ColumnValue) -> std::result::Result<(), String> {
    match (constraint, value) {
        (Constraint::None, _) | (_, ColumnValue::Null) => Ok(()),
        (Constraint::NonEmpty, ColumnValue::Text(s)) if !s.trim().is_empty() => Ok(()),
        (Constraint::NonEmpty, _) => Err("value must not be empty".into()),
        (Constraint::Range(lo, hi), ColumnValue::Integer(i)) if (lo..=hi).contains(i) => Ok(()),
        (Constraint::Range(lo, hi), v) => Err(format!("{} is outside {}..={}", v, lo, hi)),
        (Constraint::FloatRange(lo, hi), ColumnValue::Real(r)) if (lo..=hi).contains(r) => Ok(()),
        (Constraint::FloatRange(lo, hi), v) => Err(format!("{} is outside {}..={}", v, lo, hi)),
        (Constraint::HexColor, ColumnValue::Text(s)) if HEX_COLOR.is_match(s) => Ok(()),
        (Constraint::HexColor, v) => Err(format!("'{}' is not a #RRGGBB or #RRRRGGGGBBBB colour", v)),
    }
}

/// The accessor interface every persisted domain object offers.
pub trait Record {
    fn kind(&self) -> ObjectKind;
    fn handle(&self) -> &str;
    /// Every field except the handle.
    fn fields(&self) -> Vec<(&str, RawValue)>;
}

/// A generic [`Record`] built field by field.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectData {
    kind: ObjectKind,
    handle: String,
    fields: Vec<(String, RawValue)>,
}

impl ObjectData {
    pub fn new(kind: ObjectKind, handle: impl Into<String>) -> Self {
        Self {
            kind,
            handle: handle.into(),
            fields: Vec::new(),
        }
    }
    pub fn with(mut self, field: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.fields.push((field.into(), value.into()));
        self
    }
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<RawValue>) {
        let field = field.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((field, value)),
        }
    }
}

impl Record for ObjectData {
    fn kind(&self) -> ObjectKind {
        self.kind
    }
    fn handle(&self) -> &str {
        &self.handle
    }
    fn fields(&self) -> Vec<(&str, RawValue)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.clone()))
            .collect()
    }
}

/// A record whose every value passed its rule, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedRecord {
    kind: ObjectKind,
    columns: Vec<(&'static str, ColumnValue)>,
}

impl SanitizedRecord {
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }
    pub fn columns(&self) -> &[(&'static str, ColumnValue)] {
        &self.columns
    }
    pub fn get(&self, field: &str) -> Option<&ColumnValue> {
        self.columns.iter().find(|(name, _)| *name == field).map(|(_, value)| value)
    }

    /// Insert-or-update statement against the logical table, keyed on
    /// `handle`. Parameters are numbered in column order.
    pub fn upsert_sql(&self) -> String {
        let names: Vec<&str> = self.columns.iter().map(|(name, _)| *name).collect();
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
        let updates: Vec<String> = names
            .iter()
            .filter(|name| **name != "handle")
            .map(|name| format!("{0} = excluded.{0}", name))
            .collect();
        let conflict = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };
        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(handle) {}",
            self.kind.table(),
            names.join(", "),
            placeholders.join(", "),
            conflict
        )
    }

    pub fn params(&self) -> Vec<&dyn ToSql> {
        self.columns.iter().map(|(_, value)| value as &dyn ToSql).collect()
    }
}

/// Sanitizes the handle and every field of a record. The first rejected
/// value aborts the whole record.
pub fn sanitize_record(record: &dyn Record) -> Result<SanitizedRecord> {
    let kind = record.kind();
    let handle = RawValue::Text(record.handle().to_string());
    let mut columns = vec![(HANDLE.field, sanitize_value(kind, HANDLE.field, &handle)?)];
    let mut seen = HashSet::new();
    seen.insert(HANDLE.field);
    for (field, raw) in record.fields() {
        let rule = rule(kind, field).ok_or_else(|| rejected(kind, field, &raw, "unknown field"))?;
        if !seen.insert(rule.field) {
            return Err(rejected(kind, field, &raw, "field given more than once"));
        }
        columns.push((rule.field, sanitize_value(kind, field, &raw)?));
    }
    Ok(SanitizedRecord { kind, columns })
}
