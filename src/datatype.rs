// used for persistence
use rusqlite::types::{ToSql, ToSqlOutput};

// used for dates and timestamps handed to the sanitizer
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

// used for documents
use serde_json::Value as Json;

// used to print out readable forms of a value
use std::collections::BTreeMap;
use std::fmt;

/// A value as it arrives from a domain object, before sanitization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Timestamp(DateTime<Utc>),
    List(Vec<RawValue>),
    Map(BTreeMap<String, RawValue>),
    Json(Json),
    Bytes(Vec<u8>),
}

impl RawValue {
    /// Short name of the value's shape, used in rejection messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            RawValue::Null => "null",
            RawValue::Bool(_) => "bool",
            RawValue::Int(_) => "int",
            RawValue::Float(_) => "float",
            RawValue::Text(_) => "text",
            RawValue::Date(_) => "date",
            RawValue::DateTime(_) => "datetime",
            RawValue::Timestamp(_) => "timestamp",
            RawValue::List(_) => "list",
            RawValue::Map(_) => "map",
            RawValue::Json(_) => "json",
            RawValue::Bytes(_) => "bytes",
        }
    }

    /// JSON rendering of lists and maps. Scalars map onto their JSON
    /// counterparts; bytes and non-finite floats have none.
    pub fn to_json(&self) -> Option<Json> {
        Some(match self {
            RawValue::Null => Json::Null,
            RawValue::Bool(b) => Json::Bool(*b),
            RawValue::Int(i) => Json::from(*i),
            RawValue::Float(f) => Json::from(serde_json::Number::from_f64(*f)?),
            RawValue::Text(s) => Json::String(s.clone()),
            RawValue::Date(d) => Json::String(d.to_string()),
            RawValue::DateTime(d) => Json::String(d.to_string()),
            RawValue::Timestamp(t) => Json::String(t.to_rfc3339()),
            RawValue::List(items) => {
                Json::Array(items.iter().map(RawValue::to_json).collect::<Option<Vec<_>>>()?)
            }
            RawValue::Map(entries) => {
                let mut object = serde_json::Map::new();
                for (key, value) in entries {
                    object.insert(key.clone(), value.to_json()?);
                }
                Json::Object(object)
            }
            RawValue::Json(json) => json.clone(),
            RawValue::Bytes(_) => return None,
        })
    }
}

impl From<bool> for RawValue {
    fn from(v: bool) -> Self {
        RawValue::Bool(v)
    }
}
impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::Int(v)
    }
}
impl From<i32> for RawValue {
    fn from(v: i32) -> Self {
        RawValue::Int(v as i64)
    }
}
impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Float(v)
    }
}
impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Text(v.to_string())
    }
}
impl From<String> for RawValue {
    fn from(v: String) -> Self {
        RawValue::Text(v)
    }
}
impl From<NaiveDate> for RawValue {
    fn from(v: NaiveDate) -> Self {
        RawValue::Date(v)
    }
}
impl From<NaiveDateTime> for RawValue {
    fn from(v: NaiveDateTime) -> Self {
        RawValue::DateTime(v)
    }
}
impl From<DateTime<Utc>> for RawValue {
    fn from(v: DateTime<Utc>) -> Self {
        RawValue::Timestamp(v)
    }
}
impl From<Json> for RawValue {
    fn from(v: Json) -> Self {
        RawValue::Json(v)
    }
}
impl<T: Into<RawValue>> From<Option<T>> for RawValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(RawValue::Null, Into::into)
    }
}

/// The storage categories a column can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    /// Genealogical date text, e.g. `abt 1850` or `1850-03-02`.
    Date,
    /// Unix seconds.
    Timestamp,
    /// JSON object or array text.
    Document,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text | ColumnType::Date | ColumnType::Document => "TEXT",
            ColumnType::Integer | ColumnType::Boolean | ColumnType::Timestamp => "INTEGER",
            ColumnType::Float => "REAL",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Document => "document",
        };
        write!(f, "{}", name)
    }
}

/// A sanitized value that can be bound as is.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ColumnValue::Null => write!(f, "NULL"),
            ColumnValue::Text(s) => write!(f, "{}", s),
            ColumnValue::Integer(i) => write!(f, "{}", i),
            ColumnValue::Real(r) => write!(f, "{}", r),
            ColumnValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl ToSql for ColumnValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            ColumnValue::Null => ToSqlOutput::from(rusqlite::types::Null),
            ColumnValue::Text(s) => ToSqlOutput::from(s.as_str()),
            ColumnValue::Integer(i) => ToSqlOutput::from(*i),
            ColumnValue::Real(r) => ToSqlOutput::from(*r),
            ColumnValue::Boolean(b) => ToSqlOutput::from(*b),
        })
    }
}
