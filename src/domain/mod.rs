use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::FieldCastError;

/// A raw field mapping as delivered by an extract adapter
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Prefix reserved for provenance columns such as `_source`; source fields may not use it
pub const RESERVED_FIELD_PREFIX: char = '_';

pub fn is_reserved_field(name: &str) -> bool {
    name.starts_with(RESERVED_FIELD_PREFIX)
}

/// An ordered collection of records processed together in one run
pub type Batch = Vec<Record>;

/// Declared semantic type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Decimal,
    Timestamp,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Decimal => "decimal",
            FieldType::Timestamp => "timestamp",
        };
        write!(f, "{}", name)
    }
}

/// A single field value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    String(String),
    Integer(i64),
    Decimal(f64),
    Timestamp(DateTime<Utc>),
}

static NULL: Value = Value::Null;

impl Value {
    /// Map a raw JSON value onto the record value space.
    ///
    /// Booleans become the strings `"true"`/`"false"`; arrays and objects are
    /// kept as compact JSON text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::String(b.to_string()),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    n.as_f64().map(Value::Decimal).unwrap_or(Value::Null)
                }
            }
            other => Value::String(other.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Decimal(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Timestamp(ts) => {
                serde_json::Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The semantic type this value carries, `None` for null
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            Value::Null => None,
            Value::String(_) => Some(FieldType::String),
            Value::Integer(_) => Some(FieldType::Integer),
            Value::Decimal(_) => Some(FieldType::Decimal),
            Value::Timestamp(_) => Some(FieldType::Timestamp),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of integers and decimals
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::String(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Decimal(d)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

/// The unit of data flowing through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Field name to value, kept in key order
    pub fields: BTreeMap<String, Value>,
    /// The source system that provided the record
    pub source: String,
    /// When the record was extracted
    pub extracted_at: DateTime<Utc>,
    /// Cast failures recorded while cleaning
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cast_failures: Vec<FieldCastError>,
}

impl Record {
    pub fn new(source: impl Into<String>, extracted_at: DateTime<Utc>) -> Self {
        Self {
            fields: BTreeMap::new(),
            source: source.into(),
            extracted_at,
            cast_failures: Vec::new(),
        }
    }

    pub fn from_raw(raw: &RawRecord, source: &str, extracted_at: DateTime<Utc>) -> Self {
        let fields = raw
            .iter()
            .map(|(name, value)| (name.clone(), Value::from_json(value)))
            .collect();
        Self {
            fields,
            source: source.to_string(),
            extracted_at,
            cast_failures: Vec::new(),
        }
    }

    /// Builder-style field setter, mostly for fixtures
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    /// Field value; a missing field reads as null
    pub fn get(&self, field: &str) -> &Value {
        self.fields.get(field).unwrap_or(&NULL)
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.fields.insert(field.to_string(), value);
    }

    pub fn is_null(&self, field: &str) -> bool {
        self.get(field).is_null()
    }

    /// Field data as a JSON object, with provenance under `_source` / `_extracted_at`
    pub fn to_json(&self) -> serde_json::Value {
        let mut map: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        map.insert("_source".to_string(), serde_json::Value::String(self.source.clone()));
        map.insert(
            "_extracted_at".to_string(),
            serde_json::Value::String(self.extracted_at.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        );
        serde_json::Value::Object(map)
    }
}

/// Raw records fetched from a single source in one extract call
#[derive(Debug, Clone)]
pub struct RawBatch {
    pub source: String,
    pub extracted_at: DateTime<Utc>,
    pub records: Vec<RawRecord>,
}

impl RawBatch {
    pub fn new(source: impl Into<String>, records: Vec<RawRecord>) -> Self {
        Self {
            source: source.into(),
            extracted_at: Utc::now(),
            records,
        }
    }

    pub fn into_batch(self) -> Batch {
        self.records
            .iter()
            .map(|raw| Record::from_raw(raw, &self.source, self.extracted_at))
            .collect()
    }
}
