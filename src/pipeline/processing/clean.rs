use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::FieldSpec;
use crate::domain::{Batch, FieldType, Record, Value};
use crate::error::{EtlError, FieldCastError, Result};
use crate::observability::metrics;

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// What to do with a declared field that is null after casting
#[derive(Debug, Clone, PartialEq)]
pub enum NullPolicy {
    Keep,
    Default(Value),
    Drop,
}

#[derive(Debug, Clone)]
struct CleanField {
    field_type: FieldType,
    policy: NullPolicy,
}

/// Normalizes raw records: trims strings, casts declared fields to their
/// types and applies per-field null policies.
#[derive(Debug, Clone, Default)]
pub struct Cleaner {
    fields: BTreeMap<String, CleanField>,
}

impl Cleaner {
    /// Compile the schema. Defaults are cast up front so that a bad default is
    /// a configuration error rather than a per-record warning.
    pub fn new(schema: &BTreeMap<String, FieldSpec>) -> Result<Self> {
        let mut fields = BTreeMap::new();

        for (name, spec) in schema {
            let policy = match (&spec.default, spec.drop_null) {
                (Some(_), true) => {
                    return Err(EtlError::Config(format!(
                        "field '{}' sets both a default and drop_null",
                        name
                    )))
                }
                (Some(raw), false) => {
                    let value = cast_value(Value::from_json(raw), spec.field_type)
                        .filter(|v| !v.is_null())
                        .ok_or_else(|| {
                            EtlError::Config(format!(
                                "default {} for field '{}' is not a valid {}",
                                raw, name, spec.field_type
                            ))
                        })?;
                    NullPolicy::Default(value)
                }
                (None, true) => NullPolicy::Drop,
                (None, false) => NullPolicy::Keep,
            };

            fields.insert(
                name.clone(),
                CleanField {
                    field_type: spec.field_type,
                    policy,
                },
            );
        }

        Ok(Self { fields })
    }

    /// Clean every record in place. Output cardinality equals input cardinality.
    pub fn clean(&self, mut batch: Batch) -> Batch {
        let before = batch.iter().map(|r| r.cast_failures.len()).sum::<usize>();
        for record in batch.iter_mut() {
            self.clean_record(record);
        }
        let after = batch.iter().map(|r| r.cast_failures.len()).sum::<usize>();

        metrics::clean::batch_cleaned(batch.len());
        debug!(
            records = batch.len(),
            cast_failures = after - before,
            "Cleaned batch"
        );
        batch
    }

    pub fn clean_record(&self, record: &mut Record) {
        for value in record.fields.values_mut() {
            if let Value::String(s) = value {
                let trimmed = s.trim();
                if trimmed.len() != s.len() {
                    *s = trimmed.to_string();
                }
            }
        }

        for (name, field) in &self.fields {
            let present = record.fields.contains_key(name);
            let current = record.fields.remove(name).unwrap_or(Value::Null);

            let cast = match cast_value(current.clone(), field.field_type) {
                Some(value) => value,
                None => {
                    let error = FieldCastError {
                        field: name.clone(),
                        expected: field.field_type,
                        raw: current.to_string(),
                    };
                    warn!(source = %record.source, "{}", error);
                    metrics::clean::cast_failure(name);
                    record.cast_failures.push(error);
                    Value::Null
                }
            };

            if !cast.is_null() {
                record.fields.insert(name.clone(), cast);
                continue;
            }

            match &field.policy {
                NullPolicy::Default(default) => {
                    metrics::clean::default_applied(name);
                    record.fields.insert(name.clone(), default.clone());
                }
                NullPolicy::Drop => {}
                NullPolicy::Keep => {
                    if present {
                        record.fields.insert(name.clone(), Value::Null);
                    }
                }
            }
        }
    }

    /// Declared type of a field, if the schema names it
    pub fn declared_type(&self, field: &str) -> Option<FieldType> {
        self.fields.get(field).map(|f| f.field_type)
    }
}

/// Cast a value to `to`. `Some(Value::Null)` means the value is missing,
/// `None` means the cast failed.
///
/// Empty strings count as missing for every type except `string`.
pub fn cast_value(value: Value, to: FieldType) -> Option<Value> {
    if let Value::String(s) = &value {
        if s.trim().is_empty() && to != FieldType::String {
            return Some(Value::Null);
        }
    }

    match (value, to) {
        (Value::Null, _) => Some(Value::Null),

        (Value::String(s), FieldType::String) => Some(Value::String(s.trim().to_string())),
        (Value::Integer(i), FieldType::String) => Some(Value::String(i.to_string())),
        (Value::Decimal(d), FieldType::String) => Some(Value::String(d.to_string())),
        (Value::Timestamp(ts), FieldType::String) => Some(Value::String(
            ts.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        )),

        (Value::Integer(i), FieldType::Integer) => Some(Value::Integer(i)),
        (Value::String(s), FieldType::Integer) => s.trim().parse::<i64>().ok().map(Value::Integer),
        (Value::Decimal(d), FieldType::Integer) => {
            if d.is_finite() && d.fract() == 0.0 && d >= i64::MIN as f64 && d < i64::MAX as f64 {
                Some(Value::Integer(d as i64))
            } else {
                None
            }
        }
        (Value::Timestamp(_), FieldType::Integer) => None,

        (Value::Decimal(d), FieldType::Decimal) => d.is_finite().then_some(Value::Decimal(d)),
        (Value::Integer(i), FieldType::Decimal) => Some(Value::Decimal(i as f64)),
        (Value::String(s), FieldType::Decimal) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|d| d.is_finite())
            .map(Value::Decimal),
        (Value::Timestamp(_), FieldType::Decimal) => None,

        (Value::Timestamp(ts), FieldType::Timestamp) => Some(Value::Timestamp(ts)),
        (Value::String(s), FieldType::Timestamp) => parse_timestamp(s.trim()).map(Value::Timestamp),
        (Value::Integer(secs), FieldType::Timestamp) => {
            DateTime::<Utc>::from_timestamp(secs, 0).map(Value::Timestamp)
        }
        (Value::Decimal(_), FieldType::Timestamp) => None,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> BTreeMap<String, FieldSpec> {
        let mut schema = BTreeMap::new();
        schema.insert("title".to_string(), FieldSpec::new(FieldType::String).required());
        schema.insert(
            "salary_range".to_string(),
            FieldSpec::new(FieldType::String).with_default(json!("unknown")),
        );
        schema.insert(
            "description".to_string(),
            FieldSpec::new(FieldType::String).with_default(json!("")),
        );
        schema.insert("openings".to_string(), FieldSpec::new(FieldType::Integer));
        schema.insert("rating".to_string(), FieldSpec::new(FieldType::Decimal));
        schema.insert(
            "posted_at".to_string(),
            FieldSpec::new(FieldType::Timestamp).dropping_nulls(),
        );
        schema
    }

    fn raw_record() -> Record {
        Record::new("board_a", Utc::now())
            .with("title", "  Data Engineer \t")
            .with("openings", " 3 ")
            .with("rating", "4.5")
            .with("posted_at", "2024-03-01")
            .with("company", "  Acme  ")
    }

    #[test]
    fn test_trims_and_casts() {
        let cleaner = Cleaner::new(&schema()).unwrap();
        let cleaned = cleaner.clean(vec![raw_record()]);
        let record = &cleaned[0];

        assert_eq!(record.get("title"), &Value::String("Data Engineer".to_string()));
        assert_eq!(record.get("openings"), &Value::Integer(3));
        assert_eq!(record.get("rating"), &Value::Decimal(4.5));
        assert_eq!(
            record.get("posted_at").as_timestamp(),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(record.get("company"), &Value::String("Acme".to_string()));
        assert!(record.cast_failures.is_empty());
    }

    #[test]
    fn test_applies_defaults_and_drops() {
        let cleaner = Cleaner::new(&schema()).unwrap();
        let record = Record::new("board_a", Utc::now())
            .with("title", "Chef")
            .with("posted_at", Value::Null);
        let cleaned = cleaner.clean(vec![record]);

        assert_eq!(cleaned[0].get("salary_range"), &Value::String("unknown".to_string()));
        assert_eq!(cleaned[0].get("description"), &Value::String(String::new()));
        assert!(!cleaned[0].fields.contains_key("posted_at"));
        assert!(!cleaned[0].fields.contains_key("openings"));
    }

    #[test]
    fn test_cast_failure_nulls_field_and_keeps_record() {
        let cleaner = Cleaner::new(&schema()).unwrap();
        let record = raw_record().with("openings", "several");
        let cleaned = cleaner.clean(vec![record, raw_record()]);

        assert_eq!(cleaned.len(), 2);
        assert!(cleaned[0].is_null("openings"));
        assert!(cleaned[0].fields.contains_key("openings"));
        assert_eq!(cleaned[0].cast_failures.len(), 1);
        assert_eq!(cleaned[0].cast_failures[0].field, "openings");
        assert_eq!(cleaned[0].cast_failures[0].expected, FieldType::Integer);
        assert_eq!(cleaned[0].cast_failures[0].raw, "several");
        assert!(cleaned[1].cast_failures.is_empty());
    }

    #[test]
    fn test_cast_failure_then_default() {
        let mut schema = schema();
        schema.insert(
            "openings".to_string(),
            FieldSpec::new(FieldType::Integer).with_default(json!(1)),
        );
        let cleaner = Cleaner::new(&schema).unwrap();
        let cleaned = cleaner.clean(vec![raw_record().with("openings", "many")]);

        assert_eq!(cleaned[0].get("openings"), &Value::Integer(1));
        assert_eq!(cleaned[0].cast_failures.len(), 1);
    }

    #[test]
    fn test_cleaning_is_idempotent() {
        let cleaner = Cleaner::new(&schema()).unwrap();
        let batch = vec![
            raw_record(),
            raw_record().with("openings", "x").with("rating", "NaN"),
            Record::new("board_b", Utc::now()).with("title", "   "),
            raw_record().with("posted_at", 1_700_000_000i64).with("rating", 4i64),
        ];

        let once = cleaner.clean(batch);
        let twice = cleaner.clean(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_invalid_default_is_config_error() {
        let mut schema = BTreeMap::new();
        schema.insert(
            "openings".to_string(),
            FieldSpec::new(FieldType::Integer).with_default(json!("a few")),
        );
        assert!(matches!(Cleaner::new(&schema), Err(EtlError::Config(_))));
    }

    #[test]
    fn test_cast_value_rules() {
        assert_eq!(cast_value(Value::Decimal(2.0), FieldType::Integer), Some(Value::Integer(2)));
        assert_eq!(cast_value(Value::Decimal(2.5), FieldType::Integer), None);
        assert_eq!(cast_value(Value::Integer(7), FieldType::String), Some(Value::from("7")));
        assert_eq!(cast_value(Value::from(""), FieldType::Integer), Some(Value::Null));
        assert_eq!(cast_value(Value::from(""), FieldType::String), Some(Value::from("")));
        assert_eq!(cast_value(Value::from("inf"), FieldType::Decimal), None);
        assert_eq!(cast_value(Value::Decimal(1.0), FieldType::Timestamp), None);
        assert_eq!(
            cast_value(Value::from("2024-01-02T03:04:05Z"), FieldType::Timestamp),
            Some(Value::Timestamp(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()))
        );
        assert_eq!(
            cast_value(Value::from("01/15/2024"), FieldType::Timestamp),
            Some(Value::Timestamp(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()))
        );
    }
}
