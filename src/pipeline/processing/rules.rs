//! Business rules defined as configuration data.
//!
//! Each `[[rules]]` entry in `etl.toml` deserializes into a [`RuleConfig`] and
//! is compiled into a [`ConfiguredRule`]. Apart from `not_null`, rules pass on
//! null or missing fields; a value of the wrong type is an evaluation error.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::domain::{Record, Value};
use crate::error::{EtlError, Result, RuleEvaluationError};
use crate::pipeline::processing::validate::Rule;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleConfig {
    NotNull {
        id: String,
        field: String,
    },
    Range {
        id: String,
        field: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Pattern {
        id: String,
        field: String,
        regex: String,
    },
    OneOf {
        id: String,
        field: String,
        values: Vec<String>,
    },
    MinLength {
        id: String,
        field: String,
        min: usize,
    },
    MaxLength {
        id: String,
        field: String,
        max: usize,
    },
    LessOrEqual {
        id: String,
        left: String,
        right: String,
    },
    NotInFuture {
        id: String,
        field: String,
    },
}

impl RuleConfig {
    pub fn id(&self) -> &str {
        match self {
            RuleConfig::NotNull { id, .. }
            | RuleConfig::Range { id, .. }
            | RuleConfig::Pattern { id, .. }
            | RuleConfig::OneOf { id, .. }
            | RuleConfig::MinLength { id, .. }
            | RuleConfig::MaxLength { id, .. }
            | RuleConfig::LessOrEqual { id, .. }
            | RuleConfig::NotInFuture { id, .. } => id,
        }
    }

    /// Compile into an executable rule. `not_in_future` is evaluated against
    /// the time of compilation so a run sees one fixed "now".
    pub fn build(&self) -> Result<Arc<dyn Rule>> {
        let check = match self.clone() {
            RuleConfig::NotNull { field, .. } => Check::NotNull { field },
            RuleConfig::Range { field, min, max, .. } => {
                if let (Some(lo), Some(hi)) = (min, max) {
                    if lo > hi {
                        return Err(EtlError::Config(format!(
                            "rule '{}': min {} is greater than max {}",
                            self.id(),
                            lo,
                            hi
                        )));
                    }
                }
                Check::Range { field, min, max }
            }
            RuleConfig::Pattern { field, regex, .. } => {
                let regex = Regex::new(&regex).map_err(|e| {
                    EtlError::Config(format!("rule '{}': invalid regex: {}", self.id(), e))
                })?;
                Check::Pattern { field, regex }
            }
            RuleConfig::OneOf { field, values, .. } => Check::OneOf { field, values },
            RuleConfig::MinLength { field, min, .. } => Check::MinLength { field, min },
            RuleConfig::MaxLength { field, max, .. } => Check::MaxLength { field, max },
            RuleConfig::LessOrEqual { left, right, .. } => Check::LessOrEqual { left, right },
            RuleConfig::NotInFuture { field, .. } => Check::NotInFuture {
                field,
                now: Utc::now(),
            },
        };

        Ok(Arc::new(ConfiguredRule {
            id: self.id().to_string(),
            check,
        }))
    }
}

#[derive(Debug)]
enum Check {
    NotNull { field: String },
    Range { field: String, min: Option<f64>, max: Option<f64> },
    Pattern { field: String, regex: Regex },
    OneOf { field: String, values: Vec<String> },
    MinLength { field: String, min: usize },
    MaxLength { field: String, max: usize },
    LessOrEqual { left: String, right: String },
    NotInFuture { field: String, now: DateTime<Utc> },
}

/// A compiled rule from configuration
#[derive(Debug)]
pub struct ConfiguredRule {
    id: String,
    check: Check,
}

impl ConfiguredRule {
    fn error(&self, message: String) -> RuleEvaluationError {
        RuleEvaluationError {
            rule_id: self.id.clone(),
            message,
        }
    }

    fn type_error(&self, field: &str, expected: &str, found: &Value) -> RuleEvaluationError {
        self.error(format!(
            "field '{}' expected {}, found {:?}",
            field, expected, found
        ))
    }

    fn string_len(&self, field: &str, value: &Value) -> std::result::Result<usize, RuleEvaluationError> {
        value
            .as_str()
            .map(|s| s.chars().count())
            .ok_or_else(|| self.type_error(field, "string", value))
    }
}

impl Rule for ConfiguredRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn evaluate(&self, record: &Record) -> std::result::Result<bool, RuleEvaluationError> {
        match &self.check {
            Check::NotNull { field } => Ok(!record.is_null(field)),
            Check::Range { field, min, max } => {
                let value = record.get(field);
                if value.is_null() {
                    return Ok(true);
                }
                let n = value
                    .as_f64()
                    .ok_or_else(|| self.type_error(field, "number", value))?;
                Ok(min.map_or(true, |lo| n >= lo) && max.map_or(true, |hi| n <= hi))
            }
            Check::Pattern { field, regex } => match record.get(field) {
                Value::Null => Ok(true),
                Value::String(s) => Ok(regex.is_match(s)),
                other => Err(self.type_error(field, "string", other)),
            },
            Check::OneOf { field, values } => {
                let value = record.get(field);
                if value.is_null() {
                    return Ok(true);
                }
                let rendered = value.to_string();
                Ok(values.iter().any(|v| *v == rendered))
            }
            Check::MinLength { field, min } => {
                let value = record.get(field);
                if value.is_null() {
                    return Ok(true);
                }
                Ok(self.string_len(field, value)? >= *min)
            }
            Check::MaxLength { field, max } => {
                let value = record.get(field);
                if value.is_null() {
                    return Ok(true);
                }
                Ok(self.string_len(field, value)? <= *max)
            }
            Check::LessOrEqual { left, right } => {
                let (l, r) = (record.get(left), record.get(right));
                if l.is_null() || r.is_null() {
                    return Ok(true);
                }
                let ordering = match (l, r) {
                    (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                    (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
                    _ => match (l.as_f64(), r.as_f64()) {
                        (Some(a), Some(b)) => a.partial_cmp(&b),
                        _ => None,
                    },
                };
                ordering.map(|o| o != Ordering::Greater).ok_or_else(|| {
                    self.error(format!(
                        "fields '{}' and '{}' are not comparable: {:?} vs {:?}",
                        left, right, l, r
                    ))
                })
            }
            Check::NotInFuture { field, now } => match record.get(field) {
                Value::Null => Ok(true),
                Value::Timestamp(ts) => Ok(ts <= now),
                other => Err(self.type_error(field, "timestamp", other)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record() -> Record {
        Record::new("test_source", Utc::now())
            .with("title", "Backend Engineer")
            .with("employment_type", "full_time")
            .with("salary_min", 90_000i64)
            .with("salary_max", 120_000.0)
    }

    fn eval(config: RuleConfig, record: &Record) -> std::result::Result<bool, RuleEvaluationError> {
        config.build().unwrap().evaluate(record)
    }

    #[test]
    fn test_rules_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Rules {
            rules: Vec<RuleConfig>,
        }
        let parsed: Rules = toml::from_str(
            r#"
[[rules]]
id = "salary_ordered"
kind = "less_or_equal"
left = "salary_min"
right = "salary_max"

[[rules]]
id = "type_known"
kind = "one_of"
field = "employment_type"
values = ["full_time", "part_time", "contract"]
"#,
        )
        .unwrap();
        assert_eq!(parsed.rules.len(), 2);
        assert_eq!(parsed.rules[0].id(), "salary_ordered");
    }

    #[test]
    fn test_not_null() {
        let rule = RuleConfig::NotNull { id: "t".into(), field: "title".into() };
        assert!(eval(rule.clone(), &record()).unwrap());
        assert!(!eval(rule, &record().with("title", Value::Null)).unwrap());
    }

    #[test]
    fn test_range() {
        let rule = RuleConfig::Range {
            id: "salary".into(),
            field: "salary_min".into(),
            min: Some(0.0),
            max: Some(100_000.0),
        };
        assert!(eval(rule.clone(), &record()).unwrap());
        assert!(!eval(rule.clone(), &record().with("salary_min", -1i64)).unwrap());
        assert!(eval(rule.clone(), &record().with("salary_min", Value::Null)).unwrap());
        assert!(eval(rule, &record().with("salary_min", "ninety")).is_err());
    }

    #[test]
    fn test_range_rejects_inverted_bounds() {
        let rule = RuleConfig::Range {
            id: "bad".into(),
            field: "x".into(),
            min: Some(2.0),
            max: Some(1.0),
        };
        assert!(rule.build().is_err());
    }

    #[test]
    fn test_pattern() {
        let rule = RuleConfig::Pattern {
            id: "title_word".into(),
            field: "title".into(),
            regex: r"^[A-Z]\w+".into(),
        };
        assert!(eval(rule.clone(), &record()).unwrap());
        assert!(!eval(rule.clone(), &record().with("title", "lowercase")).unwrap());
        assert!(eval(rule, &record().with("title", 3i64)).is_err());

        let invalid = RuleConfig::Pattern { id: "x".into(), field: "f".into(), regex: "(".into() };
        assert!(matches!(invalid.build(), Err(EtlError::Config(_))));
    }

    #[test]
    fn test_one_of() {
        let rule = RuleConfig::OneOf {
            id: "type".into(),
            field: "employment_type".into(),
            values: vec!["full_time".into(), "contract".into()],
        };
        assert!(eval(rule.clone(), &record()).unwrap());
        assert!(!eval(rule, &record().with("employment_type", "intern")).unwrap());
    }

    #[test]
    fn test_lengths() {
        let min = RuleConfig::MinLength { id: "min".into(), field: "title".into(), min: 3 };
        let max = RuleConfig::MaxLength { id: "max".into(), field: "title".into(), max: 5 };
        assert!(eval(min.clone(), &record()).unwrap());
        assert!(!eval(min, &record().with("title", "QA")).unwrap());
        assert!(!eval(max.clone(), &record()).unwrap());
        assert!(eval(max, &record().with("title", "Chef")).unwrap());
    }

    #[test]
    fn test_less_or_equal() {
        let rule = RuleConfig::LessOrEqual {
            id: "ordered".into(),
            left: "salary_min".into(),
            right: "salary_max".into(),
        };
        assert!(eval(rule.clone(), &record()).unwrap());
        assert!(!eval(rule.clone(), &record().with("salary_min", 200_000i64)).unwrap());
        assert!(eval(rule.clone(), &record().with("salary_max", Value::Null)).unwrap());
        assert!(eval(rule, &record().with("salary_max", "lots")).is_err());
    }

    #[test]
    fn test_not_in_future() {
        let rule = RuleConfig::NotInFuture { id: "posted".into(), field: "posted_at".into() };
        let past = Utc::now() - Duration::days(2);
        let future = Utc::now() + Duration::days(2);
        assert!(eval(rule.clone(), &record().with("posted_at", past)).unwrap());
        assert!(!eval(rule.clone(), &record().with("posted_at", future)).unwrap());
        assert!(eval(rule.clone(), &record()).unwrap());
        assert!(eval(rule, &record().with("posted_at", "yesterday")).is_err());
    }
}
