//! Scalar value type shared by literals, stored attributes and result rows.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// A scalar attribute value.
///
/// Covers the types an attribute can declare:
/// - Scalars: Bool, Int, Float, String
/// - Temporal: Date, Time, DateTime
/// - List: only produced for backend parameters (e.g. `= ANY($1)`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(DateTime<Utc>),
    List(Vec<Value>),
}

/// Declared type of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Bool,
    Int,
    Float,
    String,
    Date,
    Time,
    DateTime,
    /// Text restricted to a fixed set of member names.
    Enum(Vec<String>),
}

impl ValueType {
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Bool => "Boolean",
            ValueType::Int => "Integer",
            ValueType::Float => "Float",
            ValueType::String => "String",
            ValueType::Date => "Date",
            ValueType::Time => "Time",
            ValueType::DateTime => "DateTime",
            ValueType::Enum(_) => "Enum",
        }
    }

    /// True for types that `contains`/`startsWith`/`endsWith` accept.
    pub fn is_text(&self) -> bool {
        matches!(self, ValueType::String | ValueType::Enum(_))
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A literal could not be converted to the type of the field it is compared with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Failed to convert '{value}' of type '{source_type}' to type '{target_type}'.")]
pub struct CoercionError {
    pub value: String,
    pub source_type: &'static str,
    pub target_type: &'static str,
}

// ============================================================================
// Type checking
// ============================================================================

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Boolean",
            Value::Int(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Date(_) => "Date",
            Value::Time(_) => "Time",
            Value::DateTime(_) => "DateTime",
            Value::List(_) => "List",
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    /// Attempt to extract as i64
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Attempt to extract as f64
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Attempt to extract as &str
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Type an unquoted token: `null`, booleans, numbers and ISO dates are
    /// recognized, anything else stays text.
    pub fn infer(text: &str) -> Value {
        match text {
            "null" => return Value::Null,
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            _ => {}
        }
        if let Ok(i) = text.parse::<i64>() {
            return Value::Int(i);
        }
        if text.contains('.') {
            if let Ok(f) = text.parse::<f64>() {
                return Value::Float(f);
            }
        }
        if let Ok(d) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            return Value::Date(d);
        }
        Value::String(text.to_owned())
    }

    /// Convert this value into the declared type of a field.
    ///
    /// `null` is accepted by every type.
    pub fn coerce(self, target: &ValueType) -> Result<Value, CoercionError> {
        let fail = |v: &Value| CoercionError {
            value: v.to_plain_string(),
            source_type: v.type_name(),
            target_type: target.name(),
        };

        match (self, target) {
            (Value::Null, _) => Ok(Value::Null),

            (v @ Value::Bool(_), ValueType::Bool) => Ok(v),
            (v @ Value::Int(_), ValueType::Int) => Ok(v),
            (v @ Value::Float(_), ValueType::Float) => Ok(v),
            (v @ Value::String(_), ValueType::String) => Ok(v),
            (v @ Value::Date(_), ValueType::Date) => Ok(v),
            (v @ Value::Time(_), ValueType::Time) => Ok(v),
            (v @ Value::DateTime(_), ValueType::DateTime) => Ok(v),

            (Value::Int(i), ValueType::Float) => Ok(Value::Float(i as f64)),
            (Value::Float(f), ValueType::Int) if f.fract() == 0.0 => Ok(Value::Int(f as i64)),
            (Value::Date(d), ValueType::DateTime) => {
                Ok(Value::DateTime(d.and_time(NaiveTime::MIN).and_utc()))
            }
            (v @ (Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Date(_)), ValueType::String) => {
                Ok(Value::String(v.to_plain_string()))
            }

            (Value::String(s), ValueType::Bool) => match s.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(fail(&Value::String(s))),
            },
            (Value::String(s), ValueType::Int) => {
                s.trim().parse().map(Value::Int).map_err(|_| fail(&Value::String(s)))
            }
            (Value::String(s), ValueType::Float) => {
                s.trim().parse().map(Value::Float).map_err(|_| fail(&Value::String(s)))
            }
            (Value::String(s), ValueType::Date) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| fail(&Value::String(s))),
            (Value::String(s), ValueType::Time) => NaiveTime::parse_from_str(&s, "%H:%M:%S%.f")
                .map(Value::Time)
                .map_err(|_| fail(&Value::String(s))),
            (Value::String(s), ValueType::DateTime) => parse_date_time(&s)
                .map(Value::DateTime)
                .ok_or_else(|| fail(&Value::String(s))),
            (v @ (Value::String(_) | Value::Int(_)), ValueType::Enum(members)) => {
                let text = v.to_plain_string();
                members
                    .iter()
                    .find(|m| m.eq_ignore_ascii_case(&text))
                    .map(|m| Value::String(m.clone()))
                    .ok_or_else(|| fail(&v))
            }

            (v, _) => Err(fail(&v)),
        }
    }

    /// Text form without quoting, as written in a query string.
    pub fn to_plain_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::DateTime(dt) => dt.to_rfc3339(),
            other => other.to_string(),
        }
    }
}

fn parse_date_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

// ============================================================================
// Conversions (From impls)
// ============================================================================

impl From<bool> for Value { fn from(v: bool) -> Self { Value::Bool(v) } }
impl From<i32> for Value { fn from(v: i32) -> Self { Value::Int(v as i64) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Value::Int(v) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Value::Float(v) } }
impl From<String> for Value { fn from(v: String) -> Self { Value::String(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Value::String(v.to_owned()) } }
impl From<NaiveDate> for Value { fn from(v: NaiveDate) -> Self { Value::Date(v) } }
impl From<DateTime<Utc>> for Value { fn from(v: DateTime<Utc>) -> Self { Value::DateTime(v) } }
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self { v.map(Into::into).unwrap_or(Value::Null) }
}

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Date(d) => write!(f, "{d}"),
            Value::Time(t) => write!(f, "{t}"),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}

// ============================================================================
// Comparison
// ============================================================================

impl Value {
    /// Typed comparison. Returns None for null or incompatible types.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::Date(a), Value::Date(b)) => a.partial_cmp(b),
            (Value::Time(a), Value::Time(b)) => a.partial_cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.partial_cmp(b),
            (Value::Date(a), Value::DateTime(b)) => {
                a.and_time(NaiveTime::MIN).and_utc().partial_cmp(b)
            }
            (Value::DateTime(a), Value::Date(b)) => {
                a.partial_cmp(&b.and_time(NaiveTime::MIN).and_utc())
            }
            _ => None,
        }
    }

    /// Total order used for sorting: nulls first, incompatible values equal.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }
}
