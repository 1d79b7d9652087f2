//! Property values carried by entity records and bound to statements

use crate::error::{Error, Result};
use crate::metadata::DataType;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Named parameter values bound to a statement
pub type Parameters = BTreeMap<String, Value>;

/// A single result row, positionally aligned with the statement's columns
pub type Row = Vec<Value>;

/// A value stored in an entity property or bound to a statement parameter
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// Null/missing value
    #[default]
    Null,

    /// Boolean value
    Bool(bool),

    /// 64-bit signed integer
    Integer(i64),

    /// 64-bit floating point
    Numeric(f64),

    /// UTF-8 string (String, Text and Enum properties)
    String(String),

    /// UUID
    Uuid(Uuid),

    /// Calendar date
    Date(NaiveDate),

    /// Date and time without zone
    DateTime(NaiveDateTime),

    /// Structured value for Array and Object properties
    Json(serde_json::Value),
}

impl Value {
    /// Returns true if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as integer
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as float
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            Value::Numeric(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get as string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(j) => Some(j),
            _ => None,
        }
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Numeric(_) => "numeric",
            Value::String(_) => "string",
            Value::Uuid(_) => "uuid",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::Json(_) => "json",
        }
    }

    /// Convert a raw backend value into the representation of `data_type`.
    ///
    /// Null passes through unchanged. Array and Object properties expect a
    /// structured value here; string payloads are decoded by the serializer
    /// before coercion.
    pub fn coerce(self, data_type: &DataType) -> Result<Value> {
        if self.is_null() {
            return Ok(Value::Null);
        }

        let mismatch = |found: &Value| Error::TypeMismatch {
            expected: data_type.name().to_string(),
            found: found.type_name().to_string(),
        };

        match data_type {
            DataType::Bool => match self {
                Value::Bool(_) => Ok(self),
                Value::Integer(i) => Ok(Value::Bool(i != 0)),
                Value::String(ref s) => match s.as_str() {
                    "1" | "true" | "t" => Ok(Value::Bool(true)),
                    "0" | "false" | "f" => Ok(Value::Bool(false)),
                    _ => Err(mismatch(&self)),
                },
                other => Err(mismatch(&other)),
            },
            DataType::Integer => match self {
                Value::Integer(_) => Ok(self),
                Value::Numeric(f)
                    if f.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(&f) =>
                {
                    Ok(Value::Integer(f as i64))
                }
                Value::Bool(b) => Ok(Value::Integer(i64::from(b))),
                Value::String(ref s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|_| mismatch(&self)),
                other => Err(mismatch(&other)),
            },
            DataType::Numeric => match self {
                Value::Numeric(_) => Ok(self),
                Value::Integer(i) => Ok(Value::Numeric(i as f64)),
                Value::String(ref s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Numeric)
                    .map_err(|_| mismatch(&self)),
                other => Err(mismatch(&other)),
            },
            DataType::String | DataType::Text | DataType::Enum => match self {
                Value::String(_) => Ok(self),
                Value::Json(_) => Err(mismatch(&self)),
                other => Ok(Value::String(other.to_string())),
            },
            DataType::Uuid => match self {
                Value::Uuid(_) => Ok(self),
                Value::String(ref s) => Uuid::parse_str(s)
                    .map(Value::Uuid)
                    .map_err(|_| mismatch(&self)),
                other => Err(mismatch(&other)),
            },
            DataType::Date => match self {
                Value::Date(_) => Ok(self),
                Value::DateTime(dt) => Ok(Value::Date(dt.date())),
                Value::String(ref s) => parse_date(s).ok_or_else(|| mismatch(&self)),
                other => Err(mismatch(&other)),
            },
            DataType::DateTime => match self {
                Value::DateTime(_) => Ok(self),
                Value::Date(d) => Ok(d
                    .and_hms_opt(0, 0, 0)
                    .map(Value::DateTime)
                    .unwrap_or(Value::Null)),
                Value::String(ref s) => parse_datetime(s).ok_or_else(|| mismatch(&self)),
                other => Err(mismatch(&other)),
            },
            DataType::Array => match self {
                Value::Json(serde_json::Value::Array(_)) => Ok(self),
                other => Err(mismatch(&other)),
            },
            DataType::Object => match self {
                Value::Json(serde_json::Value::Object(_)) => Ok(self),
                other => Err(mismatch(&other)),
            },
            DataType::ManyToOne | DataType::OneToMany | DataType::ManyToMany => Ok(self),
        }
    }
}

fn parse_date(s: &str) -> Option<Value> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .ok()
        .map(Value::Date)
}

fn parse_datetime(s: &str) -> Option<Value> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .map(Value::DateTime)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Numeric(n) => write!(f, "{n}"),
            Value::String(s) => f.write_str(s),
            Value::Uuid(u) => write!(f, "{}", u.hyphenated()),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            Value::Json(j) => write!(f, "{j}"),
        }
    }
}

// Convenience From implementations
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Numeric(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
