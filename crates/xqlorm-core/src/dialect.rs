//! SQL dialect formatting
//!
//! The database collaborator supplies a [`Dialect`] so that the generator can
//! emit boolean literals, case-insensitive comparisons, date casts and
//! pagination in the target's syntax, and so that bound values are formatted
//! the way the backend expects them.

use crate::value::Value;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use tracing::warn;

const ISO_DATE: &str = "%Y-%m-%d";
const ISO_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

/// Dialect-specific formatters used by the SQL generator and the entity manager
pub trait Dialect: Send + Sync {
    /// Literal for a boolean in generated SQL
    fn bool_literal(&self, value: bool) -> String;

    /// Storage representation of a date value
    fn format_date(&self, date: NaiveDate) -> String;

    /// Storage representation of a datetime value
    fn format_datetime(&self, datetime: NaiveDateTime) -> String;

    /// Wrap an expression in an upper-case conversion
    fn upper(&self, expression: &str) -> String;

    /// Render a date-typed expression as text
    fn date_to_text(&self, expression: &str) -> String;

    /// Render a datetime-typed expression as text
    fn datetime_to_text(&self, expression: &str) -> String;

    /// Placeholder for a named parameter
    fn parameter(&self, name: &str) -> String {
        format!(":{name}")
    }

    /// Append pagination to a select statement
    fn paginate(&self, sql: &str, limit: Option<u64>, offset: Option<u64>) -> String {
        let mut out = sql.to_string();
        if let Some(limit) = limit {
            out.push_str(&format!(" limit {limit}"));
        }
        if let Some(offset) = offset {
            out.push_str(&format!(" offset {offset}"));
        }
        out
    }

    /// Convert a value into the form handed to the backend
    fn bind_value(&self, value: &Value) -> Value {
        match value {
            Value::Bool(b) => Value::Integer(i64::from(*b)),
            Value::Date(d) => Value::String(self.format_date(*d)),
            Value::DateTime(dt) => Value::String(self.format_datetime(*dt)),
            other => other.clone(),
        }
    }
}

/// Options of the [`StandardDialect`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialectOptions {
    /// Literal emitted for `true`
    pub true_literal: String,

    /// Literal emitted for `false`
    pub false_literal: String,

    /// chrono pattern used to format bound dates
    pub date_format: String,

    /// chrono pattern used to format bound datetimes
    pub datetime_format: String,

    /// SQL function used for case-insensitive comparison
    pub upper_function: String,

    /// SQL function converting a date/datetime column to text
    pub to_text_function: String,

    /// Pattern argument passed to `to_text_function` for dates
    pub date_pattern: String,

    /// Pattern argument passed to `to_text_function` for datetimes
    pub datetime_pattern: String,
}

impl Default for DialectOptions {
    fn default() -> Self {
        Self {
            true_literal: "1".to_string(),
            false_literal: "0".to_string(),
            date_format: ISO_DATE.to_string(),
            datetime_format: ISO_DATETIME.to_string(),
            upper_function: "upper".to_string(),
            to_text_function: "to_char".to_string(),
            date_pattern: "YYYY-MM-DD".to_string(),
            datetime_pattern: "YYYY-MM-DD HH24:MI:SS".to_string(),
        }
    }
}

impl DialectOptions {
    /// Builder: set boolean literals
    pub fn booleans(mut self, true_literal: &str, false_literal: &str) -> Self {
        self.true_literal = true_literal.to_string();
        self.false_literal = false_literal.to_string();
        self
    }

    /// Builder: set the upper-case function
    pub fn upper_function(mut self, name: &str) -> Self {
        self.upper_function = name.to_string();
        self
    }

    /// Builder: set the to-text function and its date/datetime patterns
    pub fn to_text(mut self, function: &str, date_pattern: &str, datetime_pattern: &str) -> Self {
        self.to_text_function = function.to_string();
        self.date_pattern = date_pattern.to_string();
        self.datetime_pattern = datetime_pattern.to_string();
        self
    }
}

/// Configurable dialect covering the common `upper`/`to_char` family
#[derive(Debug, Clone, Default)]
pub struct StandardDialect {
    options: DialectOptions,
}

impl StandardDialect {
    pub fn new(options: DialectOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DialectOptions {
        &self.options
    }
}

impl Dialect for StandardDialect {
    fn bool_literal(&self, value: bool) -> String {
        if value {
            self.options.true_literal.clone()
        } else {
            self.options.false_literal.clone()
        }
    }

    fn format_date(&self, date: NaiveDate) -> String {
        let mut out = String::new();
        if write!(out, "{}", date.format(&self.options.date_format)).is_err() {
            warn!("Invalid date format {:?}, using ISO 8601", self.options.date_format);
            return date.format(ISO_DATE).to_string();
        }
        out
    }

    fn format_datetime(&self, datetime: NaiveDateTime) -> String {
        let mut out = String::new();
        if write!(out, "{}", datetime.format(&self.options.datetime_format)).is_err() {
            warn!(
                "Invalid datetime format {:?}, using ISO 8601",
                self.options.datetime_format
            );
            return datetime.format(ISO_DATETIME).to_string();
        }
        out
    }

    fn upper(&self, expression: &str) -> String {
        format!("{}({expression})", self.options.upper_function)
    }

    fn date_to_text(&self, expression: &str) -> String {
        format!(
            "{}({expression}, '{}')",
            self.options.to_text_function, self.options.date_pattern
        )
    }

    fn datetime_to_text(&self, expression: &str) -> String {
        format!(
            "{}({expression}, '{}')",
            self.options.to_text_function, self.options.datetime_pattern
        )
    }
}
