//! Error types for XQLORM
//!
//! A single error family covers the whole pipeline: tokenizing, parsing,
//! resolving, generating and executing queries under a unit of work.

use thiserror::Error;

/// Boxed error surfaced by a database-execution collaborator.
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The main error type for XQLORM operations
#[derive(Error, Debug)]
pub enum Error {
    // ========== Lexical Errors ==========
    #[error("Unterminated string literal at position {position}")]
    UnterminatedString { position: usize },

    #[error("Unpaired bracket at position {position}")]
    UnpairedBracket { position: usize },

    #[error("Malformed operator '{operator}' at position {position}")]
    MalformedOperator { operator: String, position: usize },

    #[error("Malformed numeric literal '{literal}' at position {position}")]
    MalformedNumber { literal: String, position: usize },

    #[error("Unexpected character '{character}' at position {position}")]
    UnexpectedCharacter { character: char, position: usize },

    // ========== Grammar / Semantic Errors ==========
    #[error("Syntax error at position {position}: {message}")]
    Syntax { message: String, position: usize },

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Unknown entity alias: {0}")]
    UnknownAlias(String),

    #[error("Unknown property '{property}' on entity {entity}")]
    UnknownProperty { entity: String, property: String },

    #[error("Invalid join alias: {0}")]
    InvalidJoinAlias(String),

    #[error("Duplicate alias: {0}")]
    DuplicateAlias(String),

    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("Missing value for parameter :{0}")]
    MissingParameter(String),

    // ========== Unit-of-Work Errors ==========
    #[error("Primary key of {0} is null")]
    PrimaryKeyNull(String),

    #[error("Reload failed: no {entity} record with primary key {key}")]
    ReloadNotFound { entity: String, key: String },

    #[error("Invalid value '{value}' for enum property {entity}.{property}")]
    InvalidEnumValue {
        entity: String,
        property: String,
        value: String,
    },

    #[error("Entity {0} is not watched")]
    NotWatched(String),

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    // ========== Serialization Errors ==========
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ========== Backend Errors ==========
    #[error("Database error during {operation}: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: BackendError,
    },
}

/// Result type alias for XQLORM operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap a collaborator failure raised while performing `operation`
    pub fn backend(operation: &'static str, source: BackendError) -> Self {
        Error::Backend { operation, source }
    }

    /// Shorthand for a syntax error at a source position
    pub fn syntax(message: impl Into<String>, position: usize) -> Self {
        Error::Syntax {
            message: message.into(),
            position,
        }
    }

    /// Shorthand for an unknown property on an entity
    pub fn unknown_property(entity: impl Into<String>, property: impl Into<String>) -> Self {
        Error::UnknownProperty {
            entity: entity.into(),
            property: property.into(),
        }
    }

    /// Returns true if this error was raised by the tokenizer
    pub fn is_lexical(&self) -> bool {
        matches!(
            self,
            Error::UnterminatedString { .. }
                | Error::UnpairedBracket { .. }
                | Error::MalformedOperator { .. }
                | Error::MalformedNumber { .. }
                | Error::UnexpectedCharacter { .. }
        )
    }

    /// Returns true if this error comes from parsing, resolving or generating a query
    pub fn is_grammar(&self) -> bool {
        matches!(
            self,
            Error::Syntax { .. }
                | Error::UnknownEntity(_)
                | Error::UnknownAlias(_)
                | Error::UnknownProperty { .. }
                | Error::InvalidJoinAlias(_)
                | Error::DuplicateAlias(_)
                | Error::UnsupportedFeature(_)
                | Error::MissingParameter(_)
        )
    }

    /// Returns true if this error aborted a persist, delete or reload call
    pub fn is_unit_of_work(&self) -> bool {
        matches!(
            self,
            Error::PrimaryKeyNull(_)
                | Error::ReloadNotFound { .. }
                | Error::InvalidEnumValue { .. }
                | Error::NotWatched(_)
                | Error::TypeMismatch { .. }
                | Error::Transaction(_)
        )
    }

    /// Returns true if this error wraps a database collaborator failure
    pub fn is_backend(&self) -> bool {
        matches!(self, Error::Backend { .. })
    }

    /// Source offset for lexical and syntax errors
    pub fn position(&self) -> Option<usize> {
        match self {
            Error::UnterminatedString { position }
            | Error::UnpairedBracket { position }
            | Error::MalformedOperator { position, .. }
            | Error::MalformedNumber { position, .. }
            | Error::UnexpectedCharacter { position, .. }
            | Error::Syntax { position, .. } => Some(*position),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = Error::UnknownAlias("u".to_string());
        assert_eq!(err.to_string(), "Unknown entity alias: u");

        let err = Error::unknown_property("User", "nickname");
        assert_eq!(err.to_string(), "Unknown property 'nickname' on entity User");
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::UnpairedBracket { position: 3 }.is_lexical());
        assert!(!Error::UnpairedBracket { position: 3 }.is_grammar());
        assert!(Error::DuplicateAlias("u".into()).is_grammar());
        assert!(Error::PrimaryKeyNull("User".into()).is_unit_of_work());
    }

    #[test]
    fn test_error_position() {
        assert_eq!(Error::syntax("unexpected token", 7).position(), Some(7));
        assert_eq!(
            Error::MalformedOperator {
                operator: "=".into(),
                position: 4
            }
            .position(),
            Some(4)
        );
        assert_eq!(Error::UnknownEntity("Foo".into()).position(), None);
    }

    #[test]
    fn test_backend_preserves_source() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "connection lost");
        let err = Error::backend("execute", Box::new(io));

        assert!(err.is_backend());
        assert!(err.to_string().contains("connection lost"));
        assert_eq!(err.source().map(|s| s.to_string()).as_deref(), Some("connection lost"));
    }
}
