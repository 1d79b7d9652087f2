//! XQLORM Core Library
//!
//! This crate provides the fundamental types shared by the query compiler and
//! the unit of work: values, entity metadata, the entity registry, SQL dialect
//! formatting and the error family.
//!
//! # Modules
//!
//! - `error` - Error types and result aliases
//! - `value` - Property values and parameter sets
//! - `metadata` - Entity and property models
//! - `registry` - Entity lookup by name, table and Rust type
//! - `id` - Primary-key text and watch identifiers
//! - `dialect` - SQL dialect formatters
//! - `serializer` - Storage form of Array/Object values

pub mod dialect;
pub mod error;
pub mod id;
pub mod metadata;
pub mod registry;
pub mod serializer;
pub mod value;

pub use dialect::{Dialect, DialectOptions, StandardDialect};
pub use error::{BackendError, Error, Result};
pub use id::{WatchId, primary_key_text};
pub use metadata::{
    Access, DataType, DefaultRule, EntityModel, LinkModel, PropertyModel, RelationKind,
    RelationModel,
};
pub use registry::EntityRegistry;
pub use serializer::{JsonSerializer, ValueSerializer};
pub use value::{Parameters, Row, Value};
