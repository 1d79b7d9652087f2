//! XQLORM - XQL object-relational mapper core
//!
//! This is the main library crate that re-exports all XQLORM components.

pub use xqlorm_core as core;
pub use xqlorm_query as query;
pub use xqlorm_session as session;
pub use xqlorm_storage as storage;

// Re-export commonly used types
pub use xqlorm_core::{
    DataType, Dialect, DialectOptions, EntityModel, EntityRegistry, Error, PropertyModel,
    Result, StandardDialect, Value,
};

pub use xqlorm_query::{Expr, Query, ResolveStrategy, parse};
pub use xqlorm_session::{Entity, EntityManager, EntityState, EntityType, ManagerConfig, Record};
pub use xqlorm_storage::{Database, ScriptedDatabase};
