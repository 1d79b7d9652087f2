//! XQL Query Compiler
//!
//! Turns XQL text or fluent builder calls into parameterized SQL.
//!
//! # Overview
//!
//! The compiler implements:
//! - A logos-based tokenizer with source positions
//! - A phase-sequenced clause parser
//! - A fluent query and expression builder
//! - Lazy and eager relation resolution
//! - SQL generation for select, count, insert, update and delete

pub mod generator;
pub mod lexer;
pub mod model;
pub mod parser;
pub mod query;
pub mod resolver;

pub use generator::{
    EntityStatements, KEY_PARAMETER_PREFIX, SqlGenerator, Statement, StatementCache,
    StatementParameters,
};
pub use lexer::{Keyword, Operator, Token, TokenKind, TokenStream, tokenize};
pub use model::{
    AliasModel, DeferredQuery, FilterKind, FilterModel, FromModel, JoinCondition, JoinKind,
    JoinModel, OrderModel, ParameterBinding, ParameterModel, PropertyRef, QueryModel,
    ResolveModel, ResolveStrategy,
};
pub use parser::{Phase, parse, parse_into};
pub use query::{Expr, Query};
pub use resolver::RelationResolver;
