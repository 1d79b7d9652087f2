//! Query model
//!
//! The in-memory structure a query is compiled from. It is populated clause
//! by clause, by the phase parser or by the fluent [`crate::Query`] builder,
//! and read (never mutated) by the SQL generator. Alias references are only
//! checked when SQL is generated.

use crate::lexer::Token;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use xqlorm_core::{DataType, RelationKind, Value};

/// `alias.property` reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyRef {
    pub alias: String,
    pub property: String,
}

impl PropertyRef {
    pub fn new(alias: &str, property: &str) -> Self {
        Self {
            alias: alias.to_string(),
            property: property.to_string(),
        }
    }
}

impl fmt::Display for PropertyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.alias, self.property)
    }
}

/// An alias listed in the select clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasModel {
    pub alias: String,
}

impl AliasModel {
    pub fn new(alias: &str) -> Self {
        Self {
            alias: alias.to_string(),
        }
    }
}

/// An entity introduced by the from clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FromModel {
    pub entity: String,
    pub alias: String,
}

impl FromModel {
    pub fn new(entity: &str, alias: &str) -> Self {
        Self {
            entity: entity.to_string(),
            alias: alias.to_string(),
        }
    }
}

/// Join flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinKind {
    Left,
    Right,
    Inner,
    Outer,
}

impl JoinKind {
    pub fn sql(&self) -> &'static str {
        match self {
            JoinKind::Left => "left join",
            JoinKind::Right => "right join",
            JoinKind::Inner => "inner join",
            JoinKind::Outer => "full outer join",
        }
    }
}

/// One `left == right` pair of a join condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCondition {
    pub left: PropertyRef,
    pub right: PropertyRef,
}

impl JoinCondition {
    pub fn new(left: PropertyRef, right: PropertyRef) -> Self {
        Self { left, right }
    }
}

/// A joined entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinModel {
    pub kind: JoinKind,
    pub entity: String,
    pub alias: String,
    pub conditions: Vec<JoinCondition>,
}

impl JoinModel {
    pub fn new(kind: JoinKind, entity: &str, alias: &str, conditions: Vec<JoinCondition>) -> Self {
        Self {
            kind,
            entity: entity.to_string(),
            alias: alias.to_string(),
            conditions,
        }
    }
}

/// Kind of a named filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterKind {
    /// Case-insensitive pattern match against one parameter
    Like,
    /// Inclusive range against a `_min`/`_max` parameter pair
    Between,
}

/// A filter applied on top of the where clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterModel {
    pub kind: FilterKind,
    pub target: PropertyRef,
    pub parameter: String,
}

impl FilterModel {
    pub fn new(kind: FilterKind, target: PropertyRef, parameter: &str) -> Self {
        Self {
            kind,
            target,
            parameter: parameter.to_string(),
        }
    }

    /// Parameter names this filter binds
    pub fn parameter_names(&self) -> Vec<String> {
        match self.kind {
            FilterKind::Like => vec![self.parameter.clone()],
            FilterKind::Between => vec![self.min_parameter(), self.max_parameter()],
        }
    }

    pub fn min_parameter(&self) -> String {
        format!("{}_min", self.parameter)
    }

    pub fn max_parameter(&self) -> String {
        format!("{}_max", self.parameter)
    }
}

/// One order clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderModel {
    pub target: PropertyRef,
    pub descending: bool,
}

/// A named parameter with its declared type and bound value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterModel {
    pub name: String,
    pub data_type: Option<DataType>,
    pub value: Option<Value>,
}

impl ParameterModel {
    pub fn new(name: &str, data_type: Option<DataType>) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            value: None,
        }
    }
}

/// How a relation is fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolveStrategy {
    /// Deferred sub-query executed on first access
    Lazy,
    /// Joined into the current query
    Eager,
}

/// Binds a deferred-query parameter to a property of the owning entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterBinding {
    pub parameter: String,
    pub property: String,
}

/// A sub-query built once per relation and run per owning instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredQuery {
    pub kind: RelationKind,
    pub target: String,
    pub query: QueryModel,
    pub bindings: Vec<ParameterBinding>,
}

/// A relation-resolution directive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveModel {
    pub alias: String,
    pub property: String,
    pub strategy: ResolveStrategy,

    /// Assigned by the resolver; a directive with a relation kind is processed
    pub relation: Option<RelationKind>,

    /// Alias the target was joined under (eager)
    pub target_alias: Option<String>,

    /// Sub-query attached to loaded owners (lazy)
    pub deferred: Option<DeferredQuery>,
}

impl ResolveModel {
    pub fn new(alias: &str, property: &str, strategy: ResolveStrategy) -> Self {
        Self {
            alias: alias.to_string(),
            property: property.to_string(),
            strategy,
            relation: None,
            target_alias: None,
            deferred: None,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.relation.is_some()
    }
}

/// The complete model of one query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryModel {
    aliases: Vec<AliasModel>,
    froms: Vec<FromModel>,
    joins: Vec<JoinModel>,
    wheres: Vec<Vec<Token>>,
    filters: Vec<FilterModel>,
    orders: Vec<OrderModel>,
    parameters: BTreeMap<String, ParameterModel>,
    resolves: Vec<ResolveModel>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl QueryModel {
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Clause Fragments ==========

    pub fn add_alias(&mut self, alias: AliasModel) {
        self.aliases.push(alias);
    }

    pub fn add_from(&mut self, from: FromModel) {
        self.froms.push(from);
    }

    pub fn add_join(&mut self, join: JoinModel) {
        self.joins.push(join);
    }

    /// Append a validated where-clause token run (without the stop token)
    pub fn add_where(&mut self, tokens: Vec<Token>) {
        if !tokens.is_empty() {
            self.wheres.push(tokens);
        }
    }

    pub fn add_filter(&mut self, filter: FilterModel) {
        self.filters.push(filter);
    }

    pub fn add_order(&mut self, order: OrderModel) {
        self.orders.push(order);
    }

    pub fn add_resolve(&mut self, resolve: ResolveModel) {
        let exists = self
            .resolves
            .iter()
            .any(|r| r.alias == resolve.alias && r.property == resolve.property);
        if !exists {
            self.resolves.push(resolve);
        }
    }

    pub fn set_limit(&mut self, limit: Option<u64>) {
        self.limit = limit;
    }

    pub fn set_offset(&mut self, offset: Option<u64>) {
        self.offset = offset;
    }

    // ========== Parameters ==========

    /// Declare a parameter, keeping an earlier declared type
    pub fn declare_parameter(&mut self, name: &str, data_type: Option<DataType>) {
        let entry = self
            .parameters
            .entry(name.to_string())
            .or_insert_with(|| ParameterModel::new(name, None));
        if entry.data_type.is_none() {
            entry.data_type = data_type;
        }
    }

    /// Bind a value to a parameter, declaring it when unknown
    pub fn set_parameter<V: Into<Value>>(&mut self, name: &str, value: V) {
        self.parameters
            .entry(name.to_string())
            .or_insert_with(|| ParameterModel::new(name, None))
            .value = Some(value.into());
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterModel> {
        self.parameters.get(name)
    }

    pub fn parameters(&self) -> &BTreeMap<String, ParameterModel> {
        &self.parameters
    }

    // ========== Accessors ==========

    pub fn aliases(&self) -> &[AliasModel] {
        &self.aliases
    }

    pub fn froms(&self) -> &[FromModel] {
        &self.froms
    }

    pub fn joins(&self) -> &[JoinModel] {
        &self.joins
    }

    pub fn wheres(&self) -> &[Vec<Token>] {
        &self.wheres
    }

    pub fn filters(&self) -> &[FilterModel] {
        &self.filters
    }

    pub fn orders(&self) -> &[OrderModel] {
        &self.orders
    }

    pub fn resolves(&self) -> &[ResolveModel] {
        &self.resolves
    }

    pub fn resolves_mut(&mut self) -> &mut [ResolveModel] {
        &mut self.resolves
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Entity declared under `alias` by a from or join fragment
    pub fn entity_for_alias(&self, alias: &str) -> Option<&str> {
        self.froms
            .iter()
            .find(|f| f.alias == alias)
            .map(|f| f.entity.as_str())
            .or_else(|| {
                self.joins
                    .iter()
                    .find(|j| j.alias == alias)
                    .map(|j| j.entity.as_str())
            })
    }

    /// Aliases whose columns are selected: the select list, or every from
    /// alias when no select clause was given
    pub fn selected_aliases(&self) -> Vec<&str> {
        if self.aliases.is_empty() {
            self.froms.iter().map(|f| f.alias.as_str()).collect()
        } else {
            self.aliases.iter().map(|a| a.alias.as_str()).collect()
        }
    }
}
