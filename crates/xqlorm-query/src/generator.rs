//! SQL generation
//!
//! Compiles a resolved [`QueryModel`] into parameterized SQL. Every alias
//! referenced by the query is checked against the alias scope built while
//! emitting the from and join clauses. Insert, update and delete statements
//! depend only on the entity model and are memoized in a [`StatementCache`].

use crate::lexer::{Keyword, Operator, Token, TokenKind};
use crate::model::{FilterKind, FilterModel, PropertyRef, QueryModel};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::debug;
use xqlorm_core::{DataType, Dialect, EntityModel, EntityRegistry, Error, Result};

/// Prefix of the parameters carrying primary-key values in update and
/// delete statements
pub const KEY_PARAMETER_PREFIX: &str = "pk_";

/// Parameter names referenced by a statement with their inferred types
pub type StatementParameters = BTreeMap<String, Option<DataType>>;

/// Generated SQL with the parameters it references
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,

    /// Parameters referenced by the SQL
    pub parameters: StatementParameters,

    /// Selected `alias.property` per result column, in column order
    pub columns: Vec<PropertyRef>,
}

impl Statement {
    fn new(sql: String, parameters: StatementParameters) -> Self {
        Self {
            sql,
            parameters,
            columns: Vec::new(),
        }
    }
}

/// Write statements of one entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityStatements {
    pub insert: Statement,
    pub update: Statement,
    pub delete: Statement,
}

/// Aliases visible to a query, in declaration order
struct Scope {
    entities: HashMap<String, Arc<EntityModel>>,
}

impl Scope {
    fn entity(&self, alias: &str) -> Result<&Arc<EntityModel>> {
        self.entities
            .get(alias)
            .ok_or_else(|| Error::UnknownAlias(alias.to_string()))
    }
}

/// Builds SQL text with single spaces between words and none inside brackets
#[derive(Default)]
struct SqlWriter {
    buf: String,
}

impl SqlWriter {
    fn word(&mut self, word: &str) {
        if !self.buf.is_empty() && !self.buf.ends_with('(') {
            self.buf.push(' ');
        }
        self.buf.push_str(word);
    }

    fn close(&mut self) {
        self.buf.push(')');
    }

    fn finish(self) -> String {
        self.buf
    }
}

/// Compiles query models and entity models into SQL
pub struct SqlGenerator<'a> {
    registry: &'a EntityRegistry,
    dialect: &'a dyn Dialect,
}

impl<'a> SqlGenerator<'a> {
    pub fn new(registry: &'a EntityRegistry, dialect: &'a dyn Dialect) -> Self {
        Self { registry, dialect }
    }

    /// Select statement, paginated when the model carries a limit or offset
    pub fn select(&self, model: &QueryModel) -> Result<Statement> {
        let (scope, source) = self.source(model)?;
        let mut parameters = StatementParameters::new();

        let mut columns = Vec::new();
        let mut fields = Vec::new();
        for alias in model.selected_aliases() {
            let entity = scope.entity(alias)?;
            for property in entity.stored_properties() {
                fields.push(format!("{alias}.{}", property.field));
                columns.push(PropertyRef::new(alias, &property.name));
            }
        }

        let mut sql = format!("select {} {source}", fields.join(", "));
        self.append_predicates(&mut sql, model, &scope, &mut parameters)?;

        if !model.orders().is_empty() {
            let orders = model
                .orders()
                .iter()
                .map(|order| {
                    let (column, _) = self.column(&scope, &order.target)?;
                    Ok(if order.descending {
                        format!("{column} desc")
                    } else {
                        column
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" order by ");
            sql.push_str(&orders.join(", "));
        }

        if model.limit().is_some() || model.offset().is_some() {
            sql = self.dialect.paginate(&sql, model.limit(), model.offset());
        }

        debug!("Generated select: {}", sql);
        Ok(Statement {
            sql,
            parameters: declared_types(model, parameters),
            columns,
        })
    }

    /// `select count(*)` over the same source and predicates, unpaginated
    pub fn count(&self, model: &QueryModel) -> Result<Statement> {
        let (scope, source) = self.source(model)?;
        let mut parameters = StatementParameters::new();

        let mut sql = format!("select count(*) {source}");
        self.append_predicates(&mut sql, model, &scope, &mut parameters)?;

        debug!("Generated count: {}", sql);
        Ok(Statement::new(sql, declared_types(model, parameters)))
    }

    /// Insert of every insertable stored property
    pub fn insert(&self, entity: &EntityModel) -> Statement {
        let mut fields = Vec::new();
        let mut values = Vec::new();
        let mut parameters = StatementParameters::new();

        for property in entity.insertable_properties() {
            fields.push(property.field.clone());
            values.push(self.dialect.parameter(&property.name));
            parameters.insert(property.name.clone(), Some(property.data_type.clone()));
        }

        let sql = format!(
            "insert into {} ({}) values ({})",
            entity.table,
            fields.join(", "),
            values.join(", ")
        );
        Statement::new(sql, parameters)
    }

    /// Update of every updatable stored property keyed by the primary key
    pub fn update(&self, entity: &EntityModel) -> Statement {
        let mut parameters = StatementParameters::new();
        let assignments: Vec<String> = entity
            .updatable_properties()
            .map(|property| {
                parameters.insert(property.name.clone(), Some(property.data_type.clone()));
                format!("{} = {}", property.field, self.dialect.parameter(&property.name))
            })
            .collect();

        let sql = format!(
            "update {} set {} where {}",
            entity.table,
            assignments.join(", "),
            self.key_condition(entity, &mut parameters)
        );
        Statement::new(sql, parameters)
    }

    /// Delete keyed by the primary key
    pub fn delete(&self, entity: &EntityModel) -> Statement {
        let mut parameters = StatementParameters::new();
        let sql = format!(
            "delete from {} where {}",
            entity.table,
            self.key_condition(entity, &mut parameters)
        );
        Statement::new(sql, parameters)
    }

    /// All write statements of an entity
    pub fn entity_statements(&self, entity: &EntityModel) -> EntityStatements {
        EntityStatements {
            insert: self.insert(entity),
            update: self.update(entity),
            delete: self.delete(entity),
        }
    }

    fn key_condition(&self, entity: &EntityModel, parameters: &mut StatementParameters) -> String {
        entity
            .primary_key_properties()
            .map(|property| {
                let name = format!("{KEY_PARAMETER_PREFIX}{}", property.name);
                let condition = format!("{} = {}", property.field, self.dialect.parameter(&name));
                parameters.insert(name, Some(property.data_type.clone()));
                condition
            })
            .collect::<Vec<_>>()
            .join(" and ")
    }

    /// `from ... join ...` with the alias scope it introduces
    fn source(&self, model: &QueryModel) -> Result<(Scope, String)> {
        if model.froms().is_empty() {
            return Err(Error::syntax("query has no from clause", 0));
        }

        let mut scope = Scope {
            entities: HashMap::new(),
        };
        let mut froms = Vec::new();
        for from in model.froms() {
            let entity = self.registry.entity(&from.entity)?;
            froms.push(format!("{} {}", entity.table, from.alias));
            if scope.entities.insert(from.alias.clone(), entity).is_some() {
                return Err(Error::DuplicateAlias(from.alias.clone()));
            }
        }
        let mut sql = format!("from {}", froms.join(", "));

        for join in model.joins() {
            if scope.entities.contains_key(&join.alias) {
                return Err(Error::DuplicateAlias(join.alias.clone()));
            }
            let entity = self.registry.entity(&join.entity)?;
            sql.push_str(&format!(" {} {} {}", join.kind.sql(), entity.table, join.alias));
            scope.entities.insert(join.alias.clone(), entity);

            let conditions = join
                .conditions
                .iter()
                .map(|condition| {
                    let left = self.join_column(&scope, &condition.left)?;
                    let right = self.join_column(&scope, &condition.right)?;
                    Ok(format!("{left} = {right}"))
                })
                .collect::<Result<Vec<_>>>()?;
            if !conditions.is_empty() {
                sql.push_str(" on ");
                sql.push_str(&conditions.join(" and "));
            }
        }

        Ok((scope, sql))
    }

    fn join_column(&self, scope: &Scope, target: &PropertyRef) -> Result<String> {
        if !scope.entities.contains_key(&target.alias) {
            return Err(Error::InvalidJoinAlias(target.alias.clone()));
        }
        Ok(self.column(scope, target)?.0)
    }

    /// Column expression and data type of `alias.property`
    ///
    /// A many-to-one relation with a single link compares through its local
    /// foreign-key property.
    fn column(&self, scope: &Scope, target: &PropertyRef) -> Result<(String, DataType)> {
        let entity = scope.entity(&target.alias)?;
        let mut property = entity.require(&target.property)?;

        if property.is_relation() {
            property = match property.relation.as_ref() {
                Some(relation) if relation.links.len() == 1 => {
                    entity.require(&relation.links[0].local)?
                }
                _ => {
                    return Err(Error::UnsupportedFeature(format!(
                        "relation {target} has no single column to compare"
                    )));
                }
            };
        }
        if property.is_calculated() {
            return Err(Error::UnsupportedFeature(format!(
                "calculated property {target} has no column"
            )));
        }

        Ok((
            format!("{}.{}", target.alias, property.field),
            property.data_type.clone(),
        ))
    }

    fn append_predicates(
        &self,
        sql: &mut String,
        model: &QueryModel,
        scope: &Scope,
        parameters: &mut StatementParameters,
    ) -> Result<()> {
        let mut predicates = Vec::new();
        for clause in model.wheres() {
            let rendered = self.render_where(clause, scope, parameters)?;
            predicates.push(format!("({rendered})"));
        }
        for filter in model.filters() {
            predicates.push(self.render_filter(filter, scope, parameters)?);
        }

        if !predicates.is_empty() {
            sql.push_str(" where ");
            sql.push_str(&predicates.join(" and "));
        }
        Ok(())
    }

    /// Rewrite a validated where-clause token run into SQL
    fn render_where(
        &self,
        tokens: &[Token],
        scope: &Scope,
        parameters: &mut StatementParameters,
    ) -> Result<String> {
        let mut out = SqlWriter::default();
        // Type of the property most recently compared, for parameter inference
        let mut compared: Option<DataType> = None;
        // Null test written after the operand of a leading `null ==`
        let mut null_test: Option<&'static str> = None;
        let mut i = 0;

        while i < tokens.len() {
            let token = &tokens[i];
            let next = tokens.get(i + 1);
            let mut step = 1;
            let mut operand = false;

            match token.kind {
                TokenKind::Identifier if next.is_some_and(|t| t.kind == TokenKind::Dot) => {
                    let property = tokens
                        .get(i + 2)
                        .filter(|t| t.is_name())
                        .ok_or_else(|| Error::syntax("expected property name", token.position))?;
                    let (column, data_type) =
                        self.column(scope, &PropertyRef::new(&token.text, &property.text))?;
                    out.word(&column);
                    compared = Some(data_type);
                    step = 3;
                    operand = true;
                }
                TokenKind::Colon => {
                    let name = next
                        .filter(|t| t.is_name())
                        .ok_or_else(|| Error::syntax("expected parameter name", token.position))?;
                    out.word(&self.dialect.parameter(&name.text));
                    register(parameters, &name.text, compared.clone());
                    step = 2;
                    operand = true;
                }
                TokenKind::Operator(op @ (Operator::Equal | Operator::NotEqual))
                    if next.is_some_and(|t| t.is_keyword(Keyword::Null)) =>
                {
                    out.word(null_keyword(op));
                    step = 2;
                }
                TokenKind::Keyword(Keyword::Null)
                    if null_test.is_none()
                        && tokens.get(i + 2).is_some_and(|t| !t.is_keyword(Keyword::Null)) =>
                {
                    match next.map(|t| &t.kind) {
                        Some(TokenKind::Operator(op @ (Operator::Equal | Operator::NotEqual))) => {
                            null_test = Some(null_keyword(*op));
                            step = 2;
                        }
                        _ => out.word("null"),
                    }
                }
                TokenKind::Operator(op) => {
                    out.word(sql_operator(op));
                    if op.is_connective() {
                        compared = None;
                    }
                }
                TokenKind::Keyword(Keyword::Not) => out.word("not"),
                TokenKind::Keyword(Keyword::Like) => out.word("like"),
                TokenKind::Keyword(Keyword::True) => {
                    out.word(&self.dialect.bool_literal(true));
                    operand = true;
                }
                TokenKind::Keyword(Keyword::False) => {
                    out.word(&self.dialect.bool_literal(false));
                    operand = true;
                }
                TokenKind::Keyword(Keyword::Null) => out.word("null"),
                TokenKind::String => {
                    out.word(&quote(&token.text));
                    operand = true;
                }
                TokenKind::Number => {
                    out.word(&token.text);
                    operand = true;
                }
                TokenKind::LeftBracket => {
                    out.word("(");
                    compared = None;
                }
                TokenKind::RightBracket => out.close(),
                _ => {
                    return Err(Error::syntax(
                        format!("unexpected {token} in where clause"),
                        token.position,
                    ));
                }
            }

            if operand {
                if let Some(test) = null_test.take() {
                    out.word(test);
                }
            }
            i += step;
        }

        Ok(out.finish())
    }

    fn render_filter(
        &self,
        filter: &FilterModel,
        scope: &Scope,
        parameters: &mut StatementParameters,
    ) -> Result<String> {
        let (column, data_type) = self.column(scope, &filter.target)?;

        match filter.kind {
            FilterKind::Like => {
                let expression = match data_type {
                    DataType::Date => self.dialect.date_to_text(&column),
                    DataType::DateTime => self.dialect.datetime_to_text(&column),
                    _ => column,
                };
                register(parameters, &filter.parameter, Some(DataType::String));
                Ok(format!(
                    "{} like {}",
                    self.dialect.upper(&expression),
                    self.dialect.upper(&self.dialect.parameter(&filter.parameter))
                ))
            }
            FilterKind::Between => {
                let min = filter.min_parameter();
                let max = filter.max_parameter();
                let predicate = format!(
                    "({column} >= {} and {column} <= {})",
                    self.dialect.parameter(&min),
                    self.dialect.parameter(&max)
                );
                register(parameters, &min, Some(data_type.clone()));
                register(parameters, &max, Some(data_type));
                Ok(predicate)
            }
        }
    }
}

fn null_keyword(op: Operator) -> &'static str {
    if op == Operator::Equal {
        "is null"
    } else {
        "is not null"
    }
}

fn sql_operator(op: Operator) -> &'static str {
    match op {
        Operator::Equal => "=",
        Operator::NotEqual => "<>",
        Operator::GreaterEqual => ">=",
        Operator::LessEqual => "<=",
        Operator::Greater => ">",
        Operator::Less => "<",
        Operator::And => "and",
        Operator::Or => "or",
        Operator::Not => "not",
        Operator::Like => "like",
        Operator::Modulo => "%",
    }
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Record a parameter, keeping the first known type
fn register(parameters: &mut StatementParameters, name: &str, data_type: Option<DataType>) {
    let entry = parameters.entry(name.to_string()).or_insert(None);
    if entry.is_none() {
        *entry = data_type;
    }
}

/// Types declared on the model take precedence over inferred ones
fn declared_types(model: &QueryModel, mut parameters: StatementParameters) -> StatementParameters {
    for (name, data_type) in parameters.iter_mut() {
        if let Some(declared) = model.parameter(name).and_then(|p| p.data_type.clone()) {
            *data_type = Some(declared);
        }
    }
    parameters
}

/// Insert, update and delete statements memoized per entity name
///
/// Entries are built on first use and never invalidated; a cache serves a
/// single dialect.
#[derive(Debug, Default)]
pub struct StatementCache {
    entries: RwLock<HashMap<String, Arc<EntityStatements>>>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached statements of `entity`, generated on first request
    pub fn statements(&self, generator: &SqlGenerator<'_>, entity: &EntityModel) -> Arc<EntityStatements> {
        {
            let entries = self
                .entries
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(statements) = entries.get(&entity.name) {
                return statements.clone();
            }
        }

        let statements = Arc::new(generator.entity_statements(entity));
        debug!(
            "Cached write statements for {}: {}",
            entity.name, statements.insert.sql
        );
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(entity.name.clone())
            .or_insert(statements)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
