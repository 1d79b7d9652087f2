//! Fluent query builder
//!
//! [`Query`] populates the same [`QueryModel`] the parser does, and [`Expr`]
//! emits the same token runs the tokenizer produces for equivalent where
//! text, so a fluent query and its textual form generate identical SQL.

use crate::lexer::{Keyword, Operator, Token, TokenKind};
use crate::model::{
    AliasModel, FilterKind, FilterModel, FromModel, JoinCondition, JoinKind, JoinModel,
    OrderModel, PropertyRef, QueryModel, ResolveModel, ResolveStrategy,
};
use crate::parser::{self, parameter_names};
use xqlorm_core::{Result, Value};

/// A where-clause expression built from code
///
/// Connectives are emitted in call order without implicit grouping, exactly
/// as if written in text; wrap sub-expressions with [`Expr::group`] to bind
/// them explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    tokens: Vec<Token>,
}

impl Expr {
    fn from_tokens(tokens: Vec<Token>) -> Self {
        Self { tokens }
    }

    /// `alias.property`
    pub fn prop(alias: &str, property: &str) -> Self {
        Self::from_tokens(vec![
            Token::identifier(alias),
            Token::separator(TokenKind::Dot),
            Token::identifier(property),
        ])
    }

    /// `:name`
    pub fn param(name: &str) -> Self {
        Self::from_tokens(vec![
            Token::separator(TokenKind::Colon),
            Token::identifier(name),
        ])
    }

    pub fn string(value: &str) -> Self {
        Self::from_tokens(vec![Token::new(TokenKind::String, value, 0)])
    }

    pub fn int(value: i64) -> Self {
        Self::from_tokens(vec![Token::new(TokenKind::Number, value.to_string(), 0)])
    }

    pub fn bool(value: bool) -> Self {
        let keyword = if value { Keyword::True } else { Keyword::False };
        Self::from_tokens(vec![Token::keyword(keyword)])
    }

    pub fn null() -> Self {
        Self::from_tokens(vec![Token::keyword(Keyword::Null)])
    }

    fn binary(mut self, op: Token, mut rhs: Expr) -> Self {
        self.tokens.push(op);
        self.tokens.append(&mut rhs.tokens);
        self
    }

    pub fn eq(self, rhs: Expr) -> Self {
        self.binary(Token::operator(Operator::Equal), rhs)
    }

    pub fn ne(self, rhs: Expr) -> Self {
        self.binary(Token::operator(Operator::NotEqual), rhs)
    }

    pub fn gt(self, rhs: Expr) -> Self {
        self.binary(Token::operator(Operator::Greater), rhs)
    }

    pub fn ge(self, rhs: Expr) -> Self {
        self.binary(Token::operator(Operator::GreaterEqual), rhs)
    }

    pub fn lt(self, rhs: Expr) -> Self {
        self.binary(Token::operator(Operator::Less), rhs)
    }

    pub fn le(self, rhs: Expr) -> Self {
        self.binary(Token::operator(Operator::LessEqual), rhs)
    }

    pub fn like(self, rhs: Expr) -> Self {
        self.binary(Token::keyword(Keyword::Like), rhs)
    }

    pub fn and(self, rhs: Expr) -> Self {
        self.binary(Token::operator(Operator::And), rhs)
    }

    pub fn or(self, rhs: Expr) -> Self {
        self.binary(Token::operator(Operator::Or), rhs)
    }

    /// `not <expr>`
    pub fn not(expr: Expr) -> Self {
        let mut tokens = vec![Token::keyword(Keyword::Not)];
        tokens.extend(expr.tokens);
        Self::from_tokens(tokens)
    }

    /// `( <expr> )`
    pub fn group(expr: Expr) -> Self {
        let mut tokens = vec![Token::separator(TokenKind::LeftBracket)];
        tokens.extend(expr.tokens);
        tokens.push(Token::separator(TokenKind::RightBracket));
        Self::from_tokens(tokens)
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn into_tokens(self) -> Vec<Token> {
        self.tokens
    }
}

/// Query under construction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    model: QueryModel,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a query from XQL text
    pub fn parse(text: &str) -> Result<Self> {
        Ok(Self {
            model: parser::parse(text)?,
        })
    }

    /// Parse further XQL clauses into this query
    pub fn append(mut self, text: &str) -> Result<Self> {
        parser::parse_into(text, &mut self.model)?;
        Ok(self)
    }

    pub fn select(mut self, alias: &str) -> Self {
        self.model.add_alias(AliasModel::new(alias));
        self
    }

    /// `from Entity`, aliased by the entity name
    pub fn from(self, entity: &str) -> Self {
        self.from_as(entity, entity)
    }

    pub fn from_as(mut self, entity: &str, alias: &str) -> Self {
        self.model.add_from(FromModel::new(entity, alias));
        self
    }

    /// Join `entity` under `alias` on `(left, right)` property pairs
    pub fn join(
        mut self,
        kind: JoinKind,
        entity: &str,
        alias: &str,
        on: &[(PropertyRef, PropertyRef)],
    ) -> Self {
        let conditions = on
            .iter()
            .map(|(left, right)| JoinCondition::new(left.clone(), right.clone()))
            .collect();
        self.model
            .add_join(JoinModel::new(kind, entity, alias, conditions));
        self
    }

    pub fn where_expr(mut self, expr: Expr) -> Self {
        let tokens = expr.into_tokens();
        for name in parameter_names(&tokens) {
            self.model.declare_parameter(&name, None);
        }
        self.model.add_where(tokens);
        self
    }

    /// Add another where group; groups are combined with `and`
    pub fn and_where(self, expr: Expr) -> Self {
        self.where_expr(expr)
    }

    pub fn filter_like(self, alias: &str, property: &str, parameter: &str) -> Self {
        self.filter(FilterKind::Like, alias, property, parameter)
    }

    /// Inclusive range filter bound to `<parameter>_min` and `<parameter>_max`
    pub fn filter_between(self, alias: &str, property: &str, parameter: &str) -> Self {
        self.filter(FilterKind::Between, alias, property, parameter)
    }

    fn filter(mut self, kind: FilterKind, alias: &str, property: &str, parameter: &str) -> Self {
        let filter = FilterModel::new(kind, PropertyRef::new(alias, property), parameter);
        for name in filter.parameter_names() {
            self.model.declare_parameter(&name, None);
        }
        self.model.add_filter(filter);
        self
    }

    pub fn order_by(mut self, alias: &str, property: &str, descending: bool) -> Self {
        self.model.add_order(OrderModel {
            target: PropertyRef::new(alias, property),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.model.set_limit(Some(limit));
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.model.set_offset(Some(offset));
        self
    }

    /// Request resolution of a relation property
    pub fn resolve(mut self, alias: &str, property: &str, strategy: ResolveStrategy) -> Self {
        self.model
            .add_resolve(ResolveModel::new(alias, property, strategy));
        self
    }

    pub fn set_parameter<V: Into<Value>>(mut self, name: &str, value: V) -> Self {
        self.model.set_parameter(name, value);
        self
    }

    /// Bind both ends of a between filter
    pub fn set_range<A: Into<Value>, B: Into<Value>>(mut self, name: &str, min: A, max: B) -> Self {
        self.model.set_parameter(&format!("{name}_min"), min);
        self.model.set_parameter(&format!("{name}_max"), max);
        self
    }

    pub fn model(&self) -> &QueryModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut QueryModel {
        &mut self.model
    }

    pub fn into_model(self) -> QueryModel {
        self.model
    }
}

impl From<QueryModel> for Query {
    fn from(model: QueryModel) -> Self {
        Self { model }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn kinds(tokens: &[Token]) -> Vec<(TokenKind, String)> {
        tokens.iter().map(|t| (t.kind, t.text.clone())).collect()
    }

    fn parsed(text: &str) -> Vec<Token> {
        let mut tokens: Vec<Token> = tokenize(text).unwrap().collect();
        tokens.pop();
        tokens
    }

    #[test]
    fn test_expr_matches_tokenizer() {
        let expr = Expr::prop("u", "age")
            .ge(Expr::param("age"))
            .and(Expr::not(Expr::group(
                Expr::prop("u", "name").like(Expr::string("a%")).or(Expr::prop("u", "active").eq(Expr::bool(true))),
            )))
            .and(Expr::prop("u", "deleted").ne(Expr::null()));

        let text = "u.age >= :age && not (u.name like 'a%' || u.active == true) && u.deleted != null";
        assert_eq!(kinds(expr.tokens()), kinds(&parsed(text)));
    }

    #[test]
    fn test_fluent_declares_parameters() {
        let query = Query::new()
            .from_as("User", "u")
            .where_expr(Expr::prop("u", "id").eq(Expr::param("id")))
            .filter_between("u", "born", "born")
            .set_range("born", "2000-01-01", "2000-12-31");

        let model = query.model();
        assert!(model.parameter("id").is_some());
        assert_eq!(
            model.parameter("born_min").and_then(|p| p.value.clone()),
            Some(Value::from("2000-01-01"))
        );
        assert!(model.parameter("born_max").is_some());
    }

    #[test]
    fn test_append_parses_into_existing_model() {
        let query = Query::new()
            .from_as("User", "u")
            .append("where u.id == :id order by u.name")
            .unwrap()
            .limit(10);

        assert_eq!(query.model().wheres().len(), 1);
        assert_eq!(query.model().orders().len(), 1);
        assert_eq!(query.model().limit(), Some(10));
    }

    #[test]
    fn test_from_defaults_alias() {
        let query = Query::new().from("User");
        assert_eq!(query.model().froms(), &[FromModel::new("User", "User")]);
    }
}
