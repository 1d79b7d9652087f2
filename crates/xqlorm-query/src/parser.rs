//! XQL phase parser
//!
//! Clauses are parsed by a state machine whose phases run in a fixed order:
//! Alias, From, Join, Where, Filter, Order, End. Each phase consumes the run
//! of tokens introduced by its keyword and returns the phase to move to; a
//! phase whose keyword is absent hands over immediately. The where clause is
//! validated for operand/operator order and stored as its token run, which
//! the SQL generator rewrites token by token.

use crate::lexer::{Keyword, Operator, Token, TokenKind, TokenStream, tokenize};
use crate::model::{
    AliasModel, FilterKind, FilterModel, FromModel, JoinCondition, JoinKind, JoinModel,
    OrderModel, PropertyRef, QueryModel,
};
use tracing::trace;
use xqlorm_core::{Error, Result};

/// Parser phases in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Alias,
    From,
    Join,
    Where,
    Filter,
    Order,
    End,
}

/// Sub-parser owning one phase
trait PhaseParser {
    /// Consume this phase's clause (if present) and return the next phase
    fn parse(&self, tokens: &mut TokenStream, model: &mut QueryModel) -> Result<Phase>;
}

struct AliasParser;
struct FromParser;
struct JoinParser;
struct WhereParser;
struct FilterParser;
struct OrderParser;

/// Parse XQL text into a new query model
pub fn parse(input: &str) -> Result<QueryModel> {
    let mut model = QueryModel::new();
    parse_into(input, &mut model)?;
    Ok(model)
}

/// Parse XQL text and append its clauses to an existing query model
pub fn parse_into(input: &str, model: &mut QueryModel) -> Result<()> {
    let tokens = tokenize(input)?;
    run(tokens, model)
}

/// Drive the phase machine over a token stream
pub fn run(mut tokens: TokenStream, model: &mut QueryModel) -> Result<()> {
    let mut phase = Phase::Alias;

    while phase != Phase::End && !tokens.is_exhausted() {
        let next = match phase {
            Phase::Alias => AliasParser.parse(&mut tokens, model)?,
            Phase::From => FromParser.parse(&mut tokens, model)?,
            Phase::Join => JoinParser.parse(&mut tokens, model)?,
            Phase::Where => WhereParser.parse(&mut tokens, model)?,
            Phase::Filter => FilterParser.parse(&mut tokens, model)?,
            Phase::Order => OrderParser.parse(&mut tokens, model)?,
            Phase::End => Phase::End,
        };
        trace!("Parser phase {:?} -> {:?}", phase, next);
        phase = next;
    }

    let rest = tokens.peek();
    if !rest.is_stop() {
        return Err(Error::syntax(format!("unexpected {rest}"), rest.position));
    }
    Ok(())
}

impl PhaseParser for AliasParser {
    fn parse(&self, tokens: &mut TokenStream, model: &mut QueryModel) -> Result<Phase> {
        if !tokens.peek().is_keyword(Keyword::Select) {
            return Ok(Phase::From);
        }
        tokens.advance();

        loop {
            let alias = expect_identifier(tokens, "alias")?;
            model.add_alias(AliasModel::new(&alias.text));
            if !consume(tokens, TokenKind::Comma) {
                break;
            }
        }
        Ok(Phase::From)
    }
}

impl PhaseParser for FromParser {
    fn parse(&self, tokens: &mut TokenStream, model: &mut QueryModel) -> Result<Phase> {
        if !tokens.peek().is_keyword(Keyword::From) {
            return Ok(Phase::Join);
        }
        tokens.advance();

        loop {
            let entity = expect_identifier(tokens, "entity name")?;
            let alias = if tokens.peek().kind == TokenKind::Identifier {
                tokens.advance().text
            } else {
                entity.text.clone()
            };
            model.add_from(FromModel::new(&entity.text, &alias));
            if !consume(tokens, TokenKind::Comma) {
                break;
            }
        }
        Ok(Phase::Join)
    }
}

impl PhaseParser for JoinParser {
    fn parse(&self, tokens: &mut TokenStream, model: &mut QueryModel) -> Result<Phase> {
        let kind = match tokens.peek().kind {
            TokenKind::Keyword(Keyword::Left) => Some(JoinKind::Left),
            TokenKind::Keyword(Keyword::Right) => Some(JoinKind::Right),
            TokenKind::Keyword(Keyword::Inner) => Some(JoinKind::Inner),
            TokenKind::Keyword(Keyword::Outer) => Some(JoinKind::Outer),
            TokenKind::Keyword(Keyword::Join) => None,
            _ => return Ok(Phase::Where),
        };
        if kind.is_some() {
            tokens.advance();
        }
        expect_keyword(tokens, Keyword::Join)?;

        let entity = expect_identifier(tokens, "entity name")?;
        let alias = expect_identifier(tokens, "join alias")?;
        expect_keyword(tokens, Keyword::On)?;

        let mut conditions = Vec::new();
        loop {
            let left = parse_property_ref(tokens)?;
            let op = tokens.advance();
            if !op.is_operator(Operator::Equal) {
                return Err(Error::syntax(
                    format!("expected '==' in join condition, found {op}"),
                    op.position,
                ));
            }
            let right = parse_property_ref(tokens)?;
            conditions.push(JoinCondition { left, right });

            if tokens.peek().is_operator(Operator::And) {
                tokens.advance();
            } else {
                break;
            }
        }

        model.add_join(JoinModel::new(
            kind.unwrap_or(JoinKind::Inner),
            &entity.text,
            &alias.text,
            conditions,
        ));

        match tokens.peek().kind {
            TokenKind::Keyword(k) if k.is_join_kind() => Ok(Phase::Join),
            _ => Ok(Phase::Where),
        }
    }
}

impl PhaseParser for WhereParser {
    fn parse(&self, tokens: &mut TokenStream, model: &mut QueryModel) -> Result<Phase> {
        if !tokens.peek().is_keyword(Keyword::Where) {
            return Ok(Phase::Filter);
        }
        let keyword = tokens.advance();

        let mut clause: Vec<Token> = Vec::new();
        loop {
            let next = tokens.peek();
            // A reserved word after '.' or ':' names a property or parameter
            let qualified = clause
                .last()
                .is_some_and(|t| matches!(t.kind, TokenKind::Dot | TokenKind::Colon));
            if next.is_stop()
                || (!qualified
                    && (next.is_keyword(Keyword::Filter) || next.is_keyword(Keyword::Order)))
            {
                break;
            }
            clause.push(tokens.advance());
        }

        if clause.is_empty() {
            return Err(Error::syntax("empty where clause", keyword.position));
        }

        let end = tokens.peek().position;
        ExpressionValidator::new(&clause, end).validate()?;

        for parameter in parameter_names(&clause) {
            model.declare_parameter(&parameter, None);
        }
        model.add_where(clause);
        Ok(Phase::Filter)
    }
}

impl PhaseParser for FilterParser {
    fn parse(&self, tokens: &mut TokenStream, model: &mut QueryModel) -> Result<Phase> {
        if !tokens.peek().is_keyword(Keyword::Filter) {
            return Ok(Phase::Order);
        }
        tokens.advance();

        let target = parse_property_ref(tokens)?;
        let op = tokens.advance();
        let kind = if op.is_keyword(Keyword::Like) || op.is_operator(Operator::Like) {
            FilterKind::Like
        } else if op.is_keyword(Keyword::Between) {
            FilterKind::Between
        } else {
            return Err(Error::syntax(
                format!("expected 'like' or 'between', found {op}"),
                op.position,
            ));
        };
        expect(tokens, TokenKind::Colon, "':'")?;
        let parameter = expect_name(tokens, "parameter name")?;

        let filter = FilterModel::new(kind, target, &parameter.text);
        for name in filter.parameter_names() {
            model.declare_parameter(&name, None);
        }
        model.add_filter(filter);

        if tokens.peek().is_keyword(Keyword::Filter) {
            Ok(Phase::Filter)
        } else {
            Ok(Phase::Order)
        }
    }
}

impl PhaseParser for OrderParser {
    fn parse(&self, tokens: &mut TokenStream, model: &mut QueryModel) -> Result<Phase> {
        if !tokens.peek().is_keyword(Keyword::Order) {
            return Ok(Phase::End);
        }
        tokens.advance();
        expect_keyword(tokens, Keyword::By)?;

        loop {
            let target = parse_property_ref(tokens)?;
            let descending = if tokens.peek().is_keyword(Keyword::Descending) {
                tokens.advance();
                true
            } else {
                if tokens.peek().is_keyword(Keyword::Ascending) {
                    tokens.advance();
                }
                false
            };
            model.add_order(OrderModel { target, descending });

            if !consume(tokens, TokenKind::Comma) {
                break;
            }
        }
        Ok(Phase::End)
    }
}

// ========== Token Helpers ==========

fn consume(tokens: &mut TokenStream, kind: TokenKind) -> bool {
    if tokens.peek().kind == kind {
        tokens.advance();
        true
    } else {
        false
    }
}

fn expect(tokens: &mut TokenStream, kind: TokenKind, what: &str) -> Result<Token> {
    let token = tokens.advance();
    if token.kind == kind {
        Ok(token)
    } else {
        Err(Error::syntax(
            format!("expected {what}, found {token}"),
            token.position,
        ))
    }
}

fn expect_keyword(tokens: &mut TokenStream, keyword: Keyword) -> Result<Token> {
    expect(
        tokens,
        TokenKind::Keyword(keyword),
        &format!("'{}'", keyword.as_str()),
    )
}

fn expect_identifier(tokens: &mut TokenStream, what: &str) -> Result<Token> {
    expect(tokens, TokenKind::Identifier, what)
}

/// Property and parameter names may reuse reserved words
fn expect_name(tokens: &mut TokenStream, what: &str) -> Result<Token> {
    let token = tokens.advance();
    if token.is_name() {
        Ok(token)
    } else {
        Err(Error::syntax(
            format!("expected {what}, found {token}"),
            token.position,
        ))
    }
}

fn parse_property_ref(tokens: &mut TokenStream) -> Result<PropertyRef> {
    let alias = expect_identifier(tokens, "alias")?;
    expect(tokens, TokenKind::Dot, "'.'")?;
    let property = expect_name(tokens, "property name")?;
    Ok(PropertyRef::new(&alias.text, &property.text))
}

/// Names of the `:parameter` markers in a token run, in order of appearance
pub(crate) fn parameter_names(tokens: &[Token]) -> Vec<String> {
    tokens
        .windows(2)
        .filter(|pair| pair[0].kind == TokenKind::Colon && pair[1].is_name())
        .map(|pair| pair[1].text.clone())
        .collect()
}

/// Checks operand/operator ordering of a where-clause token run.
///
/// ```text
/// expression := term (('&&' | '||') term)*
/// term       := ('not' | '!') term | '(' expression ')' | sum [binary sum]
/// sum        := operand ('%' operand)*
/// operand    := alias '.' property | ':' name | literal
/// binary     := '==' | '!=' | '>=' | '<=' | '>' | '<' | '%%' | 'like'
/// ```
pub(crate) struct ExpressionValidator<'a> {
    tokens: &'a [Token],
    pos: usize,
    end: usize,
}

impl<'a> ExpressionValidator<'a> {
    /// `end` is the source position reported when the run ends early
    pub(crate) fn new(tokens: &'a [Token], end: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            end,
        }
    }

    pub(crate) fn validate(mut self) -> Result<()> {
        self.expression()?;
        match self.tokens.get(self.pos) {
            None => Ok(()),
            Some(token) => Err(Error::syntax(
                format!("unexpected {token} in where clause"),
                token.position,
            )),
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next_token(&mut self) -> Result<&'a Token> {
        let token = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| Error::syntax("unexpected end of where clause", self.end))?;
        self.pos += 1;
        Ok(token)
    }

    fn expression(&mut self) -> Result<()> {
        self.term()?;
        while let Some(token) = self.peek() {
            match token.kind {
                TokenKind::Operator(op) if op.is_connective() => {
                    self.pos += 1;
                    self.term()?;
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn term(&mut self) -> Result<()> {
        let token = self
            .peek()
            .ok_or_else(|| Error::syntax("expected operand", self.end))?;

        match token.kind {
            TokenKind::Keyword(Keyword::Not) | TokenKind::Operator(Operator::Not) => {
                self.pos += 1;
                self.term()
            }
            TokenKind::LeftBracket => {
                self.pos += 1;
                self.expression()?;
                let close = self.next_token()?;
                if close.kind != TokenKind::RightBracket {
                    return Err(Error::syntax(
                        format!("expected ')', found {close}"),
                        close.position,
                    ));
                }
                Ok(())
            }
            _ => {
                self.operand()?;
                let mut compared = false;
                while let Some(token) = self.peek() {
                    let relational = match token.kind {
                        TokenKind::Operator(Operator::Modulo) => false,
                        TokenKind::Operator(op) if op.is_comparison() => true,
                        TokenKind::Keyword(Keyword::Like) => true,
                        _ => break,
                    };
                    // At most one comparison between connectives
                    if relational && compared {
                        return Err(Error::syntax(
                            format!("chained comparison at {token}, join with && or ||"),
                            token.position,
                        ));
                    }
                    compared |= relational;
                    self.pos += 1;
                    self.operand()?;
                }
                Ok(())
            }
        }
    }

    fn operand(&mut self) -> Result<()> {
        let token = self.next_token()?;
        match token.kind {
            TokenKind::Identifier => {
                let dot = self.next_token()?;
                if dot.kind != TokenKind::Dot {
                    return Err(Error::syntax(
                        format!("expected '.' after alias {token}"),
                        dot.position,
                    ));
                }
                let property = self.next_token()?;
                if !property.is_name() {
                    return Err(Error::syntax(
                        format!("expected property name, found {property}"),
                        property.position,
                    ));
                }
                Ok(())
            }
            TokenKind::Colon => {
                let name = self.next_token()?;
                if !name.is_name() {
                    return Err(Error::syntax(
                        format!("expected parameter name, found {name}"),
                        name.position,
                    ));
                }
                Ok(())
            }
            _ if token.is_literal() => Ok(()),
            _ => Err(Error::syntax(
                format!("expected operand, found {token}"),
                token.position,
            )),
        }
    }
}
