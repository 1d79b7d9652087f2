//! XQL tokenizer using logos
//!
//! Produces a finite token sequence terminated by a [`TokenKind::Stop`]
//! token. Positions are Unicode code-point offsets into the source text.
//! Only bracket pairing, string termination, operator shape and numeric
//! shape are checked here; everything else is left to the parser.

use logos::Logos;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;
use xqlorm_core::{Error, Result};

/// Raw lexemes recognised by logos
#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
enum RawToken {
    // Keywords
    #[token("select", ignore(ascii_case))]
    Select,

    #[token("from", ignore(ascii_case))]
    From,

    #[token("left", ignore(ascii_case))]
    Left,

    #[token("right", ignore(ascii_case))]
    Right,

    #[token("inner", ignore(ascii_case))]
    Inner,

    #[token("outer", ignore(ascii_case))]
    Outer,

    #[token("join", ignore(ascii_case))]
    Join,

    #[token("on", ignore(ascii_case))]
    On,

    #[token("where", ignore(ascii_case))]
    Where,

    #[token("filter", ignore(ascii_case))]
    Filter,

    #[token("like", ignore(ascii_case))]
    Like,

    #[token("between", ignore(ascii_case))]
    Between,

    #[token("order", ignore(ascii_case))]
    Order,

    #[token("by", ignore(ascii_case))]
    By,

    #[token("ascending", ignore(ascii_case))]
    Ascending,

    #[token("descending", ignore(ascii_case))]
    Descending,

    #[token("not", ignore(ascii_case))]
    Not,

    #[token("true", ignore(ascii_case))]
    True,

    #[token("false", ignore(ascii_case))]
    False,

    #[token("null", ignore(ascii_case))]
    Null,

    // Operators
    #[token("==")]
    Equal,

    #[token("!=")]
    NotEqual,

    #[token(">=")]
    GreaterEqual,

    #[token("<=")]
    LessEqual,

    #[token(">")]
    Greater,

    #[token("<")]
    Less,

    #[token("&&")]
    And,

    #[token("||")]
    Or,

    #[token("!")]
    Bang,

    #[token("%%")]
    PercentLike,

    #[token("%")]
    Percent,

    // Separators
    #[token(".")]
    Dot,

    #[token(",")]
    Comma,

    #[token(":")]
    Colon,

    #[token("(")]
    LeftBracket,

    #[token(")")]
    RightBracket,

    // Literals
    #[regex(r"'([^'\\\n]|\\[^\n])*'")]
    String,

    #[regex(r"[0-9]+(\.[0-9]+)*")]
    Number,

    // Identifiers
    #[regex(r"[\p{L}_][\p{L}\p{N}_]*")]
    Identifier,
}

/// Reserved words of the query language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Keyword {
    Select,
    From,
    Left,
    Right,
    Inner,
    Outer,
    Join,
    On,
    Where,
    Filter,
    Like,
    Between,
    Order,
    By,
    Ascending,
    Descending,
    Not,
    True,
    False,
    Null,
}

impl Keyword {
    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::Select => "select",
            Keyword::From => "from",
            Keyword::Left => "left",
            Keyword::Right => "right",
            Keyword::Inner => "inner",
            Keyword::Outer => "outer",
            Keyword::Join => "join",
            Keyword::On => "on",
            Keyword::Where => "where",
            Keyword::Filter => "filter",
            Keyword::Like => "like",
            Keyword::Between => "between",
            Keyword::Order => "order",
            Keyword::By => "by",
            Keyword::Ascending => "ascending",
            Keyword::Descending => "descending",
            Keyword::Not => "not",
            Keyword::True => "true",
            Keyword::False => "false",
            Keyword::Null => "null",
        }
    }

    /// Keywords that open a join clause
    pub fn is_join_kind(&self) -> bool {
        matches!(
            self,
            Keyword::Left | Keyword::Right | Keyword::Inner | Keyword::Outer | Keyword::Join
        )
    }
}

/// Operators of the query language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterEqual,
    LessEqual,
    Greater,
    Less,
    And,
    Or,
    Not,
    /// `%%`, shorthand for `like`
    Like,
    Modulo,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::GreaterEqual => ">=",
            Operator::LessEqual => "<=",
            Operator::Greater => ">",
            Operator::Less => "<",
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Not => "!",
            Operator::Like => "%%",
            Operator::Modulo => "%",
        }
    }

    /// Binary operators comparing two operands
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Operator::Equal
                | Operator::NotEqual
                | Operator::GreaterEqual
                | Operator::LessEqual
                | Operator::Greater
                | Operator::Less
                | Operator::Like
                | Operator::Modulo
        )
    }

    /// Boolean connectives
    pub fn is_connective(&self) -> bool {
        matches!(self, Operator::And | Operator::Or)
    }
}

/// Lexical category of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    Identifier,
    Keyword(Keyword),
    Operator(Operator),
    String,
    Number,
    Dot,
    Comma,
    Colon,
    LeftBracket,
    RightBracket,
    Stop,
}

/// A token with its text and source position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    /// Identifier text, lower-cased keyword, unescaped string content, or
    /// the literal source text for everything else
    pub text: String,
    /// Code-point offset of the first character
    pub position: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, position: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            position,
        }
    }

    pub fn identifier(text: &str) -> Self {
        Self::new(TokenKind::Identifier, text, 0)
    }

    pub fn keyword(keyword: Keyword) -> Self {
        Self::new(TokenKind::Keyword(keyword), keyword.as_str(), 0)
    }

    pub fn operator(operator: Operator) -> Self {
        Self::new(TokenKind::Operator(operator), operator.as_str(), 0)
    }

    pub fn separator(kind: TokenKind) -> Self {
        let text = match kind {
            TokenKind::Dot => ".",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::LeftBracket => "(",
            TokenKind::RightBracket => ")",
            _ => "",
        };
        Self::new(kind, text, 0)
    }

    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        self.kind == TokenKind::Keyword(keyword)
    }

    pub fn is_operator(&self, operator: Operator) -> bool {
        self.kind == TokenKind::Operator(operator)
    }

    pub fn is_stop(&self) -> bool {
        self.kind == TokenKind::Stop
    }

    /// Identifiers and keywords may both name a property or parameter
    pub fn is_name(&self) -> bool {
        matches!(self.kind, TokenKind::Identifier | TokenKind::Keyword(_))
    }

    /// Check if this token is a literal
    pub fn is_literal(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::String
                | TokenKind::Number
                | TokenKind::Keyword(Keyword::True)
                | TokenKind::Keyword(Keyword::False)
                | TokenKind::Keyword(Keyword::Null)
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Stop => f.write_str("end of input"),
            _ => write!(f, "'{}'", self.text),
        }
    }
}

/// Tokens produced by a single [`tokenize`] call.
///
/// The stream is consumed front to back and cannot be rewound; tokenize the
/// text again to start over. Once the stop token has been handed out every
/// further call keeps returning it.
#[derive(Debug)]
pub struct TokenStream {
    tokens: Vec<Token>,
    cursor: usize,
}

impl TokenStream {
    /// Build a stream from tokens, appending a stop token when missing
    pub fn from_tokens(mut tokens: Vec<Token>) -> Self {
        if !tokens.last().is_some_and(Token::is_stop) {
            let position = tokens.last().map_or(0, |t| t.position + t.text.chars().count());
            tokens.push(Token::new(TokenKind::Stop, "", position));
        }
        Self { tokens, cursor: 0 }
    }

    /// Look at the next token without consuming it
    pub fn peek(&self) -> &Token {
        self.peek_nth(0)
    }

    /// Look `n` tokens ahead; past the end this is the stop token
    pub fn peek_nth(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.cursor + n).min(last)]
    }

    /// Consume the next token
    pub fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.cursor < self.tokens.len() - 1 {
            self.cursor += 1;
        }
        token
    }

    /// True once only the stop token is left
    pub fn is_exhausted(&self) -> bool {
        self.peek().is_stop()
    }

    /// Number of tokens left, including the stop token
    pub fn remaining(&self) -> usize {
        self.tokens.len() - self.cursor
    }
}

impl Iterator for TokenStream {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.cursor >= self.tokens.len() {
            return None;
        }
        let token = self.tokens[self.cursor].clone();
        self.cursor += 1;
        Some(token)
    }
}

/// Tokenize XQL text
pub fn tokenize(input: &str) -> Result<TokenStream> {
    let mut lexer = RawToken::lexer(input);
    let mut tokens = Vec::new();
    let mut open_brackets: Vec<usize> = Vec::new();

    // Incremental byte -> code-point offset conversion
    let mut byte_cursor = 0;
    let mut char_cursor = 0;
    let mut char_offset = |byte: usize| {
        char_cursor += input[byte_cursor..byte].chars().count();
        byte_cursor = byte;
        char_cursor
    };

    while let Some(raw) = lexer.next() {
        let span = lexer.span();
        let slice = lexer.slice();
        let position = char_offset(span.start);

        let raw = match raw {
            Ok(raw) => raw,
            Err(()) => return Err(classify_error(slice, position)),
        };

        let kind = match raw {
            RawToken::Select => TokenKind::Keyword(Keyword::Select),
            RawToken::From => TokenKind::Keyword(Keyword::From),
            RawToken::Left => TokenKind::Keyword(Keyword::Left),
            RawToken::Right => TokenKind::Keyword(Keyword::Right),
            RawToken::Inner => TokenKind::Keyword(Keyword::Inner),
            RawToken::Outer => TokenKind::Keyword(Keyword::Outer),
            RawToken::Join => TokenKind::Keyword(Keyword::Join),
            RawToken::On => TokenKind::Keyword(Keyword::On),
            RawToken::Where => TokenKind::Keyword(Keyword::Where),
            RawToken::Filter => TokenKind::Keyword(Keyword::Filter),
            RawToken::Like => TokenKind::Keyword(Keyword::Like),
            RawToken::Between => TokenKind::Keyword(Keyword::Between),
            RawToken::Order => TokenKind::Keyword(Keyword::Order),
            RawToken::By => TokenKind::Keyword(Keyword::By),
            RawToken::Ascending => TokenKind::Keyword(Keyword::Ascending),
            RawToken::Descending => TokenKind::Keyword(Keyword::Descending),
            RawToken::Not => TokenKind::Keyword(Keyword::Not),
            RawToken::True => TokenKind::Keyword(Keyword::True),
            RawToken::False => TokenKind::Keyword(Keyword::False),
            RawToken::Null => TokenKind::Keyword(Keyword::Null),
            RawToken::Equal => TokenKind::Operator(Operator::Equal),
            RawToken::NotEqual => TokenKind::Operator(Operator::NotEqual),
            RawToken::GreaterEqual => TokenKind::Operator(Operator::GreaterEqual),
            RawToken::LessEqual => TokenKind::Operator(Operator::LessEqual),
            RawToken::Greater => TokenKind::Operator(Operator::Greater),
            RawToken::Less => TokenKind::Operator(Operator::Less),
            RawToken::And => TokenKind::Operator(Operator::And),
            RawToken::Or => TokenKind::Operator(Operator::Or),
            RawToken::Bang => TokenKind::Operator(Operator::Not),
            RawToken::PercentLike => TokenKind::Operator(Operator::Like),
            RawToken::Percent => TokenKind::Operator(Operator::Modulo),
            RawToken::Dot => TokenKind::Dot,
            RawToken::Comma => TokenKind::Comma,
            RawToken::Colon => TokenKind::Colon,
            RawToken::LeftBracket => {
                open_brackets.push(position);
                TokenKind::LeftBracket
            }
            RawToken::RightBracket => {
                if open_brackets.pop().is_none() {
                    return Err(Error::UnpairedBracket { position });
                }
                TokenKind::RightBracket
            }
            RawToken::String => TokenKind::String,
            RawToken::Number => {
                if slice.matches('.').count() > 1 {
                    return Err(Error::MalformedNumber {
                        literal: slice.to_string(),
                        position,
                    });
                }
                TokenKind::Number
            }
            RawToken::Identifier => TokenKind::Identifier,
        };

        let text = match kind {
            TokenKind::Keyword(keyword) => keyword.as_str().to_string(),
            TokenKind::String => unescape(&slice[1..slice.len() - 1]),
            _ => slice.to_string(),
        };

        tokens.push(Token::new(kind, text, position));
    }

    if let Some(&position) = open_brackets.last() {
        return Err(Error::UnpairedBracket { position });
    }

    let end = char_offset(input.len());
    tokens.push(Token::new(TokenKind::Stop, "", end));
    trace!("Tokenized {} tokens", tokens.len());

    Ok(TokenStream { tokens, cursor: 0 })
}

/// Map a logos failure to the matching lexical error
fn classify_error(slice: &str, position: usize) -> Error {
    match slice.chars().next() {
        Some('\'') => Error::UnterminatedString { position },
        Some(c @ ('=' | '|' | '&')) => Error::MalformedOperator {
            operator: c.to_string(),
            position,
        },
        Some(character) => Error::UnexpectedCharacter {
            character,
            position,
        },
        None => Error::syntax("unexpected end of input", position),
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().map(|t| t.kind).collect()
    }

    #[test]
    fn test_property_comparison_with_parameter() {
        let tokens: Vec<Token> = tokenize("a.b == :p").unwrap().collect();

        assert_eq!(
            tokens,
            vec![
                Token::new(TokenKind::Identifier, "a", 0),
                Token::new(TokenKind::Dot, ".", 1),
                Token::new(TokenKind::Identifier, "b", 2),
                Token::new(TokenKind::Operator(Operator::Equal), "==", 4),
                Token::new(TokenKind::Colon, ":", 7),
                Token::new(TokenKind::Identifier, "p", 8),
                Token::new(TokenKind::Stop, "", 9),
            ]
        );
    }

    #[test]
    fn test_keywords_are_lowercased() {
        let tokens: Vec<Token> = tokenize("SELECT u FROM User u").unwrap().collect();

        assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::Select));
        assert_eq!(tokens[0].text, "select");
        assert_eq!(tokens[2].kind, TokenKind::Keyword(Keyword::From));
        assert_eq!(tokens[3].kind, TokenKind::Identifier);
        assert_eq!(tokens[3].text, "User");
    }

    #[test]
    fn test_identifier_prefixed_by_keyword() {
        let tokens: Vec<Token> = tokenize("selection ordering").unwrap().collect();
        assert_eq!(tokens[0].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
    }

    #[test]
    fn test_two_character_operators() {
        assert_eq!(
            kinds(">= <= != == || && %% > < ! %"),
            vec![
                TokenKind::Operator(Operator::GreaterEqual),
                TokenKind::Operator(Operator::LessEqual),
                TokenKind::Operator(Operator::NotEqual),
                TokenKind::Operator(Operator::Equal),
                TokenKind::Operator(Operator::Or),
                TokenKind::Operator(Operator::And),
                TokenKind::Operator(Operator::Like),
                TokenKind::Operator(Operator::Greater),
                TokenKind::Operator(Operator::Less),
                TokenKind::Operator(Operator::Not),
                TokenKind::Operator(Operator::Modulo),
                TokenKind::Stop,
            ]
        );
    }

    #[test]
    fn test_bare_equals_is_malformed() {
        let err = tokenize("a.b = 1").unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedOperator { ref operator, position: 4 } if operator == "="
        ));
    }

    #[test]
    fn test_bare_pipe_and_ampersand_are_malformed() {
        assert!(matches!(
            tokenize("a | b").unwrap_err(),
            Error::MalformedOperator { position: 2, .. }
        ));
        assert!(matches!(
            tokenize("a & b").unwrap_err(),
            Error::MalformedOperator { position: 2, .. }
        ));
    }

    #[test]
    fn test_string_literals() {
        let tokens: Vec<Token> = tokenize(r"'it\'s' 'plain'").unwrap().collect();
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].text, "it's");
        assert_eq!(tokens[1].text, "plain");
        assert_eq!(tokens[1].position, 8);
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(
            tokenize("u.name == 'abc").unwrap_err(),
            Error::UnterminatedString { position: 10 }
        ));
        assert!(matches!(
            tokenize("'abc\ndef'").unwrap_err(),
            Error::UnterminatedString { position: 0 }
        ));
    }

    #[test]
    fn test_numbers() {
        let tokens: Vec<Token> = tokenize("42 3.14").unwrap().collect();
        assert_eq!(tokens[0].kind, TokenKind::Number);
        assert_eq!(tokens[1].text, "3.14");

        assert!(matches!(
            tokenize("x == 1.2.3").unwrap_err(),
            Error::MalformedNumber { position: 5, .. }
        ));
    }

    #[test]
    fn test_brackets() {
        assert!(tokenize("((a) && (b))").is_ok());
        assert!(matches!(
            tokenize("a)").unwrap_err(),
            Error::UnpairedBracket { position: 1 }
        ));
        assert!(matches!(
            tokenize("(a && (b)").unwrap_err(),
            Error::UnpairedBracket { position: 0 }
        ));
    }

    #[test]
    fn test_unicode_positions() {
        let tokens: Vec<Token> = tokenize("'äöü' == ñame").unwrap().collect();
        assert_eq!(tokens[1].position, 6);
        assert_eq!(tokens[2].kind, TokenKind::Identifier);
        assert_eq!(tokens[2].position, 9);
        assert_eq!(tokens[3].position, 13);
    }

    #[test]
    fn test_unexpected_character() {
        assert!(matches!(
            tokenize("a # b").unwrap_err(),
            Error::UnexpectedCharacter { character: '#', position: 2 }
        ));
    }

    #[test]
    fn test_stream_is_not_restartable() {
        let mut stream = tokenize("a b").unwrap();
        assert_eq!(stream.remaining(), 3);
        assert_eq!(stream.advance().text, "a");
        assert_eq!(stream.advance().text, "b");
        assert!(stream.is_exhausted());
        assert!(stream.advance().is_stop());
        assert!(stream.advance().is_stop());
    }

    #[test]
    fn test_empty_input() {
        let tokens: Vec<Token> = tokenize("   ").unwrap().collect();
        assert_eq!(tokens, vec![Token::new(TokenKind::Stop, "", 3)]);
    }

    fn balanced() -> impl Strategy<Value = String> {
        prop::collection::vec(0u8..4, 0..40).prop_map(|ops| {
            let mut out = String::new();
            let mut depth = 0usize;
            for op in ops {
                match op {
                    0 => {
                        out.push('(');
                        depth += 1;
                    }
                    1 if depth > 0 => {
                        out.push(')');
                        depth -= 1;
                    }
                    2 => out.push_str(" a.b "),
                    _ => out.push_str(" == :p "),
                }
            }
            out.push_str(&")".repeat(depth));
            out
        })
    }

    proptest! {
        #[test]
        fn prop_balanced_brackets_never_unpaired(input in balanced()) {
            let unpaired = matches!(tokenize(&input), Err(Error::UnpairedBracket { .. }));
            prop_assert!(!unpaired);
        }

        #[test]
        fn prop_extra_closing_bracket_always_unpaired(input in balanced(), prefix in any::<bool>()) {
            let input = if prefix { format!("){input}") } else { format!("{input})") };
            let unpaired = matches!(tokenize(&input), Err(Error::UnpairedBracket { .. }));
            prop_assert!(unpaired);
        }
    }
}
