// src/query/parser.rs

//! Recursive-descent parser for the query language
//!
//! ```text
//! query     := and ('|' and)*
//! and       := not (',' not)*
//! not       := '!' not | '(' query ')' | condition
//! condition := Field [ '(' [op] value ')' ]
//!            | name [ '(' [op] version ')' ] [ '{' arch '}' ]
//!            | name_version_arch
//! ```

use super::lexer::{tokenize, Token, TokenKind};
use super::{FieldCondition, FieldMatch, Query};
use crate::error::{Error, Result};
use crate::package::Dependency;
use crate::version::{DebVersion, VersionRelation};

/// Operator of a parenthesised condition
enum Operator {
    Relation(VersionRelation),
    Pattern,
    Regexp,
}

fn operator(op: &str) -> Operator {
    match op {
        "%" => Operator::Pattern,
        "~" => Operator::Regexp,
        "<" | "<<" => Operator::Relation(VersionRelation::Less),
        "<=" => Operator::Relation(VersionRelation::LessOrEqual),
        ">" | ">>" => Operator::Relation(VersionRelation::Greater),
        ">=" => Operator::Relation(VersionRelation::GreaterOrEqual),
        _ => Operator::Relation(VersionRelation::Equal),
    }
}

/// Whether a word names a field rather than a package
fn is_field_name(word: &str) -> bool {
    word.starts_with('$') || word.starts_with(|c: char| c.is_ascii_uppercase())
}

pub(crate) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub(crate) fn new(input: &str) -> Result<Self> {
        Ok(Self {
            tokens: tokenize(input)?,
            pos: 0,
        })
    }

    fn peek(&self) -> &Token {
        // tokenize always ends with End, and End is never consumed
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::End {
            self.pos += 1;
        }
        token
    }

    fn error<T>(position: usize, message: impl Into<String>) -> Result<T> {
        Err(Error::SyntaxError {
            position,
            message: message.into(),
        })
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        let token = self.advance();
        if token.kind != kind {
            return Self::error(
                token.position,
                format!("expected {}, found {}", kind, token.kind),
            );
        }
        Ok(token)
    }

    /// Parse a whole query; empty input selects everything
    pub(crate) fn parse(mut self) -> Result<Query> {
        if self.peek().kind == TokenKind::End {
            return Ok(Query::MatchAll);
        }
        let query = self.parse_or()?;
        let token = self.peek();
        if token.kind != TokenKind::End {
            return Self::error(token.position, format!("unexpected {}", token.kind));
        }
        Ok(query)
    }

    fn parse_or(&mut self) -> Result<Query> {
        let mut left = self.parse_and()?;
        while self.peek().kind == TokenKind::Or {
            self.advance();
            let right = self.parse_and()?;
            left = Query::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Query> {
        let mut left = self.parse_not()?;
        while self.peek().kind == TokenKind::And {
            self.advance();
            let right = self.parse_not()?;
            left = Query::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Query> {
        match self.peek().kind {
            TokenKind::Not => {
                self.advance();
                Ok(Query::Not(Box::new(self.parse_not()?)))
            }
            TokenKind::LeftParen => {
                self.advance();
                let query = self.parse_or()?;
                self.expect(TokenKind::RightParen)?;
                Ok(query)
            }
            _ => self.parse_condition(),
        }
    }

    fn parse_condition(&mut self) -> Result<Query> {
        let token = self.advance();
        let word = match token.kind {
            TokenKind::Word(word) => word,
            other => {
                return Self::error(
                    token.position,
                    format!("expected field or package name, found {}", other),
                )
            }
        };

        if is_field_name(&word) {
            return self.parse_field(word);
        }
        if word.contains('_') {
            return Self::package_reference(&word, token.position);
        }
        self.parse_dependency(word, token.position)
    }

    /// Parenthesised `[op] value`, or `None` when no '(' follows
    fn parse_operand(&mut self) -> Result<Option<(Operator, String, usize)>> {
        if self.peek().kind != TokenKind::LeftParen {
            return Ok(None);
        }
        self.advance();

        let op = match self.peek().kind {
            TokenKind::Operator(op) => {
                self.advance();
                operator(op)
            }
            _ => Operator::Relation(VersionRelation::Equal),
        };
        let token = self.advance();
        let value = match token.kind {
            TokenKind::Word(value) | TokenKind::Quoted(value) => value,
            other => return Self::error(token.position, format!("expected value, found {}", other)),
        };
        self.expect(TokenKind::RightParen)?;
        Ok(Some((op, value, token.position)))
    }

    fn parse_field(&mut self, field: String) -> Result<Query> {
        let matcher = match self.parse_operand()? {
            None => FieldMatch::Exists,
            Some((Operator::Relation(relation), value, _)) => FieldMatch::Compare(relation, value),
            Some((Operator::Pattern, value, position)) => match glob::Pattern::new(&value) {
                Ok(pattern) => FieldMatch::Pattern(pattern),
                Err(e) => return Self::error(position, format!("invalid pattern '{}': {}", value, e)),
            },
            Some((Operator::Regexp, value, position)) => match regex::Regex::new(&value) {
                Ok(re) => FieldMatch::Regexp(re),
                Err(e) => return Self::error(position, format!("invalid regexp '{}': {}", value, e)),
            },
        };
        Ok(Query::Field(FieldCondition { field, matcher }))
    }

    fn parse_dependency(&mut self, word: String, position: usize) -> Result<Query> {
        let (name, mut architecture) = match word.split_once(':') {
            Some((name, arch)) => (name.to_string(), Some(arch.to_string())),
            None => (word, None),
        };
        if name.is_empty() {
            return Self::error(position, "empty package name");
        }

        let mut dep = Dependency::new(name);
        match self.parse_operand()? {
            None => {}
            Some((Operator::Relation(relation), value, position)) => {
                let version = DebVersion::parse(&value).or_else(|e| Self::error(position, e.to_string()))?;
                dep = Dependency::versioned(dep.name, relation, version);
            }
            Some((_, _, position)) => {
                return Self::error(
                    position,
                    "pattern and regexp operators apply to fields only",
                )
            }
        }

        if self.peek().kind == TokenKind::LeftCurly {
            let open = self.advance();
            if architecture.is_some() {
                return Self::error(open.position, "architecture given twice");
            }
            let token = self.advance();
            match token.kind {
                TokenKind::Word(arch) => architecture = Some(arch),
                other => {
                    return Self::error(
                        token.position,
                        format!("expected architecture, found {}", other),
                    )
                }
            }
            self.expect(TokenKind::RightCurly)?;
        }

        if let Some(arch) = architecture {
            dep = dep.with_architecture(arch);
        }
        Ok(Query::Dependency(dep))
    }

    fn package_reference(word: &str, position: usize) -> Result<Query> {
        let parts: Vec<&str> = word.split('_').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Self::error(
                position,
                format!("package reference '{}' must be name_version_arch", word),
            );
        }
        Ok(Query::Package {
            name: parts[0].to_string(),
            version: parts[1].to_string(),
            architecture: parts[2].to_string(),
        })
    }
}
