// src/query/lexer.rs

//! Tokenizer for the query language

use crate::error::{Error, Result};
use std::fmt;

/// Characters ending an unquoted word
const WORD_DELIMITERS: &[char] = &['(', ')', '|', ',', '!', '{', '}', '"'];

/// Comparison operators, longest first
const OPERATORS: &[&str] = &["<<", "<=", ">>", ">=", "<", ">", "=", "%", "~"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    LeftParen,
    RightParen,
    LeftCurly,
    RightCurly,
    Or,
    And,
    Not,
    Operator(&'static str),
    Word(String),
    Quoted(String),
    End,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::LeftParen => f.write_str("'('"),
            TokenKind::RightParen => f.write_str("')'"),
            TokenKind::LeftCurly => f.write_str("'{'"),
            TokenKind::RightCurly => f.write_str("'}'"),
            TokenKind::Or => f.write_str("'|'"),
            TokenKind::And => f.write_str("','"),
            TokenKind::Not => f.write_str("'!'"),
            TokenKind::Operator(op) => write!(f, "operator '{}'", op),
            TokenKind::Word(w) => write!(f, "'{}'", w),
            TokenKind::Quoted(s) => write!(f, "\"{}\"", s),
            TokenKind::End => f.write_str("end of query"),
        }
    }
}

/// A token and the byte offset it starts at
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub position: usize,
}

/// Split `input` into tokens, always ending with [`TokenKind::End`]
pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(position, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let single = match c {
            '(' => Some(TokenKind::LeftParen),
            ')' => Some(TokenKind::RightParen),
            '{' => Some(TokenKind::LeftCurly),
            '}' => Some(TokenKind::RightCurly),
            '|' => Some(TokenKind::Or),
            ',' => Some(TokenKind::And),
            '!' => Some(TokenKind::Not),
            _ => None,
        };
        if let Some(kind) = single {
            chars.next();
            tokens.push(Token { kind, position });
            continue;
        }

        if let Some(op) = OPERATORS.iter().find(|op| input[position..].starts_with(**op)) {
            for _ in 0..op.len() {
                chars.next();
            }
            tokens.push(Token {
                kind: TokenKind::Operator(*op),
                position,
            });
            continue;
        }

        if c == '"' {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some((_, c)) = chars.next() {
                match c {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some((_, escaped)) => value.push(escaped),
                        None => break,
                    },
                    _ => value.push(c),
                }
            }
            if !closed {
                return Err(Error::SyntaxError {
                    position,
                    message: "unterminated quoted string".to_string(),
                });
            }
            tokens.push(Token {
                kind: TokenKind::Quoted(value),
                position,
            });
            continue;
        }

        let mut end = input.len();
        while let Some(&(i, c)) = chars.peek() {
            if c.is_whitespace() || WORD_DELIMITERS.contains(&c) {
                end = i;
                break;
            }
            chars.next();
        }
        tokens.push(Token {
            kind: TokenKind::Word(input[position..end].to_string()),
            position,
        });
    }

    tokens.push(Token {
        kind: TokenKind::End,
        position: input.len(),
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_condition() {
        assert_eq!(
            kinds("Version (>= 1.0~rc1)"),
            vec![
                TokenKind::Word("Version".to_string()),
                TokenKind::LeftParen,
                TokenKind::Operator(">="),
                TokenKind::Word("1.0~rc1".to_string()),
                TokenKind::RightParen,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn test_tokenize_combinators() {
        assert_eq!(
            kinds("!a,b|c {i386}"),
            vec![
                TokenKind::Not,
                TokenKind::Word("a".to_string()),
                TokenKind::And,
                TokenKind::Word("b".to_string()),
                TokenKind::Or,
                TokenKind::Word("c".to_string()),
                TokenKind::LeftCurly,
                TokenKind::Word("i386".to_string()),
                TokenKind::RightCurly,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn test_tokenize_quoted() {
        assert_eq!(
            kinds(r#"Name (~ "a\"b|c\\")"#)[3],
            TokenKind::Quoted(r#"a"b|c\"#.to_string())
        );
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("Name  (<< x)").unwrap();
        let positions: Vec<usize> = tokens.iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![0, 6, 7, 10, 11, 12]);
    }

    #[test]
    fn test_unterminated_quote() {
        match tokenize("Name (= \"abc") {
            Err(Error::SyntaxError { position, .. }) => assert_eq!(position, 8),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
