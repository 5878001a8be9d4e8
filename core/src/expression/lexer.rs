//! Tokenizer for computed field expressions.

use crate::error::ExpressionError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Comma,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Power,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
    Not,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character
    pub position: usize,
}

pub struct Lexer<'a> {
    input: &'a str,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, position: 0 }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, ExpressionError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn current(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn peek(&self) -> Option<char> {
        let mut chars = self.input[self.position..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.current() {
            self.position += c.len_utf8();
        }
    }

    fn error(&self, position: usize, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Syntax {
            position,
            message: message.into(),
        }
    }

    fn next_token(&mut self) -> Result<Token, ExpressionError> {
        while self.current().is_some_and(char::is_whitespace) {
            self.advance();
        }

        let start = self.position;
        let Some(ch) = self.current() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                position: start,
            });
        };

        let kind = match ch {
            '(' => self.single(TokenKind::LeftParen),
            ')' => self.single(TokenKind::RightParen),
            '[' => self.single(TokenKind::LeftBracket),
            ']' => self.single(TokenKind::RightBracket),
            ',' => self.single(TokenKind::Comma),
            '+' => self.single(TokenKind::Plus),
            '-' => self.single(TokenKind::Minus),
            '*' if self.peek() == Some('*') => self.double(TokenKind::Power),
            '*' => self.single(TokenKind::Star),
            '/' => self.single(TokenKind::Slash),
            '%' => self.single(TokenKind::Percent),
            '=' if self.peek() == Some('=') => self.double(TokenKind::Equal),
            '!' if self.peek() == Some('=') => self.double(TokenKind::NotEqual),
            '!' => self.single(TokenKind::Not),
            '<' if self.peek() == Some('=') => self.double(TokenKind::LessEqual),
            '<' => self.single(TokenKind::Less),
            '>' if self.peek() == Some('=') => self.double(TokenKind::GreaterEqual),
            '>' => self.single(TokenKind::Greater),
            '&' if self.peek() == Some('&') => self.double(TokenKind::And),
            '|' if self.peek() == Some('|') => self.double(TokenKind::Or),
            '.' if !self.peek().is_some_and(|c| c.is_ascii_digit()) => self.single(TokenKind::Dot),
            '\'' | '"' => self.string(ch)?,
            c if c.is_ascii_digit() || c == '.' => self.number()?,
            c if c.is_alphabetic() || c == '_' => self.word(),
            other => return Err(self.error(start, format!("unexpected character '{}'", other))),
        };

        Ok(Token {
            kind,
            position: start,
        })
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    fn double(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        self.advance();
        kind
    }

    fn string(&mut self, quote: char) -> Result<TokenKind, ExpressionError> {
        let start = self.position;
        self.advance();
        let mut value = String::new();
        loop {
            match self.current() {
                None => return Err(self.error(start, "unterminated string")),
                Some(c) if c == quote => {
                    self.advance();
                    return Ok(TokenKind::Str(value));
                }
                Some('\\') => {
                    self.advance();
                    let escaped = match self.current() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some(c) => c,
                        None => return Err(self.error(start, "unterminated string")),
                    };
                    value.push(escaped);
                    self.advance();
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }
    }

    fn number(&mut self) -> Result<TokenKind, ExpressionError> {
        let start = self.position;
        let mut is_float = false;
        while let Some(c) = self.current() {
            match c {
                '0'..='9' | '_' => self.advance(),
                '.' if !is_float => {
                    is_float = true;
                    self.advance();
                }
                'e' | 'E' => {
                    is_float = true;
                    self.advance();
                    if matches!(self.current(), Some('+' | '-')) {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
        let text: String = self.input[start..self.position].chars().filter(|c| *c != '_').collect();
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| self.error(start, format!("invalid number '{}'", text)))
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| self.error(start, format!("invalid integer '{}'", text)))
        }
    }

    fn word(&mut self) -> TokenKind {
        let start = self.position;
        while self.current().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.advance();
        }
        match &self.input[start..self.position] {
            "true" | "True" => TokenKind::True,
            "false" | "False" => TokenKind::False,
            "null" | "None" => TokenKind::Null,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            ident => TokenKind::Ident(ident.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_tokenize_operators() {
        assert_eq!(
            kinds("a ** 2 >= b.c and not d"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Power,
                TokenKind::Int(2),
                TokenKind::GreaterEqual,
                TokenKind::Ident("b".into()),
                TokenKind::Dot,
                TokenKind::Ident("c".into()),
                TokenKind::And,
                TokenKind::Not,
                TokenKind::Ident("d".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_literals() {
        assert_eq!(
            kinds("1.5 .25 'it\\'s' None"),
            vec![
                TokenKind::Float(1.5),
                TokenKind::Float(0.25),
                TokenKind::Str("it's".into()),
                TokenKind::Null,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_rejects_unknown_character() {
        let err = Lexer::new("a ; b").tokenize().unwrap_err();
        assert_eq!(
            err,
            ExpressionError::Syntax {
                position: 2,
                message: "unexpected character ';'".into()
            }
        );
    }
}
