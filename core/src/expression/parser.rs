//! Recursive descent parser with precedence climbing.
//!
//! Precedence, lowest first: `or`, `and`, comparison, `+ -`, `* / %`,
//! unary `- not`, `**` (right associative), postfix access and calls.

use super::lexer::{Token, TokenKind};
use crate::error::ExpressionError;

/// Deepest nesting accepted before parsing gives up.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(serde_json::Value),
    Identifier(String),
    List(Vec<Expr>),
    Property { object: Box<Expr>, name: String },
    Index { object: Box<Expr>, index: Box<Expr> },
    Call { function: String, args: Vec<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { left: Box<Expr>, op: BinaryOp, right: Box<Expr> },
}

impl BinaryOp {
    fn from_token(kind: &TokenKind) -> Option<(Self, u8)> {
        let op = match kind {
            TokenKind::Or => (BinaryOp::Or, 1),
            TokenKind::And => (BinaryOp::And, 2),
            TokenKind::Equal => (BinaryOp::Equal, 3),
            TokenKind::NotEqual => (BinaryOp::NotEqual, 3),
            TokenKind::Less => (BinaryOp::Less, 3),
            TokenKind::LessEqual => (BinaryOp::LessEqual, 3),
            TokenKind::Greater => (BinaryOp::Greater, 3),
            TokenKind::GreaterEqual => (BinaryOp::GreaterEqual, 3),
            TokenKind::Plus => (BinaryOp::Add, 4),
            TokenKind::Minus => (BinaryOp::Subtract, 4),
            TokenKind::Star => (BinaryOp::Multiply, 5),
            TokenKind::Slash => (BinaryOp::Divide, 5),
            TokenKind::Percent => (BinaryOp::Modulo, 5),
            _ => return None,
        };
        Some(op)
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
            depth: 0,
        }
    }

    /// Parse a complete expression; trailing tokens are an error.
    pub fn parse(mut self) -> Result<Expr, ExpressionError> {
        let expr = self.expression(0)?;
        match self.current() {
            TokenKind::Eof => Ok(expr),
            other => Err(self.error(format!("unexpected {:?}", other))),
        }
    }

    fn current(&self) -> &TokenKind {
        self.tokens
            .get(self.position)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.current().clone();
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        kind
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        let position = self
            .tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map_or(0, |t| t.position);
        ExpressionError::Syntax {
            position,
            message: message.into(),
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), ExpressionError> {
        if *self.current() == kind {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn enter(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        Ok(())
    }

    fn expression(&mut self, min_precedence: u8) -> Result<Expr, ExpressionError> {
        self.enter()?;
        let mut left = self.unary()?;

        while let Some((op, precedence)) = BinaryOp::from_token(self.current()) {
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let right = self.expression(precedence + 1)?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        self.depth -= 1;
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        let op = match self.current() {
            TokenKind::Minus => UnaryOp::Negate,
            TokenKind::Not => UnaryOp::Not,
            _ => return self.power(),
        };
        self.advance();
        self.enter()?;
        let operand = self.unary()?;
        self.depth -= 1;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.postfix()?;
        if *self.current() != TokenKind::Power {
            return Ok(base);
        }
        self.advance();
        self.enter()?;
        // Right associative, and binds tighter than a unary minus on its left.
        let exponent = self.unary()?;
        self.depth -= 1;
        Ok(Expr::Binary {
            left: Box::new(base),
            op: BinaryOp::Power,
            right: Box::new(exponent),
        })
    }

    fn postfix(&mut self) -> Result<Expr, ExpressionError> {
        let mut expr = self.primary()?;
        loop {
            match self.current() {
                TokenKind::Dot => {
                    self.advance();
                    match self.advance() {
                        TokenKind::Ident(name) => {
                            expr = Expr::Property {
                                object: Box::new(expr),
                                name,
                            }
                        }
                        _ => return Err(self.error("expected property name after '.'")),
                    }
                }
                TokenKind::LeftBracket => {
                    self.advance();
                    let index = self.expression(0)?;
                    self.expect(TokenKind::RightBracket, "']'")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.advance() {
            TokenKind::Int(i) => Ok(Expr::Literal(i.into())),
            TokenKind::Float(f) => Ok(Expr::Literal(f.into())),
            TokenKind::Str(s) => Ok(Expr::Literal(s.into())),
            TokenKind::True => Ok(Expr::Literal(true.into())),
            TokenKind::False => Ok(Expr::Literal(false.into())),
            TokenKind::Null => Ok(Expr::Literal(serde_json::Value::Null)),
            TokenKind::LeftParen => {
                let expr = self.expression(0)?;
                self.expect(TokenKind::RightParen, "')'")?;
                Ok(expr)
            }
            TokenKind::LeftBracket => {
                let items = self.arguments(TokenKind::RightBracket, "']'")?;
                Ok(Expr::List(items))
            }
            TokenKind::Ident(name) => {
                if *self.current() == TokenKind::LeftParen {
                    self.advance();
                    let args = self.arguments(TokenKind::RightParen, "')'")?;
                    Ok(Expr::Call {
                        function: name,
                        args,
                    })
                } else {
                    Ok(Expr::Identifier(name))
                }
            }
            TokenKind::Eof => Err(self.error("unexpected end of expression")),
            other => Err(self.error(format!("unexpected {:?}", other))),
        }
    }

    /// Comma separated expressions up to `close` (already past the opener).
    fn arguments(&mut self, close: TokenKind, what: &str) -> Result<Vec<Expr>, ExpressionError> {
        let mut items = Vec::new();
        if *self.current() == close {
            self.advance();
            return Ok(items);
        }
        loop {
            items.push(self.expression(0)?);
            match self.current() {
                TokenKind::Comma => {
                    self.advance();
                }
                kind if *kind == close => {
                    self.advance();
                    return Ok(items);
                }
                _ => return Err(self.error(format!("expected ',' or {}", what))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::lexer::Lexer;

    fn parse(input: &str) -> Result<Expr, ExpressionError> {
        Parser::new(Lexer::new(input).tokenize()?).parse()
    }

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Identifier(name.into()))
    }

    #[test]
    fn test_precedence() {
        let expr = parse("a + b * c").unwrap();
        assert_eq!(
            expr,
            Expr::Binary {
                left: ident("a"),
                op: BinaryOp::Add,
                right: Box::new(Expr::Binary {
                    left: ident("b"),
                    op: BinaryOp::Multiply,
                    right: ident("c"),
                }),
            }
        );
    }

    #[test]
    fn test_property_and_call() {
        let expr = parse("max(stats.total, 1)").unwrap();
        assert_eq!(
            expr,
            Expr::Call {
                function: "max".into(),
                args: vec![
                    Expr::Property {
                        object: ident("stats"),
                        name: "total".into()
                    },
                    Expr::Literal(1.into()),
                ],
            }
        );
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        assert!(matches!(parse("a b"), Err(ExpressionError::Syntax { .. })));
        assert!(matches!(parse("(a"), Err(ExpressionError::Syntax { .. })));
        assert!(matches!(parse(""), Err(ExpressionError::Syntax { .. })));
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        let err = parse(&deep).unwrap_err();
        assert!(err.to_string().contains("nested too deeply"));
        assert!(parse("((((1))))").is_ok());
    }
}
