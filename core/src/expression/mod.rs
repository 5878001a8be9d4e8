//! Sandboxed expressions for computed fields.
//!
//! ```text
//! "total / max(count, 1)"  ──lexer──▶ tokens ──parser──▶ Expr ──eval(scope)──▶ Value
//! ```
//!
//! The language is deliberately small: arithmetic, comparison, logical
//! operators, property and index access, list literals and a fixed set of
//! functions ([`ALLOWED_FUNCTIONS`]). Values are JSON values. Integer
//! arithmetic stays integral; `/` always produces a float.

mod eval;
mod lexer;
mod parser;

pub use eval::{truthy, ALLOWED_FUNCTIONS};
pub use parser::MAX_DEPTH;

use indexmap::IndexMap;
use serde_json::Value;
use std::collections::BTreeSet;

use crate::error::ExpressionError;
use parser::Expr;

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    ast: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = lexer::Lexer::new(source).tokenize()?;
        let ast = parser::Parser::new(tokens).parse()?;
        Ok(Self { ast })
    }

    /// Top-level names the expression reads (function names excluded).
    pub fn identifiers(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        collect_identifiers(&self.ast, &mut names);
        names
    }

    /// Evaluate against `scope`. Any unresolved name is a missing dependency.
    pub fn evaluate(&self, scope: &IndexMap<String, Value>) -> Result<Value, ExpressionError> {
        eval::evaluate(&self.ast, scope)
    }

    /// Evaluate after checking that every name read is one of `declared`
    /// and that each of them has a value in `available`.
    pub fn evaluate_with_dependencies(
        &self,
        declared: &[String],
        available: &IndexMap<String, Value>,
    ) -> Result<Value, ExpressionError> {
        for name in self.identifiers() {
            if !declared.contains(&name) {
                return Err(ExpressionError::MissingDependency(name));
            }
        }

        let mut scope = IndexMap::with_capacity(declared.len());
        for name in declared {
            let value = available
                .get(name)
                .ok_or_else(|| ExpressionError::MissingDependency(name.clone()))?;
            scope.insert(name.clone(), value.clone());
        }
        self.evaluate(&scope)
    }
}

fn collect_identifiers(expr: &Expr, names: &mut BTreeSet<String>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Identifier(name) => {
            names.insert(name.clone());
        }
        Expr::List(items) => items.iter().for_each(|i| collect_identifiers(i, names)),
        Expr::Property { object, .. } => collect_identifiers(object, names),
        Expr::Index { object, index } => {
            collect_identifiers(object, names);
            collect_identifiers(index, names);
        }
        Expr::Call { args, .. } => args.iter().for_each(|a| collect_identifiers(a, names)),
        Expr::Unary { operand, .. } => collect_identifiers(operand, names),
        Expr::Binary { left, right, .. } => {
            collect_identifiers(left, names);
            collect_identifiers(right, names);
        }
    }
}
