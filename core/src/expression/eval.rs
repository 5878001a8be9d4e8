//! Evaluation over JSON values.
//!
//! Only the functions in [`ALLOWED_FUNCTIONS`] can be called and only
//! identifiers present in the scope resolve; there is no way to reach the
//! host, the filesystem or the store from an expression.

use indexmap::IndexMap;
use serde_json::{Number, Value};

use super::parser::{BinaryOp, Expr, UnaryOp};
use crate::error::ExpressionError;

/// Callable functions.
pub const ALLOWED_FUNCTIONS: [&str; 12] = [
    "abs", "round", "min", "max", "sum", "sqrt", "floor", "ceil", "pow", "int", "float", "len",
];

type EvalResult = Result<Value, ExpressionError>;

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn from_value(value: &Value) -> Option<Num> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Num::Int)
                .or_else(|| n.as_f64().map(Num::Float)),
            Value::Bool(b) => Some(Num::Int(i64::from(*b))),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn into_value(self) -> EvalResult {
        match self {
            Num::Int(i) => Ok(Value::from(i)),
            Num::Float(f) => Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| ExpressionError::Eval(format!("result {} is not a finite number", f))),
        }
    }
}

fn number(value: &Value, context: &str) -> Result<Num, ExpressionError> {
    Num::from_value(value).ok_or_else(|| {
        ExpressionError::Type(format!("{} expects a number, got {}", context, type_name(value)))
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Truthiness: null, false, 0, "" and empty containers are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Evaluate `expr` with identifiers resolved from `scope`.
pub fn evaluate(expr: &Expr, scope: &IndexMap<String, Value>) -> EvalResult {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Identifier(name) => scope
            .get(name)
            .cloned()
            .ok_or_else(|| ExpressionError::MissingDependency(name.clone())),
        Expr::List(items) => items
            .iter()
            .map(|item| evaluate(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Property { object, name } => match evaluate(object, scope)? {
            Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(ExpressionError::Type(format!(
                "cannot read '{}' of {}",
                name,
                type_name(&other)
            ))),
        },
        Expr::Index { object, index } => index_value(evaluate(object, scope)?, evaluate(index, scope)?),
        Expr::Call { function, args } => {
            let values = args
                .iter()
                .map(|a| evaluate(a, scope))
                .collect::<Result<Vec<_>, _>>()?;
            call(function, &values)
        }
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, scope)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                UnaryOp::Negate => match number(&value, "'-'")? {
                    Num::Int(i) => i
                        .checked_neg()
                        .map(Value::from)
                        .ok_or_else(|| ExpressionError::Eval("integer overflow".into())),
                    Num::Float(f) => Num::Float(-f).into_value(),
                },
            }
        }
        Expr::Binary { left, op, right } => match op {
            // Short-circuit, returning the deciding operand.
            BinaryOp::And => {
                let l = evaluate(left, scope)?;
                if truthy(&l) {
                    evaluate(right, scope)
                } else {
                    Ok(l)
                }
            }
            BinaryOp::Or => {
                let l = evaluate(left, scope)?;
                if truthy(&l) {
                    Ok(l)
                } else {
                    evaluate(right, scope)
                }
            }
            _ => binary(*op, &evaluate(left, scope)?, &evaluate(right, scope)?),
        },
    }
}

fn index_value(object: Value, index: Value) -> EvalResult {
    match (object, index) {
        (Value::Array(items), Value::Number(n)) => {
            let len = items.len() as i64;
            let i = n
                .as_i64()
                .ok_or_else(|| ExpressionError::Type("list index must be an integer".into()))?;
            let i = if i < 0 { len + i } else { i };
            if i < 0 || i >= len {
                return Err(ExpressionError::Eval(format!("index {} out of range", i)));
            }
            Ok(items[i as usize].clone())
        }
        (Value::Object(map), Value::String(key)) => Ok(map.get(&key).cloned().unwrap_or(Value::Null)),
        (object, index) => Err(ExpressionError::Type(format!(
            "cannot index {} with {}",
            type_name(&object),
            type_name(&index)
        ))),
    }
}

fn compare(a: &Value, b: &Value) -> Result<std::cmp::Ordering, ExpressionError> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => {
            let (x, y) = (number(a, "comparison")?, number(b, "comparison")?);
            x.as_f64()
                .partial_cmp(&y.as_f64())
                .ok_or_else(|| ExpressionError::Eval("incomparable values".into()))
        }
    }
}

fn equal(a: &Value, b: &Value) -> bool {
    match (Num::from_value(a), Num::from_value(b)) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn binary(op: BinaryOp, a: &Value, b: &Value) -> EvalResult {
    use std::cmp::Ordering::*;
    match op {
        BinaryOp::Equal => return Ok(Value::Bool(equal(a, b))),
        BinaryOp::NotEqual => return Ok(Value::Bool(!equal(a, b))),
        BinaryOp::Less => return Ok(Value::Bool(compare(a, b)? == Less)),
        BinaryOp::LessEqual => return Ok(Value::Bool(compare(a, b)? != Greater)),
        BinaryOp::Greater => return Ok(Value::Bool(compare(a, b)? == Greater)),
        BinaryOp::GreaterEqual => return Ok(Value::Bool(compare(a, b)? != Less)),
        _ => {}
    }

    if op == BinaryOp::Add {
        match (a, b) {
            (Value::String(x), Value::String(y)) => return Ok(Value::String(format!("{}{}", x, y))),
            (Value::Array(x), Value::Array(y)) => {
                return Ok(Value::Array(x.iter().chain(y).cloned().collect()))
            }
            _ => {}
        }
    }

    let (x, y) = (number(a, "arithmetic")?, number(b, "arithmetic")?);
    let overflow = || ExpressionError::Eval("integer overflow".into());
    let result = match (op, x, y) {
        (BinaryOp::Add, Num::Int(i), Num::Int(j)) => Num::Int(i.checked_add(j).ok_or_else(overflow)?),
        (BinaryOp::Subtract, Num::Int(i), Num::Int(j)) => Num::Int(i.checked_sub(j).ok_or_else(overflow)?),
        (BinaryOp::Multiply, Num::Int(i), Num::Int(j)) => Num::Int(i.checked_mul(j).ok_or_else(overflow)?),
        (BinaryOp::Add, ..) => Num::Float(x.as_f64() + y.as_f64()),
        (BinaryOp::Subtract, ..) => Num::Float(x.as_f64() - y.as_f64()),
        (BinaryOp::Multiply, ..) => Num::Float(x.as_f64() * y.as_f64()),
        (BinaryOp::Divide, ..) => {
            if y.as_f64() == 0.0 {
                return Err(ExpressionError::Eval("division by zero".into()));
            }
            Num::Float(x.as_f64() / y.as_f64())
        }
        (BinaryOp::Modulo, Num::Int(i), Num::Int(j)) => {
            if j == 0 {
                return Err(ExpressionError::Eval("modulo by zero".into()));
            }
            Num::Int(i.rem_euclid(j))
        }
        (BinaryOp::Modulo, ..) => {
            if y.as_f64() == 0.0 {
                return Err(ExpressionError::Eval("modulo by zero".into()));
            }
            Num::Float(x.as_f64().rem_euclid(y.as_f64()))
        }
        (BinaryOp::Power, ..) => power(x, y)?,
        _ => return Err(ExpressionError::Eval(format!("unsupported operator {:?}", op))),
    };
    result.into_value()
}

fn power(base: Num, exponent: Num) -> Result<Num, ExpressionError> {
    match (base, exponent) {
        (Num::Int(b), Num::Int(e)) if (0..=u32::MAX as i64).contains(&e) => b
            .checked_pow(e as u32)
            .map(Num::Int)
            .ok_or_else(|| ExpressionError::Eval("integer overflow".into())),
        _ => Ok(Num::Float(base.as_f64().powf(exponent.as_f64()))),
    }
}

// =============================================================================
// Functions
// =============================================================================

fn arity(name: &str, args: &[Value], expected: std::ops::RangeInclusive<usize>) -> Result<(), ExpressionError> {
    if expected.contains(&args.len()) {
        Ok(())
    } else {
        Err(ExpressionError::Eval(format!(
            "{}() takes {} to {} arguments, got {}",
            name,
            expected.start(),
            expected.end(),
            args.len()
        )))
    }
}

/// Arguments of min/max/sum: a single list, or the arguments themselves.
fn spread(args: &[Value]) -> &[Value] {
    match args {
        [Value::Array(items)] => items,
        _ => args,
    }
}

fn call(function: &str, args: &[Value]) -> EvalResult {
    if !ALLOWED_FUNCTIONS.contains(&function) {
        return Err(ExpressionError::UnknownFunction(function.to_string()));
    }

    match function {
        "abs" => {
            arity(function, args, 1..=1)?;
            match number(&args[0], "abs()")? {
                Num::Int(i) => Ok(Value::from(i.unsigned_abs().min(i64::MAX as u64) as i64)),
                Num::Float(f) => Num::Float(f.abs()).into_value(),
            }
        }
        "round" => {
            arity(function, args, 1..=2)?;
            let x = number(&args[0], "round()")?.as_f64();
            match args.get(1) {
                None => Ok(Value::from(x.round() as i64)),
                Some(digits) => {
                    let digits = match number(digits, "round()")? {
                        Num::Int(d) => d.clamp(-15, 15) as i32,
                        Num::Float(d) => d as i32,
                    };
                    let factor = 10f64.powi(digits);
                    Num::Float((x * factor).round() / factor).into_value()
                }
            }
        }
        "min" | "max" => {
            let items = spread(args);
            if items.is_empty() {
                return Err(ExpressionError::Eval(format!("{}() of an empty sequence", function)));
            }
            let mut best = &items[0];
            for item in &items[1..] {
                let ord = compare(item, best)?;
                let better = if function == "min" {
                    ord == std::cmp::Ordering::Less
                } else {
                    ord == std::cmp::Ordering::Greater
                };
                if better {
                    best = item;
                }
            }
            Ok(best.clone())
        }
        "sum" => {
            let mut total = Num::Int(0);
            for item in spread(args) {
                let n = number(item, "sum()")?;
                total = match (total, n) {
                    (Num::Int(a), Num::Int(b)) => match a.checked_add(b) {
                        Some(s) => Num::Int(s),
                        None => Num::Float(a as f64 + b as f64),
                    },
                    _ => Num::Float(total.as_f64() + n.as_f64()),
                };
            }
            total.into_value()
        }
        "sqrt" => {
            arity(function, args, 1..=1)?;
            let x = number(&args[0], "sqrt()")?.as_f64();
            if x < 0.0 {
                return Err(ExpressionError::Eval("sqrt() of a negative number".into()));
            }
            Num::Float(x.sqrt()).into_value()
        }
        "floor" | "ceil" => {
            arity(function, args, 1..=1)?;
            let x = number(&args[0], "floor()/ceil()")?.as_f64();
            let r = if function == "floor" { x.floor() } else { x.ceil() };
            Ok(Value::from(r as i64))
        }
        "pow" => {
            arity(function, args, 2..=2)?;
            power(number(&args[0], "pow()")?, number(&args[1], "pow()")?)?.into_value()
        }
        "int" => {
            arity(function, args, 1..=1)?;
            match &args[0] {
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .or_else(|_| s.trim().parse::<f64>().map(|f| Value::from(f.trunc() as i64)))
                    .map_err(|_| ExpressionError::Type(format!("int() cannot parse '{}'", s))),
                other => match number(other, "int()")? {
                    Num::Int(i) => Ok(Value::from(i)),
                    Num::Float(f) => Ok(Value::from(f.trunc() as i64)),
                },
            }
        }
        "float" => {
            arity(function, args, 1..=1)?;
            let f = match &args[0] {
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::Type(format!("float() cannot parse '{}'", s)))?,
                other => number(other, "float()")?.as_f64(),
            };
            Num::Float(f).into_value()
        }
        "len" => {
            arity(function, args, 1..=1)?;
            let n = match &args[0] {
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                Value::String(s) => s.chars().count(),
                other => {
                    return Err(ExpressionError::Type(format!(
                        "len() of {}",
                        type_name(other)
                    )))
                }
            };
            Ok(Value::from(n))
        }
        _ => Err(ExpressionError::UnknownFunction(function.to_string())),
    }
}
