//! Evaluates parsed expressions against a [`VariableStore`].

use super::parser::{parse_expression, BinaryOperator, Expr};
use super::VariableStore;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    UndefinedVariable(String),
    DivisionByZero,
    UnknownFunction(String),
    /// Wrong arity or out-of-domain argument
    InvalidArgument(String),
    ParseError(String),
    /// Evaluated to NaN or infinity
    NonFinite,
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UndefinedVariable(name) => write!(f, "Undefined variable: @{}", name),
            Self::DivisionByZero => write!(f, "Division by zero"),
            Self::UnknownFunction(name) => write!(f, "Unknown function: {}", name),
            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Self::ParseError(msg) => write!(f, "Parse error: {}", msg),
            Self::NonFinite => write!(f, "Expression did not evaluate to a finite number"),
        }
    }
}

impl std::error::Error for EvalError {}

pub fn evaluate(expr: &Expr, store: &VariableStore) -> Result<f64, EvalError> {
    let value = eval(expr, store)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EvalError::NonFinite)
    }
}

pub fn evaluate_str(input: &str, store: &VariableStore) -> Result<f64, EvalError> {
    let expr = parse_expression(input).map_err(|e| EvalError::ParseError(e.to_string()))?;
    evaluate(&expr, store)
}

/// Resolves a JSON parameter value to a number.
///
/// Numbers pass through, strings are evaluated as expressions, anything
/// else yields `Ok(None)` so callers can fall back to a default.
pub fn resolve_number(value: &Value, store: &VariableStore) -> Result<Option<f64>, EvalError> {
    match value {
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(text) if text.trim().is_empty() => Ok(None),
        Value::String(text) => evaluate_str(text, store).map(Some),
        _ => Ok(None),
    }
}

fn eval(expr: &Expr, store: &VariableStore) -> Result<f64, EvalError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::VarRef(name) => store
            .get(name)
            .ok_or_else(|| EvalError::UndefinedVariable(name.clone())),
        Expr::Constant(name) => match name.as_str() {
            "PI" => Ok(std::f64::consts::PI),
            "E" => Ok(std::f64::consts::E),
            other => Err(EvalError::InvalidArgument(format!("Unknown constant: {}", other))),
        },
        Expr::Negate(inner) => Ok(-eval(inner, store)?),
        Expr::Binary { op, left, right } => {
            let l = eval(left, store)?;
            let r = eval(right, store)?;
            match op {
                BinaryOperator::Add => Ok(l + r),
                BinaryOperator::Sub => Ok(l - r),
                BinaryOperator::Mul => Ok(l * r),
                BinaryOperator::Div => {
                    if r == 0.0 {
                        Err(EvalError::DivisionByZero)
                    } else {
                        Ok(l / r)
                    }
                }
                BinaryOperator::Pow => Ok(l.powf(r)),
            }
        }
        Expr::Call { name, args } => {
            let values = args
                .iter()
                .map(|a| eval(a, store))
                .collect::<Result<Vec<_>, _>>()?;
            call(name, &values)
        }
    }
}

fn call(name: &str, args: &[f64]) -> Result<f64, EvalError> {
    let single = || match args {
        [x] => Ok(*x),
        _ => Err(EvalError::InvalidArgument(format!("{}() takes exactly one argument", name))),
    };
    match name {
        "sqrt" => {
            let x = single()?;
            if x < 0.0 {
                return Err(EvalError::InvalidArgument(format!("sqrt of negative number {}", x)));
            }
            Ok(x.sqrt())
        }
        "abs" => Ok(single()?.abs()),
        "sin" => Ok(single()?.sin()),
        "cos" => Ok(single()?.cos()),
        "tan" => Ok(single()?.tan()),
        "min" | "max" => {
            if args.is_empty() {
                return Err(EvalError::InvalidArgument(format!("{}() needs at least one argument", name)));
            }
            let fold: fn(f64, f64) -> f64 = if name == "min" { f64::min } else { f64::max };
            Ok(args[1..].iter().copied().fold(args[0], fold))
        }
        _ => Err(EvalError::UnknownFunction(name.to_string())),
    }
}
