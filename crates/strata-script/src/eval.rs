//! Expression evaluation.
//!
//! Values are `serde_json::Value`. Identifiers resolve through a [`Scope`];
//! effectful functions (`sweep`, `env`) dispatch through a [`Host`] supplied
//! by the embedding crate. The pure builtins `int`, `float`, `str`, and
//! `len` are handled here.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::{HostError, ScriptError};

/// Name resolution for identifier expressions.
///
/// `lookup` returns `Ok(None)` for an unknown name; the evaluator turns
/// that into [`ScriptError::UndefinedName`]. Errors surface failures from
/// nested evaluation (a computed attribute that itself fails).
pub trait Scope {
    fn lookup(&self, name: &str) -> Result<Option<Value>, ScriptError>;
}

impl Scope for BTreeMap<String, Value> {
    fn lookup(&self, name: &str) -> Result<Option<Value>, ScriptError> {
        Ok(self.get(name).cloned())
    }
}

/// Effectful functions provided by the embedding crate.
pub trait Host: Send + Sync {
    fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, HostError>;
}

/// A host that provides no functions at all.
pub struct NoHost;

impl Host for NoHost {
    fn call(&self, _name: &str, _args: Vec<Value>) -> Result<Value, HostError> {
        Err(HostError::Unknown)
    }
}

/// Evaluate `expr` against `scope`, dispatching function calls to `host`.
pub fn eval(expr: &Expr, scope: &dyn Scope, host: &dyn Host) -> Result<Value, ScriptError> {
    match expr {
        Expr::Int(v) => Ok(Value::from(*v)),
        Expr::Float(v) => float_value(*v),
        Expr::Bool(v) => Ok(Value::Bool(*v)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::List(items) => {
            let values = items
                .iter()
                .map(|item| eval(item, scope, host))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(values))
        }
        Expr::Ident(name) => scope
            .lookup(name)?
            .ok_or_else(|| ScriptError::UndefinedName(name.clone())),
        Expr::Unary { op, operand } => {
            let value = eval(operand, scope, host)?;
            match op {
                UnaryOp::Not => match value {
                    Value::Bool(b) => Ok(Value::Bool(!b)),
                    other => Err(type_error("!", &other)),
                },
                UnaryOp::Neg => match &value {
                    Value::Number(n) => {
                        if let Some(i) = n.as_i64() {
                            i.checked_neg()
                                .map(Value::from)
                                .ok_or_else(|| ScriptError::Type("integer overflow".to_string()))
                        } else if let Some(f) = n.as_f64() {
                            float_value(-f)
                        } else {
                            Err(type_error("-", &value))
                        }
                    }
                    _ => Err(type_error("-", &value)),
                },
            }
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, scope, host),
        Expr::Call { name, args, line } => {
            let values = args
                .iter()
                .map(|arg| eval(arg, scope, host))
                .collect::<Result<Vec<_>, _>>()?;
            match name.as_str() {
                "int" => builtin_int(values),
                "float" => builtin_float(values),
                "str" => builtin_str(values),
                "len" => builtin_len(values),
                _ => match host.call(name, values) {
                    Ok(value) => Ok(value),
                    Err(HostError::Unknown) => Err(ScriptError::UnknownFunction {
                        name: name.clone(),
                        line: *line,
                    }),
                    Err(HostError::Failed(message)) => Err(ScriptError::Host(message)),
                },
            }
        }
    }
}

fn eval_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    scope: &dyn Scope,
    host: &dyn Host,
) -> Result<Value, ScriptError> {
    // Short-circuit boolean operators evaluate the right side lazily.
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        let left = expect_bool(eval(lhs, scope, host)?)?;
        return match (op, left) {
            (BinaryOp::And, false) => Ok(Value::Bool(false)),
            (BinaryOp::Or, true) => Ok(Value::Bool(true)),
            _ => Ok(Value::Bool(expect_bool(eval(rhs, scope, host)?)?)),
        };
    }

    let left = eval(lhs, scope, host)?;
    let right = eval(rhs, scope, host)?;
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(&left, &right))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(&left, &right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => compare(op, &left, &right),
        BinaryOp::Add => match (&left, &right) {
            (Value::String(a), Value::String(b)) => {
                Ok(Value::String(format!("{}{}", a, b)))
            }
            _ => arithmetic(op, &left, &right),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, &left, &right)
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

/// Integer arithmetic when both operands are integers, floating otherwise.
fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ScriptError> {
    let (ln, rn) = match (left, right) {
        (Value::Number(a), Value::Number(b)) => (a, b),
        _ => {
            return Err(ScriptError::Type(format!(
                "cannot apply arithmetic to {} and {}",
                kind(left),
                kind(right)
            )))
        }
    };

    if let (Some(a), Some(b)) = (ln.as_i64(), rn.as_i64()) {
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div => {
                if b == 0 {
                    return Err(ScriptError::Type("division by zero".to_string()));
                }
                a.checked_div(b)
            }
            BinaryOp::Rem => {
                if b == 0 {
                    return Err(ScriptError::Type("division by zero".to_string()));
                }
                a.checked_rem(b)
            }
            _ => unreachable!("arithmetic op"),
        };
        return result
            .map(Value::from)
            .ok_or_else(|| ScriptError::Type("integer overflow".to_string()));
    }

    let a = ln
        .as_f64()
        .ok_or_else(|| ScriptError::Type("non-finite number".to_string()))?;
    let b = rn
        .as_f64()
        .ok_or_else(|| ScriptError::Type("non-finite number".to_string()))?;
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(ScriptError::Type("division by zero".to_string()));
            }
            a / b
        }
        BinaryOp::Rem => {
            if b == 0.0 {
                return Err(ScriptError::Type("division by zero".to_string()));
            }
            a % b
        }
        _ => unreachable!("arithmetic op"),
    };
    float_value(result)
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ScriptError> {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64();
            let b = b.as_f64();
            match (a, b) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            }
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    let ordering = ordering.ok_or_else(|| {
        ScriptError::Type(format!(
            "cannot compare {} and {}",
            kind(left),
            kind(right)
        ))
    })?;
    let result = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        _ => unreachable!("comparison op"),
    };
    Ok(Value::Bool(result))
}

/// Equality with numeric cross-type comparison (`1 == 1.0` holds).
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => left == right,
    }
}

fn builtin_int(mut args: Vec<Value>) -> Result<Value, ScriptError> {
    let value = one_arg("int", &mut args)?;
    match &value {
        Value::Bool(b) => Ok(Value::from(if *b { 1i64 } else { 0i64 })),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::from(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::from(f.trunc() as i64))
            } else {
                Err(type_error("int()", &value))
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| ScriptError::Type(format!("int() cannot parse '{}'", s))),
        _ => Err(type_error("int()", &value)),
    }
}

fn builtin_float(mut args: Vec<Value>) -> Result<Value, ScriptError> {
    let value = one_arg("float", &mut args)?;
    match &value {
        Value::Number(n) => float_value(
            n.as_f64()
                .ok_or_else(|| ScriptError::Type("non-finite number".to_string()))?,
        ),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ScriptError::Type(format!("float() cannot parse '{}'", s)))
            .and_then(float_value),
        _ => Err(type_error("float()", &value)),
    }
}

fn builtin_str(mut args: Vec<Value>) -> Result<Value, ScriptError> {
    let value = one_arg("str", &mut args)?;
    let text = match &value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Ok(Value::String(text))
}

fn builtin_len(mut args: Vec<Value>) -> Result<Value, ScriptError> {
    let value = one_arg("len", &mut args)?;
    match &value {
        Value::Array(items) => Ok(Value::from(items.len() as i64)),
        Value::String(s) => Ok(Value::from(s.chars().count() as i64)),
        _ => Err(type_error("len()", &value)),
    }
}

fn one_arg(name: &str, args: &mut Vec<Value>) -> Result<Value, ScriptError> {
    if args.len() != 1 {
        return Err(ScriptError::Type(format!(
            "{}() takes exactly one argument, got {}",
            name,
            args.len()
        )));
    }
    Ok(args.remove(0))
}

fn expect_bool(value: Value) -> Result<bool, ScriptError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(type_error("boolean operator", &other)),
    }
}

fn float_value(f: f64) -> Result<Value, ScriptError> {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| ScriptError::Type("non-finite number".to_string()))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

fn type_error(context: &str, value: &Value) -> ScriptError {
    ScriptError::Type(format!("{} is not valid for {}", context, kind(value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use serde_json::json;

    fn eval_expr(text: &str, scope: &BTreeMap<String, Value>) -> Result<Value, ScriptError> {
        let script = parse(&format!("X = {}", text)).unwrap();
        match script.stmts.into_iter().next() {
            Some(crate::ast::Stmt::Assign { expr, .. }) => eval(&expr, scope, &NoHost),
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    fn empty() -> BTreeMap<String, Value> {
        BTreeMap::new()
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(eval_expr("1 + 2 * 3", &empty()).unwrap(), json!(7));
        assert_eq!(eval_expr("7 / 2", &empty()).unwrap(), json!(3));
        assert_eq!(eval_expr("7 % 2", &empty()).unwrap(), json!(1));
        assert_eq!(eval_expr("-4", &empty()).unwrap(), json!(-4));
    }

    #[test]
    fn test_float_arithmetic() {
        assert_eq!(eval_expr("2.5 * 2", &empty()).unwrap(), json!(5.0));
        assert_eq!(eval_expr("7.0 / 2", &empty()).unwrap(), json!(3.5));
    }

    #[test]
    fn test_division_by_zero() {
        assert!(matches!(
            eval_expr("1 / 0", &empty()),
            Err(ScriptError::Type(_))
        ));
    }

    #[test]
    fn test_string_concat() {
        assert_eq!(
            eval_expr("\"run-\" + \"01\"", &empty()).unwrap(),
            json!("run-01")
        );
    }

    #[test]
    fn test_comparisons_and_booleans() {
        assert_eq!(eval_expr("1 < 2", &empty()).unwrap(), json!(true));
        assert_eq!(eval_expr("2.5 >= 3", &empty()).unwrap(), json!(false));
        assert_eq!(eval_expr("1 == 1.0", &empty()).unwrap(), json!(true));
        assert_eq!(
            eval_expr("true && !false || false", &empty()).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn test_short_circuit() {
        // The right side would fail with an undefined name if evaluated.
        assert_eq!(
            eval_expr("false && MISSING", &empty()).unwrap(),
            json!(false)
        );
        assert_eq!(eval_expr("true || MISSING", &empty()).unwrap(), json!(true));
    }

    #[test]
    fn test_ident_resolution() {
        let mut scope = empty();
        scope.insert("RATE".to_string(), json!(0.1));
        assert_eq!(eval_expr("RATE * 2", &scope).unwrap(), json!(0.2));
        assert_eq!(
            eval_expr("MISSING", &scope),
            Err(ScriptError::UndefinedName("MISSING".to_string()))
        );
    }

    #[test]
    fn test_builtins() {
        assert_eq!(eval_expr("int(true) + int(false)", &empty()).unwrap(), json!(1));
        assert_eq!(eval_expr("int(2.9)", &empty()).unwrap(), json!(2));
        assert_eq!(eval_expr("int(\"12\")", &empty()).unwrap(), json!(12));
        assert_eq!(eval_expr("float(3)", &empty()).unwrap(), json!(3.0));
        assert_eq!(eval_expr("str(64)", &empty()).unwrap(), json!("64"));
        assert_eq!(eval_expr("len([1, 2, 3])", &empty()).unwrap(), json!(3));
        assert_eq!(eval_expr("len(\"abc\")", &empty()).unwrap(), json!(3));
    }

    #[test]
    fn test_list_literal() {
        assert_eq!(
            eval_expr("[1, 2.5, true, \"x\"]", &empty()).unwrap(),
            json!([1, 2.5, true, "x"])
        );
    }

    #[test]
    fn test_unknown_function_carries_line() {
        let script = parse("A = 1\nB = bogus(2)").unwrap();
        let expr = match &script.stmts[1] {
            crate::ast::Stmt::Assign { expr, .. } => expr,
            other => panic!("expected assignment, got {:?}", other),
        };
        assert_eq!(
            eval(expr, &empty(), &NoHost),
            Err(ScriptError::UnknownFunction {
                name: "bogus".to_string(),
                line: 2
            })
        );
    }
}
