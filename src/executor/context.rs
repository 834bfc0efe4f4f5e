use crate::core::{DbError, Result, Row, Schema, Value};
use crate::parser::ast::{BinaryOp, Expr};
use crate::storage::image::DatasetImage;

pub struct ExecutionContext<'a> {
    pub image: &'a mut DatasetImage,
    pub params: &'a [Value],
}

impl<'a> ExecutionContext<'a> {
    pub fn new(image: &'a mut DatasetImage, params: &'a [Value]) -> Self {
        Self { image, params }
    }

    pub fn evaluator(&self) -> Evaluator<'a> {
        Evaluator::new(self.params)
    }
}

/// Evaluates expressions against one row.
///
/// NULL propagates through arithmetic and comparisons; AND/OR follow SQL
/// three-valued logic. Integer overflow is an error rather than a wrap.
#[derive(Clone, Copy)]
pub struct Evaluator<'a> {
    params: &'a [Value],
}

impl<'a> Evaluator<'a> {
    pub fn new(params: &'a [Value]) -> Self {
        Self { params }
    }

    /// Evaluate an expression that may not reference columns (INSERT values).
    pub fn eval_constant(&self, expr: &Expr) -> Result<Value> {
        self.eval(expr, &Schema::new(Vec::new()), &Vec::new(), "")
    }

    pub fn eval(&self, expr: &Expr, schema: &Schema, row: &Row, table: &str) -> Result<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Placeholder(i) => self.params.get(*i).cloned().ok_or_else(|| {
                DbError::ExecutionError(format!(
                    "Missing parameter ${} ({} given)",
                    i + 1,
                    self.params.len()
                ))
            }),
            Expr::Column(name) => {
                let idx = schema
                    .find_column_index(name)
                    .ok_or_else(|| DbError::ColumnNotFound(name.clone(), table.to_string()))?;
                Ok(row[idx].clone())
            }
            Expr::Not(inner) => match self.eval(inner, schema, row, table)? {
                Value::Null => Ok(Value::Null),
                Value::Boolean(b) => Ok(Value::Boolean(!b)),
                other => Err(DbError::TypeMismatch(format!(
                    "NOT expects BOOLEAN, got {}",
                    other.type_name()
                ))),
            },
            Expr::Negate(inner) => match self.eval(inner, schema, row, table)? {
                Value::Null => Ok(Value::Null),
                Value::Integer(i) => i
                    .checked_neg()
                    .map(Value::Integer)
                    .ok_or_else(|| DbError::ExecutionError("Integer overflow".into())),
                other => Err(DbError::TypeMismatch(format!(
                    "Cannot negate {}",
                    other.type_name()
                ))),
            },
            Expr::IsNull { expr, negated } => {
                let is_null = self.eval(expr, schema, row, table)?.is_null();
                Ok(Value::Boolean(is_null != *negated))
            }
            Expr::BinaryOp { left, op, right } => {
                let left = self.eval(left, schema, row, table)?;
                let right = self.eval(right, schema, row, table)?;
                binary_op(&left, *op, &right)
            }
        }
    }

    /// WHERE semantics: only TRUE selects the row.
    pub fn matches(&self, expr: &Expr, schema: &Schema, row: &Row, table: &str) -> Result<bool> {
        match self.eval(expr, schema, row, table)? {
            Value::Boolean(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(DbError::TypeMismatch(format!(
                "WHERE clause must be BOOLEAN, got {}",
                other.type_name()
            ))),
        }
    }
}

fn binary_op(left: &Value, op: BinaryOp, right: &Value) -> Result<Value> {
    match op {
        BinaryOp::And | BinaryOp::Or => logical(left, op, right),

        BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply => {
            let (a, b) = match (left, right) {
                (Value::Null, _) | (_, Value::Null) => return Ok(Value::Null),
                (Value::Integer(a), Value::Integer(b)) => (*a, *b),
                _ => {
                    return Err(DbError::TypeMismatch(format!(
                        "Arithmetic on {} and {}",
                        left.type_name(),
                        right.type_name()
                    )))
                }
            };
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Subtract => a.checked_sub(b),
                _ => a.checked_mul(b),
            };
            result
                .map(Value::Integer)
                .ok_or_else(|| DbError::ExecutionError("Integer overflow".into()))
        }

        _ => {
            if left.is_null() || right.is_null() {
                return Ok(Value::Null);
            }
            let ord = left.compare(right)?;
            let result = match op {
                BinaryOp::Eq => ord.is_eq(),
                BinaryOp::NotEq => ord.is_ne(),
                BinaryOp::Lt => ord.is_lt(),
                BinaryOp::LtEq => ord.is_le(),
                BinaryOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            };
            Ok(Value::Boolean(result))
        }
    }
}

fn logical(left: &Value, op: BinaryOp, right: &Value) -> Result<Value> {
    let as_tristate = |v: &Value| match v {
        Value::Null => Ok(None),
        Value::Boolean(b) => Ok(Some(*b)),
        other => Err(DbError::TypeMismatch(format!(
            "Logical operator expects BOOLEAN, got {}",
            other.type_name()
        ))),
    };
    let (a, b) = (as_tristate(left)?, as_tristate(right)?);

    let result = match op {
        BinaryOp::And => match (a, b) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        _ => match (a, b) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
    };
    Ok(result.map(Value::Boolean).unwrap_or(Value::Null))
}
