use common::dataflow::{EvalContext, Scalar};
use common::{Expr, Field, Operator, QueryError, TableSchema};
use std::rc::Rc;

/// Compiled expression.
type Eval = Box<dyn Fn(&EvalContext) -> Result<Field, QueryError>>;

/// Expressions compiled into closures, evaluated left to right.
pub struct CompiledScalar {
    evals: Vec<Eval>,
}

impl Scalar for CompiledScalar {
    fn execute(&self, ctx: &EvalContext) -> Result<Vec<Field>, QueryError> {
        let mut out = Vec::with_capacity(self.evals.len());
        for eval in &self.evals {
            out.push(eval(ctx)?);
        }
        Ok(out)
    }

    fn execute_one(&self, ctx: &EvalContext) -> Result<Field, QueryError> {
        match self.evals.first() {
            Some(eval) => eval(ctx),
            None => Err(QueryError::InternalError(String::from(
                "evaluating an empty scalar",
            ))),
        }
    }

    fn width(&self) -> usize {
        self.evals.len()
    }
}

/// Compiles expressions over rows of shape `input`.
///
/// Column references and operator arity are checked here, so a compiled scalar only fails on data.
///
/// # Arguments
///
/// * `exprs` - Expressions to compile, one output value each.
/// * `input` - Shape of the rows the scalar will see.
pub fn compile(exprs: &[Expr], input: &TableSchema) -> Result<Rc<dyn Scalar>, QueryError> {
    let width = input.size();
    let mut evals = Vec::with_capacity(exprs.len());
    for e in exprs {
        evals.push(compile_expr(e, width)?);
    }
    Ok(Rc::new(CompiledScalar { evals }))
}

fn compile_expr(expr: &Expr, width: usize) -> Result<Eval, QueryError> {
    match expr {
        Expr::Literal(value) => {
            let value = value.clone();
            Ok(Box::new(move |_: &EvalContext| Ok(value.clone())))
        }
        Expr::InputRef(i) => {
            let i = *i;
            if i >= width {
                return Err(QueryError::ValidationError(format!(
                    "column ${} out of range for input of width {}",
                    i, width
                )));
            }
            Ok(Box::new(move |ctx: &EvalContext| {
                ctx.values.get(i).cloned().ok_or_else(|| {
                    QueryError::ExecutionError(format!("row has no column ${}", i))
                })
            }))
        }
        Expr::DynamicParam(i) => {
            let i = *i;
            Ok(Box::new(move |ctx: &EvalContext| ctx.data_context().parameter(i).map(Clone::clone)))
        }
        Expr::Call { op, operands } => {
            check_arity(*op, operands.len())?;
            let mut evals = Vec::with_capacity(operands.len());
            for operand in operands {
                evals.push(compile_expr(operand, width)?);
            }
            compile_call(*op, evals)
        }
    }
}

fn check_arity(op: Operator, n: usize) -> Result<(), QueryError> {
    let (min, max) = op.arity();
    let too_many = max.map_or(false, |m| n > m);
    if n < min || too_many {
        return Err(QueryError::ValidationError(format!(
            "{} does not take {} operand(s)",
            op, n
        )));
    }
    if op == Operator::Case && n % 2 == 0 {
        return Err(QueryError::ValidationError(String::from(
            "CASE needs WHEN/THEN pairs followed by an ELSE operand",
        )));
    }
    Ok(())
}

fn two(mut evals: Vec<Eval>) -> Result<(Eval, Eval), QueryError> {
    let right = evals.pop();
    let left = evals.pop();
    match (left, right) {
        (Some(l), Some(r)) => Ok((l, r)),
        _ => Err(QueryError::InternalError(String::from(
            "binary operator without two operands",
        ))),
    }
}

fn one(mut evals: Vec<Eval>) -> Result<Eval, QueryError> {
    evals.pop().ok_or_else(|| {
        QueryError::InternalError(String::from("unary operator without an operand"))
    })
}

/// Null-propagating binary operator.
fn strict_binary<F>(evals: Vec<Eval>, f: F) -> Result<Eval, QueryError>
where
    F: Fn(Field, Field) -> Result<Field, QueryError> + 'static,
{
    let (left, right) = two(evals)?;
    Ok(Box::new(move |ctx: &EvalContext| {
        let l = left(ctx)?;
        let r = right(ctx)?;
        if l.is_null() || r.is_null() {
            Ok(Field::Null)
        } else {
            f(l, r)
        }
    }))
}

/// Null-propagating unary operator.
fn strict_unary<F>(evals: Vec<Eval>, f: F) -> Result<Eval, QueryError>
where
    F: Fn(Field) -> Result<Field, QueryError> + 'static,
{
    let operand = one(evals)?;
    Ok(Box::new(move |ctx: &EvalContext| {
        let v = operand(ctx)?;
        if v.is_null() {
            Ok(Field::Null)
        } else {
            f(v)
        }
    }))
}

fn type_error(op: Operator, values: &[&Field]) -> QueryError {
    let kinds: Vec<String> = values.iter().map(|v| format!("{:?}", v.dtype())).collect();
    QueryError::ExecutionError(format!("{} cannot be applied to {}", op, kinds.join(", ")))
}

fn int_arith(op: Operator, l: Field, r: Field) -> Result<Field, QueryError> {
    let (a, b) = match (&l, &r) {
        (Field::IntField(a), Field::IntField(b)) => (*a, *b),
        _ => return Err(type_error(op, &[&l, &r])),
    };
    if b == 0 && (op == Operator::Divide || op == Operator::Mod) {
        return Err(QueryError::ExecutionError(String::from("division by zero")));
    }
    let result = match op {
        Operator::Plus => a.checked_add(b),
        Operator::Minus => a.checked_sub(b),
        Operator::Times => a.checked_mul(b),
        Operator::Divide => a.checked_div(b),
        Operator::Mod => a.checked_rem(b),
        _ => return Err(type_error(op, &[&l, &r])),
    };
    result
        .map(Field::IntField)
        .ok_or_else(|| QueryError::ExecutionError(format!("integer overflow in {} {} {}", a, op, b)))
}

fn expect_bool(op: Operator, v: &Field) -> Result<Option<bool>, QueryError> {
    match v {
        Field::Null => Ok(None),
        Field::BoolField(b) => Ok(Some(*b)),
        other => Err(type_error(op, &[other])),
    }
}

fn substring(s: &str, start: i64, length: Option<i64>) -> Result<String, QueryError> {
    let chars: Vec<char> = s.chars().collect();
    let n = chars.len() as i64;
    // 1-based start; positions before the string still count against the length.
    let begin = start.saturating_sub(1);
    let end = match length {
        Some(len) if len < 0 => {
            return Err(QueryError::ExecutionError(format!(
                "negative substring length {}",
                len
            )))
        }
        Some(len) => begin.saturating_add(len),
        None => n,
    };
    let begin = begin.max(0).min(n) as usize;
    let end = end.max(0).min(n) as usize;
    if end <= begin {
        return Ok(String::new());
    }
    Ok(chars[begin..end].iter().collect())
}

fn compile_call(op: Operator, evals: Vec<Eval>) -> Result<Eval, QueryError> {
    match op {
        Operator::Equals
        | Operator::NotEquals
        | Operator::LessThan
        | Operator::LessThanOrEqual
        | Operator::GreaterThan
        | Operator::GreaterThanOrEqual => {
            let pred = op.as_predicate_op().ok_or_else(|| {
                QueryError::InternalError(format!("{} is not a comparison", op))
            })?;
            strict_binary(evals, move |l, r| {
                if l.dtype() != r.dtype() {
                    return Err(type_error(op, &[&l, &r]));
                }
                Ok(Field::BoolField(pred.compare(&l, &r)))
            })
        }
        Operator::And => Ok(Box::new(move |ctx: &EvalContext| {
            let mut saw_null = false;
            for eval in &evals {
                match expect_bool(op, &eval(ctx)?)? {
                    Some(false) => return Ok(Field::BoolField(false)),
                    Some(true) => {}
                    None => saw_null = true,
                }
            }
            Ok(if saw_null {
                Field::Null
            } else {
                Field::BoolField(true)
            })
        })),
        Operator::Or => Ok(Box::new(move |ctx: &EvalContext| {
            let mut saw_null = false;
            for eval in &evals {
                match expect_bool(op, &eval(ctx)?)? {
                    Some(true) => return Ok(Field::BoolField(true)),
                    Some(false) => {}
                    None => saw_null = true,
                }
            }
            Ok(if saw_null {
                Field::Null
            } else {
                Field::BoolField(false)
            })
        })),
        Operator::Not => strict_unary(evals, move |v| match v {
            Field::BoolField(b) => Ok(Field::BoolField(!b)),
            other => Err(type_error(op, &[&other])),
        }),
        Operator::IsNull => {
            let operand = one(evals)?;
            Ok(Box::new(move |ctx: &EvalContext| Ok(Field::BoolField(operand(ctx)?.is_null()))))
        }
        Operator::IsNotNull => {
            let operand = one(evals)?;
            Ok(Box::new(move |ctx: &EvalContext| Ok(Field::BoolField(!operand(ctx)?.is_null()))))
        }
        Operator::IsTrue => {
            let operand = one(evals)?;
            Ok(Box::new(move |ctx: &EvalContext| {
                Ok(Field::BoolField(operand(ctx)? == Field::BoolField(true)))
            }))
        }
        Operator::Plus | Operator::Minus | Operator::Times | Operator::Divide | Operator::Mod => {
            strict_binary(evals, move |l, r| int_arith(op, l, r))
        }
        Operator::Negate => strict_unary(evals, move |v| match v {
            Field::IntField(i) => i
                .checked_neg()
                .map(Field::IntField)
                .ok_or_else(|| QueryError::ExecutionError(format!("integer overflow in -{}", i))),
            other => Err(type_error(op, &[&other])),
        }),
        Operator::Upper => strict_unary(evals, move |v| match v {
            Field::StringField(s) => Ok(Field::StringField(s.to_uppercase())),
            other => Err(type_error(op, &[&other])),
        }),
        Operator::Lower => strict_unary(evals, move |v| match v {
            Field::StringField(s) => Ok(Field::StringField(s.to_lowercase())),
            other => Err(type_error(op, &[&other])),
        }),
        Operator::CharLength => strict_unary(evals, move |v| match v {
            Field::StringField(s) => Ok(Field::IntField(s.chars().count() as i64)),
            other => Err(type_error(op, &[&other])),
        }),
        Operator::Concat => strict_binary(evals, move |l, r| match (&l, &r) {
            (Field::StringField(a), Field::StringField(b)) => {
                Ok(Field::StringField(format!("{}{}", a, b)))
            }
            _ => Err(type_error(op, &[&l, &r])),
        }),
        Operator::Substring => Ok(Box::new(move |ctx: &EvalContext| {
            let mut values = Vec::with_capacity(evals.len());
            for eval in &evals {
                values.push(eval(ctx)?);
            }
            if values.iter().any(Field::is_null) {
                return Ok(Field::Null);
            }
            match values.as_slice() {
                [Field::StringField(s), Field::IntField(start)] => {
                    Ok(Field::StringField(substring(s, *start, None)?))
                }
                [Field::StringField(s), Field::IntField(start), Field::IntField(len)] => {
                    Ok(Field::StringField(substring(s, *start, Some(*len))?))
                }
                other => Err(type_error(op, &other.iter().collect::<Vec<_>>())),
            }
        })),
        Operator::Coalesce => Ok(Box::new(move |ctx: &EvalContext| {
            for eval in &evals {
                let v = eval(ctx)?;
                if !v.is_null() {
                    return Ok(v);
                }
            }
            Ok(Field::Null)
        })),
        Operator::Case => Ok(Box::new(move |ctx: &EvalContext| {
            let (otherwise, branches) = match evals.split_last() {
                Some(split) => split,
                None => return Ok(Field::Null),
            };
            for pair in branches.chunks(2) {
                if pair.len() == 2 && pair[0](ctx)? == Field::BoolField(true) {
                    return pair[1](ctx);
                }
            }
            otherwise(ctx)
        })),
        Operator::CurrentTimestamp => Ok(Box::new(move |ctx: &EvalContext| {
            Ok(Field::IntField(ctx.data_context().current_timestamp()))
        })),
    }
}
