use crate::logical_plan::PredicateOp;
use crate::{DataType, Field, QueryError, TableSchema};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Row-level expression evaluated by the scalar compiler.
///
/// Column references are ordinals into the input row of the node that owns the expression.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Expr {
    /// Constant value.
    Literal(Field),
    /// Column of the input row.
    InputRef(usize),
    /// Parameter bound in the data context.
    DynamicParam(usize),
    /// Operator applied to operands, evaluated left to right.
    Call { op: Operator, operands: Vec<Expr> },
}

/// Scalar operators understood by the interpreter.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
    Not,
    IsNull,
    IsNotNull,
    IsTrue,
    Plus,
    Minus,
    Times,
    Divide,
    Mod,
    Negate,
    Upper,
    Lower,
    /// SUBSTRING(s, start [, length]) with a 1-based start.
    Substring,
    CharLength,
    Concat,
    Coalesce,
    /// CASE WHEN c1 THEN v1 [WHEN c2 THEN v2 ...] ELSE e END, operands are [c1, v1, ..., e].
    Case,
    CurrentTimestamp,
}

impl Operator {
    /// Inclusive bounds on the number of operands.
    pub fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Operator::Equals
            | Operator::NotEquals
            | Operator::LessThan
            | Operator::LessThanOrEqual
            | Operator::GreaterThan
            | Operator::GreaterThanOrEqual
            | Operator::Plus
            | Operator::Minus
            | Operator::Times
            | Operator::Divide
            | Operator::Mod
            | Operator::Concat => (2, Some(2)),
            Operator::Not
            | Operator::IsNull
            | Operator::IsNotNull
            | Operator::IsTrue
            | Operator::Negate
            | Operator::Upper
            | Operator::Lower
            | Operator::CharLength => (1, Some(1)),
            Operator::Substring => (2, Some(3)),
            Operator::And | Operator::Or | Operator::Coalesce | Operator::Case => (1, None),
            Operator::CurrentTimestamp => (0, Some(0)),
        }
    }

    /// Comparison operators map onto the predicate operators storage entities understand.
    pub fn as_predicate_op(&self) -> Option<PredicateOp> {
        match self {
            Operator::Equals => Some(PredicateOp::Equals),
            Operator::NotEquals => Some(PredicateOp::NotEq),
            Operator::LessThan => Some(PredicateOp::LessThan),
            Operator::LessThanOrEqual => Some(PredicateOp::LessThanOrEq),
            Operator::GreaterThan => Some(PredicateOp::GreaterThan),
            Operator::GreaterThanOrEqual => Some(PredicateOp::GreaterThanOrEq),
            _ => None,
        }
    }

    fn result_type(&self, first_operand: DataType) -> DataType {
        match self {
            Operator::Equals
            | Operator::NotEquals
            | Operator::LessThan
            | Operator::LessThanOrEqual
            | Operator::GreaterThan
            | Operator::GreaterThanOrEqual
            | Operator::And
            | Operator::Or
            | Operator::Not
            | Operator::IsNull
            | Operator::IsNotNull
            | Operator::IsTrue => DataType::Bool,
            Operator::Plus
            | Operator::Minus
            | Operator::Times
            | Operator::Divide
            | Operator::Mod
            | Operator::Negate
            | Operator::CharLength
            | Operator::CurrentTimestamp => DataType::Int,
            Operator::Upper | Operator::Lower | Operator::Substring | Operator::Concat => {
                DataType::String
            }
            Operator::Coalesce | Operator::Case => first_operand,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op_str = match self {
            Operator::Equals => "=",
            Operator::NotEquals => "<>",
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::Not => "NOT",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
            Operator::IsTrue => "IS TRUE",
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Times => "*",
            Operator::Divide => "/",
            Operator::Mod => "MOD",
            Operator::Negate => "-",
            Operator::Upper => "UPPER",
            Operator::Lower => "LOWER",
            Operator::Substring => "SUBSTRING",
            Operator::CharLength => "CHAR_LENGTH",
            Operator::Concat => "||",
            Operator::Coalesce => "COALESCE",
            Operator::Case => "CASE",
            Operator::CurrentTimestamp => "CURRENT_TIMESTAMP",
        };
        write!(f, "{}", op_str)
    }
}

impl Expr {
    pub fn input(i: usize) -> Self {
        Expr::InputRef(i)
    }

    pub fn lit<F: Into<Field>>(value: F) -> Self {
        Expr::Literal(value.into())
    }

    pub fn null() -> Self {
        Expr::Literal(Field::Null)
    }

    pub fn param(i: usize) -> Self {
        Expr::DynamicParam(i)
    }

    pub fn call(op: Operator, operands: Vec<Expr>) -> Self {
        Expr::Call { op, operands }
    }

    pub fn binary(op: Operator, left: Expr, right: Expr) -> Self {
        Expr::call(op, vec![left, right])
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Expr::binary(Operator::Equals, left, right)
    }

    pub fn gt(left: Expr, right: Expr) -> Self {
        Expr::binary(Operator::GreaterThan, left, right)
    }

    pub fn lt(left: Expr, right: Expr) -> Self {
        Expr::binary(Operator::LessThan, left, right)
    }

    pub fn and(operands: Vec<Expr>) -> Self {
        Expr::call(Operator::And, operands)
    }

    pub fn or(operands: Vec<Expr>) -> Self {
        Expr::call(Operator::Or, operands)
    }

    pub fn not(operand: Expr) -> Self {
        Expr::call(Operator::Not, vec![operand])
    }

    /// Returns the column ordinal if this expression is a plain column reference.
    pub fn as_input_ref(&self) -> Option<usize> {
        match self {
            Expr::InputRef(i) => Some(*i),
            _ => None,
        }
    }

    /// Ordinals of all columns referenced by this expression.
    pub fn input_refs(&self) -> BTreeSet<usize> {
        let mut refs = BTreeSet::new();
        self.collect_input_refs(&mut refs);
        refs
    }

    fn collect_input_refs(&self, refs: &mut BTreeSet<usize>) {
        match self {
            Expr::InputRef(i) => {
                refs.insert(*i);
            }
            Expr::Call { operands, .. } => {
                for operand in operands {
                    operand.collect_input_refs(refs);
                }
            }
            Expr::Literal(_) | Expr::DynamicParam(_) => {}
        }
    }

    /// Rewrites every column reference through `mapping`.
    ///
    /// # Arguments
    ///
    /// * `mapping` - Maps an old ordinal to the new one, None if the column is unavailable.
    pub fn map_inputs<F>(&self, mapping: &F) -> Result<Expr, QueryError>
    where
        F: Fn(usize) -> Option<usize>,
    {
        match self {
            Expr::InputRef(i) => mapping(*i).map(Expr::InputRef).ok_or_else(|| {
                QueryError::ValidationError(format!("column ${} is not available", i))
            }),
            Expr::Call { op, operands } => {
                let mut mapped = Vec::with_capacity(operands.len());
                for operand in operands {
                    mapped.push(operand.map_inputs(mapping)?);
                }
                Ok(Expr::call(*op, mapped))
            }
            other => Ok(other.clone()),
        }
    }

    /// Splits nested ANDs into their conjuncts.
    pub fn conjunctions(&self) -> Vec<Expr> {
        let mut out = Vec::new();
        self.collect_conjunctions(&mut out);
        out
    }

    fn collect_conjunctions(&self, out: &mut Vec<Expr>) {
        match self {
            Expr::Call {
                op: Operator::And,
                operands,
            } => {
                for operand in operands {
                    operand.collect_conjunctions(out);
                }
            }
            Expr::Literal(Field::BoolField(true)) => {}
            other => out.push(other.clone()),
        }
    }

    /// ANDs the expressions together, None for an empty list.
    pub fn compose_conjunction(mut exprs: Vec<Expr>) -> Option<Expr> {
        match exprs.len() {
            0 => None,
            1 => exprs.pop(),
            _ => Some(Expr::and(exprs)),
        }
    }

    /// Best-effort result type against an input shape.
    pub fn data_type(&self, input: &TableSchema) -> DataType {
        match self {
            Expr::Literal(f) => f.dtype(),
            Expr::InputRef(i) => input
                .get_attribute(*i)
                .map(|a| *a.dtype())
                .unwrap_or(DataType::Any),
            Expr::DynamicParam(_) => DataType::Any,
            Expr::Call { op, operands } => {
                let first = match op {
                    // CASE takes its type from the first THEN branch.
                    Operator::Case if operands.len() > 1 => operands[1].data_type(input),
                    _ => operands
                        .first()
                        .map(|e| e.data_type(input))
                        .unwrap_or(DataType::Any),
                };
                op.result_type(first)
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Field::StringField(s)) => write!(f, "'{}'", s),
            Expr::Literal(field) => write!(f, "{}", field),
            Expr::InputRef(i) => write!(f, "${}", i),
            Expr::DynamicParam(i) => write!(f, "?{}", i),
            Expr::Call { op, operands } => {
                write!(f, "{}(", op)?;
                for (i, operand) in operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", operand)?;
                }
                write!(f, ")")
            }
        }
    }
}
