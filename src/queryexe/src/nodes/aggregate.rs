use common::dataflow::{ImplementContext, Node, Sink, Source};
use common::logical_plan::{AggregateCall, AggregateNode};
use common::{AggFunc, Field, QueryError, Row};
use std::collections::HashMap;

/// Aggregate call with a known evaluation strategy.
#[derive(Debug, Clone)]
pub(crate) struct CallSpec {
    func: AggFunc,
    args: Vec<usize>,
    filter: Option<usize>,
}

impl CallSpec {
    /// Validates a call before any row is read.
    ///
    /// # Arguments
    ///
    /// * `call` - Call from the plan.
    /// * `windowed` - Whether the call is evaluated over a window, which also allows ROW_NUMBER.
    pub(crate) fn new(call: &AggregateCall, windowed: bool) -> Result<Self, QueryError> {
        if call.distinct {
            return Err(QueryError::InvalidAggregate(format!(
                "distinct {} is not supported",
                call.func
            )));
        }
        let arity_ok = match &call.func {
            AggFunc::Count => true,
            AggFunc::Sum | AggFunc::Min | AggFunc::Max | AggFunc::Avg => call.args.len() == 1,
            AggFunc::RowNumber if windowed => call.args.is_empty(),
            AggFunc::RowNumber | AggFunc::Custom(_) => {
                return Err(QueryError::InvalidAggregate(format!(
                    "no aggregate strategy for {}",
                    call.func
                )))
            }
        };
        if !arity_ok {
            return Err(QueryError::InvalidAggregate(format!(
                "{} does not take {} argument(s)",
                call.func,
                call.args.len()
            )));
        }
        Ok(Self {
            func: call.func.clone(),
            args: call.args.clone(),
            filter: call.filter,
        })
    }

    pub(crate) fn is_row_number(&self) -> bool {
        self.func == AggFunc::RowNumber
    }

    pub(crate) fn accumulator(&self) -> Accumulator {
        match self.func {
            AggFunc::Sum => Accumulator::Sum(None),
            AggFunc::Min => Accumulator::Min(None),
            AggFunc::Max => Accumulator::Max(None),
            AggFunc::Avg => Accumulator::Avg { sum: 0, count: 0 },
            AggFunc::RowNumber => Accumulator::RowNumber(0),
            AggFunc::Count | AggFunc::Custom(_) => Accumulator::Count(0),
        }
    }
}

/// Running state of one aggregate call.
#[derive(Debug, Clone)]
pub(crate) enum Accumulator {
    Count(i64),
    Sum(Option<i64>),
    Min(Option<Field>),
    Max(Option<Field>),
    Avg { sum: i64, count: i64 },
    RowNumber(i64),
}

fn overflow(func: &str) -> QueryError {
    QueryError::ExecutionError(format!("integer overflow in {}", func))
}

fn expect_int(func: &str, value: &Field) -> Result<i64, QueryError> {
    match value {
        Field::IntField(i) => Ok(*i),
        other => Err(QueryError::ExecutionError(format!(
            "{} expects integers, got {:?}",
            func,
            other.dtype()
        ))),
    }
}

/// Keeps `current` or replaces it with `value` when `replace(value, current)` holds.
fn extreme<F>(func: &str, current: &mut Option<Field>, value: &Field, replace: F) -> Result<(), QueryError>
where
    F: Fn(&Field, &Field) -> bool,
{
    match current {
        Some(existing) => {
            if existing.dtype() != value.dtype() {
                return Err(QueryError::ExecutionError(format!(
                    "{} over mixed {:?} and {:?} values",
                    func,
                    existing.dtype(),
                    value.dtype()
                )));
            }
            if replace(value, existing) {
                *existing = value.clone();
            }
        }
        None => *current = Some(value.clone()),
    }
    Ok(())
}

impl Accumulator {
    /// Adds one input row.
    pub(crate) fn add(&mut self, spec: &CallSpec, row: &Row) -> Result<(), QueryError> {
        if let Some(f) = spec.filter {
            if row.get_field(f) != Some(&Field::BoolField(true)) {
                return Ok(());
            }
        }
        let mut args = Vec::with_capacity(spec.args.len());
        for a in &spec.args {
            args.push(row.get_field(*a).ok_or_else(|| {
                QueryError::ExecutionError(format!("row has no column ${}", a))
            })?);
        }
        if let Accumulator::RowNumber(n) = self {
            *n += 1;
            return Ok(());
        }
        if let Accumulator::Count(n) = self {
            if args.iter().all(|v| !v.is_null()) {
                *n += 1;
            }
            return Ok(());
        }
        // The remaining functions take one argument and ignore nulls.
        let value = match args.first() {
            Some(v) if !v.is_null() => *v,
            _ => return Ok(()),
        };
        match self {
            Accumulator::Sum(total) => {
                let v = expect_int("sum", value)?;
                *total = Some(match total {
                    Some(t) => t.checked_add(v).ok_or_else(|| overflow("sum"))?,
                    None => v,
                });
            }
            Accumulator::Avg { sum, count } => {
                let v = expect_int("avg", value)?;
                *sum = sum.checked_add(v).ok_or_else(|| overflow("avg"))?;
                *count += 1;
            }
            Accumulator::Min(current) => extreme("min", current, value, |v, cur| v < cur)?,
            Accumulator::Max(current) => extreme("max", current, value, |v, cur| v > cur)?,
            Accumulator::Count(_) | Accumulator::RowNumber(_) => {}
        }
        Ok(())
    }

    /// Current result; null when no value contributed.
    pub(crate) fn value(&self) -> Field {
        match self {
            Accumulator::Count(n) | Accumulator::RowNumber(n) => Field::IntField(*n),
            Accumulator::Sum(total) => total.map_or(Field::Null, Field::IntField),
            Accumulator::Min(v) | Accumulator::Max(v) => v.clone().unwrap_or(Field::Null),
            Accumulator::Avg { sum, count } => {
                if *count == 0 {
                    Field::Null
                } else {
                    Field::IntField(sum / count)
                }
            }
        }
    }
}

/// Groups of one grouping set, in first-seen order.
type Groups = (HashMap<Vec<Field>, usize>, Vec<(Vec<Field>, Vec<Accumulator>)>);

/// Hash aggregation. Groups are emitted in the order they were first seen, one grouping set
/// after another.
pub struct Aggregate {
    source: Box<dyn Source>,
    sink: Box<dyn Sink>,
    group_by: Vec<usize>,
    /// Per grouping set, which `group_by` columns it keeps.
    sets: Vec<Vec<bool>>,
    calls: Vec<CallSpec>,
}

impl Aggregate {
    pub fn new(ctx: &mut dyn ImplementContext, node: &AggregateNode) -> Result<Self, QueryError> {
        // Reject bad calls before wiring any channel.
        let mut calls = Vec::with_capacity(node.calls.len());
        for call in &node.calls {
            calls.push(CallSpec::new(call, false)?);
        }
        let sets = if node.group_sets.is_empty() {
            vec![vec![true; node.group_by.len()]]
        } else {
            node.group_sets
                .iter()
                .map(|set| node.group_by.iter().map(|g| set.contains(g)).collect())
                .collect()
        };
        Ok(Self {
            source: ctx.source(0)?,
            sink: ctx.sink()?,
            group_by: node.group_by.clone(),
            sets,
            calls,
        })
    }

    fn fresh(&self) -> Vec<Accumulator> {
        self.calls.iter().map(CallSpec::accumulator).collect()
    }

    fn key(&self, keep: &[bool], row: &Row) -> Vec<Field> {
        self.group_by
            .iter()
            .zip(keep)
            .map(|(g, kept)| {
                if *kept {
                    row.get_field(*g).cloned().unwrap_or(Field::Null)
                } else {
                    Field::Null
                }
            })
            .collect()
    }
}

impl Node for Aggregate {
    fn run(&mut self) -> Result<(), QueryError> {
        let mut tables: Vec<Groups> = self.sets.iter().map(|_| (HashMap::new(), Vec::new())).collect();
        while let Some(row) = self.source.receive()? {
            for (keep, (positions, groups)) in self.sets.iter().zip(tables.iter_mut()) {
                let key = self.key(keep, &row);
                let position = match positions.get(&key) {
                    Some(p) => *p,
                    None => {
                        positions.insert(key.clone(), groups.len());
                        groups.push((key, self.fresh()));
                        groups.len() - 1
                    }
                };
                let accumulators = &mut groups[position].1;
                for (acc, spec) in accumulators.iter_mut().zip(self.calls.iter()) {
                    acc.add(spec, &row)?;
                }
            }
        }
        // A set without group columns yields one row even over empty input.
        for (keep, (_, groups)) in self.sets.iter().zip(tables.iter_mut()) {
            if keep.iter().all(|kept| !kept) && groups.is_empty() {
                groups.push((vec![Field::Null; keep.len()], self.fresh()));
            }
        }
        debug!(
            "aggregate produced {} group(s) over {} grouping set(s)",
            tables.iter().map(|(_, groups)| groups.len()).sum::<usize>(),
            tables.len()
        );
        for (_, groups) in tables {
            for (mut key, accumulators) in groups {
                key.extend(accumulators.iter().map(Accumulator::value));
                self.sink.send(Row::new(key))?;
            }
        }
        self.sink.end()
    }
}
