use super::aggregate::{Accumulator, CallSpec};
use super::sort::compare_rows;
use common::dataflow::{ImplementContext, Node, Sink, Source};
use common::logical_plan::{SortKey, WindowNode};
use common::{Field, QueryError, Row};
use std::collections::HashMap;

struct Group {
    partition_by: Vec<usize>,
    order_by: Vec<SortKey>,
    calls: Vec<CallSpec>,
}

/// Appends one value per window call to every input row.
///
/// Without order keys a call sees its whole partition. With order keys it is a
/// running value from the start of the sorted partition up to the current row.
pub struct Window {
    source: Box<dyn Source>,
    sink: Box<dyn Sink>,
    groups: Vec<Group>,
}

impl Window {
    pub fn new(ctx: &mut dyn ImplementContext, node: &WindowNode) -> Result<Self, QueryError> {
        let mut groups = Vec::with_capacity(node.groups.len());
        for group in &node.groups {
            let mut calls = Vec::with_capacity(group.calls.len());
            for call in &group.calls {
                calls.push(CallSpec::new(call, true)?);
            }
            groups.push(Group {
                partition_by: group.partition_by.clone(),
                order_by: group.order_by.clone(),
                calls,
            });
        }
        Ok(Self {
            source: ctx.source(0)?,
            sink: ctx.sink()?,
            groups,
        })
    }
}

/// Row positions of each partition, partitions in first-seen order.
fn partitions(rows: &[Row], columns: &[usize]) -> Vec<Vec<usize>> {
    let mut positions: HashMap<Vec<Field>, usize> = HashMap::new();
    let mut result: Vec<Vec<usize>> = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        let key: Vec<Field> = columns
            .iter()
            .map(|c| row.get_field(*c).cloned().unwrap_or(Field::Null))
            .collect();
        match positions.get(&key) {
            Some(p) => result[*p].push(i),
            None => {
                positions.insert(key, result.len());
                result.push(vec![i]);
            }
        }
    }
    result
}

/// Evaluates one group, writing its values at `offset` of each output slot.
fn evaluate(
    group: &Group,
    rows: &[Row],
    out: &mut [Vec<Field>],
    offset: usize,
) -> Result<(), QueryError> {
    for mut members in partitions(rows, &group.partition_by) {
        let mut accumulators: Vec<Accumulator> =
            group.calls.iter().map(CallSpec::accumulator).collect();
        if group.order_by.is_empty() {
            for &i in &members {
                for (acc, spec) in accumulators.iter_mut().zip(group.calls.iter()) {
                    acc.add(spec, &rows[i])?;
                }
            }
            for (n, &i) in members.iter().enumerate() {
                for (c, (acc, spec)) in accumulators.iter().zip(group.calls.iter()).enumerate() {
                    // Unordered row numbers follow arrival order.
                    out[i][offset + c] = if spec.is_row_number() {
                        Field::IntField(n as i64 + 1)
                    } else {
                        acc.value()
                    };
                }
            }
        } else {
            members.sort_by(|a, b| compare_rows(&group.order_by, &rows[*a], &rows[*b]));
            for &i in &members {
                for (c, (acc, spec)) in accumulators
                    .iter_mut()
                    .zip(group.calls.iter())
                    .enumerate()
                {
                    acc.add(spec, &rows[i])?;
                    out[i][offset + c] = acc.value();
                }
            }
        }
    }
    Ok(())
}

impl Node for Window {
    fn run(&mut self) -> Result<(), QueryError> {
        let mut rows = Vec::new();
        while let Some(row) = self.source.receive()? {
            rows.push(row);
        }
        let width: usize = self.groups.iter().map(|g| g.calls.len()).sum();
        let mut out = vec![vec![Field::Null; width]; rows.len()];
        let mut offset = 0;
        for group in &self.groups {
            evaluate(group, &rows, &mut out, offset)?;
            offset += group.calls.len();
        }
        trace!("window evaluated {} row(s)", rows.len());
        for (row, values) in rows.into_iter().zip(out.into_iter()) {
            let mut fields = row.into_values();
            fields.extend(values);
            self.sink.send(Row::new(fields))?;
        }
        self.sink.end()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use common::logical_plan::AggregateCall;
    use common::testutil::*;
    use common::AggFunc;

    fn group(partition_by: Vec<usize>, order_by: Vec<SortKey>, calls: Vec<AggregateCall>) -> Group {
        Group {
            partition_by,
            order_by,
            calls: calls.iter().map(|c| CallSpec::new(c, true).unwrap()).collect(),
        }
    }

    fn eval(group: &Group, rows: &[Row]) -> Vec<Vec<Field>> {
        let mut out = vec![vec![Field::Null; group.calls.len()]; rows.len()];
        evaluate(group, rows, &mut out, 0).unwrap();
        out
    }

    #[test]
    fn test_partitions_first_seen() {
        let rows = create_row_list(vec![vec![2], vec![1], vec![2], vec![3]]);
        assert_eq!(partitions(&rows, &[0]), vec![vec![0, 2], vec![1], vec![3]]);
        assert_eq!(partitions(&rows, &[]), vec![vec![0, 1, 2, 3]]);
    }

    #[test]
    fn test_whole_partition() {
        init();
        let rows = create_row_list(vec![vec![1, 10], vec![2, 5], vec![1, 30]]);
        let g = group(vec![0], vec![], vec![AggregateCall::new(AggFunc::Sum, vec![1])]);
        let out = eval(&g, &rows);
        assert_eq!(
            out,
            vec![vec![Field::from(40)], vec![Field::from(5)], vec![Field::from(40)]]
        );
    }

    #[test]
    fn test_running_with_order() {
        let rows = create_row_list(vec![vec![1, 30], vec![1, 10], vec![1, 20]]);
        let g = group(
            vec![0],
            vec![SortKey::asc(1)],
            vec![
                AggregateCall::new(AggFunc::Sum, vec![1]),
                AggregateCall::new(AggFunc::RowNumber, vec![]),
            ],
        );
        let out = eval(&g, &rows);
        assert_eq!(out[0], vec![Field::from(60), Field::from(3)]);
        assert_eq!(out[1], vec![Field::from(10), Field::from(1)]);
        assert_eq!(out[2], vec![Field::from(30), Field::from(2)]);
    }

    #[test]
    fn test_row_number_without_order() {
        let rows = create_row_list(vec![vec![5], vec![6], vec![5]]);
        let g = group(vec![0], vec![], vec![AggregateCall::new(AggFunc::RowNumber, vec![])]);
        let out = eval(&g, &rows);
        assert_eq!(
            out,
            vec![vec![Field::from(1)], vec![Field::from(1)], vec![Field::from(2)]]
        );
    }
}
