use common::dataflow::{ImplementContext, Node, Sink, Source};
use common::logical_plan::{NullOrdering, SortDirection, SortKey, SortNode};
use common::{Field, QueryError, Row};
use std::cmp::Ordering;

/// Compares two rows key by key. Null placement does not depend on the direction.
pub(crate) fn compare_rows(keys: &[SortKey], a: &Row, b: &Row) -> Ordering {
    for key in keys {
        let left = a.get_field(key.field).unwrap_or(&Field::Null);
        let right = b.get_field(key.field).unwrap_or(&Field::Null);
        let ord = match (left.is_null(), right.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => match key.nulls {
                NullOrdering::First => Ordering::Less,
                NullOrdering::Last => Ordering::Greater,
            },
            (false, true) => match key.nulls {
                NullOrdering::First => Ordering::Greater,
                NullOrdering::Last => Ordering::Less,
            },
            (false, false) => match key.direction {
                SortDirection::Asc => left.cmp(right),
                SortDirection::Desc => right.cmp(left),
            },
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Sort with offset and fetch. Without keys it streams and stops reading once the fetch is satisfied.
pub struct Sort {
    source: Box<dyn Source>,
    sink: Box<dyn Sink>,
    keys: Vec<SortKey>,
    offset: usize,
    limit: Option<usize>,
}

impl Sort {
    pub fn new(ctx: &mut dyn ImplementContext, node: &SortNode) -> Result<Self, QueryError> {
        Ok(Self {
            source: ctx.source(0)?,
            sink: ctx.sink()?,
            keys: node.keys.clone(),
            offset: node.offset,
            limit: node.limit(),
        })
    }

    fn run_streaming(&mut self) -> Result<(), QueryError> {
        for _ in 0..self.offset {
            if self.source.receive()?.is_none() {
                return Ok(());
            }
        }
        match self.limit {
            Some(limit) => {
                for _ in 0..limit {
                    match self.source.receive()? {
                        Some(row) => self.sink.send(row)?,
                        None => break,
                    }
                }
            }
            None => {
                while let Some(row) = self.source.receive()? {
                    self.sink.send(row)?;
                }
            }
        }
        Ok(())
    }

    fn run_sorted(&mut self) -> Result<(), QueryError> {
        let mut rows = Vec::new();
        while let Some(row) = self.source.receive()? {
            rows.push(row);
        }
        let keys = &self.keys;
        // Stable, so ties keep their input order.
        rows.sort_by(|a, b| compare_rows(keys, a, b));
        let end = match self.limit {
            Some(limit) => self.offset.saturating_add(limit).min(rows.len()),
            None => rows.len(),
        };
        let start = self.offset.min(end);
        for row in rows.drain(start..end) {
            self.sink.send(row)?;
        }
        Ok(())
    }
}

impl Node for Sort {
    fn run(&mut self) -> Result<(), QueryError> {
        if self.keys.is_empty() {
            self.run_streaming()?;
        } else {
            self.run_sorted()?;
        }
        self.sink.end()
    }
}
