use common::dataflow::{EvalContext, ImplementContext, Node, Scalar, Sink, Source};
use common::logical_plan::{JoinNode, JoinType};
use common::{Field, QueryError, Row};
use std::rc::Rc;

/// Nested loop join. The right input is read exactly once and cached.
pub struct Join {
    left: Box<dyn Source>,
    right: Box<dyn Source>,
    sink: Box<dyn Sink>,
    condition: Rc<dyn Scalar>,
    join_type: JoinType,
    left_width: usize,
    right_width: usize,
    /// Right rows and whether each has matched, loaded on first use.
    right_rows: Option<Vec<(Row, bool)>>,
    context: EvalContext,
}

impl Join {
    pub fn new(ctx: &mut dyn ImplementContext, node: &JoinNode) -> Result<Self, QueryError> {
        let left_schema = ctx.input_schema(0)?.clone();
        let right_schema = ctx.input_schema(1)?.clone();
        let condition = ctx.compile(&[node.condition.clone()], &left_schema.merge(&right_schema))?;
        Ok(Self {
            left: ctx.source(0)?,
            right: ctx.source(1)?,
            sink: ctx.sink()?,
            condition,
            join_type: node.join_type,
            left_width: left_schema.size(),
            right_width: right_schema.size(),
            right_rows: None,
            context: ctx.create_context(),
        })
    }

    fn load_right(&mut self) -> Result<(), QueryError> {
        if self.right_rows.is_none() {
            let mut rows = Vec::new();
            while let Some(row) = self.right.receive()? {
                rows.push((row, false));
            }
            trace!("join cached {} right row(s)", rows.len());
            self.right_rows = Some(rows);
        }
        Ok(())
    }

    /// Handles one left row against every cached right row.
    fn probe(&mut self, left: Row) -> Result<(), QueryError> {
        let right_rows = match self.right_rows.as_mut() {
            Some(rows) => rows,
            None => return Err(QueryError::InternalError(String::from("right input not loaded"))),
        };
        let mut matched = false;
        for (right, right_matched) in right_rows.iter_mut() {
            self.context.values.clear();
            self.context.values.extend_from_slice(left.values());
            self.context.values.extend_from_slice(right.values());
            if self.condition.execute_one(&self.context)? != Field::BoolField(true) {
                continue;
            }
            matched = true;
            *right_matched = true;
            match self.join_type {
                JoinType::Semi => {
                    self.sink.send(left.clone())?;
                    break;
                }
                JoinType::Anti => break,
                _ => self.sink.send(left.merge(right))?,
            }
        }
        if !matched {
            if self.join_type.generates_nulls_on_right() {
                self.sink.send(left.merge(&Row::nulls(self.right_width)))?;
            } else if self.join_type == JoinType::Anti {
                self.sink.send(left)?;
            }
        }
        Ok(())
    }
}

impl Node for Join {
    fn run(&mut self) -> Result<(), QueryError> {
        while let Some(left) = self.left.receive()? {
            self.load_right()?;
            self.probe(left)?;
        }
        self.load_right()?;
        if self.join_type.generates_nulls_on_left() {
            let padding = Row::nulls(self.left_width);
            if let Some(rows) = &self.right_rows {
                for (right, matched) in rows {
                    if !matched {
                        self.sink.send(padding.merge(right))?;
                    }
                }
            }
        }
        self.sink.end()
    }
}
