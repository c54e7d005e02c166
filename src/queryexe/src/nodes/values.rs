use common::dataflow::{EvalContext, ImplementContext, Node, Scalar, Sink};
use common::logical_plan::ValuesNode;
use common::{Expr, QueryError, Row, TableSchema};
use std::rc::Rc;

/// Produces literal rows.
pub struct Values {
    sink: Box<dyn Sink>,
    /// Every literal of every tuple, row-major.
    literals: Rc<dyn Scalar>,
    width: usize,
    count: usize,
    context: EvalContext,
}

impl Values {
    pub fn new(ctx: &mut dyn ImplementContext, node: &ValuesNode) -> Result<Self, QueryError> {
        let width = ctx.schema().size();
        let exprs: Vec<Expr> = node
            .tuples
            .iter()
            .flat_map(|t| t.iter().cloned().map(Expr::Literal))
            .collect();
        let literals = ctx.compile(&exprs, &TableSchema::empty())?;
        Ok(Self {
            sink: ctx.sink()?,
            literals,
            width,
            count: node.tuples.len(),
            context: ctx.create_context(),
        })
    }
}

impl Node for Values {
    fn run(&mut self) -> Result<(), QueryError> {
        let values = self.literals.execute(&self.context)?;
        if self.width == 0 {
            for _ in 0..self.count {
                self.sink.send(Row::new(Vec::new()))?;
            }
        } else {
            for chunk in values.chunks(self.width) {
                self.sink.send(Row::new(chunk.to_vec()))?;
            }
        }
        self.sink.end()
    }
}
