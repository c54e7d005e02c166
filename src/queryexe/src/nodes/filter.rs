use common::dataflow::{EvalContext, ImplementContext, Node, Scalar, Sink, Source};
use common::logical_plan::FilterNode;
use common::{Field, QueryError};
use std::rc::Rc;

/// Forwards the rows for which the condition is true; false and null rows are dropped.
pub struct Filter {
    source: Box<dyn Source>,
    sink: Box<dyn Sink>,
    condition: Rc<dyn Scalar>,
    context: EvalContext,
}

impl Filter {
    pub fn new(ctx: &mut dyn ImplementContext, node: &FilterNode) -> Result<Self, QueryError> {
        let input = ctx.input_schema(0)?.clone();
        let condition = ctx.compile(&[node.condition.clone()], &input)?;
        Ok(Self {
            source: ctx.source(0)?,
            sink: ctx.sink()?,
            condition,
            context: ctx.create_context(),
        })
    }
}

impl Node for Filter {
    fn run(&mut self) -> Result<(), QueryError> {
        while let Some(row) = self.source.receive()? {
            self.context.set_row(&row);
            if self.condition.execute_one(&self.context)? == Field::BoolField(true) {
                self.sink.send(row)?;
            }
        }
        self.sink.end()
    }
}
