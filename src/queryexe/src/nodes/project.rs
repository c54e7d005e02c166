use common::dataflow::{EvalContext, ImplementContext, Node, Scalar, Sink, Source};
use common::logical_plan::ProjectNode;
use common::{QueryError, Row};
use std::rc::Rc;

/// Evaluates the output expressions once per input row.
pub struct Project {
    source: Box<dyn Source>,
    sink: Box<dyn Sink>,
    project: Rc<dyn Scalar>,
    context: EvalContext,
}

impl Project {
    pub fn new(ctx: &mut dyn ImplementContext, node: &ProjectNode) -> Result<Self, QueryError> {
        let input = ctx.input_schema(0)?.clone();
        let project = ctx.compile(&node.exprs, &input)?;
        Ok(Self {
            source: ctx.source(0)?,
            sink: ctx.sink()?,
            project,
            context: ctx.create_context(),
        })
    }
}

impl Node for Project {
    fn run(&mut self) -> Result<(), QueryError> {
        while let Some(row) = self.source.receive()? {
            self.context.set_row(&row);
            self.sink.send(Row::new(self.project.execute(&self.context)?))?;
        }
        self.sink.end()
    }
}
