use common::dataflow::{ImplementContext, Node, Sink, Source};
use common::logical_plan::UnionNode;
use common::{QueryError, Row};
use std::collections::HashSet;

/// Concatenates its inputs in declared order, dropping repeats unless `all` is set.
pub struct Union {
    sources: Vec<Box<dyn Source>>,
    sink: Box<dyn Sink>,
    all: bool,
}

impl Union {
    pub fn new(
        ctx: &mut dyn ImplementContext,
        node: &UnionNode,
        input_count: usize,
    ) -> Result<Self, QueryError> {
        let mut sources = Vec::with_capacity(input_count);
        for ordinal in 0..input_count {
            sources.push(ctx.source(ordinal)?);
        }
        Ok(Self {
            sources,
            sink: ctx.sink()?,
            all: node.all,
        })
    }
}

impl Node for Union {
    fn run(&mut self) -> Result<(), QueryError> {
        let mut seen: HashSet<Row> = HashSet::new();
        for source in self.sources.iter_mut() {
            while let Some(row) = source.receive()? {
                if self.all || seen.insert(row.clone()) {
                    self.sink.send(row)?;
                }
            }
        }
        self.sink.end()
    }
}
