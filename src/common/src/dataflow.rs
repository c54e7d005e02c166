use crate::database::DataContext;
use crate::storage_trait::RowSequence;
use crate::{Expr, Field, QueryError, Row, TableSchema};
use std::rc::Rc;

/// Consumer end of a channel.
pub trait Source {
    /// Next row, or None once the producer has ended.
    fn receive(&mut self) -> Result<Option<Row>, QueryError>;
}

/// Producer end of a channel.
pub trait Sink {
    /// Hands a row to every consumer of this sink.
    ///
    /// # Arguments
    ///
    /// * `row` - Row to send. The sink owns it from now on.
    fn send(&mut self, row: Row) -> Result<(), QueryError>;

    /// Signals end of stream.
    fn end(&mut self) -> Result<(), QueryError>;
}

/// Execution node of the data-flow graph. Runs exactly once.
pub trait Node {
    fn run(&mut self) -> Result<(), QueryError>;
}

/// Per-row scratch handed to compiled scalars.
pub struct EvalContext {
    /// Values of the current input row.
    pub values: Vec<Field>,
    data_context: Rc<DataContext>,
}

impl EvalContext {
    pub fn new(data_context: Rc<DataContext>) -> Self {
        Self {
            values: Vec::new(),
            data_context,
        }
    }

    /// Makes `row` the current input row.
    pub fn set_row(&mut self, row: &Row) {
        self.values.clear();
        self.values.extend_from_slice(row.values());
    }

    pub fn data_context(&self) -> &DataContext {
        &self.data_context
    }
}

/// Compiled list of expressions over a fixed input shape.
pub trait Scalar {
    /// Evaluates every expression against the current row of `ctx`.
    fn execute(&self, ctx: &EvalContext) -> Result<Vec<Field>, QueryError>;

    /// Evaluates the first expression only.
    fn execute_one(&self, ctx: &EvalContext) -> Result<Field, QueryError>;

    /// Number of values produced by `execute`.
    fn width(&self) -> usize;
}

/// Services the graph compiler offers to node constructors.
pub trait ImplementContext {
    fn data_context(&self) -> Rc<DataContext>;

    /// Output shape of the node being built.
    fn schema(&self) -> &TableSchema;

    /// Output shape of the node's input at `ordinal`.
    fn input_schema(&self, ordinal: usize) -> Result<&TableSchema, QueryError>;

    /// Compiles `exprs` against `input`.
    fn compile(&self, exprs: &[Expr], input: &TableSchema) -> Result<Rc<dyn Scalar>, QueryError>;

    /// Channel reading the output of the input at `ordinal`.
    fn source(&mut self, ordinal: usize) -> Result<Box<dyn Source>, QueryError>;

    /// Channel feeding every consumer of the node being built.
    fn sink(&mut self) -> Result<Box<dyn Sink>, QueryError>;

    /// Declares the node's whole output as a lazy sequence instead of a sink.
    fn lazy(&mut self, rows: Rc<dyn RowSequence>) -> Result<(), QueryError>;

    fn create_context(&self) -> EvalContext {
        EvalContext::new(self.data_context())
    }
}

/// Plan operator outside the built-in set.
pub trait ExtensionOp {
    fn name(&self) -> &str;

    /// Builds the execution node for this operator, if it knows how.
    fn implement(
        &self,
        _ctx: &mut dyn ImplementContext,
    ) -> Option<Result<Box<dyn Node>, QueryError>> {
        None
    }
}
