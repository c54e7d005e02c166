use crate::channel::{new_queue, DuplicatingSink, EnumeratorSource, ListSink, ListSource, RowQueue};
use crate::nodes::*;
use crate::scalar;
use common::dataflow::{ExtensionOp, ImplementContext, Node, Scalar, Sink, Source};
use common::database::DataContext;
use common::logical_plan::*;
use common::storage_trait::RowSequence;
use common::{Expr, QueryError, TableSchema};
use std::collections::HashMap;
use std::rc::Rc;

/// Consumer side of a connection: the consuming node and the input position it reads.
/// The query result itself is the edge without a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub parent: Option<OpIndex>,
    pub ordinal: usize,
}

impl Edge {
    pub fn result() -> Self {
        Self {
            parent: None,
            ordinal: 0,
        }
    }
}

/// How a built node exposes its output.
pub(crate) enum Output {
    /// One buffer per consuming edge.
    Buffers(Vec<(Edge, RowQueue)>),
    /// A sequence consumers pull from directly.
    Lazy(Rc<dyn RowSequence>),
}

impl Output {
    /// Source reading this output along `edge`.
    pub(crate) fn source(&self, edge: Edge) -> Result<Box<dyn Source>, QueryError> {
        match self {
            Output::Lazy(rows) => Ok(Box::new(EnumeratorSource::deferred(Rc::clone(rows)))),
            Output::Buffers(buffers) => buffers
                .iter()
                .find(|(e, _)| *e == edge)
                .map(|(_, queue)| Box::new(ListSource::new(Rc::clone(queue))) as Box<dyn Source>)
                .ok_or_else(|| {
                    QueryError::InternalError(format!("no buffer registered for edge {:?}", edge))
                }),
        }
    }
}

pub(crate) struct NodeInfo {
    pub(crate) output: Output,
    pub(crate) node: Box<dyn Node>,
}

/// Data-flow graph ready to run.
pub(crate) struct Graph {
    /// Plan nodes in the order they registered their output, leaves first.
    pub(crate) order: Vec<OpIndex>,
    pub(crate) infos: HashMap<OpIndex, NodeInfo>,
    pub(crate) root: OpIndex,
}

/// Builds the execution node of an extension operator.
pub type ExtensionFactory =
    Rc<dyn Fn(&dyn ExtensionOp, &mut dyn ImplementContext) -> Result<Box<dyn Node>, QueryError>>;

/// Caller-supplied constructors for extension operators, keyed by operator name.
#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    factories: HashMap<String, ExtensionFactory>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` for operators called `name`, replacing any earlier one.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&dyn ExtensionOp, &mut dyn ImplementContext) -> Result<Box<dyn Node>, QueryError>
            + 'static,
    {
        self.factories.insert(name.to_string(), Rc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered factory first, then the operator itself.
    fn implement(
        &self,
        op: &dyn ExtensionOp,
        ctx: &mut dyn ImplementContext,
    ) -> Result<Box<dyn Node>, QueryError> {
        if let Some(factory) = self.factories.get(op.name()) {
            return factory(op, ctx);
        }
        match op.implement(ctx) {
            Some(node) => node,
            None => Err(QueryError::UnsupportedPlan(format!(
                "no implementation for extension operator {}",
                op.name()
            ))),
        }
    }
}

/// Consumer edges of every node reachable from `root`, including the result edge.
pub(crate) fn consumer_edges(plan: &LogicalPlan, root: OpIndex) -> HashMap<OpIndex, Vec<Edge>> {
    let mut edges: HashMap<OpIndex, Vec<Edge>> = HashMap::new();
    edges.entry(root).or_default().push(Edge::result());
    for index in plan.post_order(root) {
        for (ordinal, input) in plan.inputs(index).iter().enumerate() {
            edges.entry(*input).or_default().push(Edge {
                parent: Some(index),
                ordinal,
            });
        }
    }
    edges
}

/// Compiler services for the node under construction.
struct NodeBuilder<'b> {
    plan: &'b LogicalPlan,
    data_context: Rc<DataContext>,
    current: OpIndex,
    schema: &'b TableSchema,
    consumers: &'b [Edge],
    built: &'b HashMap<OpIndex, NodeInfo>,
    output: Option<Output>,
}

impl<'b> NodeBuilder<'b> {
    fn check_unregistered(&self) -> Result<(), QueryError> {
        if self.output.is_some() {
            return Err(QueryError::InternalError(format!(
                "node {} registered its output twice",
                self.current
            )));
        }
        Ok(())
    }
}

impl<'b> ImplementContext for NodeBuilder<'b> {
    fn data_context(&self) -> Rc<DataContext> {
        Rc::clone(&self.data_context)
    }

    fn schema(&self) -> &TableSchema {
        self.schema
    }

    fn input_schema(&self, ordinal: usize) -> Result<&TableSchema, QueryError> {
        self.plan
            .inputs(self.current)
            .get(ordinal)
            .and_then(|input| self.plan.schema(*input))
            .ok_or_else(|| {
                QueryError::InternalError(format!(
                    "node {} has no input {}",
                    self.current, ordinal
                ))
            })
    }

    fn compile(&self, exprs: &[Expr], input: &TableSchema) -> Result<Rc<dyn Scalar>, QueryError> {
        scalar::compile(exprs, input)
    }

    fn source(&mut self, ordinal: usize) -> Result<Box<dyn Source>, QueryError> {
        let input = *self.plan.inputs(self.current).get(ordinal).ok_or_else(|| {
            QueryError::InternalError(format!("node {} has no input {}", self.current, ordinal))
        })?;
        let info = self.built.get(&input).ok_or_else(|| {
            QueryError::InternalError(format!("input {} of node {} is not built", input, self.current))
        })?;
        info.output.source(Edge {
            parent: Some(self.current),
            ordinal,
        })
    }

    fn sink(&mut self) -> Result<Box<dyn Sink>, QueryError> {
        self.check_unregistered()?;
        if self.consumers.is_empty() {
            return Err(QueryError::InternalError(format!(
                "node {} has no consumers",
                self.current
            )));
        }
        let cancel = self.data_context.cancel_flag();
        let buffers: Vec<(Edge, RowQueue)> =
            self.consumers.iter().map(|e| (*e, new_queue())).collect();
        let mut sinks: Vec<ListSink> = buffers
            .iter()
            .map(|(_, queue)| ListSink::new(Rc::clone(queue), cancel.clone()))
            .collect();
        self.output = Some(Output::Buffers(buffers));
        if sinks.len() == 1 {
            if let Some(sink) = sinks.pop() {
                return Ok(Box::new(sink));
            }
        }
        Ok(Box::new(DuplicatingSink::new(sinks)))
    }

    fn lazy(&mut self, rows: Rc<dyn RowSequence>) -> Result<(), QueryError> {
        self.check_unregistered()?;
        self.output = Some(Output::Lazy(rows));
        Ok(())
    }
}

/// Builds the execution node for one plan operator.
fn construct(
    op: &LogicalOp,
    input_count: usize,
    ctx: &mut NodeBuilder,
    extensions: &ExtensionRegistry,
) -> Result<Box<dyn Node>, QueryError> {
    let node: Box<dyn Node> = match op {
        LogicalOp::Scan(scan) => Box::new(TableScan::new(ctx, scan)?),
        LogicalOp::Filter(filter) => Box::new(Filter::new(ctx, filter)?),
        LogicalOp::Project(project) => Box::new(Project::new(ctx, project)?),
        LogicalOp::Join(join) => Box::new(Join::new(ctx, join)?),
        LogicalOp::Sort(sort) => Box::new(Sort::new(ctx, sort)?),
        LogicalOp::Union(union) => Box::new(Union::new(ctx, union, input_count)?),
        LogicalOp::Values(values) => Box::new(Values::new(ctx, values)?),
        LogicalOp::Aggregate(aggregate) => Box::new(Aggregate::new(ctx, aggregate)?),
        LogicalOp::Window(window) => Box::new(Window::new(ctx, window)?),
        LogicalOp::Calc(_) => {
            return Err(QueryError::UnsupportedPlan(String::from(
                "calc must be split into filter and project before execution",
            )))
        }
        LogicalOp::Extension(extension) => extensions.implement(extension.op.as_ref(), ctx)?,
    };
    Ok(node)
}

/// Builds the data-flow graph of `plan`, inputs before consumers. Shared nodes are built once.
///
/// # Arguments
///
/// * `plan` - Plan to compile, already rewritten.
/// * `data_context` - Query-global context handed to every node.
/// * `extensions` - Constructors for extension operators.
pub(crate) fn compile_graph(
    plan: &LogicalPlan,
    data_context: &Rc<DataContext>,
    extensions: &ExtensionRegistry,
) -> Result<Graph, QueryError> {
    let root = plan
        .root()
        .ok_or_else(|| QueryError::ValidationError(String::from("plan has no root")))?;
    let edges = consumer_edges(plan, root);
    let mut infos: HashMap<OpIndex, NodeInfo> = HashMap::new();
    let mut order = Vec::new();
    for index in plan.post_order(root) {
        let node = plan
            .get_node(index)
            .ok_or_else(|| QueryError::InternalError(format!("missing plan node {}", index)))?;
        let consumers = edges.get(&index).map(Vec::as_slice).unwrap_or(&[]);
        let mut builder = NodeBuilder {
            plan,
            data_context: Rc::clone(data_context),
            current: index,
            schema: &node.schema,
            consumers,
            built: &infos,
            output: None,
        };
        let built = construct(&node.op, node.inputs.len(), &mut builder, extensions)?;
        let output = builder.output.take().ok_or_else(|| {
            QueryError::InternalError(format!(
                "{} node {} never registered its output",
                node.op.kind(),
                index
            ))
        })?;
        trace!(
            "built {} node {} for {} consumer(s)",
            node.op.kind(),
            index,
            consumers.len()
        );
        infos.insert(
            index,
            NodeInfo {
                output,
                node: built,
            },
        );
        order.push(index);
    }
    debug!("compiled {} node(s)", order.len());
    Ok(Graph { order, infos, root })
}
