use crate::dataflow::ExtensionOp;
use crate::{Attribute, DataType, Expr, Field, QueryError, TableSchema};
pub use logical_op::*;
use std::collections::HashSet;
use std::default::Default;
use std::fmt;
use std::sync::Arc;
mod logical_op;

/// OpIndex is used to identify nodes in the LogicalPlan.
pub type OpIndex = usize;

/// A node of the plan: the operation, its ordered inputs and its output shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    pub op: LogicalOp,
    #[serde(default)]
    pub inputs: Vec<OpIndex>,
    pub schema: TableSchema,
}

impl PlanNode {
    pub fn new(op: LogicalOp, inputs: Vec<OpIndex>, schema: TableSchema) -> Self {
        Self { op, inputs, schema }
    }
}

/// Arena of plan nodes where edges point from a consumer to its inputs.
///
/// A node listed as the input of several consumers is shared; node identity is its index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalPlan {
    nodes: Vec<PlanNode>,
    /// The root represents final output operation.
    root: Option<OpIndex>,
}

impl Default for LogicalPlan {
    fn default() -> Self {
        Self::new()
    }
}

impl LogicalPlan {
    /// Creates an empty logical plan.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
        }
    }

    /// Adds a node after validating it and makes it the root.
    ///
    /// # Arguments
    ///
    /// * `node` - Node to add; its inputs must already be in the plan.
    pub fn add_node(&mut self, node: PlanNode) -> Result<OpIndex, QueryError> {
        self.check_node(&node)?;
        let index = self.nodes.len();
        self.nodes.push(node);
        self.root = Some(index);
        Ok(index)
    }

    /// Appends a node without moving the root. Used by rewrites.
    pub fn push_node(&mut self, node: PlanNode) -> Result<OpIndex, QueryError> {
        self.check_node(&node)?;
        let index = self.nodes.len();
        self.nodes.push(node);
        Ok(index)
    }

    /// Substitutes the node at `index`. Every consumer of `index` sees the new node.
    ///
    /// # Arguments
    ///
    /// * `index` - Node to replace.
    /// * `node` - Replacement; must not (transitively) read from `index`.
    pub fn replace_node(&mut self, index: OpIndex, node: PlanNode) -> Result<(), QueryError> {
        if index >= self.nodes.len() {
            return Err(QueryError::ValidationError(format!(
                "no plan node {} to replace",
                index
            )));
        }
        self.check_node(&node)?;
        for input in &node.inputs {
            if *input == index || self.reaches(*input, index) {
                return Err(QueryError::ValidationError(format!(
                    "replacing node {} would create a cycle",
                    index
                )));
            }
        }
        self.nodes[index] = node;
        Ok(())
    }

    /// Makes `index` the root.
    pub fn set_root(&mut self, index: OpIndex) -> Result<(), QueryError> {
        if index >= self.nodes.len() {
            return Err(QueryError::ValidationError(format!(
                "root {} is not a plan node",
                index
            )));
        }
        self.root = Some(index);
        Ok(())
    }

    /// Gets the index of the root node, if such a node is present.
    pub fn root(&self) -> Option<OpIndex> {
        self.root
    }

    pub fn get_node(&self, index: OpIndex) -> Option<&PlanNode> {
        self.nodes.get(index)
    }

    /// Returns the LogicalOperation associated with a node.
    ///
    /// # Arguments
    ///
    /// * `index` - Index of the node to get the logical operation of.
    pub fn get_operator(&self, index: OpIndex) -> Option<&LogicalOp> {
        self.nodes.get(index).map(|n| &n.op)
    }

    /// Inputs of a node, empty for unknown indices.
    pub fn inputs(&self, index: OpIndex) -> &[OpIndex] {
        self.nodes
            .get(index)
            .map(|n| n.inputs.as_slice())
            .unwrap_or(&[])
    }

    pub fn schema(&self, index: OpIndex) -> Option<&TableSchema> {
        self.nodes.get(index).map(|n| &n.schema)
    }

    /// Returns the total number of nodes present in the arena.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the total number of edges present in the graph.
    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|n| n.inputs.len()).sum()
    }

    /// Nodes reachable from `from`, each once, inputs before consumers.
    pub fn post_order(&self, from: OpIndex) -> Vec<OpIndex> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        self.visit(from, &mut visited, &mut order);
        order
    }

    fn visit(&self, index: OpIndex, visited: &mut HashSet<OpIndex>, order: &mut Vec<OpIndex>) {
        if !visited.insert(index) {
            return;
        }
        for input in self.inputs(index) {
            self.visit(*input, visited, order);
        }
        order.push(index);
    }

    /// Whether data flows from `target` into `from`.
    fn reaches(&self, from: OpIndex, target: OpIndex) -> bool {
        self.post_order(from).contains(&target)
    }

    /// Adds a node producing literal rows.
    ///
    /// # Arguments
    ///
    /// * `schema` - Shape of every tuple.
    /// * `tuples` - Rows to produce.
    pub fn add_values(
        &mut self,
        schema: TableSchema,
        tuples: Vec<Vec<Field>>,
    ) -> Result<OpIndex, QueryError> {
        self.add_node(PlanNode::new(
            LogicalOp::Values(ValuesNode { tuples }),
            Vec::new(),
            schema,
        ))
    }

    /// Adds a scan over every column of an entity.
    ///
    /// # Arguments
    ///
    /// * `table` - Entity name.
    /// * `schema` - Entity row shape.
    pub fn add_scan(&mut self, table: &str, schema: TableSchema) -> Result<OpIndex, QueryError> {
        self.add_node(PlanNode::new(
            LogicalOp::Scan(ScanNode {
                table: table.to_string(),
                filters: Vec::new(),
                projects: None,
            }),
            Vec::new(),
            schema,
        ))
    }

    pub fn add_filter(&mut self, input: OpIndex, condition: Expr) -> Result<OpIndex, QueryError> {
        let schema = self.input_schema(input)?.clone();
        self.add_node(PlanNode::new(
            LogicalOp::Filter(FilterNode { condition }),
            vec![input],
            schema,
        ))
    }

    /// Adds a projection.
    ///
    /// # Arguments
    ///
    /// * `input` - Input node.
    /// * `exprs` - One expression per output column.
    /// * `names` - Output column names; derived from the expressions when empty.
    pub fn add_project(
        &mut self,
        input: OpIndex,
        exprs: Vec<Expr>,
        names: &[&str],
    ) -> Result<OpIndex, QueryError> {
        let schema = project_schema(self.input_schema(input)?, &exprs, names)?;
        self.add_node(PlanNode::new(
            LogicalOp::Project(ProjectNode { exprs }),
            vec![input],
            schema,
        ))
    }

    pub fn add_calc(
        &mut self,
        input: OpIndex,
        condition: Option<Expr>,
        exprs: Vec<Expr>,
        names: &[&str],
    ) -> Result<OpIndex, QueryError> {
        let schema = project_schema(self.input_schema(input)?, &exprs, names)?;
        self.add_node(PlanNode::new(
            LogicalOp::Calc(CalcNode { condition, exprs }),
            vec![input],
            schema,
        ))
    }

    pub fn add_join(
        &mut self,
        left: OpIndex,
        right: OpIndex,
        condition: Expr,
        join_type: JoinType,
    ) -> Result<OpIndex, QueryError> {
        let left_schema = self.input_schema(left)?;
        let right_schema = self.input_schema(right)?;
        let schema = if join_type.projects_right() {
            left_schema.merge(right_schema)
        } else {
            left_schema.clone()
        };
        self.add_node(PlanNode::new(
            LogicalOp::Join(JoinNode {
                condition,
                join_type,
            }),
            vec![left, right],
            schema,
        ))
    }

    pub fn add_sort(
        &mut self,
        input: OpIndex,
        keys: Vec<SortKey>,
        offset: usize,
        fetch: Option<i64>,
    ) -> Result<OpIndex, QueryError> {
        let schema = self.input_schema(input)?.clone();
        self.add_node(PlanNode::new(
            LogicalOp::Sort(SortNode {
                keys,
                offset,
                fetch,
            }),
            vec![input],
            schema,
        ))
    }

    pub fn add_union(&mut self, inputs: Vec<OpIndex>, all: bool) -> Result<OpIndex, QueryError> {
        let first = inputs.first().ok_or_else(|| {
            QueryError::ValidationError(String::from("union needs at least one input"))
        })?;
        let schema = self.input_schema(*first)?.clone();
        self.add_node(PlanNode::new(
            LogicalOp::Union(UnionNode { all }),
            inputs,
            schema,
        ))
    }

    /// Adds an aggregation. The output is the group columns followed by one column per call.
    pub fn add_aggregate(
        &mut self,
        input: OpIndex,
        group_by: Vec<usize>,
        calls: Vec<AggregateCall>,
    ) -> Result<OpIndex, QueryError> {
        self.add_grouping_aggregate(input, group_by, Vec::new(), calls)
    }

    /// Adds an aggregation over several grouping sets.
    ///
    /// The output keeps every `group_by` column; a row produced for one set carries null in
    /// the group columns outside that set.
    ///
    /// # Arguments
    ///
    /// * `input` - Input node.
    /// * `group_by` - Union of all group columns.
    /// * `group_sets` - Sets evaluated in order, each a subset of `group_by`.
    /// * `calls` - Aggregate calls.
    pub fn add_grouping_aggregate(
        &mut self,
        input: OpIndex,
        group_by: Vec<usize>,
        group_sets: Vec<Vec<usize>>,
        calls: Vec<AggregateCall>,
    ) -> Result<OpIndex, QueryError> {
        let input_schema = self.input_schema(input)?;
        let mut attrs: Vec<Attribute> = input_schema.project(&group_by)?.attributes().cloned().collect();
        for (i, call) in calls.iter().enumerate() {
            attrs.push(Attribute::new(
                call.output_name(i),
                call_type(call, input_schema),
            ));
        }
        self.add_node(PlanNode::new(
            LogicalOp::Aggregate(AggregateNode {
                group_by,
                group_sets,
                calls,
            }),
            vec![input],
            TableSchema::new(attrs),
        ))
    }

    /// Adds a window node. The output is the input row followed by one column per call.
    pub fn add_window(
        &mut self,
        input: OpIndex,
        groups: Vec<WindowGroup>,
    ) -> Result<OpIndex, QueryError> {
        let input_schema = self.input_schema(input)?;
        let mut attrs: Vec<Attribute> = input_schema.attributes().cloned().collect();
        let mut position = 0;
        for group in &groups {
            for call in &group.calls {
                attrs.push(Attribute::new(
                    call.output_name(position),
                    call_type(call, input_schema),
                ));
                position += 1;
            }
        }
        self.add_node(PlanNode::new(
            LogicalOp::Window(WindowNode { groups }),
            vec![input],
            TableSchema::new(attrs),
        ))
    }

    pub fn add_extension(
        &mut self,
        inputs: Vec<OpIndex>,
        op: Arc<dyn ExtensionOp>,
        schema: TableSchema,
    ) -> Result<OpIndex, QueryError> {
        self.add_node(PlanNode::new(
            LogicalOp::Extension(ExtensionNode::new(op)),
            inputs,
            schema,
        ))
    }

    fn input_schema(&self, index: OpIndex) -> Result<&TableSchema, QueryError> {
        self.schema(index).ok_or_else(|| {
            QueryError::ValidationError(format!("input {} is not a plan node", index))
        })
    }

    /// Validates input indices, arity and column references of a node.
    fn check_node(&self, node: &PlanNode) -> Result<(), QueryError> {
        let mut input_schemas = Vec::with_capacity(node.inputs.len());
        for input in &node.inputs {
            input_schemas.push(self.input_schema(*input)?);
        }
        let kind = node.op.kind().to_string();
        let expect_inputs = |n: usize| {
            if input_schemas.len() == n {
                Ok(())
            } else {
                Err(QueryError::ValidationError(format!(
                    "{} expects {} input(s), got {}",
                    kind,
                    n,
                    input_schemas.len()
                )))
            }
        };
        match &node.op {
            LogicalOp::Scan(scan) => {
                expect_inputs(0)?;
                if let Some(projects) = &scan.projects {
                    if projects.len() != node.schema.size() {
                        return Err(QueryError::ValidationError(format!(
                            "scan of {} projects {} columns into a row shape of width {}",
                            scan.table,
                            projects.len(),
                            node.schema.size()
                        )));
                    }
                }
            }
            LogicalOp::Values(values) => {
                expect_inputs(0)?;
                for tuple in &values.tuples {
                    if tuple.len() != node.schema.size() {
                        return Err(QueryError::ValidationError(format!(
                            "values tuple of width {} in a row shape of width {}",
                            tuple.len(),
                            node.schema.size()
                        )));
                    }
                }
            }
            LogicalOp::Filter(filter) => {
                expect_inputs(1)?;
                check_refs(&filter.condition, input_schemas[0].size())?;
            }
            LogicalOp::Project(project) => {
                expect_inputs(1)?;
                check_width(project.exprs.len(), &node.schema)?;
                for e in &project.exprs {
                    check_refs(e, input_schemas[0].size())?;
                }
            }
            LogicalOp::Calc(calc) => {
                expect_inputs(1)?;
                check_width(calc.exprs.len(), &node.schema)?;
                if let Some(c) = &calc.condition {
                    check_refs(c, input_schemas[0].size())?;
                }
                for e in &calc.exprs {
                    check_refs(e, input_schemas[0].size())?;
                }
            }
            LogicalOp::Join(join) => {
                expect_inputs(2)?;
                let width = input_schemas[0].size() + input_schemas[1].size();
                check_refs(&join.condition, width)?;
            }
            LogicalOp::Sort(sort) => {
                expect_inputs(1)?;
                for key in &sort.keys {
                    check_column(key.field, input_schemas[0].size())?;
                }
            }
            LogicalOp::Union(_) => {
                if input_schemas.is_empty() {
                    return Err(QueryError::ValidationError(String::from(
                        "union needs at least one input",
                    )));
                }
                for s in &input_schemas {
                    check_width(s.size(), &node.schema)?;
                }
            }
            LogicalOp::Aggregate(agg) => {
                expect_inputs(1)?;
                let width = input_schemas[0].size();
                for g in &agg.group_by {
                    check_column(*g, width)?;
                }
                for set in &agg.group_sets {
                    if let Some(c) = set.iter().find(|c| !agg.group_by.contains(c)) {
                        return Err(QueryError::ValidationError(format!(
                            "grouping set column ${} is not a group column",
                            c
                        )));
                    }
                }
                for call in &agg.calls {
                    check_call(call, width)?;
                }
            }
            LogicalOp::Window(window) => {
                expect_inputs(1)?;
                let width = input_schemas[0].size();
                for group in &window.groups {
                    for p in &group.partition_by {
                        check_column(*p, width)?;
                    }
                    for key in &group.order_by {
                        check_column(key.field, width)?;
                    }
                    for call in &group.calls {
                        check_call(call, width)?;
                    }
                }
            }
            LogicalOp::Extension(_) => {}
        }
        Ok(())
    }

    /// Serializes the Logical Plan as json. Fails for plans holding extension nodes.
    pub fn to_json(&self) -> Result<serde_json::Value, QueryError> {
        Ok(serde_json::to_value(self)?)
    }

    /// De-Serializes a json representation of the Logical Plan created in to_json
    pub fn from_json(json: &str) -> Result<Self, QueryError> {
        let parsed: LogicalPlan = serde_json::from_str(json)?;
        // Rebuild node by node so that inputs are validated against earlier nodes.
        let mut plan = LogicalPlan::new();
        let mut deferred = Vec::new();
        for (i, node) in parsed.nodes.into_iter().enumerate() {
            if node.inputs.iter().all(|input| *input < i) {
                plan.push_node(node)?;
            } else {
                let placeholder_schema = node.schema.clone();
                plan.nodes.push(PlanNode::new(
                    LogicalOp::Values(ValuesNode { tuples: Vec::new() }),
                    Vec::new(),
                    placeholder_schema,
                ));
                deferred.push((i, node));
            }
        }
        for (i, node) in deferred {
            for input in &node.inputs {
                if *input >= plan.nodes.len() {
                    return Err(QueryError::ValidationError(format!(
                        "node {} reads from missing node {}",
                        i, input
                    )));
                }
            }
            plan.replace_node(i, node)?;
        }
        if let Some(root) = parsed.root {
            plan.set_root(root)?;
        }
        Ok(plan)
    }
}

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_json() {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "<plan with {} nodes>", self.node_count()),
        }
    }
}

fn check_column(column: usize, width: usize) -> Result<(), QueryError> {
    if column < width {
        Ok(())
    } else {
        Err(QueryError::ValidationError(format!(
            "column ${} out of range for input of width {}",
            column, width
        )))
    }
}

fn check_refs(expr: &Expr, width: usize) -> Result<(), QueryError> {
    for column in expr.input_refs() {
        check_column(column, width)?;
    }
    Ok(())
}

fn check_call(call: &AggregateCall, width: usize) -> Result<(), QueryError> {
    for arg in &call.args {
        check_column(*arg, width)?;
    }
    if let Some(f) = call.filter {
        check_column(f, width)?;
    }
    Ok(())
}

fn check_width(width: usize, schema: &TableSchema) -> Result<(), QueryError> {
    if width == schema.size() {
        Ok(())
    } else {
        Err(QueryError::ValidationError(format!(
            "{} columns produced into a row shape of width {}",
            width,
            schema.size()
        )))
    }
}

fn project_schema(
    input: &TableSchema,
    exprs: &[Expr],
    names: &[&str],
) -> Result<TableSchema, QueryError> {
    if !names.is_empty() && names.len() != exprs.len() {
        return Err(QueryError::ValidationError(format!(
            "{} names for {} expressions",
            names.len(),
            exprs.len()
        )));
    }
    let mut attrs = Vec::with_capacity(exprs.len());
    for (i, e) in exprs.iter().enumerate() {
        let name = match (names.get(i), e.as_input_ref().and_then(|c| input.get_attribute(c))) {
            (Some(n), _) => n.to_string(),
            (None, Some(attr)) => attr.name().to_string(),
            (None, None) => format!("EXPR${}", i),
        };
        attrs.push(Attribute::new(name, e.data_type(input)));
    }
    Ok(TableSchema::new(attrs))
}

fn call_type(call: &AggregateCall, input: &TableSchema) -> DataType {
    match call.func {
        AggFunc::Count | AggFunc::Sum | AggFunc::Avg | AggFunc::RowNumber => DataType::Int,
        AggFunc::Min | AggFunc::Max => call
            .args
            .first()
            .and_then(|a| input.get_attribute(*a))
            .map(|a| *a.dtype())
            .unwrap_or(DataType::Any),
        AggFunc::Custom(_) => DataType::Any,
    }
}
