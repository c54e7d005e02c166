use crate::dataflow::ExtensionOp;
use crate::{Expr, Field};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;

/// A LogicalOp represents a relational operation present in a logical query plan.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum LogicalOp {
    Scan(ScanNode),
    Filter(FilterNode),
    Project(ProjectNode),
    Calc(CalcNode),
    Join(JoinNode),
    Sort(SortNode),
    Union(UnionNode),
    Values(ValuesNode),
    Aggregate(AggregateNode),
    Window(WindowNode),
    /// Operator outside the built-in set. Not serializable.
    #[serde(skip)]
    Extension(ExtensionNode),
}

impl LogicalOp {
    /// Short operator name used in logs and error messages.
    pub fn kind(&self) -> &str {
        match self {
            LogicalOp::Scan(_) => "Scan",
            LogicalOp::Filter(_) => "Filter",
            LogicalOp::Project(_) => "Project",
            LogicalOp::Calc(_) => "Calc",
            LogicalOp::Join(_) => "Join",
            LogicalOp::Sort(_) => "Sort",
            LogicalOp::Union(_) => "Union",
            LogicalOp::Values(_) => "Values",
            LogicalOp::Aggregate(_) => "Aggregate",
            LogicalOp::Window(_) => "Window",
            LogicalOp::Extension(e) => e.op.name(),
        }
    }
}

/// Scan node.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ScanNode {
    /// Name of the entity to scan.
    pub table: String,
    /// Candidate filters pushed into the scan, over the entity's full row shape.
    #[serde(default)]
    pub filters: Vec<Expr>,
    /// Entity columns to produce, None for all of them.
    #[serde(default)]
    pub projects: Option<Vec<usize>>,
}

impl ScanNode {
    /// Entity column produced at each output position.
    pub fn output_columns(&self, entity_width: usize) -> Vec<usize> {
        match &self.projects {
            Some(p) => p.clone(),
            None => (0..entity_width).collect(),
        }
    }
}

/// Filter node.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FilterNode {
    /// Predicate to filter by.
    pub condition: Expr,
}

/// Projection node.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProjectNode {
    /// One expression per output column.
    pub exprs: Vec<Expr>,
}

/// Combined filter and projection, split before execution.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CalcNode {
    pub condition: Option<Expr>,
    pub exprs: Vec<Expr>,
}

/// Join types understood by the nested loop join.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    /// Left rows with at least one match, left columns only.
    Semi,
    /// Left rows without a match, left columns only.
    Anti,
}

impl JoinType {
    /// Whether the output carries the right input's columns.
    pub fn projects_right(&self) -> bool {
        !matches!(self, JoinType::Semi | JoinType::Anti)
    }

    pub fn generates_nulls_on_right(&self) -> bool {
        matches!(self, JoinType::Left | JoinType::Full)
    }

    pub fn generates_nulls_on_left(&self) -> bool {
        matches!(self, JoinType::Right | JoinType::Full)
    }
}

/// JoinNode
/// * condition - predicate over the concatenation of the left and right rows
/// * join_type - which unmatched rows are preserved
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct JoinNode {
    pub condition: Expr,
    pub join_type: JoinType,
}

/// Sort direction.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Where nulls go, regardless of direction.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum NullOrdering {
    First,
    Last,
}

/// One sort key.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    /// Column to sort on.
    pub field: usize,
    pub direction: SortDirection,
    pub nulls: NullOrdering,
}

impl SortKey {
    /// Ascending key, nulls last.
    pub fn asc(field: usize) -> Self {
        Self {
            field,
            direction: SortDirection::Asc,
            nulls: NullOrdering::Last,
        }
    }

    /// Descending key, nulls first.
    pub fn desc(field: usize) -> Self {
        Self {
            field,
            direction: SortDirection::Desc,
            nulls: NullOrdering::First,
        }
    }

    pub fn with_nulls(mut self, nulls: NullOrdering) -> Self {
        self.nulls = nulls;
        self
    }
}

/// Sort node. Without keys it only applies offset and fetch.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SortNode {
    #[serde(default)]
    pub keys: Vec<SortKey>,
    #[serde(default)]
    pub offset: usize,
    /// Maximum rows to emit; absent or negative means unbounded.
    #[serde(default)]
    pub fetch: Option<i64>,
}

impl SortNode {
    /// Fetch as a usize, None when unbounded.
    pub fn limit(&self) -> Option<usize> {
        match self.fetch {
            Some(f) if f >= 0 => Some(f as usize),
            _ => None,
        }
    }
}

/// Union node.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UnionNode {
    /// Keep duplicates.
    pub all: bool,
}

/// Literal rows.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ValuesNode {
    pub tuples: Vec<Vec<Field>>,
}

/// Aggregate functions a plan may request. Not all of them have an evaluation strategy.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
    RowNumber,
    /// User-defined aggregate known only by name.
    Custom(String),
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggFunc::Count => write!(f, "count"),
            AggFunc::Sum => write!(f, "sum"),
            AggFunc::Min => write!(f, "min"),
            AggFunc::Max => write!(f, "max"),
            AggFunc::Avg => write!(f, "avg"),
            AggFunc::RowNumber => write!(f, "row_number"),
            AggFunc::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// One aggregate call.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AggregateCall {
    pub func: AggFunc,
    /// Argument columns.
    #[serde(default)]
    pub args: Vec<usize>,
    #[serde(default)]
    pub distinct: bool,
    /// Boolean column; only rows where it is true contribute.
    #[serde(default)]
    pub filter: Option<usize>,
    /// Output column name.
    #[serde(default)]
    pub name: Option<String>,
}

impl AggregateCall {
    /// Creates a call.
    ///
    /// # Arguments
    ///
    /// * `func` - Aggregate function.
    /// * `args` - Argument columns.
    pub fn new(func: AggFunc, args: Vec<usize>) -> Self {
        Self {
            func,
            args,
            distinct: false,
            filter: None,
            name: None,
        }
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn with_filter(mut self, filter: usize) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Output column name, defaulting to `func_args`.
    pub fn output_name(&self, position: usize) -> String {
        match &self.name {
            Some(n) => n.clone(),
            None => format!("{}_{}", self.func, position),
        }
    }
}

/// Aggregation node.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AggregateNode {
    /// Fields to groupby.
    #[serde(default)]
    pub group_by: Vec<usize>,
    /// Grouping sets, each a subset of `group_by`. Empty means the single set `group_by`.
    #[serde(default)]
    pub group_sets: Vec<Vec<usize>>,
    /// Aggregate calls, one output column each.
    pub calls: Vec<AggregateCall>,
}

/// One window specification and the calls evaluated over it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WindowGroup {
    #[serde(default)]
    pub partition_by: Vec<usize>,
    #[serde(default)]
    pub order_by: Vec<SortKey>,
    pub calls: Vec<AggregateCall>,
}

/// Window node; appends one column per call to every input row.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WindowNode {
    pub groups: Vec<WindowGroup>,
}

/// Operator supplied by the caller.
#[derive(Clone)]
pub struct ExtensionNode {
    pub op: Arc<dyn ExtensionOp>,
}

impl ExtensionNode {
    pub fn new(op: Arc<dyn ExtensionOp>) -> Self {
        Self { op }
    }
}

impl Debug for ExtensionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExtensionNode({})", self.op.name())
    }
}

/// Predicate operators.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PredicateOp {
    Equals,
    GreaterThan,
    LessThan,
    LessThanOrEq,
    GreaterThanOrEq,
    NotEq,
}

impl PredicateOp {
    /// Do predicate comparison.
    ///
    /// # Arguments
    ///
    /// * `left_field` - Left field of the predicate.
    /// * `right_field` - Right field of the predicate.
    pub fn compare<T: Ord>(&self, left_field: &T, right_field: &T) -> bool {
        match self {
            PredicateOp::Equals => left_field == right_field,
            PredicateOp::GreaterThan => left_field > right_field,
            PredicateOp::LessThan => left_field < right_field,
            PredicateOp::LessThanOrEq => left_field <= right_field,
            PredicateOp::GreaterThanOrEq => left_field >= right_field,
            PredicateOp::NotEq => left_field != right_field,
        }
    }

    /// Flip the operator.
    pub fn flip(&self) -> Self {
        match self {
            PredicateOp::GreaterThan => PredicateOp::LessThan,
            PredicateOp::LessThan => PredicateOp::GreaterThan,
            PredicateOp::LessThanOrEq => PredicateOp::GreaterThanOrEq,
            PredicateOp::GreaterThanOrEq => PredicateOp::LessThanOrEq,
            op => *op,
        }
    }
}
