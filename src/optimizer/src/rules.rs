use common::catalog::Catalog;
use common::logical_plan::*;
use common::storage_trait::ScanCapability;
use common::{Expr, QueryError};

/// A local, cost-free rewrite matched at one plan node.
pub trait RewriteRule {
    fn name(&self) -> &str;

    /// Rewrites the node at `index` in place if the rule matches. Returns whether it did.
    ///
    /// # Arguments
    ///
    /// * `plan` - Plan being rewritten.
    /// * `index` - Node to match the rule against.
    /// * `catalog` - Entity lookup for scan capabilities.
    fn apply(
        &self,
        plan: &mut LogicalPlan,
        index: OpIndex,
        catalog: &dyn Catalog,
    ) -> Result<bool, QueryError>;
}

/// Which pushdowns the entity behind a scan accepts.
fn scan_accepts(catalog: &dyn Catalog, table: &str) -> (bool, bool) {
    let entity = match catalog.get_entity(table) {
        Some(entity) => entity,
        None => return (false, false),
    };
    let accepts = match entity.capability() {
        ScanCapability::ProjectableFilterable(_) => (true, true),
        ScanCapability::Filterable(_) => (true, false),
        _ => (false, false),
    };
    accepts
}

/// The scan directly under the single-input node at `index`.
fn input_scan(plan: &LogicalPlan, index: OpIndex) -> Option<ScanNode> {
    match plan.inputs(index) {
        [input] => match plan.get_operator(*input) {
            Some(LogicalOp::Scan(scan)) => Some(scan.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// Splits a calc into a project over a filter.
pub struct CalcSplit;

impl RewriteRule for CalcSplit {
    fn name(&self) -> &str {
        "CalcSplit"
    }

    fn apply(
        &self,
        plan: &mut LogicalPlan,
        index: OpIndex,
        _catalog: &dyn Catalog,
    ) -> Result<bool, QueryError> {
        let node = match plan.get_node(index) {
            Some(n) => n.clone(),
            None => return Ok(false),
        };
        let calc = match node.op {
            LogicalOp::Calc(calc) => calc,
            _ => return Ok(false),
        };
        let input = match node.inputs.as_slice() {
            [input] => *input,
            _ => {
                return Err(QueryError::ValidationError(String::from(
                    "calc expects exactly one input",
                )))
            }
        };
        let project_input = match calc.condition {
            Some(condition) => {
                let input_schema = plan
                    .schema(input)
                    .cloned()
                    .ok_or_else(|| QueryError::InternalError(format!("missing node {}", input)))?;
                plan.push_node(PlanNode::new(
                    LogicalOp::Filter(FilterNode { condition }),
                    vec![input],
                    input_schema,
                ))?
            }
            None => input,
        };
        plan.replace_node(
            index,
            PlanNode::new(
                LogicalOp::Project(ProjectNode { exprs: calc.exprs }),
                vec![project_input],
                node.schema,
            ),
        )?;
        Ok(true)
    }
}

/// Moves a filter's conjuncts into the candidate filters of the scan beneath it.
pub struct FilterIntoScan;

impl RewriteRule for FilterIntoScan {
    fn name(&self) -> &str {
        "FilterIntoScan"
    }

    fn apply(
        &self,
        plan: &mut LogicalPlan,
        index: OpIndex,
        catalog: &dyn Catalog,
    ) -> Result<bool, QueryError> {
        let condition = match plan.get_operator(index) {
            Some(LogicalOp::Filter(filter)) => filter.condition.clone(),
            _ => return Ok(false),
        };
        let mut scan = match input_scan(plan, index) {
            Some(scan) => scan,
            None => return Ok(false),
        };
        let (filterable, _) = scan_accepts(catalog, &scan.table);
        if !filterable {
            return Ok(false);
        }
        // Scan filters are expressed over the entity's columns, not the scan's output.
        let projects = scan.projects.clone();
        let to_entity = |i: usize| match &projects {
            Some(p) => p.get(i).copied(),
            None => Some(i),
        };
        for conjunct in condition.conjunctions() {
            scan.filters.push(conjunct.map_inputs(&to_entity)?);
        }
        let schema = plan
            .schema(index)
            .cloned()
            .ok_or_else(|| QueryError::InternalError(format!("missing node {}", index)))?;
        plan.replace_node(index, PlanNode::new(LogicalOp::Scan(scan), Vec::new(), schema))?;
        Ok(true)
    }
}

/// Moves a column-only projection into the scan beneath it.
pub struct ProjectIntoScan;

impl RewriteRule for ProjectIntoScan {
    fn name(&self) -> &str {
        "ProjectIntoScan"
    }

    fn apply(
        &self,
        plan: &mut LogicalPlan,
        index: OpIndex,
        catalog: &dyn Catalog,
    ) -> Result<bool, QueryError> {
        let exprs = match plan.get_operator(index) {
            Some(LogicalOp::Project(project)) => project.exprs.clone(),
            _ => return Ok(false),
        };
        let mut scan = match input_scan(plan, index) {
            Some(scan) => scan,
            None => return Ok(false),
        };
        let (_, projectable) = scan_accepts(catalog, &scan.table);
        if !projectable {
            return Ok(false);
        }
        let refs: Option<Vec<usize>> = exprs.iter().map(Expr::as_input_ref).collect();
        let refs = match refs {
            Some(refs) => refs,
            None => return Ok(false),
        };
        let input_width = plan.schema(plan.inputs(index)[0]).map_or(0, |s| s.size());
        let identity = refs.len() == input_width && refs.iter().enumerate().all(|(i, r)| i == *r);
        if identity {
            return Ok(false);
        }
        let composed = match &scan.projects {
            Some(existing) => {
                let mut composed = Vec::with_capacity(refs.len());
                for r in &refs {
                    composed.push(*existing.get(*r).ok_or_else(|| {
                        QueryError::ValidationError(format!("column ${} is not produced by the scan", r))
                    })?);
                }
                composed
            }
            None => refs,
        };
        scan.projects = Some(composed);
        let schema = plan
            .schema(index)
            .cloned()
            .ok_or_else(|| QueryError::InternalError(format!("missing node {}", index)))?;
        plan.replace_node(index, PlanNode::new(LogicalOp::Scan(scan), Vec::new(), schema))?;
        Ok(true)
    }
}
