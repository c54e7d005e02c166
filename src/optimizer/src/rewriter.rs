use crate::rules::{CalcSplit, FilterIntoScan, ProjectIntoScan, RewriteRule};
use common::catalog::Catalog;
use common::logical_plan::LogicalPlan;
use common::QueryError;

/// Applies a fixed list of rewrite rules until none of them matches.
pub struct Rewriter {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl Rewriter {
    /// Creates the standard rule list.
    ///
    /// # Arguments
    ///
    /// * `pushdown` - Whether filters and projections may move into scans.
    pub fn new(pushdown: bool) -> Self {
        let mut rules: Vec<Box<dyn RewriteRule>> = vec![Box::new(CalcSplit)];
        if pushdown {
            rules.push(Box::new(FilterIntoScan));
            rules.push(Box::new(ProjectIntoScan));
        }
        Self { rules }
    }

    /// Rewrites `plan` in place to a fixpoint and returns how many rewrites were applied.
    ///
    /// A plan no rule matches is left unchanged.
    pub fn rewrite(&self, plan: &mut LogicalPlan, catalog: &dyn Catalog) -> Result<usize, QueryError> {
        let root = match plan.root() {
            Some(root) => root,
            None => return Ok(0),
        };
        let mut applied = 0;
        'fixpoint: loop {
            for index in plan.post_order(root) {
                for rule in &self.rules {
                    if rule.apply(plan, index, catalog)? {
                        debug!("optimizer::rewriter applied {} at node {}", rule.name(), index);
                        applied += 1;
                        // The node set changed; start over from the leaves.
                        continue 'fixpoint;
                    }
                }
            }
            break;
        }
        trace!("optimizer::rewriter {} rewrite(s) applied", applied);
        Ok(applied)
    }
}
