use common::catalog::Catalog;
use common::dataflow::{EvalContext, ImplementContext, Node, Scalar};
use common::database::DataContext;
use common::logical_plan::ScanNode;
use common::storage_trait::{Entity, RowIterator, RowSequence, ScanCapability};
use common::{Expr, Field, QueryError, Row};
use std::collections::BTreeSet;
use std::rc::Rc;

/// Scan of a storage entity. Its output is a lazy sequence, so running it does nothing.
pub struct TableScan;

impl TableScan {
    /// Negotiates the scan with the entity and registers the resulting sequence as the node's output.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Compiler services for this node.
    /// * `scan` - Entity name, candidate filters and projection.
    pub fn new(ctx: &mut dyn ImplementContext, scan: &ScanNode) -> Result<Self, QueryError> {
        let data_context = ctx.data_context();
        let entity = data_context.get_entity_ptr(&scan.table)?;
        let rows = negotiate(ctx, &data_context, entity.as_ref(), scan)?;
        ctx.lazy(rows)?;
        Ok(TableScan)
    }
}

impl Node for TableScan {
    fn run(&mut self) -> Result<(), QueryError> {
        Ok(())
    }
}

/// Rows the entity produced plus the work it left to the interpreter.
struct Negotiated {
    rows: Rc<dyn RowSequence>,
    /// Entity columns present in `rows`, None for all of them.
    produced: Option<Vec<usize>>,
    residual: Vec<Expr>,
}

fn check_invented(table: &str, candidates: &[Expr], residual: &[Expr]) -> Result<(), QueryError> {
    for filter in residual {
        if !candidates.contains(filter) {
            return Err(QueryError::EntityProtocol(format!(
                "entity {} invented a filter: {}",
                table, filter
            )));
        }
    }
    Ok(())
}

fn negotiate(
    ctx: &dyn ImplementContext,
    data_context: &Rc<DataContext>,
    entity: &dyn Entity,
    scan: &ScanNode,
) -> Result<Rc<dyn RowSequence>, QueryError> {
    let width = entity.schema().size();
    for f in &scan.filters {
        if let Some(c) = f.input_refs().into_iter().find(|c| *c >= width) {
            return Err(QueryError::ValidationError(format!(
                "scan filter {} references column ${} of {} with {} columns",
                f, c, scan.table, width
            )));
        }
    }
    let negotiated = match entity.capability() {
        ScanCapability::ProjectableFilterable(pf) => {
            let mut projects = scan.projects.clone();
            let mut attempts = 0;
            loop {
                attempts += 1;
                if attempts > width + 1 {
                    return Err(QueryError::InternalError(format!(
                        "scan of {} did not settle after {} attempts",
                        scan.table, width + 1
                    )));
                }
                let mut residual = scan.filters.clone();
                let rows = pf.scan_projected(data_context, &mut residual, projects.as_deref())?;
                check_invented(&scan.table, &scan.filters, &residual)?;
                let missing: Vec<usize> = match &projects {
                    Some(p) => {
                        let used: BTreeSet<usize> =
                            residual.iter().flat_map(|f| f.input_refs()).collect();
                        used.into_iter().filter(|c| !p.contains(c)).collect()
                    }
                    None => Vec::new(),
                };
                if missing.is_empty() {
                    break Negotiated {
                        rows,
                        produced: projects,
                        residual,
                    };
                }
                debug!(
                    "scan of {} widened with columns {:?} for residual filters",
                    scan.table, missing
                );
                if let Some(p) = projects.as_mut() {
                    p.extend(missing);
                }
            }
        }
        ScanCapability::Filterable(f) => {
            let mut residual = scan.filters.clone();
            let rows = f.scan_filtered(data_context, &mut residual)?;
            check_invented(&scan.table, &scan.filters, &residual)?;
            Negotiated {
                rows,
                produced: None,
                residual,
            }
        }
        ScanCapability::Scannable(s) => Negotiated {
            rows: s.scan(data_context)?,
            produced: None,
            residual: scan.filters.clone(),
        },
        ScanCapability::Sequence(rows) => Negotiated {
            rows,
            produced: None,
            residual: scan.filters.clone(),
        },
        ScanCapability::Unsupported => {
            return Err(QueryError::NoScanCapability(scan.table.clone()))
        }
    };
    trace!(
        "scan of {}: {} residual filter(s), produced columns {:?}",
        scan.table,
        negotiated.residual.len(),
        negotiated.produced
    );
    residual_sequence(ctx, entity, scan, negotiated)
}

/// Applies what the entity did not: the residual filter, then the requested projection.
fn residual_sequence(
    ctx: &dyn ImplementContext,
    entity: &dyn Entity,
    scan: &ScanNode,
    negotiated: Negotiated,
) -> Result<Rc<dyn RowSequence>, QueryError> {
    let width = entity.schema().size();
    let produced = negotiated
        .produced
        .unwrap_or_else(|| (0..width).collect::<Vec<usize>>());
    let shape = entity.schema().project(&produced)?;

    // Residual filters are over entity columns; remap them onto the produced row.
    let to_produced = |c: usize| produced.iter().position(|p| *p == c);
    let mut remapped = Vec::with_capacity(negotiated.residual.len());
    for f in &negotiated.residual {
        remapped.push(f.map_inputs(&to_produced)?);
    }
    let filter = match Expr::compose_conjunction(remapped) {
        Some(condition) => Some(ctx.compile(&[condition], &shape)?),
        None => None,
    };

    let wanted = scan.output_columns(width);
    let project = if wanted == produced {
        None
    } else {
        let mut positions = Vec::with_capacity(wanted.len());
        for c in &wanted {
            positions.push(to_produced(*c).ok_or_else(|| {
                QueryError::InternalError(format!("scan of {} lost column {}", scan.table, c))
            })?);
        }
        Some(Rc::new(positions))
    };

    if filter.is_none() && project.is_none() {
        return Ok(negotiated.rows);
    }
    Ok(Rc::new(ResidualRows {
        inner: negotiated.rows,
        filter,
        project,
        data_context: ctx.data_context(),
    }))
}

/// Restartable residual filter and projection over an entity's sequence.
struct ResidualRows {
    inner: Rc<dyn RowSequence>,
    filter: Option<Rc<dyn Scalar>>,
    project: Option<Rc<Vec<usize>>>,
    data_context: Rc<DataContext>,
}

impl RowSequence for ResidualRows {
    fn open(&self) -> Result<RowIterator, QueryError> {
        Ok(Box::new(ResidualIter {
            rows: self.inner.open()?,
            filter: self.filter.clone(),
            project: self.project.clone(),
            context: EvalContext::new(Rc::clone(&self.data_context)),
        }))
    }
}

struct ResidualIter {
    rows: RowIterator,
    filter: Option<Rc<dyn Scalar>>,
    project: Option<Rc<Vec<usize>>>,
    context: EvalContext,
}

impl ResidualIter {
    fn accept(&mut self, row: &Row) -> Result<bool, QueryError> {
        match &self.filter {
            Some(filter) => {
                self.context.set_row(row);
                Ok(filter.execute_one(&self.context)? == Field::BoolField(true))
            }
            None => Ok(true),
        }
    }

    fn shape(&self, row: Row) -> Result<Row, QueryError> {
        match &self.project {
            Some(positions) => {
                let mut fields = Vec::with_capacity(positions.len());
                for p in positions.iter() {
                    fields.push(row.get_field(*p).cloned().ok_or_else(|| {
                        QueryError::EntityProtocol(format!(
                            "entity row of width {} has no column {}",
                            row.size(),
                            p
                        ))
                    })?);
                }
                Ok(Row::new(fields))
            }
            None => Ok(row),
        }
    }
}

impl Iterator for ResidualIter {
    type Item = Result<Row, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let row = match self.rows.next()? {
                Ok(row) => row,
                Err(e) => return Some(Err(e)),
            };
            match self.accept(&row) {
                Ok(true) => return Some(self.shape(row)),
                Ok(false) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
