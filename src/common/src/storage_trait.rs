use crate::database::DataContext;
use crate::{Expr, QueryError, Row, TableSchema};
use std::fmt::Debug;
use std::rc::Rc;

pub type RowIterator = Box<dyn Iterator<Item = Result<Row, QueryError>>>;

/// Lazy row sequence that can be opened any number of times.
pub trait RowSequence {
    fn open(&self) -> Result<RowIterator, QueryError>;
}

/// Materialized rows exposed as a sequence.
#[derive(Debug, Clone)]
pub struct RowBuffer {
    rows: Rc<Vec<Row>>,
}

impl RowBuffer {
    pub fn new(rows: Rc<Vec<Row>>) -> Self {
        Self { rows }
    }
}

impl RowSequence for RowBuffer {
    fn open(&self) -> Result<RowIterator, QueryError> {
        let rows = Rc::clone(&self.rows);
        Ok(Box::new((0..rows.len()).map(move |i| Ok(rows[i].clone()))))
    }
}

/// How an entity lets itself be scanned, strongest first.
pub enum ScanCapability<'a> {
    ProjectableFilterable(&'a dyn ProjectableFilterableEntity),
    Filterable(&'a dyn FilterableEntity),
    Scannable(&'a dyn ScannableEntity),
    /// The entity is itself a row sequence.
    Sequence(Rc<dyn RowSequence>),
    Unsupported,
}

/// Storage object a scan reads from.
pub trait Entity: Debug {
    fn name(&self) -> &str;

    /// Row shape of a full scan.
    fn schema(&self) -> &TableSchema;

    fn capability(&self) -> ScanCapability<'_>;
}

/// Entity that can only produce all of its rows.
pub trait ScannableEntity {
    fn scan(&self, ctx: &DataContext) -> Result<Rc<dyn RowSequence>, QueryError>;
}

/// Entity that can apply some filters itself.
pub trait FilterableEntity {
    /// Scans the entity.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Query-global context.
    /// * `filters` - Candidate filters over the full row shape. The entity removes the ones it applies.
    fn scan_filtered(
        &self,
        ctx: &DataContext,
        filters: &mut Vec<Expr>,
    ) -> Result<Rc<dyn RowSequence>, QueryError>;
}

/// Entity that can apply some filters and a projection itself.
pub trait ProjectableFilterableEntity {
    /// Scans the entity.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Query-global context.
    /// * `filters` - Candidate filters over the full row shape. The entity removes the ones it applies.
    /// * `projects` - Columns to produce, None for all. Rows are produced in this shape.
    fn scan_projected(
        &self,
        ctx: &DataContext,
        filters: &mut Vec<Expr>,
        projects: Option<&[usize]>,
    ) -> Result<Rc<dyn RowSequence>, QueryError>;
}
