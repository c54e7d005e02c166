use common::database::DataContext;
use common::storage_trait::{
    Entity, FilterableEntity, ProjectableFilterableEntity, RowBuffer, RowIterator, RowSequence,
    ScanCapability, ScannableEntity,
};
use common::{Expr, Field, PredicateOp, QueryError, Row, TableSchema};
use std::fmt;
use std::rc::Rc;

/// Scan capability a MemTable exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    ProjectableFilterable,
    Filterable,
    Scannable,
    Sequence,
}

impl ScanMode {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "projectable-filterable" | "pf" => Some(ScanMode::ProjectableFilterable),
            "filterable" => Some(ScanMode::Filterable),
            "scannable" => Some(ScanMode::Scannable),
            "sequence" => Some(ScanMode::Sequence),
            _ => None,
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanMode::ProjectableFilterable => "projectable-filterable",
            ScanMode::Filterable => "filterable",
            ScanMode::Scannable => "scannable",
            ScanMode::Sequence => "sequence",
        };
        write!(f, "{}", name)
    }
}

/// `column <op> literal` applied by the table itself.
#[derive(Debug, Clone)]
struct ColumnPredicate {
    column: usize,
    op: PredicateOp,
    value: Field,
}

impl ColumnPredicate {
    /// Null columns never match.
    fn matches(&self, row: &Row) -> bool {
        match row.get_field(self.column) {
            Some(Field::Null) | None => false,
            Some(field) => self.op.compare(field, &self.value),
        }
    }
}

/// In-memory table of rows.
pub struct MemTable {
    name: String,
    schema: TableSchema,
    rows: Rc<Vec<Row>>,
    mode: ScanMode,
}

impl MemTable {
    /// Creates a projectable+filterable table.
    ///
    /// # Arguments
    ///
    /// * `name` - Entity name.
    /// * `schema` - Row shape.
    /// * `rows` - Contents; every row must match the schema's width.
    pub fn new(name: &str, schema: TableSchema, rows: Vec<Row>) -> Result<Self, QueryError> {
        for row in &rows {
            if row.size() != schema.size() {
                return Err(QueryError::ValidationError(format!(
                    "row of width {} in table {} of width {}",
                    row.size(),
                    name,
                    schema.size()
                )));
            }
        }
        Ok(Self {
            name: name.to_string(),
            schema,
            rows: Rc::new(rows),
            mode: ScanMode::ProjectableFilterable,
        })
    }

    pub fn with_mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Turns a candidate filter into a predicate the table can apply, if it has the right form.
    fn as_column_predicate(&self, filter: &Expr) -> Option<ColumnPredicate> {
        let (op, operands) = match filter {
            Expr::Call { op, operands } if operands.len() == 2 => (op.as_predicate_op()?, operands),
            _ => return None,
        };
        let (column, value, op) = match (&operands[0], &operands[1]) {
            (Expr::InputRef(c), Expr::Literal(v)) => (*c, v, op),
            (Expr::Literal(v), Expr::InputRef(c)) => (*c, v, op.flip()),
            _ => return None,
        };
        let attr = self.schema.get_attribute(column)?;
        if value.is_null() || *attr.dtype() != value.dtype() {
            return None;
        }
        Some(ColumnPredicate {
            column,
            op,
            value: value.clone(),
        })
    }

    /// Removes the filters the table can apply and returns them as predicates.
    fn take_predicates(&self, filters: &mut Vec<Expr>) -> Vec<ColumnPredicate> {
        let mut accepted = Vec::new();
        filters.retain(|f| match self.as_column_predicate(f) {
            Some(p) => {
                accepted.push(p);
                false
            }
            None => true,
        });
        debug!(
            "memstore::table {} accepted {} filter(s), {} residual",
            self.name,
            accepted.len(),
            filters.len()
        );
        accepted
    }
}

impl fmt::Debug for MemTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemTable")
            .field("name", &self.name)
            .field("rows", &self.rows.len())
            .field("mode", &self.mode)
            .finish()
    }
}

impl Entity for MemTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn capability(&self) -> ScanCapability<'_> {
        match self.mode {
            ScanMode::ProjectableFilterable => ScanCapability::ProjectableFilterable(self),
            ScanMode::Filterable => ScanCapability::Filterable(self),
            ScanMode::Scannable => ScanCapability::Scannable(self),
            ScanMode::Sequence => {
                ScanCapability::Sequence(Rc::new(RowBuffer::new(Rc::clone(&self.rows))))
            }
        }
    }
}

impl ScannableEntity for MemTable {
    fn scan(&self, _ctx: &DataContext) -> Result<Rc<dyn RowSequence>, QueryError> {
        Ok(Rc::new(RowBuffer::new(Rc::clone(&self.rows))))
    }
}

impl FilterableEntity for MemTable {
    fn scan_filtered(
        &self,
        _ctx: &DataContext,
        filters: &mut Vec<Expr>,
    ) -> Result<Rc<dyn RowSequence>, QueryError> {
        let predicates = self.take_predicates(filters);
        Ok(Rc::new(FilteredRows {
            rows: Rc::clone(&self.rows),
            predicates: Rc::new(predicates),
            projects: None,
        }))
    }
}

impl ProjectableFilterableEntity for MemTable {
    fn scan_projected(
        &self,
        _ctx: &DataContext,
        filters: &mut Vec<Expr>,
        projects: Option<&[usize]>,
    ) -> Result<Rc<dyn RowSequence>, QueryError> {
        if let Some(p) = projects {
            self.schema.project(p)?;
        }
        let predicates = self.take_predicates(filters);
        Ok(Rc::new(FilteredRows {
            rows: Rc::clone(&self.rows),
            predicates: Rc::new(predicates),
            projects: projects.map(|p| Rc::new(p.to_vec())),
        }))
    }
}

/// Rows passing every predicate, optionally projected.
struct FilteredRows {
    rows: Rc<Vec<Row>>,
    predicates: Rc<Vec<ColumnPredicate>>,
    projects: Option<Rc<Vec<usize>>>,
}

impl RowSequence for FilteredRows {
    fn open(&self) -> Result<RowIterator, QueryError> {
        let rows = Rc::clone(&self.rows);
        let predicates = Rc::clone(&self.predicates);
        let projects = self.projects.clone();
        Ok(Box::new(
            (0..rows.len())
                .filter(move |i| predicates.iter().all(|p| p.matches(&rows[*i])))
                .map({
                    let rows = Rc::clone(&self.rows);
                    move |i| {
                        let row = &rows[i];
                        Ok(match &projects {
                            Some(p) => Row::new(
                                p.iter()
                                    .map(|c| row.get_field(*c).cloned().unwrap_or(Field::Null))
                                    .collect(),
                            ),
                            None => row.clone(),
                        })
                    }
                }),
        ))
    }
}
