use common::database::DataContext;
use common::storage_trait::*;
use common::{Expr, QueryError, Row, TableSchema};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Scannable table that counts opens and pulled rows and fails when pulled past its end.
#[derive(Debug)]
pub struct StrictTable {
    name: String,
    schema: TableSchema,
    rows: Rc<Vec<Row>>,
    opens: Rc<Cell<usize>>,
    pulls: Rc<Cell<usize>>,
}

impl StrictTable {
    pub fn new(name: &str, schema: TableSchema, rows: Vec<Row>) -> Self {
        Self {
            name: name.to_string(),
            schema,
            rows: Rc::new(rows),
            opens: Rc::new(Cell::new(0)),
            pulls: Rc::new(Cell::new(0)),
        }
    }

    pub fn opens(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.opens)
    }

    pub fn pulls(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.pulls)
    }
}

struct StrictRows {
    rows: Rc<Vec<Row>>,
    opens: Rc<Cell<usize>>,
    pulls: Rc<Cell<usize>>,
}

impl RowSequence for StrictRows {
    fn open(&self) -> Result<RowIterator, QueryError> {
        self.opens.set(self.opens.get() + 1);
        Ok(Box::new(StrictIter {
            rows: Rc::clone(&self.rows),
            position: 0,
            ended: false,
            pulls: Rc::clone(&self.pulls),
        }))
    }
}

struct StrictIter {
    rows: Rc<Vec<Row>>,
    position: usize,
    ended: bool,
    pulls: Rc<Cell<usize>>,
}

impl Iterator for StrictIter {
    type Item = Result<Row, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(row) = self.rows.get(self.position) {
            self.position += 1;
            self.pulls.set(self.pulls.get() + 1);
            return Some(Ok(row.clone()));
        }
        if self.ended {
            return Some(Err(QueryError::ExecutionError(String::from(
                "pulled past the end",
            ))));
        }
        self.ended = true;
        None
    }
}

impl Entity for StrictTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn capability(&self) -> ScanCapability<'_> {
        ScanCapability::Scannable(self)
    }
}

impl ScannableEntity for StrictTable {
    fn scan(&self, _ctx: &DataContext) -> Result<Rc<dyn RowSequence>, QueryError> {
        Ok(Rc::new(StrictRows {
            rows: Rc::clone(&self.rows),
            opens: Rc::clone(&self.opens),
            pulls: Rc::clone(&self.pulls),
        }))
    }
}

/// Projectable+filterable table that never applies a filter and records every projection asked for.
#[derive(Debug)]
pub struct StubbornTable {
    name: String,
    schema: TableSchema,
    rows: Vec<Row>,
    requests: RefCell<Vec<Option<Vec<usize>>>>,
    invent: Option<Expr>,
}

impl StubbornTable {
    pub fn new(name: &str, schema: TableSchema, rows: Vec<Row>) -> Self {
        Self {
            name: name.to_string(),
            schema,
            rows,
            requests: RefCell::new(Vec::new()),
            invent: None,
        }
    }

    /// Makes every scan hand back `filter` as if it had been asked to apply it.
    pub fn inventing(mut self, filter: Expr) -> Self {
        self.invent = Some(filter);
        self
    }

    pub fn requests(&self) -> Vec<Option<Vec<usize>>> {
        self.requests.borrow().clone()
    }
}

impl Entity for StubbornTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn capability(&self) -> ScanCapability<'_> {
        ScanCapability::ProjectableFilterable(self)
    }
}

impl ProjectableFilterableEntity for StubbornTable {
    fn scan_projected(
        &self,
        _ctx: &DataContext,
        filters: &mut Vec<Expr>,
        projects: Option<&[usize]>,
    ) -> Result<Rc<dyn RowSequence>, QueryError> {
        self.requests.borrow_mut().push(projects.map(|p| p.to_vec()));
        if let Some(filter) = &self.invent {
            filters.push(filter.clone());
        }
        let rows = match projects {
            Some(p) => self
                .rows
                .iter()
                .map(|r| Row::new(p.iter().map(|c| r.values()[*c].clone()).collect()))
                .collect(),
            None => self.rows.clone(),
        };
        Ok(Rc::new(RowBuffer::new(Rc::new(rows))))
    }
}

/// Entity that cannot be scanned at all.
#[derive(Debug)]
pub struct OpaqueTable {
    name: String,
    schema: TableSchema,
}

impl OpaqueTable {
    pub fn new(name: &str, schema: TableSchema) -> Self {
        Self {
            name: name.to_string(),
            schema,
        }
    }
}

impl Entity for OpaqueTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn capability(&self) -> ScanCapability<'_> {
        ScanCapability::Unsupported
    }
}
