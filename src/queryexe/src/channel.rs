use common::dataflow::{Sink, Source};
use common::database::CancelFlag;
use common::storage_trait::{RowIterator, RowSequence};
use common::{QueryError, Row};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Buffer shared by the two ends of a materialized channel.
pub type RowQueue = Rc<RefCell<VecDeque<Row>>>;

pub fn new_queue() -> RowQueue {
    Rc::new(RefCell::new(VecDeque::new()))
}

/// Sink appending to one buffer.
pub struct ListSink {
    buffer: RowQueue,
    cancel: CancelFlag,
}

impl ListSink {
    pub fn new(buffer: RowQueue, cancel: CancelFlag) -> Self {
        Self { buffer, cancel }
    }
}

impl Sink for ListSink {
    fn send(&mut self, row: Row) -> Result<(), QueryError> {
        self.cancel.check()?;
        self.buffer.borrow_mut().push_back(row);
        Ok(())
    }

    fn end(&mut self) -> Result<(), QueryError> {
        Ok(())
    }
}

/// Sink forwarding every row to several buffers, one per consumer edge.
pub struct DuplicatingSink {
    sinks: Vec<ListSink>,
}

impl DuplicatingSink {
    pub fn new(sinks: Vec<ListSink>) -> Self {
        Self { sinks }
    }
}

impl Sink for DuplicatingSink {
    fn send(&mut self, row: Row) -> Result<(), QueryError> {
        if let Some((last, rest)) = self.sinks.split_last_mut() {
            for sink in rest {
                sink.send(row.clone())?;
            }
            last.send(row)?;
        }
        Ok(())
    }

    fn end(&mut self) -> Result<(), QueryError> {
        for sink in &mut self.sinks {
            sink.end()?;
        }
        Ok(())
    }
}

/// Source consuming a buffer front to back.
pub struct ListSource {
    buffer: RowQueue,
}

impl ListSource {
    pub fn new(buffer: RowQueue) -> Self {
        Self { buffer }
    }
}

impl Source for ListSource {
    fn receive(&mut self) -> Result<Option<Row>, QueryError> {
        Ok(self.buffer.borrow_mut().pop_front())
    }
}

/// Source pulling from a lazy row sequence. A deferred sequence is opened on the first receive.
pub struct EnumeratorSource {
    sequence: Option<Rc<dyn RowSequence>>,
    rows: Option<RowIterator>,
}

impl EnumeratorSource {
    pub fn new(rows: RowIterator) -> Self {
        Self {
            sequence: None,
            rows: Some(rows),
        }
    }

    pub fn deferred(sequence: Rc<dyn RowSequence>) -> Self {
        Self {
            sequence: Some(sequence),
            rows: None,
        }
    }
}

impl Source for EnumeratorSource {
    fn receive(&mut self) -> Result<Option<Row>, QueryError> {
        if let Some(sequence) = self.sequence.take() {
            self.rows = Some(sequence.open()?);
        }
        match self.rows.as_mut() {
            Some(rows) => rows.next().transpose(),
            None => Ok(None),
        }
    }
}
