use crate::catalog::Catalog;
use crate::storage_trait::Entity;
use crate::{Field, QueryError};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation flag shared between a running query and whoever may cancel it.
#[derive(Clone, Default, Debug)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fails with `Interrupted` once the flag is set.
    pub fn check(&self) -> Result<(), QueryError> {
        if self.is_cancelled() {
            Err(QueryError::Interrupted(String::from("query cancelled")))
        } else {
            Ok(())
        }
    }
}

/// Query-global, read-only state: bound parameters, the query's start time and the entities it may scan.
pub struct DataContext {
    parameters: Vec<Field>,
    /// Milliseconds since the epoch.
    current_timestamp: i64,
    entities: HashMap<String, Rc<dyn Entity>>,
    cancel: CancelFlag,
}

impl DataContext {
    /// Creates a context with no entities and no parameters.
    ///
    /// # Arguments
    ///
    /// * `current_timestamp` - Value returned by CURRENT_TIMESTAMP for the whole query.
    pub fn new(current_timestamp: i64) -> Self {
        Self {
            parameters: Vec::new(),
            current_timestamp,
            entities: HashMap::new(),
            cancel: CancelFlag::new(),
        }
    }

    /// Context stamped with the wall clock.
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self::new(millis)
    }

    /// Registers an entity under its own name. A later entity with the same name replaces the earlier one.
    pub fn add_entity(&mut self, entity: Rc<dyn Entity>) {
        debug!("registering entity {}", entity.name());
        self.entities.insert(entity.name().to_string(), entity);
    }

    pub fn with_entity(mut self, entity: Rc<dyn Entity>) -> Self {
        self.add_entity(entity);
        self
    }

    pub fn with_parameters(mut self, parameters: Vec<Field>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Dynamic parameter at `index`.
    pub fn parameter(&self, index: usize) -> Result<&Field, QueryError> {
        self.parameters.get(index).ok_or_else(|| {
            QueryError::ExecutionError(format!("dynamic parameter ?{} is not bound", index))
        })
    }

    pub fn current_timestamp(&self) -> i64 {
        self.current_timestamp
    }

    /// Handle that can cancel queries running against this context, from any thread.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn check_cancelled(&self) -> Result<(), QueryError> {
        self.cancel.check()
    }
}

impl Catalog for DataContext {
    fn get_entity(&self, name: &str) -> Option<Rc<dyn Entity>> {
        self.entities.get(name).cloned()
    }
}

impl fmt::Debug for DataContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.entities.keys().collect();
        names.sort();
        f.debug_struct("DataContext")
            .field("parameters", &self.parameters)
            .field("current_timestamp", &self.current_timestamp)
            .field("entities", &names)
            .finish()
    }
}
